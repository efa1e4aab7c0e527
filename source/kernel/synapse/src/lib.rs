// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synapse synchronous IPC engine library
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per module + proptest + integration scenarios under tests/
//! PUBLIC API: Kernel, KernelConfig, KernelError, ActorSpec, SyscallFrame, IpcStatus, IpcResult,
//!             Mapper/MapDb, Timer/ManualClock, Capability/KObject/Rights
//! DEPENDS_ON: synapse_abi, spin, bitflags, static_assertions, sbi-rt (riscv64-none)
//! INVARIANTS: one big lock serializes kernel state; mapping runs with it released;
//!             IPC failures travel in error words, entry-point misuse in KernelError
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! The engine is host-testable: every hardware collaborator (timer, IPI,
//! mapping database) sits behind a trait or a bookkeeping fallback when not
//! built for `riscv64-none`.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
pub mod diag;
pub use diag::log;

pub mod actor;
pub mod arena;
pub mod cap;
pub mod config;
pub mod hal;
pub mod ipc;
pub mod kernel;
pub mod mm;
pub mod sched;
pub mod smp;
pub mod sync;
pub mod syscall;
pub mod types;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod uart;

pub use actor::{ActorSpec, Continuation, FpuState, ThreadState};
pub use cap::{Capability, KObject, Rights};
pub use config::KernelConfig;
pub use hal::{ManualClock, Timer};
pub use ipc::fault::{ExceptionFrame, FaultOutcome, FaultReport};
pub use ipc::{IpcResult, IpcStatus};
pub use kernel::{Kernel, KernelError};
pub use mm::{MapDb, MapError, Mapper};
pub use syscall::SyscallFrame;
pub use types::{ActorId, CpuId, GateId, Prio, SpaceId};
