// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: User-visible encodings of the synchronous IPC path
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: MsgTag, Timeout/TimeoutPair, IpcErrorWord, MsgItem/Fpage/BufDesc, ObjRef/IpcOps, gate ops
//! DEPENDS_ON: bitflags
//! INVARIANTS: Every type is one machine word (or half-word) with a stable bit layout
//! ADR: docs/adr/0016-kernel-libs-architecture.md
//!
//! All encodings in this crate are part of the wire contract between user
//! code and the kernel. Field positions must not move; new flags are only
//! ever added in reserved bits.

mod error;
mod item;
mod obj;
mod tag;
mod timeout;

pub use error::{ErrorCode, IpcErrorWord, Phase};
pub use item::{BufDesc, Fpage, FpageRights, FpageType, MsgItem, LOCAL_ID_OBJECT, LOCAL_ID_SAME_SPACE};
pub use obj::{gate_op, Errno, IpcOps, ObjRef};
pub use tag::{proto, MsgTag, MsgTagFlags};
pub use timeout::{Deadline, Timeout, TimeoutPair};

/// Number of message words carried in an actor's message buffer.
pub const UTCB_MAX_WORDS: usize = 63;

/// Number of buffer-descriptor words (receive windows) in a message buffer.
pub const UTCB_MAX_BUFFERS: usize = 58;

/// Number of message words used by an exception message.
pub const EXCEPTION_MSG_WORDS: usize = 8;
