// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: CPU set, per-CPU remote request (DRQ) mailboxes and IPI kicks
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 3 unit tests (mailbox order, offline targets, kick bookkeeping)
//! PUBLIC API: MAX_CPUS, Smp (post/drain/kicks), Drq, RemoteReply
//! DEPENDS_ON: sbi-rt (SPI) on riscv64-none, spin::Mutex
//! INVARIANTS: bounded CPU set; mailboxes drained in FIFO order on the owning CPU only
//! ADR: docs/rfcs/RFC-0021-kernel-smp-v1-percpu-runqueues-ipi-contract.md

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;
use synapse_abi::ErrorCode;

use crate::types::{ActorId, CpuId};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use sbi_rt as sbi;

/// Fixed CPU ceiling for bounded per-CPU state.
pub const MAX_CPUS: usize = 4;

/// Answer of the receiver's CPU to a cross-core send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteReply {
    /// Words were transferred on the receiver's CPU; the send is complete.
    Done,
    /// Receiver is reserved (`TRANSFER`); the sender moves the items itself.
    Claimed,
    /// Sender was queued on the receiver.
    Queued,
    /// Handshake refused.
    Failed(ErrorCode),
}

/// Deferred request executed on a specific CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drq {
    /// Run the check-and-claim step for `sender` against `receiver`.
    IpcSend { sender: ActorId, receiver: ActorId },
    /// Result of an [`Drq::IpcSend`] travelling back to the sender's CPU.
    IpcSendReply { sender: ActorId, receiver: ActorId, reply: RemoteReply },
    /// Make `actor` runnable on this CPU.
    Activate { actor: ActorId },
    /// Cancel the pending IPC of `actor`.
    Cancel { actor: ActorId },
}

/// Online mask plus the DRQ mailboxes of every CPU.
pub struct Smp {
    online: AtomicUsize,
    mailboxes: [Mutex<VecDeque<Drq>>; MAX_CPUS],
    kicks: [AtomicUsize; MAX_CPUS],
}

impl Smp {
    /// Brings `cpus` CPUs online (clamped to `1..=MAX_CPUS`).
    pub fn new(cpus: usize) -> Self {
        let cpus = cpus.clamp(1, MAX_CPUS);
        Self {
            online: AtomicUsize::new((1usize << cpus) - 1),
            mailboxes: core::array::from_fn(|_| Mutex::new(VecDeque::new())),
            kicks: [const { AtomicUsize::new(0) }; MAX_CPUS],
        }
    }

    #[inline]
    pub fn is_online(&self, cpu: CpuId) -> bool {
        let idx = cpu.as_index();
        idx < MAX_CPUS && self.online.load(Ordering::Acquire) & (1usize << idx) != 0
    }

    #[inline]
    pub fn online_count(&self) -> usize {
        self.online.load(Ordering::Acquire).count_ones() as usize
    }

    /// Appends `drq` to the mailbox of `target` and kicks it. Returns false
    /// for offline targets.
    pub fn post(&self, target: CpuId, drq: Drq) -> bool {
        if !self.is_online(target) {
            log_error!(target: "smp", "drq {:?} to offline {}", drq, target);
            return false;
        }
        let idx = target.as_index();
        self.mailboxes[idx].lock().push_back(drq);
        self.kick(target);
        true
    }

    /// Removes every pending request of `cpu` in arrival order.
    pub fn drain(&self, cpu: CpuId) -> Vec<Drq> {
        let idx = cpu.as_index();
        if idx >= MAX_CPUS {
            return Vec::new();
        }
        self.mailboxes[idx].lock().drain(..).collect()
    }

    /// Number of requests waiting for `cpu`.
    pub fn pending(&self, cpu: CpuId) -> usize {
        let idx = cpu.as_index();
        if idx >= MAX_CPUS {
            return 0;
        }
        self.mailboxes[idx].lock().len()
    }

    /// IPIs sent to `cpu` so far.
    pub fn kicks(&self, cpu: CpuId) -> usize {
        let idx = cpu.as_index();
        if idx >= MAX_CPUS {
            return 0;
        }
        self.kicks[idx].load(Ordering::Acquire)
    }

    fn kick(&self, target: CpuId) {
        let idx = target.as_index();
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        {
            let ret = sbi::send_ipi(1usize << idx, 0);
            if ret.error != 0 {
                log_warn!(target: "smp", "ipi to {} failed: {}", target, ret.error);
                return;
            }
        }
        self.kicks[idx].fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;

    fn actor(index: u32) -> ActorId {
        ActorId::from_handle(Handle::new(index, 1))
    }

    #[test]
    fn mailbox_preserves_arrival_order() {
        let smp = Smp::new(2);
        let cpu1 = CpuId::from_raw(1);
        assert!(smp.post(cpu1, Drq::Activate { actor: actor(1) }));
        assert!(smp.post(cpu1, Drq::Cancel { actor: actor(2) }));
        assert_eq!(smp.pending(cpu1), 2);
        assert_eq!(
            smp.drain(cpu1),
            alloc::vec![Drq::Activate { actor: actor(1) }, Drq::Cancel { actor: actor(2) }]
        );
        assert_eq!(smp.pending(cpu1), 0);
    }

    #[test]
    fn offline_targets_are_rejected() {
        let smp = Smp::new(1);
        assert_eq!(smp.online_count(), 1);
        assert!(!smp.post(CpuId::from_raw(3), Drq::Activate { actor: actor(1) }));
        assert_eq!(smp.pending(CpuId::from_raw(3)), 0);
    }

    #[test]
    fn posting_kicks_the_target() {
        let smp = Smp::new(4);
        let cpu2 = CpuId::from_raw(2);
        smp.post(cpu2, Drq::Activate { actor: actor(4) });
        assert_eq!(smp.kicks(cpu2), 1);
        assert_eq!(smp.kicks(CpuId::BOOT), 0);
    }
}
