// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Actors (threads) as seen by the IPC engine: state bits, continuations, lifecycle
//! OWNERS: @kernel-team
//! PUBLIC API: Actor, ActorSpec, ThreadState, Continuation, FpuState
//! DEPENDS_ON: ipc::{utcb, wait_queue, timeout}, sync::switch_lock, kernel::{Env, Guard}
//! INVARIANTS: A blocked actor has exactly one continuation; a DEAD actor is never enqueued anywhere;
//!             the slot is freed only once no gate binding refers to it
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use spin::Mutex;
use synapse_abi::{ErrorCode, FpageRights};

use crate::ipc::fault::{FaultReport, NestedFault};
use crate::ipc::timeout::TimeoutHandle;
use crate::ipc::utcb::Utcb;
use crate::ipc::wait_queue::WaitQueue;
use crate::ipc::{rendezvous, GateRef, Incoming, IpcResult, PendingIpc, RecvFrom};
use crate::kernel::{Env, Guard, KernelError};
use crate::sync::rcu::GraceTarget;
use crate::sync::switch_lock::{NoDonor, SwitchLock, TryLock};
use crate::types::{ActorId, CpuId, GateId, Prio, SpaceId};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Scheduling and IPC state bits of an actor.
    pub struct ThreadState: u32 {
        const READY = 1 << 0;
        const SEND_WAIT = 1 << 1;
        const RECEIVE_WAIT = 1 << 2;
        /// Claimed by a partner; a transfer into/out of this actor is running.
        const TRANSFER = 1 << 3;
        const TIMEOUT = 1 << 4;
        const CANCEL = 1 << 5;
        const IN_EXCEPTION = 1 << 6;
        const DEAD = 1 << 7;
    }
}

impl ThreadState {
    pub const IPC_MASK: Self = Self::SEND_WAIT.union(Self::RECEIVE_WAIT);
    pub const ABORT_MASK: Self = Self::TIMEOUT.union(Self::CANCEL);
    pub const FULL_IPC: Self = Self::IPC_MASK.union(Self::TRANSFER);
}

/// Where a suspended actor resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Not suspended in the kernel.
    Idle,
    /// Waiting for the receiver's CPU to answer a cross-core send.
    RemoteHandshake,
    /// Queued on a receiver (or being claimed by it).
    SendWait,
    /// Waiting for a sender.
    ReceiveWait,
    /// Invoked an unbound gate.
    GateWait(GateId),
    /// Bound a gate; waits for the grace period before releasing the old binding.
    GraceWait { gate: GateId, target: GraceTarget, old_dest: Option<ActorId> },
    /// Parked as helper of a gate control lock.
    LockWait(GateId),
}

/// Reply capability left by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyCap {
    pub actor: ActorId,
    pub rights: FpageRights,
}

/// Owner of the queue a sender is enqueued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueOwner {
    Actor(ActorId),
    Gate(GateId),
}

/// Floating point register file carried by `TRANSFER_FPU` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FpuState {
    pub regs: [u64; 32],
    pub fcsr: u64,
}

/// Parameters of a new actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorSpec {
    pub space: SpaceId,
    pub prio: Prio,
    pub cpu: CpuId,
    /// Capability slot of the page-fault handler in `space`.
    pub pager: u64,
    /// Capability slot of the exception handler in `space`.
    pub exc_handler: u64,
}

impl ActorSpec {
    pub const NO_HANDLER: u64 = u64::MAX;

    pub const fn new(space: SpaceId) -> Self {
        Self {
            space,
            prio: Prio::new(1),
            cpu: CpuId::BOOT,
            pager: Self::NO_HANDLER,
            exc_handler: Self::NO_HANDLER,
        }
    }

    #[must_use]
    pub const fn with_prio(mut self, prio: Prio) -> Self {
        self.prio = prio;
        self
    }

    #[must_use]
    pub const fn on_cpu(mut self, cpu: CpuId) -> Self {
        self.cpu = cpu;
        self
    }

    #[must_use]
    pub const fn with_pager(mut self, slot: u64) -> Self {
        self.pager = slot;
        self
    }

    #[must_use]
    pub const fn with_exc_handler(mut self, slot: u64) -> Self {
        self.exc_handler = slot;
        self
    }
}

/// Kernel-side actor record.
pub struct Actor {
    pub(crate) id: ActorId,
    pub(crate) state: ThreadState,
    pub(crate) prio: Prio,
    /// Set while running on a partner's time after a direct switch.
    pub(crate) donated: Option<Prio>,
    pub(crate) cpu: CpuId,
    pub(crate) space: SpaceId,
    pub(crate) utcb: Utcb,
    pub(crate) fpu: FpuState,
    pub(crate) op: Option<PendingIpc>,
    pub(crate) incoming: Option<Incoming>,
    pub(crate) result: Option<IpcResult>,
    pub(crate) partner: Option<ActorId>,
    pub(crate) queued_on: Option<QueueOwner>,
    /// Gate binding a send is currently being carried through.
    pub(crate) gate_use: Option<GateRef>,
    /// Senders waiting for this actor to receive.
    pub(crate) senders: Mutex<WaitQueue>,
    pub(crate) caller: Option<ReplyCap>,
    pub(crate) timeout: Option<TimeoutHandle>,
    pub(crate) cont: Continuation,
    pub(crate) pager: u64,
    pub(crate) exc_handler: u64,
    pub(crate) fault: Option<NestedFault>,
    pub(crate) fault_report: Option<FaultReport>,
    pub(crate) existence: Arc<SwitchLock>,
    /// Gate bindings (current or retired) naming this actor.
    pub(crate) gate_refs: usize,
}

impl Actor {
    pub(crate) fn new(id: ActorId, spec: ActorSpec) -> Self {
        Self {
            id,
            state: ThreadState::READY,
            prio: spec.prio,
            donated: None,
            cpu: spec.cpu,
            space: spec.space,
            utcb: Utcb::default(),
            fpu: FpuState::default(),
            op: None,
            incoming: None,
            result: None,
            partner: None,
            queued_on: None,
            gate_use: None,
            senders: Mutex::new(WaitQueue::new()),
            caller: None,
            timeout: None,
            cont: Continuation::Idle,
            pager: spec.pager,
            exc_handler: spec.exc_handler,
            fault: None,
            fault_report: None,
            existence: Arc::new(SwitchLock::new()),
            gate_refs: 0,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn space(&self) -> SpaceId {
        self.space
    }

    pub fn prio(&self) -> Prio {
        self.prio
    }

    /// Priority the actor currently runs at, donated time included.
    pub fn effective_prio(&self) -> Prio {
        self.donated.unwrap_or(self.prio)
    }

    pub fn continuation(&self) -> Continuation {
        self.cont
    }

    pub fn utcb(&self) -> &Utcb {
        &self.utcb
    }

    pub fn is_dead(&self) -> bool {
        self.state.contains(ThreadState::DEAD)
    }

    /// No IPC or nested fault is in progress.
    pub fn is_idle(&self) -> bool {
        self.op.is_none() && self.cont == Continuation::Idle
    }
}

/// Inserts a new actor into the table.
pub(crate) fn create(g: &mut Guard<'_>, env: &Env<'_>, spec: ActorSpec) -> Result<ActorId, KernelError> {
    if !env.smp.is_online(spec.cpu) {
        return Err(KernelError::InvalidCpu);
    }
    let handle = g
        .actors
        .insert_with(|handle| Actor::new(ActorId::from_handle(handle), spec))
        .ok_or(KernelError::OutOfActors)?;
    let id = ActorId::from_handle(handle);
    log_debug!(target: "actor", "created {} on {} prio {}", id, spec.cpu, spec.prio.raw());
    Ok(id)
}

/// Tears `victim` down: every sender queued on it fails with `NotExistent`,
/// its own IPC is aborted and it leaves all queues.
pub(crate) fn destroy(g: &mut Guard<'_>, env: &Env<'_>, victim: ActorId) -> Result<(), KernelError> {
    let lock = match g.actor(victim) {
        Some(actor) if !actor.is_dead() => Arc::clone(&actor.existence),
        _ => return Err(KernelError::NoSuchActor),
    };
    match lock.try_lock(ActorId::KERNEL) {
        TryLock::Acquired | TryLock::AlreadyHeld => {}
        TryLock::Busy(owner) => {
            log_debug!(target: "actor", "destroy {} deferred: held by {}", victim, owner);
            return Err(KernelError::Busy);
        }
        TryLock::Invalid => return Err(KernelError::NoSuchActor),
    }
    let _ = lock.invalidate();

    rendezvous::abandon(g, env, victim);
    if let Some(actor) = g.actor_mut(victim) {
        actor.state = ThreadState::DEAD;
        actor.caller = None;
    }

    let senders = match g.actor(victim) {
        Some(actor) => actor.senders.lock().drain(),
        None => Vec::new(),
    };
    for sender in senders {
        rendezvous::fail_queued(g, env, sender, ErrorCode::NotExistent);
    }

    let waiting: Vec<ActorId> = g
        .actors
        .handles()
        .map(ActorId::from_handle)
        .filter(|&id| {
            g.actor(id).map_or(false, |actor| {
                actor.cont == Continuation::ReceiveWait
                    && actor.state.contains(ThreadState::RECEIVE_WAIT)
                    && actor.op.map_or(false, |op| op.receive() == Some(RecvFrom::Actor(victim)))
            })
        })
        .collect();
    for id in waiting {
        rendezvous::fail_receive_wait(g, env, id, ErrorCode::NotExistent);
    }

    g.sched.purge(victim);
    let _ = lock.wait_free(ActorId::KERNEL, &mut NoDonor);
    release_if_unreferenced(g, victim);
    log_info!(target: "actor", "destroyed {}", victim);
    Ok(())
}

/// Drops a gate binding's reference to `actor`, freeing a dead actor's slot
/// with the last one.
pub(crate) fn drop_gate_ref(g: &mut Guard<'_>, actor: ActorId) {
    if let Some(record) = g.actor_mut(actor) {
        record.gate_refs = record.gate_refs.saturating_sub(1);
    }
    release_if_unreferenced(g, actor);
}

fn release_if_unreferenced(g: &mut Guard<'_>, actor: ActorId) {
    let free = g.actor(actor).map_or(false, |record| record.is_dead() && record.gate_refs == 0);
    if free {
        let _ = g.actors.remove(actor.handle());
        log_debug!(target: "actor", "released slot of {}", actor);
    }
}
