// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: IPC gates: rebindable indirection between a capability and a receiving actor
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + integration scenarios (tests/gates.rs)
//! PUBLIC API: Gate, Binding
//! DEPENDS_ON: sync::rcu (binding publication), sync::switch_lock (control lock), ipc::rendezvous
//! INVARIANTS: readers see the old or the new binding, never a mix; the old destination keeps
//!             its slot reference until the grace period of the rebind is over; a binder is released
//!             only once no send resolved through an older binding is still being carried out;
//!             control operations on one gate are serialized by its switch lock
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! Invoking a bound gate forwards the message to the destination with the
//! gate label or'ed with the invoker's rights. Invoking an unbound gate
//! parks the invoker on the gate until a binding appears. A rebind wakes
//! the parked invokers once right away and once more after the grace period,
//! and moves senders still queued on the old destination through this gate
//! back to the gate so they retry against the new destination.
//!
//! A send resolved through the gate counts as in flight for its binding
//! generation from resolution until it is either queued on the destination
//! or finished. The binder waits for both the RCU grace period and the
//! in-flight count of older generations to drain; senders queued in the
//! meantime are moved once more when the binder is released.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use synapse_abi::{gate_op, proto, Errno, ErrorCode, Fpage, FpageRights, FpageType, IpcErrorWord, MsgTag};

use crate::actor::{self, Continuation, QueueOwner, ThreadState};
use crate::cap::{Capability, KObject, Rights};
use crate::ipc::rendezvous::{self, Progress};
use crate::ipc::trace::TraceEvent;
use crate::ipc::wait_queue::WaitQueue;
use crate::ipc::{GateRef, IpcResult, PendingIpc, SendOutcome};
use crate::kernel::{Env, Guard, KernelError};
use crate::sync::rcu::{GraceTarget, Rcu, RcuCell, RetireList};
use crate::sync::switch_lock::{Donate, Donation, LockStatus, SwitchLock, TryLock};
use crate::types::{ActorId, CpuId, GateId};

/// Destination and label of a gate, published as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub dest: Option<ActorId>,
    pub label: u64,
    /// Bumped by every bind, rebind and destroy.
    pub generation: u64,
}

impl Binding {
    const fn unbound(generation: u64) -> Self {
        Self { dest: None, label: 0, generation }
    }
}

pub struct Gate {
    pub(crate) id: GateId,
    pub(crate) binding: RcuCell<Binding>,
    pub(crate) retired: RetireList<Binding>,
    /// Invokers parked while the gate is unbound.
    pub(crate) waiters: Mutex<WaitQueue>,
    /// Control callers parked behind the control lock.
    pub(crate) lock_waiters: WaitQueue,
    pub(crate) lock: Arc<SwitchLock>,
    pub(crate) alive: bool,
    pub(crate) generation: u64,
    /// Sends being carried through the gate, per binding generation.
    pub(crate) in_flight: BTreeMap<u64, usize>,
}

impl Gate {
    fn new(id: GateId) -> Self {
        Self {
            id,
            binding: RcuCell::new(Binding::unbound(0)),
            retired: RetireList::default(),
            waiters: Mutex::new(WaitQueue::new()),
            lock_waiters: WaitQueue::new(),
            lock: Arc::new(SwitchLock::new()),
            alive: true,
            generation: 0,
            in_flight: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> GateId {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// No send resolved through a binding older than the current one is in flight.
    pub fn drained(&self) -> bool {
        self.in_flight.range(..self.generation).next().is_none()
    }

    /// Binding as seen by a reader on `cpu`.
    pub fn current(&self, rcu: &Rcu, cpu: CpuId) -> Binding {
        let guard = rcu.read_lock(cpu);
        *self.binding.read(&guard)
    }
}

pub(crate) fn create(g: &mut Guard<'_>) -> Result<GateId, KernelError> {
    let handle = g
        .gates
        .insert_with(|handle| Gate::new(GateId::from_handle(handle)))
        .ok_or(KernelError::OutOfGates)?;
    let id = GateId::from_handle(handle);
    log_debug!(target: "gate", "created {}", id);
    Ok(id)
}

/// Severs the binding and fails every parked invoker with `NotExistent`.
pub(crate) fn destroy(g: &mut Guard<'_>, env: &Env<'_>, id: GateId) -> Result<(), KernelError> {
    let gate = g.gate_mut(id).filter(|gate| gate.alive).ok_or(KernelError::NoSuchGate)?;
    gate.alive = false;
    let _ = gate.lock.invalidate();
    gate.generation += 1;
    let old = gate.binding.replace(Binding::unbound(gate.generation));
    gate.retired.push(env.rcu.start_grace(), old);
    let waiters = gate.waiters.lock().drain();
    let lock_waiters = gate.lock_waiters.drain();

    for waiter in waiters {
        rendezvous::fail_queued(g, env, waiter, ErrorCode::NotExistent);
    }
    for waiter in lock_waiters {
        rendezvous::set_outcome(g, waiter, SendOutcome::Failed(ErrorCode::NotExistent));
        rendezvous::wake(g, env, waiter);
    }
    g.dying_gates.push(id);
    log_info!(target: "gate", "destroyed {}", id);
    Ok(())
}

// ——— invocation ———

/// Forwards `op` through the gate, or parks the invoker if it is unbound.
pub(crate) fn invoke(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId, op: PendingIpc) -> Progress {
    let binding = g.gate(id).filter(|gate| gate.alive).map(|gate| gate.current(env.rcu, env.cpu));
    let Some(binding) = binding else {
        rendezvous::start(g, me, op);
        rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
        return Progress::Done;
    };
    let label = binding.label | u64::from(Rights::from_fpage(op.rights).bits());
    g.trace.record(TraceEvent::GateInvoke { gate: id, actor: me, label });
    let via = GateRef { gate: id, generation: binding.generation };
    match binding.dest {
        Some(dest) => {
            enter(g, me, via);
            rendezvous::do_ipc(g, env, me, op.sending_to(Some(dest)).with_label(label).through_gate(via))
        }
        None => park(g, env, me, id, op.through_gate(via)),
    }
}

/// Counts the send of `me` as in flight through `via`.
pub(crate) fn enter(g: &mut Guard<'_>, me: ActorId, via: GateRef) {
    leave(g, me);
    if let Some(gate) = g.gate_mut(via.gate) {
        *gate.in_flight.entry(via.generation).or_insert(0) += 1;
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.gate_use = Some(via);
    }
}

/// The send of `me` got queued or finished; it no longer uses its binding.
pub(crate) fn leave(g: &mut Guard<'_>, me: ActorId) {
    let Some(via) = g.actor_mut(me).and_then(|actor| actor.gate_use.take()) else {
        return;
    };
    let Some(gate) = g.gate_mut(via.gate) else {
        return;
    };
    if let Some(count) = gate.in_flight.get_mut(&via.generation) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            gate.in_flight.remove(&via.generation);
        }
    }
}

fn park(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId, op: PendingIpc) -> Progress {
    rendezvous::start(g, me, op);
    if op.timeouts.snd.is_zero() {
        rendezvous::fail_send(g, env, me, ErrorCode::Timeout);
        return Progress::Done;
    }
    rendezvous::arm_timeout(g, env, me, op.timeouts.snd);
    wait_for_binding(g, me, id)
}

fn wait_for_binding(g: &mut Guard<'_>, me: ActorId, id: GateId) -> Progress {
    let Some(prio) = g.actor(me).map(|actor| actor.effective_prio()) else {
        return Progress::Done;
    };
    if let Some(gate) = g.gate(id) {
        gate.waiters.lock().enqueue(me, prio);
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.queued_on = Some(QueueOwner::Gate(id));
        actor.state.insert(ThreadState::SEND_WAIT);
    }
    rendezvous::block(g, me, Continuation::GateWait(id));
    log_trace!(target: "gate", "{} parked on unbound {}", me, id);
    Progress::Blocked
}

/// Resolves a send set aside during a fault against the current binding,
/// parking it again while the gate is unbound.
pub(crate) fn rejoin(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId) {
    let bound = g.gate(id).filter(|gate| gate.alive).map(|gate| gate.current(env.rcu, env.cpu).dest.is_some());
    match bound {
        Some(true) => resume_invoke(g, env, me, id),
        Some(false) => {
            let _ = wait_for_binding(g, me, id);
        }
        None => rendezvous::fail_send(g, env, me, ErrorCode::NotExistent),
    }
}

/// A parked invoker woke up: re-resolve the binding.
pub(crate) fn resume_invoke(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId) {
    let Some((op, queued)) = g.actor(me).and_then(|actor| actor.op.map(|op| (op, actor.queued_on.is_some()))) else {
        return;
    };
    if let SendOutcome::Failed(code) = op.outcome {
        rendezvous::fail_send(g, env, me, code);
        return;
    }
    if queued {
        return;
    }
    let binding = g.gate(id).filter(|gate| gate.alive).map(|gate| gate.current(env.rcu, env.cpu));
    let Some((dest, binding)) = binding.and_then(|b| b.dest.map(|dest| (dest, b))) else {
        rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
        return;
    };
    let label = binding.label | u64::from(Rights::from_fpage(op.rights).bits());
    g.trace.record(TraceEvent::GateInvoke { gate: id, actor: me, label });
    let via = GateRef { gate: id, generation: binding.generation };
    if let Some(actor) = g.actor_mut(me) {
        actor.cont = Continuation::Idle;
        actor.state.insert(ThreadState::READY);
        actor.partner = Some(dest);
        if let Some(pending) = actor.op.as_mut() {
            pending.send_to = Some(dest);
            pending.label = label;
            pending.via_gate = Some(via);
        }
    }
    enter(g, me, via);
    let _ = rendezvous::send_phase(g, env, me);
}

/// Wakes every parked invoker so it re-resolves the binding.
fn unblock_all(g: &mut Guard<'_>, env: &Env<'_>, id: GateId) {
    let waiters = match g.gate(id) {
        Some(gate) => gate.waiters.lock().drain(),
        None => return,
    };
    for waiter in waiters {
        g.disarm_timeout(waiter);
        if let Some(actor) = g.actor_mut(waiter) {
            actor.queued_on = None;
            actor.state.remove(ThreadState::SEND_WAIT);
            actor.state.insert(ThreadState::READY);
        }
        rendezvous::wake(g, env, waiter);
    }
}

/// Moves senders that reached `old_dest` through an older binding of this
/// gate back onto the gate.
fn migrate_stale(g: &mut Guard<'_>, id: GateId, old_dest: ActorId, generation: u64) {
    let stale: Vec<ActorId> = match g.actor(old_dest) {
        Some(rcv) => rcv
            .senders
            .lock()
            .iter()
            .filter(|&sender| {
                g.actor(sender).and_then(|actor| actor.op).map_or(false, |op| {
                    op.outcome == SendOutcome::Pending
                        && op.via_gate.map_or(false, |via| via.gate == id && via.generation != generation)
                })
            })
            .collect(),
        None => return,
    };
    for sender in stale {
        let Some(prio) = g.actor(sender).map(|actor| actor.effective_prio()) else {
            continue;
        };
        if let Some(rcv) = g.actor(old_dest) {
            let _ = rcv.senders.lock().remove(sender);
        }
        if let Some(gate) = g.gate(id) {
            gate.waiters.lock().enqueue(sender, prio);
        }
        if let Some(actor) = g.actor_mut(sender) {
            actor.queued_on = Some(QueueOwner::Gate(id));
            actor.cont = Continuation::GateWait(id);
        }
        log_debug!(target: "gate", "{} moved off {} to retry through {}", sender, old_dest, id);
    }
}

// ——— control protocol ———

/// Entry of a `KOBJECT` message sent to a gate.
pub(crate) fn control(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId, op: PendingIpc) -> Progress {
    rendezvous::start(g, me, op);
    run_control(g, env, me, id)
}

fn run_control(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId) -> Progress {
    let Some((op, opcode)) = g.actor(me).and_then(|actor| actor.op.map(|op| (op, actor.utcb.values[0]))) else {
        return Progress::Done;
    };
    if !g.gate(id).map_or(false, |gate| gate.alive) {
        rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
        return Progress::Done;
    }
    if op.tag.proto() != proto::KOBJECT {
        return reply_errno(g, env, me, Errno::BadProto);
    }
    if op.tag.words() < 1 {
        return reply_errno(g, env, me, Errno::Inval);
    }
    match opcode {
        gate_op::BIND => bind(g, env, me, id, op, false),
        gate_op::REBIND => bind(g, env, me, id, op, true),
        gate_op::GET_INFO => {
            let label = g.gate(id).map_or(0, |gate| gate.current(env.rcu, env.cpu).label);
            if let Some(actor) = g.actor_mut(me) {
                actor.utcb.values[0] = label;
            }
            reply(g, env, me, MsgTag::result(0, 1));
            Progress::Done
        }
        _ => reply_errno(g, env, me, Errno::NoSys),
    }
}

fn reply(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, tag: MsgTag) {
    rendezvous::complete(g, env, me, IpcResult { tag, label: 0, error: IpcErrorWord::NONE });
}

fn reply_errno(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, errno: Errno) -> Progress {
    reply(g, env, me, MsgTag::result(errno.reply_label(), 0));
    Progress::Done
}

/// Runs the owner of the control lock if its grace period is over.
struct GateDonor<'a, 'g, 'k> {
    g: &'a mut Guard<'g>,
    env: &'a Env<'k>,
}

impl Donate for GateDonor<'_, '_, '_> {
    fn donate(&mut self, _helper: ActorId, owner: ActorId) -> Donation {
        let ready = match self.g.actor(owner).map(|actor| actor.cont) {
            Some(Continuation::GraceWait { gate, target, .. }) => quiescent(self.g, self.env, gate, target),
            _ => false,
        };
        if !ready {
            return Donation::Parked;
        }
        resume_grace(self.g, self.env, owner);
        Donation::Ran
    }
}

fn bind(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId, op: PendingIpc, rebind: bool) -> Progress {
    let words = op.tag.words();
    if words < 2 || op.tag.items() < 1 || words + 1 >= synapse_abi::UTCB_MAX_WORDS {
        return reply_errno(g, env, me, Errno::Inval);
    }
    let Some((space, prio, label, fpage)) = g
        .actor(me)
        .map(|actor| (actor.space, actor.prio, actor.utcb.values[1], Fpage::from_raw(actor.utcb.values[words + 1])))
    else {
        return Progress::Done;
    };
    if fpage.ty() != FpageType::Obj {
        rendezvous::fail_send(g, env, me, ErrorCode::Overflow);
        return Progress::Done;
    }
    let dest = match env.mapper.lookup(space, fpage.index()) {
        Some(Capability { object: KObject::Thread(dest), rights }) => {
            if !(rights & Rights::from_fpage(fpage.rights())).contains(Rights::S) {
                return reply_errno(g, env, me, Errno::Perm);
            }
            dest
        }
        _ => return reply_errno(g, env, me, Errno::Inval),
    };

    let Some(lock) = g.gate(id).map(|gate| Arc::clone(&gate.lock)) else {
        return Progress::Done;
    };
    let status = lock.lock(me, &mut GateDonor { g: &mut *g, env });
    match status {
        LockStatus::Acquired | LockStatus::AlreadyHeld => {}
        LockStatus::Helping(owner) => {
            if let Some(gate) = g.gate_mut(id) {
                gate.lock_waiters.enqueue(me, prio);
            }
            rendezvous::block(g, me, Continuation::LockWait(id));
            log_debug!(target: "gate", "{} waits for {} to finish binding {}", me, owner, id);
            return Progress::Blocked;
        }
        LockStatus::Invalid => {
            rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
            return Progress::Done;
        }
    }

    let current = g.gate(id).map(|gate| gate.current(env.rcu, env.cpu));
    if !rebind && current.map_or(false, |b| b.dest.is_some()) {
        release_lock(g, env, id, me);
        return reply_errno(g, env, me, Errno::Busy);
    }
    if !pin_destination(g, me, dest) {
        release_lock(g, env, id, me);
        return reply_errno(g, env, me, Errno::Inval);
    }

    let Some(gate) = g.gate_mut(id) else {
        return Progress::Done;
    };
    gate.generation += 1;
    let generation = gate.generation;
    let old = gate.binding.replace(Binding { dest: Some(dest), label, generation });
    let old_dest = old.get().dest;
    let target = env.rcu.start_grace();
    gate.retired.push(target, old);
    log_info!(
        target: "gate",
        "{} {} to {} label {:#x}",
        id,
        if rebind { "rebound" } else { "bound" },
        dest,
        label
    );

    if let Some(old_dest) = old_dest.filter(|&old_dest| old_dest != dest) {
        migrate_stale(g, id, old_dest, generation);
    }
    unblock_all(g, env, id);

    if quiescent(g, env, id, target) {
        finish_bind(g, env, me, id, old_dest);
        return Progress::Done;
    }
    if env.rcu.grace_complete(target) {
        log_debug!(target: "gate", "{} waits for senders still carried through {}", me, id);
    }
    g.grace_waiters.push(me);
    rendezvous::block(g, me, Continuation::GraceWait { gate: id, target, old_dest });
    Progress::Blocked
}

/// Takes a slot reference on the new destination. Fails for dying actors.
fn pin_destination(g: &mut Guard<'_>, me: ActorId, dest: ActorId) -> bool {
    let Some(existence) = g.actor(dest).filter(|actor| !actor.is_dead()).map(|actor| Arc::clone(&actor.existence))
    else {
        return false;
    };
    let acquired = match existence.try_lock(me) {
        TryLock::Acquired => true,
        TryLock::AlreadyHeld => false,
        _ => return false,
    };
    if let Some(actor) = g.actor_mut(dest) {
        actor.gate_refs += 1;
    }
    if acquired {
        let _ = existence.unlock(me);
    }
    true
}

/// Grace period over and no send through an older binding in flight.
fn quiescent(g: &Guard<'_>, env: &Env<'_>, id: GateId, target: GraceTarget) -> bool {
    env.rcu.grace_complete(target) && g.gate(id).map_or(true, Gate::drained)
}

fn finish_bind(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId, old_dest: Option<ActorId>) {
    let current = g.gate(id).map(|gate| (gate.current(env.rcu, env.cpu).dest, gate.generation));
    if let (Some(old_dest), Some((dest, generation))) = (old_dest, current) {
        if dest != Some(old_dest) {
            migrate_stale(g, id, old_dest, generation);
        }
    }
    unblock_all(g, env, id);
    reclaim(g, env, id);
    release_lock(g, env, id, me);
    reply(g, env, me, MsgTag::result(0, 0));
}

/// Drops retired bindings whose grace period is over.
fn reclaim(g: &mut Guard<'_>, env: &Env<'_>, id: GateId) {
    let freed = match g.gate_mut(id) {
        Some(gate) => gate.retired.reclaim(env.rcu),
        None => return,
    };
    for binding in freed {
        if let Some(dest) = binding.dest {
            actor::drop_gate_ref(g, dest);
        }
    }
}

fn release_lock(g: &mut Guard<'_>, env: &Env<'_>, id: GateId, me: ActorId) {
    let Some(gate) = g.gate_mut(id) else {
        return;
    };
    let helper = gate.lock.unlock(me);
    let waiters = gate.lock_waiters.drain();
    if let Some(helper) = helper {
        log_trace!(target: "gate", "{} hands {} back to {}", me, id, helper);
    }
    for waiter in waiters {
        rendezvous::wake(g, env, waiter);
    }
}

/// A binder woke up: finish once its grace period is over.
pub(crate) fn resume_grace(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(Continuation::GraceWait { gate, target, old_dest }) = g.actor(me).map(|actor| actor.cont) else {
        return;
    };
    if !quiescent(g, env, gate, target) {
        return;
    }
    g.grace_waiters.retain(|&waiter| waiter != me);
    if let Some(actor) = g.actor_mut(me) {
        actor.cont = Continuation::Idle;
        actor.state.insert(ThreadState::READY);
    }
    finish_bind(g, env, me, gate, old_dest);
}

/// A control caller parked behind the lock woke up: retry or fail.
pub(crate) fn resume_lock_wait(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId) {
    if let Some(SendOutcome::Failed(code)) = rendezvous::outcome_of(g, me) {
        rendezvous::fail_send(g, env, me, code);
        return;
    }
    if g.gate(id).map_or(false, |gate| gate.lock_waiters.contains(me)) {
        return;
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.cont = Continuation::Idle;
        actor.state.insert(ThreadState::READY);
    }
    let _ = run_control(g, env, me, id);
}

pub(crate) fn leave_lock_queue(g: &mut Guard<'_>, id: GateId, me: ActorId) {
    if let Some(gate) = g.gate_mut(id) {
        let _ = gate.lock_waiters.remove(me);
    }
}

/// A binder died while waiting for its grace period.
pub(crate) fn abandon_grace(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, id: GateId) {
    g.grace_waiters.retain(|&waiter| waiter != me);
    unblock_all(g, env, id);
    reclaim(g, env, id);
    release_lock(g, env, id, me);
}

/// Completes binders whose grace period ended and reclaims idle retired
/// bindings. Returns true when some binder finished.
pub(crate) fn poll_grace(g: &mut Guard<'_>, env: &Env<'_>) -> bool {
    let state: &Guard<'_> = g;
    let ready: Vec<ActorId> = state
        .grace_waiters
        .iter()
        .copied()
        .filter(|&waiter| match state.actor(waiter).map(|actor| actor.cont) {
            Some(Continuation::GraceWait { gate, target, .. }) => quiescent(state, env, gate, target),
            _ => false,
        })
        .collect();
    for waiter in &ready {
        resume_grace(g, env, *waiter);
    }
    sweep(g, env);
    !ready.is_empty()
}

fn sweep(g: &mut Guard<'_>, env: &Env<'_>) {
    let idle: Vec<GateId> = g
        .gates
        .handles()
        .map(GateId::from_handle)
        .filter(|&id| g.gate(id).map_or(false, |gate| !gate.retired.is_empty() && gate.lock.owner().is_none()))
        .collect();
    for id in idle {
        reclaim(g, env, id);
    }

    let dying = core::mem::take(&mut g.dying_gates);
    for id in dying {
        let done = g.gate(id).map_or(true, |gate| gate.retired.is_empty() && gate.lock.owner().is_none());
        if done {
            let _ = g.gates.remove(id.handle());
            log_debug!(target: "gate", "released {}", id);
        } else {
            g.dying_gates.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorSpec;
    use crate::config::KernelConfig;
    use crate::hal::ManualClock;
    use crate::ipc::IpcStatus;
    use crate::kernel::Kernel;
    use crate::mm::MapDb;
    use crate::syscall::SyscallFrame;
    use crate::types::SpaceId;
    use synapse_abi::{IpcOps, MsgItem, MsgTagFlags, ObjRef, Timeout, TimeoutPair};

    const SPACE: SpaceId = SpaceId::from_raw(1);

    struct Fixture {
        k: Kernel<MapDb, ManualClock>,
        owner: ActorId,
        gate: GateId,
        gate_cap: u64,
    }

    fn fixture() -> Fixture {
        let k = Kernel::new(KernelConfig::default(), MapDb::new(), ManualClock::new());
        let owner = k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let gate = k.create_gate().unwrap();
        let gate_cap = k.mapper().grant(SPACE, Capability { object: KObject::Gate(gate), rights: Rights::all() }).unwrap();
        Fixture { k, owner, gate, gate_cap }
    }

    fn thread_cap(f: &Fixture, target: ActorId, rights: Rights) -> u64 {
        f.k.mapper().grant(SPACE, Capability { object: KObject::Thread(target), rights }).unwrap()
    }

    fn control(f: &Fixture, opcode: u64, label: u64, thread_slot: u64) -> IpcResult {
        f.k.with_utcb(f.owner, |u| {
            u.values[0] = opcode;
            u.values[1] = label;
            u.set_item(2, 0, MsgItem::map(0), Fpage::obj(thread_slot, 0, FpageRights::RWX));
        })
        .unwrap();
        let tag = MsgTag::new(2, 1, MsgTagFlags::empty(), proto::KOBJECT);
        let frame = SyscallFrame::new(tag, ObjRef::new(f.gate_cap, IpcOps::CALL), TimeoutPair::NEVER);
        f.k.invoke(f.owner, frame).unwrap().completed().unwrap()
    }

    #[test]
    fn bind_twice_is_busy_rebind_replaces() {
        let f = fixture();
        let a = f.k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let b = f.k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let cap_a = thread_cap(&f, a, Rights::all());
        let cap_b = thread_cap(&f, b, Rights::all());

        assert_eq!(control(&f, gate_op::BIND, 0x100, cap_a).tag.label(), 0);
        assert_eq!(f.k.gate_binding(f.gate), Some((Some(a), 0x100)));
        assert_eq!(control(&f, gate_op::BIND, 0x200, cap_b).tag.label(), Errno::Busy.reply_label());
        assert_eq!(control(&f, gate_op::REBIND, 0x200, cap_b).tag.label(), 0);
        assert_eq!(f.k.gate_binding(f.gate), Some((Some(b), 0x200)));
    }

    #[test]
    fn bind_needs_the_special_right() {
        let f = fixture();
        let a = f.k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let weak = thread_cap(&f, a, Rights::R | Rights::W);
        assert_eq!(control(&f, gate_op::BIND, 1, weak).tag.label(), Errno::Perm.reply_label());
        assert_eq!(f.k.gate_binding(f.gate), Some((None, 0)));
    }

    #[test]
    fn get_info_returns_the_label() {
        let f = fixture();
        let a = f.k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let cap_a = thread_cap(&f, a, Rights::all());
        let _ = control(&f, gate_op::BIND, 0x770, cap_a);
        let info = control(&f, gate_op::GET_INFO, 0, 0);
        assert_eq!(info.tag.words(), 1);
        assert_eq!(f.k.with_utcb(f.owner, |u| u.values[0]).unwrap(), 0x770);
        assert_eq!(control(&f, 0x99, 0, 0).tag.label(), Errno::NoSys.reply_label());
    }

    #[test]
    fn zero_timeout_on_unbound_gate_times_out() {
        let f = fixture();
        let tag = MsgTag::new(0, 0, MsgTagFlags::empty(), 0);
        let frame = SyscallFrame::new(tag, ObjRef::new(f.gate_cap, IpcOps::SEND), TimeoutPair::new(Timeout::ZERO, Timeout::NEVER));
        let result = f.k.invoke(f.owner, frame).unwrap().completed().unwrap();
        assert_eq!(result.code(), Some(ErrorCode::Timeout));
        assert_eq!(f.k.gate_waiters(f.gate), 0);
    }

    #[test]
    fn destroy_fails_parked_invokers() {
        let f = fixture();
        let tag = MsgTag::new(0, 0, MsgTagFlags::empty(), 0);
        let frame = SyscallFrame::new(tag, ObjRef::new(f.gate_cap, IpcOps::SEND), TimeoutPair::NEVER);
        assert_eq!(f.k.invoke(f.owner, frame), Ok(IpcStatus::Blocked));
        assert_eq!(f.k.gate_waiters(f.gate), 1);
        f.k.destroy_gate(f.gate).unwrap();
        assert_eq!(f.k.take_result(f.owner).unwrap().code(), Some(ErrorCode::NotExistent));
        assert_eq!(f.k.gate_count(), 0);
        assert_eq!(f.k.destroy_gate(f.gate), Err(KernelError::NoSuchGate));
    }
}
