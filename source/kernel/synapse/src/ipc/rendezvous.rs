// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Rendezvous state machine (do_ipc): send phase, receive phase, wake-ups, timeouts, cancel
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + integration scenarios (tests/rendezvous.rs)
//! PUBLIC API: crate-internal (do_ipc, resume, expire_timeout, cancel_local)
//! DEPENDS_ON: ipc::transfer, ipc::remote (cross-CPU handshake), sched, kernel::{Env, Guard}
//! INVARIANTS: a sender is either queued (queued_on set) or claimed (TRANSFER), never both;
//!             whichever of claim and timeout runs first under the big lock wins;
//!             CANCEL overrides TIMEOUT at every wake point
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! A blocked actor records a [`Continuation`] and leaves; whoever changes
//! its fate (claim, timeout, cancel, remote reply) updates the pending
//! operation and wakes it. [`resume`] then finishes the phase it was
//! blocked in. Results are published into `Actor::result`.

use synapse_abi::{Deadline, ErrorCode, IpcErrorWord, Phase, Timeout};

use crate::actor::{Continuation, QueueOwner, ThreadState};
use crate::ipc::trace::TraceEvent;
use crate::ipc::{fault, gate, transfer, IpcPurpose, IpcResult, PendingIpc, RecvFrom, SendOutcome};
use crate::kernel::{Env, Guard};
use crate::smp::Drq;
use crate::types::ActorId;

/// Whether the calling actor can continue or is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Done,
    Blocked,
}

/// Outcome of the check-and-claim step on the receiver's CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Check {
    /// Receiver waits for this sender.
    Ok,
    /// Sender was enqueued on the receiver.
    Queued,
    Failed(ErrorCode),
}

// ——— bookkeeping helpers ———

pub(crate) fn arm_timeout(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, timeout: Timeout) {
    if let Deadline::At(deadline) = timeout.deadline(env.now_us()) {
        g.arm_timeout(me, deadline);
    }
}

/// Re-arms a deadline saved earlier if `me` waits again in the same phase.
pub(crate) fn rearm(g: &mut Guard<'_>, me: ActorId, deadline: Option<u64>, receiving: bool) {
    let same_phase = match g.actor(me).map(|a| a.cont) {
        Some(Continuation::ReceiveWait) => receiving,
        Some(Continuation::SendWait | Continuation::GateWait(_)) => !receiving,
        _ => false,
    };
    if !same_phase {
        return;
    }
    g.disarm_timeout(me);
    if let Some(deadline) = deadline {
        g.arm_timeout(me, deadline);
    }
}

/// Makes `actor` runnable: locally through the scheduler, otherwise by a
/// remote activation on its home CPU.
pub(crate) fn wake(g: &mut Guard<'_>, env: &Env<'_>, actor: ActorId) {
    let Some((cpu, prio)) = g.actor(actor).filter(|a| !a.is_dead()).map(|a| (a.cpu, a.prio)) else {
        return;
    };
    if cpu == env.cpu {
        let running = g.running_prio(cpu);
        let _ = g.sched.deblock(cpu, actor, prio, running);
    } else {
        let _ = env.smp.post(cpu, Drq::Activate { actor });
    }
}

pub(crate) fn block(g: &mut Guard<'_>, me: ActorId, cont: Continuation) {
    let Some(actor) = g.actor_mut(me) else {
        return;
    };
    actor.cont = cont;
    actor.state.remove(ThreadState::READY);
    actor.donated = None;
    let cpu = actor.cpu;
    g.sched.block(cpu, me);
}

pub(crate) fn set_outcome(g: &mut Guard<'_>, me: ActorId, outcome: SendOutcome) {
    if let Some(op) = g.actor_mut(me).and_then(|a| a.op.as_mut()) {
        op.outcome = outcome;
    }
}

pub(crate) fn outcome_of(g: &Guard<'_>, me: ActorId) -> Option<SendOutcome> {
    g.actor(me).and_then(|a| a.op).map(|op| op.outcome)
}

/// Removes `me` from whatever wait queue it sits in.
pub(crate) fn abort_queued(g: &mut Guard<'_>, me: ActorId) {
    let owner = match g.actor_mut(me) {
        Some(actor) => {
            actor.state.remove(ThreadState::SEND_WAIT);
            actor.queued_on.take()
        }
        None => None,
    };
    match owner {
        Some(QueueOwner::Actor(receiver)) => {
            if let Some(rcv) = g.actor(receiver) {
                let _ = rcv.senders.lock().remove(me);
            }
        }
        Some(QueueOwner::Gate(gate)) => {
            if let Some(gate) = g.gate(gate) {
                let _ = gate.waiters.lock().remove(me);
            }
        }
        None => {}
    }
}

// ——— completion ———

/// Publishes `result` and returns `me` to the idle state.
pub(crate) fn complete(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, result: IpcResult) {
    g.disarm_timeout(me);
    gate::leave(g, me);
    let Some(actor) = g.actor_mut(me) else {
        return;
    };
    actor.state.remove(ThreadState::FULL_IPC | ThreadState::ABORT_MASK);
    actor.state.insert(ThreadState::READY);
    actor.cont = Continuation::Idle;
    actor.queued_on = None;
    actor.incoming = None;
    actor.result = Some(result);
    let op = actor.op.take();
    if let Some(op) = op {
        if op.purpose != IpcPurpose::User {
            fault::conclude(g, env, me, op.purpose, result);
        }
    }
}

pub(crate) fn fail_send(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, code: ErrorCode) {
    let error = IpcErrorWord::new(code, Phase::Send);
    if let Some(actor) = g.actor_mut(me) {
        actor.utcb.error = error;
    }
    log_trace!(target: "ipc", "{} send failed: {:?}", me, code);
    complete(g, env, me, IpcResult::failed(error));
}

pub(crate) fn fail_receive(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, code: ErrorCode) {
    let error = IpcErrorWord::new(code, Phase::Receive);
    if let Some(actor) = g.actor_mut(me) {
        actor.utcb.error = error;
    }
    log_trace!(target: "ipc", "{} receive failed: {:?}", me, code);
    complete(g, env, me, IpcResult::failed(error));
}

fn finish_send(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(op) = g.actor(me).and_then(|a| a.op) else {
        return;
    };
    let result = IpcResult { tag: op.tag.with_error(false), label: 0, error: IpcErrorWord::NONE };
    complete(g, env, me, result);
}

fn finish_receive(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some((incoming, error)) = g.actor_mut(me).and_then(|a| a.incoming.take().map(|inc| (inc, a.utcb.error)))
    else {
        return;
    };
    g.trace.record(TraceEvent::Receive { actor: me, from: incoming.from });
    let result = IpcResult { tag: incoming.tag.with_error(!error.is_ok()), label: incoming.label, error };
    complete(g, env, me, result);
}

// ——— entry ———

/// Resets the per-IPC state of `me` and installs `op`.
pub(crate) fn start(g: &mut Guard<'_>, me: ActorId, op: PendingIpc) {
    if let Some(actor) = g.actor_mut(me) {
        actor.utcb.error = IpcErrorWord::NONE;
        actor.incoming = None;
        actor.result = None;
        actor.state.remove(ThreadState::ABORT_MASK | ThreadState::FULL_IPC);
        actor.state.insert(ThreadState::READY);
        actor.partner = op.send_to;
        actor.op = Some(op);
    }
}

/// Runs one IPC for `me`: send phase, then receive phase.
pub(crate) fn do_ipc(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, op: PendingIpc) -> Progress {
    start(g, me, op);
    if op.send_to.is_some() {
        send_phase(g, env, me)
    } else if op.recv.is_some() {
        receive_phase(g, env, me)
    } else {
        finish_send(g, env, me);
        Progress::Done
    }
}

/// Whether `receiver` is waiting for exactly this `sender` right now.
fn receiver_ready(g: &Guard<'_>, receiver: ActorId, sender: ActorId) -> bool {
    g.actor(receiver).map_or(false, |rcv| {
        rcv.state.contains(ThreadState::RECEIVE_WAIT)
            && !rcv.state.contains(ThreadState::TRANSFER)
            && rcv.op.map_or(false, |op| op.accepts(sender))
    })
}

/// Check-and-claim step, executed on the receiver's CPU. On `Queued`
/// the sender is enqueued by priority on the receiver.
pub(crate) fn check_sender(g: &mut Guard<'_>, sender: ActorId, receiver: ActorId, may_queue: bool) -> Check {
    if !g.alive(receiver) {
        return Check::Failed(ErrorCode::NotExistent);
    }
    if receiver_ready(g, receiver, sender) {
        return Check::Ok;
    }
    if !may_queue {
        return Check::Failed(ErrorCode::Timeout);
    }
    let Some(prio) = g.actor(sender).map(|a| a.effective_prio()) else {
        return Check::Failed(ErrorCode::Aborted);
    };
    gate::leave(g, sender);
    if let Some(rcv) = g.actor(receiver) {
        rcv.senders.lock().enqueue(sender, prio);
    }
    if let Some(snd) = g.actor_mut(sender) {
        snd.queued_on = Some(QueueOwner::Actor(receiver));
        snd.state.insert(ThreadState::SEND_WAIT);
        if let Some(op) = snd.op.as_mut() {
            op.outcome = SendOutcome::Pending;
        }
    }
    Check::Queued
}

/// Reserves a waiting receiver for a transfer.
pub(crate) fn handshake_receiver(g: &mut Guard<'_>, receiver: ActorId) {
    g.disarm_timeout(receiver);
    if let Some(rcv) = g.actor_mut(receiver) {
        rcv.state.remove(ThreadState::RECEIVE_WAIT);
        rcv.state.insert(ThreadState::TRANSFER);
    }
}

/// Ends a receiver's reservation.
pub(crate) fn release_receiver(g: &mut Guard<'_>, receiver: ActorId) {
    if let Some(rcv) = g.actor_mut(receiver) {
        rcv.state.remove(ThreadState::TRANSFER);
        rcv.state.insert(ThreadState::READY);
    }
}

/// Aborts a reserved receiver whose sender went away.
pub(crate) fn release_claimed(g: &mut Guard<'_>, env: &Env<'_>, receiver: ActorId, code: ErrorCode) {
    if !g.actor(receiver).map_or(false, |rcv| rcv.state.contains(ThreadState::TRANSFER)) {
        return;
    }
    release_receiver(g, receiver);
    fail_receive(g, env, receiver, code);
    wake(g, env, receiver);
}

pub(crate) fn send_phase(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) -> Progress {
    let Some(op) = g.actor(me).and_then(|a| a.op) else {
        return Progress::Done;
    };
    let Some(dest) = op.send_to else {
        return receive_phase(g, env, me);
    };
    let dest_cpu = match g.actor(dest) {
        Some(rcv) if !rcv.is_dead() => rcv.cpu,
        _ => {
            fail_send(g, env, me, ErrorCode::NotExistent);
            return Progress::Done;
        }
    };

    if dest_cpu != env.cpu {
        if let Some(actor) = g.actor_mut(me) {
            actor.state.insert(ThreadState::SEND_WAIT);
        }
        block(g, me, Continuation::RemoteHandshake);
        if !env.smp.post(dest_cpu, Drq::IpcSend { sender: me, receiver: dest }) {
            fail_send(g, env, me, ErrorCode::NotExistent);
            return Progress::Done;
        }
        return Progress::Blocked;
    }

    match check_sender(g, me, dest, !op.timeouts.snd.is_zero()) {
        Check::Failed(code) => {
            fail_send(g, env, me, code);
            Progress::Done
        }
        Check::Queued => {
            arm_timeout(g, env, me, op.timeouts.snd);
            block(g, me, Continuation::SendWait);
            Progress::Blocked
        }
        Check::Ok => {
            handshake_receiver(g, dest);
            deliver(g, env, me, dest)
        }
    }
}

/// Transfers into a reserved receiver and continues with the receive phase.
pub(crate) fn deliver(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, dest: ActorId) -> Progress {
    let result = transfer::transfer(g, env, me, dest);
    gate::leave(g, me);
    release_receiver(g, dest);
    if let Err(code) = result {
        wake(g, env, dest);
        fail_send(g, env, me, code);
        return Progress::Done;
    }
    set_outcome(g, me, SendOutcome::Delivered);
    activate_partner(g, env, me, dest);
    after_send(g, env, me)
}

/// Lets the freshly served partner run: directly on our time when we are
/// about to wait for it (or already run on donated time), otherwise
/// through the scheduler.
fn activate_partner(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, partner: ActorId) {
    let Some((partner_cpu, partner_alive)) = g.actor(partner).map(|p| (p.cpu, !p.is_dead())) else {
        return;
    };
    if !partner_alive {
        return;
    }
    if partner_cpu != env.cpu {
        let _ = env.smp.post(partner_cpu, Drq::Activate { actor: partner });
        return;
    }
    let Some(actor) = g.actor(me) else {
        return;
    };
    let Some(op) = actor.op else {
        return;
    };
    let closed_on_partner = op.receive() == Some(RecvFrom::Actor(partner));
    let next_sender_waits = op.receive() == Some(RecvFrom::Any) && !actor.senders.lock().is_empty();
    let direct = env.config.direct_switch
        && op.tag.do_switch()
        && (closed_on_partner || actor.donated.is_some())
        && !next_sender_waits;
    if direct {
        let prio = actor.effective_prio();
        if let Some(target) = g.actor_mut(partner) {
            target.donated = Some(prio);
        }
        g.sched.switch_to(env.cpu, partner);
    } else {
        wake(g, env, partner);
    }
}

/// Send phase done: receive if requested, else finish.
pub(crate) fn after_send(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) -> Progress {
    let wants_receive = g.actor(me).and_then(|a| a.op).map_or(false, |op| op.receive().is_some());
    if wants_receive {
        receive_phase(g, env, me)
    } else {
        finish_send(g, env, me);
        Progress::Done
    }
}

pub(crate) fn receive_phase(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) -> Progress {
    let Some((op, has_incoming, canceled)) =
        g.actor(me).and_then(|a| a.op.map(|op| (op, a.incoming.is_some(), a.state.contains(ThreadState::CANCEL))))
    else {
        return Progress::Done;
    };
    if has_incoming {
        finish_receive(g, env, me);
        return Progress::Done;
    }
    if canceled {
        fail_receive(g, env, me, ErrorCode::Canceled);
        return Progress::Done;
    }
    let Some(from) = op.receive() else {
        finish_send(g, env, me);
        return Progress::Done;
    };
    if let RecvFrom::Actor(partner) = from {
        if partner != me && !g.alive(partner) {
            fail_receive(g, env, me, ErrorCode::NotExistent);
            return Progress::Done;
        }
    }

    let candidate = match g.actor_mut(me) {
        Some(actor) => {
            actor.state.insert(ThreadState::RECEIVE_WAIT);
            let queue = actor.senders.lock();
            match from {
                RecvFrom::Any => queue.head(),
                RecvFrom::Actor(partner) => queue.contains(partner).then_some(partner),
                RecvFrom::Partner => None,
            }
        }
        None => None,
    };
    if let Some(sender) = candidate {
        claim_sender(g, env, me, sender);
        finish_receive(g, env, me);
        return Progress::Done;
    }

    if op.timeouts.rcv.is_zero() {
        fail_receive(g, env, me, ErrorCode::Timeout);
        return Progress::Done;
    }
    arm_timeout(g, env, me, op.timeouts.rcv);
    block(g, me, Continuation::ReceiveWait);
    Progress::Blocked
}

/// Receiver side of a rendezvous: dequeue `sender`, pull its message and
/// let it go on.
fn claim_sender(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, sender: ActorId) {
    if let Some(actor) = g.actor(me) {
        let _ = actor.senders.lock().remove(sender);
    }
    g.disarm_timeout(sender);
    if let Some(snd) = g.actor_mut(sender) {
        snd.queued_on = None;
        snd.state.remove(ThreadState::SEND_WAIT);
        snd.state.insert(ThreadState::TRANSFER);
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.state.remove(ThreadState::RECEIVE_WAIT);
    }

    let result = transfer::transfer(g, env, sender, me);

    if let Some(snd) = g.actor_mut(sender) {
        snd.state.remove(ThreadState::TRANSFER);
        snd.state.insert(ThreadState::READY);
        if let Some(op) = snd.op.as_mut() {
            match result {
                Ok(()) => {
                    op.outcome = SendOutcome::Delivered;
                    if op.receive().is_some() {
                        snd.state.insert(ThreadState::RECEIVE_WAIT);
                    }
                }
                Err(code) => op.outcome = SendOutcome::Failed(code),
            }
        }
    }
    wake(g, env, sender);
}

// ——— resumption ———

/// Continues `me` after a wake-up.
pub(crate) fn resume(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(cont) = g.actor(me).filter(|a| !a.is_dead()).map(|a| a.cont) else {
        return;
    };
    match cont {
        Continuation::Idle | Continuation::RemoteHandshake => {}
        Continuation::SendWait => resume_send(g, env, me),
        Continuation::ReceiveWait => resume_receive(g, env, me),
        Continuation::GateWait(gate) => gate::resume_invoke(g, env, me, gate),
        Continuation::GraceWait { .. } => gate::resume_grace(g, env, me),
        Continuation::LockWait(gate) => gate::resume_lock_wait(g, env, me, gate),
    }
}

fn resume_send(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    match outcome_of(g, me) {
        Some(SendOutcome::Failed(code)) => fail_send(g, env, me, code),
        Some(SendOutcome::Delivered) => {
            if let Some(actor) = g.actor_mut(me) {
                actor.cont = Continuation::Idle;
                actor.state.insert(ThreadState::READY);
            }
            let _ = after_send(g, env, me);
        }
        Some(SendOutcome::Pending) | None => {}
    }
}

fn resume_receive(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(actor) = g.actor(me) else {
        return;
    };
    let state = actor.state;
    if actor.incoming.is_some() {
        finish_receive(g, env, me);
    } else if state.contains(ThreadState::TRANSFER) {
        // claimed; the sender finishes the transfer and wakes us again
    } else if state.contains(ThreadState::CANCEL) {
        fail_receive(g, env, me, ErrorCode::Canceled);
    } else if state.contains(ThreadState::TIMEOUT) {
        fail_receive(g, env, me, ErrorCode::Timeout);
    }
}

// ——— timeouts and cancellation ———

/// A timeout of `me` fired. Lost races (already claimed) are dropped.
pub(crate) fn expire_timeout(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(actor) = g.actor_mut(me) else {
        return;
    };
    actor.timeout = None;
    let state = actor.state;
    let cont = actor.cont;
    let queued = actor.queued_on.is_some();
    let pending = actor.op.map_or(false, |op| op.outcome == SendOutcome::Pending);
    let fired = match cont {
        Continuation::SendWait | Continuation::GateWait(_)
            if pending && state.contains(ThreadState::SEND_WAIT) && queued =>
        {
            abort_queued(g, me);
            set_outcome(g, me, SendOutcome::Failed(ErrorCode::Timeout));
            true
        }
        Continuation::ReceiveWait
            if state.contains(ThreadState::RECEIVE_WAIT) && !state.contains(ThreadState::TRANSFER) =>
        {
            if let Some(actor) = g.actor_mut(me) {
                actor.state.remove(ThreadState::RECEIVE_WAIT);
            }
            true
        }
        _ => false,
    };
    if !fired {
        log_trace!(target: "ipc", "{} timeout lost the race", me);
        return;
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.state.insert(ThreadState::TIMEOUT | ThreadState::READY);
    }
    g.trace.record(TraceEvent::Timeout { actor: me });
    wake(g, env, me);
}

/// Cancels the pending IPC of `me`; must run on its home CPU.
pub(crate) fn cancel_local(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    let Some(actor) = g.actor_mut(me) else {
        return;
    };
    if actor.is_dead() || actor.op.is_none() {
        return;
    }
    actor.state.insert(ThreadState::CANCEL);
    let state = actor.state;
    let queued = actor.queued_on.is_some();
    let outcome = actor.op.map(|op| op.outcome);
    let cont = actor.cont;
    g.trace.record(TraceEvent::Cancel { actor: me });

    let woken = match cont {
        Continuation::SendWait | Continuation::GateWait(_) => match outcome {
            Some(SendOutcome::Pending) if queued => {
                abort_queued(g, me);
                set_outcome(g, me, SendOutcome::Failed(ErrorCode::Canceled));
                true
            }
            Some(SendOutcome::Failed(ErrorCode::Timeout)) => {
                set_outcome(g, me, SendOutcome::Failed(ErrorCode::Canceled));
                false
            }
            _ => false,
        },
        Continuation::ReceiveWait
            if state.contains(ThreadState::RECEIVE_WAIT) && !state.contains(ThreadState::TRANSFER) =>
        {
            if let Some(actor) = g.actor_mut(me) {
                actor.state.remove(ThreadState::RECEIVE_WAIT);
            }
            true
        }
        Continuation::LockWait(gate) => {
            gate::leave_lock_queue(g, gate, me);
            set_outcome(g, me, SendOutcome::Failed(ErrorCode::Canceled));
            true
        }
        // RemoteHandshake: the flag is picked up by the reply.
        _ => false,
    };
    if woken {
        if let Some(actor) = g.actor_mut(me) {
            actor.state.insert(ThreadState::READY);
        }
        wake(g, env, me);
    }
}

// ——— teardown ———

/// Drops whatever `me` was doing without publishing a result.
pub(crate) fn abandon(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId) {
    g.disarm_timeout(me);
    gate::leave(g, me);
    let Some(cont) = g.actor(me).map(|a| a.cont) else {
        return;
    };
    match cont {
        Continuation::SendWait | Continuation::GateWait(_) | Continuation::RemoteHandshake => abort_queued(g, me),
        Continuation::LockWait(gate) => gate::leave_lock_queue(g, gate, me),
        Continuation::GraceWait { gate, .. } => gate::abandon_grace(g, env, me, gate),
        Continuation::ReceiveWait | Continuation::Idle => {}
    }
    if let Some(actor) = g.actor_mut(me) {
        actor.op = None;
        actor.cont = Continuation::Idle;
        actor.incoming = None;
        actor.queued_on = None;
        actor.fault = None;
    }
}

/// Fails a sender that was queued on a vanished receiver or gate.
pub(crate) fn fail_queued(g: &mut Guard<'_>, env: &Env<'_>, sender: ActorId, code: ErrorCode) {
    let Some(actor) = g.actor_mut(sender) else {
        return;
    };
    actor.queued_on = None;
    actor.state.remove(ThreadState::SEND_WAIT);
    actor.state.insert(ThreadState::READY);
    if let Some(op) = actor.op.as_mut() {
        op.outcome = SendOutcome::Failed(code);
    }
    g.disarm_timeout(sender);
    wake(g, env, sender);
}

/// Fails a closed wait whose partner vanished.
pub(crate) fn fail_receive_wait(g: &mut Guard<'_>, env: &Env<'_>, receiver: ActorId, code: ErrorCode) {
    if let Some(actor) = g.actor_mut(receiver) {
        actor.state.remove(ThreadState::RECEIVE_WAIT);
    }
    fail_receive(g, env, receiver, code);
    wake(g, env, receiver);
}
