// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page faults and exceptions delivered as IPC to user-level handlers.
//!
//! The faulting actor calls its pager (or exception handler) with a
//! kernel-built message. The parts of its UTCB the message overwrites are
//! saved first and restored once the handler replied or the IPC failed, so
//! a fault can hit an actor between two IPCs without disturbing them.
//!
//! An IPC that is only waiting (queued as a sender, parked on a gate, or in
//! a receive wait nobody claimed) is set aside together with its deadline
//! and rejoins its queue once the fault IPC is over. Anything further along
//! (a transfer, a cross-CPU handshake, gate control) or a second fault on
//! top of the first is refused with `ActorBusy`.

use synapse_abi::{proto, BufDesc, Fpage, MsgItem, MsgTag, MsgTagFlags, TimeoutPair, EXCEPTION_MSG_WORDS};

use crate::actor::{Actor, ActorSpec, Continuation, ThreadState};
use crate::cap::KObject;
use crate::ipc::rendezvous::{self, Progress};
use crate::ipc::timeout::TimeoutHandle;
use crate::ipc::{gate, IpcPurpose, IpcResult, PendingIpc, RecvFrom, SendOutcome};
use crate::kernel::{Env, Guard, KernelError};
use crate::types::ActorId;

/// Low bits of the first page-fault word carry the access type.
const PF_ERR_MASK: u64 = 0x7;

/// Pager reply word 0 that refuses to resolve the fault.
pub const PF_REJECT: u64 = u64::MAX;

/// Architectural register frame handed to the exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExceptionFrame {
    pub words: [u64; EXCEPTION_MSG_WORDS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The handler replied; the faulting access or instruction may be retried.
    Resolved,
    /// The pager answered with [`PF_REJECT`].
    Rejected,
    /// No valid handler, or the fault IPC failed.
    HandlerUnavailable,
    /// The exception handler let the faulting system call through.
    SyscallAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultReport {
    pub outcome: FaultOutcome,
    /// Frame after the handler's reply (exceptions only).
    pub frame: Option<ExceptionFrame>,
}

/// UTCB state parked for the duration of a fault IPC.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NestedFault {
    kind: IpcPurpose,
    buf_desc: BufDesc,
    buffers: [u64; 2],
    values: [u64; EXCEPTION_MSG_WORDS],
    frame: ExceptionFrame,
    saved_result: Option<IpcResult>,
    aside: Option<SetAside>,
}

/// Waiting IPC of the faulting actor, out of every queue while the fault is handled.
#[derive(Debug, Clone, Copy)]
struct SetAside {
    op: PendingIpc,
    partner: Option<ActorId>,
    receiving: bool,
    deadline: Option<u64>,
}

/// Reflects a page fault at `pfa` to the pager of `me`.
pub(crate) fn page_fault(
    g: &mut Guard<'_>,
    env: &Env<'_>,
    me: ActorId,
    pfa: u64,
    error_code: u64,
    pc: u64,
) -> Result<Progress, KernelError> {
    let pager = faultable(g, me)?.pager;
    let mut words = [0; EXCEPTION_MSG_WORDS];
    words[0] = (pfa & !PF_ERR_MASK) | (error_code & PF_ERR_MASK);
    words[1] = pc;
    let tag = MsgTag::new(2, 0, MsgTagFlags::empty(), proto::PAGE_FAULT);
    Ok(reflect(g, env, me, IpcPurpose::PageFault, pager, tag, ExceptionFrame { words }))
}

/// Reflects an exception to the exception handler of `me`.
pub(crate) fn exception(
    g: &mut Guard<'_>,
    env: &Env<'_>,
    me: ActorId,
    frame: ExceptionFrame,
) -> Result<Progress, KernelError> {
    let handler = faultable(g, me)?.exc_handler;
    let tag = MsgTag::new(EXCEPTION_MSG_WORDS as u8, 0, MsgTagFlags::TRANSFER_FPU, proto::EXCEPTION);
    Ok(reflect(g, env, me, IpcPurpose::Exception, handler, tag, frame))
}

fn faultable<'g>(g: &'g Guard<'_>, me: ActorId) -> Result<&'g Actor, KernelError> {
    let actor = g.actor(me).filter(|actor| !actor.is_dead()).ok_or(KernelError::NoSuchActor)?;
    if actor.fault.is_some() || !(actor.is_idle() || waiting_ipc(actor)) {
        return Err(KernelError::ActorBusy);
    }
    Ok(actor)
}

/// The user IPC of `actor` sits in a queue or an unclaimed receive wait.
fn waiting_ipc(actor: &Actor) -> bool {
    let Some(op) = actor.op else {
        return false;
    };
    if op.purpose != IpcPurpose::User || actor.state.intersects(ThreadState::TRANSFER | ThreadState::ABORT_MASK) {
        return false;
    }
    match actor.cont {
        Continuation::SendWait | Continuation::GateWait(_) => {
            actor.queued_on.is_some() && op.outcome == SendOutcome::Pending
        }
        Continuation::ReceiveWait => actor.state.contains(ThreadState::RECEIVE_WAIT) && actor.incoming.is_none(),
        _ => false,
    }
}

fn set_aside(g: &mut Guard<'_>, me: ActorId) -> Option<SetAside> {
    let actor = g.actor(me)?;
    let op = actor.op?;
    let aside = SetAside {
        op,
        partner: actor.partner,
        receiving: actor.cont == Continuation::ReceiveWait,
        deadline: actor.timeout.map(TimeoutHandle::deadline),
    };
    g.disarm_timeout(me);
    if !aside.receiving {
        rendezvous::abort_queued(g, me);
    }
    let actor = g.actor_mut(me)?;
    actor.op = None;
    actor.cont = Continuation::Idle;
    actor.state.remove(ThreadState::FULL_IPC);
    log_debug!(target: "fault", "{} sets its waiting IPC aside", me);
    Some(aside)
}

/// Puts a set-aside IPC back where it waited, keeping its deadline.
fn rejoin(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, aside: SetAside) {
    if let Some(actor) = g.actor_mut(me) {
        actor.op = Some(aside.op);
        actor.partner = aside.partner;
    }
    if aside.receiving {
        let _ = rendezvous::receive_phase(g, env, me);
    } else if let Some(via) = aside.op.via_gate {
        gate::rejoin(g, env, me, via.gate);
    } else {
        let _ = rendezvous::send_phase(g, env, me);
    }
    rendezvous::rearm(g, me, aside.deadline, aside.receiving);
}

fn reflect(
    g: &mut Guard<'_>,
    env: &Env<'_>,
    me: ActorId,
    kind: IpcPurpose,
    slot: u64,
    tag: MsgTag,
    frame: ExceptionFrame,
) -> Progress {
    let Some(space) = g.actor(me).map(|actor| actor.space) else {
        return Progress::Done;
    };
    let cap = if slot == ActorSpec::NO_HANDLER { None } else { env.mapper.lookup(space, slot) };
    let Some(cap) = cap else {
        log_warn!(target: "fault", "{} has no {:?} handler at slot {:#x}", me, kind, slot);
        if let Some(actor) = g.actor_mut(me) {
            actor.fault_report = Some(FaultReport { outcome: FaultOutcome::HandlerUnavailable, frame: None });
        }
        return Progress::Done;
    };

    let aside = set_aside(g, me);
    let Some(actor) = g.actor_mut(me) else {
        return Progress::Done;
    };
    let utcb = &mut actor.utcb;
    let mut values = [0; EXCEPTION_MSG_WORDS];
    values.copy_from_slice(&utcb.values[..EXCEPTION_MSG_WORDS]);
    actor.fault = Some(NestedFault {
        kind,
        buf_desc: utcb.buf_desc,
        buffers: [utcb.buffers[0], utcb.buffers[1]],
        values,
        frame,
        saved_result: actor.result.take(),
        aside,
    });
    let words = tag.words();
    utcb.values[..words].copy_from_slice(&frame.words[..words]);
    utcb.buf_desc = BufDesc::new(0, 0, 0, BufDesc::INHERIT_FPU);
    utcb.set_buffer(0, MsgItem::map(0), Fpage::all_spaces());
    if kind == IpcPurpose::Exception {
        actor.state.insert(ThreadState::IN_EXCEPTION);
    }
    log_debug!(target: "fault", "{} {:?} via slot {:#x}", me, kind, slot);

    let op = PendingIpc::new(tag, TimeoutPair::NEVER)
        .receiving(Some(RecvFrom::Partner))
        .with_rights(cap.rights.as_fpage())
        .for_purpose(kind);
    match cap.object {
        KObject::Thread(handler) => {
            let label = u64::from(cap.rights.bits());
            rendezvous::do_ipc(g, env, me, op.sending_to(Some(handler)).with_label(label))
        }
        KObject::Gate(handler) => gate::invoke(g, env, me, handler, op),
    }
}

/// Ends the fault IPC of `me`: classifies the reply and restores the UTCB.
/// Runs from the IPC completion path, `result` is already published.
pub(crate) fn conclude(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, purpose: IpcPurpose, result: IpcResult) {
    let Some(actor) = g.actor_mut(me) else {
        return;
    };
    let Some(saved) = actor.fault.take() else {
        return;
    };
    let outcome = if !result.is_ok() {
        FaultOutcome::HandlerUnavailable
    } else {
        match purpose {
            IpcPurpose::PageFault if result.tag.words() >= 1 && actor.utcb.values[0] == PF_REJECT => {
                FaultOutcome::Rejected
            }
            IpcPurpose::Exception if result.tag.label() == proto::ALLOW_SYSCALL => FaultOutcome::SyscallAllowed,
            _ => FaultOutcome::Resolved,
        }
    };
    let frame = (purpose == IpcPurpose::Exception && result.is_ok()).then(|| {
        let mut frame = saved.frame;
        let n = result.tag.words().min(EXCEPTION_MSG_WORDS);
        frame.words[..n].copy_from_slice(&actor.utcb.values[..n]);
        frame
    });

    actor.utcb.buf_desc = saved.buf_desc;
    actor.utcb.buffers[..2].copy_from_slice(&saved.buffers);
    actor.utcb.values[..EXCEPTION_MSG_WORDS].copy_from_slice(&saved.values);
    actor.result = saved.saved_result;
    actor.state.remove(ThreadState::IN_EXCEPTION);
    actor.fault_report = Some(FaultReport { outcome, frame });

    if outcome == FaultOutcome::HandlerUnavailable {
        if env.config.conservative {
            log_error!(target: "fault", "{} {:?} IPC failed: {:?}", me, saved.kind, result.code());
        } else {
            log_debug!(target: "fault", "{} {:?} IPC failed: {:?}", me, saved.kind, result.code());
        }
    }
    if let Some(aside) = saved.aside {
        rejoin(g, env, me, aside);
    }
}
