// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cross-CPU half of the rendezvous.
//!
//! A sender whose receiver lives on another CPU posts [`Drq::IpcSend`] and
//! waits in `RemoteHandshake`. The receiver's CPU runs the same
//! check-and-claim step as the local path and answers with a
//! [`RemoteReply`]: short messages are copied right there (`Done`), messages
//! with items reserve the receiver (`Claimed`) and the sender moves them on
//! its own CPU.

use synapse_abi::ErrorCode;

use crate::actor::{Continuation, ThreadState};
use crate::ipc::rendezvous::{self, Check};
use crate::ipc::{gate, transfer, SendOutcome};
use crate::kernel::{Env, Guard};
use crate::smp::{Drq, RemoteReply};
use crate::types::ActorId;

pub(crate) fn handle_drq(g: &mut Guard<'_>, env: &Env<'_>, drq: Drq) {
    match drq {
        Drq::IpcSend { sender, receiver } => remote_send(g, env, sender, receiver),
        Drq::IpcSendReply { sender, receiver, reply } => on_send_reply(g, env, sender, receiver, reply),
        Drq::Activate { actor } => activate(g, env, actor),
        Drq::Cancel { actor } => rendezvous::cancel_local(g, env, actor),
    }
}

/// Receiver CPU: check-and-claim on behalf of a remote sender.
fn remote_send(g: &mut Guard<'_>, env: &Env<'_>, sender: ActorId, receiver: ActorId) {
    let Some((op, sender_cpu)) = g
        .actor(sender)
        .filter(|a| !a.is_dead() && a.cont == Continuation::RemoteHandshake)
        .and_then(|a| a.op.map(|op| (op, a.cpu)))
    else {
        log_debug!(target: "ipc", "stale remote send from {}", sender);
        return;
    };

    let reply = match rendezvous::check_sender(g, sender, receiver, !op.timeouts.snd.is_zero()) {
        Check::Failed(code) => RemoteReply::Failed(code),
        Check::Queued => RemoteReply::Queued,
        Check::Ok => {
            rendezvous::handshake_receiver(g, receiver);
            if op.tag.items() > 0 || op.tag.transfer_fpu() {
                RemoteReply::Claimed
            } else {
                let result = transfer::transfer(g, env, sender, receiver);
                gate::leave(g, sender);
                rendezvous::release_receiver(g, receiver);
                rendezvous::wake(g, env, receiver);
                match result {
                    Ok(()) => RemoteReply::Done,
                    Err(code) => RemoteReply::Failed(code),
                }
            }
        }
    };
    log_trace!(target: "ipc", "remote send {} -> {}: {:?}", sender, receiver, reply);
    let _ = env.smp.post(sender_cpu, Drq::IpcSendReply { sender, receiver, reply });
}

/// Sender CPU: continue after the receiver's verdict.
fn on_send_reply(g: &mut Guard<'_>, env: &Env<'_>, sender: ActorId, receiver: ActorId, reply: RemoteReply) {
    let waiting = g
        .actor(sender)
        .map_or(false, |a| !a.is_dead() && a.cont == Continuation::RemoteHandshake);
    if !waiting {
        if reply == RemoteReply::Claimed {
            rendezvous::release_claimed(g, env, receiver, ErrorCode::Aborted);
        }
        return;
    }
    let (outcome, canceled, snd_timeout) = match g.actor(sender).and_then(|a| a.op.map(|op| (a, op))) {
        Some((a, op)) => (op.outcome, a.state.contains(ThreadState::CANCEL), op.timeouts.snd),
        None => return,
    };

    match reply {
        RemoteReply::Failed(code) => rendezvous::fail_send(g, env, sender, code),
        RemoteReply::Done => {
            resume_sender(g, sender);
            if let Some(op) = g.actor_mut(sender).and_then(|a| a.op.as_mut()) {
                op.outcome = SendOutcome::Delivered;
            }
            let _ = rendezvous::after_send(g, env, sender);
        }
        RemoteReply::Claimed => {
            resume_sender(g, sender);
            let _ = rendezvous::deliver(g, env, sender, receiver);
        }
        RemoteReply::Queued => match outcome {
            SendOutcome::Delivered => {
                resume_sender(g, sender);
                let _ = rendezvous::after_send(g, env, sender);
            }
            SendOutcome::Failed(code) => rendezvous::fail_send(g, env, sender, code),
            SendOutcome::Pending if canceled => {
                rendezvous::abort_queued(g, sender);
                rendezvous::fail_send(g, env, sender, ErrorCode::Canceled);
            }
            SendOutcome::Pending => {
                rendezvous::arm_timeout(g, env, sender, snd_timeout);
                if let Some(a) = g.actor_mut(sender) {
                    a.cont = Continuation::SendWait;
                }
            }
        },
    }
}

/// The handshake is over for `sender`; it runs again on this CPU.
fn resume_sender(g: &mut Guard<'_>, sender: ActorId) {
    if let Some(a) = g.actor_mut(sender) {
        a.cont = Continuation::Idle;
        a.state.remove(ThreadState::SEND_WAIT);
        a.state.insert(ThreadState::READY);
    }
}

fn activate(g: &mut Guard<'_>, env: &Env<'_>, actor: ActorId) {
    let Some((cpu, prio)) = g.actor(actor).filter(|a| !a.is_dead()).map(|a| (a.cpu, a.prio)) else {
        return;
    };
    if cpu != env.cpu {
        log_warn!(target: "ipc", "activation of {} delivered to {} (home {})", actor, env.cpu, cpu);
        return;
    }
    let running = g.running_prio(cpu);
    let _ = g.sched.deblock(cpu, actor, prio, running);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorSpec;
    use crate::cap::{Capability, KObject, Rights};
    use crate::config::KernelConfig;
    use crate::hal::ManualClock;
    use crate::kernel::Kernel;
    use crate::mm::MapDb;
    use crate::syscall::SyscallFrame;
    use crate::types::{CpuId, SpaceId};
    use synapse_abi::{IpcOps, MsgTag, MsgTagFlags, ObjRef, Timeout, TimeoutPair};

    const SPACE: SpaceId = SpaceId::from_raw(1);
    const CPU1: CpuId = CpuId::from_raw(1);

    fn pair() -> (Kernel<MapDb, ManualClock>, ActorId, ActorId, u64) {
        let k = Kernel::new(KernelConfig::default().with_cpus(2), MapDb::new(), ManualClock::new());
        let rcv = k.create_actor(ActorSpec::new(SPACE).on_cpu(CPU1)).unwrap();
        let snd = k.create_actor(ActorSpec::new(SPACE)).unwrap();
        let cap = k.mapper().grant(SPACE, Capability { object: KObject::Thread(rcv), rights: Rights::all() }).unwrap();
        (k, rcv, snd, cap)
    }

    #[test]
    fn remote_words_are_copied_on_the_receiver_cpu() {
        let (k, rcv, snd, cap) = pair();
        let wait = SyscallFrame::new(MsgTag::default(), ObjRef::new(0, IpcOps::WAIT), TimeoutPair::NEVER);
        assert!(k.invoke(rcv, wait).unwrap().is_blocked());

        k.with_utcb(snd, |u| u.values[0] = 99).unwrap();
        let send = SyscallFrame::new(MsgTag::new(1, 0, MsgTagFlags::empty(), 0), ObjRef::new(cap, IpcOps::SEND), TimeoutPair::NEVER);
        assert!(k.invoke(snd, send).unwrap().is_blocked());
        assert_eq!(k.continuation_of(snd), Some(Continuation::RemoteHandshake));

        assert_eq!(k.handle_drqs(CPU1), Ok(1));
        assert_eq!(k.take_result(rcv).map(|r| r.is_ok()), Some(true));
        assert_eq!(k.with_utcb(rcv, |u| u.values[0]).unwrap(), 99);

        assert_eq!(k.handle_drqs(CpuId::BOOT), Ok(1));
        assert!(k.take_result(snd).unwrap().is_ok());
    }

    #[test]
    fn remote_zero_timeout_is_refused_without_queueing() {
        let (k, rcv, snd, cap) = pair();
        let pair = TimeoutPair::new(Timeout::ZERO, Timeout::NEVER);
        let send = SyscallFrame::new(MsgTag::default(), ObjRef::new(cap, IpcOps::SEND), pair);
        assert!(k.invoke(snd, send).unwrap().is_blocked());
        k.handle_drqs(CPU1).unwrap();
        assert!(k.queued_senders(rcv).is_empty());
        k.handle_drqs(CpuId::BOOT).unwrap();
        assert_eq!(k.take_result(snd).unwrap().code(), Some(ErrorCode::Timeout));
    }
}
