// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability invocation entry point
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallFrame
//! DEPENDS_ON: mm::Mapper (capability lookup), ipc::{rendezvous, gate}
//! INVARIANTS: decode/check/execute discipline; an unresolvable reference fails the
//!             phase it addresses with NotExistent; replies never block on the send side
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use synapse_abi::{proto, ErrorCode, IpcOps, MsgTag, ObjRef, Timeout, TimeoutPair};

use crate::cap::{KObject, Rights};
use crate::ipc::rendezvous::{self, Progress};
use crate::ipc::{gate, PendingIpc, RecvFrom};
use crate::kernel::{Env, Guard, KernelError};
use crate::types::ActorId;

/// Registers of one invocation: message tag, object reference and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallFrame {
    pub tag: MsgTag,
    pub obj: ObjRef,
    pub timeouts: TimeoutPair,
}

impl SyscallFrame {
    pub const fn new(tag: MsgTag, obj: ObjRef, timeouts: TimeoutPair) -> Self {
        Self { tag, obj, timeouts }
    }

    /// Decodes the `a0..a2` register triple.
    pub const fn from_regs(regs: [u64; 3]) -> Self {
        Self {
            tag: MsgTag::from_raw(regs[0]),
            obj: ObjRef::from_raw(regs[1]),
            timeouts: TimeoutPair::from_raw(regs[2] as u32),
        }
    }
}

pub(crate) fn dispatch(
    g: &mut Guard<'_>,
    env: &Env<'_>,
    me: ActorId,
    frame: SyscallFrame,
) -> Result<Progress, KernelError> {
    // decode
    let ops = frame.obj.ops();
    let base = PendingIpc::new(frame.tag, frame.timeouts);

    // check
    let actor = g.actor(me).filter(|actor| !actor.is_dead()).ok_or(KernelError::NoSuchActor)?;
    if !actor.is_idle() {
        return Err(KernelError::ActorBusy);
    }
    let space = actor.space;

    // execute
    if ops.contains(IpcOps::REPLY) {
        return Ok(reply(g, env, me, ops, base));
    }
    if !ops.contains(IpcOps::SEND) && ops.contains(IpcOps::OPEN_WAIT) {
        return Ok(rendezvous::do_ipc(g, env, me, base.receiving(Some(RecvFrom::Any))));
    }

    let Some(cap) = env.mapper.lookup(space, frame.obj.cap()) else {
        log_trace!(target: "syscall", "{} names empty slot {:#x}", me, frame.obj.cap());
        return Ok(unresolved(g, env, me, ops, base));
    };
    let label = u64::from(cap.rights.bits());
    let base = base.with_rights(cap.rights.as_fpage());
    let recv = if ops.contains(IpcOps::OPEN_WAIT) {
        Some(RecvFrom::Any)
    } else if ops.contains(IpcOps::RECV) {
        Some(RecvFrom::Partner)
    } else {
        None
    };

    let progress = match cap.object {
        KObject::Thread(target) => {
            let dest = ops.contains(IpcOps::SEND).then_some(target);
            let recv = recv.map(|from| if from == RecvFrom::Partner { RecvFrom::Actor(target) } else { from });
            rendezvous::do_ipc(g, env, me, base.sending_to(dest).receiving(recv).with_label(label))
        }
        KObject::Gate(id) if !ops.contains(IpcOps::SEND) => {
            log_debug!(target: "syscall", "{} receive-only invocation of {}", me, id);
            unresolved(g, env, me, ops, base)
        }
        KObject::Gate(id) if frame.tag.proto() == proto::KOBJECT => {
            gate::control(g, env, me, id, base.receiving(recv))
        }
        KObject::Gate(id) => gate::invoke(g, env, me, id, base.receiving(recv)),
    };
    Ok(progress)
}

/// `REPLY`: send through the reply capability without ever blocking.
fn reply(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, ops: IpcOps, base: PendingIpc) -> Progress {
    let caller = g.actor_mut(me).and_then(|actor| actor.caller.take());
    let recv = (ops.contains(IpcOps::RECV) || ops.contains(IpcOps::OPEN_WAIT)).then_some(RecvFrom::Any);
    let mut op = base.receiving(recv);
    op.timeouts.snd = Timeout::ZERO;
    let Some(caller) = caller else {
        rendezvous::start(g, me, op);
        rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
        return Progress::Done;
    };
    let label = u64::from(Rights::from_fpage(caller.rights).bits());
    rendezvous::do_ipc(g, env, me, op.sending_to(Some(caller.actor)).with_rights(caller.rights).with_label(label))
}

fn unresolved(g: &mut Guard<'_>, env: &Env<'_>, me: ActorId, ops: IpcOps, base: PendingIpc) -> Progress {
    rendezvous::start(g, me, base);
    if ops.contains(IpcOps::SEND) {
        rendezvous::fail_send(g, env, me, ErrorCode::NotExistent);
    } else {
        rendezvous::fail_receive(g, env, me, ErrorCode::NotExistent);
    }
    Progress::Done
}
