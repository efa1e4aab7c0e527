// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message transfer engine: words, typed items (map / local id), FPU hand-over
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + integration scenarios (tests/rendezvous.rs)
//! DEPENDS_ON: mm::Mapper (called with the big lock released), ipc::utcb::BufIter, gate bindings
//! INVARIANTS: words are always copied in full before any item; a failing item stops the
//!             transfer without rolling back earlier mappings; both partners get the error word

use synapse_abi::{
    ErrorCode, Fpage, FpageRights, FpageType, IpcErrorWord, MsgItem, Phase, LOCAL_ID_OBJECT, LOCAL_ID_SAME_SPACE,
    UTCB_MAX_WORDS,
};

use crate::actor::ReplyCap;
use crate::cap::{KObject, Rights};
use crate::ipc::trace::TraceEvent;
use crate::ipc::utcb::BufIter;
use crate::ipc::{Incoming, PendingIpc};
use crate::kernel::{Env, Guard};
use crate::mm::MapError;
use crate::types::{ActorId, SpaceId};

/// Bits of the send item word the receiver never sees.
const ITEM_KEEP_MASK: u64 = !0x0ff7;
/// Flexpage attribute bits folded into the received item word.
const FPAGE_ATTR_MASK: u64 = 0x0ff0;

/// Moves the message of `snd` into `rcv`. Both partners are reserved
/// (sender running or `TRANSFER`, receiver `TRANSFER`).
pub(crate) fn transfer(g: &mut Guard<'_>, env: &Env<'_>, snd: ActorId, rcv: ActorId) -> Result<(), ErrorCode> {
    let result = transfer_message(g, env, snd, rcv);
    if let Err(code) = result {
        if let Some(sender) = g.actor_mut(snd) {
            sender.utcb.error = IpcErrorWord::new(code, Phase::Send);
        }
        if let Some(receiver) = g.actor_mut(rcv) {
            receiver.utcb.error = IpcErrorWord::new(code, Phase::Receive);
        }
        log_debug!(target: "ipc", "transfer {} -> {} failed: {:?}", snd, rcv, code);
    }
    result
}

/// Copies the first `words` message registers, clamped to what both sides
/// hold. Returns the number copied.
pub(crate) fn copy_words(from: &[u64], to: &mut [u64], words: usize) -> usize {
    let words = words.min(UTCB_MAX_WORDS).min(from.len()).min(to.len());
    to[..words].copy_from_slice(&from[..words]);
    words
}

fn transfer_message(g: &mut Guard<'_>, env: &Env<'_>, snd: ActorId, rcv: ActorId) -> Result<(), ErrorCode> {
    let (sender, receiver) = g.actor_pair_mut(snd, rcv).ok_or(ErrorCode::Aborted)?;
    let op = sender.op.ok_or(ErrorCode::Aborted)?;
    let words = copy_words(&sender.utcb.values, &mut receiver.utcb.values, op.tag.words());
    receiver.incoming = Some(Incoming { tag: op.tag.with_error(false), label: op.label, from: snd });
    if op.is_call_to(rcv) {
        receiver.caller = Some(ReplyCap { actor: snd, rights: op.rights });
    }
    g.trace.record(TraceEvent::Send { from: snd, to: rcv, tag: op.tag.raw() });

    if op.tag.items() > 0 {
        transfer_items(g, env, snd, rcv, &op, words)?;
    }

    let (sender, receiver) = g.actor_pair_mut(snd, rcv).ok_or(ErrorCode::Aborted)?;
    if op.tag.transfer_fpu() && receiver.utcb.buf_desc.inherit_fpu() && op.rights.contains(FpageRights::W) {
        receiver.fpu = sender.fpu;
    }
    Ok(())
}

fn transfer_items(
    g: &mut Guard<'_>,
    env: &Env<'_>,
    snd: ActorId,
    rcv: ActorId,
    op: &PendingIpc,
    words: usize,
) -> Result<(), ErrorCode> {
    let (snd_space, rcv_space, desc) = {
        let (sender, receiver) = g.actor_pair_mut(snd, rcv).ok_or(ErrorCode::Aborted)?;
        (sender.space, receiver.space, receiver.utcb.buf_desc)
    };
    let mut mem = BufIter::at(desc.mem());
    let mut io = BufIter::at(desc.io());
    let mut obj = BufIter::at(desc.obj());
    let mut pos = words;

    for _ in 0..op.tag.items() {
        if pos + 1 >= UTCB_MAX_WORDS {
            return Err(ErrorCode::Overflow);
        }
        let (item, fpage) = {
            let sender = g.actor(snd).ok_or(ErrorCode::Aborted)?;
            (MsgItem::from_raw(sender.utcb.values[pos]), Fpage::from_raw(sender.utcb.values[pos + 1]))
        };
        if item.is_void() {
            pos += 2;
            continue;
        }
        let iter = match fpage.ty() {
            FpageType::Memory => &mut mem,
            FpageType::Io => &mut io,
            FpageType::Obj => &mut obj,
            FpageType::Special => return Err(ErrorCode::Overflow),
        };
        let (buf_item, window) = {
            let receiver = g.actor(rcv).ok_or(ErrorCode::Aborted)?;
            (iter.item(&receiver.utcb.buffers), iter.window(&receiver.utcb.buffers))
        };
        if buf_item.is_void() || !buf_item.is_map() {
            return Err(ErrorCode::Overflow);
        }
        if window.ty() != fpage.ty() && !window.is_all_spaces() {
            return Err(ErrorCode::Overflow);
        }

        let mut rcv_word = (item.raw() & ITEM_KEEP_MASK) | (fpage.raw() & FPAGE_ATTR_MASK);
        let mut local_id = None;
        if buf_item.is_rcv_id() {
            if snd_space == rcv_space {
                rcv_word |= LOCAL_ID_SAME_SPACE;
                local_id = Some(fpage.raw());
            } else if fpage.ty() == FpageType::Obj {
                if let Some(id) = local_object_id(g, env, snd_space, fpage, rcv_space) {
                    rcv_word |= LOCAL_ID_OBJECT;
                    local_id = Some(id);
                }
            }
        }

        match local_id {
            Some(id) => {
                let receiver = g.actor_mut(rcv).ok_or(ErrorCode::Aborted)?;
                receiver.utcb.values[pos] = rcv_word;
                receiver.utcb.values[pos + 1] = id;
            }
            None => {
                let send_fpage = if fpage.ty() == FpageType::Obj {
                    fpage.mask_rights(op.rights | FpageRights::RX)
                } else {
                    fpage
                };
                if let Some(receiver) = g.actor_mut(rcv) {
                    receiver.utcb.values[pos] = rcv_word;
                }
                let mapped =
                    g.unlocked(|| env.mapper.map(snd_space, send_fpage, rcv_space, window, item));
                if !g.alive(snd) || !g.alive(rcv) {
                    return Err(ErrorCode::Aborted);
                }
                mapped.map_err(MapError::ipc_error)?;
                g.trace.record(TraceEvent::Map { from: snd_space, to: rcv_space, fpage: send_fpage.raw() });
            }
        }

        if !item.is_compound() {
            iter.advance();
        }
        pos += 2;
    }
    Ok(())
}

/// Local name of the object behind `fpage` if it already lives in
/// `rcv_space`: a gate bound to an actor of that space.
fn local_object_id(g: &Guard<'_>, env: &Env<'_>, snd_space: SpaceId, fpage: Fpage, rcv_space: SpaceId) -> Option<u64> {
    let cap = env.mapper.lookup(snd_space, fpage.index())?;
    let KObject::Gate(gate) = cap.object else {
        return None;
    };
    let binding = g.gate(gate)?.current(env.rcu, env.cpu);
    let dest = binding.dest?;
    if g.actor(dest)?.space != rcv_space {
        return None;
    }
    let rights = cap.rights & Rights::from_fpage(fpage.rights());
    Some(binding.label | u64::from(rights.bits()))
}
