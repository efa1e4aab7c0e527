// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for IPC wait queues, the deadline timer and word transfer
//! OWNERS: @kernel-ipc-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Wait queue service order: priority first, FIFO among equals
//!   - Removal keeps the relative order of the remaining entries
//!   - Timeout queue fires in deadline order and never early
//!   - Message word copy and end-to-end delivery of n-word messages
//!
//! TEST_SCENARIOS:
//!   - service_order_is_priority_then_fifo(): drained order equals a stable sort by descending priority
//!   - removal_preserves_order(): removing any subset leaves a subsequence of the original order
//!   - timeouts_fire_in_deadline_order(): expire(now) returns exactly the due entries, sorted
//!   - word_copy_is_idempotent(): copying twice equals copying once, registers past n untouched
//!   - n_word_message_arrives_intact(): any 0..=63 words sent to a waiting receiver arrive unchanged

extern crate alloc;

use alloc::vec::Vec;

use proptest::prelude::*;

use synapse_abi::{IpcOps, MsgTag, MsgTagFlags, ObjRef, TimeoutPair, UTCB_MAX_WORDS};

use super::timeout::TimeoutQueue;
use super::transfer::copy_words;
use super::wait_queue::WaitQueue;
use crate::actor::ActorSpec;
use crate::arena::Handle;
use crate::cap::{Capability, KObject, Rights};
use crate::config::KernelConfig;
use crate::hal::ManualClock;
use crate::kernel::Kernel;
use crate::mm::MapDb;
use crate::syscall::SyscallFrame;
use crate::types::{ActorId, Prio, SpaceId};

fn actor(index: usize) -> ActorId {
    ActorId::from_handle(Handle::new(index as u32, 1))
}

proptest! {
    #[test]
    fn service_order_is_priority_then_fifo(prios in proptest::collection::vec(0u8..8, 0..32)) {
        let mut queue = WaitQueue::new();
        for (index, prio) in prios.iter().enumerate() {
            queue.enqueue(actor(index), Prio::new(*prio));
        }
        let mut expected: Vec<(usize, u8)> = prios.iter().copied().enumerate().collect();
        expected.sort_by(|a, b| b.1.cmp(&a.1));
        let expected: Vec<ActorId> = expected.into_iter().map(|(index, _)| actor(index)).collect();
        prop_assert_eq!(queue.drain(), expected);
    }

    #[test]
    fn removal_preserves_order(
        prios in proptest::collection::vec(0u8..4, 1..24),
        drop_mask in any::<u32>(),
    ) {
        let mut queue = WaitQueue::new();
        for (index, prio) in prios.iter().enumerate() {
            queue.enqueue(actor(index), Prio::new(*prio));
        }
        let before: Vec<ActorId> = queue.iter().collect();
        for index in 0..prios.len() {
            if drop_mask & (1 << index) != 0 {
                prop_assert!(queue.remove(actor(index)));
            }
        }
        let after: Vec<ActorId> = queue.iter().collect();
        let kept: Vec<ActorId> = before
            .into_iter()
            .filter(|a| drop_mask & (1 << a.index()) == 0)
            .collect();
        prop_assert_eq!(after, kept);
    }

    #[test]
    fn timeouts_fire_in_deadline_order(
        deadlines in proptest::collection::vec(0u64..1_000, 0..24),
        now in 0u64..1_000,
    ) {
        let mut queue = TimeoutQueue::new();
        for (index, deadline) in deadlines.iter().enumerate() {
            let _ = queue.arm(actor(index), *deadline);
        }
        let fired = queue.expire(now);
        let mut due: Vec<(u64, usize)> = deadlines
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, deadline)| deadline <= now)
            .map(|(index, deadline)| (deadline, index))
            .collect();
        due.sort();
        let due: Vec<ActorId> = due.into_iter().map(|(_, index)| actor(index)).collect();
        prop_assert_eq!(fired, due);
        prop_assert!(queue.next_deadline().map_or(true, |next| next > now));
    }

    #[test]
    fn word_copy_is_idempotent(
        source in proptest::collection::vec(any::<u64>(), UTCB_MAX_WORDS),
        target in proptest::collection::vec(any::<u64>(), UTCB_MAX_WORDS),
        words in 0usize..80,
    ) {
        let mut once = target.clone();
        let copied = copy_words(&source, &mut once, words);
        let mut twice = once.clone();
        prop_assert_eq!(copy_words(&source, &mut twice, words), copied);
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(copied, words.min(UTCB_MAX_WORDS));
        prop_assert_eq!(&once[..copied], &source[..copied]);
        prop_assert_eq!(&once[copied..], &target[copied..]);
    }

    #[test]
    fn n_word_message_arrives_intact(words in proptest::collection::vec(any::<u64>(), 0..=UTCB_MAX_WORDS)) {
        let k = Kernel::new(KernelConfig::default(), MapDb::new(), ManualClock::new());
        let receiver = k.create_actor(ActorSpec::new(SpaceId::from_raw(2))).unwrap();
        let sender = k.create_actor(ActorSpec::new(SpaceId::from_raw(1))).unwrap();
        let cap = k
            .mapper()
            .grant(SpaceId::from_raw(1), Capability { object: KObject::Thread(receiver), rights: Rights::all() })
            .unwrap();

        let wait = SyscallFrame::new(MsgTag::default(), ObjRef::new(0, IpcOps::WAIT), TimeoutPair::NEVER);
        prop_assert!(k.invoke(receiver, wait).unwrap().is_blocked());
        k.with_utcb(sender, |u| u.values[..words.len()].copy_from_slice(&words)).unwrap();
        let tag = MsgTag::new(words.len() as u8, 0, MsgTagFlags::empty(), 3);
        let send = SyscallFrame::new(tag, ObjRef::new(cap, IpcOps::SEND), TimeoutPair::NEVER);
        prop_assert!(k.invoke(sender, send).unwrap().completed().unwrap().is_ok());

        let received = k.take_result(receiver).unwrap();
        prop_assert!(received.is_ok());
        prop_assert_eq!(received.tag.words(), words.len());
        prop_assert_eq!(received.tag.label(), 3);
        let delivered: Vec<u64> = k.with_utcb(receiver, |u| u.values[..words.len()].to_vec()).unwrap();
        prop_assert_eq!(delivered, words);
    }
}
