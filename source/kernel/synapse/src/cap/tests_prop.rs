// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for capability table
//! OWNERS: @kernel-cap-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Slot store/lookup and first-free allocation
//!   - Rights narrowing when a capability is handed on
//!   - Rights <-> flexpage rights correspondence
//!   - Revocation of every alias of an object
//!
//! TEST_SCENARIOS:
//!   - set_and_get_roundtrip(): set then get returns the same capability
//!   - allocate_takes_lowest_free_slot(): allocation skips occupied slots, NoSpace when full
//!   - diminish_never_escalates(): diminished rights are a subset of both inputs
//!   - fpage_rights_are_bit_compatible(): rights survive the trip through an object flexpage
//!   - revoke_clears_all_aliases(): no slot names the object after revoke

use super::{CapError, CapTable, Capability, KObject, Rights};
use crate::arena::Handle;
use crate::types::{ActorId, GateId};
use proptest::prelude::*;

fn arb_rights() -> impl Strategy<Value = Rights> {
    (0u8..8).prop_map(|bits| Rights::from_bits_truncate(bits as u32))
}

fn arb_object() -> impl Strategy<Value = KObject> {
    prop_oneof![
        (0u32..64, 1u32..8)
            .prop_map(|(index, gen)| KObject::Thread(ActorId::from_handle(Handle::new(index, gen)))),
        (0u32..64, 1u32..8)
            .prop_map(|(index, gen)| KObject::Gate(GateId::from_handle(Handle::new(index, gen)))),
    ]
}

proptest! {
    #[test]
    fn set_and_get_roundtrip(slot in 0usize..32, object in arb_object(), rights in arb_rights()) {
        let mut table = CapTable::new();
        table.set(slot, Capability { object, rights }).unwrap();
        prop_assert_eq!(table.get(slot).unwrap(), Capability { object, rights });
        prop_assert_eq!(table.get(CapTable::DEFAULT_SLOTS), Err(CapError::InvalidSlot));
    }

    #[test]
    fn allocate_takes_lowest_free_slot(object in arb_object(), taken in proptest::collection::btree_set(0usize..8, 0..8)) {
        let mut table = CapTable::with_capacity(8);
        let cap = Capability { object, rights: Rights::all() };
        for slot in &taken {
            table.set(*slot, cap).unwrap();
        }
        match (0..8).find(|slot| !taken.contains(slot)) {
            Some(free) => prop_assert_eq!(table.allocate(cap), Ok(free)),
            None => prop_assert_eq!(table.allocate(cap), Err(CapError::NoSpace)),
        }
    }

    #[test]
    fn diminish_never_escalates(object in arb_object(), base_rights in arb_rights(), mask in arb_rights()) {
        let mut table = CapTable::new();
        table.set(2, Capability { object, rights: base_rights }).unwrap();
        let diminished = table.diminish(2, mask).unwrap();
        prop_assert_eq!(diminished.object, object);
        prop_assert!(base_rights.contains(diminished.rights));
        prop_assert!(mask.contains(diminished.rights));
        // The stored capability keeps its rights.
        prop_assert_eq!(table.get(2).unwrap().rights, base_rights);
    }

    #[test]
    fn fpage_rights_are_bit_compatible(rights in arb_rights()) {
        prop_assert_eq!(Rights::from_fpage(rights.as_fpage()), rights);
    }

    #[test]
    fn revoke_clears_all_aliases(object in arb_object(), slots in proptest::collection::btree_set(0usize..64, 1..8)) {
        let mut table = CapTable::new();
        for slot in &slots {
            table.set(*slot, Capability { object, rights: Rights::all() }).unwrap();
        }
        prop_assert_eq!(table.revoke(object), slots.len());
        prop_assert!((0..table.len()).all(|slot| table.get(slot).map_or(true, |cap| cap.object != object)));
    }
}
