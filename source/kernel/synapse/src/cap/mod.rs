// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability table (threads, IPC gates) and rights
//! OWNERS: @kernel-cap-team
//! PUBLIC API: CapTable, Capability{object,rights}, KObject, Rights, CapError
//! DEPENDS_ON: types::{ActorId, GateId}, synapse_abi::FpageRights
//! INVARIANTS: Rights only ever shrink when a capability is passed on; slots validated; bounded table size
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

use synapse_abi::FpageRights;

use crate::types::{ActorId, GateId};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Rights associated with a capability; bit-compatible with object flexpage rights.
    pub struct Rights: u32 {
        /// Special right: bind gates to a thread, start/manage the object.
        const S = 1 << 0;
        const W = 1 << 1;
        const R = 1 << 2;
    }
}

impl Rights {
    /// Rights as carried in an object flexpage.
    pub const fn as_fpage(self) -> FpageRights {
        FpageRights::from_bits_truncate(self.bits() as u64)
    }

    pub const fn from_fpage(rights: FpageRights) -> Self {
        Self::from_bits_truncate(rights.bits() as u32)
    }
}

/// Kernel object reachable through a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KObject {
    /// An actor (thread); invoking it performs raw IPC.
    Thread(ActorId),
    /// An IPC gate; invoking it forwards to the bound thread or controls the gate.
    Gate(GateId),
}

/// Capability descriptor stored in the table.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub object: KObject,
    pub rights: Rights,
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("object", &self.object)
            .field("rights", &self.rights.bits())
            .finish()
    }
}

/// Errors produced when manipulating the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// Provided slot is invalid.
    InvalidSlot,
    /// No free capability slots are available in the table.
    NoSpace,
}

/// Per-space capability table.
#[derive(Default, Clone)]
pub struct CapTable {
    slots: Vec<Option<Capability>>,
}

impl CapTable {
    /// Default number of slots per space.
    pub const DEFAULT_SLOTS: usize = 64;

    /// Creates an empty table sized for `slots` entries.
    pub fn with_capacity(slots: usize) -> Self {
        let mut table: Vec<Option<Capability>> = Vec::with_capacity(slots);
        table.resize(slots, None);
        Self { slots: table }
    }

    /// Bounded table; untrusted inputs cannot force unbounded growth.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_SLOTS)
    }

    /// Inserts or overwrites a slot.
    pub fn set(&mut self, slot: usize, cap: Capability) -> Result<(), CapError> {
        let entry = self.slots.get_mut(slot).ok_or(CapError::InvalidSlot)?;
        *entry = Some(cap);
        Ok(())
    }

    /// Allocates the first free slot and inserts `cap`, returning the slot index.
    pub fn allocate(&mut self, cap: Capability) -> Result<usize, CapError> {
        for (index, entry) in self.slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(cap);
                return Ok(index);
            }
        }
        Err(CapError::NoSpace)
    }

    /// Returns a capability without consuming it.
    pub fn get(&self, slot: usize) -> Result<Capability, CapError> {
        self.slots.get(slot).and_then(|entry| *entry).ok_or(CapError::InvalidSlot)
    }

    /// Copy of `slot` with rights intersected by `mask` (never fails on excess rights).
    pub fn diminish(&self, slot: usize, mask: Rights) -> Result<Capability, CapError> {
        let base = self.get(slot)?;
        Ok(Capability { object: base.object, rights: base.rights & mask })
    }

    /// Drops every capability naming `object`; returns how many were removed.
    pub fn revoke(&mut self, object: KObject) -> usize {
        let mut removed = 0;
        for entry in self.slots.iter_mut() {
            if (*entry).map_or(false, |cap| cap.object == object) {
                *entry = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests_prop;
