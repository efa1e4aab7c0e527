// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Handle newtypes shared by the IPC engine (actors, gates, CPUs, spaces, priorities)
//! OWNERS: @kernel-team
//! PUBLIC API: ActorId, GateId, CpuId, SpaceId, Prio
//! DEPENDS_ON: arena::Handle
//! INVARIANTS: Handles carry a generation; a stale handle never resolves to a reused slot
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use core::fmt;

use crate::arena::Handle;

/// Actor (thread) handle.
///
/// **Ownership**: Only the actor arena hands out actor ids.
/// **Invariant**: Generation 0 is never issued, so `raw()` is never 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(Handle);

impl ActorId {
    /// Lock owner used for kernel-initiated operations that have no actor.
    pub const KERNEL: Self = Self(Handle::new(u32::MAX, 1));

    #[inline]
    pub(crate) const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    #[inline]
    pub(crate) const fn handle(self) -> Handle {
        self.0
    }

    /// Slot index inside the actor table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0.index() as usize
    }

    /// Packed `generation << 32 | index`.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0.raw()
    }

    /// Unpacks a value produced by [`ActorId::raw`].
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(Handle::from_raw(raw))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}.{}", self.0.index(), self.0.generation())
    }
}

/// IPC gate handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateId(Handle);

impl GateId {
    #[inline]
    pub(crate) const fn from_handle(handle: Handle) -> Self {
        Self(handle)
    }

    #[inline]
    pub(crate) const fn handle(self) -> Handle {
        self.0
    }

    /// Packed `generation << 32 | index`.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0.raw()
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}.{}", self.0.index(), self.0.generation())
    }
}

/// Logical CPU identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CpuId(u16);

impl CpuId {
    /// Boot CPU.
    pub const BOOT: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Address space identifier as known to the mapping subsystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct SpaceId(u32);

impl SpaceId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

/// Scheduling priority; larger values dominate smaller ones.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct Prio(u8);

impl Prio {
    pub const IDLE: Self = Self(0);
    pub const MAX: Self = Self(u8::MAX);

    #[inline]
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// True when `self` strictly dominates `other`.
    #[inline]
    pub fn dominates(self, other: Prio) -> bool {
        self.0 > other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_raw_roundtrip() {
        let id = ActorId::from_handle(Handle::new(7, 3));
        assert_eq!(ActorId::from_raw(id.raw()), id);
        assert_eq!(id.index(), 7);
        assert_ne!(id.raw(), 0);
    }

    #[test]
    fn kernel_id_is_not_a_table_slot() {
        assert_eq!(ActorId::KERNEL.index(), u32::MAX as usize);
    }

    #[test]
    fn prio_dominance_is_strict() {
        assert!(Prio::new(5).dominates(Prio::new(4)));
        assert!(!Prio::new(5).dominates(Prio::new(5)));
    }
}
