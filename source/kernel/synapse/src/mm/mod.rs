// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boundary to the mapping subsystem plus an in-kernel reference mapping database
//! OWNERS: @kernel-mm-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests (object/memory/io mapping, windows, rights, failpoint)
//! PUBLIC API: Mapper (lookup/map), MapError, MapDb, failpoints (feature)
//! DEPENDS_ON: cap::{CapTable, Capability}, synapse_abi::{Fpage, MsgItem}, spin::Mutex
//! INVARIANTS: Mapper calls are made with the big lock released; rights only shrink when mapping

extern crate alloc;

use alloc::collections::BTreeMap;

#[cfg(feature = "failpoints")]
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;
use synapse_abi::{ErrorCode, Fpage, FpageRights, FpageType, MsgItem};

use crate::cap::{CapError, CapTable, Capability, KObject, Rights};
use crate::types::SpaceId;

/// Largest flexpage order the reference database expands slot by slot.
const MAX_EXPANDED_ORDER: u8 = 12;

/// Error returned by mapping operations.
#[must_use = "mapping errors must be reported to both IPC partners"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Nothing mapped at the source flexpage.
    NoSource,
    /// Source does not fit the receive window.
    WindowMismatch,
    /// Destination table or window has no room.
    OutOfMemory,
    /// The mapping subsystem refused the operation.
    Denied,
}

impl MapError {
    /// IPC error code reported for this failure.
    pub const fn ipc_error(self) -> ErrorCode {
        match self {
            MapError::WindowMismatch => ErrorCode::Overflow,
            MapError::NoSource | MapError::OutOfMemory | MapError::Denied => ErrorCode::MapFailed,
        }
    }
}

impl From<CapError> for MapError {
    fn from(err: CapError) -> Self {
        match err {
            CapError::InvalidSlot | CapError::NoSpace => MapError::OutOfMemory,
        }
    }
}

/// What the IPC engine needs from the mapping subsystem.
pub trait Mapper: Send + Sync {
    /// Resolves capability slot `index` of `space`.
    fn lookup(&self, space: SpaceId, index: u64) -> Option<Capability>;

    /// Maps `fpage` of `from` into the receive `window` of `to`.
    fn map(
        &self,
        from: SpaceId,
        fpage: Fpage,
        to: SpaceId,
        window: Fpage,
        item: MsgItem,
    ) -> Result<(), MapError>;
}

#[derive(Default, Clone)]
struct SpaceMap {
    caps: CapTable,
    pages: BTreeMap<u64, FpageRights>,
    ports: BTreeMap<u64, FpageRights>,
}

impl SpaceMap {
    fn new() -> Self {
        Self { caps: CapTable::new(), pages: BTreeMap::new(), ports: BTreeMap::new() }
    }
}

/// Per-space capability tables and page/port records.
pub struct MapDb {
    spaces: Mutex<BTreeMap<SpaceId, SpaceMap>>,
    #[cfg(feature = "failpoints")]
    deny_next: AtomicBool,
}

impl Default for MapDb {
    fn default() -> Self {
        Self::new()
    }
}

impl MapDb {
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(BTreeMap::new()),
            #[cfg(feature = "failpoints")]
            deny_next: AtomicBool::new(false),
        }
    }

    /// Stores `cap` at `slot` of `space`, creating the space on first use.
    pub fn install_cap(&self, space: SpaceId, slot: u64, cap: Capability) -> Result<(), CapError> {
        let mut spaces = self.spaces.lock();
        let map = spaces.entry(space).or_insert_with(SpaceMap::new);
        map.caps.set(slot as usize, cap)
    }

    /// Allocates a free slot of `space` for `cap`.
    pub fn grant(&self, space: SpaceId, cap: Capability) -> Result<u64, CapError> {
        let mut spaces = self.spaces.lock();
        let map = spaces.entry(space).or_insert_with(SpaceMap::new);
        map.caps.allocate(cap).map(|slot| slot as u64)
    }

    pub fn cap(&self, space: SpaceId, slot: u64) -> Option<Capability> {
        let spaces = self.spaces.lock();
        spaces.get(&space).and_then(|map| map.caps.get(slot as usize).ok())
    }

    /// Removes every capability naming `object` from all spaces.
    pub fn revoke(&self, object: KObject) -> usize {
        let mut spaces = self.spaces.lock();
        spaces.values_mut().map(|map| map.caps.revoke(object)).sum()
    }

    /// Records page `page` as present in `space`.
    pub fn install_page(&self, space: SpaceId, page: u64, rights: FpageRights) {
        let mut spaces = self.spaces.lock();
        spaces.entry(space).or_insert_with(SpaceMap::new).pages.insert(page, rights);
    }

    pub fn page(&self, space: SpaceId, page: u64) -> Option<FpageRights> {
        let spaces = self.spaces.lock();
        spaces.get(&space).and_then(|map| map.pages.get(&page).copied())
    }

    /// Records I/O port `port` as accessible from `space`.
    pub fn install_port(&self, space: SpaceId, port: u64, rights: FpageRights) {
        let mut spaces = self.spaces.lock();
        spaces.entry(space).or_insert_with(SpaceMap::new).ports.insert(port, rights);
    }

    pub fn port(&self, space: SpaceId, port: u64) -> Option<FpageRights> {
        let spaces = self.spaces.lock();
        spaces.get(&space).and_then(|map| map.ports.get(&port).copied())
    }

    #[cfg(feature = "failpoints")]
    fn take_denial(&self) -> bool {
        self.deny_next.swap(false, Ordering::SeqCst)
    }

    #[cfg(not(feature = "failpoints"))]
    fn take_denial(&self) -> bool {
        false
    }

    fn map_objects(
        spaces: &mut BTreeMap<SpaceId, SpaceMap>,
        from: SpaceId,
        fpage: Fpage,
        to: SpaceId,
        dest: u64,
    ) -> Result<(), MapError> {
        let count = 1u64 << fpage.order().min(MAX_EXPANDED_ORDER);
        let mask = Rights::from_fpage(fpage.rights());
        let source = spaces.get(&from).ok_or(MapError::NoSource)?;
        let mut staged = alloc::vec::Vec::new();
        for offset in 0..count {
            if let Ok(cap) = source.caps.diminish((fpage.index() + offset) as usize, mask) {
                staged.push((dest + offset, cap));
            }
        }
        if staged.is_empty() {
            return Err(MapError::NoSource);
        }
        let target = spaces.entry(to).or_insert_with(SpaceMap::new);
        for (slot, cap) in staged {
            target.caps.set(slot as usize, cap)?;
        }
        Ok(())
    }

    fn map_frames(
        spaces: &mut BTreeMap<SpaceId, SpaceMap>,
        from: SpaceId,
        fpage: Fpage,
        to: SpaceId,
        dest: u64,
    ) -> Result<(), MapError> {
        let count = 1u64 << fpage.order().min(MAX_EXPANDED_ORDER);
        let io = matches!(fpage.ty(), FpageType::Io);
        let source = spaces.get(&from).ok_or(MapError::NoSource)?;
        let table = if io { &source.ports } else { &source.pages };
        let staged: alloc::vec::Vec<(u64, FpageRights)> = (0..count)
            .filter_map(|offset| {
                table.get(&(fpage.index() + offset)).map(|rights| (dest + offset, *rights & fpage.rights()))
            })
            .collect();
        if staged.is_empty() {
            return Err(MapError::NoSource);
        }
        let target = spaces.entry(to).or_insert_with(SpaceMap::new);
        let table = if io { &mut target.ports } else { &mut target.pages };
        table.extend(staged);
        Ok(())
    }
}

impl Mapper for MapDb {
    fn lookup(&self, space: SpaceId, index: u64) -> Option<Capability> {
        self.cap(space, index)
    }

    fn map(
        &self,
        from: SpaceId,
        fpage: Fpage,
        to: SpaceId,
        window: Fpage,
        _item: MsgItem,
    ) -> Result<(), MapError> {
        if self.take_denial() {
            return Err(MapError::Denied);
        }
        let dest = if window.is_all_spaces() {
            fpage.index()
        } else {
            if window.ty() != fpage.ty() || fpage.order() > window.order() {
                return Err(MapError::WindowMismatch);
            }
            window.index()
        };
        let mut spaces = self.spaces.lock();
        match fpage.ty() {
            FpageType::Obj => Self::map_objects(&mut spaces, from, fpage, to, dest),
            FpageType::Memory | FpageType::Io => Self::map_frames(&mut spaces, from, fpage, to, dest),
            FpageType::Special => Err(MapError::WindowMismatch),
        }
    }
}

#[cfg(feature = "failpoints")]
pub mod failpoints {
    use super::MapDb;
    use core::sync::atomic::Ordering;

    /// Forces the next `map` on `db` to fail with [`super::MapError::Denied`].
    pub fn deny_next_map(db: &MapDb) {
        db.deny_next.store(true, Ordering::SeqCst);
    }
}
