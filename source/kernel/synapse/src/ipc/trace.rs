// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded IPC event ring.
//!
//! Records only with the `ipc_trace_ring` feature; otherwise `record` is a
//! no-op and the ring stays empty. The ring never allocates on the record
//! path and overwrites the oldest entry when full.

extern crate alloc;

use alloc::vec::Vec;

use crate::types::{ActorId, GateId, SpaceId};

pub const TRACE_CAPACITY: usize = 64;

/// One recorded IPC event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Send { from: ActorId, to: ActorId, tag: u64 },
    Receive { actor: ActorId, from: ActorId },
    Timeout { actor: ActorId },
    Cancel { actor: ActorId },
    GateInvoke { gate: GateId, actor: ActorId, label: u64 },
    Map { from: SpaceId, to: SpaceId, fpage: u64 },
}

pub struct TraceRing {
    entries: [Option<TraceEvent>; TRACE_CAPACITY],
    next: usize,
    len: usize,
}

impl Default for TraceRing {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRing {
    pub const fn new() -> Self {
        Self { entries: [None; TRACE_CAPACITY], next: 0, len: 0 }
    }

    #[inline]
    pub fn record(&mut self, event: TraceEvent) {
        if cfg!(feature = "ipc_trace_ring") {
            self.push(event);
        }
    }

    fn push(&mut self, event: TraceEvent) {
        self.entries[self.next] = Some(event);
        self.next = (self.next + 1) % TRACE_CAPACITY;
        self.len = (self.len + 1).min(TRACE_CAPACITY);
    }

    /// Events oldest first.
    pub fn events(&self) -> Vec<TraceEvent> {
        let start = (self.next + TRACE_CAPACITY - self.len) % TRACE_CAPACITY;
        (0..self.len).filter_map(|offset| self.entries[(start + offset) % TRACE_CAPACITY]).collect()
    }

    pub fn dump(&self) {
        for (idx, event) in self.events().iter().enumerate() {
            log_info!(target: "ipc-trace", "#{:02} {:?}", idx, event);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Handle;

    fn actor(index: u32) -> ActorId {
        ActorId::from_handle(Handle::new(index, 1))
    }

    #[test]
    fn ring_keeps_the_newest_entries() {
        let mut ring = TraceRing::new();
        for index in 0..(TRACE_CAPACITY as u32 + 3) {
            ring.push(TraceEvent::Timeout { actor: actor(index) });
        }
        let events = ring.events();
        assert_eq!(events.len(), TRACE_CAPACITY);
        assert_eq!(events[0], TraceEvent::Timeout { actor: actor(3) });
        assert_eq!(events[TRACE_CAPACITY - 1], TraceEvent::Timeout { actor: actor(TRACE_CAPACITY as u32 + 2) });
        ring.clear();
        assert!(ring.is_empty());
    }

    #[test]
    fn record_follows_the_feature() {
        let mut ring = TraceRing::new();
        ring.record(TraceEvent::Cancel { actor: actor(1) });
        assert_eq!(ring.len(), usize::from(cfg!(feature = "ipc_trace_ring")));
    }
}
