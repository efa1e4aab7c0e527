// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-CPU deadline timer for blocked IPC phases
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: TimeoutQueue (arm/disarm/expire/next_deadline), TimeoutHandle
//! DEPENDS_ON: alloc::collections::BTreeMap
//! INVARIANTS: entries fire in (deadline, arm order); a disarmed handle never fires
//!
//! Deadlines are absolute microseconds of the monotonic clock. What a fired
//! timeout does to its actor is decided by the rendezvous, which may find
//! that the actor was already claimed and drop the timeout.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::types::ActorId;

/// Identifies one armed timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeoutHandle {
    deadline: u64,
    seq: u64,
}

impl TimeoutHandle {
    pub const fn deadline(self) -> u64 {
        self.deadline
    }
}

#[derive(Debug, Default)]
pub struct TimeoutQueue {
    entries: BTreeMap<TimeoutHandle, ActorId>,
    seq: u64,
}

impl TimeoutQueue {
    pub const fn new() -> Self {
        Self { entries: BTreeMap::new(), seq: 0 }
    }

    pub fn arm(&mut self, actor: ActorId, deadline_us: u64) -> TimeoutHandle {
        self.seq = self.seq.wrapping_add(1);
        let handle = TimeoutHandle { deadline: deadline_us, seq: self.seq };
        self.entries.insert(handle, actor);
        handle
    }

    /// Returns false when the timeout already fired or was disarmed.
    pub fn disarm(&mut self, handle: TimeoutHandle) -> bool {
        self.entries.remove(&handle).is_some()
    }

    /// Removes and returns every actor whose deadline is `<= now_us`.
    pub fn expire(&mut self, now_us: u64) -> Vec<ActorId> {
        let mut fired = Vec::new();
        while let Some(entry) = self.entries.first_entry() {
            if entry.key().deadline > now_us {
                break;
            }
            fired.push(entry.remove());
        }
        fired
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|handle| handle.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
