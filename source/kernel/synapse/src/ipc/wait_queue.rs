// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Priority-ordered queue of blocked actors (FIFO among equal priorities).

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::types::{ActorId, Prio};

#[derive(Debug, Default, Clone)]
pub struct WaitQueue {
    entries: VecDeque<(Prio, ActorId)>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    /// Inserts `actor` behind every entry whose priority is at least `prio`.
    /// Already queued actors keep their place.
    pub fn enqueue(&mut self, actor: ActorId, prio: Prio) {
        if self.contains(actor) {
            return;
        }
        let pos = self
            .entries
            .iter()
            .position(|&(queued, _)| prio.dominates(queued))
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (prio, actor));
    }

    pub fn dequeue_head(&mut self) -> Option<ActorId> {
        self.entries.pop_front().map(|(_, actor)| actor)
    }

    pub fn head(&self) -> Option<ActorId> {
        self.entries.front().map(|&(_, actor)| actor)
    }

    /// Priority of the head entry.
    pub fn head_prio(&self) -> Option<Prio> {
        self.entries.front().map(|&(prio, _)| prio)
    }

    /// Removes `actor`; false when it was not queued.
    pub fn remove(&mut self, actor: ActorId) -> bool {
        match self.entries.iter().position(|&(_, queued)| queued == actor) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, actor: ActorId) -> bool {
        self.entries.iter().any(|&(_, queued)| queued == actor)
    }

    /// Empties the queue, returning the actors in service order.
    pub fn drain(&mut self) -> Vec<ActorId> {
        self.entries.drain(..).map(|(_, actor)| actor).collect()
    }

    /// Actors in service order.
    pub fn iter(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.entries.iter().map(|&(_, actor)| actor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
