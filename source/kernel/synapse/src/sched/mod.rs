// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Scheduler primitives the IPC path relies on (ready queues, direct switch, deblock)
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (ready_enqueue/deblock/switch_to/schedule/block/purge), SchedStats
//! DEPENDS_ON: ipc::wait_queue::WaitQueue, smp::MAX_CPUS
//! INVARIANTS: per-CPU queues; priority order with FIFO ties; a direct-switch target runs before the queue
//! ADR: docs/rfcs/RFC-0021-kernel-smp-v1-percpu-runqueues-ipi-contract.md

use crate::ipc::wait_queue::WaitQueue;
use crate::smp::MAX_CPUS;
use crate::types::{ActorId, CpuId, Prio};

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    /// Partner ran immediately on the sender's time.
    pub direct_switches: u64,
    /// Partner was queued for the scheduler to pick.
    pub deblocks: u64,
    /// Deblocks whose target would preempt the current actor.
    pub preemptions: u64,
}

#[derive(Default)]
struct CpuQueue {
    ready: WaitQueue,
    direct: Option<ActorId>,
    current: Option<ActorId>,
    stats: SchedStats,
}

/// Per-CPU ready queues.
pub struct Scheduler {
    cpus: [CpuQueue; MAX_CPUS],
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { cpus: core::array::from_fn(|_| CpuQueue::default()) }
    }

    fn queue(&mut self, cpu: CpuId) -> &mut CpuQueue {
        &mut self.cpus[cpu.as_index() % MAX_CPUS]
    }

    /// Makes `actor` runnable on `cpu`.
    pub fn ready_enqueue(&mut self, cpu: CpuId, actor: ActorId, prio: Prio) {
        let queue = self.queue(cpu);
        if queue.direct != Some(actor) {
            queue.ready.enqueue(actor, prio);
        }
    }

    /// Wakes `actor` and lets the scheduler decide; returns true when it
    /// dominates the running priority.
    pub fn deblock(&mut self, cpu: CpuId, actor: ActorId, prio: Prio, running: Prio) -> bool {
        self.ready_enqueue(cpu, actor, prio);
        let queue = self.queue(cpu);
        queue.stats.deblocks += 1;
        let preempt = prio.dominates(running);
        if preempt {
            queue.stats.preemptions += 1;
        }
        preempt
    }

    /// Hands the CPU straight to `actor`, ahead of everything queued.
    pub fn switch_to(&mut self, cpu: CpuId, actor: ActorId) {
        let queue = self.queue(cpu);
        queue.ready.remove(actor);
        if let Some(previous) = queue.direct.replace(actor) {
            queue.ready.enqueue(previous, Prio::MAX);
        }
        queue.stats.direct_switches += 1;
    }

    /// Next actor to run on `cpu`; becomes the current one.
    pub fn schedule(&mut self, cpu: CpuId) -> Option<ActorId> {
        let queue = self.queue(cpu);
        let next = queue.direct.take().or_else(|| queue.ready.dequeue_head());
        if next.is_some() {
            queue.current = next;
        }
        next
    }

    /// `actor` stopped running on `cpu`.
    pub fn block(&mut self, cpu: CpuId, actor: ActorId) {
        let queue = self.queue(cpu);
        if queue.current == Some(actor) {
            queue.current = None;
        }
    }

    pub fn current(&self, cpu: CpuId) -> Option<ActorId> {
        self.cpus[cpu.as_index() % MAX_CPUS].current
    }

    /// Removes every trace of `actor` (teardown).
    pub fn purge(&mut self, actor: ActorId) {
        for queue in self.cpus.iter_mut() {
            queue.ready.remove(actor);
            if queue.direct == Some(actor) {
                queue.direct = None;
            }
            if queue.current == Some(actor) {
                queue.current = None;
            }
        }
    }

    pub fn pending(&self, cpu: CpuId) -> usize {
        let queue = &self.cpus[cpu.as_index() % MAX_CPUS];
        queue.ready.len() + usize::from(queue.direct.is_some())
    }

    pub fn stats(&self, cpu: CpuId) -> SchedStats {
        self.cpus[cpu.as_index() % MAX_CPUS].stats
    }
}
