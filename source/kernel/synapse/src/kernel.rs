// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel instance: big-locked state, per-CPU execution environment, public entry points
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests below + integration scenarios (tests/)
//! PUBLIC API: Kernel (actors, gates, invoke, faults, tick/poll, inspection), KernelError
//! DEPENDS_ON: sync::cpu_lock (big lock), smp (DRQs), sync::rcu, hal::Timer, mm::Mapper
//! INVARIANTS: every state transition happens under the CpuGuard; the mapper and timer live
//!             outside the lock so transfers can release it; one entry point = one CPU
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use crate::actor::{self, Actor, ActorSpec, Continuation, FpuState, ThreadState};
use crate::arena::Arena;
use crate::cap::CapError;
use crate::config::{self, KernelConfig};
use crate::hal::Timer;
use crate::ipc::fault::{self, ExceptionFrame, FaultReport};
use crate::ipc::gate::{self, Gate};
use crate::ipc::timeout::TimeoutQueue;
use crate::ipc::trace::{TraceEvent, TraceRing};
use crate::ipc::utcb::Utcb;
use crate::ipc::{remote, rendezvous, IpcResult, IpcStatus};
use crate::mm::Mapper;
use crate::sched::{SchedStats, Scheduler};
use crate::smp::{Drq, Smp, MAX_CPUS};
use crate::sync::cpu_lock::{CpuGuard, CpuLock};
use crate::sync::rcu::Rcu;
use crate::syscall::{self, SyscallFrame};
use crate::types::{ActorId, CpuId, GateId, Prio};

/// Error returned by kernel entry points. IPC failures are not reported
/// here; they travel in the IPC result.
#[must_use = "kernel errors must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Actor handle is stale or the actor is dead.
    NoSuchActor,
    /// Gate handle is stale or the gate was destroyed.
    NoSuchGate,
    /// The actor is mid-IPC (past waiting) or already handling a fault.
    ActorBusy,
    /// The object is locked by someone else; retry later.
    Busy,
    /// Actor table is full.
    OutOfActors,
    /// Gate table is full.
    OutOfGates,
    /// CPU is not online.
    InvalidCpu,
    /// Capability operation failed.
    Capability(CapError),
}

impl From<CapError> for KernelError {
    fn from(value: CapError) -> Self {
        Self::Capability(value)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Everything guarded by the big lock.
pub struct KernelState {
    pub(crate) actors: Arena<Actor>,
    pub(crate) gates: Arena<Gate>,
    pub(crate) sched: Scheduler,
    pub(crate) timeouts: [TimeoutQueue; MAX_CPUS],
    /// Binders suspended until their grace period ends.
    pub(crate) grace_waiters: Vec<ActorId>,
    /// Destroyed gates waiting for their last binding to be reclaimed.
    pub(crate) dying_gates: Vec<GateId>,
    pub(crate) trace: TraceRing,
}
// Every CPU's entry points reach this state through the big lock.
static_assertions::assert_impl_all!(KernelState: Send);

impl KernelState {
    fn new(config: &KernelConfig) -> Self {
        Self {
            actors: Arena::with_capacity(config.max_actors),
            gates: Arena::with_capacity(config.max_gates),
            sched: Scheduler::new(),
            timeouts: core::array::from_fn(|_| TimeoutQueue::new()),
            grace_waiters: Vec::new(),
            dying_gates: Vec::new(),
            trace: TraceRing::new(),
        }
    }

    pub(crate) fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(id.handle())
    }

    pub(crate) fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(id.handle())
    }

    pub(crate) fn actor_pair_mut(&mut self, a: ActorId, b: ActorId) -> Option<(&mut Actor, &mut Actor)> {
        self.actors.pair_mut(a.handle(), b.handle())
    }

    pub(crate) fn gate(&self, id: GateId) -> Option<&Gate> {
        self.gates.get(id.handle())
    }

    pub(crate) fn gate_mut(&mut self, id: GateId) -> Option<&mut Gate> {
        self.gates.get_mut(id.handle())
    }

    /// Live (not dead) actor.
    pub(crate) fn alive(&self, id: ActorId) -> bool {
        self.actor(id).map_or(false, |actor| !actor.is_dead())
    }

    /// Effective priority of whoever runs on `cpu`.
    pub(crate) fn running_prio(&self, cpu: CpuId) -> Prio {
        self.sched
            .current(cpu)
            .and_then(|current| self.actor(current))
            .map_or(Prio::IDLE, Actor::effective_prio)
    }

    /// Arms a timeout for `id` on its home CPU.
    pub(crate) fn arm_timeout(&mut self, id: ActorId, deadline_us: u64) {
        let Some(cpu) = self.actor(id).map(|actor| actor.cpu) else {
            return;
        };
        let handle = self.timeouts[cpu.as_index() % MAX_CPUS].arm(id, deadline_us);
        if let Some(actor) = self.actor_mut(id) {
            actor.timeout = Some(handle);
        }
    }

    /// Disarms the pending timeout of `id`, if any.
    pub(crate) fn disarm_timeout(&mut self, id: ActorId) {
        let Some(actor) = self.actor_mut(id) else {
            return;
        };
        let cpu = actor.cpu;
        if let Some(handle) = actor.timeout.take() {
            let _ = self.timeouts[cpu.as_index() % MAX_CPUS].disarm(handle);
        }
    }
}

pub(crate) type Guard<'a> = CpuGuard<'a, KernelState>;

/// Per-entry execution environment: the CPU the request runs on plus the
/// collaborators that live outside the big lock.
#[derive(Clone, Copy)]
pub(crate) struct Env<'k> {
    pub cpu: CpuId,
    pub mapper: &'k dyn Mapper,
    pub timer: &'k dyn Timer,
    pub smp: &'k Smp,
    pub rcu: &'k Rcu,
    pub config: &'k KernelConfig,
}

impl Env<'_> {
    /// Monotonic time in microseconds.
    pub fn now_us(&self) -> u64 {
        self.timer.now() / 1_000
    }
}

/// Resumes every actor made runnable on `env.cpu` until nothing moves.
pub(crate) fn run_ready(g: &mut Guard<'_>, env: &Env<'_>) {
    loop {
        while let Some(next) = g.sched.schedule(env.cpu) {
            rendezvous::resume(g, env, next);
        }
        if !gate::poll_grace(g, env) {
            break;
        }
    }
}

/// The IPC engine of one machine.
pub struct Kernel<M: Mapper, T: Timer> {
    state: CpuLock<KernelState>,
    mapper: M,
    timer: T,
    smp: Smp,
    rcu: Rcu,
    config: KernelConfig,
}

impl<M: Mapper, T: Timer> Kernel<M, T> {
    pub fn new(config: KernelConfig, mapper: M, timer: T) -> Self {
        log_info!(
            target: "kernel",
            "ipc engine up: {} cpu(s), direct switch {}",
            config.cpus,
            config.direct_switch
        );
        Self {
            state: CpuLock::new(KernelState::new(&config)),
            mapper,
            timer,
            smp: Smp::new(config.cpus),
            rcu: Rcu::new(),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn rcu(&self) -> &Rcu {
        &self.rcu
    }

    pub fn smp(&self) -> &Smp {
        &self.smp
    }

    fn env(&self, cpu: CpuId) -> Result<Env<'_>, KernelError> {
        if !self.smp.is_online(cpu) {
            return Err(KernelError::InvalidCpu);
        }
        Ok(Env {
            cpu,
            mapper: &self.mapper,
            timer: &self.timer,
            smp: &self.smp,
            rcu: &self.rcu,
            config: &self.config,
        })
    }

    fn home_cpu(g: &Guard<'_>, actor: ActorId) -> Result<CpuId, KernelError> {
        match g.actor(actor) {
            Some(record) if !record.is_dead() => Ok(record.cpu),
            _ => Err(KernelError::NoSuchActor),
        }
    }

    /// Result of an entry point that may have suspended `actor`.
    fn status_of(g: &mut Guard<'_>, actor: ActorId) -> IpcStatus {
        match g.actor_mut(actor) {
            Some(record) if record.is_idle() => {
                record.result.take().map_or(IpcStatus::Blocked, IpcStatus::Completed)
            }
            _ => IpcStatus::Blocked,
        }
    }

    // ——— actors ———

    pub fn create_actor(&self, spec: ActorSpec) -> Result<ActorId, KernelError> {
        let env = self.env(spec.cpu)?;
        let mut g = self.state.lock();
        actor::create(&mut g, &env, spec)
    }

    /// Tears `victim` down; senders queued on it fail with `NotExistent`.
    pub fn destroy_actor(&self, victim: ActorId) -> Result<(), KernelError> {
        let mut g = self.state.lock();
        let env = self.env(Self::home_cpu(&g, victim)?)?;
        actor::destroy(&mut g, &env, victim)?;
        run_ready(&mut g, &env);
        Ok(())
    }

    // ——— gates ———

    pub fn create_gate(&self) -> Result<GateId, KernelError> {
        let mut g = self.state.lock();
        gate::create(&mut g)
    }

    /// Severs the binding and fails every waiter with `NotExistent`.
    pub fn destroy_gate(&self, gate: GateId) -> Result<(), KernelError> {
        let mut g = self.state.lock();
        let env = self.env(CpuId::BOOT)?;
        gate::destroy(&mut g, &env, gate)?;
        run_ready(&mut g, &env);
        Ok(())
    }

    // ——— IPC ———

    /// Capability invocation on behalf of `actor` with the message already
    /// staged in its UTCB.
    pub fn invoke(&self, actor: ActorId, frame: SyscallFrame) -> Result<IpcStatus, KernelError> {
        let mut g = self.state.lock();
        let env = self.env(Self::home_cpu(&g, actor)?)?;
        let progress = syscall::dispatch(&mut g, &env, actor, frame)?;
        log_trace!(target: "ipc", "{} invoke -> {:?}", actor, progress);
        run_ready(&mut g, &env);
        Ok(Self::status_of(&mut g, actor))
    }

    /// Result of a previously blocked IPC, once it completed.
    pub fn take_result(&self, actor: ActorId) -> Option<IpcResult> {
        let mut g = self.state.lock();
        let record = g.actor_mut(actor)?;
        if !record.is_idle() {
            return None;
        }
        record.result.take()
    }

    /// Cancels the pending IPC of `actor` on its home CPU.
    pub fn cancel(&self, actor: ActorId) -> Result<(), KernelError> {
        let mut g = self.state.lock();
        let env = self.env(Self::home_cpu(&g, actor)?)?;
        rendezvous::cancel_local(&mut g, &env, actor);
        run_ready(&mut g, &env);
        Ok(())
    }

    /// Cancels from `cpu`: locally when `actor` lives there, else through
    /// a remote request to its home CPU.
    pub fn cancel_from(&self, cpu: CpuId, actor: ActorId) -> Result<(), KernelError> {
        let home = {
            let g = self.state.lock();
            Self::home_cpu(&g, actor)?
        };
        if home == cpu {
            return self.cancel(actor);
        }
        if self.smp.post(home, Drq::Cancel { actor }) {
            Ok(())
        } else {
            Err(KernelError::InvalidCpu)
        }
    }

    // ——— faults ———

    /// Reflects a page fault of `actor` to its pager. `None` while the
    /// pager has not answered yet.
    pub fn page_fault(
        &self,
        actor: ActorId,
        pfa: u64,
        error_code: u64,
        pc: u64,
    ) -> Result<Option<FaultReport>, KernelError> {
        let mut g = self.state.lock();
        let env = self.env(Self::home_cpu(&g, actor)?)?;
        let _ = fault::page_fault(&mut g, &env, actor, pfa, error_code, pc)?;
        run_ready(&mut g, &env);
        Ok(g.actor_mut(actor).and_then(|record| record.fault_report.take()))
    }

    /// Reflects an exception of `actor` to its exception handler.
    pub fn exception(&self, actor: ActorId, frame: ExceptionFrame) -> Result<Option<FaultReport>, KernelError> {
        let mut g = self.state.lock();
        let env = self.env(Self::home_cpu(&g, actor)?)?;
        let _ = fault::exception(&mut g, &env, actor, frame)?;
        run_ready(&mut g, &env);
        Ok(g.actor_mut(actor).and_then(|record| record.fault_report.take()))
    }

    /// Outcome of a fault IPC that blocked.
    pub fn take_fault(&self, actor: ActorId) -> Option<FaultReport> {
        let mut g = self.state.lock();
        g.actor_mut(actor)?.fault_report.take()
    }

    // ——— time and remote requests ———

    /// Fires due timeouts of `cpu`, resumes woken actors and reprograms the
    /// wakeup. Returns the number of fired timeouts.
    pub fn tick(&self, cpu: CpuId) -> Result<usize, KernelError> {
        let env = self.env(cpu)?;
        let mut g = self.state.lock();
        let now = env.now_us().saturating_add(config::timer_slack_us());
        let fired = g.timeouts[cpu.as_index()].expire(now);
        for actor in &fired {
            rendezvous::expire_timeout(&mut g, &env, *actor);
        }
        run_ready(&mut g, &env);
        let next = g.timeouts[cpu.as_index()].next_deadline();
        self.timer.set_wakeup(next.map_or(u64::MAX, |us| us.saturating_mul(1_000)));
        Ok(fired.len())
    }

    /// Executes the remote requests queued for `cpu`.
    pub fn handle_drqs(&self, cpu: CpuId) -> Result<usize, KernelError> {
        let env = self.env(cpu)?;
        let drqs = self.smp.drain(cpu);
        let mut g = self.state.lock();
        for drq in &drqs {
            remote::handle_drq(&mut g, &env, *drq);
        }
        run_ready(&mut g, &env);
        Ok(drqs.len())
    }

    /// One round of background work on `cpu`: remote requests, then timeouts.
    pub fn poll(&self, cpu: CpuId) -> Result<usize, KernelError> {
        Ok(self.handle_drqs(cpu)? + self.tick(cpu)?)
    }

    // ——— inspection ———

    pub fn with_utcb<R>(&self, actor: ActorId, f: impl FnOnce(&mut Utcb) -> R) -> Result<R, KernelError> {
        let mut g = self.state.lock();
        let record = g.actor_mut(actor).ok_or(KernelError::NoSuchActor)?;
        Ok(f(&mut record.utcb))
    }

    pub fn state_of(&self, actor: ActorId) -> Option<ThreadState> {
        self.state.lock().actor(actor).map(Actor::state)
    }

    pub fn continuation_of(&self, actor: ActorId) -> Option<Continuation> {
        self.state.lock().actor(actor).map(Actor::continuation)
    }

    /// Senders queued on `actor`, in service order.
    pub fn queued_senders(&self, actor: ActorId) -> Vec<ActorId> {
        let g = self.state.lock();
        g.actor(actor).map_or_else(Vec::new, |record| record.senders.lock().iter().collect())
    }

    /// Actor a reply from `actor` would go to.
    pub fn caller_of(&self, actor: ActorId) -> Option<ActorId> {
        self.state.lock().actor(actor).and_then(|record| record.caller).map(|cap| cap.actor)
    }

    /// Current `(destination, label)` of a gate.
    pub fn gate_binding(&self, gate: GateId) -> Option<(Option<ActorId>, u64)> {
        let g = self.state.lock();
        let record = g.gate(gate)?;
        let binding = record.current(&self.rcu, CpuId::BOOT);
        Some((binding.dest, binding.label))
    }

    /// Invokers parked on an unbound gate.
    pub fn gate_waiters(&self, gate: GateId) -> usize {
        self.state.lock().gate(gate).map_or(0, |record| record.waiters.lock().len())
    }

    pub fn set_fpu(&self, actor: ActorId, fpu: FpuState) -> Result<(), KernelError> {
        let mut g = self.state.lock();
        g.actor_mut(actor).ok_or(KernelError::NoSuchActor)?.fpu = fpu;
        Ok(())
    }

    pub fn fpu(&self, actor: ActorId) -> Option<FpuState> {
        self.state.lock().actor(actor).map(|record| record.fpu)
    }

    pub fn sched_stats(&self, cpu: CpuId) -> SchedStats {
        self.state.lock().sched.stats(cpu)
    }

    /// Timeouts armed on `cpu`.
    pub fn armed_timeouts(&self, cpu: CpuId) -> usize {
        if cpu.as_index() >= MAX_CPUS {
            return 0;
        }
        self.state.lock().timeouts[cpu.as_index()].len()
    }

    pub fn actor_count(&self) -> usize {
        self.state.lock().actors.len()
    }

    pub fn gate_count(&self) -> usize {
        self.state.lock().gates.len()
    }

    /// Recorded IPC events, oldest first (empty without `ipc_trace_ring`).
    pub fn trace_events(&self) -> Vec<TraceEvent> {
        self.state.lock().trace.events()
    }

    /// Writes the IPC trace ring to the log.
    pub fn dump_trace(&self) {
        self.state.lock().trace.dump();
    }
}
