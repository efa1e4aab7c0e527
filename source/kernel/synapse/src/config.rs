// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel configuration for the IPC engine plus runtime knobs
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig (builder), timer_slack_us(), set_timer_slack_us()
//! DEPENDS_ON: core::sync::atomic, smp::MAX_CPUS
//! INVARIANTS: Config is immutable once a Kernel is built; knobs are Relaxed atomics with stable defaults
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
//!
//! `KernelConfig` fixes the shape of a kernel instance (CPU count, fast
//! path switches, capacities). The free functions below are process-wide
//! knobs that tests may turn while a kernel is running.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::smp::MAX_CPUS;

const DEFAULT_TIMER_SLACK_US: u64 = 0;

static TIMER_SLACK_US: AtomicU64 = AtomicU64::new(DEFAULT_TIMER_SLACK_US);

/// Timeouts whose deadline lies within this many microseconds of "now"
/// fire on the current tick.
#[inline]
pub fn timer_slack_us() -> u64 {
    TIMER_SLACK_US.load(Ordering::Relaxed)
}

/// Overrides the timer slack.
#[inline]
pub fn set_timer_slack_us(value: u64) {
    TIMER_SLACK_US.store(value, Ordering::Relaxed);
}

/// Static shape of a kernel instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of online CPUs (1..=MAX_CPUS).
    pub cpus: usize,
    /// Report failed fault IPC loudly (error level instead of debug).
    pub conservative: bool,
    /// Allow the rendezvous to switch directly to the partner.
    pub direct_switch: bool,
    /// Maximum number of live actors.
    pub max_actors: usize,
    /// Maximum number of live gates.
    pub max_gates: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { cpus: 1, conservative: false, direct_switch: true, max_actors: 256, max_gates: 256 }
    }
}

impl KernelConfig {
    #[must_use]
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.clamp(1, MAX_CPUS);
        self
    }

    #[must_use]
    pub fn with_conservative(mut self, conservative: bool) -> Self {
        self.conservative = conservative;
        self
    }

    #[must_use]
    pub fn with_direct_switch(mut self, direct_switch: bool) -> Self {
        self.direct_switch = direct_switch;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, max_actors: usize, max_gates: usize) -> Self {
        self.max_actors = max_actors;
        self.max_gates = max_gates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_count_is_clamped() {
        assert_eq!(KernelConfig::default().with_cpus(0).cpus, 1);
        assert_eq!(KernelConfig::default().with_cpus(64).cpus, MAX_CPUS);
        assert_eq!(KernelConfig::default().with_cpus(2).cpus, 2);
    }

    #[test]
    fn slack_defaults_to_exact_expiry() {
        // Other unit tests tick timeouts concurrently; only ever store the default here.
        set_timer_slack_us(DEFAULT_TIMER_SLACK_US);
        assert_eq!(timer_slack_us(), 0);
    }
}
