// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

use core::sync::atomic::{AtomicU64, Ordering};

/// Abstraction for a monotonic timer.
pub trait Timer: Send + Sync {
    /// Returns the current time in nanoseconds.
    fn now(&self) -> u64;
    /// Programs the next wake-up time in nanoseconds.
    fn set_wakeup(&self, deadline: u64);
}

/// Software clock advanced explicitly; used on the host and in tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
    wakeup_ns: AtomicU64,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self { now_ns: AtomicU64::new(0), wakeup_ns: AtomicU64::new(u64::MAX) }
    }

    /// Moves time forward by `us` microseconds.
    pub fn advance_us(&self, us: u64) {
        self.now_ns.fetch_add(us.saturating_mul(1_000), Ordering::AcqRel);
    }

    /// Last wake-up the kernel asked for (`u64::MAX` when none is pending).
    pub fn wakeup(&self) -> u64 {
        self.wakeup_ns.load(Ordering::Acquire)
    }
}

impl Timer for ManualClock {
    fn now(&self) -> u64 {
        self.now_ns.load(Ordering::Acquire)
    }

    fn set_wakeup(&self, deadline: u64) {
        self.wakeup_ns.store(deadline, Ordering::Release);
    }
}

/// `time` CSR clock programmed through the SBI timer extension.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub struct SbiClock {
    ticks_per_us: u64,
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
impl SbiClock {
    /// QEMU `virt` runs the timebase at 10 MHz.
    pub const fn virt() -> Self {
        Self { ticks_per_us: 10 }
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
impl Timer for SbiClock {
    fn now(&self) -> u64 {
        let ticks = riscv::register::time::read() as u64;
        ticks.saturating_mul(1_000) / self.ticks_per_us
    }

    fn set_wakeup(&self, deadline: u64) {
        let ticks = deadline.saturating_mul(self.ticks_per_us) / 1_000;
        let _ = sbi_rt::set_timer(ticks);
    }
}
