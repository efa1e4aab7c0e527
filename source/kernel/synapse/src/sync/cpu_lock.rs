// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel big lock expressed as an explicit guard.
//!
//! Every path that touches actor state holds a [`CpuGuard`]. The only way to
//! run code without the lock is [`CpuGuard::unlocked`], which re-acquires it
//! before returning, so the guard is always held again on every exit path.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

/// Lock protecting the kernel state `T`.
pub struct CpuLock<T> {
    inner: Mutex<T>,
}

impl<T> CpuLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: Mutex::new(value) }
    }

    pub fn lock(&self) -> CpuGuard<'_, T> {
        CpuGuard { lock: self, guard: Some(self.inner.lock()) }
    }

    /// True while some CPU holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Proof that the caller holds the big lock.
pub struct CpuGuard<'a, T> {
    lock: &'a CpuLock<T>,
    guard: Option<MutexGuard<'a, T>>,
}

impl<'a, T> CpuGuard<'a, T> {
    /// Runs `f` with the lock released and re-acquires it afterwards.
    ///
    /// State observed before the call may be stale afterwards; callers must
    /// re-validate every handle they keep across it.
    pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.guard = None;
        let result = f();
        self.guard = Some(self.lock.inner.lock());
        result
    }
}

impl<T> Deref for CpuGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("cpu lock accessed while released"),
        }
    }
}

impl<T> DerefMut for CpuGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.guard {
            Some(guard) => guard,
            None => unreachable!("cpu lock accessed while released"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocked_releases_and_reacquires() {
        let lock = CpuLock::new(1u32);
        let mut guard = lock.lock();
        *guard += 1;
        let observed = guard.unlocked(|| lock.is_locked());
        assert!(!observed);
        assert!(lock.is_locked());
        assert_eq!(*guard, 2);
        drop(guard);
        assert!(!lock.is_locked());
    }
}
