// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Priority-inheriting lock with helping (switch lock)
//! OWNERS: @kernel-sync-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 6 unit tests (state machine, helping, invalidation, host-thread mutual exclusion)
//! PUBLIC API: SwitchLock, TryLock, LockStatus, Donate, Donation
//! DEPENDS_ON: types::ActorId, core::sync::atomic
//! INVARIANTS: at most one holder; try_lock never blocks; Invalid is sticky once set
//!
//! A contended `lock` does not spin idle: the caller donates its CPU to the
//! current owner through [`Donate`] so the owner can progress to its unlock.
//! If the owner cannot run right now the caller parks as the owner's helper
//! and is handed back by `unlock`.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::ActorId;

const FREE: u64 = 0;
const INVALID: u64 = 1 << 63;
const OWNER_MASK: u64 = !INVALID;

/// Result of a non-blocking acquisition attempt.
#[must_use = "lock attempts must be checked"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLock {
    Acquired,
    AlreadyHeld,
    Busy(ActorId),
    Invalid,
}

/// Result of [`SwitchLock::lock`].
#[must_use = "lock status must be checked"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    AlreadyHeld,
    Invalid,
    /// Caller is parked as helper of the owner and resumes after its unlock.
    Helping(ActorId),
}

/// What happened to the donated CPU time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Donation {
    /// The owner ran (and may have released the lock); retry.
    Ran,
    /// The owner is blocked elsewhere; the helper must suspend.
    Parked,
}

/// Lends the caller's execution to the lock owner.
pub trait Donate {
    fn donate(&mut self, helper: ActorId, owner: ActorId) -> Donation;
}

/// Donor that never runs anybody; contention always parks.
pub struct NoDonor;

impl Donate for NoDonor {
    fn donate(&mut self, _helper: ActorId, _owner: ActorId) -> Donation {
        Donation::Parked
    }
}

/// Owner word (`0` free, actor raw handle otherwise, bit 63 invalid) plus
/// the most recent helper.
#[derive(Debug, Default)]
pub struct SwitchLock {
    word: AtomicU64,
    helper: AtomicU64,
}

impl SwitchLock {
    pub const fn new() -> Self {
        Self { word: AtomicU64::new(FREE), helper: AtomicU64::new(FREE) }
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<ActorId> {
        let owner = self.word.load(Ordering::Acquire) & OWNER_MASK;
        (owner != FREE).then(|| ActorId::from_raw(owner))
    }

    pub fn is_invalid(&self) -> bool {
        self.word.load(Ordering::Acquire) & INVALID != 0
    }

    pub fn try_lock(&self, me: ActorId) -> TryLock {
        match self.word.compare_exchange(FREE, me.raw(), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => TryLock::Acquired,
            Err(word) if word & INVALID != 0 => TryLock::Invalid,
            Err(word) if word == me.raw() => TryLock::AlreadyHeld,
            Err(word) => TryLock::Busy(ActorId::from_raw(word & OWNER_MASK)),
        }
    }

    /// Acquires the lock, helping the owner while it is contended.
    pub fn lock(&self, me: ActorId, donor: &mut impl Donate) -> LockStatus {
        loop {
            match self.try_lock(me) {
                TryLock::Acquired => return LockStatus::Acquired,
                TryLock::AlreadyHeld => return LockStatus::AlreadyHeld,
                TryLock::Invalid => return LockStatus::Invalid,
                TryLock::Busy(owner) => {
                    self.helper.store(me.raw(), Ordering::Release);
                    match donor.donate(me, owner) {
                        Donation::Ran => continue,
                        Donation::Parked => return LockStatus::Helping(owner),
                    }
                }
            }
        }
    }

    /// Releases the lock and returns the helper the CPU should go back to.
    /// An invalidated lock stays invalid.
    pub fn unlock(&self, me: ActorId) -> Option<ActorId> {
        let mut word = self.word.load(Ordering::Acquire);
        loop {
            if word & OWNER_MASK != me.raw() {
                return None;
            }
            match self.word.compare_exchange_weak(
                word,
                word & INVALID,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => word = current,
            }
        }
        let helper = self.helper.swap(FREE, Ordering::AcqRel);
        (helper != FREE && helper != me.raw()).then(|| ActorId::from_raw(helper))
    }

    /// Marks the lock invalid. Returns false when it already was.
    pub fn invalidate(&self) -> bool {
        self.word.fetch_or(INVALID, Ordering::AcqRel) & INVALID == 0
    }

    /// Waits until the owner of an invalidated lock has left. If `me` is the
    /// owner the lock is simply released. Returns false when the owner could
    /// not run and the caller has to retry later.
    pub fn wait_free(&self, me: ActorId, donor: &mut impl Donate) -> bool {
        loop {
            let word = self.word.load(Ordering::Acquire);
            let owner = word & OWNER_MASK;
            if owner == FREE {
                return true;
            }
            if owner == me.raw() {
                self.word.store(word & INVALID, Ordering::Release);
                return true;
            }
            match donor.donate(me, ActorId::from_raw(owner)) {
                Donation::Ran => continue,
                Donation::Parked => return false,
            }
        }
    }
}
