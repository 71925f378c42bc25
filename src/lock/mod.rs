//! Lock primitives (spec.md §5).
//!
//! Three flavors, matching the lock hierarchy spec.md §5 requires:
//! [`Spinlock`] busy-waits and must never be held across a sleep;
//! [`Sleepablelock`] is a spinlock-protected value whose guard can also park
//! the calling process on a `WaitChannel` and be woken later (used by
//! `fs::log`'s commit protocol); [`Sleeplock`] is a long-held, pid-tagged
//! lock for i-node bodies that may be held across disk I/O. Every named lock
//! in the hierarchy (`icache.lock`, `smap_lock`, `pflock`, `kmem.lock`,
//! the IPT and TLB tables, ...) guards exactly one table, so none of them
//! need to share a single raw lock across distinct `Lock<R, T>` values.
//!
//! The teacher's version of this module threads a global `kernel_builder()`
//! singleton through `RawSpinlock` to find the current CPU's push_off/pop_off
//! nesting counters. This crate has no such singleton (spec.md §1 puts the
//! scheduler and trap vectors out of scope), so every raw lock instead takes
//! an explicit `holder: usize` token at `lock()` time: the caller's CPU id
//! for spinlocks, its pid for sleep-based locks. This also drops the
//! interrupt-disable discipline `push_off`/`pop_off` implement in the
//! teacher, since without trap vectors there is no interrupt handler that
//! could re-enter a held spinlock on the same core.

pub mod sleepablelock;
pub mod sleeplock;
pub mod spinlock;

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub use sleepablelock::{RawSleepablelock, Sleepablelock, SleepablelockGuard};
pub use sleeplock::{RawSleeplock, Sleeplock, SleeplockGuard};
pub use spinlock::{RawSpinlock, Spinlock};

/// A lock that does not by itself know what it protects.
///
/// `lock`/`unlock` are always paired by a [`Guard`]; nothing outside this
/// module calls them directly.
pub trait RawLock {
    /// Blocks until the lock is acquired by `holder`, then returns.
    fn lock(&self, holder: usize);

    /// Releases the lock. The caller must currently hold it.
    fn unlock(&self);

    /// `Some(holder)` if currently held, identifying who holds it.
    fn holding(&self) -> Option<usize>;
}

/// A lock paired with the data it protects.
pub struct Lock<R: RawLock, T> {
    raw: R,
    data: UnsafeCell<T>,
}

unsafe impl<R: RawLock + Sync, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    pub const fn from_raw(raw: R, data: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self, holder: usize) -> Guard<'_, R, T> {
        self.raw.lock(holder);
        Guard { lock: self }
    }

    pub fn holding(&self) -> Option<usize> {
        self.raw.holding()
    }

    /// Returns a raw pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// The caller must independently ensure exclusive or read-only access,
    /// e.g. because `self` is being constructed or torn down.
    pub unsafe fn get_mut_unchecked(&self) -> *mut T {
        self.data.get()
    }

    /// Releases the lock without going through a `Guard`.
    ///
    /// # Safety
    ///
    /// The caller must have acquired the lock and then `mem::forget`-ten the
    /// `Guard` it got back, e.g. to hold the lock across a type boundary a
    /// borrowed `Guard` could not cross (see `bio::Buf`).
    pub unsafe fn force_unlock(&self) {
        self.raw.unlock();
    }
}

/// RAII guard: releases the lock when dropped.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<'s, R: RawLock, T> Guard<'s, R, T> {
    pub fn raw_lock(&self) -> &'s Lock<R, T> {
        self.lock
    }
}

impl<'s, R: RawLock, T> Deref for Guard<'s, R, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'s, R: RawLock, T> DerefMut for Guard<'s, R, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'s, R: RawLock, T> Drop for Guard<'s, R, T> {
    fn drop(&mut self) {
        self.lock.raw.unlock();
    }
}
