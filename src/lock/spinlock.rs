//! Spin locks (spec.md §5: "the spinlock kind must not sleep while held").
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{Guard, Lock, RawLock};

const NONE: usize = usize::MAX;

/// Mutual exclusion lock that busy waits (spin).
///
/// `locked` holds the holder token (a cpu id) passed to `lock()`, or `NONE`.
pub struct RawSpinlock {
    locked: AtomicUsize,
}

/// Locks that busy wait (spin).
pub type Spinlock<T> = Lock<RawSpinlock, T>;
/// Guards of `Spinlock<T>`.
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

impl RawLock for RawSpinlock {
    /// Loops (spins) until the lock is acquired.
    ///
    /// Ordering: an atomic exchange with `Acquire` on success here is paired
    /// with the `Release` store in `unlock()`, so everything a previous
    /// holder wrote before releasing is visible to this holder after
    /// acquiring.
    fn lock(&self, holder: usize) {
        debug_assert_ne!(holder, NONE);
        while self
            .locked
            .compare_exchange(NONE, holder, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn unlock(&self) {
        self.locked.store(NONE, Ordering::Release);
    }

    fn holding(&self) -> Option<usize> {
        match self.locked.load(Ordering::Relaxed) {
            NONE => None,
            holder => Some(holder),
        }
    }
}

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicUsize::new(NONE),
        }
    }
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Lock::from_raw(RawSpinlock::new(), data)
    }
}
