//! Spinlocks whose guard can additionally sleep (spec.md §5), used by
//! `fs::log`'s commit protocol: a transaction blocked on log space parks on
//! the log's `WaitChannel` until `end_op` of another transaction wakes it.
use super::spinlock::RawSpinlock;
use super::{Guard, Lock, RawLock};
use crate::hal::WaitChannel;

/// A spinlock plus a `WaitChannel` its guard can park on.
pub struct RawSleepablelock {
    lock: RawSpinlock,
    chan: &'static dyn WaitChannel,
}

/// Similar to [`Spinlock`](super::Spinlock), but guards of this lock can
/// `sleep()`/`wakeup()`.
pub type Sleepablelock<T> = Lock<RawSleepablelock, T>;
/// Guards of `Sleepablelock<T>`.
pub type SleepablelockGuard<'s, T> = Guard<'s, RawSleepablelock, T>;

impl RawSleepablelock {
    pub const fn new(chan: &'static dyn WaitChannel) -> Self {
        Self {
            lock: RawSpinlock::new(),
            chan,
        }
    }
}

impl RawLock for RawSleepablelock {
    fn lock(&self, holder: usize) {
        self.lock.lock(holder);
    }

    fn unlock(&self) {
        self.lock.unlock();
    }

    fn holding(&self) -> Option<usize> {
        self.lock.holding()
    }
}

impl<T> Sleepablelock<T> {
    pub const fn new(chan: &'static dyn WaitChannel, data: T) -> Self {
        Lock::from_raw(RawSleepablelock::new(chan), data)
    }
}

impl<'s, T> SleepablelockGuard<'s, T> {
    /// Atomically releases the lock and parks on its channel, then
    /// re-acquires the lock before returning.
    ///
    /// # Safety
    ///
    /// `holder` must be the same token this guard was locked with, so the
    /// lock can be correctly re-acquired.
    pub unsafe fn sleep(&self, holder: usize) {
        let raw = &self.lock.raw;
        unsafe {
            raw.chan
                .sleep(&mut || raw.lock.unlock(), &mut || raw.lock.lock(holder));
        }
    }

    pub fn wakeup(&self) {
        self.lock.raw.chan.wakeup();
    }
}
