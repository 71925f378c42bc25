//! Long-term, pid-tagged locks (spec.md §5) for i-node bodies, which may be
//! held across disk I/O and therefore must not busy-wait.
use super::{Guard, Lock, RawLock, Sleepablelock};
use crate::hal::WaitChannel;

const NONE: usize = usize::MAX;

/// Holder pid, or `NONE` if unlocked, itself protected by a spinlock so
/// `lock`/`unlock` can check-and-set atomically before sleeping.
pub struct RawSleeplock {
    holder: Sleepablelock<usize>,
}

/// Locks that sleep instead of busy wait.
pub type Sleeplock<T> = Lock<RawSleeplock, T>;
pub type SleeplockGuard<'s, T> = Guard<'s, RawSleeplock, T>;

impl RawSleeplock {
    pub const fn new(chan: &'static dyn WaitChannel) -> Self {
        Self {
            holder: Sleepablelock::new(chan, NONE),
        }
    }
}

impl RawLock for RawSleeplock {
    fn lock(&self, holder: usize) {
        debug_assert_ne!(holder, NONE);
        // Token `0` identifies whichever core is running this process for
        // the purpose of the inner spinlock; sleeplocks are long-held and
        // may migrate across cores between acquire attempts.
        let mut guard = self.holder.lock(0);
        while *guard != NONE {
            // SAFETY: `guard` was locked with holder token `0` above.
            unsafe { guard.sleep(0) };
        }
        *guard = holder;
    }

    fn unlock(&self) {
        let mut guard = self.holder.lock(0);
        *guard = NONE;
        guard.wakeup();
    }

    fn holding(&self) -> Option<usize> {
        let guard = self.holder.lock(0);
        match *guard {
            NONE => None,
            holder => Some(holder),
        }
    }
}

impl<T> Sleeplock<T> {
    pub const fn new(chan: &'static dyn WaitChannel, data: T) -> Self {
        Lock::from_raw(RawSleeplock::new(chan), data)
    }
}
