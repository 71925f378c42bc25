//! Block cache (spec.md §1, §4.2): "a block cache with read, release,
//! log_write semantics" is ambient infrastructure this crate owns, backed by
//! the external [`BlockDevice`](crate::hal::BlockDevice).
//!
//! Mirrors the teacher's two-level locking split (see `fs::inode`): a
//! spinlock-protected directory of `(dev, blockno, refcnt)` identities picks
//! or evicts a slot, and each slot's bytes are behind their own sleeplock so
//! disk I/O never happens while the directory lock is held.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use array_macro::array;

use crate::hal::{BlockDevice, BlockNo, TickSource, WaitChannel};
use crate::lock::{Sleeplock, SleeplockGuard, Spinlock};
use crate::param::{BSIZE, NBUF};

#[repr(align(4))]
pub struct BufData {
    pub inner: [u8; BSIZE],
}

impl BufData {
    const fn zeroed() -> Self {
        Self { inner: [0; BSIZE] }
    }
}

impl Deref for BufData {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BufData {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

struct Identity {
    dev: u32,
    blockno: BlockNo,
    refcnt: u32,
    valid: bool,
    last_use: u64,
}

impl Identity {
    const fn empty() -> Self {
        Self {
            dev: u32::MAX,
            blockno: BlockNo::MAX,
            refcnt: 0,
            valid: false,
            last_use: 0,
        }
    }
}

pub struct BufCache<'d> {
    dev: &'d dyn BlockDevice,
    ticks: &'d dyn TickSource,
    identity: Spinlock<[Identity; NBUF]>,
    body: [Sleeplock<BufData>; NBUF],
}

/// A reference to a cached block, not currently holding the per-slot body
/// lock. Cloning bumps the identity refcount; dropping decrements it.
pub struct BufUnlocked<'c, 'd> {
    cache: &'c BufCache<'d>,
    idx: usize,
}

/// A `BufUnlocked` whose body sleeplock is held, giving access to the bytes.
pub struct Buf<'c, 'd> {
    inner: ManuallyDrop<BufUnlocked<'c, 'd>>,
}

impl<'d> BufCache<'d> {
    pub fn new(dev: &'d dyn BlockDevice, ticks: &'d dyn TickSource, chan: &'static dyn WaitChannel) -> Self {
        Self {
            dev,
            ticks,
            identity: Spinlock::new(array![_ => Identity::empty(); NBUF]),
            body: array![_ => Sleeplock::new(chan, BufData::zeroed()); NBUF],
        }
    }

    /// Returns an unlocked handle to block `blockno` of `dev`, allocating a
    /// cache slot (evicting the least-recently-used unreferenced slot) if
    /// it is not already resident.
    ///
    /// Panics if every slot is pinned (`refcnt > 0`); the teacher's
    /// `bget` panics identically ("no buffers") rather than returning an
    /// error, since a full, all-pinned cache indicates a bug, not a
    /// recoverable condition.
    pub fn get<'c>(&'c self, dev: u32, blockno: BlockNo, holder: usize) -> BufUnlocked<'c, 'd> {
        let mut ids = self.identity.lock(holder);
        if let Some(idx) = ids
            .iter()
            .position(|id| id.refcnt > 0 && id.dev == dev && id.blockno == blockno)
        {
            ids[idx].refcnt += 1;
            return BufUnlocked { cache: self, idx };
        }

        let idx = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| id.refcnt == 0)
            .min_by_key(|(_, id)| id.last_use)
            .map(|(idx, _)| idx)
            .expect("BufCache::get: no buffers");

        ids[idx] = Identity {
            dev,
            blockno,
            refcnt: 1,
            valid: false,
            last_use: self.ticks.ticks(),
        };
        BufUnlocked { cache: self, idx }
    }

    /// Returns a locked buf with its content all zeroed, skipping the read
    /// from disk (used when formatting a block that is about to be fully
    /// overwritten, e.g. `fs::bitmap::zero_block`).
    pub fn get_and_clear<'c>(&'c self, dev: u32, blockno: BlockNo, holder: usize) -> Buf<'c, 'd> {
        let mut buf = self.get(dev, blockno, holder).lock(holder);
        buf.data_mut().inner = [0; BSIZE];
        buf.mark_valid();
        buf
    }
}

impl<'c, 'd> BufUnlocked<'c, 'd> {
    /// Consumes `self`, acquires the slot's body sleeplock, and reads from
    /// disk on first access.
    pub fn lock(self, holder: usize) -> Buf<'c, 'd> {
        let idx = self.idx;
        // SAFETY: `guard` below is immediately forgotten; `Buf::unlock`
        // reconstructs and drops it, so lock/unlock stay paired.
        let mut guard: SleeplockGuard<'_, BufData> = self.cache.body[idx].lock(holder);
        let valid = {
            let ids = self.cache.identity.lock(holder);
            ids[idx].valid
        };
        if !valid {
            let (dev, blockno) = {
                let ids = self.cache.identity.lock(holder);
                (ids[idx].dev, ids[idx].blockno)
            };
            self.cache.dev.read(dev, blockno, &mut guard.inner);
            self.cache.identity.lock(holder)[idx].valid = true;
        }
        core::mem::forget(guard);
        Buf {
            inner: ManuallyDrop::new(self),
        }
    }

    pub fn blockno(&self, holder: usize) -> BlockNo {
        self.cache.identity.lock(holder)[self.idx].blockno
    }
}

impl<'c, 'd> Clone for BufUnlocked<'c, 'd> {
    fn clone(&self) -> Self {
        // Safe upper bound: identity lock token 0 is used only to serialize
        // the refcount bump; any live holder may call `clone`.
        self.cache.identity.lock(0)[self.idx].refcnt += 1;
        BufUnlocked {
            cache: self.cache,
            idx: self.idx,
        }
    }
}

impl<'c, 'd> Drop for BufUnlocked<'c, 'd> {
    fn drop(&mut self) {
        let mut ids = self.cache.identity.lock(0);
        ids[self.idx].refcnt -= 1;
    }
}

impl<'c, 'd> Buf<'c, 'd> {
    fn slot(&self) -> &Sleeplock<BufData> {
        &self.inner.cache.body[self.inner.idx]
    }

    pub fn data(&self) -> &BufData {
        // SAFETY: the body sleeplock is held for the lifetime of this `Buf`.
        unsafe { &*self.slot().get_mut_unchecked() }
    }

    pub fn data_mut(&mut self) -> &mut BufData {
        unsafe { &mut *self.slot().get_mut_unchecked() }
    }

    pub fn mark_valid(&mut self) {
        let idx = self.inner.idx;
        self.inner.cache.identity.lock(0)[idx].valid = true;
    }

    pub fn blockno(&self) -> BlockNo {
        let idx = self.inner.idx;
        self.inner.cache.identity.lock(0)[idx].blockno
    }

    pub fn write_back(&mut self) {
        let idx = self.inner.idx;
        let dev = self.inner.cache.identity.lock(0)[idx].dev;
        let blockno = self.blockno();
        let data = self.data();
        self.inner.cache.dev.write(dev, blockno, &data.inner);
    }

    /// Releases the body lock and returns to an unlocked handle.
    pub fn unlock(mut self) -> BufUnlocked<'c, 'd> {
        // SAFETY: `lock()` acquired this slot's sleeplock and forgot the
        // guard; this is the matching release.
        unsafe { self.slot().force_unlock() };
        // SAFETY: `self` is being consumed and not accessed again.
        let inner = unsafe { ManuallyDrop::take(&mut self.inner) };
        core::mem::forget(self);
        inner
    }
}

impl<'c, 'd> Drop for Buf<'c, 'd> {
    fn drop(&mut self) {
        // SAFETY: see `unlock`; dropping without calling `unlock` first
        // still owes the slot one release.
        unsafe { self.slot().force_unlock() };
    }
}
