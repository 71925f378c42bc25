//! External collaborators (spec.md §1, §6).
//!
//! These traits are the seams between this crate's filesystem/MMU core and
//! the rest of a kernel: the disk driver, the scheduler's sleep/wakeup
//! primitive, and the process table. The core consumes them; it does not
//! implement them.

use crate::param::BSIZE;

/// Device number + block number identify a block uniquely across the one
/// device this crate's Non-goals restrict it to (spec.md §1: no multi-disk
/// support).
pub type BlockNo = u32;

/// A raw block device: read/write fixed `BSIZE`-byte blocks.
///
/// The block *cache* (`bio::BufCache`) is ambient infrastructure this crate
/// owns (spec.md §1: "The core consumes from them: a block cache with read,
/// release, log_write semantics"); the raw device underneath it is external.
pub trait BlockDevice: Sync {
    /// Reads block `bno` of `dev` into `buf`, which must be exactly
    /// `BSIZE` bytes.
    fn read(&self, dev: u32, bno: BlockNo, buf: &mut [u8; BSIZE]);

    /// Writes `buf` to block `bno` of `dev`.
    fn write(&self, dev: u32, bno: BlockNo, buf: &[u8; BSIZE]);
}

/// Opaque process identity. `-1` (via `ProcessId::NONE`) means "no owning
/// process", used by `pf_info` for frames not currently charged to a
/// process and by `RawSleeplock` before any holder has acquired it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ProcessId(pub i32);

impl ProcessId {
    pub const NONE: ProcessId = ProcessId(-1);
}

/// A monotonic tick source, used to stamp `pf_info::start_tick` (spec.md
/// §3). The real tick counter is a scheduler/timer concern and therefore
/// external (spec.md §1).
pub trait TickSource: Sync {
    fn ticks(&self) -> u64;
}

/// A condition-variable-like channel a `Sleepablelock` guard can sleep on
/// and the log/commit path (or anyone else) can wake up. The scheduler that
/// actually parks/resumes a process is external; this crate only needs the
/// channel identity and the sleep/wakeup calls.
pub trait WaitChannel: Sync {
    /// Atomically releases the calling lock and parks the current process
    /// until `wakeup` is called on this channel. On return, the lock has
    /// been re-acquired.
    ///
    /// # Safety
    ///
    /// `release`/`reacquire` must be the matching release/acquire pair of
    /// the lock the caller is currently holding.
    unsafe fn sleep(&self, release: &mut dyn FnMut(), reacquire: &mut dyn FnMut());

    /// Wakes every process parked on this channel.
    fn wakeup(&self);
}

/// Per-process info exposed by `get_procinfo` (spec.md §6).
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcInfo {
    pub pid: i32,
    pub ppid: i32,
    pub state: u32,
    pub sz: usize,
    pub name: [u8; 16],
}

/// The process table, external per spec.md §1 ("process table and
/// scheduler"). `get_procinfo` (spec.md §6) needs to look a pid up in it.
pub trait ProcessDirectory: Sync {
    fn lookup(&self, pid: i32) -> Option<ProcInfo>;
}

/// Raw access to physical frame content, keyed by frame number
/// (`pa / PGSIZE`). `mm::pfinfo`/`mm::pagefault` track *which* frames are
/// allocated to whom and with what refcount, but the bytes of RAM a frame
/// number denotes are real physical memory, owned by whatever kernel embeds
/// this crate (spec.md §1) — not something a `no_std` library can own
/// itself without assuming a memory map.
pub trait PhysMem: Sync {
    /// Fills the frame with a fixed poison byte (spec.md §4.5: `kfree`
    /// poisons a frame before it rejoins the freelist).
    fn poison_frame(&self, pfn: usize);

    /// Copies one frame's contents into another, for the CoW duplication
    /// step (spec.md §4.8).
    fn copy_frame(&self, src_pfn: usize, dst_pfn: usize);
}

#[cfg(any(test, feature = "test"))]
pub mod fake {
    use core::cell::RefCell;

    use super::{PhysMem, ProcInfo, ProcessDirectory, TickSource};

    /// A tick source that counts up by one on every read, for tests that
    /// care about `start_tick` ordering rather than real wall time.
    pub struct FakeTicks(core::cell::Cell<u64>);

    impl FakeTicks {
        pub const fn new() -> Self {
            Self(core::cell::Cell::new(0))
        }

        pub fn advance(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    unsafe impl Sync for FakeTicks {}

    impl TickSource for FakeTicks {
        fn ticks(&self) -> u64 {
            self.0.get()
        }
    }

    /// An in-memory stand-in for physical RAM, sized to whatever `PFNNUM`
    /// the test needs to address: `N` frames of `PGSIZE` bytes each.
    pub struct FakePhysMem<const N: usize, const PGSIZE: usize> {
        frames: RefCell<[[u8; PGSIZE]; N]>,
    }

    // SAFETY: tests are single-threaded.
    unsafe impl<const N: usize, const PGSIZE: usize> Sync for FakePhysMem<N, PGSIZE> {}

    impl<const N: usize, const PGSIZE: usize> FakePhysMem<N, PGSIZE> {
        pub fn new() -> Self {
            Self {
                frames: RefCell::new([[0u8; PGSIZE]; N]),
            }
        }

        pub fn write(&self, pfn: usize, byte_off: usize, val: u8) {
            self.frames.borrow_mut()[pfn][byte_off] = val;
        }

        pub fn read(&self, pfn: usize, byte_off: usize) -> u8 {
            self.frames.borrow()[pfn][byte_off]
        }
    }

    impl<const N: usize, const PGSIZE: usize> PhysMem for FakePhysMem<N, PGSIZE> {
        fn poison_frame(&self, pfn: usize) {
            self.frames.borrow_mut()[pfn] = [0x01; PGSIZE];
        }

        fn copy_frame(&self, src_pfn: usize, dst_pfn: usize) {
            let src = self.frames.borrow()[src_pfn];
            self.frames.borrow_mut()[dst_pfn] = src;
        }
    }

    /// A process directory backed by a fixed-size array of optional entries.
    pub struct FakeProcessDirectory<const N: usize> {
        entries: [Option<ProcInfo>; N],
    }

    impl<const N: usize> FakeProcessDirectory<N> {
        pub const fn new(entries: [Option<ProcInfo>; N]) -> Self {
            Self { entries }
        }
    }

    unsafe impl<const N: usize> Sync for FakeProcessDirectory<N> {}

    impl<const N: usize> ProcessDirectory for FakeProcessDirectory<N> {
        fn lookup(&self, pid: i32) -> Option<ProcInfo> {
            self.entries.iter().flatten().find(|p| p.pid == pid).copied()
        }
    }
}
