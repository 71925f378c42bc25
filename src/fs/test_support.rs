//! Shared fixture for `fs::inode`'s and `fs::snapshot`'s test suites: an
//! in-memory [`BlockDevice`], a no-op [`WaitChannel`], and a from-scratch
//! disk image laid out by hand (no `mkfs` tool exists in this crate).
//!
//! Mirrors `hal::fake`'s `RefCell`-backed, no-heap-allocation style
//! (`FakePhysMem`) rather than introducing a new one.

use core::cell::RefCell;

use crate::fs::inode::{alloc_inode, iput, InodeType, Itable, RcInode};
use crate::fs::path::FileName;
use crate::fs::superblock::{FSMAGIC, IPB};
use crate::fs::FsTransaction;
use crate::hal::{BlockDevice, BlockNo, WaitChannel};
use crate::param::{BSIZE, LOGSIZE, ROOTINO};

/// An in-memory stand-in for the one device this crate ever mounts, sized to
/// `N` blocks. Every test fixture is well under that, so `N` is just a
/// generous fixed upper bound, not something tuned per test.
pub struct FakeDisk<const N: usize> {
    blocks: RefCell<[[u8; BSIZE]; N]>,
}

// SAFETY: tests are single-threaded.
unsafe impl<const N: usize> Sync for FakeDisk<N> {}

impl<const N: usize> FakeDisk<N> {
    pub fn new() -> Self {
        Self { blocks: RefCell::new([[0u8; BSIZE]; N]) }
    }

    fn write_block(&self, bno: u32, bytes: &[u8; BSIZE]) {
        self.blocks.borrow_mut()[bno as usize] = *bytes;
    }
}

impl<const N: usize> BlockDevice for FakeDisk<N> {
    fn read(&self, _dev: u32, bno: BlockNo, buf: &mut [u8; BSIZE]) {
        *buf = self.blocks.borrow()[bno as usize];
    }

    fn write(&self, _dev: u32, bno: BlockNo, buf: &[u8; BSIZE]) {
        self.blocks.borrow_mut()[bno as usize] = *buf;
    }
}

/// A `WaitChannel` that never actually parks anything: every fixture stays
/// well inside the log's capacity, so `Log::begin_op`'s sleep branch is
/// never taken and `sleep`'s body never runs.
pub struct NoopWaitChannel;

impl WaitChannel for NoopWaitChannel {
    unsafe fn sleep(&self, release: &mut dyn FnMut(), reacquire: &mut dyn FnMut()) {
        release();
        reacquire();
    }

    fn wakeup(&self) {}
}

pub static CHAN: NoopWaitChannel = NoopWaitChannel;

const TEST_LOGSTART: u32 = 2;
const TEST_NLOG: u32 = LOGSIZE as u32;
const TEST_INODESTART: u32 = TEST_LOGSTART + TEST_NLOG;

fn inode_blocks(ninodes: u32) -> u32 {
    (ninodes + IPB as u32 - 1) / IPB as u32
}

/// Writes a minimal, internally-consistent filesystem image: superblock,
/// zeroed log region, zeroed inode blocks, a bitmap with every metadata
/// block pre-marked allocated (the xv6/teacher mkfs convention `balloc`'s
/// naive `[0, sb.size)` scan relies on), and `extra_data_blocks` zeroed data
/// blocks. The root directory itself is *not* written here — call
/// [`bootstrap_root`] inside a transaction right after mounting, the same
/// way every other inode gets created.
pub fn format<const N: usize>(disk: &FakeDisk<N>, ninodes: u32, extra_data_blocks: u32) {
    let bmapstart = TEST_INODESTART + inode_blocks(ninodes);
    let data_start = bmapstart + 1;
    let size = data_start + extra_data_blocks;
    debug_assert!((size as usize) <= N, "test fixture's layout does not fit FakeDisk<N>");

    disk.write_block(0, &[0u8; BSIZE]);

    let mut sb = [0u8; BSIZE];
    sb[0..4].copy_from_slice(&FSMAGIC.to_le_bytes());
    sb[4..8].copy_from_slice(&size.to_le_bytes());
    sb[8..12].copy_from_slice(&size.to_le_bytes());
    sb[12..16].copy_from_slice(&ninodes.to_le_bytes());
    sb[16..20].copy_from_slice(&TEST_NLOG.to_le_bytes());
    sb[20..24].copy_from_slice(&TEST_LOGSTART.to_le_bytes());
    sb[24..28].copy_from_slice(&TEST_INODESTART.to_le_bytes());
    sb[28..32].copy_from_slice(&bmapstart.to_le_bytes());
    disk.write_block(1, &sb);

    for b in TEST_LOGSTART..data_start {
        disk.write_block(b, &[0u8; BSIZE]);
    }

    let mut bitmap = [0u8; BSIZE];
    let mut i = 0u32;
    while i < data_start {
        bitmap[(i / 8) as usize] |= 1 << (i % 8);
        i += 1;
    }
    disk.write_block(bmapstart, &bitmap);
}

fn dot() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b".") }
}

fn dotdot() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b"..") }
}

/// Allocates the root directory and links `.`/`..` into it, the way a real
/// mount would find it already on disk. Must be the first thing a test does
/// inside its first transaction, before `FileSystem::init_snapshot`.
pub fn bootstrap_root<'t>(itable: &'t Itable, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> RcInode<'t> {
    let root = alloc_inode(itable, InodeType::Dir, tx, holder);
    assert_eq!(root.inum, ROOTINO, "bootstrap_root: root did not get inum 1");
    {
        let mut ig = root.lock(&tx.fs.superblock, &tx.fs.log, holder);
        ig.dirlink(dot(), root.inum, itable, tx, holder).expect("bootstrap_root: link .");
        ig.dirlink(dotdot(), root.inum, itable, tx, holder).expect("bootstrap_root: link ..");
        ig.inner_mut().nlink = 2;
        ig.update(tx, holder);
    }
    root
}

/// Allocates a fresh file, links it as `name` under `parent`, and sets
/// `nlink = 1` the way a real create path would.
pub fn link_new_file<'t>(itable: &'t Itable, parent: &RcInode<'t>, name: &FileName, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> RcInode<'t> {
    let file = alloc_inode(itable, InodeType::File, tx, holder);
    {
        let mut ig = file.lock(&tx.fs.superblock, &tx.fs.log, holder);
        ig.inner_mut().nlink = 1;
        ig.update(tx, holder);
    }
    parent
        .lock(&tx.fs.superblock, &tx.fs.log, holder)
        .dirlink(name, file.inum, itable, tx, holder)
        .expect("link_new_file: dirlink");
    file
}

/// Removes `name` from `parent`'s live tree: decrements the target's
/// `nlink`, clears the directory entry, and `iput`s it — freeing its
/// on-disk inode slot (and any unpinned blocks) if this was the last link.
pub fn unlink_file(itable: &Itable, parent: &RcInode<'_>, name: &FileName, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let (target, _off) = parent
        .lock(sb, log, holder)
        .dirlookup(name, itable, sb, log, holder)
        .expect("unlink_file: name not found");
    {
        let mut ig = target.lock(sb, log, holder);
        ig.inner_mut().nlink -= 1;
        ig.update(tx, holder);
    }
    parent.lock(sb, log, holder).dirunlink(name, sb, tx, holder);
    iput(target, tx, holder);
}

/// Allocates a file inode and never links or frees it, padding
/// `count_allocated_inodes` without touching any directory's live tree —
/// stand-in for "unrelated inode pressure elsewhere on the disk" in the
/// capacity-rejection tests.
pub fn alloc_orphan_inode(itable: &Itable, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let _ = alloc_inode(itable, InodeType::File, tx, holder);
}

pub fn name(bytes: &'static [u8]) -> &'static FileName {
    // SAFETY: callers only ever pass NUL-free ASCII literals.
    unsafe { FileName::from_bytes(bytes) }
}
