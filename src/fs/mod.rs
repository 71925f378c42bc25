//! File system (spec.md §3, §4): a copy-on-write, snapshotting file system
//! over a transactional block log. Five layers, in dependency order:
//!
//!   - [`log`]: crash recovery for multi-block updates.
//!   - [`bitmap`]: the free-block allocator.
//!   - [`inode`]: inode cache, on-disk format, reading/writing file content.
//!   - [`path`]: `/`-separated name parsing.
//!   - [`snapshot`]: metadata-only directory-tree snapshots built on top of
//!     the inode layer's copy-on-write write path.
//!
//! [`FileSystem`] owns everything except the block cache, which is injected
//! (spec.md §1: the cache is ambient infrastructure, the device under it is
//! external). [`FsTransaction`] is the `begin_op`/`end_op` bracket every
//! mutating operation must run inside, mirroring the teacher's
//! `FileSystem::begin_transaction`/`Drop`-based `end_op`.

pub mod bitmap;
pub mod inode;
pub mod log;
pub mod path;
pub mod snapshot;
pub mod stat;
pub mod superblock;
#[cfg(test)]
pub(crate) mod test_support;

pub use inode::{
    get_inode, get_inode_safe, namei, nameiparent, Dinode, InodeGuard, InodeType, Itable, RcInode,
};
pub use path::{FileName, Path};
pub use stat::Stat;
pub use superblock::Superblock;

use crate::bio::{Buf, BufCache};
use crate::hal::{BlockNo, WaitChannel};
use crate::lock::Spinlock;
use crate::param::{ROOTDEV, ROOTINO};
use snapshot::SnapshotMeta;

/// Everything the file system needs besides the block cache: the on-disk
/// layout descriptor, the transaction log, the inode cache, and the
/// snapshot engine's pinned-block map.
pub struct FileSystem<'c, 'd> {
    pub superblock: Superblock,
    pub log: log::Log<'c, 'd>,
    pub itable: Itable,
    pub snapshot: Spinlock<SnapshotMeta>,
}

impl<'c, 'd> FileSystem<'c, 'd> {
    /// Mounts the file system on `devno`: reads the superblock, replays the
    /// log if a committed-but-not-installed transaction was left behind,
    /// and builds an empty inode cache. `/snapshot` bookkeeping is not
    /// touched here — call [`FileSystem::init_snapshot`] once, afterward,
    /// inside a transaction.
    pub fn new(
        cache: &'c BufCache<'d>,
        devno: u32,
        log_chan: &'static dyn WaitChannel,
        inode_chan: &'static dyn WaitChannel,
        holder: usize,
    ) -> Self {
        let superblock = {
            let buf = cache.get(devno, 1, holder).lock(holder);
            Superblock::read(&buf)
        };
        let log = log::Log::new(cache, devno, superblock.logstart, superblock.nlog, log_chan);
        let itable = Itable::new(inode_chan);
        Self {
            superblock,
            log,
            itable,
            snapshot: Spinlock::new(SnapshotMeta::zero()),
        }
    }

    /// A cached handle to the file system's root directory.
    pub fn root(&self) -> RcInode<'_> {
        get_inode(&self.itable, ROOTDEV, ROOTINO)
    }

    /// Ensures `/snapshot` and `/snapshot/smap` exist (creating them on a
    /// fresh image) and loads `smap`'s persisted content, replacing the
    /// placeholder installed by `new`. Must run inside its own transaction,
    /// once, before any other snapshot operation.
    pub fn init_snapshot(&self, holder: usize) {
        let tx = FsTransaction::new(self, holder);
        let root = self.root();
        let meta = snapshot::sminit(&self.itable, &root, &tx, holder);
        *self.snapshot.lock(holder) = meta;
    }
}

/// A `begin_op`/`end_op` bracket (spec.md §4.1, §7): every operation that
/// writes to the file system runs inside one, so the log never commits a
/// partially finished operation's blocks.
pub struct FsTransaction<'fs, 'c, 'd> {
    pub fs: &'fs FileSystem<'c, 'd>,
}

impl<'fs, 'c, 'd> FsTransaction<'fs, 'c, 'd> {
    pub fn new(fs: &'fs FileSystem<'c, 'd>, _holder: usize) -> Self {
        fs.log.begin_op();
        Self { fs }
    }

    /// Records that `b` was modified; it is written back at the next
    /// commit (spec.md §4.1 `log_write`).
    pub fn write(&self, b: Buf<'c, 'd>) {
        self.fs.log.write(b);
    }

    /// Allocates a fresh zeroed block (spec.md §4.1 `balloc`).
    pub fn balloc(&self, dev: u32, holder: usize) -> BlockNo {
        bitmap::balloc(&self.fs.superblock, &self.fs.log, dev, holder)
    }

    /// Frees a block, unless a live snapshot still pins it (spec.md §4.1
    /// `bfree`, §4.4's CoW/pin interaction).
    pub fn bfree(&self, dev: u32, bno: BlockNo, holder: usize) {
        let pinned = self.fs.snapshot.lock(holder).is_pinned(bno);
        bitmap::bfree(&self.fs.superblock, &self.fs.log, dev, bno, pinned, holder);
    }
}

impl<'fs, 'c, 'd> Drop for FsTransaction<'fs, 'c, 'd> {
    fn drop(&mut self) {
        self.fs.log.end_op();
    }
}

/// Reads up to `dst.len()` bytes of `ip`'s content at `off` (spec.md §4.2
/// `readi`, the read half of the single entry point every file access goes
/// through).
pub fn read_file(ip: &RcInode<'_>, dst: &mut [u8], off: u32, fs: &FileSystem<'_, '_>, holder: usize) -> usize {
    let mut ig = ip.lock(&fs.superblock, &fs.log, holder);
    ig.read_bytes(dst, off, &fs.superblock, &fs.log, holder)
}

/// Writes `src` into `ip`'s content at `off` (spec.md §4.2 `writei`). If the
/// write copy-on-write migrated any block out from under a live snapshot,
/// persists `smap` afterward — outside of any lock guard taken by the write
/// itself, since persisting means writing `/snapshot/smap`'s own content
/// (see `InodeGuard::write_bytes`'s doc comment).
pub fn write_file(ip: &RcInode<'_>, src: &[u8], off: u32, fs: &FileSystem<'_, '_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> usize {
    let (n, cow_happened) = {
        let mut ig = ip.lock(&fs.superblock, &fs.log, holder);
        ig.write_bytes(src, off, tx, holder)
    };
    if cow_happened {
        let root = fs.root();
        let meta = *fs.snapshot.lock(holder);
        snapshot::persist_meta(&meta, &fs.itable, &root, tx, holder);
    }
    n
}
