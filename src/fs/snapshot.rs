//! Snapshot engine (spec.md §4.4): directory-tree snapshots that share data
//! blocks with the live tree via the inode layer's copy-on-write path.
//!
//! A snapshot is a metadata-only mirror of the directory tree rooted at
//! `/`, stored under `/snapshot/<hex id>/`. Creating one walks the live
//! tree and, for every file, allocates a fresh inode whose `addrs[]` is a
//! verbatim copy of the original's — no data block is copied, only pinned
//! in `smap` so the allocator and the CoW write path both know not to let
//! the live tree overwrite it in place. `smeta` (this module's
//! [`SnapshotMeta`]) is the ground truth for which blocks are pinned,
//! persisted under `/snapshot/smap`.
//!
//! Grounded in spec.md §4.4.1–§4.4.4; there is no single teacher file this
//! generalizes (the teacher has no snapshot concept), so each operation is
//! built directly from `fs::inode`'s primitives in the teacher's style.

use zerocopy::{AsBytes, FromBytes};

use crate::fs::inode::{
    alloc_inode, count_allocated_inodes, get_inode, iput, namei, Dirent, InodeType, Itable,
    RcInode, DIRENT_SIZE,
};
use crate::fs::log::Log;
use crate::fs::path::{FileName, Path};
use crate::fs::superblock::Superblock;
use crate::fs::FsTransaction;
use crate::hal::BlockNo;
use crate::param::{NINDIRECT, SMAP_BYTES};

fn dot() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b".") }
}

fn dotdot() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b"..") }
}

fn snapshot_name() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b"snapshot") }
}

fn smap_name() -> &'static FileName {
    // SAFETY: no NUL bytes.
    unsafe { FileName::from_bytes(b"smap") }
}

/// Persisted snapshot-engine state (spec.md §4.4.1): the next snapshot id
/// to hand out, and a one-bit-per-block map of which blocks are pinned by
/// at least one live snapshot.
#[derive(Clone, Copy, FromBytes, AsBytes)]
#[repr(C)]
pub struct SnapshotMeta {
    pub next_id: u32,
    smap: [u8; SMAP_BYTES],
}

impl SnapshotMeta {
    pub const fn zero() -> Self {
        Self { next_id: 0, smap: [0; SMAP_BYTES] }
    }

    pub fn is_pinned(&self, bno: BlockNo) -> bool {
        self.smap[bno as usize / 8] & (1 << (bno % 8)) != 0
    }

    pub fn pin(&mut self, bno: BlockNo) {
        self.smap[bno as usize / 8] |= 1 << (bno % 8);
    }

    /// Clears the pin on `bno`.
    ///
    /// Note (spec.md §4.4.3, design note §9): `snapshot_delete` does *not*
    /// call this — only the CoW write path does, when it migrates a block
    /// away from underneath a live snapshot. Deleting a snapshot leaves its
    /// bits set in `smap` even if no other snapshot references them; this
    /// crate reproduces that leak rather than reference-counting `smap`
    /// bits per snapshot, matching the open question in spec.md §9.
    pub fn unpin(&mut self, bno: BlockNo) {
        self.smap[bno as usize / 8] &= !(1 << (bno % 8));
    }
}

/// Ensures `/snapshot` and `/snapshot/smap` exist, loading `smap`'s content
/// into memory if the file already had any (spec.md §4.4.1 `sminit`).
pub fn sminit(itable: &Itable, root: &RcInode<'_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> SnapshotMeta {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;

    let snap_dir = match namei(itable, Path::new("/snapshot").unwrap(), root, root, sb, log, holder) {
        Ok(ip) => ip,
        Err(()) => {
            let dir = alloc_inode(itable, InodeType::Dir, tx, holder);
            {
                let mut ig = dir.lock(sb, log, holder);
                ig.dirlink(dot(), dir.inum, itable, tx, holder).expect("sminit: link .");
                ig.dirlink(dotdot(), root.inum, itable, tx, holder).expect("sminit: link ..");
            }
            let mut root_ig = root.lock(sb, log, holder);
            root_ig
                .dirlink(snapshot_name(), dir.inum, itable, tx, holder)
                .expect("sminit: link /snapshot");
            dir
        }
    };

    let smap_file = {
        let found = {
            let mut ig = snap_dir.lock(sb, log, holder);
            ig.dirlookup(smap_name(), itable, sb, log, holder)
        };
        match found {
            Some((ip, _)) => ip,
            None => {
                let file = alloc_inode(itable, InodeType::File, tx, holder);
                let mut ig = snap_dir.lock(sb, log, holder);
                ig.dirlink(smap_name(), file.inum, itable, tx, holder)
                    .expect("sminit: link smap");
                file
            }
        }
    };

    let mut meta = SnapshotMeta::zero();
    let mut ig = smap_file.lock(sb, log, holder);
    if ig.inner().size as usize >= core::mem::size_of::<SnapshotMeta>() {
        let mut bytes = [0u8; core::mem::size_of::<SnapshotMeta>()];
        ig.read_bytes(&mut bytes, 0, sb, log, holder);
        meta = SnapshotMeta::read_from(&bytes[..]).expect("sminit: corrupt smap");
    }
    meta
}

/// Serializes `meta` back into `/snapshot/smap` (spec.md §4.4.1
/// `update_snapshot_meta`), called after every mutation of `smap` or
/// `next_id`.
pub fn persist_meta(meta: &SnapshotMeta, itable: &Itable, root: &RcInode<'_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let ip = {
        let mut root_ig = root.lock(sb, log, holder);
        let snap = root_ig
            .dirlookup(snapshot_name(), itable, sb, log, holder)
            .expect("persist_meta: /snapshot missing");
        drop(root_ig);
        let mut snap_ig = snap.0.lock(sb, log, holder);
        snap_ig
            .dirlookup(smap_name(), itable, sb, log, holder)
            .expect("persist_meta: smap missing")
            .0
    };
    let mut ig = ip.lock(sb, log, holder);
    let (n, _cow) = ig.write_bytes(meta.as_bytes(), 0, tx, holder);
    assert_eq!(n, core::mem::size_of::<SnapshotMeta>(), "persist_meta: short write");
}

/// Counts the inodes under `ip`'s subtree, excluding `.`/`..` and (at the
/// top level) any entry literally named `snapshot` — spec.md §4.4.2's
/// `icount`, used for the capacity check both `create` and `rollback` run
/// before doing any work.
pub fn icount(ip: &RcInode<'_>, itable: &Itable, sb: &Superblock, log: &Log<'_, '_>, skip_snapshot: bool, holder: usize) -> u32 {
    let mut ig = ip.lock(sb, log, holder);
    if ig.inner().typ != InodeType::Dir {
        return 1;
    }
    let mut total = 1u32;
    let size = ig.inner().size;
    let mut off = 0u32;
    while off < size {
        let de = Dirent::read(&mut ig, off, sb, log, holder);
        off += DIRENT_SIZE as u32;
        if de.inum == 0 {
            continue;
        }
        let name = de.get_name();
        if name == dot() || name == dotdot() {
            continue;
        }
        if skip_snapshot && name == snapshot_name() {
            continue;
        }
        let child = get_inode(itable, ip.dev, de.inum as u32);
        total += icount(&child, itable, sb, log, false, holder);
    }
    total
}

/// Creates a new snapshot of the tree rooted at `root` (spec.md §4.4.2).
/// Returns the new snapshot's id, `-2` if it would overflow `ninodes`, or
/// `-1` on any other failure.
pub fn snapshot_create(itable: &Itable, root: &RcInode<'_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> i32 {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;

    let required = icount(root, itable, sb, log, true, holder);
    let allocated = count_allocated_inodes(sb, log, holder);
    if allocated + required + 1 > sb.ninodes {
        return -2;
    }

    let mut meta = tx.fs.snapshot.lock(holder);
    let id = meta.next_id;
    meta.next_id += 1;
    let meta_snapshot = SnapshotMeta { next_id: meta.next_id, smap: meta.smap };
    drop(meta);

    let snap_root = namei(itable, Path::new("/snapshot").unwrap(), root, root, sb, log, holder)
        .expect("snapshot_create: /snapshot missing (sminit not called)");

    let mut name_buf = [0u8; 8];
    let name_len = format_hex(id, &mut name_buf);
    // SAFETY: hex digits contain no NUL bytes.
    let dir_name = unsafe { FileName::from_bytes(&name_buf[..name_len]) };

    let new_dir = alloc_inode(itable, InodeType::Dir, tx, holder);
    {
        let mut ig = new_dir.lock(sb, log, holder);
        ig.dirlink(dot(), new_dir.inum, itable, tx, holder).expect("snapshot_create: link .");
        ig.dirlink(dotdot(), snap_root.inum, itable, tx, holder)
            .expect("snapshot_create: link ..");
    }
    {
        let mut ig = snap_root.lock(sb, log, holder);
        if ig.dirlink(dir_name, new_dir.inum, itable, tx, holder).is_err() {
            return -1;
        }
    }

    let mut working_meta = meta_snapshot;
    sub_snapshot_create(itable, root, &new_dir, &mut working_meta, tx, holder);

    let mut meta = tx.fs.snapshot.lock(holder);
    meta.next_id = working_meta.next_id;
    meta.smap = working_meta.smap;
    drop(meta);
    persist_meta(&working_meta, itable, root, tx, holder);

    id as i32
}

fn sub_snapshot_create(itable: &Itable, src_dir: &RcInode<'_>, dst_dir: &RcInode<'_>, meta: &mut SnapshotMeta, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let size = src_dir.lock(sb, log, holder).inner().size;
    let mut off = 0u32;
    while off < size {
        let de = {
            let mut ig = src_dir.lock(sb, log, holder);
            Dirent::read(&mut ig, off, sb, log, holder)
        };
        off += DIRENT_SIZE as u32;
        if de.inum == 0 {
            continue;
        }
        let name = de.get_name();
        if name == dot() || name == dotdot() || name == snapshot_name() {
            continue;
        }
        let child = get_inode(itable, src_dir.dev, de.inum as u32);
        let typ = child.lock(sb, log, holder).inner().typ;
        match typ {
            InodeType::Dir => {
                let new_child = alloc_inode(itable, InodeType::Dir, tx, holder);
                {
                    let mut ig = new_child.lock(sb, log, holder);
                    ig.dirlink(dot(), new_child.inum, itable, tx, holder).expect("sub_snapshot_create: link .");
                    ig.dirlink(dotdot(), dst_dir.inum, itable, tx, holder).expect("sub_snapshot_create: link ..");
                }
                dst_dir
                    .lock(sb, log, holder)
                    .dirlink(name, new_child.inum, itable, tx, holder)
                    .expect("sub_snapshot_create: link child dir");
                sub_snapshot_create(itable, &child, &new_child, meta, tx, holder);
            }
            InodeType::File => {
                icopy_file(itable, &child, dst_dir, name, meta, tx, holder);
            }
            InodeType::Device { .. } | InodeType::None => {}
        }
    }
}

/// Copies `src`'s metadata and `addrs[]` into a freshly allocated inode
/// linked as `name` under `dst_dir`, pinning every referenced block in
/// `meta` (spec.md §4.4.2, the file case of `icopy`). No data block is
/// copied; only the layout that points at it.
fn icopy_file(itable: &Itable, src: &RcInode<'_>, dst_dir: &RcInode<'_>, name: &FileName, meta: &mut SnapshotMeta, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let new_ip = alloc_inode(itable, InodeType::File, tx, holder);
    {
        let src_ig = src.lock(sb, log, holder);
        let addr_direct = src_ig.inner().addr_direct;
        let addr_indirect = src_ig.inner().addr_indirect;
        let size = src_ig.inner().size;
        drop(src_ig);

        let mut dst_ig = new_ip.lock(sb, log, holder);
        dst_ig.inner_mut().size = size;
        dst_ig.inner_mut().addr_direct = addr_direct;
        dst_ig.inner_mut().addr_indirect = addr_indirect;
        dst_ig.inner_mut().nlink = 1;
        dst_ig.update(tx, holder);

        for &a in addr_direct.iter() {
            if a != 0 {
                meta.pin(a);
            }
        }
        if addr_indirect != 0 {
            meta.pin(addr_indirect);
            let bp = log.cache().get(src.dev, addr_indirect, holder).lock(holder);
            let words = indirect_words(bp.data());
            for &a in words {
                if a != 0 {
                    meta.pin(a);
                }
            }
        }
    }
    dst_dir
        .lock(sb, log, holder)
        .dirlink(name, new_ip.inum, itable, tx, holder)
        .expect("icopy_file: dirlink");
}

fn indirect_words(data: &crate::bio::BufData) -> &[u32] {
    // SAFETY: `u32` has no internal structure and `BufData` is `align(4)`.
    unsafe { core::slice::from_raw_parts(data.inner.as_ptr() as *const u32, NINDIRECT) }
}

/// Removes snapshot `id` (spec.md §4.4.3). Its data blocks stay pinned in
/// `smap` even after this returns — see [`SnapshotMeta::unpin`].
pub fn snapshot_delete(itable: &Itable, root: &RcInode<'_>, id: u32, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> i32 {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;

    let mut name_buf = [0u8; 8];
    let name_len = format_hex(id, &mut name_buf);
    // SAFETY: hex digits contain no NUL bytes.
    let dir_name = unsafe { FileName::from_bytes(&name_buf[..name_len]) };

    let mut path_buf = [0u8; 20];
    path_buf[..9].copy_from_slice(b"/snapshot");
    path_buf[9] = b'/';
    path_buf[10..10 + name_len].copy_from_slice(&name_buf[..name_len]);
    let path_str = core::str::from_utf8(&path_buf[..10 + name_len]).unwrap();

    let snap_dir = match namei(itable, Path::new(path_str).unwrap(), root, root, sb, log, holder) {
        Ok(ip) => ip,
        Err(()) => return -1,
    };

    sub_snapshot_delete(itable, &snap_dir, tx, holder);

    {
        let mut ig = snap_dir.lock(sb, log, holder);
        ig.itrunc(tx, holder);
        ig.inner_mut().typ = InodeType::None;
        ig.update(tx, holder);
    }

    let parent = namei(itable, Path::new("/snapshot").unwrap(), root, root, sb, log, holder)
        .expect("snapshot_delete: /snapshot missing");
    parent.lock(sb, log, holder).dirunlink(dir_name, sb, tx, holder);
    iput(snap_dir, tx, holder);
    0
}

fn sub_snapshot_delete(itable: &Itable, dir: &RcInode<'_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let size = dir.lock(sb, log, holder).inner().size;
    let mut off = 0u32;
    while off < size {
        let de = {
            let mut ig = dir.lock(sb, log, holder);
            Dirent::read(&mut ig, off, sb, log, holder)
        };
        off += DIRENT_SIZE as u32;
        if de.inum == 0 {
            continue;
        }
        let name = de.get_name();
        if name == dot() || name == dotdot() {
            continue;
        }
        let child = get_inode(itable, dir.dev, de.inum as u32);
        let typ = child.lock(sb, log, holder).inner().typ;
        if typ == InodeType::Dir {
            sub_snapshot_delete(itable, &child, tx, holder);
        }
        {
            let mut ig = child.lock(sb, log, holder);
            ig.itrunc(tx, holder);
            ig.inner_mut().typ = InodeType::None;
            ig.update(tx, holder);
        }
        dir.lock(sb, log, holder).dirunlink(name, sb, tx, holder);
        iput(child, tx, holder);
    }
}

/// Restores `id` over the live tree rooted at `root` (spec.md §4.4.4).
/// Returns `0` on success, `-2` on the capacity check, `-1` otherwise.
pub fn snapshot_rollback(itable: &Itable, root: &RcInode<'_>, id: u32, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> i32 {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;

    let mut name_buf = [0u8; 8];
    let name_len = format_hex(id, &mut name_buf);
    let mut path_buf = [0u8; 20];
    path_buf[..9].copy_from_slice(b"/snapshot");
    path_buf[9] = b'/';
    path_buf[10..10 + name_len].copy_from_slice(&name_buf[..name_len]);
    let path_str = core::str::from_utf8(&path_buf[..10 + name_len]).unwrap();

    let snap_dir = match namei(itable, Path::new(path_str).unwrap(), root, root, sb, log, holder) {
        Ok(ip) => ip,
        Err(()) => return -1,
    };

    let required = icount(&snap_dir, itable, sb, log, false, holder);
    let live = icount(root, itable, sb, log, true, holder);
    let allocated = count_allocated_inodes(sb, log, holder);
    if allocated + required.saturating_sub(live) > sb.ninodes {
        return -2;
    }

    let mut meta = tx.fs.snapshot.lock(holder);
    let mut working_meta = SnapshotMeta { next_id: meta.next_id, smap: meta.smap };
    drop(meta);

    sub_snapshot_rollback(itable, &snap_dir, root, &mut working_meta, tx, holder);

    let mut meta = tx.fs.snapshot.lock(holder);
    meta.smap = working_meta.smap;
    drop(meta);
    persist_meta(&working_meta, itable, root, tx, holder);
    0
}

fn sub_snapshot_rollback(itable: &Itable, snap_dir: &RcInode<'_>, live_dir: &RcInode<'_>, meta: &mut SnapshotMeta, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let sb = &tx.fs.superblock;
    let log = &tx.fs.log;
    let size = snap_dir.lock(sb, log, holder).inner().size;
    let mut off = 0u32;
    while off < size {
        let de = {
            let mut ig = snap_dir.lock(sb, log, holder);
            Dirent::read(&mut ig, off, sb, log, holder)
        };
        off += DIRENT_SIZE as u32;
        if de.inum == 0 {
            continue;
        }
        let name = de.get_name();
        if name == dot() || name == dotdot() || name == snapshot_name() {
            continue;
        }
        let snap_child = get_inode(itable, snap_dir.dev, de.inum as u32);
        let typ = snap_child.lock(sb, log, holder).inner().typ;
        let existing = live_dir.lock(sb, log, holder).dirlookup(name, itable, sb, log, holder);

        match typ {
            InodeType::Dir => {
                let live_child = match existing {
                    Some((ip, _)) => ip,
                    None => {
                        let new_dir = alloc_inode(itable, InodeType::Dir, tx, holder);
                        {
                            let mut ig = new_dir.lock(sb, log, holder);
                            ig.dirlink(dot(), new_dir.inum, itable, tx, holder).expect("rollback: link .");
                            ig.dirlink(dotdot(), live_dir.inum, itable, tx, holder).expect("rollback: link ..");
                        }
                        live_dir
                            .lock(sb, log, holder)
                            .dirlink(name, new_dir.inum, itable, tx, holder)
                            .expect("rollback: link child dir");
                        new_dir
                    }
                };
                sub_snapshot_rollback(itable, &snap_child, &live_child, meta, tx, holder);
            }
            InodeType::File => {
                if let Some((old, _)) = existing {
                    live_dir.lock(sb, log, holder).dirunlink(name, sb, tx, holder);
                    iput(old, tx, holder);
                }
                irestore(itable, &snap_child, live_dir, name, meta, tx, holder);
            }
            InodeType::Device { .. } | InodeType::None => {}
        }
    }
}

/// Allocates a fresh inode mirroring `src`'s metadata and `addrs[]`,
/// re-pinning every referenced block, and links it as `name` under
/// `dst_dir` (spec.md §4.4.4 `irestore`). The live tree and the snapshot
/// now share blocks, protected by CoW on the next write to either.
fn irestore(itable: &Itable, src: &RcInode<'_>, dst_dir: &RcInode<'_>, name: &FileName, meta: &mut SnapshotMeta, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    icopy_file(itable, src, dst_dir, name, meta, tx, holder);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::BufCache;
    use crate::fs::test_support::{self, FakeDisk};
    use crate::fs::{write_file, FileSystem};
    use crate::hal::fake::FakeTicks;
    use crate::param::ROOTDEV;

    fn holder() -> usize {
        0
    }

    #[test]
    fn snapshot_create_rejects_when_it_would_overflow_ninodes() {
        let disk = FakeDisk::<128>::new();
        test_support::format(&disk, 8, 20);
        let ticks = FakeTicks::new();
        let cache = BufCache::new(&disk, &ticks, &test_support::CHAN);
        let fs = FileSystem::new(&cache, ROOTDEV, &test_support::CHAN, &test_support::CHAN, holder());

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::bootstrap_root(&fs.itable, &tx, holder());
        }
        fs.init_snapshot(holder());

        let root = fs.root();
        {
            let tx = FsTransaction::new(&fs, holder());
            // Exactly fills the 7 usable inode slots (root + /snapshot dir +
            // smap + these 4 files) that ninodes=8 leaves room for.
            for n in [test_support::name(b"a"), test_support::name(b"b"), test_support::name(b"c"), test_support::name(b"d")] {
                test_support::link_new_file(&fs.itable, &root, n, &tx, holder());
            }
        }

        let tx = FsTransaction::new(&fs, holder());
        assert_eq!(snapshot_create(&fs.itable, &root, &tx, holder()), -2);
    }

    #[test]
    fn snapshot_rollback_rejects_when_it_would_overflow_ninodes() {
        let disk = FakeDisk::<128>::new();
        test_support::format(&disk, 20, 40);
        let ticks = FakeTicks::new();
        let cache = BufCache::new(&disk, &ticks, &test_support::CHAN);
        let fs = FileSystem::new(&cache, ROOTDEV, &test_support::CHAN, &test_support::CHAN, holder());

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::bootstrap_root(&fs.itable, &tx, holder());
        }
        fs.init_snapshot(holder());

        let root = fs.root();
        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::link_new_file(&fs.itable, &root, test_support::name(b"a"), &tx, holder());
            test_support::link_new_file(&fs.itable, &root, test_support::name(b"b"), &tx, holder());
        }

        let id = {
            let tx = FsTransaction::new(&fs, holder());
            snapshot_create(&fs.itable, &root, &tx, holder())
        };
        assert_eq!(id, 0, "first snapshot must get id 0");

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::unlink_file(&fs.itable, &root, test_support::name(b"a"), &tx, holder());
            test_support::unlink_file(&fs.itable, &root, test_support::name(b"b"), &tx, holder());
        }

        {
            let tx = FsTransaction::new(&fs, holder());
            // Pads count_allocated_inodes with inodes outside the live tree,
            // so the rollback's capacity check has no room left: required
            // (snap_dir + 2 restored files = 3) exceeds the live tree's
            // current size (just root = 1) by 2, and allocated is one
            // orphan away from the full 19-slot budget (ninodes=20).
            for _ in 0..13 {
                test_support::alloc_orphan_inode(&fs.itable, &tx, holder());
            }
        }

        let tx = FsTransaction::new(&fs, holder());
        assert_eq!(snapshot_rollback(&fs.itable, &root, id as u32, &tx, holder()), -2);
    }

    #[test]
    fn snapshot_delete_leaves_smap_bits_pinned() {
        let disk = FakeDisk::<128>::new();
        test_support::format(&disk, 20, 40);
        let ticks = FakeTicks::new();
        let cache = BufCache::new(&disk, &ticks, &test_support::CHAN);
        let fs = FileSystem::new(&cache, ROOTDEV, &test_support::CHAN, &test_support::CHAN, holder());

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::bootstrap_root(&fs.itable, &tx, holder());
        }
        fs.init_snapshot(holder());

        let root = fs.root();
        let file = {
            let tx = FsTransaction::new(&fs, holder());
            let file = test_support::link_new_file(&fs.itable, &root, test_support::name(b"a"), &tx, holder());
            write_file(&file, b"snapshotted content", 0, &fs, &tx, holder());
            file
        };
        let bno = file.lock(&fs.superblock, &fs.log, holder()).inner().addr_direct[0];
        assert_ne!(bno, 0, "write_file must have allocated a data block");

        let id = {
            let tx = FsTransaction::new(&fs, holder());
            snapshot_create(&fs.itable, &root, &tx, holder())
        };
        assert_eq!(id, 0);
        assert!(fs.snapshot.lock(holder()).is_pinned(bno), "icopy_file must pin the copied block");

        {
            let tx = FsTransaction::new(&fs, holder());
            assert_eq!(snapshot_delete(&fs.itable, &root, id as u32, &tx, holder()), 0);
        }

        assert!(
            fs.snapshot.lock(holder()).is_pinned(bno),
            "snapshot_delete must not clear smap bits (spec's documented open question)"
        );
    }

    #[test]
    fn rollback_restores_a_deleted_file() {
        let disk = FakeDisk::<128>::new();
        test_support::format(&disk, 20, 40);
        let ticks = FakeTicks::new();
        let cache = BufCache::new(&disk, &ticks, &test_support::CHAN);
        let fs = FileSystem::new(&cache, ROOTDEV, &test_support::CHAN, &test_support::CHAN, holder());

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::bootstrap_root(&fs.itable, &tx, holder());
        }
        fs.init_snapshot(holder());

        let root = fs.root();
        let name = test_support::name(b"a");
        {
            let tx = FsTransaction::new(&fs, holder());
            let file = test_support::link_new_file(&fs.itable, &root, name, &tx, holder());
            write_file(&file, b"before", 0, &fs, &tx, holder());
        }

        let id = {
            let tx = FsTransaction::new(&fs, holder());
            snapshot_create(&fs.itable, &root, &tx, holder())
        };
        assert_eq!(id, 0);

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::unlink_file(&fs.itable, &root, name, &tx, holder());
        }
        assert!(
            root.lock(&fs.superblock, &fs.log, holder()).dirlookup(name, &fs.itable, &fs.superblock, &fs.log, holder()).is_none(),
            "file must be gone from the live tree before rollback"
        );

        {
            let tx = FsTransaction::new(&fs, holder());
            assert_eq!(snapshot_rollback(&fs.itable, &root, id as u32, &tx, holder()), 0);
        }

        let restored = root
            .lock(&fs.superblock, &fs.log, holder())
            .dirlookup(name, &fs.itable, &fs.superblock, &fs.log, holder())
            .expect("rollback must relink the file")
            .0;
        let mut buf = [0u8; 6];
        let n = crate::fs::read_file(&restored, &mut buf, 0, &fs, holder());
        assert_eq!(&buf[..n], b"before");
    }
}

fn format_hex(mut id: u32, buf: &mut [u8; 8]) -> usize {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    if id == 0 {
        buf[0] = b'0';
        return 1;
    }
    let mut tmp = [0u8; 8];
    let mut n = 0;
    while id > 0 {
        tmp[n] = DIGITS[(id & 0xf) as usize];
        id >>= 4;
        n += 1;
    }
    for i in 0..n {
        buf[i] = tmp[n - 1 - i];
    }
    n
}
