//! Inode cache and on-disk format (spec.md §3, §4.2).
//!
//! An inode describes a single unnamed file. The inode disk structure holds
//! metadata: the file's type, its size, the number of links referring to it,
//! and the list of blocks holding the file's content. Inodes are laid out
//! sequentially starting at `Superblock::inodestart`.
//!
//! The in-memory [`Itable`] caches up to `NINODE` inodes so that processes
//! sharing an open file synchronize through the same entry. Two locks
//! protect disjoint fields, exactly as in `bio::BufCache`: the table's
//! [`Spinlock`] guards identity and refcount (`dev`, `inum`, `refcnt`),
//! while each slot's body (`valid`, `typ`, `nlink`, `size`, block addresses)
//! lives behind its own [`Sleeplock`], so a disk read to fill a cold entry
//! never blocks lookups of other entries. These must stay two separate
//! locks: collapsing them would make every inode lookup serialize behind
//! whichever inode is currently doing disk I/O.
//!
//! `iget`/`iput` are named [`Itable::get_inode`]/[`iput`] here, and `ilock`
//! is [`Inode::lock`]. Unlike the teacher's `ArenaObject::finalize`, which
//! runs truncate-on-last-drop implicitly inside `Rc`'s `Drop` (requiring a
//! global kernel singleton to reach the superblock and log from inside a
//! destructor this crate doesn't have), [`iput`] is a plain function the
//! caller invokes explicitly, inside a transaction, exactly as spec.md §4.2
//! requires ("callers must be inside a transaction bracket").

use core::mem;

use array_macro::array;
use static_assertions::const_assert;

use crate::bio::BufData;
use crate::fs::log::Log;
use crate::fs::path::{FileName, Path};
use crate::fs::stat::Stat;
use crate::fs::superblock::{Superblock, IPB};
use crate::fs::FsTransaction;
use crate::hal::BlockNo;
use crate::lock::{Sleeplock, Spinlock};
use crate::param::{NDIRECT, NINDIRECT, NINODE};

pub const DIRSIZ: usize = crate::param::DIRSIZ;
pub const DIRENT_SIZE: usize = mem::size_of::<Dirent>();

/// In-memory file type, including the device's major/minor pair so callers
/// never have to look them up separately (spec.md §9, "Polymorphism": one
/// tagged variant dispatching behavior instead of a type tag plus two
/// separate fields the caller must keep in sync).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i16)]
pub enum InodeType {
    None,
    Dir,
    File,
    Device { major: u16, minor: u16 },
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(i16)]
enum DInodeType {
    None,
    Dir,
    File,
    Device,
}

/// On-disk inode (spec.md §3). `repr(C)` because its layout is the disk
/// format, shared with whatever wrote the image.
#[repr(C)]
pub struct Dinode {
    typ: DInodeType,
    major: u16,
    minor: u16,
    nlink: i16,
    size: u32,
    addr_direct: [u32; NDIRECT],
    addr_indirect: u32,
}

const_assert!(IPB <= mem::size_of::<BufData>() / mem::size_of::<Dinode>());
const_assert!(mem::align_of::<BufData>() % mem::align_of::<Dinode>() == 0);

pub struct InodeInner {
    pub valid: bool,
    pub typ: InodeType,
    pub nlink: i16,
    pub size: u32,
    pub addr_direct: [u32; NDIRECT],
    pub addr_indirect: u32,
}

impl InodeInner {
    const fn zero() -> Self {
        Self {
            valid: false,
            typ: InodeType::None,
            nlink: 0,
            size: 0,
            addr_direct: [0; NDIRECT],
            addr_indirect: 0,
        }
    }
}

struct Identity {
    dev: u32,
    inum: u32,
    refcnt: u32,
}

impl Identity {
    const fn empty() -> Self {
        Self {
            dev: u32::MAX,
            inum: u32::MAX,
            refcnt: 0,
        }
    }
}

/// Fixed `NINODE`-slot inode cache, shared by every open file and working
/// directory.
pub struct Itable {
    identity: Spinlock<[Identity; NINODE]>,
    body: [Sleeplock<InodeInner>; NINODE],
}

/// Reference-counted handle into an [`Itable`] slot. Does not by itself read
/// from disk or hold the body lock; see [`Inode::lock`].
pub struct RcInode<'t> {
    itable: &'t Itable,
    idx: usize,
    pub dev: u32,
    pub inum: u32,
}

impl<'t> Clone for RcInode<'t> {
    fn clone(&self) -> Self {
        self.itable.identity.lock(0)[self.idx].refcnt += 1;
        RcInode {
            itable: self.itable,
            idx: self.idx,
            dev: self.dev,
            inum: self.inum,
        }
    }
}

impl<'t> Drop for RcInode<'t> {
    fn drop(&mut self) {
        self.itable.identity.lock(0)[self.idx].refcnt -= 1;
    }
}

impl<'t> RcInode<'t> {
    fn body(&self) -> &Sleeplock<InodeInner> {
        &self.itable.body[self.idx]
    }

    /// Locks the inode, reading it from disk on the first lock after
    /// `get_inode` (spec.md §4.2 `ilock`). A zero type after load is a
    /// fatal invariant violation: the cache entry claimed to name a real
    /// inode, so the on-disk slot must be allocated.
    pub fn lock<'c, 'd>(
        &self,
        sb: &Superblock,
        log: &Log<'c, 'd>,
        holder: usize,
    ) -> InodeGuard<'_, 't> {
        let mut guard = self.body().lock(holder);
        if !guard.valid {
            let bp = log.cache().get(self.dev, sb.iblock(self.inum), holder).lock(holder);
            let dip = dinode_at(bp.data(), self.inum);
            match dip.typ {
                DInodeType::None => guard.typ = InodeType::None,
                DInodeType::Dir => guard.typ = InodeType::Dir,
                DInodeType::File => guard.typ = InodeType::File,
                DInodeType::Device => {
                    guard.typ = InodeType::Device {
                        major: dip.major,
                        minor: dip.minor,
                    }
                }
            }
            guard.nlink = dip.nlink;
            guard.size = dip.size;
            guard.addr_direct = dip.addr_direct;
            guard.addr_indirect = dip.addr_indirect;
            drop(bp);
            guard.valid = true;
            assert_ne!(guard.typ, InodeType::None, "Inode::lock: no type");
        }
        InodeGuard { rc: self, guard: Some(guard) }
    }

    pub fn stat(&self, holder: usize) -> Stat {
        let guard = self.body().lock(holder);
        Stat {
            dev: self.dev as i32,
            ino: self.inum,
            typ: match guard.typ {
                InodeType::None => 0,
                InodeType::Dir => 1,
                InodeType::File => 2,
                InodeType::Device { .. } => 3,
            },
            nlink: guard.nlink,
            size: guard.size as usize,
        }
    }
}

/// Reads byte `dip_inum % IPB`'s `Dinode` out of a just-read inode block.
fn dinode_at(data: &BufData, inum: u32) -> &Dinode {
    // SAFETY: `Dinode` is plain old data, `IPB` inodes fit in a block, and
    // `BufData` is suitably aligned (checked by the const_asserts above).
    unsafe { &*(data.inner.as_ptr() as *const Dinode).add(inum as usize % IPB) }
}

fn dinode_at_mut(data: &mut BufData, inum: u32) -> &mut Dinode {
    // SAFETY: see `dinode_at`.
    unsafe { &mut *(data.inner.as_mut_ptr() as *mut Dinode).add(inum as usize % IPB) }
}

/// `Sleeplock<InodeInner>` held; derefs to the body fields.
pub struct InodeGuard<'g, 't> {
    rc: &'g RcInode<'t>,
    guard: Option<crate::lock::sleeplock::SleeplockGuard<'g, InodeInner>>,
}

impl<'g, 't> InodeGuard<'g, 't> {
    pub fn dev(&self) -> u32 {
        self.rc.dev
    }

    pub fn inum(&self) -> u32 {
        self.rc.inum
    }

    pub fn inner(&self) -> &InodeInner {
        self.guard.as_ref().unwrap()
    }

    pub fn inner_mut(&mut self) -> &mut InodeInner {
        self.guard.as_mut().unwrap()
    }

    /// Copies the modified in-memory inode to disk (spec.md §4.2
    /// `iupdate`). Must be called after every change to a field above that
    /// has a disk-resident counterpart.
    pub fn update(&self, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
        let mut bp = tx
            .fs
            .log
            .cache()
            .get(self.dev(), tx.fs.superblock.iblock(self.inum()), holder)
            .lock(holder);
        let dip = dinode_at_mut(bp.data_mut(), self.inum());
        let inner = self.inner();
        match inner.typ {
            InodeType::Device { major, minor } => {
                dip.typ = DInodeType::Device;
                dip.major = major;
                dip.minor = minor;
            }
            InodeType::None => {
                dip.typ = DInodeType::None;
                dip.major = 0;
                dip.minor = 0;
            }
            InodeType::Dir => {
                dip.typ = DInodeType::Dir;
                dip.major = 0;
                dip.minor = 0;
            }
            InodeType::File => {
                dip.typ = DInodeType::File;
                dip.major = 0;
                dip.minor = 0;
            }
        }
        dip.nlink = inner.nlink;
        dip.size = inner.size;
        dip.addr_direct = inner.addr_direct;
        dip.addr_indirect = inner.addr_indirect;
        tx.write(bp);
    }

    /// Frees every block this inode owns and zeroes its size (spec.md §4.2
    /// `itrunc`). Blocks pinned by a snapshot remain, implicitly, since
    /// `bfree` is a no-op for them.
    pub fn itrunc(&mut self, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
        let dev = self.dev();
        for i in 0..NDIRECT {
            let addr = self.inner().addr_direct[i];
            if addr != 0 {
                tx.bfree(dev, addr, holder);
                self.inner_mut().addr_direct[i] = 0;
            }
        }
        let indirect = self.inner().addr_indirect;
        if indirect != 0 {
            let bp = tx.fs.log.cache().get(dev, indirect, holder).lock(holder);
            let words = words_of(bp.data());
            for &a in words {
                if a != 0 {
                    tx.bfree(dev, a, holder);
                }
            }
            drop(bp);
            tx.bfree(dev, indirect, holder);
            self.inner_mut().addr_indirect = 0;
        }
        self.inner_mut().size = 0;
        self.update(tx, holder);
    }

    /// Copies `dst.len()` bytes (clamped to `size - off`) from the inode's
    /// content at offset `off` (spec.md §4.2 `readi`).
    pub fn read_bytes(&mut self, dst: &mut [u8], mut off: u32, sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> usize {
        let size = self.inner().size;
        let n = dst.len() as u32;
        if off > size {
            return 0;
        }
        let n = if off + n > size { size - off } else { n };
        let mut tot = 0u32;
        while tot < n {
            let bno = self.bmap(off as usize / crate::param::BSIZE, sb, log, None, holder);
            let bp = log.cache().get(self.dev(), bno, holder).lock(holder);
            let m = core::cmp::min(n - tot, crate::param::BSIZE as u32 - off % crate::param::BSIZE as u32);
            let begin = (off % crate::param::BSIZE as u32) as usize;
            dst[tot as usize..(tot + m) as usize].copy_from_slice(&bp.data().inner[begin..begin + m as usize]);
            tot += m;
            off += m;
        }
        tot as usize
    }

    /// Writes `src` into the inode's content at offset `off`, performing
    /// copy-on-write on any snapshot-pinned block first (spec.md §4.2
    /// `writei`, the COW write path). Returns the number of bytes written
    /// (fewer than `src.len()` signals the write would overflow `MAXFILE`)
    /// and whether any block was copy-on-write migrated.
    ///
    /// Step 5 of the COW write path ("if any CoW occurred, persist `smap`")
    /// is the caller's responsibility via the returned flag, rather than
    /// done here: persisting `smap` means writing `/snapshot/smap`'s
    /// content, i.e. calling back into this very function, and this crate
    /// has no global singleton to reach that file's inode from inside
    /// another inode's write path. See `fs::snapshot::persist_meta`, called
    /// from the one entry point ([`fs::mod::write_file`]) every write goes
    /// through.
    pub fn write_bytes(&mut self, src: &[u8], mut off: u32, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> (usize, bool) {
        let n = src.len() as u32;
        if off > self.inner().size {
            return (0, false);
        }
        if off as usize + src.len() > crate::param::MAXFILE * crate::param::BSIZE {
            return (0, false);
        }

        let mut cow_happened = false;
        let mut tot = 0u32;
        while tot < n {
            let bno = self.bmap(
                off as usize / crate::param::BSIZE,
                &tx.fs.superblock,
                &tx.fs.log,
                Some((tx, &mut cow_happened)),
                holder,
            );
            let mut bp = tx.fs.log.cache().get(self.dev(), bno, holder).lock(holder);
            let m = core::cmp::min(n - tot, crate::param::BSIZE as u32 - off % crate::param::BSIZE as u32);
            let begin = (off % crate::param::BSIZE as u32) as usize;
            bp.data_mut().inner[begin..begin + m as usize]
                .copy_from_slice(&src[tot as usize..(tot + m) as usize]);
            tx.write(bp);
            tot += m;
            off += m;
        }

        if off > self.inner().size {
            self.inner_mut().size = off;
        }
        // Written back even when size didn't change: `bmap` may have
        // allocated a new block and updated `addr_direct`/`addr_indirect`.
        self.update(tx, holder);
        (tot as usize, cow_happened)
    }

    /// Returns the disk block address of the `bn`th block of this inode's
    /// content, allocating one (and performing CoW migration away from any
    /// snapshot-pinned block) if `cow` is `Some`. `cow` is `None` for reads,
    /// which must never allocate or mutate (spec.md §4.2 `bmap`/`bmmap`).
    fn bmap(
        &mut self,
        bn: usize,
        sb: &Superblock,
        log: &Log<'_, '_>,
        cow: Option<(&FsTransaction<'_, '_, '_>, &mut bool)>,
        holder: usize,
    ) -> BlockNo {
        if bn < NDIRECT {
            let mut addr = self.inner().addr_direct[bn];
            if let Some((tx, cow_happened)) = cow {
                if addr != 0 && tx.fs.snapshot.lock(holder).is_pinned(addr) {
                    addr = self.cow_direct_block(bn, addr, tx, holder);
                    *cow_happened = true;
                }
                if addr == 0 {
                    addr = tx.balloc(self.dev(), holder);
                    self.inner_mut().addr_direct[bn] = addr;
                }
            } else {
                assert_ne!(addr, 0, "bmap: out of range");
            }
            addr
        } else {
            let bn = bn - NDIRECT;
            assert!(bn < NINDIRECT, "bmap: out of range");
            let mut indirect = self.inner().addr_indirect;
            match cow {
                Some((tx, cow_happened)) => {
                    if indirect != 0 && tx.fs.snapshot.lock(holder).is_pinned(indirect) {
                        indirect = self.cow_indirect_block(indirect, tx, holder);
                        *cow_happened = true;
                    }
                    if indirect == 0 {
                        indirect = tx.balloc(self.dev(), holder);
                        self.inner_mut().addr_indirect = indirect;
                    }
                    let mut bp = tx.fs.log.cache().get(self.dev(), indirect, holder).lock(holder);
                    let words = words_of_mut(bp.data_mut());
                    let mut addr = words[bn];
                    if addr == 0 {
                        addr = tx.balloc(self.dev(), holder);
                        words[bn] = addr;
                        drop(words);
                        tx.write(bp);
                    }
                    addr
                }
                None => {
                    assert_ne!(indirect, 0, "bmap: out of range");
                    let bp = log.cache().get(self.dev(), indirect, holder).lock(holder);
                    let addr = words_of(bp.data())[bn];
                    assert_ne!(addr, 0, "bmap: out of range");
                    addr
                }
            }
        }
    }

    /// Direct-block half of the COW write path (spec.md §4.2 step 2, direct
    /// case): clear `smap[old]`, copy its contents into a freshly allocated
    /// block, and return the new block number.
    fn cow_direct_block(&mut self, slot: usize, old: BlockNo, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> BlockNo {
        tx.fs.snapshot.lock(holder).unpin(old);
        self.inner_mut().addr_direct[slot] = 0;
        let fresh = tx.balloc(self.dev(), holder);
        let old_bp = tx.fs.log.cache().get(self.dev(), old, holder).lock(holder);
        let bytes = old_bp.data().inner;
        drop(old_bp);
        let mut new_bp = tx.fs.log.cache().get(self.dev(), fresh, holder).lock(holder);
        new_bp.data_mut().inner = bytes;
        tx.write(new_bp);
        self.inner_mut().addr_direct[slot] = fresh;
        fresh
    }

    /// Wholesale migration of a snapshot-pinned indirect block (spec.md
    /// §4.2 step 2, indirect case): every non-zero slot it names is
    /// reallocated, a new indirect block is built pointing at the copies,
    /// and a fresh indirect block replaces the pinned one.
    fn cow_indirect_block(&mut self, old: BlockNo, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> BlockNo {
        tx.fs.snapshot.lock(holder).unpin(old);
        let old_slots: [u32; NINDIRECT] = {
            let bp = tx.fs.log.cache().get(self.dev(), old, holder).lock(holder);
            let mut slots = [0u32; NINDIRECT];
            slots.copy_from_slice(words_of(bp.data()));
            slots
        };
        let fresh_indirect = tx.balloc(self.dev(), holder);
        let mut new_bp = tx.fs.log.cache().get(self.dev(), fresh_indirect, holder).lock(holder);
        {
            let new_slots = words_of_mut(new_bp.data_mut());
            for (slot, &old_slot) in new_slots.iter_mut().zip(old_slots.iter()) {
                *slot = if old_slot == 0 {
                    0
                } else {
                    let replacement = tx.balloc(self.dev(), holder);
                    let src = tx.fs.log.cache().get(self.dev(), old_slot, holder).lock(holder);
                    let bytes = src.data().inner;
                    drop(src);
                    let mut dst = tx.fs.log.cache().get(self.dev(), replacement, holder).lock(holder);
                    dst.data_mut().inner = bytes;
                    tx.write(dst);
                    replacement
                };
            }
        }
        tx.write(new_bp);
        fresh_indirect
    }
}

fn words_of(data: &BufData) -> &[u32] {
    // SAFETY: `u32` has no internal structure and `BufData` is `align(4)`.
    unsafe { core::slice::from_raw_parts(data.inner.as_ptr() as *const u32, NINDIRECT) }
}

fn words_of_mut(data: &mut BufData) -> &mut [u32] {
    // SAFETY: see `words_of`.
    unsafe { core::slice::from_raw_parts_mut(data.inner.as_mut_ptr() as *mut u32, NINDIRECT) }
}

/// Finalizes an inode that may have just lost its last reference (spec.md
/// §4.2 `iput`): if it is `valid` with `nlink == 0` and this is the only
/// remaining reference, truncate its content, clear its type, and persist
/// both. Must be called inside a transaction bracket, since it may free
/// disk blocks. The final reference decrement happens implicitly when `ip`
/// is dropped at the end of this function.
pub fn iput(ip: RcInode<'_>, tx: &FsTransaction<'_, '_, '_>, holder: usize) {
    let mut guard = ip.body().lock(holder);
    if guard.valid && guard.nlink == 0 {
        let refcnt = ip.itable.identity.lock(holder)[ip.idx].refcnt;
        if refcnt == 1 {
            let mut ig = InodeGuard { rc: &ip, guard: Some(guard) };
            ig.itrunc(tx, holder);
            ig.inner_mut().typ = InodeType::None;
            ig.update(tx, holder);
            ig.inner_mut().valid = false;
            return;
        }
    }
}

#[derive(Default)]
pub struct Dirent {
    pub inum: u16,
    name: [u8; DIRSIZ],
}

impl Dirent {
    /// Reads the entry at byte offset `off` of a directory's content. Used
    /// both internally and by `fs::snapshot`'s directory walks.
    pub fn read(ig: &mut InodeGuard<'_, '_>, off: u32, sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> Self {
        let mut dirent = Dirent::default();
        let bytes = dirent_as_bytes_mut(&mut dirent);
        let n = ig.read_bytes(bytes, off, sb, log, holder);
        assert_eq!(n, DIRENT_SIZE, "Dirent::read: short read");
        dirent
    }

    fn set_name(&mut self, name: &FileName) {
        let name = name.as_bytes();
        self.name = [0; DIRSIZ];
        self.name[..name.len()].copy_from_slice(name);
    }

    pub fn get_name(&self) -> &FileName {
        let len = self.name.iter().position(|ch| *ch == 0).unwrap_or(DIRSIZ);
        // SAFETY: self.name[..len] contains no NUL, len <= DIRSIZ.
        unsafe { FileName::from_bytes(&self.name[..len]) }
    }
}

fn dirent_as_bytes_mut(d: &mut Dirent) -> &mut [u8] {
    // SAFETY: `Dirent` contains only `u16`/`u8` fields with no padding
    // invariants that matter for a byte-for-byte disk round trip.
    unsafe { core::slice::from_raw_parts_mut(d as *mut Dirent as *mut u8, DIRENT_SIZE) }
}

fn dirent_as_bytes(d: &Dirent) -> &[u8] {
    unsafe { core::slice::from_raw_parts(d as *const Dirent as *const u8, DIRENT_SIZE) }
}

impl<'h, 't> InodeGuard<'h, 't> {
    /// Looks up `name` in this directory (spec.md §4.3 `dirlookup`).
    pub fn dirlookup(&mut self, name: &FileName, itable: &'t Itable, sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> Option<(RcInode<'t>, u32)> {
        assert_eq!(self.inner().typ, InodeType::Dir, "dirlookup: not a directory");
        let size = self.inner().size;
        let mut off = 0;
        while off < size {
            let de = Dirent::read(self, off, sb, log, holder);
            if de.inum != 0 && de.get_name() == name {
                return Some((get_inode(itable, self.dev(), de.inum as u32), off));
            }
            off += DIRENT_SIZE as u32;
        }
        None
    }

    /// Writes a new `(name, inum)` entry into this directory, into the
    /// first free slot or appended at the end (spec.md §4.3 `dirlink`).
    /// Rejects a duplicate name.
    pub fn dirlink(&mut self, name: &FileName, inum: u32, itable: &'t Itable, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> Result<(), ()> {
        if self.dirlookup(name, itable, &tx.fs.superblock, &tx.fs.log, holder).is_some() {
            return Err(());
        }
        let size = self.inner().size;
        let mut off = 0;
        let mut free_off = None;
        while off < size {
            let de = Dirent::read(self, off, &tx.fs.superblock, &tx.fs.log, holder);
            if de.inum == 0 {
                free_off = Some(off);
                break;
            }
            off += DIRENT_SIZE as u32;
        }
        let off = free_off.unwrap_or(size);
        let mut de = Dirent { inum: inum as u16, name: [0; DIRSIZ] };
        de.set_name(name);
        // Directory content blocks are never snapshot-pinned (spec.md §4.2:
        // "directory writes bypass CoW"), so `write_bytes`'s CoW path is
        // always a no-op here; the flag is discarded.
        let (n, _) = self.write_bytes(dirent_as_bytes(&de), off, tx, holder);
        assert_eq!(n, DIRENT_SIZE, "dirlink: short write");
        Ok(())
    }

    /// Clears the entry named `name`, if present.
    pub fn dirunlink(&mut self, name: &FileName, sb: &Superblock, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> bool {
        let size = self.inner().size;
        let mut off = 0;
        while off < size {
            let de = Dirent::read(self, off, sb, &tx.fs.log, holder);
            if de.inum != 0 && de.get_name() == name {
                let cleared = Dirent::default();
                let (n, _) = self.write_bytes(dirent_as_bytes(&cleared), off, tx, holder);
                assert_eq!(n, DIRENT_SIZE, "dirunlink: short write");
                return true;
            }
            off += DIRENT_SIZE as u32;
        }
        false
    }

}

impl Itable {
    pub fn new(chan: &'static dyn crate::hal::WaitChannel) -> Self {
        Self {
            identity: Spinlock::new(array![_ => Identity::empty(); NINODE]),
            body: array![_ => Sleeplock::new(chan, InodeInner::zero()); NINODE],
        }
    }
}

/// Finds or creates a cache entry for `(dev, inum)` and bumps its refcount
/// (spec.md §4.2 `iget`). Does not touch the disk. Panics if the cache is
/// exhausted, mirroring the teacher's `find_or_alloc`; see
/// [`get_inode_safe`] for the non-panicking variant used by paths that must
/// not fail the whole operation just because the cache is full.
pub fn get_inode(itable: &Itable, dev: u32, inum: u32) -> RcInode<'_> {
    get_inode_safe(itable, dev, inum).expect("Itable::get_inode: no inodes")
}

/// As [`get_inode`], but returns `None` instead of panicking when every
/// slot is pinned (spec.md §4.2: "a `_safe` variant returns null instead").
pub fn get_inode_safe(itable: &Itable, dev: u32, inum: u32) -> Option<RcInode<'_>> {
    let mut ids = itable.identity.lock(0);
    if let Some(idx) = ids.iter().position(|id| id.refcnt > 0 && id.dev == dev && id.inum == inum) {
        ids[idx].refcnt += 1;
        return Some(RcInode { itable, idx, dev, inum });
    }
    let idx = ids.iter().position(|id| id.refcnt == 0)?;
    ids[idx] = Identity { dev, inum, refcnt: 1 };
    drop(ids);
    itable.body[idx].lock(0).valid = false;
    Some(RcInode { itable, idx, dev, inum })
}

/// Allocates a fresh on-disk inode of type `typ` and returns a cached
/// reference to it (spec.md §4.2, paired with `iget`).
pub fn alloc_inode<'t>(itable: &'t Itable, typ: InodeType, tx: &FsTransaction<'_, '_, '_>, holder: usize) -> RcInode<'t> {
    let sb = &tx.fs.superblock;
    for inum in 1..sb.ninodes {
        let mut bp = tx.fs.log.cache().get(crate::param::ROOTDEV, sb.iblock(inum), holder).lock(holder);
        let dip = dinode_at_mut(bp.data_mut(), inum);
        if dip.typ == DInodeType::None {
            *dip = Dinode {
                typ: DInodeType::None,
                major: 0,
                minor: 0,
                nlink: 0,
                size: 0,
                addr_direct: [0; NDIRECT],
                addr_indirect: 0,
            };
            match typ {
                InodeType::None => dip.typ = DInodeType::None,
                InodeType::Dir => dip.typ = DInodeType::Dir,
                InodeType::File => dip.typ = DInodeType::File,
                InodeType::Device { major, minor } => {
                    dip.typ = DInodeType::Device;
                    dip.major = major;
                    dip.minor = minor;
                }
            }
            tx.write(bp);
            return get_inode(itable, crate::param::ROOTDEV, inum);
        }
    }
    panic!("alloc_inode: no inodes");
}

/// Scans every on-disk inode slot and counts the allocated ones. Used by
/// `fs::snapshot`'s capacity checks before a create/rollback.
pub fn count_allocated_inodes(sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> u32 {
    let mut count = 0;
    for inum in 1..sb.ninodes {
        let bp = log.cache().get(crate::param::ROOTDEV, sb.iblock(inum), holder).lock(holder);
        if dinode_at(bp.data(), inum).typ != DInodeType::None {
            count += 1;
        }
    }
    count
}

/// Canonical path walk (spec.md §4.3 `namex`): resolves `path` relative to
/// `cwd` (or the root, if `path` is absolute), following `.`/`..` as
/// ordinary directory entries. Returns the named inode, or — if `parent` is
/// set — the parent directory and the final path element.
fn namex<'t, 's>(
    itable: &'t Itable,
    mut path: &'s Path,
    parent: bool,
    cwd: &RcInode<'t>,
    root: &RcInode<'t>,
    sb: &Superblock,
    log: &Log<'_, '_>,
    holder: usize,
) -> Result<(RcInode<'t>, Option<&'s FileName>), ()> {
    let mut ptr = if path.is_absolute() { root.clone() } else { cwd.clone() };

    while let Some((rest, name)) = path.skipelem() {
        path = rest;
        let mut ig = ptr.lock(sb, log, holder);
        if ig.inner().typ != InodeType::Dir {
            return Err(());
        }
        if parent && path.is_empty_string() {
            drop(ig);
            return Ok((ptr, Some(name)));
        }
        let next = ig.dirlookup(name, itable, sb, log, holder);
        drop(ig);
        ptr = next.ok_or(())?.0;
    }
    if parent {
        return Err(());
    }
    Ok((ptr, None))
}

pub fn namei<'t>(itable: &'t Itable, path: &Path, cwd: &RcInode<'t>, root: &RcInode<'t>, sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> Result<RcInode<'t>, ()> {
    Ok(namex(itable, path, false, cwd, root, sb, log, holder)?.0)
}

pub fn nameiparent<'t, 's>(itable: &'t Itable, path: &'s Path, cwd: &RcInode<'t>, root: &RcInode<'t>, sb: &Superblock, log: &Log<'_, '_>, holder: usize) -> Result<(RcInode<'t>, &'s FileName), ()> {
    let (ip, name) = namex(itable, path, true, cwd, root, sb, log, holder)?;
    Ok((ip, name.ok_or(())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::BufCache;
    use crate::fs::test_support::{self, FakeDisk};
    use crate::fs::{read_file, FileSystem};
    use crate::hal::fake::FakeTicks;
    use crate::param::ROOTDEV;

    fn holder() -> usize {
        0
    }

    #[test]
    fn write_bytes_migrates_a_pinned_block_and_leaves_the_old_one_untouched() {
        let disk = FakeDisk::<128>::new();
        test_support::format(&disk, 20, 40);
        let ticks = FakeTicks::new();
        let cache = BufCache::new(&disk, &ticks, &test_support::CHAN);
        let fs = FileSystem::new(&cache, ROOTDEV, &test_support::CHAN, &test_support::CHAN, holder());

        {
            let tx = FsTransaction::new(&fs, holder());
            test_support::bootstrap_root(&fs.itable, &tx, holder());
        }
        let root = fs.root();
        let file = {
            let tx = FsTransaction::new(&fs, holder());
            test_support::link_new_file(&fs.itable, &root, test_support::name(b"a"), &tx, holder())
        };

        let old_bno = {
            let tx = FsTransaction::new(&fs, holder());
            let (n, cow) = file.lock(&fs.superblock, &fs.log, holder()).write_bytes(b"original", 0, &tx, holder());
            assert_eq!(n, 8);
            assert!(!cow, "no snapshot exists yet, the very first write must not CoW");
            file.lock(&fs.superblock, &fs.log, holder()).inner().addr_direct[0]
        };
        assert_ne!(old_bno, 0);

        // Simulate a live snapshot pinning this block, without building a
        // whole snapshot tree around it.
        fs.snapshot.lock(holder()).pin(old_bno);

        let new_bno = {
            let tx = FsTransaction::new(&fs, holder());
            let (n, cow) = file.lock(&fs.superblock, &fs.log, holder()).write_bytes(b"updated!", 0, &tx, holder());
            assert_eq!(n, 8);
            assert!(cow, "writing a pinned block must copy-on-write");
            file.lock(&fs.superblock, &fs.log, holder()).inner().addr_direct[0]
        };
        assert_ne!(new_bno, old_bno, "CoW must migrate to a fresh block");
        assert!(!fs.snapshot.lock(holder()).is_pinned(old_bno), "cow_direct_block must unpin the old block");

        let mut buf = [0u8; 8];
        let n = read_file(&file, &mut buf, 0, &fs, holder());
        assert_eq!(n, 8);
        assert_eq!(&buf, b"updated!");

        let old_bp = fs.log.cache().get(ROOTDEV, old_bno, holder()).lock(holder());
        assert_eq!(&old_bp.data().inner[0..8], b"original", "the old, still-pinned-by-the-snapshot block must keep its original content");
    }
}
