//! Ambient configuration constants.
//!
//! Kept as plain `pub const` items the way the teacher's `param.rs` does —
//! there is no runtime configuration file format in this kernel core.

/// Maximum number of active i-nodes.
pub const NINODE: usize = 50;

/// Device number of the file system's root disk.
pub const ROOTDEV: u32 = 1;

/// Block size, in bytes.
pub const BSIZE: usize = 1024;

/// Max # of distinct blocks any single FS op writes.
pub const MAXOPBLOCKS: usize = 10;

/// Max data blocks in the on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Size of the disk block cache.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Maximum file path name length.
pub const MAXPATH: usize = 128;

/// Direct block addresses per inode.
pub const NDIRECT: usize = 12;

/// Block addresses per indirect block.
pub const NINDIRECT: usize = BSIZE / 4;

/// Largest file size expressible by `NDIRECT + NINDIRECT` blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// Directory entry name length.
pub const DIRSIZ: usize = 14;

/// Total number of blocks on the simulated device; sizes the free-block
/// bitmap and the snapshot `smap` bit-array identically (spec.md §3).
pub const FSSIZE: usize = 200_000;

/// Bytes needed for a one-bit-per-block `smap` covering `FSSIZE` blocks.
pub const SMAP_BYTES: usize = (FSSIZE + 7) / 8;

/// Inode number of the file system root directory.
pub const ROOTINO: u32 = 1;

/// Page size of the simulated MMU.
pub const PGSIZE: usize = 4096;

/// Number of physical frame records tracked by `pf_info` (spec.md §3).
pub const PFNNUM: usize = 4096;

/// Number of inverted-page-table hash buckets (spec.md §3/§4.6).
pub const IPT_BUCKETS: usize = 60000;

/// Capacity of the IPT entry pool (page-slab backed, see `mm::ipt`).
pub const IPT_POOL_CAPACITY: usize = 2048;

/// Number of direct-mapped soft-TLB entries (spec.md §3/§4.7).
pub const NUMTLB: usize = 128;

/// Bound on the per-process VA tracker array (spec.md §3).
pub const MAX_TRACKERS: usize = 64;

/// Maximum number of CPUs whose push_off/pop_off nesting state this crate
/// tracks for `RawSpinlock` (spec.md §5).
pub const NCPU: usize = 8;
