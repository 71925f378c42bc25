//! Free-block allocator (spec.md §4.1).
//!
//! `balloc`/`bfree` scan/clear the on-disk free bitmap one block at a time,
//! both routed through the transaction log. `bfree` additionally consults
//! the snapshot engine's `smap`: a snapshot-pinned block must not be freed
//! (spec.md §3 "Ownership and lifecycles": co-owned by the live tree and the
//! snapshot subtree).

use crate::fs::log::Log;
use crate::fs::superblock::{Superblock, BPB};
use crate::hal::BlockNo;
use crate::param::BSIZE;

/// Scans the free bitmap for the first clear bit, sets it, zeroes the block,
/// and returns its number. Fatal (per spec.md §4.9) if the device is full —
/// an allocator with no free blocks left is an unrecoverable configuration
/// error, not something callers are expected to handle.
pub fn balloc<'c, 'd>(
    sb: &Superblock,
    log: &Log<'c, 'd>,
    dev: u32,
    holder: usize,
) -> BlockNo {
    let mut b = 0u32;
    while b < sb.size {
        let mut bp = log.cache().get(dev, sb.bblock(b), holder).lock(holder);
        let mut bi = 0u32;
        while bi < BPB && b + bi < sb.size {
            let m = 1u8 << (bi % 8);
            let byte = &mut bp.data_mut().inner[(bi / 8) as usize];
            if *byte & m == 0 {
                *byte |= m;
                log.write(bp);
                zero_block(log, dev, b + bi, holder);
                return b + bi;
            }
            bi += 1;
        }
        b += BPB;
    }
    panic!("balloc: out of blocks");
}

/// Zero-fills a freshly allocated block before handing it out (recovered
/// from the original's `bzero`, which the distilled spec mentions only in
/// passing as "the block zeroed").
pub fn zero_block<'c, 'd>(log: &Log<'c, 'd>, dev: u32, bno: BlockNo, holder: usize) {
    let mut bp = log.cache().get(dev, bno, holder).lock(holder);
    bp.data_mut().inner = [0; BSIZE];
    bp.mark_valid();
    log.write(bp);
}

/// Clears the bitmap bit for `bno`, unless `bno` is pinned by a live
/// snapshot, in which case this is silently a no-op (spec.md §4.1, §4.9).
/// Freeing an already-free block is a fatal invariant violation.
pub fn bfree<'c, 'd>(
    sb: &Superblock,
    log: &Log<'c, 'd>,
    dev: u32,
    bno: BlockNo,
    pinned: bool,
    holder: usize,
) {
    if pinned {
        return;
    }
    let mut bp = log.cache().get(dev, sb.bblock(bno), holder).lock(holder);
    let bi = bno % BPB;
    let m = 1u8 << (bi % 8);
    let byte = &mut bp.data_mut().inner[(bi / 8) as usize];
    assert_ne!(*byte & m, 0, "bfree: freeing free block {}", bno);
    *byte &= !m;
    log.write(bp);
}
