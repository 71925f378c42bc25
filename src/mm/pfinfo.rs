//! Physical-frame table and allocator (spec.md §3/§4.5), grounded in the
//! teacher's `kalloc.rs` `Kmem` singly-linked freelist, extended with the
//! per-frame bookkeeping record (`allocated`, `pid`, `start_tick`, `refcnt`)
//! the teacher's bare freelist does not track.
//!
//! Two locks, back to back in the hierarchy (spec.md §5 #5/#6): `pflock`
//! guards `pf_info[]`, `kmem.lock` guards the freelist. They are kept as two
//! distinct `Spinlock`s, not one, for the same reason `bio`/`fs::inode`
//! never collapse their two-level locking into a single lock.

use crate::hal::{PhysMem, ProcessId, TickSource};
use crate::lock::Spinlock;
use crate::param::PFNNUM;

use super::Pfn;

/// One entry of `pf_info[PFNNUM]` (spec.md §3). Invariant: `refcnt == 0` iff
/// the frame is on the freelist and `allocated` is false.
#[derive(Clone, Copy, Debug)]
pub struct FrameRecord {
    pub allocated: bool,
    pub pid: ProcessId,
    pub start_tick: u64,
    pub refcnt: u32,
}

impl FrameRecord {
    const fn empty() -> Self {
        Self {
            allocated: false,
            pid: ProcessId::NONE,
            start_tick: 0,
            refcnt: 0,
        }
    }
}

/// An index-linked singly-linked free list over `pf_info`'s own slots,
/// standing in for the teacher's pointer-linked `Run` chain through real
/// physical memory (this crate does not own that memory; see `hal::PhysMem`).
struct Freelist {
    head: Option<Pfn>,
    next: [Option<Pfn>; PFNNUM],
}

impl Freelist {
    const fn empty() -> Self {
        Self {
            head: None,
            next: [None; PFNNUM],
        }
    }

    fn push(&mut self, pfn: Pfn) {
        self.next[pfn] = self.head;
        self.head = Some(pfn);
    }

    fn pop(&mut self) -> Option<Pfn> {
        let pfn = self.head?;
        self.head = self.next[pfn];
        Some(pfn)
    }
}

pub struct PfTable {
    info: Spinlock<[FrameRecord; PFNNUM]>,
    freelist: Spinlock<Freelist>,
}

impl PfTable {
    pub const fn new() -> Self {
        Self {
            info: Spinlock::new([FrameRecord::empty(); PFNNUM]),
            freelist: Spinlock::new(Freelist::empty()),
        }
    }

    /// Seeds the freelist with every frame in `0..PFNNUM`, matching the
    /// teacher's `kinit`/`freerange` sweep over all usable physical memory.
    /// Call once at boot, before any `kalloc`.
    pub fn init(&self, holder: usize) {
        let mut free = self.freelist.lock(holder);
        for pfn in (0..PFNNUM).rev() {
            free.push(pfn);
        }
    }

    /// Pops a frame from the freelist and, on success, marks it allocated.
    /// Returns `None` on OOM (spec.md §4.5: "returns zero on OOM").
    pub fn kalloc(&self, store_pid: Option<ProcessId>, ticks: &dyn TickSource, holder: usize) -> Option<Pfn> {
        let pfn = self.freelist.lock(holder).pop()?;
        let mut info = self.info.lock(holder);
        let rec = &mut info[pfn];
        debug_assert!(!rec.allocated && rec.refcnt == 0, "kalloc handed out a live frame");
        rec.allocated = true;
        rec.refcnt = 1;
        rec.start_tick = ticks.ticks();
        rec.pid = store_pid.unwrap_or(ProcessId::NONE);
        Some(pfn)
    }

    /// Bumps a frame's refcnt, e.g. on fork sharing a CoW page. Panics if
    /// the frame is not currently allocated (double-share of a free frame
    /// is a protocol misuse, spec.md §4.9).
    pub fn incref(&self, pfn: Pfn, holder: usize) {
        let mut info = self.info.lock(holder);
        let rec = &mut info[pfn];
        assert!(rec.allocated, "incref on a frame that is not allocated");
        rec.refcnt += 1;
    }

    /// Decrements a frame's refcnt; when it reaches zero, poisons the frame
    /// and returns it to the freelist (spec.md §4.5). Double-free (refcnt
    /// already zero) is a fatal invariant violation.
    pub fn kfree(&self, pfn: Pfn, phys: &dyn PhysMem, holder: usize) {
        assert!(pfn < PFNNUM, "kfree on an out-of-range frame index");
        let freed = {
            let mut info = self.info.lock(holder);
            let rec = &mut info[pfn];
            assert!(rec.allocated && rec.refcnt > 0, "double free of frame {pfn}");
            rec.refcnt -= 1;
            if rec.refcnt == 0 {
                *rec = FrameRecord::empty();
                true
            } else {
                false
            }
        };
        if freed {
            phys.poison_frame(pfn);
            self.freelist.lock(holder).push(pfn);
        }
    }

    pub fn refcnt(&self, pfn: Pfn, holder: usize) -> u32 {
        self.info.lock(holder)[pfn].refcnt
    }

    /// Copies `pf_info[]` records into `out`, for `dump_physmem_info`
    /// (spec.md §6). Returns the number of records copied.
    pub fn dump(&self, out: &mut [FrameRecord], holder: usize) -> usize {
        let info = self.info.lock(holder);
        let n = out.len().min(info.len());
        out[..n].copy_from_slice(&info[..n]);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fake::{FakePhysMem, FakeTicks};

    fn holder() -> usize {
        0
    }

    #[test]
    fn alloc_then_free_round_trips_through_freelist() {
        let table = PfTable::new();
        table.init(holder());
        let ticks = FakeTicks::new();
        let phys: FakePhysMem<PFNNUM, 8> = FakePhysMem::new();

        let pfn = table.kalloc(Some(ProcessId(7)), &ticks, holder()).expect("OOM");
        assert_eq!(table.refcnt(pfn, holder()), 1);

        table.kfree(pfn, &phys, holder());
        assert_eq!(table.refcnt(pfn, holder()), 0);

        // poisoned on free
        assert_eq!(phys.read(pfn, 0), 0x01);

        // the freed frame is reusable
        let pfn2 = table.kalloc(None, &ticks, holder()).expect("OOM");
        assert_eq!(pfn, pfn2);
    }

    #[test]
    fn incref_requires_two_kfrees() {
        let table = PfTable::new();
        table.init(holder());
        let ticks = FakeTicks::new();
        let phys: FakePhysMem<PFNNUM, 8> = FakePhysMem::new();

        let pfn = table.kalloc(None, &ticks, holder()).unwrap();
        table.incref(pfn, holder());
        assert_eq!(table.refcnt(pfn, holder()), 2);

        table.kfree(pfn, &phys, holder());
        assert_eq!(table.refcnt(pfn, holder()), 1);
        table.kfree(pfn, &phys, holder());
        assert_eq!(table.refcnt(pfn, holder()), 0);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let table = PfTable::new();
        table.init(holder());
        let ticks = FakeTicks::new();
        let phys: FakePhysMem<PFNNUM, 8> = FakePhysMem::new();

        let pfn = table.kalloc(None, &ticks, holder()).unwrap();
        table.kfree(pfn, &phys, holder());
        table.kfree(pfn, &phys, holder());
    }
}
