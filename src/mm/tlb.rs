//! Software TLB (spec.md §3/§4.7): direct-mapped, single-way, fixed
//! capacity `NUMTLB`. A miss costs a page-fault round trip through
//! `mm::pagefault`'s soft-TLB materialization branch; there is no victim
//! selection policy because there is no associativity to select among.

use crate::hal::ProcessId;
use crate::lock::Spinlock;
use crate::param::NUMTLB;

use super::pte::PteFlags;
use super::Pfn;

#[derive(Clone, Copy)]
struct Slot {
    valid: bool,
    pid: ProcessId,
    vpn: usize,
    pfn: Pfn,
    flags: u32,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            valid: false,
            pid: ProcessId::NONE,
            vpn: 0,
            pfn: 0,
            flags: 0,
        }
    }
}

struct TlbState {
    slots: [Slot; NUMTLB],
    hits: u64,
    misses: u64,
}

pub struct SoftTlb {
    state: Spinlock<TlbState>,
}

fn index_of(pid: ProcessId, vpn: usize) -> usize {
    ((pid.0 as usize) ^ vpn) & (NUMTLB - 1)
}

impl SoftTlb {
    pub const fn new() -> Self {
        Self {
            state: Spinlock::new(TlbState {
                slots: [Slot::empty(); NUMTLB],
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Looks up `(pid, va)`'s mapping. On hit, returns the full physical
    /// address (offset preserved) and flags, and increments `hits`; on
    /// miss, increments `misses` and returns `None`.
    pub fn lookup(&self, pid: ProcessId, va: usize, page_size: usize, holder: usize) -> Option<(usize, PteFlags)> {
        let vpn = va / page_size;
        let idx = index_of(pid, vpn);
        let mut st = self.state.lock(holder);
        let slot = st.slots[idx];
        if slot.valid && slot.pid == pid && slot.vpn == vpn {
            st.hits += 1;
            let pa = slot.pfn * page_size + (va % page_size);
            Some((pa, PteFlags::from_bits_truncate(slot.flags)))
        } else {
            st.misses += 1;
            None
        }
    }

    /// Unconditionally installs `(pid, va) -> pfn` at its indexed slot,
    /// overwriting whatever was there (no victim policy, spec.md §4.7).
    pub fn alloc(&self, pid: ProcessId, va: usize, pfn: Pfn, flags: PteFlags, page_size: usize, holder: usize) {
        let vpn = va / page_size;
        let idx = index_of(pid, vpn);
        let mut st = self.state.lock(holder);
        st.slots[idx] = Slot {
            valid: true,
            pid,
            vpn,
            pfn,
            flags: flags.bits(),
        };
    }

    /// Invalidates every entry belonging to `pid` (spec.md §4.7, on exit).
    pub fn invalidate_process(&self, pid: ProcessId, holder: usize) {
        let mut st = self.state.lock(holder);
        for slot in st.slots.iter_mut() {
            if slot.valid && slot.pid == pid {
                slot.valid = false;
            }
        }
    }

    /// Invalidates the single slot indexed by `(pid, va)`, if it still
    /// matches (`tlbivltp`).
    pub fn tlbivltp(&self, pid: ProcessId, va: usize, holder: usize) {
        self.invalidate_indexed(pid, va, crate::param::PGSIZE, holder)
    }

    fn invalidate_indexed(&self, pid: ProcessId, va: usize, page_size: usize, holder: usize) {
        let vpn = va / page_size;
        let idx = index_of(pid, vpn);
        let mut st = self.state.lock(holder);
        let slot = &mut st.slots[idx];
        if slot.valid && slot.pid == pid && slot.vpn == vpn {
            slot.valid = false;
        }
    }

    /// Invalidates every entry (`tlbflsh`).
    pub fn flush_all(&self, holder: usize) {
        let mut st = self.state.lock(holder);
        for slot in st.slots.iter_mut() {
            slot.valid = false;
        }
    }

    /// `tlbinfo`: the running hit/miss counters (spec.md §6).
    pub fn info(&self, holder: usize) -> (u64, u64) {
        let st = self.state.lock(holder);
        (st.hits, st.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::PGSIZE;

    fn holder() -> usize {
        0
    }

    #[test]
    fn alloc_then_lookup_hits() {
        let tlb = SoftTlb::new();
        let pid = ProcessId(3);
        tlb.alloc(pid, 0x2000, 5, PteFlags::P | PteFlags::W, PGSIZE, holder());
        let (pa, flags) = tlb.lookup(pid, 0x2000 + 0x10, PGSIZE, holder()).expect("should hit");
        assert_eq!(pa, 5 * PGSIZE + 0x10);
        assert!(flags.contains(PteFlags::W));
    }

    #[test]
    fn hits_and_misses_each_increase_by_one() {
        let tlb = SoftTlb::new();
        let pid = ProcessId(1);
        let (h0, m0) = tlb.info(holder());
        tlb.lookup(pid, 0x3000, PGSIZE, holder());
        let (h1, m1) = tlb.info(holder());
        assert_eq!((h1, m1), (h0, m0 + 1));

        tlb.alloc(pid, 0x3000, 1, PteFlags::P, PGSIZE, holder());
        tlb.lookup(pid, 0x3000, PGSIZE, holder());
        let (h2, m2) = tlb.info(holder());
        assert_eq!((h2, m2), (h1 + 1, m1));
    }

    #[test]
    fn tlbivltp_clears_only_matching_slot() {
        let tlb = SoftTlb::new();
        let pid = ProcessId(2);
        tlb.alloc(pid, 0x4000, 9, PteFlags::P, PGSIZE, holder());
        tlb.tlbivltp(pid, 0x4000, holder());
        assert!(tlb.lookup(pid, 0x4000, PGSIZE, holder()).is_none());
    }
}
