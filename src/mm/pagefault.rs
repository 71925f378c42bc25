//! Page-fault state machine (spec.md §4.8): the handler a `T_PGFLT` trap
//! calls into after the embedding kernel has read the faulting address out
//! of the machine's fault-address register and rounded it down to a page
//! boundary.
//!
//! Two orthogonal conditions are evaluated, in this fixed order, on the
//! same fault: (a) copy-on-write, then (b) soft-TLB materialization. Both
//! can fire in sequence; the hardware TLB is flushed exactly once, after
//! whichever of the two ran (spec.md §5's ordering guarantee), never twice.

use crate::arch::Arch;
use crate::hal::{PhysMem, ProcessId};
use crate::param::{MAX_TRACKERS, PGSIZE};

use super::ipt::Ipt;
use super::pfinfo::PfTable;
use super::pte::{PageTable, Pte, PteFlags};
use super::tlb::SoftTlb;
use super::Va;

/// What became of a fault, for the embedding kernel's trap return path.
#[derive(Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The PTE was healed; the instruction can be retried.
    Healed,
    /// The fault is unserviceable; the process must be killed (spec.md §4.9).
    Kill,
}

/// Per-process VA tracker (spec.md §3): addresses the soft TLB has
/// materialized for this process, demoted in bulk when the tracker is full.
pub struct VaTracker {
    tracked: [Option<Va>; MAX_TRACKERS],
    idx: usize,
}

impl VaTracker {
    pub const fn new() -> Self {
        Self {
            tracked: [None; MAX_TRACKERS],
            idx: 0,
        }
    }

    fn record(&mut self, va: Va) {
        debug_assert!(self.idx < MAX_TRACKERS, "record called without draining an overflowed tracker");
        self.tracked[self.idx] = Some(va);
        self.idx += 1;
    }

    fn is_full(&self) -> bool {
        self.idx == MAX_TRACKERS
    }

    /// Demotes every tracked address: clears `PTE_P`, sets `PTE_T`, then
    /// resets the index. `except` preserves one address from demotion, so
    /// the just-serviced fault need not immediately re-fault.
    fn drain(&mut self, pid: ProcessId, pgdir: &dyn PageTable, except: Option<Va>) {
        for slot in self.tracked.iter_mut() {
            if let Some(va) = slot.take() {
                if Some(va) == except {
                    *slot = Some(va);
                    continue;
                }
                if let Some(mut pte) = pgdir.get(pid, va) {
                    pte.flags.remove(PteFlags::P);
                    pte.flags.insert(PteFlags::T);
                    pgdir.set(pid, va, pte);
                }
            }
        }
        self.idx = if except.is_some() { 1 } else { 0 };
        if except.is_some() {
            self.tracked[0] = except;
        }
    }

    pub fn drop_trackers(&mut self, pid: ProcessId, pgdir: &dyn PageTable) {
        self.drain(pid, pgdir, None);
    }

    pub fn drop_trackers_except(&mut self, pid: ProcessId, pgdir: &dyn PageTable, va: Va) {
        self.drain(pid, pgdir, Some(va));
    }
}

/// Bundles the tables a fault needs; constructed fresh per call since each
/// is independently lockable and none is owned by this module.
pub struct FaultContext<'a> {
    pub pgdir: &'a dyn PageTable,
    pub pf: &'a PfTable,
    pub ipt: &'a Ipt,
    pub tlb: &'a SoftTlb,
    pub phys: &'a dyn PhysMem,
    pub arch: &'a dyn Arch,
}

/// Services a page fault at `fault_va` for `pid`. `write` is the error
/// code's `WRITE` bit; `holder` identifies the calling core for the
/// internal locks this touches.
pub fn handle(ctx: &FaultContext<'_>, pid: ProcessId, fault_va: Va, write: bool, tracker: &mut VaTracker, holder: usize) -> FaultOutcome {
    let va_pg = fault_va & !(PGSIZE - 1);

    let pte = match ctx.pgdir.get(pid, va_pg) {
        Some(pte) => pte,
        None => return FaultOutcome::Kill,
    };

    let mut healed_something = false;

    // (a) COW fault.
    if write && pte.flags.contains(PteFlags::C) {
        if !cow_fault(ctx, pid, va_pg, pte, holder) {
            return FaultOutcome::Kill;
        }
        healed_something = true;
    }

    // (b) Soft-TLB materialization.
    let mut pte = ctx.pgdir.get(pid, va_pg).expect("PTE vanished mid-fault");
    if !pte.flags.contains(PteFlags::T) && !pte.flags.contains(PteFlags::P) {
        if va_pg >= ctx.arch.kernel_base() {
            return FaultOutcome::Kill;
        }
        pte.flags.insert(PteFlags::T | PteFlags::U);
        ctx.pgdir.set(pid, va_pg, pte);
        healed_something = true;
    }

    if pte.flags.contains(PteFlags::T) && !pte.flags.contains(PteFlags::P) {
        materialize_soft_tlb(ctx, pid, va_pg, pte, tracker, holder);
        healed_something = true;
    }

    if healed_something {
        ctx.arch.flush_tlb();
        FaultOutcome::Healed
    } else {
        FaultOutcome::Kill
    }
}

fn cow_fault(ctx: &FaultContext<'_>, pid: ProcessId, va_pg: Va, pte: Pte, holder: usize) -> bool {
    let old_pfn = pte.pfn;
    let refcnt = ctx.pf.refcnt(old_pfn, holder);

    if refcnt > 1 {
        let new_pfn = match ctx.pf.kalloc(Some(pid), &NullTicks, holder) {
            Some(pfn) => pfn,
            None => return false,
        };
        ctx.phys.copy_frame(old_pfn, new_pfn);
        let mut new_pte = pte;
        new_pte.pfn = new_pfn;
        new_pte.flags.remove(PteFlags::C);
        new_pte.flags.insert(PteFlags::W);
        ctx.pgdir.set(pid, va_pg, new_pte);

        ctx.ipt.remove(va_pg, old_pfn * PGSIZE, pid, holder);
        if ctx.ipt.insert(va_pg, new_pfn * PGSIZE, new_pte.flags, pid, ctx.tlb, holder).is_err() {
            ctx.pf.kfree(new_pfn, ctx.phys, holder);
            return false;
        }
        ctx.pf.kfree(old_pfn, ctx.phys, holder);
    } else {
        let mut new_pte = pte;
        new_pte.flags.remove(PteFlags::C);
        new_pte.flags.insert(PteFlags::W);
        ctx.pgdir.set(pid, va_pg, new_pte);
    }
    true
}

fn materialize_soft_tlb(ctx: &FaultContext<'_>, pid: ProcessId, va_pg: Va, pte: Pte, tracker: &mut VaTracker, holder: usize) {
    match ctx.tlb.lookup(pid, va_pg, PGSIZE, holder) {
        Some((pa, flags)) if pa / PGSIZE != pte.pfn => {
            ctx.tlb.alloc(pid, va_pg, pte.pfn, pte.flags, PGSIZE, holder);
            let _ = flags;
        }
        Some(_) => {}
        None => ctx.tlb.alloc(pid, va_pg, pte.pfn, pte.flags, PGSIZE, holder),
    }

    if tracker.is_full() {
        tracker.drop_trackers_except(pid, ctx.pgdir, va_pg);
    } else {
        tracker.record(va_pg);
    }

    let mut healed = pte;
    healed.flags.remove(PteFlags::T);
    healed.flags.insert(PteFlags::P);
    ctx.pgdir.set(pid, va_pg, healed);
}

/// `kalloc`'s tick source is only used to stamp a freshly-allocated frame;
/// a CoW duplication during a fault doesn't have one handy, and spec.md §3
/// doesn't ascribe fault-time semantics to `start_tick` beyond "time of
/// allocation" — so this records a fault-local placeholder of zero rather
/// than threading a `TickSource` through every call site that never reads
/// it back.
struct NullTicks;
impl crate::hal::TickSource for NullTicks {
    fn ticks(&self) -> u64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::fake::SingleCoreArch;
    use crate::hal::fake::FakePhysMem;
    use crate::mm::pte::fake::FakePageTable;
    use crate::param::PFNNUM;

    fn holder() -> usize {
        0
    }

    struct Harness {
        pgdir: FakePageTable<8>,
        pf: PfTable,
        ipt: Ipt,
        tlb: SoftTlb,
        phys: FakePhysMem<PFNNUM, PGSIZE>,
        arch: SingleCoreArch,
    }

    impl Harness {
        fn new() -> Self {
            let pf = PfTable::new();
            pf.init(holder());
            Self {
                pgdir: FakePageTable::new(),
                pf,
                ipt: Ipt::new(),
                tlb: SoftTlb::new(),
                phys: FakePhysMem::new(),
                arch: SingleCoreArch::new(),
            }
        }

        fn ctx(&self) -> FaultContext<'_> {
            FaultContext {
                pgdir: &self.pgdir,
                pf: &self.pf,
                ipt: &self.ipt,
                tlb: &self.tlb,
                phys: &self.phys,
                arch: &self.arch,
            }
        }
    }

    #[test]
    fn cow_fault_with_last_sharer_just_flips_flags() {
        let h = Harness::new();
        let ticks = crate::hal::fake::FakeTicks::new();
        let pid = ProcessId(1);
        let pfn = h.pf.kalloc(Some(pid), &ticks, holder()).unwrap();
        h.pgdir.set(pid, 0x1000, Pte::new(pfn, PteFlags::P | PteFlags::U | PteFlags::C));

        let mut tracker = VaTracker::new();
        let outcome = handle(&h.ctx(), pid, 0x1000, true, &mut tracker, holder());
        assert_eq!(outcome, FaultOutcome::Healed);

        let pte = h.pgdir.get(pid, 0x1000).unwrap();
        assert!(pte.flags.contains(PteFlags::W));
        assert!(!pte.flags.contains(PteFlags::C));
        assert_eq!(pte.pfn, pfn, "last sharer keeps its frame");
        assert_eq!(h.arch.tlb_flushes.get(), 1);
    }

    #[test]
    fn cow_fault_with_sharers_duplicates_the_frame() {
        let h = Harness::new();
        let ticks = crate::hal::fake::FakeTicks::new();
        let pid = ProcessId(1);
        let pfn = h.pf.kalloc(Some(pid), &ticks, holder()).unwrap();
        h.pf.incref(pfn, holder());
        h.pgdir.set(pid, 0x2000, Pte::new(pfn, PteFlags::P | PteFlags::U | PteFlags::C));

        let mut tracker = VaTracker::new();
        let outcome = handle(&h.ctx(), pid, 0x2000, true, &mut tracker, holder());
        assert_eq!(outcome, FaultOutcome::Healed);

        let pte = h.pgdir.get(pid, 0x2000).unwrap();
        assert_ne!(pte.pfn, pfn);
        assert!(pte.flags.contains(PteFlags::W));
        assert!(!pte.flags.contains(PteFlags::C));
        assert_eq!(h.pf.refcnt(pfn, holder()), 1, "old frame lost one sharer");
        assert_eq!(h.pf.refcnt(pte.pfn, holder()), 1);
    }

    #[test]
    fn soft_tlb_miss_materializes_then_grants_presence() {
        let h = Harness::new();
        let pid = ProcessId(2);
        h.pgdir.set(pid, 0x3000, Pte::new(0, PteFlags::U));

        let mut tracker = VaTracker::new();
        let outcome = handle(&h.ctx(), pid, 0x3000, false, &mut tracker, holder());
        assert_eq!(outcome, FaultOutcome::Healed);

        let pte = h.pgdir.get(pid, 0x3000).unwrap();
        assert!(pte.flags.contains(PteFlags::P));
        assert!(!pte.flags.contains(PteFlags::T));
        assert!(h.tlb.lookup(pid, 0x3000, PGSIZE, holder()).is_some());
    }

    #[test]
    fn missing_pte_kills_the_process() {
        let h = Harness::new();
        let mut tracker = VaTracker::new();
        let outcome = handle(&h.ctx(), ProcessId(3), 0x9000, false, &mut tracker, holder());
        assert_eq!(outcome, FaultOutcome::Kill);
    }
}
