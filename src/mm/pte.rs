//! PTE flags (spec.md §6) and the page-table seam the embedding kernel
//! implements.
//!
//! This crate never walks a multi-level page table itself (spec.md §1
//! Non-goals: "multi-level page tables beyond two levels" bounds what this
//! crate assumes about the shape of the table, not a ban on the host having
//! one) — the fault handler and CoW path only ever need to get or set the
//! single PTE covering a faulting virtual address.

use bitflags::bitflags;

use crate::hal::ProcessId;

bitflags! {
    /// The low byte is architectural (spec.md §6); `C`/`T` are this
    /// design's own high bits.
    pub struct PteFlags: u32 {
        /// Present; materialized by the fault handler.
        const P = 0x001;
        const W = 0x002;
        const U = 0x004;
        /// COW-sharing in effect; a write fault must duplicate the frame.
        const C = 0x200;
        /// Managed by the soft TLB; absence of `P` alongside this is
        /// intentional, not a missing mapping.
        const T = 0x400;
    }
}

/// A page table entry, as the MMU core needs to see it: a frame number plus
/// flags, never the host's raw architectural encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pte {
    pub pfn: super::Pfn,
    pub flags: PteFlags,
}

impl Pte {
    pub const fn new(pfn: super::Pfn, flags: PteFlags) -> Self {
        Self { pfn, flags }
    }
}

/// The embedding kernel's two-level page table.
pub trait PageTable: Sync {
    /// Returns the PTE currently mapping `va`'s page for `pid`, if any.
    fn get(&self, pid: ProcessId, va: super::Va) -> Option<Pte>;

    /// Installs or overwrites the PTE mapping `va`'s page for `pid`.
    fn set(&self, pid: ProcessId, va: super::Va, pte: Pte);

    /// Same as [`Self::get`]; named separately so call sites can say what
    /// they mean (a page-fault entry "walks" the table to find the PTE that
    /// faulted, as opposed to a CoW/TLB step that already has one in hand).
    fn walk(&self, pid: ProcessId, va: super::Va) -> Option<Pte> {
        self.get(pid, va)
    }
}

#[cfg(any(test, feature = "test"))]
pub mod fake {
    use core::cell::RefCell;

    use super::{PageTable, Pte};
    use crate::hal::ProcessId;

    /// A flat, single-process page table for unit tests: a fixed array of
    /// `(va, pte)` slots, linearly scanned.
    pub struct FakePageTable<const N: usize> {
        slots: RefCell<[Option<(ProcessId, usize, Pte)>; N]>,
    }

    unsafe impl<const N: usize> Sync for FakePageTable<N> {}

    impl<const N: usize> FakePageTable<N> {
        pub fn new() -> Self {
            Self {
                slots: RefCell::new([None; N]),
            }
        }
    }

    impl<const N: usize> PageTable for FakePageTable<N> {
        fn get(&self, pid: ProcessId, va: usize) -> Option<Pte> {
            self.slots
                .borrow()
                .iter()
                .flatten()
                .find(|(p, v, _)| *p == pid && *v == va)
                .map(|(_, _, pte)| *pte)
        }

        fn set(&self, pid: ProcessId, va: usize, pte: Pte) {
            let mut slots = self.slots.borrow_mut();
            if let Some(slot) = slots.iter_mut().find(|s| matches!(s, Some((p, v, _)) if *p == pid && *v == va)) {
                *slot = Some((pid, va, pte));
                return;
            }
            let free = slots.iter_mut().find(|s| s.is_none()).expect("fake page table full");
            *free = Some((pid, va, pte));
        }
    }
}
