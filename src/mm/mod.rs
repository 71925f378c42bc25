//! Software MMU core (spec.md §1(b), §3-§4.8): an inverted page table and a
//! software-managed TLB, integrated with a page-fault-driven copy-on-write
//! path. Four layers, in dependency order:
//!
//!   - [`pte`]: the PTE flag bits and the `PageTable` seam the embedding
//!     kernel's real page table implements.
//!   - [`pfinfo`]: the physical-frame table and allocator.
//!   - [`ipt`]: the inverted page table (physical frame → mapping set).
//!   - [`tlb`]: the direct-mapped software TLB.
//!   - [`pagefault`]: the state machine tying the other three together on
//!     every `T_PGFLT` trap.
//!
//! None of these own real physical memory or a real page table; both are
//! external collaborators reached through [`pte::PageTable`] and
//! `hal::PhysMem` (spec.md §1).

pub mod ipt;
pub mod pagefault;
pub mod pfinfo;
pub mod pte;
pub mod tlb;

/// A physical frame number: `pa / PGSIZE`. Used throughout `mm::*` instead
/// of a raw physical address, since this crate never dereferences physical
/// memory directly.
pub type Pfn = usize;

/// A page-aligned virtual address.
pub type Va = usize;
