//! The architecture boundary.
//!
//! The boot loader, trap vectors, and scheduler are external collaborators
//! (spec.md §1); this crate only needs the small slice of "what the current
//! core is" that `RawSpinlock`'s push_off/pop_off discipline (spec.md §5) and
//! the page-fault handler's hardware-TLB flush (spec.md §4.8) depend on.
//! A host kernel provides one implementation of `Arch`; tests provide a
//! trivial single-core one.

/// Per-core hook the embedding kernel supplies.
///
/// # Safety
///
/// `cpu_id()` must return a stable, densely-packed index `< NCPU` for the
/// calling core, and must never alias with another concurrently running
/// core's id.
pub unsafe trait Arch: Sync {
    /// Index of the core currently executing, in `0..NCPU`.
    fn cpu_id(&self) -> usize;

    /// Whether interrupts are currently enabled on this core.
    fn interrupts_enabled(&self) -> bool;

    /// Disables interrupts on this core.
    fn disable_interrupts(&self);

    /// Enables interrupts on this core.
    fn enable_interrupts(&self);

    /// Reloads the page-directory register, flushing the hardware TLB.
    /// Called by the page-fault handler after healing a PTE (spec.md §4.8).
    fn flush_tlb(&self);

    /// Lowest virtual address reserved for the kernel's own mappings.
    /// `mm::pagefault`'s soft-TLB materialization branch only ever promotes
    /// a `PTE_U` user page below this boundary (spec.md §4.8); a fault at or
    /// above it with no PTE present is always fatal, since this crate never
    /// manages kernel address space itself.
    fn kernel_base(&self) -> usize;
}

#[cfg(any(test, feature = "test"))]
pub mod fake {
    use core::cell::Cell;

    use super::Arch;

    /// A single-core `Arch` for unit tests: `cpu_id()` is always `0`, and
    /// interrupt state is tracked in a `Cell` rather than real hardware
    /// flags.
    pub struct SingleCoreArch {
        enabled: Cell<bool>,
        pub tlb_flushes: Cell<usize>,
    }

    // SAFETY: tests are single-threaded; `cpu_id` is always 0.
    unsafe impl Sync for SingleCoreArch {}

    impl SingleCoreArch {
        pub const fn new() -> Self {
            Self {
                enabled: Cell::new(true),
                tlb_flushes: Cell::new(0),
            }
        }
    }

    // SAFETY: single-threaded test harness, `cpu_id` is constant.
    unsafe impl Arch for SingleCoreArch {
        fn cpu_id(&self) -> usize {
            0
        }

        fn interrupts_enabled(&self) -> bool {
            self.enabled.get()
        }

        fn disable_interrupts(&self) {
            self.enabled.set(false);
        }

        fn enable_interrupts(&self) {
            self.enabled.set(true);
        }

        fn flush_tlb(&self) {
            self.tlb_flushes.set(self.tlb_flushes.get() + 1);
        }

        fn kernel_base(&self) -> usize {
            usize::MAX
        }
    }
}
