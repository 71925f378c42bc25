//! Design-level syscall surface (spec.md §6): thin wrappers translating
//! between the integer/out-parameter conventions a syscall boundary uses
//! and the `fs`/`mm` APIs underneath. `get_procinfo`'s process table and
//! `hello_number`'s dispatch are stubbed against `hal::ProcessDirectory`
//! rather than a real process table, matching spec.md §1's scope cut.
//!
//! Grouped under a unit struct rather than bare free functions purely for
//! namespacing at the call site (`Syscalls::snapshot_create(...)`); there is
//! no per-instance state here, everything it touches is passed in.

use crate::fs::{FileSystem, FsTransaction};
use crate::hal::{ProcessDirectory, ProcessId};
use crate::mm::ipt::Ipt;
use crate::mm::pfinfo::{FrameRecord, PfTable};
use crate::mm::pte::{PageTable, PteFlags};
use crate::mm::tlb::SoftTlb;
use crate::param::PGSIZE;

pub struct Syscalls;

impl Syscalls {
    /// `snapshot_create() → id | -1 | -2`.
    pub fn snapshot_create(fs: &FileSystem<'_, '_>, holder: usize) -> i32 {
        let tx = FsTransaction::new(fs, holder);
        let root = fs.root();
        crate::fs::snapshot::snapshot_create(&fs.itable, &root, &tx, holder)
    }

    /// `snapshot_rollback(id) → 0 | -1 | -2`.
    pub fn snapshot_rollback(fs: &FileSystem<'_, '_>, id: u32, holder: usize) -> i32 {
        let tx = FsTransaction::new(fs, holder);
        let root = fs.root();
        crate::fs::snapshot::snapshot_rollback(&fs.itable, &root, id, &tx, holder)
    }

    /// `snapshot_delete(id) → 0 | -1`.
    pub fn snapshot_delete(fs: &FileSystem<'_, '_>, id: u32, holder: usize) -> i32 {
        let tx = FsTransaction::new(fs, holder);
        let root = fs.root();
        crate::fs::snapshot::snapshot_delete(&fs.itable, &root, id, &tx, holder)
    }

    /// `vtop(va, &pa, &flags) → 1|2|0|-1`: resolve via the soft TLB first
    /// (hit → `1`), falling back to a page-table walk (mapped → `2`,
    /// present-less PTE → `0`, no PTE at all → `-1`). `PTE_T` is never
    /// reported outward; it is replaced by `PTE_P`, since from a caller's
    /// perspective a soft-TLB-managed page might as well be present.
    pub fn vtop(pgdir: &dyn PageTable, tlb: &SoftTlb, pid: ProcessId, va: usize, pa_out: &mut usize, flags_out: &mut u32, holder: usize) -> i32 {
        if let Some((pa, flags)) = tlb.lookup(pid, va, PGSIZE, holder) {
            *pa_out = pa;
            *flags_out = strip_t(flags).bits();
            return 1;
        }

        let va_pg = va & !(PGSIZE - 1);
        match pgdir.get(pid, va_pg) {
            Some(pte) if pte.flags.contains(PteFlags::P) || pte.flags.contains(PteFlags::T) => {
                *pa_out = pte.pfn * PGSIZE + (va % PGSIZE);
                *flags_out = strip_t(pte.flags).bits();
                2
            }
            Some(_) => 0,
            None => -1,
        }
    }

    /// `phys2virt(pa, &out[], max) → count`: every `(pid, va, flags)`
    /// mapping to frame `pa`, `out.len()` bounding how many are copied.
    pub fn phys2virt(ipt: &Ipt, pa: usize, out: &mut [(i32, usize, u32)], holder: usize) -> usize {
        let mut tmp = [(ProcessId::NONE, 0usize, 0u32); 64];
        let cap = tmp.len().min(out.len());
        let n = ipt.phys2virt(pa, &mut tmp[..cap], holder);
        for i in 0..n {
            out[i] = (tmp[i].0 .0, tmp[i].1, tmp[i].2);
        }
        n
    }

    /// `tlbinfo(&hits, &misses) → 0`.
    pub fn tlbinfo(tlb: &SoftTlb, hits_out: &mut u64, misses_out: &mut u64, holder: usize) -> i32 {
        let (hits, misses) = tlb.info(holder);
        *hits_out = hits;
        *misses_out = misses;
        0
    }

    /// `dump_physmem_info(&out[], max) → count`.
    pub fn dump_physmem_info(pf: &PfTable, out: &mut [FrameRecord], holder: usize) -> usize {
        pf.dump(out, holder)
    }

    /// `get_procinfo(pid, &out)`: `0` on success, `-1` if `pid` is unknown.
    pub fn get_procinfo(dir: &dyn ProcessDirectory, pid: i32, out: &mut crate::hal::ProcInfo) -> i32 {
        match dir.lookup(pid) {
            Some(info) => {
                *out = info;
                0
            }
            None => -1,
        }
    }

    /// `hello_number(n) → 2n`: the toy syscall every rv6 assignment starts
    /// with, kept here unmodified since it has no subsystem of its own to
    /// be reworked.
    pub const fn hello_number(n: i32) -> i32 {
        2 * n
    }
}

fn strip_t(flags: PteFlags) -> PteFlags {
    if flags.contains(PteFlags::T) {
        (flags - PteFlags::T) | PteFlags::P
    } else {
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_number_doubles() {
        assert_eq!(Syscalls::hello_number(21), 42);
    }

    #[test]
    fn vtop_reports_tlb_hit_as_one() {
        let tlb = SoftTlb::new();
        let pgdir = crate::mm::pte::fake::FakePageTable::<4>::new();
        let pid = ProcessId(1);
        tlb.alloc(pid, 0x1000, 3, PteFlags::P | PteFlags::W, PGSIZE, 0);

        let mut pa = 0;
        let mut flags = 0;
        let code = Syscalls::vtop(&pgdir, &tlb, pid, 0x1000, &mut pa, &mut flags, 0);
        assert_eq!(code, 1);
        assert_eq!(pa, 3 * PGSIZE);
    }

    #[test]
    fn vtop_walks_page_table_on_tlb_miss() {
        let tlb = SoftTlb::new();
        let pgdir = crate::mm::pte::fake::FakePageTable::<4>::new();
        let pid = ProcessId(1);
        pgdir.set(pid, 0x2000, crate::mm::pte::Pte::new(7, PteFlags::T | PteFlags::U));

        let mut pa = 0;
        let mut flags = 0;
        let code = Syscalls::vtop(&pgdir, &tlb, pid, 0x2000, &mut pa, &mut flags, 0);
        assert_eq!(code, 2);
        assert_eq!(pa, 7 * PGSIZE);
        assert_ne!(flags & PteFlags::P.bits(), 0);
        assert_eq!(flags & PteFlags::T.bits(), 0, "PTE_T must never be reported outward");
    }

    #[test]
    fn vtop_missing_pte_is_minus_one() {
        let tlb = SoftTlb::new();
        let pgdir = crate::mm::pte::fake::FakePageTable::<4>::new();
        let mut pa = 0;
        let mut flags = 0;
        let code = Syscalls::vtop(&pgdir, &tlb, ProcessId(1), 0x3000, &mut pa, &mut flags, 0);
        assert_eq!(code, -1);
    }

    #[test]
    fn get_procinfo_unknown_pid_is_minus_one() {
        let dir = crate::hal::fake::FakeProcessDirectory::<1>::new([None]);
        let mut out = crate::hal::ProcInfo::default();
        assert_eq!(Syscalls::get_procinfo(&dir, 42, &mut out), -1);
    }
}
