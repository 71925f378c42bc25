//! Inverted page table (spec.md §3/§4.6): `IPT_BUCKETS` hash buckets keyed
//! by physical frame number, each a singly-linked chain of `(pid, va,
//! flags)` mappings to that frame.
//!
//! The head of a non-empty chain carries `refcnt` = the number of *extra*
//! sharers, i.e. mappings beyond the head itself — an asymmetric count,
//! preserved exactly as the teacher's tail-append logic computes it (spec.md
//! §9): inserting a second mapping bumps the head's `refcnt` from 0 to 1,
//! not from 1 to 2. Removing the head promotes its successor and recomputes
//! that successor's `refcnt` from the chain still behind it, since the
//! invariant is only meaningful for whichever entry currently sits at the
//! bucket head.
//!
//! `iptalloc`/`iptrelse` is a fixed-capacity free-list pool standing in for
//! the teacher's `pool.rs` `RcPool`/page-slab allocator — entries are
//! indices into a flat array rather than pointers into kernel pages, since
//! this crate does not own physical memory (see `hal::PhysMem`).

use crate::hal::ProcessId;
use crate::lock::Spinlock;
use crate::param::{IPT_BUCKETS, IPT_POOL_CAPACITY, PGSIZE};

use super::pte::PteFlags;
use super::tlb::SoftTlb;

type PoolIdx = u32;

#[derive(Clone, Copy)]
struct IptEntry {
    pid: ProcessId,
    va: usize,
    flags: u32,
    /// Aggregates extra-sharer count on the head; unused on tail entries.
    refcnt: u32,
    /// Next entry in this bucket's chain.
    next: Option<PoolIdx>,
    /// Next free entry in the pool's free list.
    cnext: Option<PoolIdx>,
}

impl IptEntry {
    const fn empty() -> Self {
        Self {
            pid: ProcessId::NONE,
            va: 0,
            flags: 0,
            refcnt: 0,
            next: None,
            cnext: None,
        }
    }
}

struct IptState {
    buckets: [Option<PoolIdx>; IPT_BUCKETS],
    pool: [IptEntry; IPT_POOL_CAPACITY],
    free: Option<PoolIdx>,
}

impl IptState {
    fn alloc(&mut self) -> Option<PoolIdx> {
        let idx = self.free?;
        self.free = self.pool[idx as usize].cnext;
        Some(idx)
    }

    /// Zeroes the entry before returning it to the pool (spec.md §4.6).
    fn dealloc(&mut self, idx: PoolIdx) {
        self.pool[idx as usize] = IptEntry::empty();
        self.pool[idx as usize].cnext = self.free;
        self.free = Some(idx);
    }
}

pub struct Ipt {
    state: Spinlock<IptState>,
}

impl Ipt {
    pub const fn new() -> Self {
        let mut pool = [IptEntry::empty(); IPT_POOL_CAPACITY];
        // const-eval friendly manual thread-through; cheaper ways exist with
        // `array::from_fn`, not yet stable as a `const fn` on this toolchain.
        let mut i = 0;
        while i < IPT_POOL_CAPACITY {
            pool[i].cnext = if i + 1 < IPT_POOL_CAPACITY { Some((i + 1) as PoolIdx) } else { None };
            i += 1;
        }
        Self {
            state: Spinlock::new(IptState {
                buckets: [None; IPT_BUCKETS],
                pool,
                free: if IPT_POOL_CAPACITY > 0 { Some(0) } else { None },
            }),
        }
    }

    fn bucket_of(pa: usize) -> usize {
        let b = pa / PGSIZE;
        assert!(b < IPT_BUCKETS, "frame physical address out of IPT range");
        b
    }

    /// Inserts or refreshes the `(pid, va)` mapping to frame `pa`. Fails
    /// with `Error::Busy` if the entry pool is exhausted (spec.md §7:
    /// "insert returns -1").
    pub fn insert(&self, va: usize, pa: usize, perm: PteFlags, pid: ProcessId, tlb: &SoftTlb, holder: usize) -> crate::error::Result<()> {
        let bucket = Self::bucket_of(pa);
        let mut st = self.state.lock(holder);

        // Step 1/2: overwrite an existing mapping in place.
        let mut cur = st.buckets[bucket];
        while let Some(idx) = cur {
            let e = &mut st.pool[idx as usize];
            if e.pid == pid && e.va == va {
                e.flags = (perm | PteFlags::P).bits();
                drop(st);
                tlb.tlbivltp(pid, va, holder);
                return Ok(());
            }
            cur = e.next;
        }

        // Step 3: append a fresh entry at the tail.
        let had_head = st.buckets[bucket].is_some();
        let new_idx = match st.alloc() {
            Some(idx) => idx,
            None => return Err(crate::error::Error::Busy),
        };
        st.pool[new_idx as usize] = IptEntry {
            pid,
            va,
            flags: (perm | PteFlags::P).bits(),
            refcnt: 0,
            next: None,
            cnext: None,
        };
        match st.buckets[bucket] {
            None => st.buckets[bucket] = Some(new_idx),
            Some(head) => {
                let mut tail = head;
                loop {
                    let next = st.pool[tail as usize].next;
                    match next {
                        Some(n) => tail = n,
                        None => break,
                    }
                }
                st.pool[tail as usize].next = Some(new_idx);
            }
        }
        if had_head {
            let head = st.buckets[bucket].unwrap();
            st.pool[head as usize].refcnt += 1;
        }
        drop(st);
        tlb.tlbivltp(pid, va, holder);
        Ok(())
    }

    /// Finds and unlinks the `(pid, va)` mapping to frame `pa`.
    pub fn remove(&self, va: usize, pa: usize, pid: ProcessId, holder: usize) {
        let bucket = Self::bucket_of(pa);
        let mut st = self.state.lock(holder);

        let head = match st.buckets[bucket] {
            Some(h) => h,
            None => return,
        };
        if st.pool[head as usize].pid == pid && st.pool[head as usize].va == va {
            let next = st.pool[head as usize].next;
            match next {
                None => st.buckets[bucket] = None,
                Some(new_head) => {
                    // The promoted head's refcnt must reflect the chain
                    // still behind it, not whatever it carried as a tail
                    // entry (tail entries don't maintain `refcnt` at all).
                    let mut extra_sharers = 0u32;
                    let mut cur = st.pool[new_head as usize].next;
                    while let Some(idx) = cur {
                        extra_sharers += 1;
                        cur = st.pool[idx as usize].next;
                    }
                    st.pool[new_head as usize].refcnt = extra_sharers;
                    st.buckets[bucket] = Some(new_head);
                }
            }
            st.dealloc(head);
            return;
        }

        let mut prev = head;
        let mut cur = st.pool[head as usize].next;
        while let Some(idx) = cur {
            if st.pool[idx as usize].pid == pid && st.pool[idx as usize].va == va {
                let next = st.pool[idx as usize].next;
                st.pool[prev as usize].next = next;
                st.pool[head as usize].refcnt -= 1;
                st.dealloc(idx);
                return;
            }
            prev = idx;
            cur = st.pool[idx as usize].next;
        }
    }

    /// Copies `(pid, va, flags)` triples mapping to frame `pa` into `out`
    /// (spec.md §6 `phys2virt`): flags masked to the low 5 architectural
    /// bits, with `PTE_T` reported back as `PTE_P`. Returns the count
    /// copied.
    pub fn phys2virt(&self, pa: usize, out: &mut [(ProcessId, usize, u32)], holder: usize) -> usize {
        let bucket = Self::bucket_of(pa);
        let st = self.state.lock(holder);
        let mut n = 0;
        let mut cur = st.buckets[bucket];
        while let Some(idx) = cur {
            if n >= out.len() {
                break;
            }
            let e = &st.pool[idx as usize];
            let mut flags = PteFlags::from_bits_truncate(e.flags) & (PteFlags::P | PteFlags::W | PteFlags::U | PteFlags::C | PteFlags::T);
            let mut bits = flags.bits() & 0x1f;
            if flags.contains(PteFlags::T) {
                bits |= PteFlags::P.bits();
            }
            flags = PteFlags::from_bits_truncate(bits);
            out[n] = (e.pid, e.va, flags.bits());
            n += 1;
            cur = e.next;
        }
        n
    }

    /// The number of extra sharers recorded on `pa`'s bucket head, or `None`
    /// if the bucket is empty. Exposed for tests exercising spec.md §8's
    /// "insert then remove restores the bucket" property.
    #[cfg(test)]
    fn head_refcnt(&self, pa: usize, holder: usize) -> Option<u32> {
        let bucket = Self::bucket_of(pa);
        let st = self.state.lock(holder);
        st.buckets[bucket].map(|h| st.pool[h as usize].refcnt)
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
    fn insert_then_remove_restores_bucket() {
        let ipt = Ipt::new();
        let tlb = SoftTlb::new();
        let pa = 3 * PGSIZE;
        let pid = ProcessId(1);

        ipt.insert(0x1000, pa, PteFlags::W | PteFlags::U, pid, &tlb, holder()).unwrap();
        assert!(ipt.head_refcnt(pa, holder()).is_some());
        ipt.remove(0x1000, pa, pid, holder());
        assert!(ipt.head_refcnt(pa, holder()).is_none());
    }

    #[test]
    fn removing_the_head_promotes_successor_with_correct_refcnt() {
        let ipt = Ipt::new();
        let tlb = SoftTlb::new();
        let pa = 6 * PGSIZE;
        let head_pid = ProcessId(1);

        // Three sharers of one frame: the head plus two extra.
        ipt.insert(0x1000, pa, PteFlags::W, head_pid, &tlb, holder()).unwrap();
        ipt.insert(0x2000, pa, PteFlags::W, ProcessId(2), &tlb, holder()).unwrap();
        ipt.insert(0x3000, pa, PteFlags::W, ProcessId(3), &tlb, holder()).unwrap();
        assert_eq!(ipt.head_refcnt(pa, holder()), Some(2));

        // A CoW fault on the pid that happens to be the bucket head removes
        // its mapping; the successor becomes head and must report the one
        // sharer still behind it, not 0.
        ipt.remove(0x1000, pa, head_pid, holder());
        assert_eq!(ipt.head_refcnt(pa, holder()), Some(1));

        let mut out = [(ProcessId::NONE, 0usize, 0u32); 4];
        let n = ipt.phys2virt(pa, &mut out, holder());
        assert_eq!(n, 2, "both remaining sharers are still reachable from the new head");
    }

    #[test]
    fn head_refcnt_counts_extra_sharers_only() {
        let ipt = Ipt::new();
        let tlb = SoftTlb::new();
        let pa = 5 * PGSIZE;

        ipt.insert(0x1000, pa, PteFlags::W, ProcessId(1), &tlb, holder()).unwrap();
        assert_eq!(ipt.head_refcnt(pa, holder()), Some(0));
        ipt.insert(0x2000, pa, PteFlags::W, ProcessId(1), &tlb, holder()).unwrap();
        assert_eq!(ipt.head_refcnt(pa, holder()), Some(1));
        ipt.insert(0x3000, pa, PteFlags::W, ProcessId(2), &tlb, holder()).unwrap();
        assert_eq!(ipt.head_refcnt(pa, holder()), Some(2));
    }

    #[test]
    fn phys2virt_reports_t_as_p() {
        let ipt = Ipt::new();
        let tlb = SoftTlb::new();
        let pa = 7 * PGSIZE;
        ipt.insert(0x4000, pa, PteFlags::T, ProcessId(9), &tlb, holder()).unwrap();
        let mut out = [(ProcessId(0), 0, 0); 4];
        let n = ipt.phys2virt(pa, &mut out, holder());
        assert_eq!(n, 1);
        let (pid, va, flags) = out[0];
        assert_eq!((pid, va), (ProcessId(9), 0x4000));
        assert_ne!(flags & PteFlags::P.bits(), 0);
    }
}
