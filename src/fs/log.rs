//! Transaction log (spec.md §4.1/§5, §7): a physical redo log giving
//! multi-block filesystem operations crash consistency.
//!
//! A transaction spans a `begin_op`/`end_op` bracket; the log only commits
//! once no operation is outstanding, so a commit never writes a partially
//! finished operation's blocks. The on-disk format is a header block (the
//! list of logged block numbers) followed by up to `LOGSIZE` data blocks.
//! Grounded in the teacher's `fs/log.rs`: a modified block is pinned in the
//! block cache (refcount held) from `write()` until `commit()` has copied it
//! out, so it cannot be evicted with its update still unflushed; adapted to
//! route block I/O through this crate's [`BufCache`] instead of a global
//! disk/cache singleton, and to park on an explicit [`WaitChannel`] instead
//! of the teacher's `proc`-tied one.

use arrayvec::ArrayVec;
use core::mem;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{Buf, BufCache, BufUnlocked};
use crate::hal::{BlockNo, WaitChannel};
use crate::lock::Sleepablelock;
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};

#[derive(FromBytes, AsBytes)]
#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; LOGSIZE],
}

const_assert!(mem::size_of::<LogHeader>() < BSIZE);

/// Protected log state: the pinned, modified blocks awaiting commit, plus
/// the outstanding-operation/committing bookkeeping `begin_op`/`end_op`
/// coordinate on.
struct LogState<'c, 'd> {
    outstanding: i32,
    committing: bool,
    absorbed: ArrayVec<BufUnlocked<'c, 'd>, LOGSIZE>,
}

pub struct Log<'c, 'd> {
    cache: &'c BufCache<'d>,
    devno: u32,
    start: BlockNo,
    size: u32,
    state: Sleepablelock<LogState<'c, 'd>>,
}

impl<'c, 'd> Log<'c, 'd> {
    /// Reads the on-disk header and, if it describes a committed-but-not-
    /// installed transaction, replays it (crash recovery).
    pub fn new(
        cache: &'c BufCache<'d>,
        devno: u32,
        start: BlockNo,
        size: u32,
        chan: &'static dyn WaitChannel,
    ) -> Self {
        let log = Self {
            cache,
            devno,
            start,
            size,
            state: Sleepablelock::new(
                chan,
                LogState {
                    outstanding: 0,
                    committing: false,
                    absorbed: ArrayVec::new(),
                },
            ),
        };
        log.recover_from_log();
        log
    }

    /// The block cache this log's transactions read and write through.
    pub fn cache(&self) -> &'c BufCache<'d> {
        self.cache
    }

    fn read_header(&self, holder: usize) -> LogHeader {
        let buf = self.cache.get(self.devno, self.start, holder).lock(holder);
        LogHeader::read_from_prefix(&buf.data().inner[..mem::size_of::<LogHeader>()])
            .expect("Log::read_header: undersized block")
    }

    fn write_header(&self, logged: &[BlockNo], holder: usize) {
        let mut header = LogHeader {
            n: logged.len() as u32,
            block: [0; LOGSIZE],
        };
        header.block[..logged.len()].copy_from_slice(logged);
        let mut buf = self.cache.get(self.devno, self.start, holder).lock(holder);
        buf.data_mut().inner[..mem::size_of::<LogHeader>()].copy_from_slice(header.as_bytes());
        buf.write_back();
    }

    fn recover_from_log(&self) {
        let holder = 0;
        let header = self.read_header(holder);
        for (tail, &bno) in header.block[..header.n as usize].iter().enumerate() {
            let log_buf = self
                .cache
                .get(self.devno, self.start + 1 + tail as u32, holder)
                .lock(holder);
            let bytes = log_buf.data().inner;
            let mut dst = self.cache.get(self.devno, bno, holder).lock(holder);
            dst.data_mut().inner = bytes;
            dst.mark_valid();
            dst.write_back();
        }
        self.write_header(&[], holder);
    }

    /// Called at the start of each filesystem operation; blocks if the log
    /// might not have room for this op's worst-case block count.
    pub fn begin_op(&self) {
        loop {
            let mut guard = self.state.lock(0);
            if guard.committing
                || guard.absorbed.len() as i32 + (guard.outstanding + 1) * MAXOPBLOCKS as i32
                    > LOGSIZE as i32
            {
                // SAFETY: `guard` was locked with holder token 0.
                unsafe { guard.sleep(0) };
            } else {
                guard.outstanding += 1;
                return;
            }
        }
    }

    /// Called at the end of each filesystem operation. Commits if this was
    /// the last outstanding operation.
    pub fn end_op(&self) {
        let do_commit = {
            let mut guard = self.state.lock(0);
            guard.outstanding -= 1;
            assert!(!guard.committing, "Log::end_op: already committing");
            if guard.outstanding == 0 {
                guard.committing = true;
                true
            } else {
                // `begin_op` may be waiting for log space, and decrementing
                // `outstanding` just freed some up.
                guard.wakeup();
                false
            }
        };

        if do_commit {
            // Commit without holding `state`: writing blocks may need to
            // wait on a body sleeplock, which must not happen while a
            // sleepablelock guard for `state` is held.
            self.commit();
            let mut guard = self.state.lock(0);
            guard.committing = false;
            guard.wakeup();
        }
    }

    fn commit(&self) {
        let holder = 0;
        let logged: ArrayVec<BufUnlocked<'c, 'd>, LOGSIZE> =
            mem::replace(&mut self.state.lock(holder).absorbed, ArrayVec::new());
        if logged.is_empty() {
            return;
        }
        let blocknos: ArrayVec<BlockNo, LOGSIZE> =
            logged.iter().map(|b| b.blockno(holder)).collect();

        // Write modified blocks into the log region.
        for (tail, buf) in logged.iter().enumerate() {
            let src = buf.clone().lock(holder);
            let bytes = src.data().inner;
            let mut dst = self
                .cache
                .get(self.devno, self.start + 1 + tail as u32, holder)
                .lock(holder);
            dst.data_mut().inner = bytes;
            dst.mark_valid();
            dst.write_back();
        }
        // The header write is the true commit point.
        self.write_header(&blocknos, holder);

        // Install from the log to home locations.
        for (tail, &bno) in blocknos.iter().enumerate() {
            let log_buf = self
                .cache
                .get(self.devno, self.start + 1 + tail as u32, holder)
                .lock(holder);
            let bytes = log_buf.data().inner;
            let mut dst = self.cache.get(self.devno, bno, holder).lock(holder);
            dst.data_mut().inner = bytes;
            dst.write_back();
        }
        // Erase the transaction from the log.
        self.write_header(&[], holder);
        // `logged` drops here, releasing every pin taken by `write()`.
    }

    /// Records that `b` was modified and must be part of the next commit.
    /// Log absorption: writing the same block twice within one transaction
    /// logs it once. Pins `b` in the cache until `commit()` copies it out.
    pub fn write(&self, b: Buf<'c, 'd>) {
        let holder = 0;
        let unlocked = b.unlock();
        let bno = unlocked.blockno(holder);
        let mut guard = self.state.lock(holder);
        assert!(guard.outstanding >= 1, "Log::write: outside of transaction");
        if guard.absorbed.iter().any(|u| u.blockno(holder) == bno) {
            return;
        }
        assert!(
            guard.absorbed.len() < LOGSIZE && (guard.absorbed.len() as u32) < self.size - 1,
            "Log::write: too big a transaction"
        );
        guard.absorbed.push(unlocked);
    }
}
