//! rv6-mmufs: a copy-on-write, snapshotting file system and software
//! MMU/soft-TLB core, extracted from the teaching kernel this crate grew
//! out of so it can run as a library over traits instead of a monolithic
//! kernel image.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

mod arch;
mod bio;
mod error;
mod fs;
mod hal;
mod lock;
mod mm;
mod param;
mod syscall;

pub use arch::Arch;
pub use bio::BufCache;
pub use error::{Error, Result};
pub use fs::{FileSystem, FsTransaction};
pub use hal::{BlockDevice, BlockNo, PhysMem, ProcInfo, ProcessDirectory, ProcessId, TickSource, WaitChannel};
pub use mm::ipt::Ipt;
pub use mm::pagefault::{handle as handle_page_fault, FaultContext, FaultOutcome, VaTracker};
pub use mm::pfinfo::{FrameRecord, PfTable};
pub use mm::pte::{PageTable, Pte, PteFlags};
pub use mm::tlb::SoftTlb;
pub use syscall::Syscalls;
