//! Ambient error type for fallible filesystem and MMU operations.
//!
//! Kernel invariant violations (double free, inode-cache exhaustion, a
//! zero-typed inode after load, ...) are not represented here: those are
//! fatal and go through `panic!`/`assert!`, exactly as the teacher's
//! `fs/inode.rs` and `kalloc.rs` do. `Error` only covers the outcomes a
//! caller is expected to handle.

use core::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Path, snapshot id, or directory entry does not exist.
    NotFound,
    /// Not enough free inodes to complete a snapshot operation.
    NoCapacity,
    /// The block device has no free blocks left.
    OutOfBlocks,
    /// A caller-supplied offset/length was out of range (e.g. `off > size`).
    Invalid,
    /// An entry already exists where a caller tried to create one.
    Exists,
    /// A pool (IPT entries, TLB, physical frames) is exhausted.
    Busy,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "not found",
            Error::NoCapacity => "no capacity",
            Error::OutOfBlocks => "out of blocks",
            Error::Invalid => "invalid argument",
            Error::Exists => "already exists",
            Error::Busy => "resource exhausted",
        };
        f.write_str(msg)
    }
}

/// Maps an internal `Result` to the integer codes the syscalls in spec.md §6
/// use (`-1` for "not found"/generic failure, `-2` for capacity refusals).
pub fn to_syscall_code<T>(r: Result<T>, ok: impl FnOnce(T) -> i32) -> i32 {
    match r {
        Ok(v) => ok(v),
        Err(Error::NoCapacity) => -2,
        Err(_) => -1,
    }
}
