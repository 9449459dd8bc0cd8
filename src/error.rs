//! Error taxonomy for the BSP runtime.
//!
//! Every admission failure is detected before any memory is touched. The
//! failing operation publishes the error through the mailbox (which blocks
//! until the host acknowledges it) and then returns it to the caller, so
//! Rust code can see that the operation was skipped.

use thiserror::Error;

use crate::device::{AddrSpace, LocalAddr, Pid};

/// Which deferred transfer hit the request capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Put,
    Get,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::Put => write!(f, "put"),
            RequestKind::Get => write!(f, "get"),
        }
    }
}

/// Errors raised by BSP operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BspError {
    /// A second `register` in the same superstep.
    #[error("BSP ERROR: more than one variable registered in a single superstep")]
    DuplicateRegistration,

    /// Every slot of the registration table is taken.
    #[error("BSP ERROR: registration table full ({capacity} variables)")]
    TableOverflow { capacity: usize },

    /// No slot binds the given local address for the calling process.
    #[error("BSP ERROR: no registered variable at {addr} (target pid {pid})")]
    UnknownVariable { pid: Pid, addr: LocalAddr },

    /// The per-process request list is full.
    #[error("BSP ERROR: too many {kind} requests in one superstep (capacity {capacity})")]
    RequestOverflow { kind: RequestKind, capacity: usize },

    /// An arena cannot hold the requested bytes.
    #[error("BSP ERROR: payload of {requested} bytes does not fit ({available} bytes left)")]
    PayloadOverflow { requested: usize, available: usize },

    /// The send queue has no free message slot.
    #[error("BSP ERROR: too many messages sent in one superstep (capacity {capacity})")]
    MessageOverflow { capacity: usize },

    /// A process id outside `0..nprocs`.
    #[error("BSP ERROR: process {pid} does not exist ({nprocs} processes)")]
    InvalidProcess { pid: Pid, nprocs: usize },

    /// A memory access outside the bounds of its address space.
    #[error("BSP ERROR: access of {len} bytes at {space}+0x{offset:x} is out of range")]
    AddressOutOfRange {
        space: AddrSpace,
        offset: u32,
        len: usize,
    },
}

/// Result alias for BSP operations.
pub type BspResult<T> = Result<T, BspError>;
