//! Transient records stored in the communication region.
//!
//! A [`DataRequest`] is created by a deferred `put`/`get` and consumed by
//! the next sync. A [`Message`] is created by `send` and read by its
//! destination during the following superstep.

use smallvec::SmallVec;

use super::addr::{GlobalAddr, Pid};

/// High bit of the byte count marks a put request.
pub const DATA_PUT_BIT: u32 = 1 << 31;

/// Largest byte count a single request can carry.
pub const MAX_REQUEST_BYTES: u32 = DATA_PUT_BIT - 1;

/// A deferred copy applied during sync.
///
/// Gets and puts share one list per process. The kind is encoded in the
/// high bit of `nbytes`, the same word that carries the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRequest {
    pub src: GlobalAddr,
    pub dst: GlobalAddr,
    nbytes: u32,
}

impl DataRequest {
    /// A get: copy `len` bytes from a remote `src` into local `dst`.
    pub fn get(src: GlobalAddr, dst: GlobalAddr, len: u32) -> Self {
        debug_assert!(len <= MAX_REQUEST_BYTES);
        Self {
            src,
            dst,
            nbytes: len & !DATA_PUT_BIT,
        }
    }

    /// A put: copy `len` payload-arena bytes at `src` to remote `dst`.
    pub fn put(src: GlobalAddr, dst: GlobalAddr, len: u32) -> Self {
        debug_assert!(len <= MAX_REQUEST_BYTES);
        Self {
            src,
            dst,
            nbytes: len | DATA_PUT_BIT,
        }
    }

    /// True if this request was issued by `put`.
    #[inline]
    pub fn is_put(&self) -> bool {
        self.nbytes & DATA_PUT_BIT != 0
    }

    /// Number of bytes to copy.
    #[inline]
    pub fn len(&self) -> usize {
        (self.nbytes & !DATA_PUT_BIT) as usize
    }

    /// True for a zero-length request.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw length word as stored in the region.
    pub fn raw_nbytes(&self) -> u32 {
        self.nbytes
    }
}

/// Ordered request list owned by one process.
///
/// Capacity is enforced by the caller before pushing.
pub type RequestList = SmallVec<[DataRequest; 16]>;

/// Header of a message in a message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Destination process.
    pub pid: Pid,
    /// Tag bytes in the queue arena.
    pub tag: GlobalAddr,
    /// Tag size in effect in the superstep the message was sent.
    pub tag_len: u32,
    /// Payload bytes in the queue arena.
    pub payload: GlobalAddr,
    /// Payload length.
    pub nbytes: u32,
}

impl Message {
    /// Tag plus payload bytes taken from the arena.
    pub fn footprint(&self) -> usize {
        self.tag_len as usize + self.nbytes as usize
    }
}
