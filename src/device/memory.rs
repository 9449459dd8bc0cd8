//! Byte-addressable memory shared between cores.
//!
//! Every memory in the communication region (each core's local memory, the
//! data payload arena, the two message arenas) is a [`SharedMemory`]. Bytes
//! are stored as relaxed atomics: any core may read or write any range
//! without a lock. Ordering between a writer and a later reader comes from
//! the sync barrier, never from the memory itself.
//!
//! # Usage
//!
//! ```
//! use superstep::device::{AddrSpace, SharedMemory};
//!
//! let mem = SharedMemory::new(AddrSpace::Core(0), 1024);
//! mem.write_u32(0x10, 0xDEAD_BEEF).unwrap();
//! assert_eq!(mem.read_u32(0x10).unwrap(), 0xDEAD_BEEF);
//!
//! // Out-of-range accesses are rejected, not clamped.
//! assert!(mem.write_bytes(1022, &[1, 2, 3, 4]).is_err());
//! ```

use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use super::addr::AddrSpace;
use crate::error::{BspError, BspResult};

/// A fixed-size block of bytes accessible from every core.
pub struct SharedMemory {
    /// Which address space this block implements (for diagnostics).
    space: AddrSpace,
    bytes: Box<[AtomicU8]>,

    /// Statistics
    total_bytes_written: AtomicU64,
    total_bytes_read: AtomicU64,
}

impl SharedMemory {
    /// Create a zero-filled memory of `size` bytes.
    pub fn new(space: AddrSpace, size: usize) -> Self {
        Self {
            space,
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
            total_bytes_written: AtomicU64::new(0),
            total_bytes_read: AtomicU64::new(0),
        }
    }

    /// Address space implemented by this memory.
    pub fn space(&self) -> AddrSpace {
        self.space
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-sized memory.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Validate an access and return the byte range it covers.
    pub fn range(&self, offset: u32, len: usize) -> BspResult<Range<usize>> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(BspError::AddressOutOfRange {
                space: self.space,
                offset,
                len,
            }),
        }
    }

    /// Write a byte slice at `offset`.
    pub fn write_bytes(&self, offset: u32, data: &[u8]) -> BspResult<()> {
        let range = self.range(offset, data.len())?;
        for (cell, byte) in self.bytes[range].iter().zip(data) {
            cell.store(*byte, Ordering::Relaxed);
        }
        self.total_bytes_written
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read bytes at `offset` into `buf`.
    pub fn read_bytes(&self, offset: u32, buf: &mut [u8]) -> BspResult<()> {
        let range = self.range(offset, buf.len())?;
        for (out, cell) in buf.iter_mut().zip(&self.bytes[range]) {
            *out = cell.load(Ordering::Relaxed);
        }
        self.total_bytes_read
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Read `len` bytes at `offset` into a new vector.
    pub fn read_vec(&self, offset: u32, len: usize) -> BspResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf)
    }

    /// Write a 32-bit word (little-endian).
    #[inline]
    pub fn write_u32(&self, offset: u32, value: u32) -> BspResult<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    /// Read a 32-bit word (little-endian).
    #[inline]
    pub fn read_u32(&self, offset: u32) -> BspResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Get total bytes written.
    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written.load(Ordering::Relaxed)
    }

    /// Get total bytes read.
    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read.load(Ordering::Relaxed)
    }

    /// Hexdump a range for debugging.
    pub fn hexdump(&self, offset: u32, len: usize) -> BspResult<String> {
        let buf = self.read_vec(offset, len)?;
        let mut result = String::new();

        for (i, chunk) in buf.chunks(16).enumerate() {
            let line_addr = offset as usize + i * 16;
            result.push_str(&format!("{}+{:06x}: ", self.space, line_addr));

            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str(&format!("{:02x} ", byte));
            }

            // Padding for short lines
            for j in chunk.len()..16 {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str("   ");
            }

            result.push_str(" |");
            for byte in chunk {
                let c = if (0x20..0x7f).contains(byte) {
                    *byte as char
                } else {
                    '.'
                };
                result.push(c);
            }
            result.push_str("|\n");
        }

        Ok(result)
    }
}

impl std::fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMemory")
            .field("space", &self.space)
            .field("size", &self.bytes.len())
            .field("total_bytes_written", &self.total_bytes_written())
            .field("total_bytes_read", &self.total_bytes_read())
            .finish()
    }
}
