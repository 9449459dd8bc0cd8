//! Addressing within the shared communication region.
//!
//! User code only ever handles [`LocalAddr`] values: byte offsets into the
//! calling core's own memory. The runtime translates them into
//! [`GlobalAddr`] values, which name an address space (a core's memory, the
//! data payload arena, or one of the two message arenas) plus an offset.
//! A global address is only turned into actual bytes at the point of the
//! transfer.

use std::fmt;

/// Process identifier (one process per core).
pub type Pid = usize;

/// Byte offset into the calling core's local memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LocalAddr(pub u32);

impl LocalAddr {
    /// Offset this address by `bytes`.
    #[inline]
    pub fn add(self, bytes: u32) -> Self {
        LocalAddr(self.0.wrapping_add(bytes))
    }

    /// The same offset, seen from the global address space of `pid`.
    #[inline]
    pub fn on(self, pid: Pid) -> GlobalAddr {
        GlobalAddr::core(pid, self.0)
    }
}

impl fmt::Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Which memory a global address points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSpace {
    /// Local memory of a core.
    Core(Pid),
    /// The per-superstep arena holding put payloads.
    Payload,
    /// The arena owned by message queue 0 or 1.
    Queue(u8),
}

impl fmt::Display for AddrSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrSpace::Core(pid) => write!(f, "core{}", pid),
            AddrSpace::Payload => write!(f, "payload"),
            AddrSpace::Queue(q) => write!(f, "queue{}", q),
        }
    }
}

/// A directly accessible address anywhere in the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalAddr {
    pub space: AddrSpace,
    pub offset: u32,
}

impl GlobalAddr {
    /// Address inside a core's local memory.
    #[inline]
    pub fn core(pid: Pid, offset: u32) -> Self {
        Self {
            space: AddrSpace::Core(pid),
            offset,
        }
    }

    /// Address inside the data payload arena.
    #[inline]
    pub fn payload(offset: u32) -> Self {
        Self {
            space: AddrSpace::Payload,
            offset,
        }
    }

    /// Address inside the arena of message queue `index`.
    #[inline]
    pub fn queue(index: u8, offset: u32) -> Self {
        Self {
            space: AddrSpace::Queue(index),
            offset,
        }
    }

    /// Offset this address by `bytes`.
    #[inline]
    pub fn add(self, bytes: u32) -> Self {
        Self {
            space: self.space,
            offset: self.offset.wrapping_add(bytes),
        }
    }

    /// The owning process, if this address lies in a core's memory.
    pub fn pid(&self) -> Option<Pid> {
        match self.space {
            AddrSpace::Core(pid) => Some(pid),
            _ => None,
        }
    }
}

impl fmt::Display for GlobalAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+0x{:x}", self.space, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_to_global() {
        let addr = LocalAddr(0x100).on(3);
        assert_eq!(addr.space, AddrSpace::Core(3));
        assert_eq!(addr.offset, 0x100);
        assert_eq!(addr.pid(), Some(3));
    }

    #[test]
    fn test_add_keeps_space() {
        let addr = GlobalAddr::queue(1, 16).add(4);
        assert_eq!(addr, GlobalAddr::queue(1, 20));
        assert_eq!(addr.pid(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(GlobalAddr::payload(0x20).to_string(), "payload+0x20");
        assert_eq!(LocalAddr(0x1f).to_string(), "0x001f");
    }
}
