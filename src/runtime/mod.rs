//! Per-process BSP runtime.
//!
//! A [`BspCore`] is the context of one BSP process. It is owned exclusively
//! by the thread (or coordinator slot) running that process and holds an
//! `Arc` to the shared [`CommBuffer`]. Every operation takes `&mut self`:
//! the context itself is never shared, only the region is.
//!
//! The operations are split by concern:
//!
//! - [`registry`]: `register` and remote address resolution
//! - [`transfer`]: deferred `put`/`get` and immediate `hp_put`/`hp_get`
//! - [`message`]: tag size, `send`, `peek`, `consume`, `queue_stats`
//! - [`sync`]: the barrier protocol that applies everything
//! - [`report`]: the blocking diagnostic channel
//!
//! # Example
//!
//! ```
//! use superstep::config::Capacities;
//! use superstep::device::{AckMode, CommBuffer, LocalAddr};
//! use superstep::runtime::BspCore;
//!
//! let region = CommBuffer::shared(Capacities::with_nprocs(1), AckMode::Inline).unwrap();
//! let mut core = BspCore::new(region, 0).unwrap();
//! core.begin();
//!
//! let x = LocalAddr(0x40);
//! core.register(x, 4).unwrap();
//! core.sync();
//!
//! core.write_local_u32(LocalAddr(0x80), 7).unwrap();
//! core.put(0, LocalAddr(0x80), x, 0, 4).unwrap();
//! assert_eq!(core.read_local_u32(x).unwrap(), 0); // not yet visible
//! core.sync();
//! assert_eq!(core.read_local_u32(x).unwrap(), 7);
//!
//! core.end();
//! ```

pub mod message;
pub mod registry;
pub mod report;
pub mod sync;
pub mod transfer;

use std::sync::Arc;

use crate::device::{CommBuffer, CoreStatus, GlobalAddr, LocalAddr, Pid, SharedMemory};
use crate::error::BspResult;

pub use message::{MessageView, QueueStats};
pub use sync::{SyncPhase, SyncPoll};

/// Context of one BSP process.
#[derive(Debug)]
pub struct BspCore {
    region: Arc<CommBuffer>,
    pid: Pid,
    nprocs: usize,

    /// Requests queued this superstep.
    request_counter: usize,
    /// A variable was registered this superstep.
    var_pushed: bool,

    /// Tag size of the current superstep.
    tag_size: usize,
    /// Tag size proposed for the next superstep.
    tag_size_next: usize,
    /// Queue read this superstep; sends go to the other one.
    queue_index: u8,
    /// Scan cursor into the receive queue.
    message_index: usize,
    /// Messages in the receive queue (fixed for the whole superstep).
    queue_len: usize,

    /// Sync engine state
    sync: sync::SyncState,
    /// Completed syncs.
    supersteps: u64,
}

impl BspCore {
    /// Create the context of process `pid`.
    pub fn new(region: Arc<CommBuffer>, pid: Pid) -> BspResult<Self> {
        region.check_pid(pid)?;
        let nprocs = region.nprocs();
        let tag_size = region.capacities().initial_tag_size;

        Ok(Self {
            region,
            pid,
            nprocs,
            request_counter: 0,
            var_pushed: false,
            tag_size,
            tag_size_next: tag_size,
            queue_index: 0,
            message_index: 0,
            queue_len: 0,
            sync: sync::SyncState::default(),
            supersteps: 0,
        })
    }

    /// Enter the run state.
    ///
    /// With the debug handshake enabled this blocks until the host sends
    /// its continue signal.
    pub fn begin(&mut self) {
        let status = self.region.status();
        status.set(self.pid, CoreStatus::Init);
        if self.region.capacities().debug_handshake {
            log::debug!("pid {} waiting for host", self.pid);
            status.await_continue(self.pid);
        }
        status.set(self.pid, CoreStatus::Run);
        log::info!("pid {} of {} running", self.pid, self.nprocs);
    }

    /// Leave the run state.
    pub fn end(&mut self) {
        self.region.status().set(self.pid, CoreStatus::Finish);
        log::info!("pid {} finished after {} supersteps", self.pid, self.supersteps);
    }

    /// This process's id.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Number of processes.
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// Shared communication region.
    pub fn region(&self) -> &Arc<CommBuffer> {
        &self.region
    }

    /// Number of completed syncs.
    pub fn supersteps(&self) -> u64 {
        self.supersteps
    }

    /// Requests queued in the current superstep.
    pub fn request_count(&self) -> usize {
        self.request_counter
    }

    /// Index of the message queue read in this superstep.
    pub fn queue_index(&self) -> u8 {
        self.queue_index
    }

    /// This core's local memory.
    pub fn local(&self) -> &SharedMemory {
        // `new` validated the pid
        &self.region.cores()[self.pid]
    }

    /// Write bytes into local memory.
    pub fn write_local(&self, addr: LocalAddr, data: &[u8]) -> BspResult<()> {
        self.local().write_bytes(addr.0, data)
    }

    /// Read bytes from local memory.
    pub fn read_local(&self, addr: LocalAddr, buf: &mut [u8]) -> BspResult<()> {
        self.local().read_bytes(addr.0, buf)
    }

    /// Write a 32-bit word into local memory.
    pub fn write_local_u32(&self, addr: LocalAddr, value: u32) -> BspResult<()> {
        self.local().write_u32(addr.0, value)
    }

    /// Read a 32-bit word from local memory.
    pub fn read_local_u32(&self, addr: LocalAddr) -> BspResult<u32> {
        self.local().read_u32(addr.0)
    }

    /// Read bytes at any global address (e.g. a zero-copy message view).
    pub fn read_global(&self, addr: GlobalAddr, buf: &mut [u8]) -> BspResult<()> {
        self.region.read(addr, buf)
    }
}
