//! The shared communication region.
//!
//! One [`CommBuffer`] is allocated before any process starts and shared by
//! every process and the host through an `Arc`. It holds:
//!
//! - the local memory of every core (directly writable by every other core)
//! - one data-request list per process
//! - the put payload arena and the payload ledger (the "payload mutex")
//! - the registered-variable table and its global slot counter
//! - the two message queues, each with its own arena
//! - the sync barrier, the status flags and the error mailbox
//!
//! # Ownership discipline
//!
//! ```text
//!                 written by            read by              guarded by
//! core memory     anyone                anyone               barrier ordering
//! requests[p]     p                     p (during sync)      partition
//! var_table[p]    p                     anyone               partition
//! ledger          anyone                anyone               payload mutex
//! arenas          admitted writer       sync / receivers     exclusive grant
//! var counter     pid 0 (finalize)      anyone               barrier ordering
//! ```
//!
//! The per-process lists sit behind mutexes only so the region is `Sync`;
//! they are never contended.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::addr::{AddrSpace, GlobalAddr, LocalAddr, Pid};
use super::barrier::SyncBarrier;
use super::mailbox::{AckMode, ErrorMailbox};
use super::memory::SharedMemory;
use super::records::{Message, RequestList};
use super::status::StatusBoard;
use crate::config::{Capacities, ConfigError};
use crate::error::{BspError, BspResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One process's entry in a registration slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarBinding {
    pub addr: LocalAddr,
    pub size: u32,
}

/// Admission state of one message queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLedger {
    /// Messages stored.
    pub count: usize,
    /// Arena bytes granted.
    pub arena_size: usize,
}

/// Everything admitted under the payload mutex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadLedger {
    /// Bytes granted in the put payload arena this superstep.
    pub buffer_size: usize,
    pub queues: [QueueLedger; 2],
}

/// A message queue: fixed message slots plus the arena holding their bytes.
#[derive(Debug)]
pub struct MessageQueue {
    index: u8,
    slots: Box<[Mutex<Option<Message>>]>,
    arena: SharedMemory,
}

impl MessageQueue {
    fn new(index: u8, capacity: usize, arena_size: usize) -> Self {
        Self {
            index,
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            arena: SharedMemory::new(AddrSpace::Queue(index), arena_size),
        }
    }

    /// Queue index (0 or 1).
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Number of message slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Arena holding tags and payloads.
    pub fn arena(&self) -> &SharedMemory {
        &self.arena
    }

    /// Write a granted slot.
    pub fn store(&self, slot: usize, message: Message) {
        *lock(&self.slots[slot]) = Some(message);
    }

    /// Read a slot.
    pub fn load(&self, slot: usize) -> Option<Message> {
        self.slots.get(slot).and_then(|s| *lock(s))
    }
}

/// The shared communication region.
#[derive(Debug)]
pub struct CommBuffer {
    caps: Capacities,
    cores: Box<[SharedMemory]>,
    data_requests: Box<[Mutex<RequestList>]>,
    payload: SharedMemory,
    ledger: Mutex<PayloadLedger>,
    /// `var_table[pid][slot]`: column-major so each process owns one lock.
    var_table: Box<[Mutex<Vec<Option<VarBinding>>>]>,
    var_counter: AtomicUsize,
    push_pending: AtomicBool,
    queues: [MessageQueue; 2],
    barrier: SyncBarrier,
    status: StatusBoard,
    mailbox: ErrorMailbox,
}

impl CommBuffer {
    /// Allocate a region sized to `caps`.
    pub fn new(caps: Capacities, ack: AckMode) -> Result<Self, ConfigError> {
        caps.validate()?;
        let n = caps.nprocs;

        log::debug!(
            "allocating region: {} procs, {} B core memory, {} B payload, 2x{} messages",
            n,
            caps.core_memory_size,
            caps.payload_size,
            caps.max_messages
        );

        Ok(Self {
            caps,
            cores: (0..n)
                .map(|pid| SharedMemory::new(AddrSpace::Core(pid), caps.core_memory_size))
                .collect(),
            data_requests: (0..n).map(|_| Mutex::new(RequestList::new())).collect(),
            payload: SharedMemory::new(AddrSpace::Payload, caps.payload_size),
            ledger: Mutex::new(PayloadLedger::default()),
            var_table: (0..n)
                .map(|_| Mutex::new(vec![None; caps.max_vars]))
                .collect(),
            var_counter: AtomicUsize::new(0),
            push_pending: AtomicBool::new(false),
            queues: [
                MessageQueue::new(0, caps.max_messages, caps.queue_payload_size),
                MessageQueue::new(1, caps.max_messages, caps.queue_payload_size),
            ],
            barrier: SyncBarrier::new(n),
            status: StatusBoard::new(n),
            mailbox: ErrorMailbox::new(ack),
        })
    }

    /// Allocate a region behind an `Arc`, ready to hand to every process.
    pub fn shared(caps: Capacities, ack: AckMode) -> Result<Arc<Self>, ConfigError> {
        Self::new(caps, ack).map(Arc::new)
    }

    /// Capacities the region was sized with.
    pub fn capacities(&self) -> &Capacities {
        &self.caps
    }

    /// Number of processes.
    pub fn nprocs(&self) -> usize {
        self.caps.nprocs
    }

    /// Check that `pid` names a process.
    pub fn check_pid(&self, pid: Pid) -> BspResult<()> {
        if pid < self.caps.nprocs {
            Ok(())
        } else {
            Err(BspError::InvalidProcess {
                pid,
                nprocs: self.caps.nprocs,
            })
        }
    }

    /// Local memory of core `pid`.
    pub fn core(&self, pid: Pid) -> BspResult<&SharedMemory> {
        self.check_pid(pid)?;
        Ok(&self.cores[pid])
    }

    /// Local memories of all cores, indexed by pid.
    pub fn cores(&self) -> &[SharedMemory] {
        &self.cores
    }

    /// The memory implementing an address space.
    pub fn memory(&self, space: AddrSpace) -> BspResult<&SharedMemory> {
        match space {
            AddrSpace::Core(pid) => self.core(pid),
            AddrSpace::Payload => Ok(&self.payload),
            AddrSpace::Queue(q) => Ok(self.queue(q).arena()),
        }
    }

    /// Read bytes at a global address.
    pub fn read(&self, addr: GlobalAddr, buf: &mut [u8]) -> BspResult<()> {
        self.memory(addr.space)?.read_bytes(addr.offset, buf)
    }

    /// Write bytes at a global address.
    pub fn write(&self, addr: GlobalAddr, data: &[u8]) -> BspResult<()> {
        self.memory(addr.space)?.write_bytes(addr.offset, data)
    }

    /// Copy `len` bytes between two global addresses.
    ///
    /// Both ranges are validated before anything is written.
    pub fn copy(&self, src: GlobalAddr, dst: GlobalAddr, len: usize) -> BspResult<()> {
        let src_mem = self.memory(src.space)?;
        let dst_mem = self.memory(dst.space)?;
        dst_mem.range(dst.offset, len)?;

        let bytes = src_mem.read_vec(src.offset, len)?;
        dst_mem.write_bytes(dst.offset, &bytes)
    }

    /// The put payload arena.
    pub fn payload(&self) -> &SharedMemory {
        &self.payload
    }

    /// Take the payload mutex.
    pub fn ledger(&self) -> MutexGuard<'_, PayloadLedger> {
        lock(&self.ledger)
    }

    /// Request list of `pid`.
    pub fn requests(&self, pid: Pid) -> MutexGuard<'_, RequestList> {
        lock(&self.data_requests[pid])
    }

    /// Registration column of `pid`, indexed by slot.
    pub fn var_column(&self, pid: Pid) -> MutexGuard<'_, Vec<Option<VarBinding>>> {
        lock(&self.var_table[pid])
    }

    /// Next registration slot to be filled.
    pub fn var_counter(&self) -> usize {
        self.var_counter.load(Ordering::Acquire)
    }

    /// Note that some process registered a variable this superstep.
    pub fn mark_push_pending(&self) {
        self.push_pending.store(true, Ordering::Release);
    }

    /// Advance the slot counter if any process registered this superstep.
    ///
    /// Called by pid 0 only, between the second and third barrier.
    pub fn advance_var_counter(&self) -> bool {
        if self.push_pending.swap(false, Ordering::AcqRel) {
            let slot = self.var_counter.fetch_add(1, Ordering::AcqRel);
            log::debug!("registration slot {} sealed", slot);
            true
        } else {
            false
        }
    }

    /// Message queue 0 or 1.
    pub fn queue(&self, index: u8) -> &MessageQueue {
        &self.queues[(index & 1) as usize]
    }

    /// The sync barrier.
    pub fn barrier(&self) -> &SyncBarrier {
        &self.barrier
    }

    /// Per-process status flags.
    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// The error mailbox.
    pub fn mailbox(&self) -> &ErrorMailbox {
        &self.mailbox
    }
}
