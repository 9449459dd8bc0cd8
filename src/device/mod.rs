//! The shared communication region and its primitives.
//!
//! This module provides:
//! - Tagged addresses for core memories and arenas
//! - Byte-addressable shared memories
//! - Data-request and message records
//! - The sync barrier, status flags and error mailbox
//! - The [`CommBuffer`] tying them together
//!
//! # Region Overview
//!
//! ```text
//!   +---------+---------+---------+---------+
//!   | core 0  | core 1  |  ...    | core n-1|   local memories
//!   +---------+---------+---------+---------+
//!   | requests[0..n]    | var_table[0..n]   |   per-process, owner-written
//!   +-------------------+-------------------+
//!   | payload arena     | ledger (mutex)    |   reset every sync
//!   +-------------------+-------------------+
//!   | queue 0 + arena   | queue 1 + arena   |   alternate every sync
//!   +-------------------+-------------------+
//!   | barrier | status flags | error mailbox |
//!   +---------+--------------+---------------+
//! ```
//!
//! # Example
//!
//! ```
//! use superstep::config::Capacities;
//! use superstep::device::{AckMode, CommBuffer, GlobalAddr};
//!
//! let region = CommBuffer::new(Capacities::with_nprocs(2), AckMode::Inline).unwrap();
//! region.write(GlobalAddr::core(1, 0x100), &[0xDE, 0xAD]).unwrap();
//!
//! let mut buf = [0u8; 2];
//! region.read(GlobalAddr::core(1, 0x100), &mut buf).unwrap();
//! assert_eq!(buf, [0xDE, 0xAD]);
//! ```

pub mod addr;
pub mod barrier;
pub mod comm_buf;
pub mod mailbox;
pub mod memory;
pub mod records;
pub mod status;

pub use addr::{AddrSpace, GlobalAddr, LocalAddr, Pid};
pub use barrier::{BarrierTicket, SyncBarrier};
pub use comm_buf::{CommBuffer, MessageQueue, PayloadLedger, QueueLedger, VarBinding};
pub use mailbox::{AckMode, ErrorMailbox, ErrorReport, HISTORY_CAPACITY, MESSAGE_CAPACITY};
pub use memory::SharedMemory;
pub use records::{DataRequest, Message, RequestList, DATA_PUT_BIT, MAX_REQUEST_BYTES};
pub use status::{CoreStatus, StatusBoard};
