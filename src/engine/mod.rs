//! Cooperative BSP execution.
//!
//! The [`Coordinator`] runs every process of a region on the calling thread.
//! Processes are written as [`BspProgram`]s, cut at their syncs, so the
//! coordinator can interleave them: all local computations of a superstep
//! run first, then the syncs are polled round-robin until they complete.
//!
//! A sync that makes no progress in a full round can never complete (some
//! process left the program early, for instance) and fails with
//! [`EngineError::Stalled`] instead of hanging.
//!
//! # Example
//!
//! ```
//! use superstep::device::LocalAddr;
//! use superstep::engine::{Coordinator, Superstep};
//! use superstep::runtime::BspCore;
//!
//! let mut engine = Coordinator::with_nprocs(4).unwrap();
//! let mut programs: Vec<_> = (0..4)
//!     .map(|_| {
//!         |core: &mut BspCore, step: u64| {
//!             if step == 0 {
//!                 core.register(LocalAddr(0), 4).unwrap();
//!                 return Superstep::Sync;
//!             }
//!             Superstep::Finish
//!         }
//!     })
//!     .collect();
//!
//! assert_eq!(engine.run(&mut programs).unwrap(), 2);
//! ```

mod coordinator;
mod program;

pub use coordinator::{
    Coordinator, EngineError, EngineStatus, DEFAULT_MAX_ROUNDS, DEFAULT_MAX_SUPERSTEPS,
};
pub use program::{drive, BspProgram, Superstep};
