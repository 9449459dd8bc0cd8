//! superstep library
//!
//! Device-side BSP runtime for many-core coprocessors: registered
//! variables, deferred and immediate remote memory transfers, buffered
//! messages and barrier synchronization over a shared region.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod host;
pub mod runtime;
