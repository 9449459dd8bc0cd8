//! Per-process lifecycle flags polled by the host.
//!
//! Each process publishes its lifecycle state here. In debug mode the
//! process also waits, right after publishing `Init`, for an explicit
//! continue signal from the host before it starts running.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::addr::Pid;

/// Lifecycle state of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoreStatus {
    /// Not started yet.
    #[default]
    Idle,
    /// Started, waiting for the host (debug handshake).
    Init,
    /// Running supersteps.
    Run,
    /// Called `end`.
    Finish,
}

impl std::fmt::Display for CoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreStatus::Idle => write!(f, "idle"),
            CoreStatus::Init => write!(f, "init"),
            CoreStatus::Run => write!(f, "run"),
            CoreStatus::Finish => write!(f, "finish"),
        }
    }
}

#[derive(Debug)]
struct Flags {
    status: Vec<CoreStatus>,
    /// Continue signal written by the host, consumed by the process.
    go: Vec<bool>,
}

/// Status flags for every process.
#[derive(Debug)]
pub struct StatusBoard {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl StatusBoard {
    /// Create a board for `nprocs` processes, all idle.
    pub fn new(nprocs: usize) -> Self {
        Self {
            flags: Mutex::new(Flags {
                status: vec![CoreStatus::Idle; nprocs],
                go: vec![false; nprocs],
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the state of `pid`.
    pub fn set(&self, pid: Pid, status: CoreStatus) {
        self.lock().status[pid] = status;
        self.changed.notify_all();
    }

    /// Read the state of `pid`.
    pub fn get(&self, pid: Pid) -> CoreStatus {
        self.lock().status[pid]
    }

    /// Snapshot of every state.
    pub fn snapshot(&self) -> Vec<CoreStatus> {
        self.lock().status.clone()
    }

    /// True if every process is in `status`.
    pub fn all(&self, status: CoreStatus) -> bool {
        self.lock().status.iter().all(|s| *s == status)
    }

    /// Host side: let `pid` leave the debug handshake.
    pub fn release(&self, pid: Pid) {
        self.lock().go[pid] = true;
        self.changed.notify_all();
    }

    /// Process side: park until the host has released `pid`.
    pub fn await_continue(&self, pid: Pid) {
        let mut flags = self.lock();
        while !flags.go[pid] {
            flags = self
                .changed
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
        flags.go[pid] = false;
    }

    /// Host side: park until every process reached `status`.
    pub fn await_all(&self, status: CoreStatus) {
        let mut flags = self.lock();
        while !flags.status.iter().all(|s| *s == status) {
            flags = self
                .changed
                .wait(flags)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
