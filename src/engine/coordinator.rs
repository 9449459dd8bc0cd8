//! Single-threaded BSP coordinator.
//!
//! The coordinator owns every process context and plays the host. It runs
//! the local computation of each process in turn, then drives all syncs
//! together by polling them round-robin until every process is back in
//! `Running`.

use std::sync::Arc;

use thiserror::Error;

use super::program::{BspProgram, Superstep};
use crate::config::{Capacities, ConfigError};
use crate::device::{AckMode, CommBuffer, ErrorReport, Pid};
use crate::error::BspError;
use crate::runtime::{BspCore, SyncPhase, SyncPoll};

/// Default bound on poll rounds per sync.
pub const DEFAULT_MAX_ROUNDS: usize = 64;

/// Default bound on supersteps per run.
pub const DEFAULT_MAX_SUPERSTEPS: u64 = 1 << 20;

/// Coordinator execution status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineStatus {
    /// No superstep run yet.
    #[default]
    Ready,
    /// At least one process has not finished.
    Running,
    /// Every process finished.
    Halted,
    /// A sync stalled; the region is no longer consistent.
    Error,
}

/// Errors raised by the coordinator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bsp(#[from] BspError),

    #[error("expected one program per process ({expected}), got {got}")]
    ProgramCount { expected: usize, got: usize },

    #[error("sync {superstep} stalled; processes {waiting:?} never completed")]
    Stalled { superstep: u64, waiting: Vec<Pid> },

    #[error("no halt after {limit} supersteps")]
    SuperstepLimit { limit: u64 },

    #[error("coordinator halted after an earlier error")]
    Faulted,
}

/// Runs every process of a region cooperatively on one thread.
pub struct Coordinator {
    region: Arc<CommBuffer>,
    cores: Vec<BspCore>,
    finished: Vec<bool>,
    status: EngineStatus,
    max_rounds: usize,
    max_supersteps: u64,
}

impl Coordinator {
    /// Allocate a region for `caps` and start every process in it.
    pub fn new(caps: Capacities) -> Result<Self, EngineError> {
        let region = CommBuffer::shared(caps, AckMode::Inline)?;
        let mut cores = Vec::with_capacity(caps.nprocs);
        for pid in 0..caps.nprocs {
            if caps.debug_handshake {
                region.status().release(pid);
            }
            let mut core = BspCore::new(Arc::clone(&region), pid)?;
            core.begin();
            cores.push(core);
        }

        log::info!("coordinator started {} processes", caps.nprocs);
        Ok(Self {
            region,
            finished: vec![false; cores.len()],
            cores,
            status: EngineStatus::Ready,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_supersteps: DEFAULT_MAX_SUPERSTEPS,
        })
    }

    /// Coordinator with default capacities for `nprocs` processes.
    pub fn with_nprocs(nprocs: usize) -> Result<Self, EngineError> {
        Self::new(Capacities::with_nprocs(nprocs))
    }

    /// Current status.
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    /// Shared region.
    pub fn region(&self) -> &Arc<CommBuffer> {
        &self.region
    }

    /// Number of processes.
    pub fn nprocs(&self) -> usize {
        self.cores.len()
    }

    /// Context of process `pid`.
    pub fn core(&self, pid: Pid) -> Option<&BspCore> {
        self.cores.get(pid)
    }

    /// Mutable context of process `pid`.
    pub fn core_mut(&mut self, pid: Pid) -> Option<&mut BspCore> {
        self.cores.get_mut(pid)
    }

    /// Completed syncs (identical on every process).
    pub fn supersteps(&self) -> u64 {
        self.cores.first().map_or(0, |c| c.supersteps())
    }

    /// Every diagnostic reported so far.
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.region.mailbox().reports()
    }

    /// Bound the number of poll rounds per sync.
    pub fn set_max_rounds(&mut self, rounds: usize) {
        self.max_rounds = rounds.max(1);
    }

    /// Bound the number of supersteps per `run`.
    pub fn set_max_supersteps(&mut self, limit: u64) {
        self.max_supersteps = limit;
    }

    /// Run `body` on every process in pid order, then sync them all.
    pub fn superstep<F>(&mut self, mut body: F) -> Result<(), EngineError>
    where
        F: FnMut(&mut BspCore),
    {
        self.check_usable()?;
        self.status = EngineStatus::Running;
        for core in self.cores.iter_mut() {
            body(core);
        }
        self.sync()
    }

    /// Sync every unfinished process.
    pub fn sync(&mut self) -> Result<(), EngineError> {
        self.check_usable()?;
        let superstep = self.supersteps();

        let active: Vec<Pid> = (0..self.cores.len()).filter(|&p| !self.finished[p]).collect();
        for &pid in &active {
            self.cores[pid].begin_sync();
        }

        let mut phases: Vec<SyncPhase> = active.iter().map(|&p| self.cores[p].sync_phase()).collect();
        for round in 0..self.max_rounds {
            let mut waiting = Vec::new();
            for &pid in &active {
                if self.cores[pid].poll_sync() == SyncPoll::Pending {
                    waiting.push(pid);
                }
            }
            if waiting.is_empty() {
                log::debug!("sync {} completed in {} rounds", superstep, round + 1);
                return Ok(());
            }

            let now: Vec<SyncPhase> = active.iter().map(|&p| self.cores[p].sync_phase()).collect();
            if now == phases {
                return Err(self.stall(superstep, waiting));
            }
            phases = now;
        }

        let waiting = active
            .into_iter()
            .filter(|&p| self.cores[p].sync_phase() != SyncPhase::Running)
            .collect();
        Err(self.stall(superstep, waiting))
    }

    /// Run one program per process until every process finishes.
    ///
    /// Returns the number of supersteps executed.
    pub fn run<P: BspProgram>(&mut self, programs: &mut [P]) -> Result<u64, EngineError> {
        if programs.len() != self.cores.len() {
            return Err(EngineError::ProgramCount {
                expected: self.cores.len(),
                got: programs.len(),
            });
        }
        self.check_usable()?;
        self.status = EngineStatus::Running;

        let mut step = 0;
        loop {
            if step >= self.max_supersteps {
                return Err(EngineError::SuperstepLimit {
                    limit: self.max_supersteps,
                });
            }

            for (pid, program) in programs.iter_mut().enumerate() {
                if self.finished[pid] {
                    continue;
                }
                let core = &mut self.cores[pid];
                if program.superstep(core, step) == Superstep::Finish {
                    core.end();
                    self.finished[pid] = true;
                }
            }
            step += 1;

            if self.finished.iter().all(|&f| f) {
                self.status = EngineStatus::Halted;
                log::info!("all processes finished after {} supersteps", step);
                return Ok(step);
            }
            self.sync()?;
        }
    }

    fn check_usable(&self) -> Result<(), EngineError> {
        match self.status {
            EngineStatus::Error => Err(EngineError::Faulted),
            _ => Ok(()),
        }
    }

    fn stall(&mut self, superstep: u64, waiting: Vec<Pid>) -> EngineError {
        log::warn!("sync {} stalled waiting on {:?}", superstep, waiting);
        self.status = EngineStatus::Error;
        EngineError::Stalled { superstep, waiting }
    }
}
