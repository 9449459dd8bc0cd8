//! Threaded host.
//!
//! [`Host`] stands in for the controlling side of the coprocessor: it owns
//! the region, starts one thread per process, releases the debug handshake
//! and services the error mailbox until every process has returned.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::{Capacities, ConfigError};
use crate::device::{AckMode, CommBuffer, ErrorReport, Pid};
use crate::error::BspError;
use crate::runtime::BspCore;

/// How long the host waits on the mailbox before checking its threads.
const MAILBOX_POLL: Duration = Duration::from_millis(10);

/// Errors raised by the host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bsp(#[from] BspError),

    #[error("process {pid} panicked")]
    ProcessPanicked { pid: Pid },
}

/// Outcome of a host run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Diagnostics drained from the mailbox, in arrival order.
    pub errors: Vec<ErrorReport>,
    /// Completed syncs, per process.
    pub supersteps: Vec<u64>,
}

/// Runs one OS thread per BSP process.
pub struct Host {
    region: Arc<CommBuffer>,
}

impl Host {
    /// Allocate a region sized to `caps`.
    pub fn new(caps: Capacities) -> Result<Self, HostError> {
        Ok(Self {
            region: CommBuffer::shared(caps, AckMode::Host)?,
        })
    }

    /// Shared region.
    pub fn region(&self) -> &Arc<CommBuffer> {
        &self.region
    }

    /// Run `body` once per process, each on its own thread.
    ///
    /// `body` receives a context that has already entered the run state and
    /// is taken out of it when `body` returns.
    pub fn run<F>(&self, body: F) -> Result<RunReport, HostError>
    where
        F: Fn(&mut BspCore) + Sync,
    {
        let nprocs = self.region.nprocs();
        let cores = (0..nprocs)
            .map(|pid| BspCore::new(Arc::clone(&self.region), pid))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("host starting {} processes", nprocs);
        let body = &body;
        let mut errors = Vec::new();

        let results = thread::scope(|scope| {
            let handles: Vec<_> = cores
                .into_iter()
                .map(|mut core| {
                    scope.spawn(move || {
                        core.begin();
                        body(&mut core);
                        core.end();
                        core.supersteps()
                    })
                })
                .collect();

            if self.region.capacities().debug_handshake {
                for pid in 0..nprocs {
                    self.region.status().release(pid);
                }
            }

            while !handles.iter().all(|h| h.is_finished()) {
                if let Some(report) = self.region.mailbox().take_timeout(MAILBOX_POLL) {
                    errors.push(report);
                }
            }
            while let Some(report) = self.region.mailbox().take() {
                errors.push(report);
            }

            handles
                .into_iter()
                .map(|h| h.join())
                .collect::<Vec<_>>()
        });

        let mut supersteps = Vec::with_capacity(nprocs);
        for (pid, result) in results.into_iter().enumerate() {
            match result {
                Ok(steps) => supersteps.push(steps),
                Err(_) => return Err(HostError::ProcessPanicked { pid }),
            }
        }

        log::debug!("final statuses: {:?}", self.region.status().snapshot());
        log::info!("host run finished, {} diagnostics", errors.len());
        Ok(RunReport { errors, supersteps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CoreStatus, LocalAddr};
    use crate::engine::{drive, Superstep};

    fn caps(n: usize) -> Capacities {
        Capacities {
            core_memory_size: 1024,
            ..Capacities::with_nprocs(n)
        }
    }

    #[test]
    fn test_threaded_ring() {
        let host = Host::new(Capacities {
            debug_handshake: true,
            ..caps(4)
        })
        .unwrap();
        let v = LocalAddr(0x40);

        let report = host
            .run(|core| {
                let pid = core.pid() as u32;
                let n = core.nprocs();
                let next = (core.pid() + 1) % n;

                core.register(v, 4).unwrap();
                core.sync();

                core.write_local_u32(LocalAddr(0x80), pid).unwrap();
                core.put(next, LocalAddr(0x80), v, 0, 4).unwrap();
                core.send(next, &[], &pid.to_le_bytes()).unwrap();
                core.sync();

                let prev = (pid + n as u32 - 1) % n as u32;
                assert_eq!(core.read_local_u32(v).unwrap(), prev);
                let mut buf = [0u8; 4];
                assert_eq!(core.consume(&mut buf).unwrap(), Some(4));
                assert_eq!(u32::from_le_bytes(buf), prev);
            })
            .unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(report.supersteps, vec![2; 4]);
        assert!(host.region().status().all(CoreStatus::Finish));
    }

    #[test]
    fn test_host_drains_reports() {
        let host = Host::new(caps(2)).unwrap();
        let report = host
            .run(|core| {
                let mut program = |core: &mut BspCore, step: u64| {
                    if step == 0 && core.pid() == 1 {
                        let _ = core.get(0, LocalAddr(0), 0, LocalAddr(0), 4);
                    }
                    if step == 1 {
                        Superstep::Finish
                    } else {
                        Superstep::Sync
                    }
                };
                drive(core, &mut program);
            })
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].pid, 1);
        assert_eq!(report.supersteps, vec![1, 1]);
    }

    #[test]
    fn test_panic_is_reported() {
        let host = Host::new(caps(1)).unwrap();
        let result = host.run(|_core| panic!("boom"));
        assert!(matches!(result, Err(HostError::ProcessPanicked { pid: 0 })));
    }
}
