//! The superstep barrier protocol.
//!
//! A sync runs three barriers with two copy phases and a bookkeeping phase
//! between them:
//!
//! ```text
//! Running -> Barrier1 -> ApplyGets -> Barrier2 -> ApplyPuts -> Finalize -> Barrier3 -> Running
//! ```
//!
//! Barrier 1 guarantees nobody still mutates a request list. Barrier 2
//! guarantees every get everywhere has read its source before any put
//! overwrites it. Barrier 3 guarantees every process has finished its
//! bookkeeping before anyone starts the next superstep.
//!
//! The engine is pollable: [`BspCore::poll_sync`] advances as far as it can
//! without parking and reports whether the sync is done. [`BspCore::sync`]
//! is the blocking form used by threaded processes.

use super::BspCore;
use crate::device::BarrierTicket;

/// Where a process stands in the sync protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not syncing.
    #[default]
    Running,
    /// Waiting for every process to stop issuing requests.
    Barrier1,
    /// Applying own get requests.
    ApplyGets,
    /// Waiting for every get to finish.
    Barrier2,
    /// Applying own put requests.
    ApplyPuts,
    /// Resetting per-superstep state.
    Finalize,
    /// Waiting for every process to finish bookkeeping.
    Barrier3,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPoll {
    /// Parked at a barrier.
    Pending,
    /// Back in `Running`.
    Complete,
}

#[derive(Debug, Default)]
pub(crate) struct SyncState {
    phase: SyncPhase,
    ticket: Option<BarrierTicket>,
}

impl BspCore {
    /// Synchronize with every other process.
    ///
    /// Applies all gets then all puts issued in the current superstep,
    /// rotates the message queues and adopts the proposed tag size.
    pub fn sync(&mut self) {
        self.begin_sync();
        while self.poll_sync() == SyncPoll::Pending {
            if let Some(ticket) = self.sync.ticket {
                self.region.barrier().wait(ticket);
            }
        }
    }

    /// Arrive at the first barrier.
    pub fn begin_sync(&mut self) {
        if self.sync.phase != SyncPhase::Running {
            log::warn!("pid {} already syncing ({:?})", self.pid, self.sync.phase);
            return;
        }
        log::debug!("pid {} entering sync {}", self.pid, self.supersteps);
        self.arrive(SyncPhase::Barrier1);
    }

    /// Advance the sync as far as possible without blocking.
    pub fn poll_sync(&mut self) -> SyncPoll {
        loop {
            match self.sync.phase {
                SyncPhase::Running => return SyncPoll::Complete,
                SyncPhase::Barrier1 => {
                    if !self.released() {
                        return SyncPoll::Pending;
                    }
                    self.sync.phase = SyncPhase::ApplyGets;
                }
                SyncPhase::ApplyGets => {
                    self.apply_requests(false);
                    self.arrive(SyncPhase::Barrier2);
                }
                SyncPhase::Barrier2 => {
                    if !self.released() {
                        return SyncPoll::Pending;
                    }
                    self.sync.phase = SyncPhase::ApplyPuts;
                }
                SyncPhase::ApplyPuts => {
                    self.apply_requests(true);
                    self.sync.phase = SyncPhase::Finalize;
                }
                SyncPhase::Finalize => {
                    self.finalize();
                    self.arrive(SyncPhase::Barrier3);
                }
                SyncPhase::Barrier3 => {
                    if !self.released() {
                        return SyncPoll::Pending;
                    }
                    self.sync = SyncState::default();
                    self.supersteps += 1;
                    log::debug!("pid {} completed sync {}", self.pid, self.supersteps);
                    return SyncPoll::Complete;
                }
            }
        }
    }

    /// Current phase of the sync protocol.
    pub fn sync_phase(&self) -> SyncPhase {
        self.sync.phase
    }

    fn arrive(&mut self, phase: SyncPhase) {
        self.sync.ticket = Some(self.region.barrier().arrive(self.pid));
        self.sync.phase = phase;
    }

    fn released(&self) -> bool {
        self.sync
            .ticket
            .map_or(true, |ticket| self.region.barrier().is_released(ticket))
    }

    /// Apply own requests of one kind, in issue order.
    fn apply_requests(&self, puts: bool) {
        let requests = self.region.requests(self.pid);
        for req in requests.iter().filter(|r| r.is_put() == puts) {
            log::trace!(
                "pid {} {} {} -> {} ({} bytes)",
                self.pid,
                if puts { "put" } else { "get" },
                req.src,
                req.dst,
                req.len()
            );
            // Both ranges were checked at admission
            if let Err(err) = self.region.copy(req.src, req.dst, req.len()) {
                log::error!("pid {} dropped request: {}", self.pid, err);
            }
        }
    }

    fn finalize(&mut self) {
        self.region.requests(self.pid).clear();
        self.request_counter = 0;
        self.var_pushed = false;

        let received = self.queue_index;
        if self.pid == 0 {
            let mut ledger = self.region.ledger();
            ledger.buffer_size = 0;
            ledger.queues[received as usize] = Default::default();
            drop(ledger);
            self.region.advance_var_counter();
        }

        self.queue_index = received ^ 1;
        self.tag_size = self.tag_size_next;
        self.message_index = 0;
        self.queue_len = self.region.ledger().queues[self.queue_index as usize].count;
    }
}

/// Drive a sync of every core to completion on the calling thread.
#[cfg(test)]
pub(crate) fn sync_all(cores: &mut [BspCore]) {
    for core in cores.iter_mut() {
        core.begin_sync();
    }
    for _ in 0..16 {
        let mut done = true;
        for core in cores.iter_mut() {
            done &= core.poll_sync() == SyncPoll::Complete;
        }
        if done {
            return;
        }
    }
    panic!("sync did not complete");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::config::Capacities;
    use crate::device::{AckMode, CommBuffer, LocalAddr};

    fn cores(n: usize) -> Vec<BspCore> {
        let caps = Capacities {
            core_memory_size: 1024,
            ..Capacities::with_nprocs(n)
        };
        let region = CommBuffer::shared(caps, AckMode::Inline).unwrap();
        (0..n)
            .map(|pid| BspCore::new(Arc::clone(&region), pid).unwrap())
            .collect()
    }

    #[test]
    fn test_single_process_sync() {
        let mut cores = cores(1);
        cores[0].sync();
        cores[0].sync();
        assert_eq!(cores[0].supersteps(), 2);
        assert_eq!(cores[0].sync_phase(), SyncPhase::Running);
        assert_eq!(cores[0].region().barrier().completion_count(), 6);
    }

    #[test]
    fn test_poll_waits_for_everyone() {
        let mut cores = cores(2);

        cores[0].begin_sync();
        assert_eq!(cores[0].poll_sync(), SyncPoll::Pending);
        assert_eq!(cores[0].sync_phase(), SyncPhase::Barrier1);

        cores[1].begin_sync();
        // pid 1 passes barrier 1 and parks at barrier 2
        assert_eq!(cores[1].poll_sync(), SyncPoll::Pending);
        assert_eq!(cores[1].sync_phase(), SyncPhase::Barrier2);

        assert_eq!(cores[0].poll_sync(), SyncPoll::Pending);
        assert_eq!(cores[0].sync_phase(), SyncPhase::Barrier3);
        assert_eq!(cores[1].poll_sync(), SyncPoll::Complete);
        assert_eq!(cores[0].poll_sync(), SyncPoll::Complete);
    }

    #[test]
    fn test_queue_rotation_parity() {
        let mut cores = cores(3);
        for k in 1..=5u64 {
            sync_all(&mut cores);
            for core in &cores {
                assert_eq!(core.queue_index() as u64, k % 2);
                assert_eq!(core.supersteps(), k);
            }
        }
    }

    #[test]
    fn test_requests_cleared() {
        let mut cores = cores(2);
        for core in cores.iter_mut() {
            core.register(LocalAddr(0), 4).unwrap();
        }
        sync_all(&mut cores);

        cores[0].get(1, LocalAddr(0), 0, LocalAddr(8), 4).unwrap();
        cores[0].put(1, LocalAddr(16), LocalAddr(0), 0, 4).unwrap();
        assert_eq!(cores[0].request_count(), 2);
        assert_eq!(cores[0].region().ledger().buffer_size, 4);

        sync_all(&mut cores);
        assert_eq!(cores[0].request_count(), 0);
        assert!(cores[0].region().requests(0).is_empty());
        assert_eq!(cores[0].region().ledger().buffer_size, 0);
    }

    #[test]
    fn test_get_sees_value_before_put() {
        let mut cores = cores(2);
        let x = LocalAddr(0x40);
        for core in cores.iter_mut() {
            core.register(x, 4).unwrap();
        }
        sync_all(&mut cores);

        cores[1].write_local_u32(x, 1).unwrap();
        cores[0].write_local_u32(LocalAddr(0x80), 2).unwrap();

        // Put issued before the get, still applied after it
        cores[0].put(1, LocalAddr(0x80), x, 0, 4).unwrap();
        cores[0].get(1, x, 0, LocalAddr(0x100), 4).unwrap();
        sync_all(&mut cores);

        assert_eq!(cores[0].read_local_u32(LocalAddr(0x100)).unwrap(), 1);
        assert_eq!(cores[1].read_local_u32(x).unwrap(), 2);
    }

    #[test]
    fn test_threaded_sync() {
        let cores = cores(4);
        let handles: Vec<_> = cores
            .into_iter()
            .map(|mut core| {
                thread::spawn(move || {
                    for _ in 0..10 {
                        core.sync();
                    }
                    (core.supersteps(), core.queue_index())
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), (10, 0));
        }
    }
}
