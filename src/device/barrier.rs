//! Symmetric barrier used by the sync protocol.
//!
//! Every process both signals and waits. Arrival and waiting are split so
//! the same barrier serves real threads (which park on a condition
//! variable) and the cooperative coordinator (which polls):
//!
//! 1. `arrive(pid)` records the arrival and returns a [`BarrierTicket`]
//! 2. `is_released(ticket)` tells whether everyone has arrived since
//! 3. `wait(ticket)` parks the calling thread until that happens
//!
//! The last arrival completes the current generation, clears the arrival
//! set and wakes all waiters. Waiting has no timeout: a missing peer stalls
//! the waiters forever.
//!
//! # Usage
//!
//! ```
//! use superstep::device::SyncBarrier;
//!
//! let barrier = SyncBarrier::new(2);
//! let t0 = barrier.arrive(0);
//! assert!(!barrier.is_released(t0));
//!
//! let t1 = barrier.arrive(1); // completes the generation
//! assert!(barrier.is_released(t0));
//! assert!(barrier.is_released(t1));
//! assert_eq!(barrier.completion_count(), 1);
//! ```

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::addr::Pid;

/// Proof of arrival at a particular barrier generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierTicket {
    generation: u64,
}

impl BarrierTicket {
    /// Generation this ticket waits on.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Mutable state behind the barrier mutex.
#[derive(Debug)]
struct BarrierState {
    /// Which processes arrived in the current generation.
    arrived: Vec<bool>,
    /// Number of `true` entries in `arrived`.
    arrived_count: usize,
    /// Completed generations.
    generation: u64,
    /// Process whose arrival completed the last generation.
    last_arrival: Option<Pid>,
}

/// Barrier for a fixed set of participants.
#[derive(Debug)]
pub struct SyncBarrier {
    participants: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl SyncBarrier {
    /// Create a barrier for `participants` processes (pids `0..participants`).
    pub fn new(participants: usize) -> Self {
        Self {
            participants,
            state: Mutex::new(BarrierState {
                arrived: vec![false; participants],
                arrived_count: 0,
                generation: 0,
                last_arrival: None,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        // A panicking participant cannot leave the state inconsistent:
        // every update below is a plain store.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of participants.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Record the arrival of `pid`.
    ///
    /// A repeated arrival within one generation is ignored and returns the
    /// ticket of the generation already joined.
    pub fn arrive(&self, pid: Pid) -> BarrierTicket {
        let mut state = self.lock();
        let ticket = BarrierTicket {
            generation: state.generation,
        };

        if state.arrived[pid] {
            log::warn!("pid {} arrived twice at barrier generation {}", pid, state.generation);
            return ticket;
        }

        state.arrived[pid] = true;
        state.arrived_count += 1;

        if state.arrived_count >= self.participants {
            state.arrived.iter_mut().for_each(|a| *a = false);
            state.arrived_count = 0;
            state.generation += 1;
            state.last_arrival = Some(pid);
            log::trace!("barrier generation {} released by pid {}", ticket.generation, pid);
            self.released.notify_all();
        }

        ticket
    }

    /// True once every participant has arrived for the ticket's generation.
    pub fn is_released(&self, ticket: BarrierTicket) -> bool {
        self.lock().generation > ticket.generation
    }

    /// Park the calling thread until the ticket's generation completes.
    pub fn wait(&self, ticket: BarrierTicket) {
        let mut state = self.lock();
        while state.generation <= ticket.generation {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Arrive and park until everyone else has arrived.
    pub fn arrive_and_wait(&self, pid: Pid) {
        let ticket = self.arrive(pid);
        self.wait(ticket);
    }

    /// Check if a process has arrived in the current generation.
    pub fn has_arrived(&self, pid: Pid) -> bool {
        self.lock().arrived.get(pid).copied().unwrap_or(false)
    }

    /// Number of arrivals in the current generation.
    pub fn arrived_count(&self) -> usize {
        self.lock().arrived_count
    }

    /// Number of completed generations.
    pub fn completion_count(&self) -> u64 {
        self.lock().generation
    }

    /// Process that completed the most recent generation.
    pub fn last_arrival(&self) -> Option<Pid> {
        self.lock().last_arrival
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_barrier_completes_on_last_arrival() {
        let barrier = SyncBarrier::new(3);

        let t0 = barrier.arrive(0);
        let t2 = barrier.arrive(2);
        assert_eq!(barrier.arrived_count(), 2);
        assert!(barrier.has_arrived(2));
        assert!(!barrier.is_released(t0));

        let t1 = barrier.arrive(1);
        assert!(barrier.is_released(t0));
        assert!(barrier.is_released(t1));
        assert!(barrier.is_released(t2));

        // Arrival set is cleared for the next generation
        assert_eq!(barrier.arrived_count(), 0);
        assert!(!barrier.has_arrived(2));
        assert_eq!(barrier.last_arrival(), Some(1));
    }

    #[test]
    fn test_repeated_arrival_ignored() {
        let barrier = SyncBarrier::new(2);

        let first = barrier.arrive(0);
        let second = barrier.arrive(0);
        assert_eq!(first, second);
        assert_eq!(barrier.arrived_count(), 1);
        assert!(!barrier.is_released(first));
    }

    #[test]
    fn test_generations_advance() {
        let barrier = SyncBarrier::new(2);

        for generation in 0..5 {
            let t = barrier.arrive(1);
            assert_eq!(t.generation(), generation);
            barrier.arrive(0);
            assert!(barrier.is_released(t));
        }
        assert_eq!(barrier.completion_count(), 5);
    }

    #[test]
    fn test_single_participant_never_blocks() {
        let barrier = SyncBarrier::new(1);
        barrier.arrive_and_wait(0);
        barrier.arrive_and_wait(0);
        assert_eq!(barrier.completion_count(), 2);
    }

    #[test]
    fn test_threads_rendezvous() {
        let barrier = Arc::new(SyncBarrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|pid| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        barrier.arrive_and_wait(pid);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(barrier.completion_count(), 3);
    }
}
