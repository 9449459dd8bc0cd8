//! Single-slot error mailbox shared with the host.
//!
//! A process that detects a violated invariant renders a diagnostic, takes
//! the channel mutex, writes the text and its pid into the slot, and then
//! blocks until the host clears the slot. A second reporter blocks on the
//! channel mutex until the first report has been acknowledged.
//!
//! Two acknowledgment modes exist:
//!
//! - [`AckMode::Host`]: an external reader (a host thread) drains the slot
//!   with [`ErrorMailbox::take`]. The reporter parks until then.
//! - [`AckMode::Inline`]: the mailbox acknowledges immediately on behalf of
//!   the host. Used when the host and every process share a single thread,
//!   as in the cooperative coordinator.
//!
//! Every drained report is logged. The most recent [`HISTORY_CAPACITY`]
//! reports are kept in the mailbox history.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::addr::Pid;

/// Maximum diagnostic length in bytes, terminator included.
pub const MESSAGE_CAPACITY: usize = 128;

/// Number of drained reports kept for inspection.
pub const HISTORY_CAPACITY: usize = 256;

/// Who acknowledges posted reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// A host thread drains the mailbox.
    Host,
    /// The mailbox acknowledges by itself.
    Inline,
}

/// A diagnostic drained from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    /// Reporting process.
    pub pid: Pid,
    /// Rendered message, at most `MESSAGE_CAPACITY - 1` bytes.
    pub message: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}: {}", self.pid, self.message)
    }
}

#[derive(Debug, Default)]
struct History {
    recent: VecDeque<ErrorReport>,
    /// Reports drained over the mailbox's lifetime.
    total: usize,
}

#[derive(Debug, Default)]
struct Slot {
    message: String,
    /// Owner of the pending message; `None` when the slot is free.
    owner: Option<Pid>,
}

/// The error mailbox.
#[derive(Debug)]
pub struct ErrorMailbox {
    mode: AckMode,
    /// Serializes reporters for the whole post-and-wait sequence.
    channel: Mutex<()>,
    slot: Mutex<Slot>,
    posted: Condvar,
    cleared: Condvar,
    history: Mutex<History>,
}

/// Truncate `message` to fit the slot, respecting char boundaries.
pub fn bound_message(message: &str) -> String {
    let limit = MESSAGE_CAPACITY - 1;
    if message.len() <= limit {
        return message.to_string();
    }
    let mut end = limit;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

impl ErrorMailbox {
    /// Create an empty mailbox.
    pub fn new(mode: AckMode) -> Self {
        Self {
            mode,
            channel: Mutex::new(()),
            slot: Mutex::new(Slot::default()),
            posted: Condvar::new(),
            cleared: Condvar::new(),
            history: Mutex::new(History::default()),
        }
    }

    /// Acknowledgment mode.
    pub fn mode(&self) -> AckMode {
        self.mode
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a diagnostic for `pid` and block until it is acknowledged.
    pub fn report(&self, pid: Pid, message: &str) {
        let _channel = self.channel.lock().unwrap_or_else(PoisonError::into_inner);

        let mut slot = self.slot();
        slot.message = bound_message(message);
        slot.owner = Some(pid);

        match self.mode {
            AckMode::Inline => {
                if let Some(report) = Self::drain(&mut slot) {
                    self.record(report);
                }
            }
            AckMode::Host => {
                self.posted.notify_all();
                while slot.owner.is_some() {
                    slot = self
                        .cleared
                        .wait(slot)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn drain(slot: &mut Slot) -> Option<ErrorReport> {
        let pid = slot.owner.take()?;
        Some(ErrorReport {
            pid,
            message: std::mem::take(&mut slot.message),
        })
    }

    fn record(&self, report: ErrorReport) {
        log::error!("pid {}: {}", report.pid, report.message);
        let mut history = self.history();
        if history.recent.len() == HISTORY_CAPACITY {
            history.recent.pop_front();
        }
        history.recent.push_back(report);
        history.total += 1;
    }

    /// Host side: drain a pending report, if any, and release its reporter.
    pub fn take(&self) -> Option<ErrorReport> {
        let report = {
            let mut slot = self.slot();
            let report = Self::drain(&mut slot)?;
            self.cleared.notify_all();
            report
        };
        self.record(report.clone());
        Some(report)
    }

    /// Host side: wait up to `timeout` for a report, then drain it.
    pub fn take_timeout(&self, timeout: Duration) -> Option<ErrorReport> {
        {
            let slot = self.slot();
            if slot.owner.is_none() {
                let _ = self
                    .posted
                    .wait_timeout(slot, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        self.take()
    }

    /// Process currently owning the slot, if a report is pending.
    pub fn pending(&self) -> Option<Pid> {
        self.slot().owner
    }

    /// The most recent drained reports, oldest first.
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.history().recent.iter().cloned().collect()
    }

    /// Number of reports drained so far, including those evicted from the
    /// history.
    pub fn report_count(&self) -> usize {
        self.history().total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_inline_acknowledges_immediately() {
        let mailbox = ErrorMailbox::new(AckMode::Inline);
        mailbox.report(3, "first");
        mailbox.report(1, "second");

        assert_eq!(mailbox.pending(), None);
        let reports = mailbox.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], ErrorReport { pid: 3, message: "first".into() });
        assert_eq!(reports[1].pid, 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mailbox = ErrorMailbox::new(AckMode::Inline);
        for i in 0..HISTORY_CAPACITY + 10 {
            mailbox.report(0, &format!("report {}", i));
        }

        let reports = mailbox.reports();
        assert_eq!(reports.len(), HISTORY_CAPACITY);
        assert_eq!(reports[0].message, "report 10");
        assert_eq!(mailbox.report_count(), HISTORY_CAPACITY + 10);
    }

    #[test]
    fn test_message_bounded() {
        let long = "x".repeat(400);
        assert_eq!(bound_message(&long).len(), MESSAGE_CAPACITY - 1);

        // Multi-byte characters are never split
        let wide = "é".repeat(100);
        let bounded = bound_message(&wide);
        assert!(bounded.len() <= MESSAGE_CAPACITY - 1);
        assert!(bounded.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_host_mode_blocks_until_taken() {
        let mailbox = Arc::new(ErrorMailbox::new(AckMode::Host));

        let reporter = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || mailbox.report(2, "overflow"))
        };

        // The reporter stays parked until the host drains the slot
        let report = loop {
            if let Some(report) = mailbox.take_timeout(Duration::from_millis(10)) {
                break report;
            }
        };
        reporter.join().unwrap();

        assert_eq!(report.pid, 2);
        assert_eq!(report.message, "overflow");
        assert_eq!(mailbox.report_count(), 1);
        assert_eq!(mailbox.pending(), None);
    }

    #[test]
    fn test_take_on_empty_mailbox() {
        let mailbox = ErrorMailbox::new(AckMode::Host);
        assert_eq!(mailbox.take(), None);
        assert_eq!(mailbox.report_count(), 0);
    }
}
