//! Blocking diagnostic channel.
//!
//! `report` renders a message, posts it to the region's single-slot mailbox
//! and blocks until the host acknowledges it. Failed admissions go through
//! [`BspCore::fail`], which reports the error and hands it back so the
//! operation can return it.

use std::fmt;

use super::BspCore;
use crate::error::{BspError, BspResult};

/// Report a formatted diagnostic from a process.
///
/// ```
/// # use superstep::config::Capacities;
/// # use superstep::device::{AckMode, CommBuffer};
/// # use superstep::runtime::BspCore;
/// # let region = CommBuffer::shared(Capacities::with_nprocs(1), AckMode::Inline).unwrap();
/// # let core = BspCore::new(region, 0).unwrap();
/// superstep::bsp_report!(core, "residual {} above {}", 0.5, 0.1);
/// assert_eq!(core.region().mailbox().report_count(), 1);
/// ```
#[macro_export]
macro_rules! bsp_report {
    ($core:expr, $($arg:tt)*) => {
        $core.report(format_args!($($arg)*))
    };
}

impl BspCore {
    /// Post a diagnostic and block until the host acknowledges it.
    pub fn report(&self, args: fmt::Arguments<'_>) {
        let message = args.to_string();
        log::warn!("pid {} reporting: {}", self.pid, message);
        self.region.mailbox().report(self.pid, &message);
    }

    /// Report `err` and return it.
    pub(crate) fn fail<T>(&self, err: BspError) -> BspResult<T> {
        self.report(format_args!("{}", err));
        Err(err)
    }
}
