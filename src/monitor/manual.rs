//! Monitor adapter driven from outside the process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{MonitorAdapter, MonitorError};
use crate::types::TriggerSource;

/// Adapter whose condition is reported by an external observer.
///
/// Used for input activity, and for lid/power on machines without a
/// readable state file. Reports arrive through
/// [`MonitorHub::report`](super::MonitorHub::report) and are forwarded only
/// while this adapter is running.
#[derive(Debug)]
pub struct ManualMonitor {
    source: TriggerSource,
    running: AtomicBool,
    starts: AtomicUsize,
}

impl ManualMonitor {
    /// Creates a stopped adapter.
    #[must_use]
    pub fn new(source: TriggerSource) -> Self {
        Self {
            source,
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
        }
    }

    /// Number of stopped → running transitions.
    #[must_use]
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl MonitorAdapter for ManualMonitor {
    fn source(&self) -> TriggerSource {
        self.source
    }

    fn start(&self) -> Result<(), MonitorError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
