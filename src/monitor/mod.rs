//! Trigger monitor adapters.
//!
//! Each adapter watches one OS condition and emits a single event type into
//! the coordinator. The [`MonitorHub`] owns the adapters and reconciles the
//! running set with the coordinator's `start_monitors`/`stop_monitors`
//! commands.
//!
//! # Adapters
//!
//! - [`ManualMonitor`]: condition reported from outside (IPC, tests)
//! - [`FilePollMonitor`]: lid switch and AC adapter state files

pub mod error;
pub mod file_poll;
pub mod manual;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use error::MonitorError;
pub use file_poll::{FilePollMonitor, AC_ONLINE_PATH, LID_STATE_PATH};
pub use manual::ManualMonitor;

use crate::types::{TransitionEvent, TriggerSource};

/// Destination of monitor events.
pub trait EventSink: Send + Sync {
    /// Delivers an event. Returns false once the receiver is gone.
    fn emit(&self, event: TransitionEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<TransitionEvent> {
    fn emit(&self, event: TransitionEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// Trait for monitor adapters.
///
/// `start` and `stop` are idempotent.
pub trait MonitorAdapter: Send + Sync {
    /// The trigger this adapter produces.
    fn source(&self) -> TriggerSource;

    /// Starts watching.
    ///
    /// # Errors
    ///
    /// Returns an error if the condition cannot be observed on this machine.
    fn start(&self) -> Result<(), MonitorError>;

    /// Stops watching.
    fn stop(&self);

    /// Returns true while watching.
    fn is_running(&self) -> bool;
}

// ============================================================================
// MonitorHub
// ============================================================================

/// The set of registered monitor adapters.
pub struct MonitorHub {
    adapters: Vec<Arc<dyn MonitorAdapter>>,
    sink: Arc<dyn EventSink>,
}

impl MonitorHub {
    /// Creates an empty hub.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            adapters: Vec::new(),
            sink,
        }
    }

    /// Creates a hub with the platform adapters.
    ///
    /// Lid and power use their state files when readable and fall back to
    /// manual reporting otherwise. Input is always reported manually.
    pub fn with_defaults(sink: Arc<dyn EventSink>) -> Self {
        let mut hub = Self::new(Arc::clone(&sink));
        hub.register(Arc::new(ManualMonitor::new(TriggerSource::Input)));

        for monitor in [
            FilePollMonitor::lid(Arc::clone(&sink)),
            FilePollMonitor::power(Arc::clone(&sink)),
        ] {
            if monitor.path().exists() {
                hub.register(Arc::new(monitor));
            } else {
                debug!(
                    "{}が見つからないため、{}は手動通知で監視します",
                    monitor.path().display(),
                    monitor.source()
                );
                hub.register(Arc::new(ManualMonitor::new(monitor.source())));
            }
        }
        hub
    }

    /// Registers an adapter, replacing any adapter for the same source.
    pub fn register(&mut self, adapter: Arc<dyn MonitorAdapter>) {
        let source = adapter.source();
        if let Some(old) = self.adapters.iter().position(|a| a.source() == source) {
            self.adapters[old].stop();
            self.adapters[old] = adapter;
        } else {
            self.adapters.push(adapter);
        }
    }

    /// Runs exactly the adapters for `sources` and stops the rest.
    ///
    /// Every adapter is attempted; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if a requested source has no adapter or fails to
    /// start.
    pub fn start(&self, sources: &[TriggerSource]) -> Result<(), MonitorError> {
        let mut first_error = None;

        for adapter in &self.adapters {
            if sources.contains(&adapter.source()) {
                if let Err(e) = adapter.start() {
                    warn!("{}", e);
                    first_error.get_or_insert(e);
                }
            } else {
                adapter.stop();
            }
        }

        for source in sources {
            if !self.adapters.iter().any(|a| a.source() == *source) {
                let e = MonitorError::NotRegistered(*source);
                warn!("{}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops every adapter.
    pub fn stop_all(&self) {
        for adapter in &self.adapters {
            adapter.stop();
        }
    }

    /// Forwards an externally observed trigger.
    ///
    /// Returns false if the adapter for `source` is not running, in which
    /// case nothing is emitted.
    pub fn report(&self, source: TriggerSource) -> bool {
        let running = self
            .adapters
            .iter()
            .any(|a| a.source() == source && a.is_running());
        if !running {
            debug!("{}の監視は停止中のため通知を破棄します", source);
            return false;
        }
        self.sink.emit(source.event())
    }

    /// Sources whose adapters are running.
    pub fn running(&self) -> Vec<TriggerSource> {
        TriggerSource::ALL
            .into_iter()
            .filter(|s| {
                self.adapters
                    .iter()
                    .any(|a| a.source() == *s && a.is_running())
            })
            .collect()
    }
}

impl std::fmt::Debug for MonitorHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHub")
            .field("running", &self.running())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> (MonitorHub, mpsc::UnboundedReceiver<TransitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = MonitorHub::new(Arc::new(tx));
        for source in TriggerSource::ALL {
            hub.register(Arc::new(ManualMonitor::new(source)));
        }
        (hub, rx)
    }

    mod start_tests {
        use super::*;

        #[test]
        fn test_start_reconciles_running_set() {
            let (hub, _rx) = hub();

            hub.start(&TriggerSource::ALL).unwrap();
            assert_eq!(hub.running(), TriggerSource::ALL.to_vec());

            hub.start(&[TriggerSource::Power]).unwrap();
            assert_eq!(hub.running(), vec![TriggerSource::Power]);

            hub.stop_all();
            assert!(hub.running().is_empty());
        }

        #[test]
        fn test_start_unregistered_source() {
            let (tx, _rx) = mpsc::unbounded_channel();
            let mut hub = MonitorHub::new(Arc::new(tx));
            hub.register(Arc::new(ManualMonitor::new(TriggerSource::Input)));

            let result = hub.start(&[TriggerSource::Input, TriggerSource::Lid]);
            assert_eq!(result, Err(MonitorError::NotRegistered(TriggerSource::Lid)));
            assert_eq!(hub.running(), vec![TriggerSource::Input]);
        }

        #[test]
        fn test_register_replaces_same_source() {
            let (mut hub, _rx) = hub();
            hub.start(&[TriggerSource::Input]).unwrap();

            hub.register(Arc::new(ManualMonitor::new(TriggerSource::Input)));
            assert!(hub.running().is_empty());
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_report_while_running() {
            let (hub, mut rx) = hub();
            hub.start(&[TriggerSource::Lid]).unwrap();

            assert!(hub.report(TriggerSource::Lid));
            assert_eq!(rx.try_recv().unwrap(), TransitionEvent::LidClosed);
        }

        #[test]
        fn test_report_while_stopped_is_dropped() {
            let (hub, mut rx) = hub();
            hub.start(&[TriggerSource::Lid]).unwrap();

            assert!(!hub.report(TriggerSource::Input));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn test_with_defaults_registers_every_source() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let hub = MonitorHub::with_defaults(Arc::new(tx));
        assert_eq!(hub.adapters.len(), TriggerSource::ALL.len());
    }
}
