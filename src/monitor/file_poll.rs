//! Edge-triggered monitor over a kernel state file.
//!
//! Linux exposes the lid switch and the AC adapter as small text files.
//! The adapter polls the file and fires once each time the watched token
//! appears.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use super::{EventSink, MonitorAdapter, MonitorError};
use crate::types::TriggerSource;

/// ACPI lid switch state (`state:      open|closed`).
pub const LID_STATE_PATH: &str = "/proc/acpi/button/lid/LID0/state";

/// AC adapter presence (`1` when plugged in).
pub const AC_ONLINE_PATH: &str = "/sys/class/power_supply/AC/online";

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Polls a state file and emits the source's event on each rising edge.
pub struct FilePollMonitor {
    source: TriggerSource,
    path: PathBuf,
    token: String,
    poll_interval: Duration,
    sink: Arc<dyn EventSink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FilePollMonitor {
    /// Creates an adapter that fires when the last token of `path` equals
    /// `token`.
    pub fn new(
        source: TriggerSource,
        path: impl Into<PathBuf>,
        token: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            source,
            path: path.into(),
            token: token.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sink,
            task: Mutex::new(None),
        }
    }

    /// Lid-close adapter over the ACPI lid switch.
    pub fn lid(sink: Arc<dyn EventSink>) -> Self {
        Self::new(TriggerSource::Lid, LID_STATE_PATH, "closed", sink)
    }

    /// Power-disconnect adapter over the AC adapter state.
    pub fn power(sink: Arc<dyn EventSink>) -> Self {
        Self::new(TriggerSource::Power, AC_ONLINE_PATH, "0", sink)
    }

    /// Sets the polling period.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_condition(path: &Path, token: &str) -> Result<bool, MonitorError> {
        let content = std::fs::read_to_string(path).map_err(|e| MonitorError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(content.split_whitespace().last() == Some(token))
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MonitorAdapter for FilePollMonitor {
    fn source(&self) -> TriggerSource {
        self.source
    }

    fn start(&self) -> Result<(), MonitorError> {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        // The condition at start is the baseline; only later edges fire.
        let baseline = Self::read_condition(&self.path, &self.token)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MonitorError::SpawnFailed(e.to_string()))?;

        let source = self.source;
        let path = self.path.clone();
        let token = self.token.clone();
        let period = self.poll_interval;
        let sink = Arc::clone(&self.sink);

        *task = Some(runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut previous = baseline;

            loop {
                ticker.tick().await;
                let current = match Self::read_condition(&path, &token) {
                    Ok(current) => current,
                    Err(e) => {
                        debug!("{}", e);
                        continue;
                    }
                };
                if current && !previous {
                    info!("{}の変化を検知しました", source);
                    if !sink.emit(source.event()) {
                        break;
                    }
                }
                previous = current;
            }
        }));

        debug!("監視を開始しました: {} ({})", self.source, self.path.display());
        Ok(())
    }

    fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
            debug!("監視を停止しました: {}", self.source);
        }
    }

    fn is_running(&self) -> bool {
        self.lock_task().as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for FilePollMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for FilePollMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePollMonitor")
            .field("source", &self.source)
            .field("path", &self.path)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
