//! Monitor adapter error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TriggerSource;

/// Errors that can occur while starting or running a monitor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// No adapter is registered for the source.
    #[error("監視アダプターが登録されていません: {0}")]
    NotRegistered(TriggerSource),

    /// The state file the adapter watches cannot be read.
    #[error("状態ファイルを読み取れません: {path}: {reason}")]
    Unreadable {
        /// Watched file
        path: PathBuf,
        /// OS error text
        reason: String,
    },

    /// The monitor has no runtime to run on.
    #[error("監視タスクを開始できません: {0}")]
    SpawnFailed(String),
}

impl MonitorError {
    /// Returns true if the alarm keeps working without this monitor.
    ///
    /// A missing monitor only narrows what can trigger the alarm.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NotRegistered(_) => "設定でこの監視を無効にしてください",
            Self::Unreadable { .. } => "このマシンでは蓋や電源の状態を取得できない可能性があります",
            Self::SpawnFailed(_) => "デーモンを再起動してください",
        }
    }
}
