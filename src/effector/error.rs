//! Effector error types.
//!
//! Effector failures are reported, never fatal: the transition that issued
//! the command stands.

use thiserror::Error;

use crate::monitor::MonitorError;
use crate::sound::SoundError;

/// Errors that can occur while executing a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EffectorError {
    /// The command did not finish within the effector timeout.
    #[error("コマンド '{command}' がタイムアウトしました（{timeout_ms}ms）")]
    Timeout {
        /// Command name
        command: &'static str,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Alarm playback failed.
    #[error("アラーム音の操作に失敗しました: {0}")]
    Sound(#[from] SoundError),

    /// A monitor could not be started.
    #[error("監視の開始に失敗しました: {0}")]
    Monitor(#[from] MonitorError),

    /// An OS command exited with an error.
    #[error("システムコマンド '{program}' の実行に失敗しました: {detail}")]
    CommandFailed {
        /// Program that was run
        program: String,
        /// stderr or spawn error
        detail: String,
    },

    /// The blocking task running the command panicked or was cancelled.
    #[error("タスク実行エラー: {0}")]
    TaskFailed(String),
}

impl EffectorError {
    /// Returns true if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if the coordinator can keep running.
    ///
    /// Always true; the alarm state never depends on an effector result.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "設定のeffectorTimeoutMsを延長してください",
            Self::Sound(e) => e.suggestion(),
            Self::Monitor(e) => e.suggestion(),
            Self::CommandFailed { .. } => "コマンドがインストールされているか確認してください",
            Self::TaskFailed(_) => "デーモンを再起動してください",
        }
    }
}
