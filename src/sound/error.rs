//! Alarm sound error types.

use thiserror::Error;

/// Errors that can occur while playing the alarm.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SoundError {
    /// No audio output device could be opened.
    #[error("オーディオデバイスが利用できません: {0}")]
    DeviceNotAvailable(String),

    /// Sound file was not found.
    #[error("サウンドファイルが見つかりません: {0}")]
    FileNotFound(String),

    /// Failed to decode the sound file.
    #[error("サウンドファイルのデコードに失敗しました: {0}")]
    DecodeError(String),

    /// Failed to create a sink on the output stream.
    #[error("オーディオストリームの作成に失敗しました: {0}")]
    StreamError(String),

    /// The audio thread has exited.
    #[error("オーディオスレッドが停止しています")]
    ThreadStopped,
}

impl SoundError {
    /// Returns true if this error is related to device availability.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotAvailable(_) | Self::StreamError(_) | Self::ThreadStopped
        )
    }

    /// Returns true if the built-in siren should be played instead.
    #[must_use]
    pub fn should_fallback_to_siren(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::DecodeError(_))
    }

    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::DeviceNotAvailable(_) => "オーディオデバイスを接続してください",
            Self::FileNotFound(_) => "内蔵サイレンで再生を試みます",
            Self::DecodeError(_) => "サウンドファイルが破損している可能性があります",
            Self::StreamError(_) => "オーディオ設定を確認してください",
            Self::ThreadStopped => "デーモンを再起動してください",
        }
    }
}
