//! Proximity tracker error types.

use thiserror::Error;

use crate::types::DeviceId;

/// Errors returned by trusted-device configuration operations.
///
/// None of these are fatal; the tracker keeps its previous configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProximityError {
    /// The device set is full.
    #[error("信頼済みデバイスは最大{0}台までです")]
    TooManyDevices(usize),

    /// The device is already tracked.
    #[error("デバイス '{0}' は既に登録されています")]
    DuplicateDevice(DeviceId),

    /// The device is not tracked.
    #[error("デバイス '{0}' は登録されていません")]
    UnknownDevice(DeviceId),

    /// The thresholds are inconsistent.
    #[error("しきい値が不正です: {0}")]
    InvalidThresholds(String),
}

impl ProximityError {
    /// Returns a user-friendly suggestion for resolving this error.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::TooManyDevices(_) => "不要なデバイスを削除してから追加してください",
            Self::DuplicateDevice(_) => "登録済みのデバイスはそのまま利用できます",
            Self::UnknownDevice(_) => "先にデバイスを登録してください",
            Self::InvalidThresholds(_) => "離脱しきい値は接近しきい値より小さくしてください",
        }
    }
}
