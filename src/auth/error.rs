//! Authentication failure reasons.
//!
//! Every failure is retryable and surfaced to the user; none of them
//! changes the alarm state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an authentication attempt failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureReason {
    /// No biometric sensor is available or enrolled.
    #[error("生体認証が利用できません")]
    BiometricUnavailable,

    /// The biometric check did not match.
    #[error("生体認証に失敗しました")]
    BiometricFailed,

    /// The PIN did not match.
    #[error("PINが正しくありません")]
    PinIncorrect,

    /// A PIN was supplied but none is configured.
    #[error("PINが設定されていません")]
    PinNotConfigured,

    /// Neither biometrics nor a PIN can be used.
    #[error("利用可能な認証方法がありません")]
    NoMethodAvailable,
}

impl AuthFailureReason {
    /// Returns the wire code for this reason.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BiometricUnavailable => "biometric_unavailable",
            Self::BiometricFailed => "biometric_failed",
            Self::PinIncorrect => "pin_incorrect",
            Self::PinNotConfigured => "pin_not_configured",
            Self::NoMethodAvailable => "no_method_available",
        }
    }

    /// Returns true if retrying with the same method can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BiometricFailed | Self::PinIncorrect)
    }

    /// Returns a user-friendly suggestion for resolving this failure.
    #[must_use]
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::BiometricUnavailable => "PINで認証してください",
            Self::BiometricFailed => "もう一度試すか、PINで認証してください",
            Self::PinIncorrect => "正しいPINを入力してください",
            Self::PinNotConfigured => "設定ファイルでPINを設定してください",
            Self::NoMethodAvailable => "生体認証を有効にするか、PINを設定してください",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(AuthFailureReason::PinIncorrect.to_string().contains("PIN"));
        assert!(AuthFailureReason::BiometricUnavailable
            .to_string()
            .contains("生体認証"));
    }

    #[test]
    fn test_code_matches_serde() {
        let reasons = [
            AuthFailureReason::BiometricUnavailable,
            AuthFailureReason::BiometricFailed,
            AuthFailureReason::PinIncorrect,
            AuthFailureReason::PinNotConfigured,
            AuthFailureReason::NoMethodAvailable,
        ];
        for reason in reasons {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.code()));
            assert!(!reason.suggestion().is_empty());
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(AuthFailureReason::PinIncorrect.is_retryable());
        assert!(AuthFailureReason::BiometricFailed.is_retryable());
        assert!(!AuthFailureReason::PinNotConfigured.is_retryable());
        assert!(!AuthFailureReason::NoMethodAvailable.is_retryable());
    }
}
