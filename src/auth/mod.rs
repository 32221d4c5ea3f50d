//! Authentication gate.
//!
//! The gate is invoked by the UI/IPC layer when the user tries to cancel an
//! escalation. The coordinator never calls it; it only consumes the
//! resulting `AuthSucceeded` / `AuthFailed` events.
//!
//! # Example
//!
//! ```
//! use theftguard::auth::{AuthGate, AuthOutcome, AuthRequest, LocalAuthGate};
//!
//! let gate = LocalAuthGate::new(Some("4321".to_string()), None);
//! assert_eq!(gate.authenticate(&AuthRequest::pin("4321")), AuthOutcome::Success);
//! assert!(!gate.authenticate(&AuthRequest::pin("0000")).is_success());
//! ```

pub mod error;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

pub use error::AuthFailureReason;

use crate::types::TransitionEvent;

/// Result of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user is who they claim to be
    Success,
    /// The attempt was rejected
    Failure(AuthFailureReason),
}

impl AuthOutcome {
    /// Returns true on success.
    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success)
    }

    /// Converts the outcome into the event the coordinator consumes.
    pub fn into_event(self) -> TransitionEvent {
        match self {
            AuthOutcome::Success => TransitionEvent::AuthSucceeded,
            AuthOutcome::Failure(reason) => TransitionEvent::AuthFailed(reason),
        }
    }
}

/// How the user wants to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// Use the biometric sensor
    Biometric,
    /// Check a PIN
    Pin(String),
    /// Biometric if available, otherwise report what is missing
    Any,
}

impl AuthRequest {
    /// Creates a PIN request.
    pub fn pin(pin: impl Into<String>) -> Self {
        AuthRequest::Pin(pin.into())
    }

    /// Builds a request from an optional PIN.
    pub fn from_pin(pin: Option<String>) -> Self {
        match pin {
            Some(pin) => AuthRequest::Pin(pin),
            None => AuthRequest::Any,
        }
    }
}

/// Trait for authentication implementations.
///
/// Implementations may block (a biometric prompt waits for the user), so
/// async callers should run them on a blocking thread.
pub trait AuthGate: Send + Sync {
    /// Runs one authentication attempt.
    fn authenticate(&self, request: &AuthRequest) -> AuthOutcome;
}

/// Platform biometric check.
pub trait BiometricCheck: Send + Sync {
    /// Returns true if a sensor is present and enrolled.
    fn is_available(&self) -> bool;

    /// Prompts the user; returns true on a match.
    fn verify(&self) -> bool;
}

// ============================================================================
// LocalAuthGate
// ============================================================================

/// Auth gate backed by an optional biometric check and an optional PIN.
pub struct LocalAuthGate {
    pin: Option<String>,
    biometric: Option<Arc<dyn BiometricCheck>>,
}

impl LocalAuthGate {
    /// Creates a gate.
    pub fn new(pin: Option<String>, biometric: Option<Arc<dyn BiometricCheck>>) -> Self {
        Self { pin, biometric }
    }

    fn biometric_available(&self) -> bool {
        self.biometric.as_ref().is_some_and(|b| b.is_available())
    }

    fn check_biometric(&self) -> AuthOutcome {
        match &self.biometric {
            Some(biometric) if biometric.is_available() => {
                if biometric.verify() {
                    AuthOutcome::Success
                } else {
                    AuthOutcome::Failure(AuthFailureReason::BiometricFailed)
                }
            }
            _ => AuthOutcome::Failure(AuthFailureReason::BiometricUnavailable),
        }
    }

    fn check_pin(&self, candidate: &str) -> AuthOutcome {
        match &self.pin {
            None => AuthOutcome::Failure(AuthFailureReason::PinNotConfigured),
            Some(expected) if constant_time_eq(expected.as_bytes(), candidate.as_bytes()) => {
                AuthOutcome::Success
            }
            Some(_) => AuthOutcome::Failure(AuthFailureReason::PinIncorrect),
        }
    }
}

impl AuthGate for LocalAuthGate {
    fn authenticate(&self, request: &AuthRequest) -> AuthOutcome {
        let outcome = match request {
            AuthRequest::Biometric => self.check_biometric(),
            AuthRequest::Pin(pin) => self.check_pin(pin),
            AuthRequest::Any => {
                if self.biometric_available() {
                    self.check_biometric()
                } else if self.pin.is_some() {
                    // A PIN exists but none was supplied.
                    AuthOutcome::Failure(AuthFailureReason::BiometricUnavailable)
                } else {
                    AuthOutcome::Failure(AuthFailureReason::NoMethodAvailable)
                }
            }
        };

        match outcome {
            AuthOutcome::Success => info!("認証に成功しました"),
            AuthOutcome::Failure(reason) => debug!("認証に失敗しました: {}", reason.code()),
        }
        outcome
    }
}

impl std::fmt::Debug for LocalAuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAuthGate")
            .field("pin_configured", &self.pin.is_some())
            .field("biometric", &self.biometric.is_some())
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Mocks
// ============================================================================

/// Mock auth gate for testing.
#[derive(Debug)]
pub struct MockAuthGate {
    outcomes: Mutex<Vec<AuthOutcome>>,
    default_success: AtomicBool,
    calls: AtomicUsize,
}

impl Default for MockAuthGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuthGate {
    /// Creates a gate that succeeds unless told otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            default_success: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues an outcome for the next call.
    pub fn push_outcome(&self, outcome: AuthOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    /// Sets what happens when the queue is empty.
    pub fn set_default_success(&self, success: bool) {
        self.default_success.store(success, Ordering::SeqCst);
    }

    /// Number of authenticate calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AuthGate for MockAuthGate {
    fn authenticate(&self, _request: &AuthRequest) -> AuthOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.outcomes.lock().unwrap();
        if !queue.is_empty() {
            return queue.remove(0);
        }
        if self.default_success.load(Ordering::SeqCst) {
            AuthOutcome::Success
        } else {
            AuthOutcome::Failure(AuthFailureReason::PinIncorrect)
        }
    }
}

/// Mock biometric sensor for testing.
#[derive(Debug, Default)]
pub struct MockBiometric {
    /// Sensor is present
    pub available: AtomicBool,
    /// Next verification matches
    pub matches: AtomicBool,
}

impl MockBiometric {
    /// Creates a sensor with the given behavior.
    #[must_use]
    pub fn new(available: bool, matches: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            matches: AtomicBool::new(matches),
        }
    }
}

impl BiometricCheck for MockBiometric {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn verify(&self) -> bool {
        self.matches.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(pin: Option<&str>, biometric: Option<MockBiometric>) -> LocalAuthGate {
        LocalAuthGate::new(
            pin.map(str::to_string),
            biometric.map(|b| Arc::new(b) as Arc<dyn BiometricCheck>),
        )
    }

    mod pin_tests {
        use super::*;

        #[test]
        fn test_correct_pin() {
            let gate = gate(Some("1234"), None);
            assert_eq!(gate.authenticate(&AuthRequest::pin("1234")), AuthOutcome::Success);
        }

        #[test]
        fn test_incorrect_pin() {
            let gate = gate(Some("1234"), None);
            assert_eq!(
                gate.authenticate(&AuthRequest::pin("12345")),
                AuthOutcome::Failure(AuthFailureReason::PinIncorrect)
            );
            assert_eq!(
                gate.authenticate(&AuthRequest::pin("4321")),
                AuthOutcome::Failure(AuthFailureReason::PinIncorrect)
            );
        }

        #[test]
        fn test_pin_not_configured() {
            let gate = gate(None, None);
            assert_eq!(
                gate.authenticate(&AuthRequest::pin("1234")),
                AuthOutcome::Failure(AuthFailureReason::PinNotConfigured)
            );
        }
    }

    mod biometric_tests {
        use super::*;

        #[test]
        fn test_biometric_success() {
            let gate = gate(None, Some(MockBiometric::new(true, true)));
            assert_eq!(gate.authenticate(&AuthRequest::Biometric), AuthOutcome::Success);
        }

        #[test]
        fn test_biometric_failed() {
            let gate = gate(None, Some(MockBiometric::new(true, false)));
            assert_eq!(
                gate.authenticate(&AuthRequest::Biometric),
                AuthOutcome::Failure(AuthFailureReason::BiometricFailed)
            );
        }

        #[test]
        fn test_biometric_unavailable() {
            let gate = gate(Some("1234"), Some(MockBiometric::new(false, true)));
            assert_eq!(
                gate.authenticate(&AuthRequest::Biometric),
                AuthOutcome::Failure(AuthFailureReason::BiometricUnavailable)
            );
        }
    }

    mod any_tests {
        use super::*;

        #[test]
        fn test_any_prefers_biometric() {
            let gate = gate(Some("1234"), Some(MockBiometric::new(true, true)));
            assert_eq!(gate.authenticate(&AuthRequest::Any), AuthOutcome::Success);
        }

        #[test]
        fn test_any_without_biometric_asks_for_pin() {
            let gate = gate(Some("1234"), None);
            assert_eq!(
                gate.authenticate(&AuthRequest::Any),
                AuthOutcome::Failure(AuthFailureReason::BiometricUnavailable)
            );
        }

        #[test]
        fn test_any_with_nothing_configured() {
            let gate = gate(None, None);
            assert_eq!(
                gate.authenticate(&AuthRequest::Any),
                AuthOutcome::Failure(AuthFailureReason::NoMethodAvailable)
            );
        }
    }

    #[test]
    fn test_outcome_into_event() {
        assert_eq!(AuthOutcome::Success.into_event(), TransitionEvent::AuthSucceeded);
        assert_eq!(
            AuthOutcome::Failure(AuthFailureReason::PinIncorrect).into_event(),
            TransitionEvent::AuthFailed(AuthFailureReason::PinIncorrect)
        );
    }

    #[test]
    fn test_mock_gate_queue() {
        let mock = MockAuthGate::new();
        mock.push_outcome(AuthOutcome::Failure(AuthFailureReason::BiometricFailed));

        assert!(!mock.authenticate(&AuthRequest::Any).is_success());
        assert!(mock.authenticate(&AuthRequest::Any).is_success());

        mock.set_default_success(false);
        assert!(!mock.authenticate(&AuthRequest::Any).is_success());
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_debug_hides_pin() {
        let gate = gate(Some("9876"), None);
        let debug = format!("{:?}", gate);
        assert!(!debug.contains("9876"));
        assert!(debug.contains("pin_configured: true"));
    }
}
