//! Alarm sound playback.
//!
//! This module provides the siren used when the system escalates to
//! `Alarming`:
//!
//! - Named sound resolution with a built-in fallback
//! - Looping playback on a dedicated audio thread
//! - Idempotent play/stop
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   crossbeam   ┌──────────────────┐
//! │ RodioAlarmPlayer │──────────────▶│   audio thread   │
//! │  (any thread)    │◀──────────────│ OutputStream+Sink│
//! └──────────────────┘    replies    └────────┬─────────┘
//!                                             │
//!                                             ▼
//!                                  ┌──────────────────┐
//!                                  │   SoundSource    │
//!                                  │ file / siren     │
//!                                  └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use theftguard::sound::{resolve_sound, sound_dirs, AlarmPlayer, RodioAlarmPlayer};
//!
//! let player = RodioAlarmPlayer::new().expect("audio init");
//! let source = resolve_sound("siren", &sound_dirs());
//! player.play(&source, 1.0).expect("playback failed");
//! player.stop().expect("stop failed");
//! ```

mod embedded;
mod error;
mod player;
mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use embedded::{siren, SIREN_HIGH_HZ, SIREN_LOW_HZ, SIREN_TONE_DURATION};
pub use error::SoundError;
pub use player::{try_create_player, RodioAlarmPlayer};
pub use source::{discover_sounds, find_sound, resolve_sound, sound_dirs, SoundSource, BUILTIN_SIREN};

/// Trait for alarm playback implementations.
///
/// Both operations are idempotent. Implementations must not block for long;
/// callers run them on a blocking thread.
pub trait AlarmPlayer: Send + Sync {
    /// Starts looping the sound at `volume` (0.0 to 1.0).
    ///
    /// # Errors
    ///
    /// Returns an error if playback fails.
    fn play(&self, source: &SoundSource, volume: f32) -> Result<(), SoundError>;

    /// Stops the alarm.
    ///
    /// # Errors
    ///
    /// Returns an error if the player can no longer be reached.
    fn stop(&self) -> Result<(), SoundError>;

    /// Returns true while the alarm is playing.
    fn is_playing(&self) -> bool;
}

impl AlarmPlayer for RodioAlarmPlayer {
    fn play(&self, source: &SoundSource, volume: f32) -> Result<(), SoundError> {
        RodioAlarmPlayer::play(self, source, volume)
    }

    fn stop(&self) -> Result<(), SoundError> {
        RodioAlarmPlayer::stop(self)
    }

    fn is_playing(&self) -> bool {
        RodioAlarmPlayer::is_playing(self)
    }
}

/// Mock alarm player for testing.
#[derive(Debug, Default)]
pub struct MockAlarmPlayer {
    play_calls: Mutex<Vec<(SoundSource, f32)>>,
    stop_calls: Mutex<usize>,
    playing: AtomicBool,
    should_fail: AtomicBool,
}

impl MockAlarmPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn play_count(&self) -> usize {
        self.play_calls.lock().unwrap().len()
    }

    #[must_use]
    pub fn stop_count(&self) -> usize {
        *self.stop_calls.lock().unwrap()
    }

    #[must_use]
    pub fn get_play_calls(&self) -> Vec<(SoundSource, f32)> {
        self.play_calls.lock().unwrap().clone()
    }
}

impl AlarmPlayer for MockAlarmPlayer {
    fn play(&self, source: &SoundSource, volume: f32) -> Result<(), SoundError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SoundError::DeviceNotAvailable("Mock failure".to_string()));
        }
        self.play_calls.lock().unwrap().push((source.clone(), volume));
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), SoundError> {
        *self.stop_calls.lock().unwrap() += 1;
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}
