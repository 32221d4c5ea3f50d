//! Built-in siren.
//!
//! Synthesized at runtime so the alarm works without any sound files.

use std::time::Duration;

use rodio::source::{SineWave, Source};

/// High tone of the two-tone siren, in Hz.
pub const SIREN_HIGH_HZ: f32 = 960.0;

/// Low tone of the two-tone siren, in Hz.
pub const SIREN_LOW_HZ: f32 = 770.0;

/// Length of each tone.
pub const SIREN_TONE_DURATION: Duration = Duration::from_millis(450);

/// Returns an endless two-tone siren.
#[must_use]
pub fn siren() -> impl Source<Item = f32> + Send + 'static {
    let tones = vec![
        SineWave::new(SIREN_HIGH_HZ).take_duration(SIREN_TONE_DURATION),
        SineWave::new(SIREN_LOW_HZ).take_duration(SIREN_TONE_DURATION),
    ];
    rodio::source::from_iter(tones).repeat_infinite()
}
