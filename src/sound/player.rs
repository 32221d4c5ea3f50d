//! Alarm player implementation using rodio.
//!
//! rodio's `OutputStream` cannot leave the thread that created it, so the
//! player owns a dedicated audio thread and talks to it over
//! crossbeam-channel.

use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tracing::{debug, warn};

use super::embedded::siren;
use super::error::SoundError;
use super::source::SoundSource;

/// Requests handled by the audio thread.
enum AudioRequest {
    Play {
        source: SoundSource,
        volume: f32,
        reply: Sender<Result<(), SoundError>>,
    },
    Stop,
    Shutdown,
}

/// Looping alarm player backed by rodio.
///
/// `play` is idempotent: playing the sound that is already looping only
/// updates the volume.
pub struct RodioAlarmPlayer {
    requests: Sender<AudioRequest>,
    playing: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RodioAlarmPlayer {
    /// Starts the audio thread and opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `SoundError::DeviceNotAvailable` if no audio output device
    /// is available.
    pub fn new() -> Result<Self, SoundError> {
        let (requests, inbox) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let playing = Arc::new(AtomicBool::new(false));
        let thread_playing = Arc::clone(&playing);

        let thread = std::thread::Builder::new()
            .name("theftguard-audio".to_string())
            .spawn(move || audio_thread(inbox, ready_tx, thread_playing))
            .map_err(|e| SoundError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!("オーディオスレッドを開始しました");
                Ok(Self {
                    requests,
                    playing,
                    thread: Mutex::new(Some(thread)),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(SoundError::ThreadStopped),
        }
    }

    /// Starts looping `source` at `volume` (0.0 to 1.0).
    ///
    /// # Errors
    ///
    /// Returns an error if neither the source nor the built-in siren could
    /// be played.
    pub fn play(&self, source: &SoundSource, volume: f32) -> Result<(), SoundError> {
        let (reply, result) = bounded(1);
        self.requests
            .send(AudioRequest::Play {
                source: source.clone(),
                volume: volume.clamp(0.0, 1.0),
                reply,
            })
            .map_err(|_| SoundError::ThreadStopped)?;
        result.recv().map_err(|_| SoundError::ThreadStopped)?
    }

    /// Stops the alarm. Stopping a silent player is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `SoundError::ThreadStopped` if the audio thread has exited.
    pub fn stop(&self) -> Result<(), SoundError> {
        self.requests
            .send(AudioRequest::Stop)
            .map_err(|_| SoundError::ThreadStopped)
    }

    /// Returns true while the alarm is looping.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for RodioAlarmPlayer {
    fn drop(&mut self) {
        let _ = self.requests.send(AudioRequest::Shutdown);
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for RodioAlarmPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioAlarmPlayer")
            .field("playing", &self.is_playing())
            .finish_non_exhaustive()
    }
}

fn audio_thread(
    inbox: Receiver<AudioRequest>,
    ready: Sender<Result<(), SoundError>>,
    playing: Arc<AtomicBool>,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => {
            let _ = ready.send(Ok(()));
            pair
        }
        Err(e) => {
            let _ = ready.send(Err(SoundError::DeviceNotAvailable(e.to_string())));
            return;
        }
    };

    let mut active: Option<(Sink, SoundSource)> = None;

    for request in inbox.iter() {
        match request {
            AudioRequest::Play {
                source,
                volume,
                reply,
            } => {
                let result = match &active {
                    Some((sink, current)) if *current == source && !sink.empty() => {
                        sink.set_volume(volume);
                        Ok(())
                    }
                    _ => {
                        if let Some((sink, _)) = active.take() {
                            sink.stop();
                        }
                        match start_loop(&handle, &source, volume) {
                            Ok(sink) => {
                                active = Some((sink, source));
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                };
                playing.store(active.is_some(), Ordering::SeqCst);
                let _ = reply.send(result);
            }
            AudioRequest::Stop => {
                if let Some((sink, source)) = active.take() {
                    sink.stop();
                    debug!("アラーム音を停止しました: {}", source.name());
                }
                playing.store(false, Ordering::SeqCst);
            }
            AudioRequest::Shutdown => break,
        }
    }

    if let Some((sink, _)) = active.take() {
        sink.stop();
    }
    playing.store(false, Ordering::SeqCst);
}

fn start_loop(handle: &OutputStreamHandle, source: &SoundSource, volume: f32) -> Result<Sink, SoundError> {
    let sink = Sink::try_new(handle).map_err(|e| SoundError::StreamError(e.to_string()))?;
    sink.set_volume(volume);

    match source {
        SoundSource::File { name, path } => match open_looped(path) {
            Ok(decoder) => {
                debug!("アラーム音を再生します: {}", name);
                sink.append(decoder);
            }
            Err(e) if e.should_fallback_to_siren() => {
                warn!("{}、内蔵サイレンで再生します", e);
                sink.append(siren());
            }
            Err(e) => return Err(e),
        },
        SoundSource::Builtin => {
            debug!("内蔵サイレンを再生します");
            sink.append(siren());
        }
    }

    sink.play();
    Ok(sink)
}

fn open_looped(path: &std::path::Path) -> Result<rodio::decoder::LoopedDecoder<BufReader<File>>, SoundError> {
    let file = File::open(path)
        .map_err(|e| SoundError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    Decoder::new_looped(BufReader::new(file)).map_err(|e| SoundError::DecodeError(e.to_string()))
}

/// Creates a player, returning None if audio is unavailable.
#[must_use]
pub fn try_create_player() -> Option<Arc<RodioAlarmPlayer>> {
    match RodioAlarmPlayer::new() {
        Ok(player) => Some(Arc::new(player)),
        Err(e) => {
            warn!("オーディオが利用できないため、アラーム音は無効です: {}", e);
            None
        }
    }
}
