//! Audio playback through rodio with cancellation.
//!
//! Each player is one audio output: it plays one clip at a time, can be
//! cancelled or paused mid-clip, and feeds what it plays into the
//! analyser once attached.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::mixer::Mixer;
use rodio::{Decoder, Sink, Source};
use tracing::{debug, warn};

use crate::config::PlayerConfig;
use crate::error::SpeechError;
use crate::visualizer::analyser::{OutputId, SampleTap, Tappable};

/// Decoded interleaved PCM.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
        Duration::from_secs_f64(frames / self.sample_rate.max(1) as f64)
    }
}

/// Decode an encoded clip (MP3, WAV, ...) fully into memory.
pub fn decode(bytes: Vec<u8>) -> Result<DecodedAudio, SpeechError> {
    let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| SpeechError::Decode(e.to_string()))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.collect();
    if samples.is_empty() {
        return Err(SpeechError::Decode("clip contains no audio".into()));
    }
    Ok(DecodedAudio {
        channels,
        sample_rate,
        samples,
    })
}

struct Playback {
    sink: Arc<Sink>,
    cancelled: Arc<AtomicBool>,
}

impl Playback {
    fn stop(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.sink.stop();
    }
}

struct StopOnDrop<'a> {
    player: &'a AudioPlayer,
    sink: Option<Arc<Sink>>,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            if self.player.release(&sink) {
                debug!("Output {:?}: abandoned clip stopped", self.player.id);
            }
        }
    }
}

pub struct AudioPlayer {
    id: OutputId,
    mixer: Mixer,
    poll_interval: Duration,
    tap: Mutex<Option<SampleTap>>,
    current: Mutex<Option<Playback>>,
}

impl AudioPlayer {
    pub fn new(id: OutputId, mixer: Mixer, config: &PlayerConfig) -> Self {
        Self {
            id,
            mixer,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            tap: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    /// Decode and play `bytes`, resolving when playback ends.
    pub async fn play_bytes(&self, bytes: Vec<u8>, speed: f32) -> Result<(), SpeechError> {
        let audio = tokio::task::spawn_blocking(move || decode(bytes))
            .await
            .map_err(|e| SpeechError::Decode(e.to_string()))??;
        self.play(audio, speed).await
    }

    /// Play decoded audio at `speed`. Resolves `Ok` when the clip has
    /// finished and `Err(Interrupted)` when it was cancelled.
    pub async fn play(&self, audio: DecodedAudio, speed: f32) -> Result<(), SpeechError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let sink = {
            // Holding the slot while the source goes in means a concurrent
            // `cancel` either runs first or finds this clip.
            let mut current = self.current.lock().unwrap();
            if let Some(previous) = current.take() {
                previous.stop();
            }
            let sink = Arc::new(Sink::connect_new(&self.mixer));
            sink.set_speed(speed);
            *current = Some(Playback {
                sink: sink.clone(),
                cancelled: cancelled.clone(),
            });
            sink.append(SamplesBuffer::new(
                audio.channels,
                audio.sample_rate,
                audio.samples.clone(),
            ));
            sink
        };
        // Dropping this future (an aborted task) stops the clip too.
        let mut guard = StopOnDrop {
            player: self,
            sink: Some(sink.clone()),
        };

        let tap = self.tap.lock().unwrap().clone();
        let poll = self.poll_interval;
        debug!(
            "Output {:?}: playing {:.1}s clip at {speed}x",
            self.id,
            audio.duration().as_secs_f32()
        );

        let watcher_sink = sink.clone();
        let was_cancelled = tokio::task::spawn_blocking(move || {
            let per_second = audio.sample_rate as f64 * audio.channels.max(1) as f64;
            let mut fed = 0usize;
            loop {
                if cancelled.load(Ordering::Relaxed) {
                    watcher_sink.stop();
                    return true;
                }

                if let Some(tap) = &tap {
                    let played = (watcher_sink.get_pos().as_secs_f64() * per_second) as usize;
                    let upto = played.min(audio.samples.len());
                    if upto > fed {
                        tap.feed(&audio.samples[fed..upto], audio.channels);
                        fed = upto;
                    }
                }

                if watcher_sink.empty() {
                    return false;
                }

                std::thread::sleep(poll);
            }
        })
        .await
        .map_err(|e| SpeechError::Playback(e.to_string()))?;

        guard.sink = None;
        self.release(&sink);

        if was_cancelled {
            Err(SpeechError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Stop the current clip, if any.
    pub fn cancel(&self) {
        if let Some(playback) = self.current.lock().unwrap().take() {
            playback.stop();
            debug!("Output {:?}: playback cancelled", self.id);
        }
    }

    /// Clear `sink` from the slot unless a newer clip has replaced it.
    /// Returns whether it was still current.
    fn release(&self, sink: &Arc<Sink>) -> bool {
        let mut current = self.current.lock().unwrap();
        match current.take_if(|p| Arc::ptr_eq(&p.sink, sink)) {
            Some(playback) => {
                playback.stop();
                true
            }
            None => false,
        }
    }

    /// Pause the current clip. Returns false if nothing is playing.
    pub fn pause(&self) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(playback) if !playback.sink.is_paused() => {
                playback.sink.pause();
                true
            }
            _ => false,
        }
    }

    /// Resume a paused clip. Returns false if there is nothing to resume.
    pub fn resume(&self) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(playback) if playback.sink.is_paused() => {
                playback.sink.play();
                true
            }
            _ => false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| !p.sink.is_paused())
    }

    pub fn is_paused(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p.sink.is_paused())
    }
}

impl Tappable for AudioPlayer {
    fn output_id(&self) -> OutputId {
        self.id
    }

    fn connect_tap(&self, tap: SampleTap) {
        let mut slot = self.tap.lock().unwrap();
        if slot.is_some() {
            warn!("Output {:?} already has an analyser tap", self.id);
            return;
        }
        *slot = Some(tap);
    }
}
