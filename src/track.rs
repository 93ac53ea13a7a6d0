//! The pre-generated high-quality narration track.
//!
//! One WAV clip per story, played as a whole through its own output.
//! It competes with the sentence reader for the speakers, so the service
//! silences one before starting the other.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::SpeechError;
use crate::player::{decode, AudioPlayer, DecodedAudio};

/// Sample rate of raw narration PCM (16-bit mono).
pub const PCM_SAMPLE_RATE: u32 = 24000;

/// Playback the reader must not talk over.
#[async_trait]
pub trait TrackPlayback: Send + Sync {
    fn is_loaded(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;
    /// Returns false if nothing was playing.
    fn pause(&self) -> bool;
    fn resume(&self) -> bool;
    fn load(&self, path: &Path) -> Result<(), String>;
    fn unload(&self);
    /// Write the loaded clip as a WAV file.
    fn save(&self, path: &Path) -> Result<(), String>;
    /// Play the loaded clip from the start, resolving when it ends.
    async fn play_to_end(&self) -> Result<(), SpeechError>;
}

struct Clip {
    wav: Vec<u8>,
    audio: DecodedAudio,
}

pub struct NarrationTrack {
    player: Arc<AudioPlayer>,
    clip: Mutex<Option<Arc<Clip>>>,
}

impl NarrationTrack {
    pub fn new(player: Arc<AudioPlayer>) -> Self {
        Self {
            player,
            clip: Mutex::new(None),
        }
    }

    /// Install a clip from 16-bit mono PCM at `sample_rate`.
    pub fn load_pcm(&self, pcm: &[i16], sample_rate: u32) -> Result<(), String> {
        let wav = pcm_to_wav(pcm, sample_rate)?;
        self.install(wav)
    }

    fn install(&self, wav: Vec<u8>) -> Result<(), String> {
        let audio = decode(wav.clone()).map_err(|e| e.to_string())?;
        debug!("Narration track: {:.1}s", audio.duration().as_secs_f32());
        self.player.cancel();
        *self.clip.lock().unwrap() = Some(Arc::new(Clip { wav, audio }));
        Ok(())
    }
}

#[async_trait]
impl TrackPlayback for NarrationTrack {
    fn is_loaded(&self) -> bool {
        self.clip.lock().unwrap().is_some()
    }

    fn is_playing(&self) -> bool {
        self.player.is_playing()
    }

    fn is_paused(&self) -> bool {
        self.player.is_paused()
    }

    fn pause(&self) -> bool {
        self.player.pause()
    }

    fn resume(&self) -> bool {
        self.player.resume()
    }

    /// `.pcm` files hold raw 16-bit mono at [`PCM_SAMPLE_RATE`]; anything
    /// else is decoded as an audio file.
    fn load(&self, path: &Path) -> Result<(), String> {
        let bytes = std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pcm")) {
            return self.load_pcm(&pcm_from_le_bytes(&bytes), PCM_SAMPLE_RATE);
        }
        self.install(bytes)
    }

    fn unload(&self) {
        self.player.cancel();
        *self.clip.lock().unwrap() = None;
    }

    fn save(&self, path: &Path) -> Result<(), String> {
        let clip = self
            .clip
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| "No narration track loaded".to_string())?;
        std::fs::write(path, &clip.wav).map_err(|e| format!("Failed to save {}: {e}", path.display()))?;
        info!("Saved narration track to {}", path.display());
        Ok(())
    }

    async fn play_to_end(&self) -> Result<(), SpeechError> {
        let clip = self
            .clip
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SpeechError::Unavailable("no track loaded".into()))?;
        self.player.play(clip.audio.clone(), 1.0).await
    }
}

/// Wrap raw 16-bit mono PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32) -> Result<Vec<u8>, String> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut out = Vec::with_capacity(44 + pcm.len() * 2);
    let mut writer =
        hound::WavWriter::new(Cursor::new(&mut out), spec).map_err(|e| format!("WAV header: {e}"))?;
    for &sample in pcm {
        writer
            .write_sample(sample)
            .map_err(|e| format!("WAV write: {e}"))?;
    }
    writer.finalize().map_err(|e| format!("WAV finalize: {e}"))?;
    Ok(out)
}

/// Little-endian byte stream to samples; a trailing odd byte is dropped.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
