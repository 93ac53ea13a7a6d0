//! On-device synthesis through the espeak-ng binary.
//!
//! `espeak-ng --voices` lists installed voices; `espeak-ng --stdout`
//! renders WAV which we play ourselves so the analyser can see it.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{BackendKind, PlatformVoice, SpeechBackend, Utterance, VoiceSource};
use crate::config::DeviceConfig;
use crate::error::SpeechError;
use crate::player::AudioPlayer;

const MIN_WPM: u32 = 80;
const MAX_WPM: u32 = 450;

pub struct EspeakSynth {
    binary: String,
    base_wpm: u32,
    player: Arc<AudioPlayer>,
}

impl EspeakSynth {
    pub fn new(config: &DeviceConfig, player: Arc<AudioPlayer>) -> Self {
        Self {
            binary: config.espeak_binary.clone(),
            base_wpm: config.base_wpm,
            player,
        }
    }

    async fn render(&self, utterance: &Utterance) -> Result<Vec<u8>, SpeechError> {
        let voice = utterance
            .voice_ref
            .as_deref()
            .unwrap_or(utterance.language_tag.as_str());
        let wpm = words_per_minute(self.base_wpm, utterance.rate).to_string();
        debug!("espeak-ng: voice={voice} wpm={wpm}");

        let mut child = Command::new(&self.binary)
            .args(["--stdout", "--stdin", "-v", voice, "-s", wpm.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(utterance.text.as_bytes())
                .await
                .map_err(|e| SpeechError::Synthesis(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SpeechError::Synthesis(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpeechError::Synthesis(format!(
                "espeak-ng exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(SpeechError::Synthesis("espeak-ng produced no audio".into()));
        }
        Ok(output.stdout)
    }
}

fn words_per_minute(base: u32, rate: f32) -> u32 {
    ((base as f32 * rate).round() as u32).clamp(MIN_WPM, MAX_WPM)
}

/// Parse the table printed by `espeak-ng --voices`.
pub fn parse_voice_table(table: &str) -> Vec<PlatformVoice> {
    table
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                [_pty, language, _age_gender, name, file, ..] => Some(PlatformVoice {
                    name: (*name).to_string(),
                    language_tag: (*language).to_string(),
                    voice_ref: (*file).to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}

#[async_trait]
impl SpeechBackend for EspeakSynth {
    fn kind(&self) -> BackendKind {
        BackendKind::OnDevice
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        let wav = self.render(utterance).await?;
        // Rate is already applied by espeak-ng.
        self.player.play_bytes(wav, 1.0).await
    }

    fn cancel(&self) {
        self.player.cancel();
    }
}

/// Voice listing from the same binary; needs no audio output.
pub struct EspeakVoices {
    binary: String,
}

impl EspeakVoices {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            binary: config.espeak_binary.clone(),
        }
    }
}

#[async_trait]
impl VoiceSource for EspeakVoices {
    async fn voices(&self) -> Result<Vec<PlatformVoice>, SpeechError> {
        let output = Command::new(&self.binary)
            .arg("--voices")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(SpeechError::Unavailable(format!(
                "espeak-ng --voices exited with {}",
                output.status
            )));
        }
        Ok(parse_voice_table(&String::from_utf8_lossy(&output.stdout)))
    }
}
