//! Speech backends.
//!
//! Two interchangeable ways of turning one sentence into sound:
//! - `remote`: per-sentence audio fetched from a TTS URL endpoint
//! - `espeak`: local synthesis through the espeak-ng binary
//!
//! Both play through an [`AudioPlayer`](crate::player::AudioPlayer) so the
//! visualizer sees their output.

pub mod espeak;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SpeechError;

/// Which engine speaks a sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    RemoteOnline,
    OnDevice,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteOnline => f.pad("remote"),
            Self::OnDevice => f.pad("on-device"),
        }
    }
}

/// One synthesis request.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub language_tag: String,
    pub rate: f32,
    /// Exact platform voice to use; the engine default for the language when absent.
    pub voice_ref: Option<String>,
}

/// A voice as the on-device engine reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformVoice {
    pub name: String,
    pub language_tag: String,
    pub voice_ref: String,
}

/// Speaks one utterance at a time. `speak` resolves when the audio has
/// finished playing.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError>;

    /// Stop the in-flight utterance. The pending `speak` resolves with
    /// [`SpeechError::Interrupted`] if it resolves at all.
    fn cancel(&self);
}

/// Source of on-device voices.
#[async_trait]
pub trait VoiceSource: Send + Sync {
    async fn voices(&self) -> Result<Vec<PlatformVoice>, SpeechError>;

    /// Notification fired when the platform's voice list changes, if the
    /// platform offers one.
    fn voices_changed(&self) -> Option<broadcast::Receiver<()>> {
        None
    }
}
