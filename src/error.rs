//! Speech backend errors.

use thiserror::Error;

/// Failure reported by a speech backend or the audio player.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("network: {0}")]
    Network(String),

    #[error("remote endpoint returned status {0}")]
    Http(u16),

    #[error("decode: {0}")]
    Decode(String),

    #[error("playback: {0}")]
    Playback(String),

    #[error("synthesis: {0}")]
    Synthesis(String),

    #[error("utterance interrupted")]
    Interrupted,

    #[error("utterance cancelled")]
    Cancelled,

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl SpeechError {
    /// Interruptions caused by our own stop/advance are not failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Interrupted | Self::Cancelled)
    }
}
