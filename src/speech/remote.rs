//! Remote TTS: one GET per sentence against a translate-style endpoint.
//!
//! The endpoint takes the text in the query string, so it is only usable
//! for short sentences; routing long ones elsewhere is the caller's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::{BackendKind, SpeechBackend, Utterance};
use crate::config::RemoteConfig;
use crate::error::SpeechError;
use crate::player::AudioPlayer;

pub struct RemoteTts {
    client: Client,
    endpoint: String,
    player: Arc<AudioPlayer>,
}

impl RemoteTts {
    pub fn new(config: &RemoteConfig, player: Arc<AudioPlayer>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            player,
        })
    }

    async fn fetch(&self, utterance: &Utterance) -> Result<Vec<u8>, SpeechError> {
        let url = request_url(&self.endpoint, utterance)?;
        debug!("Fetching remote speech ({} chars)", utterance.text.chars().count());

        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SpeechError::Network("request timed out".into())
            } else {
                SpeechError::Network(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(SpeechError::Http(resp.status().as_u16()));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SpeechError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Build the per-sentence request URL.
pub fn request_url(endpoint: &str, utterance: &Utterance) -> Result<Url, SpeechError> {
    Url::parse_with_params(
        endpoint,
        &[
            ("ie", "UTF-8"),
            ("client", "tw-ob"),
            ("tl", utterance.language_tag.as_str()),
            ("q", utterance.text.as_str()),
        ],
    )
    .map_err(|e| SpeechError::Unavailable(format!("bad endpoint {endpoint}: {e}")))
}

#[async_trait]
impl SpeechBackend for RemoteTts {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteOnline
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), SpeechError> {
        let bytes = self.fetch(utterance).await?;
        self.player.play_bytes(bytes, utterance.rate).await
    }

    fn cancel(&self) {
        self.player.cancel();
    }
}
