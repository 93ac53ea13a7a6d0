//! On-device voice discovery.
//!
//! Engines may report their voice list late or in pieces, so discovery
//! queries once up front, polls on a short interval for a bounded window,
//! and re-queries whenever the engine says its list changed.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::VoiceDescriptor;
use crate::config::DiscoveryConfig;
use crate::speech::{BackendKind, PlatformVoice, VoiceSource};

static VENDOR_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("Desktop|Microsoft|Google|Apple").expect("vendor pattern is valid"));

/// A discovered voice together with the engine's raw name.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredVoice {
    pub platform_name: String,
    pub descriptor: VoiceDescriptor,
}

/// Human label for a platform voice name.
pub fn friendly_label(name: &str) -> String {
    let lower = name.to_lowercase();
    if lower.contains("hoai my") {
        "Máy: Microsoft Hoài My (Windows - Nữ)".into()
    } else if lower.contains("nam minh") {
        "Máy: Microsoft Nam Minh (Windows - Nam)".into()
    } else if lower.contains("linh") {
        "Máy: Linh (Apple - Nữ)".into()
    } else if lower.contains("dung") {
        "Máy: Dung (Samsung - Nữ)".into()
    } else if lower.contains("google") && lower.contains("vietnam") {
        "Máy: Google Tiếng Việt (Offline)".into()
    } else {
        format!("Máy: {}", VENDOR_NOISE.replace_all(name, "").trim())
    }
}

fn matches_language(tag: &str, language: &str) -> bool {
    let tag = tag.to_lowercase();
    tag.contains(&language.to_lowercase()) || tag == "vi-vn"
}

/// Query `source` once and describe every voice in `language`.
///
/// A failing query is not an error: it just means no on-device voices.
pub async fn discover(source: &dyn VoiceSource, language: &str) -> Vec<DiscoveredVoice> {
    let voices = match source.voices().await {
        Ok(voices) => voices,
        Err(e) => {
            warn!("On-device voice query failed: {e}");
            return Vec::new();
        }
    };

    voices
        .into_iter()
        .filter(|v| matches_language(&v.language_tag, language))
        .map(describe)
        .collect()
}

fn describe(voice: PlatformVoice) -> DiscoveredVoice {
    DiscoveredVoice {
        descriptor: VoiceDescriptor {
            id: voice.voice_ref.clone(),
            display_name: friendly_label(&voice.name),
            backend: BackendKind::OnDevice,
            language_tag: voice.language_tag,
            speed: 1.0,
            device_voice_ref: Some(voice.voice_ref),
        },
        platform_name: voice.name,
    }
}

/// Background discovery with a bounded polling window.
pub struct VoiceDiscovery {
    source: Arc<dyn VoiceSource>,
    language: String,
    poll_interval: Duration,
    poll_window: Duration,
}

impl VoiceDiscovery {
    pub fn new(source: Arc<dyn VoiceSource>, language: &str, config: &DiscoveryConfig) -> Self {
        Self {
            source,
            language: language.to_string(),
            poll_interval: config.poll_interval(),
            poll_window: config.poll_window(),
        }
    }

    /// Run until polling is over and the change channel (if any) is
    /// closed, or until `tx` is dropped. Only lists that differ from the
    /// previous one are sent.
    pub async fn run(self, tx: mpsc::Sender<Vec<DiscoveredVoice>>) {
        let mut changed = self.source.voices_changed();
        let start = Instant::now();
        let deadline = start + self.poll_window;
        let mut ticker = tokio::time::interval_at(start + self.poll_interval, self.poll_interval);
        let mut polling = true;
        let mut last: Option<Vec<DiscoveredVoice>> = None;

        if !self.query(&tx, &mut last).await {
            return;
        }

        loop {
            if !polling && changed.is_none() {
                debug!("Voice discovery finished");
                return;
            }

            let wake = tokio::select! {
                _ = ticker.tick(), if polling => Wake::Tick,
                res = next_change(&mut changed) => Wake::Changed(res),
                _ = tx.closed() => return,
            };

            match wake {
                Wake::Tick if Instant::now() >= deadline => {
                    debug!("Voice polling window elapsed");
                    polling = false;
                    continue;
                }
                Wake::Tick => {}
                Wake::Changed(Err(broadcast::error::RecvError::Closed)) => {
                    changed = None;
                    continue;
                }
                Wake::Changed(_) => debug!("Platform reported voice list change"),
            }

            if !self.query(&tx, &mut last).await {
                return;
            }
        }
    }

    /// Returns false once the receiver is gone.
    async fn query(
        &self,
        tx: &mpsc::Sender<Vec<DiscoveredVoice>>,
        last: &mut Option<Vec<DiscoveredVoice>>,
    ) -> bool {
        let voices = discover(self.source.as_ref(), &self.language).await;
        if last.as_ref() == Some(&voices) {
            return true;
        }
        info!("Discovered {} on-device voice(s)", voices.len());
        *last = Some(voices.clone());
        tx.send(voices).await.is_ok()
    }
}

enum Wake {
    Tick,
    Changed(Result<(), broadcast::error::RecvError>),
}

async fn next_change(rx: &mut Option<broadcast::Receiver<()>>) -> Result<(), broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
