//! Narration voices: fixed remote presets plus discovered on-device voices.

pub mod discovery;

use serde::Serialize;

use crate::speech::BackendKind;

/// A selectable narration identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceDescriptor {
    pub id: String,
    pub display_name: String,
    pub backend: BackendKind,
    pub language_tag: String,
    pub speed: f32,
    /// Stable platform identifier, only for on-device voices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_voice_ref: Option<String>,
}

impl VoiceDescriptor {
    fn remote(id: &str, display_name: &str, speed: f32) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            backend: BackendKind::RemoteOnline,
            language_tag: "vi".into(),
            speed,
            device_voice_ref: None,
        }
    }
}

/// Id of the preset used when nothing else is selected.
pub const DEFAULT_VOICE_ID: &str = "google-normal";

/// Remote voices that need no platform query. The first one is the default.
pub fn presets() -> Vec<VoiceDescriptor> {
    vec![
        VoiceDescriptor::remote(DEFAULT_VOICE_ID, "Google: Chị Google (Chuẩn)", 1.0),
        VoiceDescriptor::remote("google-slow", "Google: Kể Chuyện (Chậm rãi)", 0.85),
        VoiceDescriptor::remote("google-fast", "Google: Vui Vẻ (Nhanh)", 1.15),
    ]
}

/// Merge presets and discovered voices: unique ids, presets first and
/// winning any id clash.
pub fn merge(presets: &[VoiceDescriptor], discovered: &[VoiceDescriptor]) -> Vec<VoiceDescriptor> {
    let mut merged: Vec<VoiceDescriptor> = Vec::with_capacity(presets.len() + discovered.len());
    for voice in presets.iter().chain(discovered) {
        if !merged.iter().any(|v| v.id == voice.id) {
            merged.push(voice.clone());
        }
    }
    merged
}

/// Names the on-device fallback prefers when a remote voice fails.
const PREFERRED_FALLBACK_NAMES: [&str; 2] = ["Google Tiếng Việt", "Google Vietnamese"];

/// The set of voices the user can pick from.
#[derive(Debug, Clone)]
pub struct VoiceRegistry {
    presets: Vec<VoiceDescriptor>,
    /// Discovered voices with the engine's raw names, for fallback matching.
    discovered: Vec<(String, VoiceDescriptor)>,
    voices: Vec<VoiceDescriptor>,
}

impl Default for VoiceRegistry {
    fn default() -> Self {
        Self::new(presets())
    }
}

impl VoiceRegistry {
    pub fn new(presets: Vec<VoiceDescriptor>) -> Self {
        let voices = merge(&presets, &[]);
        Self {
            presets,
            discovered: Vec::new(),
            voices,
        }
    }

    pub fn voices(&self) -> &[VoiceDescriptor] {
        &self.voices
    }

    /// Replace the discovered set. Returns true if the visible list changed.
    pub fn refresh(&mut self, discovered: Vec<discovery::DiscoveredVoice>) -> bool {
        let descriptors: Vec<VoiceDescriptor> =
            discovered.iter().map(|d| d.descriptor.clone()).collect();
        let merged = merge(&self.presets, &descriptors);
        self.discovered = discovered
            .into_iter()
            .map(|d| (d.platform_name, d.descriptor))
            .collect();

        if merged == self.voices {
            return false;
        }
        self.voices = merged;
        true
    }

    pub fn find(&self, id: &str) -> Option<&VoiceDescriptor> {
        self.voices.iter().find(|v| v.id == id)
    }

    /// The voice for `id`, or the first voice when `id` is unknown (e.g. a
    /// saved on-device voice that has not been discovered yet).
    pub fn resolve(&self, id: &str) -> Option<&VoiceDescriptor> {
        self.find(id).or_else(|| self.voices.first())
    }

    /// Platform voice used when a remote voice has to fall back on-device.
    pub fn device_fallback(&self) -> Option<String> {
        self.discovered
            .iter()
            .find(|(name, _)| PREFERRED_FALLBACK_NAMES.contains(&name.as_str()))
            .or_else(|| self.discovered.first())
            .and_then(|(_, d)| d.device_voice_ref.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::discovery::DiscoveredVoice;
    use super::*;

    fn device(id: &str, name: &str) -> DiscoveredVoice {
        DiscoveredVoice {
            platform_name: name.into(),
            descriptor: VoiceDescriptor {
                id: id.into(),
                display_name: format!("Máy: {name}"),
                backend: BackendKind::OnDevice,
                language_tag: "vi-VN".into(),
                speed: 1.0,
                device_voice_ref: Some(id.into()),
            },
        }
    }

    #[test]
    fn presets_have_a_remote_default_first() {
        let presets = presets();
        assert_eq!(presets[0].id, DEFAULT_VOICE_ID);
        assert!(presets.iter().all(|p| p.backend == BackendKind::RemoteOnline));
        assert!(presets.iter().all(|p| p.device_voice_ref.is_none()));
    }

    #[test]
    fn merge_keeps_the_preset_on_id_clash() {
        let presets = presets();
        let mut clash = device("google-slow", "Impostor").descriptor;
        clash.speed = 2.0;
        let other = device("roa/vi", "Vietnamese_Northern").descriptor;

        let merged = merge(&presets, &[clash, other.clone()]);

        let slow: Vec<_> = merged.iter().filter(|v| v.id == "google-slow").collect();
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0], &presets[1]);
        assert_eq!(merged.len(), presets.len() + 1);
        assert_eq!(&merged[..presets.len()], &presets[..]);
        assert_eq!(merged.last(), Some(&other));
    }

    #[test]
    fn merge_dedupes_within_discovered() {
        let a = device("roa/vi", "A").descriptor;
        let b = device("roa/vi", "B").descriptor;
        let merged = merge(&[], &[a.clone(), b]);
        assert_eq!(merged, vec![a]);
    }

    #[test]
    fn refresh_is_idempotent() {
        let mut registry = VoiceRegistry::default();
        assert!(registry.refresh(vec![device("roa/vi", "Vietnamese_Northern")]));
        assert!(!registry.refresh(vec![device("roa/vi", "Vietnamese_Northern")]));
        assert_eq!(registry.voices().len(), 4);

        assert!(registry.refresh(Vec::new()));
        assert_eq!(registry.voices().len(), 3);
    }

    #[test]
    fn resolve_falls_back_to_first_voice() {
        let registry = VoiceRegistry::default();
        assert_eq!(registry.resolve("google-fast").unwrap().id, "google-fast");
        assert_eq!(registry.resolve("not-discovered-yet").unwrap().id, DEFAULT_VOICE_ID);
        assert!(VoiceRegistry::new(Vec::new()).resolve("anything").is_none());
    }

    #[test]
    fn device_fallback_prefers_google_vietnamese() {
        let mut registry = VoiceRegistry::default();
        assert_eq!(registry.device_fallback(), None);

        registry.refresh(vec![
            device("roa/vi", "Vietnamese_Northern"),
            device("google-vi", "Google Tiếng Việt"),
        ]);
        assert_eq!(registry.device_fallback().as_deref(), Some("google-vi"));

        registry.refresh(vec![device("roa/vi", "Vietnamese_Northern")]);
        assert_eq!(registry.device_fallback().as_deref(), Some("roa/vi"));
    }
}
