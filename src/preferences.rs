//! Persisted user preferences.
//!
//! Only the preferred instant-reader voice is kept, as JSON at
//! ~/.config/story-reader/preferences.json unless the config overrides it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PreferencesConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PreferenceFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preferred_instant_voice: Option<String>,
}

pub struct Preferences {
    path: Option<PathBuf>,
}

impl Preferences {
    pub fn new(config: &PreferencesConfig) -> Self {
        let path = config
            .path
            .clone()
            .or_else(|| dirs::config_dir().map(|d| d.join("story-reader").join("preferences.json")));
        if path.is_none() {
            warn!("No config directory; voice preference will not be saved");
        }
        Self { path }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stored voice id, if any.
    pub fn load_voice(&self) -> Option<String> {
        let path = self.path.as_ref()?;
        let contents = fs::read_to_string(path).ok()?;
        match serde_json::from_str::<PreferenceFile>(&contents) {
            Ok(file) => file.preferred_instant_voice,
            Err(e) => {
                warn!("Ignoring unreadable preferences {}: {e}", path.display());
                None
            }
        }
    }

    pub fn save_voice(&self, voice_id: &str) {
        let Some(path) = &self.path else { return };
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!("Failed to create preferences dir: {e}");
                return;
            }
        }

        let file = PreferenceFile {
            preferred_instant_voice: Some(voice_id.to_string()),
        };
        match serde_json::to_string_pretty(&file) {
            Ok(json) => match fs::write(path, json) {
                Ok(()) => debug!("Saved preferred voice {voice_id}"),
                Err(e) => warn!("Failed to write preferences {}: {e}", path.display()),
            },
            Err(e) => warn!("Failed to serialize preferences: {e}"),
        }
    }
}
