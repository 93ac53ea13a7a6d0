//! Story library loaded from YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Category {
    Vietnam,
    Greek,
    Denmark,
    Germany,
    Norway,
    Russia,
    France,
    Romania,
    Czech,
    China,
    World,
    #[default]
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&format!("{self:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moral: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default)]
    pub category: Category,
    /// Pre-generated narration (WAV), relative to the library file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct StoryLibrary {
    stories: Vec<Story>,
}

impl StoryLibrary {
    pub fn new(stories: Vec<Story>) -> Self {
        Self { stories }
    }

    /// Read a YAML list of stories. Relative audio paths are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let mut library = Self::parse(&contents)
            .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;

        if let Some(base) = path.parent() {
            for story in &mut library.stories {
                if let Some(audio) = story.audio.as_mut().filter(|a| a.is_relative()) {
                    *audio = base.join(&*audio);
                }
            }
        }
        info!("Loaded {} stories from {}", library.stories.len(), path.display());
        Ok(library)
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        let stories: Vec<Story> = serde_yml::from_str(contents).map_err(|e| e.to_string())?;
        Ok(Self { stories })
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn find(&self, id: &str) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == id)
    }

    /// Stories in `category` (all when `None`) whose title contains
    /// `search`, ignoring case.
    pub fn filter(&self, category: Option<Category>, search: &str) -> Vec<&Story> {
        let needle = search.trim().to_lowercase();
        self.stories
            .iter()
            .filter(|s| category.is_none_or(|c| s.category == c))
            .filter(|s| needle.is_empty() || s.title.to_lowercase().contains(&needle))
            .collect()
    }
}
