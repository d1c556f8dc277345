//! Player configuration, loadable from a TOML file.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// ALSA playback device name (e.g. "default", "plughw:0,0")
    pub device: String,
    /// Desired ALSA period size in frames (0 = let ALSA decide)
    pub period_size: usize,
    /// Run the Speex perceptual enhancer during decode
    pub enhanced_decode: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            device: "default".to_string(),
            period_size: 0,
            enhanced_decode: true,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}
