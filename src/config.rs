use std::path::Path;

use crate::{
    compute::KernelProgram,
    foundation::{
        core::{DEFAULT_HEIGHT, DEFAULT_WIDTH},
        error::{SnowError, SnowResult},
    },
};

/// Largest edge accepted for the surface; matches the common 2D texture limit.
pub const MAX_EDGE: u32 = 8192;

/// Session configuration. Every field has a default, so an empty JSON
/// object (or no file at all) reproduces the stock full-screen snow.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
    pub fullscreen: bool,
    pub kernel: KernelProgram,
    /// Stop after this many frames instead of waiting for a key press.
    pub max_frames: Option<u64>,
}

impl Default for SnowConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            title: "Snow".to_string(),
            fullscreen: true,
            kernel: KernelProgram::Snow,
            max_frames: None,
        }
    }
}

impl SnowConfig {
    pub fn from_json_str(s: &str) -> SnowResult<Self> {
        let cfg: Self = serde_json::from_str(s)
            .map_err(|e| SnowError::config(format!("parse config JSON: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> SnowResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SnowError::config(format!("read '{}': {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> SnowResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SnowError::config("width and height must be > 0"));
        }
        if self.width > MAX_EDGE || self.height > MAX_EDGE {
            return Err(SnowError::config(format!(
                "surface {}x{} exceeds the {MAX_EDGE}px edge limit",
                self.width, self.height
            )));
        }
        if self.title.trim().is_empty() {
            return Err(SnowError::config("title must not be empty"));
        }
        Ok(())
    }
}
