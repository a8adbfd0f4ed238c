//! Runtime configuration.
//!
//! The configuration file is YAML with one section per subsystem. Key names in
//! the depth section match the preset keys users already know:
//!
//! ```yaml
//! depth_buffer_detection:
//!   DepthBufferRetrievalMode: true
//!   DepthBufferClearingNumber: 2
//!   UseAspectRatioHeuristics: true
//! ```
//!
//! A missing file yields the defaults; a malformed one is an error.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RuntimeResult;

/// Depth buffer detection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    /// Alias a snapshot taken at a depth clear instead of the live buffer.
    #[serde(rename = "DepthBufferRetrievalMode")]
    pub preserve_depth_buffers: bool,

    /// 1-based clear index to alias; zero selects the last clear.
    #[serde(rename = "DepthBufferClearingNumber")]
    pub clear_index_override: u32,

    /// Reject candidates whose size does not match the backbuffer.
    #[serde(rename = "UseAspectRatioHeuristics")]
    pub filter_aspect_ratio: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            preserve_depth_buffers: false,
            clear_index_override: 0,
            filter_aspect_ratio: true,
        }
    }
}

impl DepthConfig {
    /// Clear index in effect, or `None` when clears are not preserved.
    ///
    /// Zero is remapped to `u32::MAX`, which selects the last clear.
    pub fn effective_clear_index(&self) -> Option<u32> {
        if !self.preserve_depth_buffers {
            return None;
        }
        Some(match self.clear_index_override {
            0 => u32::MAX,
            index => index,
        })
    }
}

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Depth buffer detection.
    #[serde(rename = "depth_buffer_detection")]
    pub depth: DepthConfig,
}

impl RuntimeConfig {
    /// Loads configuration from a YAML file. A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parses configuration from YAML.
    pub fn from_yaml_str(yaml: &str) -> RuntimeResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serializes configuration to YAML.
    pub fn to_yaml_string(&self) -> RuntimeResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Writes configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> RuntimeResult<()> {
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }
}
