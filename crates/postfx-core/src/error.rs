//! Error types for effect module loading and validation.
//!
//! This module provides error handling for:
//! - Module description files (YAML)
//! - Structural validation of entry points, techniques and passes

use std::path::PathBuf;
use thiserror::Error;

/// Result type for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Errors that can occur while loading or validating an [`crate::EffectModule`].
#[derive(Debug, Error)]
pub enum ModuleError {
    /// I/O error reading a module description.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Module description file not found.
    #[error("module file not found: {path}")]
    NotFound {
        /// Path that was searched.
        path: PathBuf,
    },

    /// Two entry points share one name.
    #[error("duplicate entry point '{name}'")]
    DuplicateEntryPoint {
        /// Entry point name.
        name: String,
    },

    /// A pass refers to an entry point that is missing or has the wrong stage.
    #[error("pass {pass} in technique '{technique}' refers to unknown {stage} entry point '{name}'")]
    UnknownEntryPoint {
        /// Technique name.
        technique: String,
        /// Pass index within the technique.
        pass: usize,
        /// Expected stage ("vertex" or "pixel").
        stage: &'static str,
        /// Entry point name.
        name: String,
    },

    /// A pass names more render targets than the device can bind.
    #[error("pass {pass} in technique '{technique}' names {count} render targets (limit {limit})")]
    TooManyRenderTargets {
        /// Technique name.
        technique: String,
        /// Pass index within the technique.
        pass: usize,
        /// Number of names declared.
        count: usize,
        /// Maximum simultaneous render targets.
        limit: usize,
    },

    /// A sampler refers to a texture the module does not declare.
    #[error("sampler '{sampler}' refers to unknown texture '{texture}'")]
    UnknownTexture {
        /// Sampler name.
        sampler: String,
        /// Texture name.
        texture: String,
    },
}
