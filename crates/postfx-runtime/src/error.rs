//! Error types for effect activation and runtime operations.
//!
//! Every creation failure carries the name of the element being created and
//! the parameters it was created with, so that a failed effect can report
//! exactly what went wrong.

use postfx_core::{Format, ModuleError};
use thiserror::Error;

use crate::backend::{DeviceError, SamplerDesc};

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while activating effects or driving the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime has no backbuffer state yet.
    #[error("runtime is not initialized")]
    NotInitialized,

    /// Backbuffer-derived resource creation failed.
    #[error("failed to create {what} for the backbuffer: {source}")]
    BackBuffer {
        /// Object that failed.
        what: &'static str,
        /// Device error.
        #[source]
        source: DeviceError,
    },

    /// Texture creation failed.
    #[error(
        "failed to create texture '{name}' (width = {width}, height = {height}, levels = {levels}, format = {format:?}): {source}"
    )]
    TextureCreation {
        name: String,
        width: u32,
        height: u32,
        levels: u32,
        format: Format,
        #[source]
        source: DeviceError,
    },

    /// Shader view creation failed.
    #[error("failed to create shader resource view for texture '{name}' (format = {format:?}): {source}")]
    ShaderViewCreation {
        name: String,
        format: Format,
        #[source]
        source: DeviceError,
    },

    /// Render target view creation failed.
    #[error("failed to create render target view for texture '{name}' (format = {format:?}): {source}")]
    RenderTargetViewCreation {
        name: String,
        format: Format,
        #[source]
        source: DeviceError,
    },

    /// Sampler state creation failed.
    #[error("failed to create sampler state for sampler '{sampler}' ({desc}): {source}")]
    SamplerCreation {
        sampler: String,
        desc: SamplerDesc,
        #[source]
        source: DeviceError,
    },

    /// Blend state creation failed.
    #[error("failed to create blend state for pass {pass} in technique '{technique}': {source}")]
    BlendStateCreation {
        technique: String,
        pass: usize,
        #[source]
        source: DeviceError,
    },

    /// Depth-stencil state creation failed.
    #[error("failed to create depth-stencil state for pass {pass} in technique '{technique}': {source}")]
    DepthStencilStateCreation {
        technique: String,
        pass: usize,
        #[source]
        source: DeviceError,
    },

    /// Shader object creation failed.
    #[error("failed to create {stage} shader for entry point '{name}': {source}")]
    ShaderCreation {
        name: String,
        stage: &'static str,
        #[source]
        source: DeviceError,
    },

    /// Uniform storage creation failed.
    #[error("failed to create constant buffer for effect '{effect}' ({size} bytes): {source}")]
    ConstantBufferCreation {
        effect: String,
        size: usize,
        #[source]
        source: DeviceError,
    },

    /// Timestamp query creation failed.
    #[error("failed to create timestamp queries for technique '{technique}': {source}")]
    QueryCreation {
        technique: String,
        #[source]
        source: DeviceError,
    },

    /// Sampler binding slot out of range.
    #[error(
        "cannot bind sampler '{name}' since it exceeds the maximum number of allowed sampler slots ({binding}, allowed are up to {limit})"
    )]
    SamplerSlotLimit { name: String, binding: u32, limit: u32 },

    /// Texture binding slot out of range.
    #[error(
        "cannot bind texture '{name}' since it exceeds the maximum number of allowed resource slots ({binding}, allowed are up to {limit})"
    )]
    TextureSlotLimit { name: String, binding: u32, limit: u32 },

    /// Texture not present in the runtime texture table.
    #[error("texture '{name}' is not loaded")]
    UnknownTexture { name: String },

    /// Pass names an entry point the effect does not provide.
    #[error("pass {pass} in technique '{technique}' uses unknown entry point '{name}'")]
    UnknownEntryPoint {
        technique: String,
        pass: usize,
        name: String,
    },

    /// Pass renders to a texture that is not loaded.
    #[error("pass {pass} in technique '{technique}' renders to unknown texture '{name}'")]
    UnknownRenderTarget {
        technique: String,
        pass: usize,
        name: String,
    },

    /// Pass renders to a backbuffer or depth buffer alias.
    #[error("pass {pass} in technique '{technique}' cannot render to reference texture '{name}'")]
    InvalidRenderTarget {
        technique: String,
        pass: usize,
        name: String,
    },

    /// CPU upload requested for a format without an upload path.
    #[error("texture upload is not supported for format {format:?} (texture '{name}')")]
    UnsupportedUploadFormat { name: String, format: Format },

    /// CPU upload data has the wrong size.
    #[error("texture upload for '{name}' expects {expected} bytes, got {actual}")]
    UploadSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// Write attempted on a backbuffer or depth buffer alias.
    #[error("texture '{name}' references another resource and cannot be written")]
    ReferenceTexture { name: String },

    /// Effect index out of range.
    #[error("effect index {0} is out of range")]
    InvalidEffect(usize),

    /// Uniform write outside the uniform storage.
    #[error("uniform write of {len} bytes at offset {offset} exceeds storage of {size} bytes")]
    UniformOutOfRange { offset: usize, len: usize, size: usize },

    /// Invalid module description.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// I/O error reading or writing configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
