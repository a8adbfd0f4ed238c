//! # postfx-core
//!
//! Data model of a compiled effect module, as handed to the runtime by the
//! external effect compiler.
//!
//! This crate provides the foundational types used throughout postfx:
//!
//! - [`EffectModule`] - Entry points, texture/sampler declarations, techniques
//! - [`TechniqueInfo`], [`PassInfo`] - Per-pass render target, blend and stencil declarations
//! - [`TextureFormat`], [`Format`] - Effect texture formats and device formats
//!
//! ## Crate Structure
//!
//! ```text
//! postfx-core (this crate)
//!    ^
//!    |
//!    +-- postfx-runtime (effect execution engine)
//!    +-- postfx-cli (offline runner)
//! ```
//!
//! Shader source authoring and compilation are out of scope: an
//! [`EffectModule`] already carries compiled bytecode for every entry point.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod module;
pub mod pass;

pub use error::{ModuleError, ModuleResult};
pub use format::{Format, TextureFormat};
pub use module::{
    AddressMode, EffectModule, EntryPoint, FilterMode, SamplerInfo, ShaderStage, TechniqueInfo,
    TextureInfo, TextureReference,
};
pub use pass::{BlendFactor, BlendOp, ComparisonFunc, PassInfo, StencilOp, MAX_RENDER_TARGETS};
