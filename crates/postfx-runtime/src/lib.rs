//! # postfx-runtime
//!
//! Post-processing effect execution engine. Takes compiled effect modules
//! from [`postfx_core`], turns their techniques into device objects and pass
//! records, and runs them every presented frame over a [`GpuDevice`].
//!
//! ## Components
//!
//! - [`materialize`] - Device objects for effect-owned textures, CPU uploads
//! - [`state_cache`] - Content-hashed sampler, blend and depth-stencil states
//! - [`pass_builder`] - Effect activation into [`PassRecord`]s
//! - [`hazard`] - Read/write hazard removal on pass bindings
//! - [`executor`] - Per-present frame execution
//! - [`timer`] - Non-blocking GPU timestamp measurement
//! - [`depth`] - Scene depth buffer tracking and selection
//!
//! ## Example
//!
//! ```rust
//! use postfx_core::Format;
//! use postfx_runtime::{DepthTracker, EffectRuntime, RuntimeConfig, SoftwareDevice, SwapchainDesc};
//!
//! let mut device = SoftwareDevice::new();
//! let backbuffer = device.create_backbuffer(1280, 720, Format::Rgba8Unorm, 1).unwrap();
//!
//! let mut runtime = EffectRuntime::new(device, RuntimeConfig::default());
//! runtime
//!     .init(&SwapchainDesc {
//!         backbuffer,
//!         width: 1280,
//!         height: 720,
//!         format: Format::Rgba8Unorm,
//!         sample_count: 1,
//!     })
//!     .unwrap();
//! runtime.present(&DepthTracker::new());
//! assert!(runtime.depth_texture().is_none());
//! ```

pub mod backend;
pub mod config;
pub mod depth;
pub mod error;
pub mod executor;
pub mod hazard;
pub mod materialize;
pub mod pass_builder;
pub mod runtime;
pub mod state_cache;
pub mod timer;

pub use backend::{GpuDevice, ResourceId, SoftwareDevice, SoftwareDeviceConfig};
pub use config::{DepthConfig, RuntimeConfig};
pub use depth::{DepthCandidate, DepthSelection, DepthSelector, DepthTracker, DrawStats};
pub use error::{RuntimeError, RuntimeResult};
pub use hazard::ViewSlot;
pub use pass_builder::{PassRecord, TechniqueState};
pub use runtime::{Effect, EffectRuntime, SwapchainDesc, Technique, Texture};
pub use state_cache::{StateCache, StateObjects};
pub use timer::{GpuTimer, MovingAverage};
