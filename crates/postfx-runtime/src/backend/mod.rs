//! Graphics device abstraction.
//!
//! Provides the [`GpuDevice`] trait the effect runtime drives, the handle and
//! descriptor types it exchanges with a device, and a CPU reference device.
//!
//! # Architecture
//!
//! ```text
//! EffectRuntime<D: GpuDevice>
//!     +-- SoftwareDevice (CPU reference, command log)
//!     +-- (host graphics API adapters)
//! ```
//!
//! Object creation is fallible and reports a [`DeviceError`]. Commands are
//! fire-and-forget: once a frame is executing there is no error channel, a
//! malformed command simply renders incorrectly. Query readback never blocks.

mod software;

pub use software::{Command, SoftwareDevice, SoftwareDeviceConfig};

use std::fmt;

use postfx_core::{AddressMode, BlendFactor, BlendOp, ComparisonFunc, FilterMode, Format, ShaderStage, StencilOp};
use thiserror::Error;

/// Maximum sampler slots per stage.
pub const MAX_SAMPLER_SLOTS: u32 = 16;

/// Maximum shader resource slots per stage.
pub const MAX_TEXTURE_SLOTS: u32 = 128;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

device_handle!(
    /// Physical GPU resource identity.
    ResourceId
);
device_handle!(
    /// Shader-readable view of a resource.
    ShaderView
);
device_handle!(
    /// Render target view of a resource.
    RenderTargetView
);
device_handle!(
    /// Depth-stencil view of a resource.
    DepthStencilView
);
device_handle!(
    /// Immutable sampler state.
    SamplerState
);
device_handle!(
    /// Immutable blend state.
    BlendState
);
device_handle!(
    /// Immutable depth-stencil state.
    DepthStencilState
);
device_handle!(
    /// Shader object created from compiled bytecode.
    Shader
);
device_handle!(
    /// Constant buffer.
    Buffer
);
device_handle!(
    /// Asynchronous query.
    Query
);

/// Kind of device object, used for diagnostics and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Texture,
    ShaderView,
    RenderTargetView,
    DepthStencilView,
    Sampler,
    BlendState,
    DepthStencilState,
    Shader,
    Buffer,
    Query,
}

impl ObjectKind {
    /// Lowercase object name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Texture => "texture",
            Self::ShaderView => "shader resource view",
            Self::RenderTargetView => "render target view",
            Self::DepthStencilView => "depth-stencil view",
            Self::Sampler => "sampler state",
            Self::BlendState => "blend state",
            Self::DepthStencilState => "depth-stencil state",
            Self::Shader => "shader",
            Self::Buffer => "buffer",
            Self::Query => "query",
        }
    }
}

/// Any device object, for [`GpuDevice::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceObject {
    Texture(ResourceId),
    ShaderView(ShaderView),
    RenderTargetView(RenderTargetView),
    DepthStencilView(DepthStencilView),
    Sampler(SamplerState),
    BlendState(BlendState),
    DepthStencilState(DepthStencilState),
    Shader(Shader),
    Buffer(Buffer),
    Query(Query),
}

/// Device-level object creation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of memory creating {0}")]
    OutOfMemory(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown handle passed to {0}")]
    InvalidHandle(&'static str),
}

/// Result type for device object creation.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// How a texture may be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureUsage {
    pub shader_resource: bool,
    pub render_target: bool,
    pub depth_stencil: bool,
    /// Mip chain may be regenerated on the device.
    pub generate_mips: bool,
}

impl TextureUsage {
    /// Shader-readable only.
    pub const SHADER_RESOURCE: Self = Self {
        shader_resource: true,
        render_target: false,
        depth_stencil: false,
        generate_mips: false,
    };

    /// Render target only.
    pub const RENDER_TARGET: Self = Self {
        shader_resource: false,
        render_target: true,
        depth_stencil: false,
        generate_mips: false,
    };

    /// Readable render target with mip regeneration (effect textures).
    pub const EFFECT_TEXTURE: Self = Self {
        shader_resource: true,
        render_target: true,
        depth_stencil: false,
        generate_mips: true,
    };

    /// Depth-stencil only.
    pub const DEPTH_STENCIL: Self = Self {
        shader_resource: false,
        render_target: false,
        depth_stencil: true,
        generate_mips: false,
    };
}

/// 2D texture description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Mip level count; zero requests a full chain.
    pub levels: u32,
    pub format: Format,
    pub sample_count: u32,
    pub usage: TextureUsage,
}

impl TextureDesc {
    /// Single-sampled texture with one mip level.
    pub fn new(width: u32, height: u32, format: Format, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            levels: 1,
            format,
            sample_count: 1,
            usage,
        }
    }

    /// Number of levels in a full mip chain for this size.
    pub fn full_mip_count(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

/// Sampler state description.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub comparison: ComparisonFunc,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: FilterMode::MinMagMipPoint,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            comparison: ComparisonFunc::Never,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

impl fmt::Display for SamplerDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Filter = {:#x}, AddressU = {}, AddressV = {}, AddressW = {}, MipLODBias = {}, MinLOD = {}, MaxLOD = {}",
            self.filter.code(),
            self.address_u.code(),
            self.address_v.code(),
            self.address_w.code(),
            self.mip_lod_bias,
            self.min_lod,
            self.max_lod
        )
    }
}

/// Blend state description with per-attachment enable and write mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub blend_enable: [bool; postfx_core::MAX_RENDER_TARGETS],
    pub src_blend: BlendFactor,
    pub dest_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_op_alpha: BlendOp,
    pub render_target_write_mask: [u8; postfx_core::MAX_RENDER_TARGETS],
}

/// Stencil operations for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StencilFaceDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunc,
}

/// Depth-stencil state description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front_face: StencilFaceDesc,
    pub back_face: StencilFaceDesc,
}

/// Query type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Single GPU timestamp, written at `end_query`.
    Timestamp,
    /// Interval reporting the timestamp frequency and whether the clock
    /// domain was interrupted between `begin_query` and `end_query`.
    TimestampDisjoint,
}

/// Result of a completed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryData {
    Timestamp(u64),
    Disjoint { frequency: u64, disjoint: bool },
}

/// A graphics device the effect runtime can drive.
///
/// All calls are issued from a single thread. Command methods record work on
/// the device's submission stream and return immediately.
pub trait GpuDevice {
    /// Device name.
    fn name(&self) -> &'static str;

    // === Object creation ===

    fn create_texture(&mut self, desc: &TextureDesc) -> DeviceResult<ResourceId>;

    /// Shader view over `levels` mip levels, reinterpreting texels as `format`.
    fn create_shader_view(&mut self, resource: ResourceId, format: Format, levels: u32) -> DeviceResult<ShaderView>;

    fn create_render_target_view(&mut self, resource: ResourceId, format: Format) -> DeviceResult<RenderTargetView>;

    fn create_depth_stencil_view(&mut self, resource: ResourceId) -> DeviceResult<DepthStencilView>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> DeviceResult<SamplerState>;

    fn create_blend_state(&mut self, desc: &BlendDesc) -> DeviceResult<BlendState>;

    fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc) -> DeviceResult<DepthStencilState>;

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> DeviceResult<Shader>;

    fn create_constant_buffer(&mut self, size: usize) -> DeviceResult<Buffer>;

    fn create_query(&mut self, kind: QueryKind) -> DeviceResult<Query>;

    /// Releases an object. Views keep their resource alive on real devices;
    /// callers release views before resources.
    fn release(&mut self, object: DeviceObject);

    // === Introspection ===

    fn texture_desc(&self, resource: ResourceId) -> Option<TextureDesc>;

    /// Physical resource behind a shader view.
    fn shader_view_resource(&self, view: ShaderView) -> Option<ResourceId>;

    /// Physical resource behind a render target view.
    fn render_target_resource(&self, view: RenderTargetView) -> Option<ResourceId>;

    // === Commands ===

    /// Replaces mip level 0 with tightly packed rows of `row_pitch` bytes.
    fn update_texture(&mut self, resource: ResourceId, data: &[u8], row_pitch: usize);

    /// Discards the buffer contents and writes `data`.
    fn update_constant_buffer(&mut self, buffer: Buffer, data: &[u8]);

    fn generate_mips(&mut self, view: ShaderView);

    fn copy_resource(&mut self, dst: ResourceId, src: ResourceId);

    /// Resolves a multisampled resource into a single-sampled one.
    fn resolve_subresource(&mut self, dst: ResourceId, src: ResourceId, format: Format);

    fn clear_render_target(&mut self, view: RenderTargetView, color: [f32; 4]);

    fn clear_stencil(&mut self, view: DepthStencilView, value: u8);

    fn set_shaders(&mut self, vertex: Shader, pixel: Shader);

    /// Binds samplers to both stages starting at slot 0.
    fn set_samplers(&mut self, samplers: &[Option<SamplerState>]);

    /// Binds shader views to both stages starting at slot 0.
    fn set_shader_resources(&mut self, views: &[Option<ShaderView>]);

    /// Binds a constant buffer to slot 0 of both stages.
    fn set_constant_buffer(&mut self, buffer: Option<Buffer>);

    fn set_blend_state(&mut self, state: BlendState);

    fn set_depth_stencil_state(&mut self, state: DepthStencilState, stencil_reference: u32);

    fn set_render_targets(&mut self, targets: &[Option<RenderTargetView>], depth_stencil: Option<DepthStencilView>);

    fn set_viewport(&mut self, width: u32, height: u32);

    /// Draws `vertex_count` vertices with no vertex or index buffer bound.
    fn draw(&mut self, vertex_count: u32);

    fn begin_query(&mut self, query: Query);

    fn end_query(&mut self, query: Query);

    /// Polls a query without flushing or blocking. `None` while the result is
    /// not available yet.
    fn query_data(&mut self, query: Query) -> Option<QueryData>;
}
