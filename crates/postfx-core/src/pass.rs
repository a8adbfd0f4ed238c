//! Per-pass declarations: render targets, blend and stencil configuration.
//!
//! All fixed-function state is expressed with small enums that the runtime
//! translates into device state descriptors. Depth testing is not declarable:
//! the effect chain never writes a depth buffer.

use serde::{Deserialize, Serialize};

/// Maximum number of simultaneously bound render targets.
pub const MAX_RENDER_TARGETS: usize = 8;

/// Blend factor applied to source or destination color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    #[default]
    One,
    /// Source color.
    SrcColor,
    /// Source alpha.
    SrcAlpha,
    /// `1 - source color`.
    InvSrcColor,
    /// `1 - source alpha`.
    InvSrcAlpha,
    /// Destination color.
    DstColor,
    /// Destination alpha.
    DstAlpha,
    /// `1 - destination color`.
    InvDstColor,
    /// `1 - destination alpha`.
    InvDstAlpha,
}

/// Blend operation combining weighted source and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendOp {
    /// `src + dst`
    #[default]
    Add,
    /// `src - dst`
    Subtract,
    /// `dst - src`
    RevSubtract,
    /// `min(src, dst)`
    Min,
    /// `max(src, dst)`
    Max,
}

/// Stencil buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StencilOp {
    /// Keep the current value.
    #[default]
    Keep,
    /// Set to zero.
    Zero,
    /// Bitwise invert.
    Invert,
    /// Replace with the reference value.
    Replace,
    /// Increment, wrapping.
    Incr,
    /// Increment, clamping.
    IncrSat,
    /// Decrement, wrapping.
    Decr,
    /// Decrement, clamping.
    DecrSat,
}

/// Comparison function used by the stencil test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonFunc {
    /// Never passes.
    Never,
    /// `ref < value`
    Less,
    /// `ref == value`
    Equal,
    /// `ref <= value`
    LessEqual,
    /// `ref > value`
    Greater,
    /// `ref != value`
    NotEqual,
    /// `ref >= value`
    GreaterEqual,
    /// Always passes.
    #[default]
    Always,
}

/// One declared pass of a technique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassInfo {
    /// Vertex stage entry point name.
    pub vs_entry_point: String,
    /// Pixel stage entry point name.
    pub ps_entry_point: String,
    /// Render target texture names, in attachment order. Empty targets the backbuffer.
    pub render_target_names: Vec<String>,
    /// Viewport size; zero means "size of the first render target".
    pub viewport_width: u32,
    /// Viewport height; zero means "size of the first render target".
    pub viewport_height: u32,
    /// Vertex count of the fullscreen draw.
    pub num_vertices: u32,
    /// Zero-fill all render targets before drawing.
    pub clear_render_targets: bool,
    /// Write through gamma-encoding render-target views.
    pub srgb_write_enable: bool,
    /// Enable blending on all attachments.
    pub blend_enable: bool,
    /// Color source factor.
    pub src_blend: BlendFactor,
    /// Color destination factor.
    pub dest_blend: BlendFactor,
    /// Color blend op.
    pub blend_op: BlendOp,
    /// Alpha source factor.
    pub src_blend_alpha: BlendFactor,
    /// Alpha destination factor.
    pub dest_blend_alpha: BlendFactor,
    /// Alpha blend op.
    pub blend_op_alpha: BlendOp,
    /// RGBA write mask (bit 0 = red).
    pub color_write_mask: u8,
    /// Enable the stencil test.
    pub stencil_enable: bool,
    /// Stencil read mask.
    pub stencil_read_mask: u8,
    /// Stencil write mask.
    pub stencil_write_mask: u8,
    /// Stencil reference value.
    pub stencil_reference_value: u32,
    /// Stencil comparison.
    pub stencil_comparison_func: ComparisonFunc,
    /// Op when stencil and depth pass.
    pub stencil_op_pass: StencilOp,
    /// Op when the stencil test fails.
    pub stencil_op_fail: StencilOp,
    /// Op when the depth test fails.
    pub stencil_op_depth_fail: StencilOp,
}

impl Default for PassInfo {
    fn default() -> Self {
        Self {
            vs_entry_point: String::new(),
            ps_entry_point: String::new(),
            render_target_names: Vec::new(),
            viewport_width: 0,
            viewport_height: 0,
            num_vertices: 3,
            clear_render_targets: false,
            srgb_write_enable: false,
            blend_enable: false,
            src_blend: BlendFactor::One,
            dest_blend: BlendFactor::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_op_alpha: BlendOp::Add,
            color_write_mask: 0xF,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_reference_value: 0,
            stencil_comparison_func: ComparisonFunc::Always,
            stencil_op_pass: StencilOp::Keep,
            stencil_op_fail: StencilOp::Keep,
            stencil_op_depth_fail: StencilOp::Keep,
        }
    }
}

impl PassInfo {
    /// Pass drawing `vs`/`ps` into the backbuffer with default state.
    pub fn new(vs: impl Into<String>, ps: impl Into<String>) -> Self {
        Self {
            vs_entry_point: vs.into(),
            ps_entry_point: ps.into(),
            ..Default::default()
        }
    }

    /// Builder: set render target names.
    pub fn with_render_targets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.render_target_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this pass renders to the default framebuffer.
    pub fn targets_backbuffer(&self) -> bool {
        self.render_target_names.is_empty()
    }
}
