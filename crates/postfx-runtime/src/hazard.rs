//! Read/write hazard removal for pass bindings.
//!
//! A pass must never sample a resource it is rendering into. Input slots are
//! compared with outputs by physical resource identity, so two different views
//! (say the linear and the gamma-encoded one) of the same texture still
//! conflict. Conflicting input slots are emptied.

use crate::backend::{GpuDevice, RenderTargetView, ShaderView};

/// Shader resource binding of a pass input slot.
///
/// Backbuffer and depth aliases are resolved when the pass executes, so
/// replacing the scene depth buffer re-points every pass at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewSlot {
    /// Nothing bound.
    #[default]
    Empty,
    /// A fixed view of an effect-owned texture.
    View(ShaderView),
    /// Copy of the current frame, through the linear or gamma-encoded view.
    BackBuffer { srgb: bool },
    /// The currently selected scene depth buffer.
    DepthBuffer,
}

impl ViewSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Empties every input slot that resolves to a resource also bound as an
/// output. Returns the number of slots emptied.
///
/// `resolve` maps aliases to the view they currently stand for.
pub fn resolve_hazards<D, F>(
    device: &D,
    inputs: &mut [ViewSlot],
    outputs: &[Option<RenderTargetView>],
    resolve: F,
) -> usize
where
    D: GpuDevice,
    F: Fn(ViewSlot) -> Option<ShaderView>,
{
    let written: Vec<_> = outputs
        .iter()
        .flatten()
        .filter_map(|&rtv| device.render_target_resource(rtv))
        .collect();
    if written.is_empty() {
        return 0;
    }

    let mut emptied = 0;
    for slot in inputs.iter_mut() {
        let resource = resolve(*slot).and_then(|view| device.shader_view_resource(view));
        if resource.is_some_and(|r| written.contains(&r)) {
            *slot = ViewSlot::Empty;
            emptied += 1;
        }
    }
    emptied
}
