//! Frame execution.
//!
//! [`EffectRuntime::present`] runs once per presented frame: it picks the
//! scene depth buffer, prepares the backbuffer copy, and executes every
//! enabled technique in load order.
//!
//! ```text
//! stats -> depth selection -> MSAA resolve -> copy -> techniques -> copy
//! ```
//!
//! Compositing the resolved scene back into a multisampled swapchain is left
//! to the host.
//!
//! Nothing here can fail: errors were reported at activation time, and an
//! inactive technique is skipped.

use tracing::{debug, trace};

use crate::backend::GpuDevice;
use crate::depth::{DepthSelector, DepthTracker};
use crate::runtime::{resolve_slot, EffectRuntime};
use crate::state_cache::StateObjects;

const CLEAR_COLOR: [f32; 4] = [0.0; 4];

impl<D: GpuDevice> EffectRuntime<D> {
    /// Renders all enabled techniques into the backbuffer.
    ///
    /// `tracker` holds the application's depth buffer usage for the frame
    /// being presented. Does nothing before [`EffectRuntime::init`].
    pub fn present(&mut self, tracker: &DepthTracker) {
        let Some((width, height)) = self.backbuffer.as_ref().map(|bb| (bb.width, bb.height)) else {
            return;
        };
        self.frame_stats = tracker.total_stats();

        let selector = DepthSelector {
            override_texture: self.depth_override,
            ..DepthSelector::from_config(&self.config.depth)
        };
        let selection = selector.select(tracker, width, height);
        if selection != self.depth_selection {
            debug!(?selection, "depth buffer selection changed");
        }
        self.depth_selection = selection;
        self.update_depth_texture(selection.map(|s| s.texture));

        let Self {
            device,
            backbuffer,
            effects,
            techniques,
            depth,
            frame_stats,
            ..
        } = self;
        let Some(backbuffer) = backbuffer.as_ref() else {
            return;
        };

        if backbuffer.needs_resolve() {
            device.resolve_subresource(backbuffer.resolved, backbuffer.original, backbuffer.format);
        }
        device.set_render_targets(&[Some(backbuffer.rtv[0])], None);
        device.copy_resource(backbuffer.texture, backbuffer.resolved);

        for technique in techniques.iter_mut().filter(|t| t.enabled) {
            let Some(state) = technique.state.as_mut() else {
                continue;
            };
            let Some(effect) = effects.get(technique.effect_index).and_then(Option::as_ref) else {
                continue;
            };
            let constant_buffer = effect.objects.as_ref().and_then(|o| o.constant_buffer);

            state.timer.collect(device, &mut technique.average_gpu_duration);
            let timing = state.timer.begin(device);

            device.set_samplers(&state.sampler_states);
            if let Some(buffer) = constant_buffer {
                device.update_constant_buffer(buffer, &effect.uniform_data);
            }
            device.set_constant_buffer(constant_buffer);

            let mut stencil_cleared = false;
            for pass in &state.passes {
                device.set_shaders(pass.vertex_shader, pass.pixel_shader);
                device.set_blend_state(pass.blend_state);
                device.set_depth_stencil_state(pass.depth_stencil_state, pass.stencil_reference);

                // Earlier passes may have written the scene.
                device.copy_resource(backbuffer.texture, backbuffer.resolved);

                let views: Vec<_> = pass
                    .shader_resources
                    .iter()
                    .map(|&slot| resolve_slot(slot, backbuffer, depth.view))
                    .collect();
                device.set_shader_resources(&views);

                let full_size = pass.viewport == (backbuffer.width, backbuffer.height);
                let depth_stencil = if full_size && pass.stencil_enable {
                    if !stencil_cleared {
                        device.clear_stencil(backbuffer.depth_stencil_view, 0);
                        stencil_cleared = true;
                    }
                    Some(backbuffer.depth_stencil_view)
                } else {
                    None
                };
                device.set_render_targets(&pass.render_targets, depth_stencil);

                if pass.clear_render_targets {
                    for &target in pass.render_targets.iter().flatten() {
                        device.clear_render_target(target, CLEAR_COLOR);
                    }
                }

                device.set_viewport(pass.viewport.0, pass.viewport.1);
                device.draw(pass.num_vertices);
                frame_stats.record(pass.num_vertices);

                device.set_render_targets(&[None; postfx_core::MAX_RENDER_TARGETS], None);
                device.set_shader_resources(&vec![None; views.len()]);

                for &view in &pass.mip_targets {
                    device.generate_mips(view);
                }
            }

            if timing {
                state.timer.end(device);
            }
            trace!(technique = %technique.name, passes = state.passes.len(), "technique rendered");
        }

        device.copy_resource(backbuffer.texture, backbuffer.resolved);
    }

    /// Cached state object counts, for diagnostics.
    pub fn state_objects(&self) -> &StateObjects {
        &self.states
    }
}
