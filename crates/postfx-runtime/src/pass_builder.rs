//! Effect activation: turns declared techniques into executable pass records.
//!
//! Activation of one effect creates its shader objects and uniform buffer,
//! resolves sampler and texture bindings, and builds one [`PassRecord`] per
//! declared pass. Any failure releases everything the attempt created and
//! leaves the effect inactive; cached state objects stay cached.

use std::collections::HashMap;

use postfx_core::{
    ComparisonFunc, EffectModule, ModuleError, PassInfo, TextureReference, MAX_RENDER_TARGETS,
};
use tracing::debug;

use crate::backend::{
    BlendDesc, BlendState, DepthStencilDesc, DepthStencilState, DeviceObject, GpuDevice,
    RenderTargetView, SamplerDesc, SamplerState, Shader, ShaderView, StencilFaceDesc,
    MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS,
};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hazard::{resolve_hazards, ViewSlot};
use crate::runtime::{resolve_slot, BackBuffer, EffectObjects, EffectRuntime, Rollback, Texture};
use crate::state_cache::StateObjects;
use crate::timer::GpuTimer;

/// Everything a pass needs at execution time.
#[derive(Debug, Clone)]
pub struct PassRecord {
    pub vertex_shader: Shader,
    pub pixel_shader: Shader,
    pub render_targets: [Option<RenderTargetView>; MAX_RENDER_TARGETS],
    /// Linear views of mipmapped render targets, regenerated after the draw.
    pub mip_targets: Vec<ShaderView>,
    /// Input bindings with hazards removed.
    pub shader_resources: Vec<ViewSlot>,
    pub blend_state: BlendState,
    pub depth_stencil_state: DepthStencilState,
    pub stencil_reference: u32,
    pub stencil_enable: bool,
    pub clear_render_targets: bool,
    pub viewport: (u32, u32),
    pub num_vertices: u32,
}

/// Built execution state of one technique.
#[derive(Debug)]
pub struct TechniqueState {
    /// Sampler slots of the owning effect.
    pub sampler_states: Vec<Option<SamplerState>>,
    /// Texture slots of the owning effect, before per-pass hazard removal.
    pub texture_bindings: Vec<ViewSlot>,
    pub passes: Vec<PassRecord>,
    pub(crate) timer: GpuTimer,
}

impl TechniqueState {
    /// Releases the objects owned by the technique. Shaders and state objects
    /// belong to the effect and the caches.
    pub(crate) fn release<D: GpuDevice>(self, device: &mut D) {
        self.timer.release(device);
    }
}

impl<D: GpuDevice> EffectRuntime<D> {
    /// Builds device objects and pass records for every technique of an effect.
    pub(crate) fn init_effect(&mut self, index: usize) -> RuntimeResult<()> {
        let Self {
            device,
            backbuffer,
            effects,
            textures,
            techniques,
            states,
            depth,
            ..
        } = self;
        let backbuffer = backbuffer.as_ref().ok_or(RuntimeError::NotInitialized)?;
        let effect = effects
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::InvalidEffect(index))?;
        let mut guard = Rollback::new(device);

        let mut shaders = HashMap::with_capacity(effect.module.entry_points.len());
        for entry_point in &effect.module.entry_points {
            let shader = guard
                .device()
                .create_shader(entry_point.stage, &entry_point.bytecode)
                .map_err(|source| RuntimeError::ShaderCreation {
                    name: entry_point.name.clone(),
                    stage: entry_point.stage.name(),
                    source,
                })?;
            guard.track(DeviceObject::Shader(shader));
            shaders.insert(entry_point.name.clone(), shader);
        }

        let constant_buffer = if effect.uniform_data.is_empty() {
            None
        } else {
            let size = effect.uniform_data.len().next_multiple_of(16);
            let buffer = guard
                .device()
                .create_constant_buffer(size)
                .map_err(|source| RuntimeError::ConstantBufferCreation {
                    effect: effect.module.name.clone(),
                    size,
                    source,
                })?;
            guard.track(DeviceObject::Buffer(buffer));
            Some(buffer)
        };

        let (sampler_states, texture_bindings) =
            bind_samplers(guard.device(), states, &effect.module, textures)?;

        let mut built = Vec::new();
        for (slot, technique) in techniques.iter().enumerate().filter(|(_, t)| t.effect_index == index) {
            let timer = GpuTimer::new(guard.device()).map_err(|source| RuntimeError::QueryCreation {
                technique: technique.name.clone(),
                source,
            })?;
            for query in timer.queries() {
                guard.track(DeviceObject::Query(query));
            }

            let mut passes = Vec::with_capacity(technique.passes.len());
            for (pass_index, pass) in technique.passes.iter().enumerate() {
                let context = PassContext {
                    technique: &technique.name,
                    index: pass_index,
                    backbuffer,
                    depth_view: depth.view,
                    shaders: &shaders,
                    texture_bindings: &texture_bindings,
                };
                passes.push(build_pass(guard.device(), states, textures, &context, pass)?);
            }

            built.push((
                slot,
                TechniqueState {
                    sampler_states: sampler_states.clone(),
                    texture_bindings: texture_bindings.clone(),
                    passes,
                    timer,
                },
            ));
        }

        guard.commit();
        debug!(
            effect = %effect.module.name,
            techniques = built.len(),
            cached_states = states.len(),
            "effect objects created"
        );
        for (slot, state) in built {
            techniques[slot].state = Some(state);
        }
        effect.objects = Some(EffectObjects {
            shaders,
            constant_buffer,
        });
        Ok(())
    }
}

/// Resolves the sampler and texture slots of an effect.
fn bind_samplers<D: GpuDevice>(
    device: &mut D,
    states: &mut StateObjects,
    module: &EffectModule,
    textures: &[Texture],
) -> RuntimeResult<(Vec<Option<SamplerState>>, Vec<ViewSlot>)> {
    let mut sampler_states = vec![None; module.num_sampler_bindings.min(MAX_SAMPLER_SLOTS) as usize];
    let mut texture_bindings = vec![ViewSlot::Empty; module.num_texture_bindings.min(MAX_TEXTURE_SLOTS) as usize];

    for info in &module.samplers {
        if info.binding >= MAX_SAMPLER_SLOTS {
            return Err(RuntimeError::SamplerSlotLimit {
                name: info.unique_name.clone(),
                binding: info.binding,
                limit: MAX_SAMPLER_SLOTS,
            });
        }
        if info.texture_binding >= MAX_TEXTURE_SLOTS {
            return Err(RuntimeError::TextureSlotLimit {
                name: info.texture_name.clone(),
                binding: info.texture_binding,
                limit: MAX_TEXTURE_SLOTS,
            });
        }

        let unknown = || RuntimeError::UnknownTexture {
            name: info.texture_name.clone(),
        };
        let texture = textures
            .iter()
            .find(|t| t.info.unique_name == info.texture_name)
            .ok_or_else(unknown)?;

        let view = match texture.info.reference {
            TextureReference::BackBuffer => ViewSlot::BackBuffer { srgb: info.srgb },
            TextureReference::DepthBuffer => ViewSlot::DepthBuffer,
            TextureReference::None => {
                let views = texture.views().ok_or_else(unknown)?;
                ViewSlot::View(views[usize::from(info.srgb)])
            }
        };
        texture_bindings[info.texture_binding as usize] = view;

        let slot = &mut sampler_states[info.binding as usize];
        if slot.is_some() {
            continue;
        }
        let desc = SamplerDesc {
            filter: info.filter,
            address_u: info.address_u,
            address_v: info.address_v,
            address_w: info.address_w,
            mip_lod_bias: info.lod_bias,
            max_anisotropy: 1,
            comparison: ComparisonFunc::Never,
            min_lod: info.min_lod,
            max_lod: info.max_lod,
        };
        let state = states
            .samplers
            .get_or_create(device, &desc)
            .map_err(|source| RuntimeError::SamplerCreation {
                sampler: info.unique_name.clone(),
                desc,
                source,
            })?;
        *slot = Some(state);
    }

    Ok((sampler_states, texture_bindings))
}

struct PassContext<'a> {
    technique: &'a str,
    index: usize,
    backbuffer: &'a BackBuffer,
    depth_view: Option<ShaderView>,
    shaders: &'a HashMap<String, Shader>,
    texture_bindings: &'a [ViewSlot],
}

fn build_pass<D: GpuDevice>(
    device: &mut D,
    states: &mut StateObjects,
    textures: &mut [Texture],
    cx: &PassContext<'_>,
    pass: &PassInfo,
) -> RuntimeResult<PassRecord> {
    let shader = |name: &str| {
        cx.shaders
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::UnknownEntryPoint {
                technique: cx.technique.to_string(),
                pass: cx.index,
                name: name.to_string(),
            })
    };
    let vertex_shader = shader(&pass.vs_entry_point)?;
    let pixel_shader = shader(&pass.ps_entry_point)?;

    if pass.render_target_names.len() > MAX_RENDER_TARGETS {
        return Err(ModuleError::TooManyRenderTargets {
            technique: cx.technique.to_string(),
            pass: cx.index,
            count: pass.render_target_names.len(),
            limit: MAX_RENDER_TARGETS,
        }
        .into());
    }

    let mut render_targets = [None; MAX_RENDER_TARGETS];
    let mut mip_targets = Vec::new();
    let mut viewport = (0, 0);

    if pass.targets_backbuffer() {
        render_targets[0] = Some(cx.backbuffer.rtv[usize::from(pass.srgb_write_enable)]);
        viewport = (cx.backbuffer.width, cx.backbuffer.height);
    } else {
        for (slot, name) in pass.render_target_names.iter().enumerate() {
            let texture = textures
                .iter_mut()
                .find(|t| t.info.unique_name == *name)
                .ok_or_else(|| RuntimeError::UnknownRenderTarget {
                    technique: cx.technique.to_string(),
                    pass: cx.index,
                    name: name.clone(),
                })?;
            if texture.info.reference != TextureReference::None {
                return Err(RuntimeError::InvalidRenderTarget {
                    technique: cx.technique.to_string(),
                    pass: cx.index,
                    name: name.clone(),
                });
            }
            let Some(owned) = texture.owned.as_mut() else {
                return Err(RuntimeError::UnknownRenderTarget {
                    technique: cx.technique.to_string(),
                    pass: cx.index,
                    name: name.clone(),
                });
            };

            render_targets[slot] = Some(owned.render_target(device, name, pass.srgb_write_enable)?);
            if slot == 0 {
                viewport = (texture.info.width, texture.info.height);
            }
            if owned.has_mips(device) && !mip_targets.contains(&owned.srv[0]) {
                mip_targets.push(owned.srv[0]);
            }
        }
    }

    if pass.viewport_width != 0 && pass.viewport_height != 0 {
        viewport = (pass.viewport_width, pass.viewport_height);
    }

    let blend = BlendDesc {
        blend_enable: [pass.blend_enable; MAX_RENDER_TARGETS],
        src_blend: pass.src_blend,
        dest_blend: pass.dest_blend,
        blend_op: pass.blend_op,
        src_blend_alpha: pass.src_blend_alpha,
        dest_blend_alpha: pass.dest_blend_alpha,
        blend_op_alpha: pass.blend_op_alpha,
        render_target_write_mask: [pass.color_write_mask; MAX_RENDER_TARGETS],
    };
    let blend_state = states
        .blend_states
        .get_or_create(device, &blend)
        .map_err(|source| RuntimeError::BlendStateCreation {
            technique: cx.technique.to_string(),
            pass: cx.index,
            source,
        })?;

    let face = StencilFaceDesc {
        fail_op: pass.stencil_op_fail,
        depth_fail_op: pass.stencil_op_depth_fail,
        pass_op: pass.stencil_op_pass,
        func: pass.stencil_comparison_func,
    };
    let depth_stencil = DepthStencilDesc {
        depth_enable: false,
        depth_write: false,
        depth_func: ComparisonFunc::Always,
        stencil_enable: pass.stencil_enable,
        stencil_read_mask: pass.stencil_read_mask,
        stencil_write_mask: pass.stencil_write_mask,
        front_face: face,
        back_face: face,
    };
    let depth_stencil_state = states
        .depth_stencil_states
        .get_or_create(device, &depth_stencil)
        .map_err(|source| RuntimeError::DepthStencilStateCreation {
            technique: cx.technique.to_string(),
            pass: cx.index,
            source,
        })?;

    let mut shader_resources = cx.texture_bindings.to_vec();
    let emptied = resolve_hazards(&*device, &mut shader_resources, &render_targets, |slot| {
        resolve_slot(slot, cx.backbuffer, cx.depth_view)
    });
    if emptied > 0 {
        debug!(technique = cx.technique, pass = cx.index, emptied, "unbound inputs that are also render targets");
    }

    Ok(PassRecord {
        vertex_shader,
        pixel_shader,
        render_targets,
        mip_targets,
        shader_resources,
        blend_state,
        depth_stencil_state,
        stencil_reference: pass.stencil_reference_value,
        stencil_enable: pass.stencil_enable,
        clear_render_targets: pass.clear_render_targets,
        viewport,
        num_vertices: pass.num_vertices,
    })
}
