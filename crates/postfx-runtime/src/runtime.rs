//! The effect runtime.
//!
//! [`EffectRuntime`] owns the device, the backbuffer-derived objects, the
//! runtime-wide texture table, the loaded effects and their techniques, the
//! state caches and the scene depth alias. Effect activation lives in
//! `pass_builder`, frame execution in `executor`.
//!
//! # Lifecycle
//!
//! ```text
//! new -> init(swapchain) -> load_effect* -> present* -> reset -> init ...
//! ```

use std::collections::HashMap;

use postfx_core::{EffectModule, Format, PassInfo, TextureInfo, TextureReference};
use tracing::{debug, error, info, warn};

use crate::backend::{
    Buffer, DepthStencilView, DeviceObject, GpuDevice, RenderTargetView, ResourceId, Shader,
    ShaderView, TextureDesc, TextureUsage,
};
use crate::config::RuntimeConfig;
use crate::depth::{DepthSelection, DrawStats};
use crate::error::{RuntimeError, RuntimeResult};
use crate::hazard::ViewSlot;
use crate::materialize::{pack_upload, OwnedTexture};
use crate::pass_builder::TechniqueState;
use crate::state_cache::StateObjects;
use crate::timer::DurationAverage;

/// Swapchain the runtime renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub backbuffer: ResourceId,
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub sample_count: u32,
}

/// Releases tracked objects unless committed.
pub(crate) struct Rollback<'a, D: GpuDevice> {
    device: &'a mut D,
    objects: Vec<DeviceObject>,
}

impl<'a, D: GpuDevice> Rollback<'a, D> {
    pub fn new(device: &'a mut D) -> Self {
        Self {
            device,
            objects: Vec::new(),
        }
    }

    pub fn device(&mut self) -> &mut D {
        self.device
    }

    pub fn track(&mut self, object: DeviceObject) {
        self.objects.push(object);
    }

    pub fn commit(mut self) {
        self.objects.clear();
    }
}

impl<D: GpuDevice> Drop for Rollback<'_, D> {
    fn drop(&mut self) {
        for object in self.objects.drain(..).rev() {
            self.device.release(object);
        }
    }
}

/// Objects derived from the swapchain.
#[derive(Debug)]
pub(crate) struct BackBuffer {
    pub original: ResourceId,
    /// Single-sampled scene target; equals `original` unless a resolve is needed.
    pub resolved: ResourceId,
    /// Shader-readable copy of the scene.
    pub texture: ResourceId,
    pub texture_srv: [ShaderView; 2],
    /// `[linear, gamma-encoded]` views of `resolved`.
    pub rtv: [RenderTargetView; 2],
    /// Stencil surface shared by all effects.
    pub depth_stencil: ResourceId,
    pub depth_stencil_view: DepthStencilView,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

impl BackBuffer {
    fn create<D: GpuDevice>(device: &mut D, swapchain: &SwapchainDesc) -> RuntimeResult<Self> {
        let SwapchainDesc {
            backbuffer,
            width,
            height,
            format,
            sample_count,
        } = *swapchain;
        let fail = |what| move |source| RuntimeError::BackBuffer { what, source };
        let mut guard = Rollback::new(device);

        let resolved = if sample_count > 1 || format.normal() != format {
            let desc = TextureDesc::new(width, height, format.typeless(), TextureUsage::RENDER_TARGET);
            let resolved = guard.device().create_texture(&desc).map_err(fail("resolve texture"))?;
            guard.track(DeviceObject::Texture(resolved));
            resolved
        } else {
            backbuffer
        };

        let desc = TextureDesc::new(width, height, format.typeless(), TextureUsage::SHADER_RESOURCE);
        let texture = guard.device().create_texture(&desc).map_err(fail("copy texture"))?;
        guard.track(DeviceObject::Texture(texture));

        let linear = guard
            .device()
            .create_shader_view(texture, format.normal(), 1)
            .map_err(fail("shader resource view"))?;
        guard.track(DeviceObject::ShaderView(linear));
        let srgb = if format.srgb() != format.normal() {
            let view = guard
                .device()
                .create_shader_view(texture, format.srgb(), 1)
                .map_err(fail("shader resource view"))?;
            guard.track(DeviceObject::ShaderView(view));
            view
        } else {
            linear
        };

        let rtv_linear = guard
            .device()
            .create_render_target_view(resolved, format.normal())
            .map_err(fail("render target view"))?;
        guard.track(DeviceObject::RenderTargetView(rtv_linear));
        let rtv_srgb = if format.srgb() != format.normal() {
            let view = guard
                .device()
                .create_render_target_view(resolved, format.srgb())
                .map_err(fail("render target view"))?;
            guard.track(DeviceObject::RenderTargetView(view));
            view
        } else {
            rtv_linear
        };

        let desc = TextureDesc::new(width, height, Format::D24UnormS8Uint, TextureUsage::DEPTH_STENCIL);
        let depth_stencil = guard.device().create_texture(&desc).map_err(fail("depth-stencil texture"))?;
        guard.track(DeviceObject::Texture(depth_stencil));
        let depth_stencil_view = guard
            .device()
            .create_depth_stencil_view(depth_stencil)
            .map_err(fail("depth-stencil view"))?;

        guard.commit();
        Ok(Self {
            original: backbuffer,
            resolved,
            texture,
            texture_srv: [linear, srgb],
            rtv: [rtv_linear, rtv_srgb],
            depth_stencil,
            depth_stencil_view,
            format,
            width,
            height,
        })
    }

    pub fn needs_resolve(&self) -> bool {
        self.resolved != self.original
    }

    fn release<D: GpuDevice>(self, device: &mut D) {
        device.release(DeviceObject::DepthStencilView(self.depth_stencil_view));
        device.release(DeviceObject::Texture(self.depth_stencil));
        if self.rtv[1] != self.rtv[0] {
            device.release(DeviceObject::RenderTargetView(self.rtv[1]));
        }
        device.release(DeviceObject::RenderTargetView(self.rtv[0]));
        if self.texture_srv[1] != self.texture_srv[0] {
            device.release(DeviceObject::ShaderView(self.texture_srv[1]));
        }
        device.release(DeviceObject::ShaderView(self.texture_srv[0]));
        device.release(DeviceObject::Texture(self.texture));
        if self.needs_resolve() {
            device.release(DeviceObject::Texture(self.resolved));
        }
    }
}

/// Resolves an input slot to the view it currently stands for.
pub(crate) fn resolve_slot(
    slot: ViewSlot,
    backbuffer: &BackBuffer,
    depth_view: Option<ShaderView>,
) -> Option<ShaderView> {
    match slot {
        ViewSlot::Empty => None,
        ViewSlot::View(view) => Some(view),
        ViewSlot::BackBuffer { srgb } => Some(backbuffer.texture_srv[usize::from(srgb)]),
        ViewSlot::DepthBuffer => depth_view,
    }
}

/// The scene depth alias: a single slot every depth-referencing binding
/// dereferences when a pass executes.
#[derive(Debug, Default)]
pub(crate) struct DepthAlias {
    pub texture: Option<ResourceId>,
    pub view: Option<ShaderView>,
}

/// Device objects of an activated effect.
#[derive(Debug)]
pub(crate) struct EffectObjects {
    pub shaders: HashMap<String, Shader>,
    pub constant_buffer: Option<Buffer>,
}

impl EffectObjects {
    fn release<D: GpuDevice>(self, device: &mut D) {
        if let Some(buffer) = self.constant_buffer {
            device.release(DeviceObject::Buffer(buffer));
        }
        for shader in self.shaders.into_values() {
            device.release(DeviceObject::Shader(shader));
        }
    }
}

/// A loaded effect.
#[derive(Debug)]
pub struct Effect {
    pub module: EffectModule,
    /// Uniform storage, uploaded before each of the effect's techniques runs.
    pub uniform_data: Vec<u8>,
    /// Activation error text; empty when activation succeeded.
    pub errors: String,
    pub(crate) objects: Option<EffectObjects>,
}

impl Effect {
    pub fn name(&self) -> &str {
        &self.module.name
    }

    pub fn is_active(&self) -> bool {
        self.objects.is_some()
    }
}

/// Entry of the runtime-wide texture table.
#[derive(Debug)]
pub struct Texture {
    pub info: TextureInfo,
    pub(crate) owned: Option<OwnedTexture>,
    /// Indices of the effects declaring this texture.
    pub(crate) effects: Vec<usize>,
}

impl Texture {
    pub fn name(&self) -> &str {
        &self.info.unique_name
    }

    pub fn reference(&self) -> TextureReference {
        self.info.reference
    }

    /// Whether device objects exist for an owned texture.
    pub fn is_materialized(&self) -> bool {
        self.owned.is_some()
    }

    /// `[linear, gamma-encoded]` views of an owned texture.
    pub fn views(&self) -> Option<[ShaderView; 2]> {
        self.owned.as_ref().map(|owned| owned.srv)
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.owned.as_ref().map(|owned| owned.resource)
    }
}

/// A technique of a loaded effect.
#[derive(Debug)]
pub struct Technique {
    pub name: String,
    pub effect_index: usize,
    pub passes: Vec<PassInfo>,
    pub enabled: bool,
    /// Smoothed GPU duration in nanoseconds.
    pub average_gpu_duration: DurationAverage,
    pub(crate) state: Option<TechniqueState>,
}

impl Technique {
    /// Whether the technique's device objects were built.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn gpu_duration_ns(&self) -> u64 {
        self.average_gpu_duration.get()
    }

    /// Built execution state, once the effect is active.
    pub fn state(&self) -> Option<&TechniqueState> {
        self.state.as_ref()
    }
}

/// Effect execution engine over a [`GpuDevice`].
pub struct EffectRuntime<D: GpuDevice> {
    pub(crate) device: D,
    pub(crate) config: RuntimeConfig,
    pub(crate) backbuffer: Option<BackBuffer>,
    pub(crate) effects: Vec<Option<Effect>>,
    pub(crate) textures: Vec<Texture>,
    pub(crate) techniques: Vec<Technique>,
    pub(crate) states: StateObjects,
    pub(crate) depth: DepthAlias,
    pub(crate) depth_override: Option<ResourceId>,
    pub(crate) depth_selection: Option<DepthSelection>,
    pub(crate) frame_stats: DrawStats,
}

impl<D: GpuDevice> EffectRuntime<D> {
    pub fn new(device: D, config: RuntimeConfig) -> Self {
        Self {
            device,
            config,
            backbuffer: None,
            effects: Vec::new(),
            textures: Vec::new(),
            techniques: Vec::new(),
            states: StateObjects::new(),
            depth: DepthAlias::default(),
            depth_override: None,
            depth_selection: None,
            frame_stats: DrawStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Replaces the configuration; takes effect at the next present.
    pub fn set_config(&mut self, config: RuntimeConfig) {
        if config != self.config {
            debug!(?config, "runtime configuration changed");
        }
        self.config = config;
    }

    pub fn is_initialized(&self) -> bool {
        self.backbuffer.is_some()
    }

    /// Output resolution, zero before initialization.
    pub fn resolution(&self) -> (u32, u32) {
        self.backbuffer.as_ref().map_or((0, 0), |bb| (bb.width, bb.height))
    }

    /// Creates the backbuffer-derived objects.
    pub fn init(&mut self, swapchain: &SwapchainDesc) -> RuntimeResult<()> {
        if self.is_initialized() {
            self.reset();
        }
        let backbuffer = BackBuffer::create(&mut self.device, swapchain)?;
        info!(
            device = self.device.name(),
            width = swapchain.width,
            height = swapchain.height,
            format = ?swapchain.format,
            samples = swapchain.sample_count,
            "runtime initialized"
        );
        self.backbuffer = Some(backbuffer);
        Ok(())
    }

    /// Unloads everything and releases the backbuffer-derived objects.
    pub fn reset(&mut self) {
        self.unload_effects();
        self.update_depth_texture(None);
        self.depth_override = None;
        self.depth_selection = None;
        if let Some(backbuffer) = self.backbuffer.take() {
            backbuffer.release(&mut self.device);
            debug!("runtime reset");
        }
    }

    /// Loads and activates an effect.
    ///
    /// An effect that fails validation or activation stays registered,
    /// inactive, with its error text in [`Effect::errors`]; the error is also
    /// returned.
    pub fn load_effect(&mut self, mut module: EffectModule) -> RuntimeResult<usize> {
        if !self.is_initialized() {
            return Err(RuntimeError::NotInitialized);
        }
        module.fix_binding_counts();

        let index = self.effects.len();
        for info in &module.techniques {
            self.techniques.push(Technique {
                name: info.name.clone(),
                effect_index: index,
                passes: info.passes.clone(),
                enabled: info.enabled,
                average_gpu_duration: DurationAverage::new(),
                state: None,
            });
        }
        let uniform_data = module.uniform_data.clone();
        self.effects.push(Some(Effect {
            module,
            uniform_data,
            errors: String::new(),
            objects: None,
        }));

        self.register_textures(index);
        self.activate(index)?;
        Ok(index)
    }

    /// Retries activation of a loaded effect.
    pub fn reload_effect(&mut self, index: usize) -> RuntimeResult<()> {
        if self.effects.get(index).and_then(Option::as_ref).is_none() {
            return Err(RuntimeError::InvalidEffect(index));
        }
        self.deactivate(index);
        self.register_textures(index);
        self.activate(index)
    }

    fn activate(&mut self, index: usize) -> RuntimeResult<()> {
        let validated = match self.effects[index].as_ref() {
            Some(effect) => effect.module.validate().map_err(RuntimeError::from),
            None => Err(RuntimeError::InvalidEffect(index)),
        };
        let result = validated
            .and_then(|()| self.materialize_textures(index))
            .and_then(|()| self.init_effect(index));
        let Some(effect) = self.effects[index].as_mut() else {
            return Err(RuntimeError::InvalidEffect(index));
        };
        match result {
            Ok(()) => {
                effect.errors.clear();
                info!(effect = %effect.module.name, "effect activated");
                Ok(())
            }
            Err(err) => {
                error!(effect = %effect.module.name, "{err}");
                effect.errors = err.to_string();
                Err(err)
            }
        }
    }

    /// Adds the effect's texture declarations to the shared table.
    fn register_textures(&mut self, index: usize) {
        let Some(effect) = self.effects[index].as_ref() else {
            return;
        };
        for info in &effect.module.textures {
            match self.textures.iter_mut().find(|t| t.info.unique_name == info.unique_name) {
                Some(texture) => {
                    if texture.info != *info {
                        warn!(texture = %info.unique_name, effect = %effect.module.name, "texture redeclared with different properties, keeping the first declaration");
                    }
                    if !texture.effects.contains(&index) {
                        texture.effects.push(index);
                    }
                }
                None => self.textures.push(Texture {
                    info: info.clone(),
                    owned: None,
                    effects: vec![index],
                }),
            }
        }
    }

    /// Creates device objects for the effect's owned textures that lack them.
    ///
    /// On failure the textures created by this call are released again.
    fn materialize_textures(&mut self, index: usize) -> RuntimeResult<()> {
        let mut created = Vec::new();
        let mut result = Ok(());
        for (slot, texture) in self.textures.iter_mut().enumerate() {
            if texture.owned.is_some()
                || texture.info.reference != TextureReference::None
                || !texture.effects.contains(&index)
            {
                continue;
            }
            match OwnedTexture::create(&mut self.device, &texture.info) {
                Ok(owned) => {
                    texture.owned = Some(owned);
                    created.push(slot);
                }
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        if result.is_err() {
            for slot in created {
                if let Some(owned) = self.textures[slot].owned.take() {
                    owned.release(&mut self.device);
                }
            }
        }
        result
    }

    /// Releases the effect's device objects and technique states.
    fn deactivate(&mut self, index: usize) {
        for technique in self.techniques.iter_mut().filter(|t| t.effect_index == index) {
            if let Some(state) = technique.state.take() {
                state.release(&mut self.device);
            }
        }
        if let Some(objects) = self.effects[index].as_mut().and_then(|e| e.objects.take()) {
            objects.release(&mut self.device);
        }
    }

    /// Unloads one effect, its techniques and the textures no other effect declares.
    pub fn unload_effect(&mut self, index: usize) -> RuntimeResult<()> {
        if self.effects.get(index).and_then(Option::as_ref).is_none() {
            return Err(RuntimeError::InvalidEffect(index));
        }
        self.deactivate(index);
        self.techniques.retain(|t| t.effect_index != index);

        let device = &mut self.device;
        self.textures.retain_mut(|texture| {
            texture.effects.retain(|&e| e != index);
            if !texture.effects.is_empty() {
                return true;
            }
            if let Some(owned) = texture.owned.take() {
                owned.release(device);
            }
            false
        });

        if let Some(effect) = self.effects[index].take() {
            debug!(effect = %effect.module.name, "effect unloaded");
        }
        Ok(())
    }

    /// Unloads all effects and clears the state caches and texture table.
    pub fn unload_effects(&mut self) {
        for technique in self.techniques.drain(..) {
            if let Some(state) = technique.state {
                state.release(&mut self.device);
            }
        }
        for effect in self.effects.drain(..).flatten() {
            if let Some(objects) = effect.objects {
                objects.release(&mut self.device);
            }
        }
        for texture in self.textures.drain(..) {
            if let Some(owned) = texture.owned {
                owned.release(&mut self.device);
            }
        }
        self.states.clear(&mut self.device);
    }

    pub fn effect(&self, index: usize) -> Option<&Effect> {
        self.effects.get(index).and_then(Option::as_ref)
    }

    /// Loaded effects with their indices.
    pub fn effects(&self) -> impl Iterator<Item = (usize, &Effect)> {
        self.effects
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    /// Activation error text of an effect.
    pub fn effect_errors(&self, index: usize) -> Option<&str> {
        self.effect(index).map(|e| e.errors.as_str())
    }

    /// Writes into an effect's uniform storage.
    pub fn set_uniform_data(&mut self, index: usize, offset: usize, data: &[u8]) -> RuntimeResult<()> {
        let effect = self
            .effects
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(RuntimeError::InvalidEffect(index))?;
        let size = effect.uniform_data.len();
        let range = offset
            .checked_add(data.len())
            .filter(|&end| end <= size)
            .map(|end| offset..end)
            .ok_or(RuntimeError::UniformOutOfRange {
                offset,
                len: data.len(),
                size,
            })?;
        effect.uniform_data[range].copy_from_slice(data);
        Ok(())
    }

    /// Uploads 4-channel 8-bit pixels into an owned texture.
    pub fn upload_texture(&mut self, name: &str, pixels: &[u8]) -> RuntimeResult<()> {
        let texture = self
            .textures
            .iter()
            .find(|t| t.info.unique_name == name)
            .ok_or_else(|| RuntimeError::UnknownTexture { name: name.to_string() })?;
        if texture.info.reference != TextureReference::None {
            return Err(RuntimeError::ReferenceTexture { name: name.to_string() });
        }
        let owned = texture
            .owned
            .as_ref()
            .ok_or_else(|| RuntimeError::UnknownTexture { name: name.to_string() })?;

        let data = pack_upload(&texture.info, pixels)?;
        let row_pitch = data.len() / texture.info.height.max(1) as usize;
        self.device.update_texture(owned.resource, &data, row_pitch);
        if owned.has_mips(&self.device) {
            self.device.generate_mips(owned.srv[0]);
        }
        Ok(())
    }

    /// Enables or disables every technique named `name`, across all loaded
    /// effects. Returns whether any exists.
    pub fn set_technique_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for technique in self.techniques.iter_mut().filter(|t| t.name == name) {
            technique.enabled = enabled;
            found = true;
        }
        found
    }

    /// Techniques in execution order.
    pub fn techniques(&self) -> &[Technique] {
        &self.techniques
    }

    pub fn technique(&self, name: &str) -> Option<&Technique> {
        self.techniques.iter().find(|t| t.name == name)
    }

    /// The runtime-wide texture table.
    pub fn textures(&self) -> &[Texture] {
        &self.textures
    }

    pub fn texture(&self, name: &str) -> Option<&Texture> {
        self.textures.iter().find(|t| t.info.unique_name == name)
    }

    /// Forces a depth buffer, bypassing the heuristics.
    pub fn set_depth_override(&mut self, resource: Option<ResourceId>) {
        self.depth_override = resource;
    }

    pub fn depth_override(&self) -> Option<ResourceId> {
        self.depth_override
    }

    /// Resource currently aliased as the scene depth buffer.
    pub fn depth_texture(&self) -> Option<ResourceId> {
        self.depth.texture
    }

    /// Shader view of the current depth alias.
    pub fn depth_view(&self) -> Option<ShaderView> {
        self.depth.view
    }

    /// Outcome of the last depth buffer selection.
    pub fn depth_selection(&self) -> Option<DepthSelection> {
        self.depth_selection
    }

    /// Draws of the last presented frame, application and effects combined.
    pub fn frame_stats(&self) -> DrawStats {
        self.frame_stats
    }

    /// Shader-readable copy of the scene.
    pub fn backbuffer_texture(&self) -> Option<ResourceId> {
        self.backbuffer.as_ref().map(|bb| bb.texture)
    }

    /// View an input slot stands for right now.
    pub fn resolve_binding(&self, slot: ViewSlot) -> Option<ShaderView> {
        let backbuffer = self.backbuffer.as_ref()?;
        resolve_slot(slot, backbuffer, self.depth.view)
    }

    /// Points the depth alias at `texture`. No-op if it is already aliased.
    pub(crate) fn update_depth_texture(&mut self, texture: Option<ResourceId>) {
        if self.depth.texture == texture {
            return;
        }
        if let Some(view) = self.depth.view.take() {
            self.device.release(DeviceObject::ShaderView(view));
        }
        self.depth.texture = texture;

        let Some(resource) = texture else {
            debug!("depth alias cleared");
            return;
        };
        let Some(desc) = self.device.texture_desc(resource) else {
            warn!(resource = resource.0, "selected depth buffer is unknown to the device");
            return;
        };
        if !desc.usage.shader_resource {
            warn!(resource = resource.0, "selected depth buffer is not shader-readable");
            return;
        }

        match self.device.create_shader_view(resource, desc.format.normal(), 1) {
            Ok(view) => {
                debug!(resource = resource.0, width = desc.width, height = desc.height, "depth alias updated");
                self.depth.view = Some(view);
            }
            Err(err) => {
                warn!(resource = resource.0, format = ?desc.format.normal(), "failed to create depth buffer view: {err}");
            }
        }
    }
}

impl<D: GpuDevice> Drop for EffectRuntime<D> {
    fn drop(&mut self) {
        self.reset();
    }
}
