//! CPU reference device.
//!
//! Keeps texel storage for every texture (sample 0 only for multisampled
//! resources), applies the data-moving commands (uploads, copies, resolves,
//! clears, mip generation) and records every command in a log so that frame
//! execution can be inspected. Draws do not rasterize; they advance the GPU
//! clock used for timestamp queries.
//!
//! Query results become available `query_latency` frames after they were
//! ended, see [`SoftwareDevice::advance_frame`]. Object creation can be made
//! to fail with [`SoftwareDevice::fail_next`].

use std::collections::HashMap;

use half::f16;
use postfx_core::{Format, ShaderStage};
use rayon::prelude::*;
use tracing::trace;

use super::{
    BlendDesc, BlendState, Buffer, DepthStencilDesc, DepthStencilState, DepthStencilView,
    DeviceError, DeviceObject, DeviceResult, GpuDevice, ObjectKind, Query, QueryData, QueryKind,
    RenderTargetView, ResourceId, SamplerDesc, SamplerState, Shader, ShaderView, TextureDesc,
};

/// Timing behaviour of a [`SoftwareDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareDeviceConfig {
    /// Timestamp ticks per second.
    pub timestamp_frequency: u64,
    /// Clock ticks consumed by one draw.
    pub ticks_per_draw: u64,
    /// Frames between ending a query and its result becoming available.
    pub query_latency: u64,
}

impl Default for SoftwareDeviceConfig {
    fn default() -> Self {
        Self {
            timestamp_frequency: 10_000_000,
            ticks_per_draw: 1_000,
            query_latency: 1,
        }
    }
}

/// A recorded device command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UpdateTexture { resource: ResourceId, len: usize },
    UpdateConstantBuffer { buffer: Buffer, len: usize },
    GenerateMips { view: ShaderView },
    CopyResource { dst: ResourceId, src: ResourceId },
    ResolveSubresource { dst: ResourceId, src: ResourceId, format: Format },
    ClearRenderTarget { view: RenderTargetView, color: [f32; 4] },
    ClearStencil { view: DepthStencilView, value: u8 },
    SetShaders { vertex: Shader, pixel: Shader },
    SetSamplers(Vec<Option<SamplerState>>),
    SetShaderResources(Vec<Option<ShaderView>>),
    SetConstantBuffer(Option<Buffer>),
    SetBlendState(BlendState),
    SetDepthStencilState { state: DepthStencilState, stencil_reference: u32 },
    SetRenderTargets {
        targets: Vec<Option<RenderTargetView>>,
        depth_stencil: Option<DepthStencilView>,
    },
    SetViewport { width: u32, height: u32 },
    Draw { vertex_count: u32 },
    BeginQuery(Query),
    EndQuery(Query),
}

struct TextureObject {
    desc: TextureDesc,
    mips: Vec<Vec<u8>>,
}

#[derive(Clone, Copy)]
struct ViewObject {
    resource: ResourceId,
    format: Format,
}

enum QueryState {
    Idle,
    Recording,
    Pending { ready_frame: u64, data: QueryData },
}

struct QueryObject {
    kind: QueryKind,
    state: QueryState,
}

/// CPU reference implementation of [`GpuDevice`].
pub struct SoftwareDevice {
    config: SoftwareDeviceConfig,
    next_handle: u64,
    frame: u64,
    clock: u64,
    textures: HashMap<ResourceId, TextureObject>,
    shader_views: HashMap<ShaderView, ViewObject>,
    render_target_views: HashMap<RenderTargetView, ViewObject>,
    depth_stencil_views: HashMap<DepthStencilView, ResourceId>,
    samplers: HashMap<SamplerState, SamplerDesc>,
    blend_states: HashMap<BlendState, BlendDesc>,
    depth_stencil_states: HashMap<DepthStencilState, DepthStencilDesc>,
    shaders: HashMap<Shader, ShaderStage>,
    buffers: HashMap<Buffer, Vec<u8>>,
    queries: HashMap<Query, QueryObject>,
    /// Pending injected failures, with the creations to let through first.
    failures: Vec<(ObjectKind, u32)>,
    next_interval_disjoint: bool,
    commands: Vec<Command>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::with_config(SoftwareDeviceConfig::default())
    }

    pub fn with_config(config: SoftwareDeviceConfig) -> Self {
        Self {
            config,
            next_handle: 0,
            frame: 0,
            clock: 0,
            textures: HashMap::new(),
            shader_views: HashMap::new(),
            render_target_views: HashMap::new(),
            depth_stencil_views: HashMap::new(),
            samplers: HashMap::new(),
            blend_states: HashMap::new(),
            depth_stencil_states: HashMap::new(),
            shaders: HashMap::new(),
            buffers: HashMap::new(),
            queries: HashMap::new(),
            failures: Vec::new(),
            next_interval_disjoint: false,
            commands: Vec::new(),
        }
    }

    pub fn config(&self) -> &SoftwareDeviceConfig {
        &self.config
    }

    /// Makes the next creation of `kind` fail with an out-of-memory error.
    pub fn fail_next(&mut self, kind: ObjectKind) {
        self.fail_after(kind, 0);
    }

    /// Makes the creation of `kind` fail after `successes` more succeed.
    pub fn fail_after(&mut self, kind: ObjectKind, successes: u32) {
        self.failures.push((kind, successes));
    }

    /// Marks the next ended disjoint interval as interrupted.
    pub fn mark_next_interval_disjoint(&mut self) {
        self.next_interval_disjoint = true;
    }

    /// Moves to the next frame, making older query results available.
    pub fn advance_frame(&mut self) {
        self.frame += 1;
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Number of objects created and not yet released.
    pub fn live_objects(&self) -> usize {
        self.textures.len()
            + self.shader_views.len()
            + self.render_target_views.len()
            + self.depth_stencil_views.len()
            + self.samplers.len()
            + self.blend_states.len()
            + self.depth_stencil_states.len()
            + self.shaders.len()
            + self.buffers.len()
            + self.queries.len()
    }

    /// Count of live objects of the given kind.
    pub fn live_count(&self, kind: ObjectKind) -> usize {
        match kind {
            ObjectKind::Texture => self.textures.len(),
            ObjectKind::ShaderView => self.shader_views.len(),
            ObjectKind::RenderTargetView => self.render_target_views.len(),
            ObjectKind::DepthStencilView => self.depth_stencil_views.len(),
            ObjectKind::Sampler => self.samplers.len(),
            ObjectKind::BlendState => self.blend_states.len(),
            ObjectKind::DepthStencilState => self.depth_stencil_states.len(),
            ObjectKind::Shader => self.shaders.len(),
            ObjectKind::Buffer => self.buffers.len(),
            ObjectKind::Query => self.queries.len(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drains the command log.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Texel data of one mip level.
    pub fn read_texture(&self, resource: ResourceId, level: u32) -> Option<&[u8]> {
        self.textures
            .get(&resource)
            .and_then(|tex| tex.mips.get(level as usize))
            .map(Vec::as_slice)
    }

    /// Texel data of mip level 0 of the resource behind a shader view.
    pub fn read_view(&self, view: ShaderView) -> Option<&[u8]> {
        let resource = self.shader_views.get(&view)?.resource;
        self.read_texture(resource, 0)
    }

    /// Overwrites a mip level, as the application rendering into a resource would.
    pub fn write_texture(&mut self, resource: ResourceId, level: u32, data: &[u8]) -> bool {
        let Some(mip) = self
            .textures
            .get_mut(&resource)
            .and_then(|tex| tex.mips.get_mut(level as usize))
        else {
            return false;
        };
        if mip.len() != data.len() {
            return false;
        }
        mip.copy_from_slice(data);
        true
    }

    /// Creates a swapchain buffer the way a presentation engine would.
    pub fn create_backbuffer(
        &mut self,
        width: u32,
        height: u32,
        format: Format,
        sample_count: u32,
    ) -> DeviceResult<ResourceId> {
        self.create_texture(&TextureDesc {
            sample_count,
            ..TextureDesc::new(width, height, format, super::TextureUsage::RENDER_TARGET)
        })
    }

    /// Creates a shader-readable application depth buffer.
    pub fn create_depth_buffer(
        &mut self,
        width: u32,
        height: u32,
        sample_count: u32,
    ) -> DeviceResult<ResourceId> {
        let usage = super::TextureUsage {
            shader_resource: true,
            ..super::TextureUsage::DEPTH_STENCIL
        };
        self.create_texture(&TextureDesc {
            sample_count,
            ..TextureDesc::new(width, height, Format::R24G8Typeless, usage)
        })
    }

    pub fn sampler_desc(&self, sampler: SamplerState) -> Option<&SamplerDesc> {
        self.samplers.get(&sampler)
    }

    pub fn blend_desc(&self, state: BlendState) -> Option<&BlendDesc> {
        self.blend_states.get(&state)
    }

    pub fn depth_stencil_desc(&self, state: DepthStencilState) -> Option<&DepthStencilDesc> {
        self.depth_stencil_states.get(&state)
    }

    pub fn constant_buffer_data(&self, buffer: Buffer) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_failure(&mut self, kind: ObjectKind) -> DeviceResult<()> {
        let Some(index) = self.failures.iter().position(|&(k, _)| k == kind) else {
            return Ok(());
        };
        let successes = &mut self.failures[index].1;
        if *successes > 0 {
            *successes -= 1;
            return Ok(());
        }
        self.failures.remove(index);
        Err(DeviceError::OutOfMemory(kind.name()))
    }

    fn view_object(
        &self,
        resource: ResourceId,
        format: Format,
        what: &'static str,
    ) -> DeviceResult<(ViewObject, &TextureObject)> {
        let texture = self
            .textures
            .get(&resource)
            .ok_or(DeviceError::InvalidHandle(what))?;
        if format.bytes_per_pixel() != texture.desc.format.bytes_per_pixel() {
            return Err(DeviceError::InvalidArgument(format!(
                "view format {format:?} is incompatible with resource format {:?}",
                texture.desc.format
            )));
        }
        Ok((ViewObject { resource, format }, texture))
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn mip_size(width: u32, height: u32, level: u32) -> (usize, usize) {
    (
        (width >> level).max(1) as usize,
        (height >> level).max(1) as usize,
    )
}

/// 2x2 box filter of one 8-bit level into the next.
fn downsample(src: &[u8], src_size: (usize, usize), dst: &mut [u8], dst_width: usize, bpp: usize) {
    let (src_width, src_height) = src_size;
    dst.par_chunks_mut(dst_width * bpp)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..dst_width {
                for c in 0..bpp {
                    let mut sum = 0u32;
                    let mut count = 0u32;
                    for sy in [2 * y, 2 * y + 1] {
                        for sx in [2 * x, 2 * x + 1] {
                            if sx < src_width && sy < src_height {
                                sum += u32::from(src[(sy * src_width + sx) * bpp + c]);
                                count += 1;
                            }
                        }
                    }
                    row[x * bpp + c] = ((sum + count / 2) / count.max(1)) as u8;
                }
            }
        });
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

fn texel_bytes<T: bytemuck::Pod>(values: &[T]) -> Vec<u8> {
    bytemuck::cast_slice::<T, u8>(values).to_vec()
}

/// Encodes a clear color as one texel of `format`. Empty for depth formats.
fn encode_texel(format: Format, color: [f32; 4]) -> Vec<u8> {
    let unorm8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let unorm16 = |v: f32| (v.clamp(0.0, 1.0) * 65535.0).round() as u16;
    let half = |v: f32| f16::from_f32(v).to_bits();
    let [r, g, b, a] = color;

    match format {
        Format::R8Unorm => vec![unorm8(r)],
        Format::Rg8Unorm => vec![unorm8(r), unorm8(g)],
        Format::Rgba8Typeless | Format::Rgba8Unorm => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
        Format::Bgra8Typeless | Format::Bgra8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
        Format::Rgba8UnormSrgb => vec![
            unorm8(linear_to_srgb(r)),
            unorm8(linear_to_srgb(g)),
            unorm8(linear_to_srgb(b)),
            unorm8(a),
        ],
        Format::Bgra8UnormSrgb => vec![
            unorm8(linear_to_srgb(b)),
            unorm8(linear_to_srgb(g)),
            unorm8(linear_to_srgb(r)),
            unorm8(a),
        ],
        Format::R16Unorm => texel_bytes(&[unorm16(r)]),
        Format::Rg16Unorm => texel_bytes(&[unorm16(r), unorm16(g)]),
        Format::Rgba16Unorm => {
            texel_bytes(&[unorm16(r), unorm16(g), unorm16(b), unorm16(a)])
        }
        Format::R16Float => texel_bytes(&[half(r)]),
        Format::Rg16Float => texel_bytes(&[half(r), half(g)]),
        Format::Rgba16Float => texel_bytes(&[half(r), half(g), half(b), half(a)]),
        Format::R32Float => texel_bytes(&[r]),
        Format::Rg32Float => texel_bytes(&[r, g]),
        Format::Rgba32Float => texel_bytes(&color),
        Format::Rgb10a2Unorm => {
            let c10 = |v: f32| (v.clamp(0.0, 1.0) * 1023.0).round() as u32;
            let a2 = (a.clamp(0.0, 1.0) * 3.0).round() as u32;
            (c10(r) | (c10(g) << 10) | (c10(b) << 20) | (a2 << 30)).to_le_bytes().to_vec()
        }
        _ => Vec::new(),
    }
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> DeviceResult<ResourceId> {
        self.take_failure(ObjectKind::Texture)?;

        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "texture size {}x{}",
                desc.width, desc.height
            )));
        }
        let bpp = desc.format.bytes_per_pixel();
        if bpp == 0 {
            return Err(DeviceError::InvalidArgument("texture format is unknown".into()));
        }
        let full = desc.full_mip_count();
        let levels = if desc.levels == 0 { full } else { desc.levels };
        if levels > full {
            return Err(DeviceError::InvalidArgument(format!(
                "{levels} mip levels requested, at most {full} fit"
            )));
        }
        if desc.sample_count == 0 || (desc.sample_count > 1 && levels > 1) {
            return Err(DeviceError::InvalidArgument(format!(
                "sample count {} with {levels} mip levels",
                desc.sample_count
            )));
        }

        let mips = (0..levels)
            .map(|level| {
                let (w, h) = mip_size(desc.width, desc.height, level);
                vec![0u8; w * h * bpp]
            })
            .collect();

        let id = ResourceId(self.allocate_handle());
        trace!(id = id.0, width = desc.width, height = desc.height, levels, "create_texture");
        self.textures.insert(
            id,
            TextureObject {
                desc: TextureDesc { levels, ..*desc },
                mips,
            },
        );
        Ok(id)
    }

    fn create_shader_view(&mut self, resource: ResourceId, format: Format, levels: u32) -> DeviceResult<ShaderView> {
        self.take_failure(ObjectKind::ShaderView)?;
        let (view, texture) = self.view_object(resource, format, "create_shader_view")?;
        if !texture.desc.usage.shader_resource {
            return Err(DeviceError::InvalidArgument("resource is not shader-readable".into()));
        }
        if levels == 0 || levels > texture.desc.levels {
            return Err(DeviceError::InvalidArgument(format!(
                "view over {levels} levels of a {}-level resource",
                texture.desc.levels
            )));
        }
        let id = ShaderView(self.allocate_handle());
        self.shader_views.insert(id, view);
        Ok(id)
    }

    fn create_render_target_view(&mut self, resource: ResourceId, format: Format) -> DeviceResult<RenderTargetView> {
        self.take_failure(ObjectKind::RenderTargetView)?;
        let (view, texture) = self.view_object(resource, format, "create_render_target_view")?;
        if !texture.desc.usage.render_target {
            return Err(DeviceError::InvalidArgument("resource is not a render target".into()));
        }
        let id = RenderTargetView(self.allocate_handle());
        self.render_target_views.insert(id, view);
        Ok(id)
    }

    fn create_depth_stencil_view(&mut self, resource: ResourceId) -> DeviceResult<DepthStencilView> {
        self.take_failure(ObjectKind::DepthStencilView)?;
        let texture = self
            .textures
            .get(&resource)
            .ok_or(DeviceError::InvalidHandle("create_depth_stencil_view"))?;
        if !texture.desc.usage.depth_stencil {
            return Err(DeviceError::InvalidArgument("resource is not a depth-stencil".into()));
        }
        let id = DepthStencilView(self.allocate_handle());
        self.depth_stencil_views.insert(id, resource);
        Ok(id)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> DeviceResult<SamplerState> {
        self.take_failure(ObjectKind::Sampler)?;
        if desc.max_lod < desc.min_lod {
            return Err(DeviceError::InvalidArgument(format!(
                "max LOD {} below min LOD {}",
                desc.max_lod, desc.min_lod
            )));
        }
        let id = SamplerState(self.allocate_handle());
        self.samplers.insert(id, *desc);
        Ok(id)
    }

    fn create_blend_state(&mut self, desc: &BlendDesc) -> DeviceResult<BlendState> {
        self.take_failure(ObjectKind::BlendState)?;
        let id = BlendState(self.allocate_handle());
        self.blend_states.insert(id, *desc);
        Ok(id)
    }

    fn create_depth_stencil_state(&mut self, desc: &DepthStencilDesc) -> DeviceResult<DepthStencilState> {
        self.take_failure(ObjectKind::DepthStencilState)?;
        let id = DepthStencilState(self.allocate_handle());
        self.depth_stencil_states.insert(id, *desc);
        Ok(id)
    }

    fn create_shader(&mut self, stage: ShaderStage, bytecode: &[u8]) -> DeviceResult<Shader> {
        self.take_failure(ObjectKind::Shader)?;
        if bytecode.is_empty() {
            return Err(DeviceError::InvalidArgument("empty shader bytecode".into()));
        }
        let id = Shader(self.allocate_handle());
        self.shaders.insert(id, stage);
        Ok(id)
    }

    fn create_constant_buffer(&mut self, size: usize) -> DeviceResult<Buffer> {
        self.take_failure(ObjectKind::Buffer)?;
        if size == 0 || size % 16 != 0 {
            return Err(DeviceError::InvalidArgument(format!(
                "constant buffer size {size} is not a positive multiple of 16"
            )));
        }
        let id = Buffer(self.allocate_handle());
        self.buffers.insert(id, vec![0; size]);
        Ok(id)
    }

    fn create_query(&mut self, kind: QueryKind) -> DeviceResult<Query> {
        self.take_failure(ObjectKind::Query)?;
        let id = Query(self.allocate_handle());
        self.queries.insert(
            id,
            QueryObject {
                kind,
                state: QueryState::Idle,
            },
        );
        Ok(id)
    }

    fn release(&mut self, object: DeviceObject) {
        let released = match object {
            DeviceObject::Texture(id) => self.textures.remove(&id).is_some(),
            DeviceObject::ShaderView(id) => self.shader_views.remove(&id).is_some(),
            DeviceObject::RenderTargetView(id) => self.render_target_views.remove(&id).is_some(),
            DeviceObject::DepthStencilView(id) => self.depth_stencil_views.remove(&id).is_some(),
            DeviceObject::Sampler(id) => self.samplers.remove(&id).is_some(),
            DeviceObject::BlendState(id) => self.blend_states.remove(&id).is_some(),
            DeviceObject::DepthStencilState(id) => self.depth_stencil_states.remove(&id).is_some(),
            DeviceObject::Shader(id) => self.shaders.remove(&id).is_some(),
            DeviceObject::Buffer(id) => self.buffers.remove(&id).is_some(),
            DeviceObject::Query(id) => self.queries.remove(&id).is_some(),
        };
        if !released {
            trace!(?object, "release of unknown object");
        }
    }

    fn texture_desc(&self, resource: ResourceId) -> Option<TextureDesc> {
        self.textures.get(&resource).map(|tex| tex.desc)
    }

    fn shader_view_resource(&self, view: ShaderView) -> Option<ResourceId> {
        self.shader_views.get(&view).map(|v| v.resource)
    }

    fn render_target_resource(&self, view: RenderTargetView) -> Option<ResourceId> {
        self.render_target_views.get(&view).map(|v| v.resource)
    }

    fn update_texture(&mut self, resource: ResourceId, data: &[u8], row_pitch: usize) {
        self.commands.push(Command::UpdateTexture {
            resource,
            len: data.len(),
        });
        let Some(texture) = self.textures.get_mut(&resource) else {
            return;
        };
        let bpp = texture.desc.format.bytes_per_pixel();
        let (width, height) = mip_size(texture.desc.width, texture.desc.height, 0);
        let row_bytes = width * bpp;
        if row_pitch < row_bytes || data.len() < row_pitch * (height - 1) + row_bytes {
            return;
        }
        for (y, row) in texture.mips[0].chunks_exact_mut(row_bytes).enumerate() {
            let start = y * row_pitch;
            row.copy_from_slice(&data[start..start + row_bytes]);
        }
    }

    fn update_constant_buffer(&mut self, buffer: Buffer, data: &[u8]) {
        self.commands.push(Command::UpdateConstantBuffer {
            buffer,
            len: data.len(),
        });
        if let Some(storage) = self.buffers.get_mut(&buffer) {
            storage.fill(0);
            let n = storage.len().min(data.len());
            storage[..n].copy_from_slice(&data[..n]);
        }
    }

    fn generate_mips(&mut self, view: ShaderView) {
        self.commands.push(Command::GenerateMips { view });
        let Some(resource) = self.shader_view_resource(view) else {
            return;
        };
        let Some(texture) = self.textures.get_mut(&resource) else {
            return;
        };
        if !texture.desc.format.is_8bit_unorm() {
            trace!(format = ?texture.desc.format, "mip generation skipped");
            return;
        }
        let bpp = texture.desc.format.bytes_per_pixel();
        for level in 1..texture.desc.levels {
            let src_size = mip_size(texture.desc.width, texture.desc.height, level - 1);
            let (dst_width, _) = mip_size(texture.desc.width, texture.desc.height, level);
            let (head, tail) = texture.mips.split_at_mut(level as usize);
            downsample(&head[level as usize - 1], src_size, &mut tail[0], dst_width, bpp);
        }
    }

    fn copy_resource(&mut self, dst: ResourceId, src: ResourceId) {
        self.commands.push(Command::CopyResource { dst, src });
        let Some(data) = self.textures.get(&src).map(|tex| tex.mips.clone()) else {
            return;
        };
        if let Some(target) = self.textures.get_mut(&dst) {
            let same_layout = target.mips.len() == data.len()
                && target.mips.iter().zip(&data).all(|(a, b)| a.len() == b.len());
            if same_layout {
                target.mips = data;
            }
        }
    }

    fn resolve_subresource(&mut self, dst: ResourceId, src: ResourceId, format: Format) {
        self.commands.push(Command::ResolveSubresource { dst, src, format });
        let Some(data) = self.textures.get(&src).map(|tex| tex.mips[0].clone()) else {
            return;
        };
        if let Some(target) = self.textures.get_mut(&dst) {
            if target.mips[0].len() == data.len() {
                target.mips[0] = data;
            }
        }
    }

    fn clear_render_target(&mut self, view: RenderTargetView, color: [f32; 4]) {
        self.commands.push(Command::ClearRenderTarget { view, color });
        let Some(view) = self.render_target_views.get(&view).copied() else {
            return;
        };
        let texel = encode_texel(view.format, color);
        if let Some(texture) = self.textures.get_mut(&view.resource) {
            if texel.len() == texture.desc.format.bytes_per_pixel() {
                for chunk in texture.mips[0].chunks_exact_mut(texel.len()) {
                    chunk.copy_from_slice(&texel);
                }
            }
        }
    }

    fn clear_stencil(&mut self, view: DepthStencilView, value: u8) {
        self.commands.push(Command::ClearStencil { view, value });
        let Some(resource) = self.depth_stencil_views.get(&view).copied() else {
            return;
        };
        if let Some(texture) = self.textures.get_mut(&resource) {
            if matches!(texture.desc.format, Format::R24G8Typeless | Format::D24UnormS8Uint) {
                for texel in texture.mips[0].chunks_exact_mut(4) {
                    texel[3] = value;
                }
            }
        }
    }

    fn set_shaders(&mut self, vertex: Shader, pixel: Shader) {
        self.commands.push(Command::SetShaders { vertex, pixel });
    }

    fn set_samplers(&mut self, samplers: &[Option<SamplerState>]) {
        self.commands.push(Command::SetSamplers(samplers.to_vec()));
    }

    fn set_shader_resources(&mut self, views: &[Option<ShaderView>]) {
        self.commands.push(Command::SetShaderResources(views.to_vec()));
    }

    fn set_constant_buffer(&mut self, buffer: Option<Buffer>) {
        self.commands.push(Command::SetConstantBuffer(buffer));
    }

    fn set_blend_state(&mut self, state: BlendState) {
        self.commands.push(Command::SetBlendState(state));
    }

    fn set_depth_stencil_state(&mut self, state: DepthStencilState, stencil_reference: u32) {
        self.commands.push(Command::SetDepthStencilState {
            state,
            stencil_reference,
        });
    }

    fn set_render_targets(&mut self, targets: &[Option<RenderTargetView>], depth_stencil: Option<DepthStencilView>) {
        self.commands.push(Command::SetRenderTargets {
            targets: targets.to_vec(),
            depth_stencil,
        });
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.commands.push(Command::SetViewport { width, height });
    }

    fn draw(&mut self, vertex_count: u32) {
        self.commands.push(Command::Draw { vertex_count });
        self.clock += self.config.ticks_per_draw;
    }

    fn begin_query(&mut self, query: Query) {
        self.commands.push(Command::BeginQuery(query));
        if let Some(object) = self.queries.get_mut(&query) {
            if object.kind == QueryKind::TimestampDisjoint {
                object.state = QueryState::Recording;
            }
        }
    }

    fn end_query(&mut self, query: Query) {
        self.commands.push(Command::EndQuery(query));
        let Some(object) = self.queries.get_mut(&query) else {
            return;
        };
        let data = match object.kind {
            QueryKind::Timestamp => QueryData::Timestamp(self.clock),
            QueryKind::TimestampDisjoint => QueryData::Disjoint {
                frequency: self.config.timestamp_frequency,
                disjoint: std::mem::take(&mut self.next_interval_disjoint),
            },
        };
        object.state = QueryState::Pending {
            ready_frame: self.frame + self.config.query_latency,
            data,
        };
    }

    fn query_data(&mut self, query: Query) -> Option<QueryData> {
        match self.queries.get(&query)?.state {
            QueryState::Pending { ready_frame, data } if self.frame >= ready_frame => Some(data),
            QueryState::Idle | QueryState::Recording | QueryState::Pending { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureUsage;

    #[test]
    fn mips_are_box_filtered() {
        let mut device = SoftwareDevice::new();
        let resource = device
            .create_texture(&TextureDesc {
                levels: 0,
                ..TextureDesc::new(2, 2, Format::R8Unorm, TextureUsage::EFFECT_TEXTURE)
            })
            .unwrap();
        assert_eq!(device.texture_desc(resource).unwrap().levels, 2);

        let view = device.create_shader_view(resource, Format::R8Unorm, 2).unwrap();
        device.update_texture(resource, &[0, 100, 200, 100], 2);
        device.generate_mips(view);
        assert_eq!(device.read_texture(resource, 1).unwrap(), &[100]);
    }

    #[test]
    fn clear_encodes_texel_format() {
        let mut device = SoftwareDevice::new();
        let resource = device
            .create_texture(&TextureDesc::new(2, 1, Format::Rgba16Float, TextureUsage::EFFECT_TEXTURE))
            .unwrap();
        let rtv = device.create_render_target_view(resource, Format::Rgba16Float).unwrap();
        device.clear_render_target(rtv, [1.0, 0.0, 0.0, 1.0]);

        let one = f16::from_f32(1.0).to_bits().to_ne_bytes();
        let texels = device.read_texture(resource, 0).unwrap();
        assert_eq!(&texels[0..2], &one);
        assert_eq!(&texels[2..6], &[0, 0, 0, 0]);
    }

    #[test]
    fn query_results_lag_one_frame() {
        let mut device = SoftwareDevice::new();
        let query = device.create_query(QueryKind::Timestamp).unwrap();
        device.draw(3);
        device.end_query(query);
        assert_eq!(device.query_data(query), None);

        device.advance_frame();
        assert_eq!(device.query_data(query), Some(QueryData::Timestamp(1_000)));
    }

    #[test]
    fn injected_failure_applies_once() {
        let mut device = SoftwareDevice::new();
        device.fail_next(ObjectKind::Sampler);
        assert_eq!(
            device.create_sampler(&SamplerDesc::default()),
            Err(DeviceError::OutOfMemory("sampler state"))
        );
        assert!(device.create_sampler(&SamplerDesc::default()).is_ok());
        assert_eq!(device.live_objects(), 1);
    }

    #[test]
    fn delayed_failure_skips_earlier_creations() {
        let mut device = SoftwareDevice::new();
        device.fail_after(ObjectKind::Sampler, 1);
        assert!(device.create_sampler(&SamplerDesc::default()).is_ok());
        assert!(device.create_sampler(&SamplerDesc::default()).is_err());
        assert!(device.create_sampler(&SamplerDesc::default()).is_ok());
    }

    #[test]
    fn incompatible_view_format_is_rejected() {
        let mut device = SoftwareDevice::new();
        let resource = device
            .create_texture(&TextureDesc::new(4, 4, Format::Rgba8Typeless, TextureUsage::EFFECT_TEXTURE))
            .unwrap();
        assert!(device.create_shader_view(resource, Format::Rgba16Float, 1).is_err());
        assert!(device.create_shader_view(resource, Format::Rgba8UnormSrgb, 1).is_ok());
    }
}
