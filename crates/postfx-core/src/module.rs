//! Compiled effect module description.
//!
//! An [`EffectModule`] is what the external compiler produces for one effect
//! file: compiled entry points, texture and sampler declarations with their
//! binding slots, the techniques with their passes, and the initial uniform
//! storage.
//!
//! Modules can be described in YAML for offline runs:
//!
//! ```rust
//! use postfx_core::EffectModule;
//!
//! let yaml = r#"
//! name: Invert.fx
//! entry_points:
//!   - { name: PostProcessVS, stage: vertex, bytecode: [1, 2, 3] }
//!   - { name: InvertPS, stage: pixel, bytecode: [4, 5, 6] }
//! techniques:
//!   - name: Invert
//!     passes:
//!       - { vs_entry_point: PostProcessVS, ps_entry_point: InvertPS }
//! "#;
//! let module = EffectModule::from_yaml_str(yaml).unwrap();
//! assert_eq!(module.techniques[0].passes[0].num_vertices, 3);
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, ModuleResult};
use crate::format::TextureFormat;
use crate::pass::{PassInfo, MAX_RENDER_TARGETS};

/// Shader stage of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Pixel stage.
    Pixel,
}

impl ShaderStage {
    /// Lowercase stage name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Pixel => "pixel",
        }
    }
}

/// Compiled shader entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// Function name.
    pub name: String,
    /// Stage the entry point was compiled for.
    pub stage: ShaderStage,
    /// Compiled machine code.
    #[serde(default)]
    pub bytecode: Vec<u8>,
}

impl EntryPoint {
    /// Whether the entry point is a pixel shader.
    pub fn is_pixel_shader(&self) -> bool {
        self.stage == ShaderStage::Pixel
    }
}

/// What a texture declaration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureReference {
    /// Texture owned by the effect runtime.
    #[default]
    None,
    /// Alias of the current frame (backbuffer color).
    BackBuffer,
    /// Alias of the selected scene depth buffer.
    DepthBuffer,
}

/// Texture declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureInfo {
    /// Name unique across all loaded effects.
    pub unique_name: String,
    /// Width in texels (ignored for references).
    #[serde(default = "one")]
    pub width: u32,
    /// Height in texels (ignored for references).
    #[serde(default = "one")]
    pub height: u32,
    /// Mip level count.
    #[serde(default = "one")]
    pub levels: u32,
    /// Texel format.
    #[serde(default)]
    pub format: TextureFormat,
    /// Reference kind.
    #[serde(default)]
    pub reference: TextureReference,
}

fn one() -> u32 {
    1
}

impl TextureInfo {
    /// Owned texture declaration.
    pub fn new(name: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            unique_name: name.into(),
            width,
            height,
            levels: 1,
            format,
            reference: TextureReference::None,
        }
    }

    /// Reference texture declaration.
    pub fn reference(name: impl Into<String>, reference: TextureReference) -> Self {
        Self {
            reference,
            ..Self::new(name, 1, 1, TextureFormat::Rgba8)
        }
    }

    /// Builder: set mip level count.
    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }
}

/// Texture filtering mode.
///
/// Discriminants are the device filter codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum FilterMode {
    /// Point sampling everywhere.
    MinMagMipPoint = 0x00,
    /// Point min/mag, linear mip.
    MinMagPointMipLinear = 0x01,
    /// Point min, linear mag, point mip.
    MinPointMagLinearMipPoint = 0x04,
    /// Point min, linear mag/mip.
    MinPointMagMipLinear = 0x05,
    /// Linear min, point mag/mip.
    MinLinearMagMipPoint = 0x10,
    /// Linear min, point mag, linear mip.
    MinLinearMagPointMipLinear = 0x11,
    /// Linear min/mag, point mip.
    MinMagLinearMipPoint = 0x14,
    /// Linear filtering everywhere.
    #[default]
    MinMagMipLinear = 0x15,
    /// Anisotropic filtering.
    Anisotropic = 0x55,
}

impl FilterMode {
    /// Raw device filter code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Texture coordinate addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum AddressMode {
    /// Repeat.
    Wrap = 1,
    /// Repeat mirrored.
    Mirror = 2,
    /// Clamp to edge.
    #[default]
    Clamp = 3,
    /// Border color.
    Border = 4,
}

impl AddressMode {
    /// Raw device address code.
    pub const fn code(self) -> u32 {
        self as u32
    }
}

/// Sampler declaration: a texture and filtering state bound to slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerInfo {
    /// Sampler name.
    pub unique_name: String,
    /// Texture this sampler reads.
    pub texture_name: String,
    /// Sampler slot.
    pub binding: u32,
    /// Texture slot.
    pub texture_binding: u32,
    /// Read through the gamma-decoding view.
    #[serde(default)]
    pub srgb: bool,
    /// Filter mode.
    #[serde(default)]
    pub filter: FilterMode,
    /// U addressing.
    #[serde(default)]
    pub address_u: AddressMode,
    /// V addressing.
    #[serde(default)]
    pub address_v: AddressMode,
    /// W addressing.
    #[serde(default)]
    pub address_w: AddressMode,
    /// Mip LOD bias.
    #[serde(default)]
    pub lod_bias: f32,
    /// Minimum LOD.
    #[serde(default)]
    pub min_lod: f32,
    /// Maximum LOD.
    #[serde(default = "max_lod")]
    pub max_lod: f32,
}

fn max_lod() -> f32 {
    f32::MAX
}

impl SamplerInfo {
    /// Sampler with default state reading `texture` at slots `binding`.
    pub fn new(name: impl Into<String>, texture: impl Into<String>, binding: u32) -> Self {
        Self {
            unique_name: name.into(),
            texture_name: texture.into(),
            binding,
            texture_binding: binding,
            srgb: false,
            filter: FilterMode::default(),
            address_u: AddressMode::default(),
            address_v: AddressMode::default(),
            address_w: AddressMode::default(),
            lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

/// Technique declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueInfo {
    /// User-visible technique name.
    pub name: String,
    /// Passes, in execution order.
    pub passes: Vec<PassInfo>,
    /// Whether the technique runs right after loading.
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl TechniqueInfo {
    /// Enabled technique with the given passes.
    pub fn new(name: impl Into<String>, passes: Vec<PassInfo>) -> Self {
        Self {
            name: name.into(),
            passes,
            enabled: true,
        }
    }
}

/// Compiled effect module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectModule {
    /// Source file name, used in diagnostics.
    pub name: String,
    /// Compiled entry points.
    pub entry_points: Vec<EntryPoint>,
    /// Texture declarations.
    pub textures: Vec<TextureInfo>,
    /// Sampler declarations.
    pub samplers: Vec<SamplerInfo>,
    /// Technique declarations.
    pub techniques: Vec<TechniqueInfo>,
    /// Number of sampler slots used (at least `max(binding) + 1`).
    pub num_sampler_bindings: u32,
    /// Number of texture slots used (at least `max(texture_binding) + 1`).
    pub num_texture_bindings: u32,
    /// Initial contents of the uniform storage.
    pub uniform_data: Vec<u8>,
}

impl EffectModule {
    /// Loads and validates a module description from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> ModuleResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ModuleError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parses and validates a module description from YAML.
    pub fn from_yaml_str(yaml: &str) -> ModuleResult<Self> {
        let mut module: EffectModule = serde_yaml::from_str(yaml)?;
        module.fix_binding_counts();
        module.validate()?;
        Ok(module)
    }

    /// Raises the binding counts so every declared slot fits.
    ///
    /// Counts saturate at `u32::MAX`; slot limits are enforced at activation.
    pub fn fix_binding_counts(&mut self) {
        for sampler in &self.samplers {
            self.num_sampler_bindings = self.num_sampler_bindings.max(sampler.binding.saturating_add(1));
            self.num_texture_bindings = self
                .num_texture_bindings
                .max(sampler.texture_binding.saturating_add(1));
        }
    }

    /// Looks up an entry point by name.
    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    /// Looks up a texture declaration by name.
    pub fn texture(&self, name: &str) -> Option<&TextureInfo> {
        self.textures.iter().find(|tex| tex.unique_name == name)
    }

    /// Checks structural consistency: unique entry point names, pass entry
    /// points of the right stage, render target counts, sampler textures.
    ///
    /// Render target names are resolved by the runtime, since a texture may be
    /// declared by another loaded effect.
    pub fn validate(&self) -> ModuleResult<()> {
        let mut names = HashSet::new();
        for ep in &self.entry_points {
            if !names.insert(ep.name.as_str()) {
                return Err(ModuleError::DuplicateEntryPoint {
                    name: ep.name.clone(),
                });
            }
        }

        for technique in &self.techniques {
            for (index, pass) in technique.passes.iter().enumerate() {
                self.check_stage(technique, index, &pass.vs_entry_point, ShaderStage::Vertex)?;
                self.check_stage(technique, index, &pass.ps_entry_point, ShaderStage::Pixel)?;

                if pass.render_target_names.len() > MAX_RENDER_TARGETS {
                    return Err(ModuleError::TooManyRenderTargets {
                        technique: technique.name.clone(),
                        pass: index,
                        count: pass.render_target_names.len(),
                        limit: MAX_RENDER_TARGETS,
                    });
                }
            }
        }

        for sampler in &self.samplers {
            if self.texture(&sampler.texture_name).is_none() {
                return Err(ModuleError::UnknownTexture {
                    sampler: sampler.unique_name.clone(),
                    texture: sampler.texture_name.clone(),
                });
            }
        }

        Ok(())
    }

    fn check_stage(
        &self,
        technique: &TechniqueInfo,
        pass: usize,
        name: &str,
        stage: ShaderStage,
    ) -> ModuleResult<()> {
        match self.entry_point(name) {
            Some(ep) if ep.stage == stage => Ok(()),
            _ => Err(ModuleError::UnknownEntryPoint {
                technique: technique.name.clone(),
                pass,
                stage: stage.name(),
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> EffectModule {
        EffectModule {
            name: "Test.fx".into(),
            entry_points: vec![
                EntryPoint {
                    name: "VS".into(),
                    stage: ShaderStage::Vertex,
                    bytecode: vec![1],
                },
                EntryPoint {
                    name: "PS".into(),
                    stage: ShaderStage::Pixel,
                    bytecode: vec![2],
                },
            ],
            textures: vec![TextureInfo::new("Tex", 4, 4, TextureFormat::Rgba8)],
            samplers: vec![SamplerInfo::new("Samp", "Tex", 2)],
            techniques: vec![TechniqueInfo::new("T", vec![PassInfo::new("VS", "PS")])],
            ..Default::default()
        }
    }

    #[test]
    fn valid_module_passes() {
        assert!(module().validate().is_ok());
    }

    #[test]
    fn binding_counts_cover_slots() {
        let mut m = module();
        m.fix_binding_counts();
        assert_eq!(m.num_sampler_bindings, 3);
        assert_eq!(m.num_texture_bindings, 3);
    }

    #[test]
    fn binding_counts_saturate_at_max_slot() {
        let mut m = module();
        m.samplers[0].binding = u32::MAX;
        m.samplers[0].texture_binding = u32::MAX;
        m.fix_binding_counts();
        assert_eq!(m.num_sampler_bindings, u32::MAX);
        assert_eq!(m.num_texture_bindings, u32::MAX);
    }

    #[test]
    fn wrong_stage_is_rejected() {
        let mut m = module();
        m.techniques[0].passes[0] = PassInfo::new("PS", "PS");
        let err = m.validate().unwrap_err();
        assert!(matches!(err, ModuleError::UnknownEntryPoint { stage: "vertex", .. }));
    }

    #[test]
    fn duplicate_entry_point() {
        let mut m = module();
        let dup = m.entry_points[0].clone();
        m.entry_points.push(dup);
        assert!(matches!(m.validate(), Err(ModuleError::DuplicateEntryPoint { .. })));
    }

    #[test]
    fn too_many_render_targets() {
        let mut m = module();
        m.techniques[0].passes[0] =
            PassInfo::new("VS", "PS").with_render_targets((0..9).map(|i| format!("RT{i}")));
        assert!(matches!(
            m.validate(),
            Err(ModuleError::TooManyRenderTargets { count: 9, .. })
        ));
    }

    #[test]
    fn sampler_must_name_declared_texture() {
        let mut m = module();
        m.samplers[0].texture_name = "Missing".into();
        assert!(matches!(m.validate(), Err(ModuleError::UnknownTexture { .. })));
    }
}
