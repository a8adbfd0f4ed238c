//! Module description loading tests.

use std::io::Write;

use postfx_core::{
    AddressMode, BlendFactor, EffectModule, FilterMode, ModuleError, StencilOp, TextureFormat,
    TextureReference,
};

const BLOOM: &str = r#"
name: Bloom.fx
entry_points:
  - { name: PostProcessVS, stage: vertex, bytecode: [0, 1] }
  - { name: ThresholdPS, stage: pixel, bytecode: [2, 3] }
  - { name: CombinePS, stage: pixel, bytecode: [4, 5] }
textures:
  - { unique_name: BackBufferTex, reference: back_buffer }
  - { unique_name: DepthBufferTex, reference: depth_buffer }
  - { unique_name: BloomTex, width: 960, height: 540, levels: 4, format: rgba16f }
samplers:
  - { unique_name: BackBuffer, texture_name: BackBufferTex, binding: 0, texture_binding: 0, srgb: true }
  - unique_name: Bloom
    texture_name: BloomTex
    binding: 1
    texture_binding: 1
    filter: min_mag_mip_point
    address_u: wrap
techniques:
  - name: Bloom
    enabled: false
    passes:
      - vs_entry_point: PostProcessVS
        ps_entry_point: ThresholdPS
        render_target_names: [BloomTex]
        clear_render_targets: true
      - vs_entry_point: PostProcessVS
        ps_entry_point: CombinePS
        blend_enable: true
        src_blend: src_alpha
        dest_blend: inv_src_alpha
        stencil_enable: true
        stencil_op_pass: replace
        stencil_reference_value: 1
uniform_data: [0, 0, 128, 63]
"#;

#[test]
fn test_parse_full_module() {
    let module = EffectModule::from_yaml_str(BLOOM).unwrap();

    assert_eq!(module.name, "Bloom.fx");
    assert_eq!(module.entry_points.len(), 3);
    assert!(module.entry_point("CombinePS").unwrap().is_pixel_shader());

    let depth = module.texture("DepthBufferTex").unwrap();
    assert_eq!(depth.reference, TextureReference::DepthBuffer);
    let bloom = module.texture("BloomTex").unwrap();
    assert_eq!((bloom.width, bloom.height, bloom.levels), (960, 540, 4));
    assert_eq!(bloom.format, TextureFormat::Rgba16f);

    let sampler = &module.samplers[1];
    assert_eq!(sampler.filter, FilterMode::MinMagMipPoint);
    assert_eq!(sampler.address_u, AddressMode::Wrap);
    assert_eq!(sampler.address_v, AddressMode::Clamp);
    assert_eq!(module.num_sampler_bindings, 2);
    assert_eq!(module.num_texture_bindings, 2);

    let technique = &module.techniques[0];
    assert!(!technique.enabled);
    assert!(technique.passes[0].clear_render_targets);
    assert_eq!(technique.passes[1].src_blend, BlendFactor::SrcAlpha);
    assert_eq!(technique.passes[1].stencil_op_pass, StencilOp::Replace);
    assert_eq!(technique.passes[1].stencil_op_fail, StencilOp::Keep);
    assert_eq!(technique.passes[1].color_write_mask, 0xF);
    assert!(technique.passes[1].targets_backbuffer());
    assert_eq!(module.uniform_data, vec![0, 0, 128, 63]);
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BLOOM.as_bytes()).unwrap();

    let module = EffectModule::load(file.path()).unwrap();
    assert_eq!(module.techniques.len(), 1);
}

#[test]
fn test_missing_file() {
    let err = EffectModule::load("/nonexistent/module.yaml").unwrap_err();
    assert!(matches!(err, ModuleError::NotFound { .. }));
}

#[test]
fn test_invalid_yaml() {
    let err = EffectModule::from_yaml_str("techniques: [").unwrap_err();
    assert!(matches!(err, ModuleError::Yaml(_)));
}
