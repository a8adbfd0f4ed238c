//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use postfx_core::{EffectModule, Format};
use postfx_runtime::backend::Command;
use postfx_runtime::{EffectRuntime, ResourceId, RuntimeConfig, SoftwareDevice, SwapchainDesc};

pub type Runtime = EffectRuntime<SoftwareDevice>;

/// Initialized runtime over a single-sampled RGBA8 swapchain.
pub fn runtime(width: u32, height: u32) -> (Runtime, ResourceId) {
    runtime_with(width, height, Format::Rgba8Unorm, 1)
}

pub fn runtime_with(width: u32, height: u32, format: Format, samples: u32) -> (Runtime, ResourceId) {
    let mut device = SoftwareDevice::new();
    let backbuffer = device.create_backbuffer(width, height, format, samples).unwrap();
    let mut runtime = EffectRuntime::new(device, RuntimeConfig::default());
    runtime
        .init(&SwapchainDesc {
            backbuffer,
            width,
            height,
            format,
            sample_count: samples,
        })
        .unwrap();
    (runtime, backbuffer)
}

pub fn module(yaml: &str) -> EffectModule {
    EffectModule::from_yaml_str(yaml).unwrap()
}

/// Commands recorded since the last call.
pub fn drain(runtime: &mut Runtime) -> Vec<Command> {
    runtime.device_mut().take_commands()
}

pub fn count(commands: &[Command], pred: impl Fn(&Command) -> bool) -> usize {
    commands.iter().filter(|c| pred(c)).count()
}

/// Feedback-free two-technique chain: `Blur` writes `BlurTex`, `Combine`
/// reads it and writes the backbuffer.
pub const CHAIN: &str = r#"
name: Chain.fx
entry_points:
  - { name: PostProcessVS, stage: vertex, bytecode: [1] }
  - { name: BlurPS, stage: pixel, bytecode: [2] }
  - { name: CombinePS, stage: pixel, bytecode: [3] }
textures:
  - { unique_name: BackBufferTex, reference: back_buffer }
  - { unique_name: BlurTex, width: 64, height: 32, format: rgba8 }
samplers:
  - { unique_name: BackBuffer, texture_name: BackBufferTex, binding: 0, texture_binding: 0 }
  - { unique_name: Blur, texture_name: BlurTex, binding: 1, texture_binding: 1 }
techniques:
  - name: Blur
    passes:
      - { vs_entry_point: PostProcessVS, ps_entry_point: BlurPS, render_target_names: [BlurTex] }
  - name: Combine
    passes:
      - { vs_entry_point: PostProcessVS, ps_entry_point: CombinePS }
uniform_data: [0, 0, 128, 63]
"#;
