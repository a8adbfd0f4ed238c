//! Run command: executes effect modules over the software device.
//!
//! Each frame replays a small synthetic scene into the depth tracker (a
//! shadow map pass followed by a main pass on a backbuffer-sized depth
//! buffer), then presents.

use crate::RunArgs;
use anyhow::{Context, Result, bail};
use postfx_core::Format;
use postfx_runtime::backend::TextureDesc;
use postfx_runtime::{
    DepthTracker, EffectRuntime, GpuDevice, ResourceId, RuntimeConfig, SoftwareDevice, SwapchainDesc,
};
use tracing::{info, warn};

/// Side length of the synthetic shadow map.
const SHADOW_MAP_SIZE: u32 = 2048;

/// Runs the run command.
pub fn run(args: RunArgs, verbose: bool) -> Result<()> {
    if args.width == 0 || args.height == 0 {
        bail!("Invalid backbuffer size {}x{}", args.width, args.height);
    }

    let config = match &args.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let mut device = SoftwareDevice::new();
    let backbuffer = device
        .create_backbuffer(args.width, args.height, Format::Rgba8Unorm, args.samples)
        .context("Failed to create backbuffer")?;
    let scene = Scene::new(&mut device, args.width, args.height, args.samples)?;

    let mut runtime = EffectRuntime::new(device, config);
    runtime
        .init(&SwapchainDesc {
            backbuffer,
            width: args.width,
            height: args.height,
            format: Format::Rgba8Unorm,
            sample_count: args.samples,
        })
        .context("Failed to initialize runtime")?;

    for path in &args.modules {
        let module = super::load_module(path)?;
        match runtime.load_effect(module) {
            Ok(index) => {
                if let Some(errors) = runtime.effect_errors(index).filter(|e| !e.is_empty()) {
                    warn!(module = %path.display(), "activation failed");
                    eprintln!("{}: {}", path.display(), errors);
                }
            }
            Err(err) => eprintln!("{}: {}", path.display(), err),
        }
    }

    for name in &args.disable {
        if !runtime.set_technique_enabled(name, false) {
            warn!(technique = %name, "no such technique");
        }
    }

    info!(frames = args.frames, width = args.width, height = args.height, "presenting");
    let mut tracker = DepthTracker::new();
    for _ in 0..args.frames {
        scene.record(&mut tracker);
        runtime.present(&tracker);
        runtime.device_mut().advance_frame();
    }

    print_report(&runtime, &scene, verbose);
    Ok(())
}

/// Depth buffers of the synthetic scene.
struct Scene {
    shadow_map: (ResourceId, TextureDesc),
    depth_buffer: (ResourceId, TextureDesc),
}

impl Scene {
    fn new(device: &mut SoftwareDevice, width: u32, height: u32, samples: u32) -> Result<Self> {
        let shadow_map = device
            .create_depth_buffer(SHADOW_MAP_SIZE, SHADOW_MAP_SIZE, 1)
            .context("Failed to create shadow map")?;
        let depth_buffer = device
            .create_depth_buffer(width, height, samples)
            .context("Failed to create depth buffer")?;
        Ok(Self {
            shadow_map: (shadow_map, describe(device, shadow_map)?),
            depth_buffer: (depth_buffer, describe(device, depth_buffer)?),
        })
    }

    fn record(&self, tracker: &mut DepthTracker) {
        tracker.reset();

        // Shadow pass: few large draws.
        let (shadow_map, desc) = &self.shadow_map;
        tracker.bind_depth_buffer(*shadow_map, desc);
        for _ in 0..4 {
            tracker.record_draw(6_000);
        }

        // Main pass: depth prepass, clear, then geometry.
        let (depth_buffer, desc) = &self.depth_buffer;
        tracker.bind_depth_buffer(*depth_buffer, desc);
        for _ in 0..8 {
            tracker.record_draw(3_000);
        }
        tracker.record_clear(*depth_buffer, None);
        for _ in 0..24 {
            tracker.record_draw(1_500);
        }
        tracker.unbind_depth_buffer();
    }

    fn name(&self, resource: ResourceId) -> &'static str {
        if resource == self.shadow_map.0 {
            "shadow map"
        } else if resource == self.depth_buffer.0 {
            "scene depth"
        } else {
            "unknown"
        }
    }
}

fn describe(device: &SoftwareDevice, resource: ResourceId) -> Result<TextureDesc> {
    device
        .texture_desc(resource)
        .with_context(|| format!("Missing texture #{}", resource.0))
}

fn print_report(runtime: &EffectRuntime<SoftwareDevice>, scene: &Scene, verbose: bool) {
    let (width, height) = runtime.resolution();
    println!("Resolution: {}x{}", width, height);

    println!("Effects:");
    for (_, effect) in runtime.effects() {
        let status = if effect.is_active() { "active" } else { "failed" };
        println!("  {} ({})", effect.name(), status);
    }

    println!("Techniques:");
    for technique in runtime.techniques() {
        let status = match (technique.enabled, technique.is_active()) {
            (false, _) => "disabled".to_string(),
            (true, false) => "inactive".to_string(),
            (true, true) => super::format_duration(technique.gpu_duration_ns()),
        };
        println!("  {:<24} {} pass(es)  {}", technique.name, technique.passes.len(), status);
    }

    if verbose {
        println!("Textures:");
        for texture in runtime.textures() {
            match texture.resource() {
                Some(resource) => println!(
                    "  {:<24} {}x{} {:?} (#{})",
                    texture.name(),
                    texture.info.width,
                    texture.info.height,
                    texture.info.format,
                    resource.0
                ),
                None => println!("  {:<24} {:?}", texture.name(), texture.reference()),
            }
        }
    }

    match runtime.depth_selection() {
        Some(selection) => {
            print!("Depth buffer: {} (#{})", scene.name(selection.depth_buffer), selection.depth_buffer.0);
            if let Some(clear) = selection.clear_index {
                print!(", snapshot at clear {}", clear);
            }
            println!();
        }
        None => println!("Depth buffer: none"),
    }

    let stats = runtime.frame_stats();
    println!("Scene stats: {} draw calls, {} vertices", stats.drawcalls, stats.vertices);

    let states = runtime.state_objects();
    println!(
        "State objects: {} samplers, {} blend, {} depth-stencil",
        states.samplers.len(),
        states.blend_states.len(),
        states.depth_stencil_states.len()
    );
    if verbose {
        println!(
            "Sampler cache: {} hits, {} misses",
            states.samplers.hits(),
            states.samplers.misses()
        );
        println!("Live device objects: {}", runtime.device().live_objects());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MODULE: &str = r#"
name: Invert.fx
entry_points:
  - { name: PostProcessVS, stage: vertex, bytecode: [1] }
  - { name: InvertPS, stage: pixel, bytecode: [2] }
textures:
  - { unique_name: BackBufferTex, reference: back_buffer }
  - { unique_name: DepthTex, reference: depth_buffer }
samplers:
  - { unique_name: BackBuffer, texture_name: BackBufferTex, binding: 0, texture_binding: 0 }
  - { unique_name: Depth, texture_name: DepthTex, binding: 1, texture_binding: 1 }
techniques:
  - name: Invert
    passes:
      - { vs_entry_point: PostProcessVS, ps_entry_point: InvertPS }
"#;

    fn args(path: std::path::PathBuf) -> RunArgs {
        RunArgs {
            modules: vec![path],
            frames: 3,
            width: 320,
            height: 180,
            samples: 1,
            config: None,
            disable: Vec::new(),
        }
    }

    #[test]
    fn test_run_module() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MODULE.as_bytes()).unwrap();

        run(args(file.path().to_path_buf()), true).unwrap();
    }

    #[test]
    fn test_run_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(args(dir.path().join("missing.yaml")), false).is_err());
    }

    #[test]
    fn test_run_zero_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MODULE.as_bytes()).unwrap();

        let mut args = args(file.path().to_path_buf());
        args.width = 0;
        assert!(run(args, false).is_err());
    }

    #[test]
    fn test_scene_selects_main_depth_buffer() {
        let mut device = SoftwareDevice::new();
        let scene = Scene::new(&mut device, 320, 180, 1).unwrap();
        let mut tracker = DepthTracker::new();
        scene.record(&mut tracker);

        let selector = postfx_runtime::DepthSelector::default();
        let selection = selector.select(&tracker, 320, 180).unwrap();
        assert_eq!(scene.name(selection.depth_buffer), "scene depth");
    }
}
