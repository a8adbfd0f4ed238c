//! Frame execution tests: bindings, hazards, depth selection and timing.

mod common;

use common::{count, drain, module, runtime, runtime_with, Runtime, CHAIN};
use postfx_core::Format;
use postfx_runtime::backend::{Command, GpuDevice, ObjectKind};
use postfx_runtime::{DepthConfig, DepthTracker, ResourceId, RuntimeConfig, ViewSlot};

/// Shader resource bindings issued before draws (the unbinds are all empty).
fn bound_views(commands: &[Command]) -> Vec<Vec<Option<postfx_runtime::backend::ShaderView>>> {
    commands
        .iter()
        .filter_map(|c| match c {
            Command::SetShaderResources(views) if views.iter().any(Option::is_some) => Some(views.clone()),
            _ => None,
        })
        .collect()
}

fn assert_no_hazards(runtime: &Runtime) {
    let device = runtime.device();
    for technique in runtime.techniques() {
        let Some(state) = technique.state() else {
            continue;
        };
        for (index, pass) in state.passes.iter().enumerate() {
            let written: Vec<_> = pass
                .render_targets
                .iter()
                .flatten()
                .filter_map(|&rtv| device.render_target_resource(rtv))
                .collect();
            for &slot in &pass.shader_resources {
                let read = runtime
                    .resolve_binding(slot)
                    .and_then(|view| device.shader_view_resource(view));
                assert!(
                    read.is_none_or(|r| !written.contains(&r)),
                    "technique {} pass {index} reads a resource it writes",
                    technique.name
                );
            }
        }
    }
}

fn depth_buffer(runtime: &mut Runtime, width: u32, height: u32, samples: u32) -> ResourceId {
    runtime.device_mut().create_depth_buffer(width, height, samples).unwrap()
}

fn draw_with(runtime: &Runtime, tracker: &mut DepthTracker, resource: ResourceId, draws: &[u32]) {
    let desc = runtime.device().texture_desc(resource).unwrap();
    tracker.bind_depth_buffer(resource, &desc);
    for &vertices in draws {
        tracker.record_draw(vertices);
    }
    tracker.unbind_depth_buffer();
}

const DEPTH_READER: &str = r#"
name: DepthView.fx
entry_points:
  - { name: PostProcessVS, stage: vertex, bytecode: [1] }
  - { name: DepthPS, stage: pixel, bytecode: [2] }
textures:
  - { unique_name: DepthBufferTex, reference: depth_buffer }
samplers:
  - { unique_name: Depth, texture_name: DepthBufferTex, binding: 0, texture_binding: 0 }
techniques:
  - name: DisplayDepth
    passes:
      - { vs_entry_point: PostProcessVS, ps_entry_point: DepthPS }
"#;

#[test]
fn test_reader_sees_committed_offscreen_target() {
    let (mut runtime, _) = runtime(128, 64);
    runtime.load_effect(module(CHAIN)).unwrap();

    let blur_view = runtime.texture("BlurTex").unwrap().views().unwrap()[0];
    let combine = runtime.technique("Combine").unwrap().state().unwrap();
    assert_eq!(combine.passes[0].shader_resources[1], ViewSlot::View(blur_view));

    drain(&mut runtime);
    runtime.present(&DepthTracker::new());
    let commands = drain(&mut runtime);

    let views = bound_views(&commands);
    assert_eq!(views.len(), 2);
    let backbuffer_view = runtime.resolve_binding(ViewSlot::BackBuffer { srgb: false });
    assert_eq!(views[0], vec![backbuffer_view, None]);
    assert_eq!(views[1], vec![backbuffer_view, Some(blur_view)]);

    assert_eq!(runtime.frame_stats().drawcalls, 2);
    assert_eq!(runtime.frame_stats().vertices, 6);
    assert_no_hazards(&runtime);
}

#[test]
fn test_feedback_input_is_detached() {
    let yaml = r#"
name: Feedback.fx
entry_points:
  - { name: VS, stage: vertex, bytecode: [1] }
  - { name: AccumulatePS, stage: pixel, bytecode: [2] }
textures:
  - { unique_name: HistoryTex, width: 32, height: 32, format: rgba8 }
  - { unique_name: NoiseTex, width: 8, height: 8, format: r8 }
samplers:
  - { unique_name: History, texture_name: HistoryTex, binding: 0, texture_binding: 0, srgb: true }
  - { unique_name: Noise, texture_name: NoiseTex, binding: 1, texture_binding: 1 }
techniques:
  - name: Accumulate
    passes:
      - { vs_entry_point: VS, ps_entry_point: AccumulatePS, render_target_names: [HistoryTex] }
"#;
    let (mut runtime, _) = runtime(64, 64);
    runtime.load_effect(module(yaml)).unwrap();

    let noise_view = runtime.texture("NoiseTex").unwrap().views().unwrap()[0];
    let state = runtime.technique("Accumulate").unwrap().state().unwrap();
    // The srgb view reads the same resource as the linear render target.
    assert_eq!(state.texture_bindings[0], ViewSlot::View(runtime.texture("HistoryTex").unwrap().views().unwrap()[1]));
    assert_eq!(state.passes[0].shader_resources, vec![ViewSlot::Empty, ViewSlot::View(noise_view)]);
    assert_eq!(state.passes[0].viewport, (32, 32));

    runtime.present(&DepthTracker::new());
    assert_no_hazards(&runtime);
}

#[test]
fn test_depth_selection_scenario() {
    let (mut runtime, _) = runtime(1920, 1080);
    runtime.load_effect(module(DEPTH_READER)).unwrap();

    let a = depth_buffer(&mut runtime, 1920, 1080, 1);
    let b = depth_buffer(&mut runtime, 1920, 1080, 4);
    let c = depth_buffer(&mut runtime, 640, 360, 1);

    let mut tracker = DepthTracker::new();
    draw_with(&runtime, &mut tracker, a, &[3_000, 3_000]);
    draw_with(&runtime, &mut tracker, b, &[90_000]);
    draw_with(&runtime, &mut tracker, c, &[50_000]);

    runtime.present(&tracker);
    assert_eq!(runtime.depth_texture(), Some(a));
    let view = runtime.depth_view().unwrap();
    assert_eq!(runtime.device().shader_view_resource(view), Some(a));

    // Without the aspect ratio filter the small buffer wins on vertex count.
    runtime.set_config(RuntimeConfig {
        depth: DepthConfig {
            filter_aspect_ratio: false,
            ..Default::default()
        },
    });
    runtime.present(&tracker);
    assert_eq!(runtime.depth_texture(), Some(c));
}

#[test]
fn test_depth_alias_is_repointed_for_every_pass() {
    let (mut runtime, _) = runtime(1280, 720);
    runtime.load_effect(module(DEPTH_READER)).unwrap();
    let a = depth_buffer(&mut runtime, 1280, 720, 1);
    let b = depth_buffer(&mut runtime, 1280, 720, 1);

    let mut first = DepthTracker::new();
    draw_with(&runtime, &mut first, a, &[300]);
    runtime.present(&first);
    let view_a = runtime.depth_view().unwrap();
    let views_after_first = runtime.device().live_count(ObjectKind::ShaderView);

    // Same selection: the view is kept.
    runtime.present(&first);
    assert_eq!(runtime.depth_view(), Some(view_a));

    let mut second = DepthTracker::new();
    draw_with(&runtime, &mut second, b, &[300]);
    drain(&mut runtime);
    runtime.present(&second);
    let commands = drain(&mut runtime);

    let view_b = runtime.depth_view().unwrap();
    assert_ne!(view_a, view_b);
    assert_eq!(runtime.device().shader_view_resource(view_b), Some(b));
    assert_eq!(runtime.device().live_count(ObjectKind::ShaderView), views_after_first);

    let state = runtime.technique("DisplayDepth").unwrap().state().unwrap();
    assert_eq!(state.passes[0].shader_resources, vec![ViewSlot::DepthBuffer]);
    assert_eq!(bound_views(&commands), vec![vec![Some(view_b)]]);
}

#[test]
fn test_preserved_clear_snapshot_is_aliased() {
    let (mut runtime, _) = runtime(1280, 720);
    runtime.set_config(RuntimeConfig {
        depth: DepthConfig {
            preserve_depth_buffers: true,
            clear_index_override: 1,
            ..Default::default()
        },
    });
    let live = depth_buffer(&mut runtime, 1280, 720, 1);
    let snapshot = depth_buffer(&mut runtime, 1280, 720, 1);

    let mut tracker = DepthTracker::new();
    draw_with(&runtime, &mut tracker, live, &[600]);
    tracker.record_clear(live, Some(snapshot));
    draw_with(&runtime, &mut tracker, live, &[30]);

    runtime.present(&tracker);
    let selection = runtime.depth_selection().unwrap();
    assert_eq!(selection.depth_buffer, live);
    assert_eq!(selection.texture, snapshot);
    assert_eq!(selection.clear_index, Some(1));
    assert_eq!(runtime.depth_texture(), Some(snapshot));
}

#[test]
fn test_depth_override_wins() {
    let (mut runtime, _) = runtime(1280, 720);
    let used = depth_buffer(&mut runtime, 1280, 720, 1);
    let forced = depth_buffer(&mut runtime, 256, 256, 1);

    let mut tracker = DepthTracker::new();
    draw_with(&runtime, &mut tracker, used, &[900]);
    runtime.set_depth_override(Some(forced));
    runtime.present(&tracker);
    assert_eq!(runtime.depth_texture(), Some(forced));

    runtime.set_depth_override(None);
    runtime.present(&tracker);
    assert_eq!(runtime.depth_texture(), Some(used));
}

#[test]
fn test_unreadable_depth_buffer_leaves_alias_empty() {
    let (mut runtime, _) = runtime(1280, 720);
    let desc = postfx_runtime::backend::TextureDesc::new(
        1280,
        720,
        Format::R24G8Typeless,
        postfx_runtime::backend::TextureUsage::DEPTH_STENCIL,
    );
    let opaque = runtime.device_mut().create_texture(&desc).unwrap();

    let mut tracker = DepthTracker::new();
    draw_with(&runtime, &mut tracker, opaque, &[900]);
    runtime.present(&tracker);
    assert_eq!(runtime.depth_texture(), Some(opaque));
    assert_eq!(runtime.depth_view(), None);
}

#[test]
fn test_timer_does_not_block_on_pending_results() {
    let (mut runtime, _) = runtime(128, 64);
    runtime.load_effect(module(CHAIN)).unwrap();

    runtime.present(&DepthTracker::new());
    assert_eq!(runtime.technique("Blur").unwrap().gpu_duration_ns(), 0);

    // Results are not ready yet: the average is unchanged and no new
    // measurement is started.
    drain(&mut runtime);
    runtime.present(&DepthTracker::new());
    let commands = drain(&mut runtime);
    assert_eq!(count(&commands, |c| matches!(c, Command::BeginQuery(_))), 0);
    assert_eq!(runtime.technique("Blur").unwrap().gpu_duration_ns(), 0);

    runtime.device_mut().advance_frame();
    runtime.present(&DepthTracker::new());
    // One draw of 1000 ticks at 10 MHz.
    assert_eq!(runtime.technique("Blur").unwrap().gpu_duration_ns(), 100_000);
    assert_eq!(runtime.technique("Combine").unwrap().gpu_duration_ns(), 100_000);
}

#[test]
fn test_stencil_surface_is_cleared_once_per_technique() {
    let yaml = r#"
name: Stencil.fx
entry_points:
  - { name: VS, stage: vertex, bytecode: [1] }
  - { name: MaskPS, stage: pixel, bytecode: [2] }
  - { name: ApplyPS, stage: pixel, bytecode: [3] }
textures:
  - { unique_name: HalfTex, width: 64, height: 32, format: rgba8 }
techniques:
  - name: Masked
    passes:
      - { vs_entry_point: VS, ps_entry_point: MaskPS, stencil_enable: true, stencil_op_pass: replace, stencil_reference_value: 1 }
      - { vs_entry_point: VS, ps_entry_point: ApplyPS, stencil_enable: true, stencil_comparison_func: equal, stencil_reference_value: 1 }
      - { vs_entry_point: VS, ps_entry_point: ApplyPS, stencil_enable: true, render_target_names: [HalfTex] }
      - { vs_entry_point: VS, ps_entry_point: ApplyPS }
"#;
    let (mut runtime, _) = runtime(128, 64);
    runtime.load_effect(module(yaml)).unwrap();
    drain(&mut runtime);
    runtime.present(&DepthTracker::new());
    let commands = drain(&mut runtime);

    assert_eq!(count(&commands, |c| matches!(c, Command::ClearStencil { value: 0, .. })), 1);
    assert_eq!(
        count(&commands, |c| matches!(c, Command::SetRenderTargets { depth_stencil: Some(_), .. })),
        2
    );
    assert!(commands.contains(&Command::SetViewport { width: 64, height: 32 }));
    assert!(commands.contains(&Command::SetDepthStencilState {
        state: runtime.technique("Masked").unwrap().state().unwrap().passes[1].depth_stencil_state,
        stencil_reference: 1,
    }));
}

#[test]
fn test_clear_and_mip_regeneration_follow_the_draw() {
    let yaml = r#"
name: Mips.fx
entry_points:
  - { name: VS, stage: vertex, bytecode: [1] }
  - { name: DownPS, stage: pixel, bytecode: [2] }
textures:
  - { unique_name: LumaTex, width: 64, height: 64, levels: 3, format: r8 }
techniques:
  - name: Luma
    passes:
      - { vs_entry_point: VS, ps_entry_point: DownPS, render_target_names: [LumaTex], clear_render_targets: true, num_vertices: 6 }
"#;
    let (mut runtime, _) = runtime(128, 64);
    runtime.load_effect(module(yaml)).unwrap();
    let view = runtime.texture("LumaTex").unwrap().views().unwrap()[0];
    let state = runtime.technique("Luma").unwrap().state().unwrap();
    let target = state.passes[0].render_targets[0].unwrap();

    drain(&mut runtime);
    runtime.present(&DepthTracker::new());
    let commands = drain(&mut runtime);

    let clear = commands
        .iter()
        .position(|c| *c == Command::ClearRenderTarget { view: target, color: [0.0; 4] })
        .unwrap();
    let draw = commands.iter().position(|c| *c == Command::Draw { vertex_count: 6 }).unwrap();
    let mips = commands.iter().position(|c| *c == Command::GenerateMips { view }).unwrap();
    assert!(clear < draw && draw < mips);
    assert_eq!(runtime.frame_stats().vertices, 6);
}

#[test]
fn test_disabled_technique_is_skipped() {
    let (mut runtime, _) = runtime(128, 64);
    runtime.load_effect(module(CHAIN)).unwrap();
    assert!(runtime.set_technique_enabled("Blur", false));
    assert!(!runtime.set_technique_enabled("Missing", false));

    runtime.present(&DepthTracker::new());
    assert_eq!(runtime.frame_stats().drawcalls, 1);
}

#[test]
fn test_multisampled_swapchain_is_resolved_first() {
    let (mut runtime, backbuffer) = runtime_with(128, 64, Format::Rgba8Unorm, 4);
    runtime.load_effect(module(CHAIN)).unwrap();
    drain(&mut runtime);
    runtime.present(&DepthTracker::new());
    let commands = drain(&mut runtime);

    let Command::ResolveSubresource { dst, src, format } = commands[0] else {
        panic!("expected a resolve, got {:?}", commands[0]);
    };
    assert_eq!(src, backbuffer);
    assert_ne!(dst, backbuffer);
    assert_eq!(format, Format::Rgba8Unorm);

    let texture = runtime.backbuffer_texture().unwrap();
    assert!(matches!(commands.last(), Some(Command::CopyResource { dst, src: s }) if *dst == texture && *s != backbuffer));
}

#[test]
fn test_present_before_init_does_nothing() {
    let mut runtime = postfx_runtime::EffectRuntime::new(
        postfx_runtime::SoftwareDevice::new(),
        RuntimeConfig::default(),
    );
    runtime.present(&DepthTracker::new());
    assert!(runtime.device().commands().is_empty());
    assert!(matches!(
        runtime.load_effect(module(CHAIN)),
        Err(postfx_runtime::RuntimeError::NotInitialized)
    ));
}
