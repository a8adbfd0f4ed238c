//! Inspect command: lists what a module declares.

use crate::InspectArgs;
use anyhow::Result;
use postfx_core::{EffectModule, TextureReference};

/// Runs the inspect command.
///
/// Pass render state is only listed when verbose.
pub fn run(args: InspectArgs, verbose: bool) -> Result<()> {
    for (i, path) in args.modules.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let module = super::load_module(path)?;
        println!("{}", path.display());
        print_module(&module, verbose);
    }
    Ok(())
}

fn print_module(module: &EffectModule, verbose: bool) {
    println!("  Name:          {}", module.name);
    println!("  Sampler slots: {}", module.num_sampler_bindings);
    println!("  Texture slots: {}", module.num_texture_bindings);
    println!("  Uniform bytes: {}", module.uniform_data.len());

    println!("  Entry points:");
    for entry in &module.entry_points {
        println!("    {:<24} {:<6} {} bytes", entry.name, entry.stage.name(), entry.bytecode.len());
    }

    println!("  Textures:");
    for texture in &module.textures {
        match texture.reference {
            TextureReference::None => println!(
                "    {:<24} {}x{} {:?}, {} level(s)",
                texture.unique_name, texture.width, texture.height, texture.format, texture.levels
            ),
            reference => println!("    {:<24} -> {:?}", texture.unique_name, reference),
        }
    }

    println!("  Samplers:");
    for sampler in &module.samplers {
        println!(
            "    {:<24} s{} t{} {}{}",
            sampler.unique_name,
            sampler.binding,
            sampler.texture_binding,
            sampler.texture_name,
            if sampler.srgb { " (srgb)" } else { "" }
        );
    }

    println!("  Techniques:");
    for technique in &module.techniques {
        let state = if technique.enabled { "" } else { " (disabled)" };
        println!("    {}{}", technique.name, state);
        for (index, pass) in technique.passes.iter().enumerate() {
            let targets = if pass.targets_backbuffer() {
                "<backbuffer>".to_string()
            } else {
                pass.render_target_names.join(", ")
            };
            println!(
                "      pass {}: {} / {} -> {}",
                index, pass.vs_entry_point, pass.ps_entry_point, targets
            );
            if verbose {
                if pass.viewport_width != 0 && pass.viewport_height != 0 {
                    println!("        viewport: {}x{}", pass.viewport_width, pass.viewport_height);
                }
                if pass.blend_enable {
                    println!(
                        "        blend: {:?} {:?} {:?}",
                        pass.src_blend, pass.blend_op, pass.dest_blend
                    );
                }
                if pass.stencil_enable {
                    println!(
                        "        stencil: {:?} ref {}",
                        pass.stencil_comparison_func, pass.stencil_reference_value
                    );
                }
                if pass.clear_render_targets {
                    println!("        clears targets");
                }
            }
        }
    }
}
