//! postfx - offline runner for post-processing effect modules
//!
//! Loads compiled effect module descriptions and drives the effect runtime
//! over the software reference device.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "postfx")]
#[command(author, version, about = "Offline runner for post-processing effect modules")]
#[command(long_about = "
Loads compiled effect module descriptions (YAML) and executes them over the
software reference device, reporting activation errors, GPU timings and the
selected scene depth buffer.

Examples:
  postfx inspect Bloom.yaml             # Show techniques, passes, bindings
  postfx run Bloom.yaml                 # Run 60 frames at 1920x1080
  postfx run Bloom.yaml Tonemap.yaml -n 120 -W 2560 -H 1440
  postfx run Bloom.yaml --samples 4 --config postfx.yaml
  postfx -v run Bloom.yaml --disable BloomBlur
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute effect modules for a number of frames
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Display module contents
    #[command(visible_alias = "i")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Effect module description(s), loaded in order
    #[arg(required = true)]
    modules: Vec<PathBuf>,

    /// Number of frames to present
    #[arg(short = 'n', long, default_value = "60")]
    frames: u32,

    /// Backbuffer width
    #[arg(short = 'W', long, default_value = "1920")]
    width: u32,

    /// Backbuffer height
    #[arg(short = 'H', long, default_value = "1080")]
    height: u32,

    /// Swapchain sample count
    #[arg(long, default_value = "1")]
    samples: u32,

    /// Runtime configuration file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Technique(s) to disable before the first frame
    #[arg(long)]
    disable: Vec<String>,
}

#[derive(Args)]
struct InspectArgs {
    /// Effect module description(s)
    #[arg(required = true)]
    modules: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.verbose),
        Commands::Inspect(args) => commands::inspect::run(args, cli.verbose),
    }
}
