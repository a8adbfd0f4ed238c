//! CLI command implementations

pub mod inspect;
pub mod run;

use anyhow::{Context, Result};
use postfx_core::EffectModule;
use std::path::Path;

/// Load a module description from path
pub fn load_module(path: &Path) -> Result<EffectModule> {
    EffectModule::load(path).with_context(|| format!("Failed to load module: {}", path.display()))
}

/// Format a nanosecond duration for display
pub fn format_duration(ns: u64) -> String {
    if ns >= 1_000_000 {
        format!("{:.3} ms", ns as f64 / 1_000_000.0)
    } else {
        format!("{:.1} us", ns as f64 / 1_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(100_000), "100.0 us");
        assert_eq!(format_duration(2_500_000), "2.500 ms");
    }
}
