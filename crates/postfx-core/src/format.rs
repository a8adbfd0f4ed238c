//! Effect texture formats and device formats.
//!
//! # Types
//!
//! - [`TextureFormat`] - Format an effect declares for a texture
//! - [`Format`] - Concrete device format, including typeless and sRGB variants
//!
//! Effect textures are created with a typeless device format where one exists, so
//! that a "normal" and a gamma-encoded view can both be created on the same
//! resource:
//!
//! ```rust
//! use postfx_core::format::{Format, TextureFormat};
//!
//! let device = TextureFormat::Rgba8.device_format();
//! assert_eq!(device, Format::Rgba8Typeless);
//! assert_eq!(device.normal(), Format::Rgba8Unorm);
//! assert_eq!(device.srgb(), Format::Rgba8UnormSrgb);
//! ```

use serde::{Deserialize, Serialize};

/// Texture format as declared by an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    /// Single 8-bit unorm channel.
    R8,
    /// Single 16-bit float channel.
    R16f,
    /// Single 32-bit float channel.
    R32f,
    /// Two 8-bit unorm channels.
    Rg8,
    /// Two 16-bit unorm channels.
    Rg16,
    /// Two 16-bit float channels.
    Rg16f,
    /// Two 32-bit float channels.
    Rg32f,
    /// Four 8-bit unorm channels.
    #[default]
    Rgba8,
    /// Four 16-bit unorm channels.
    Rgba16,
    /// Four 16-bit float channels.
    Rgba16f,
    /// Four 32-bit float channels.
    Rgba32f,
    /// 10-bit color, 2-bit alpha.
    Rgb10a2,
}

impl TextureFormat {
    /// Device format used to allocate a texture of this format.
    pub const fn device_format(self) -> Format {
        match self {
            Self::R8 => Format::R8Unorm,
            Self::R16f => Format::R16Float,
            Self::R32f => Format::R32Float,
            Self::Rg8 => Format::Rg8Unorm,
            Self::Rg16 => Format::Rg16Unorm,
            Self::Rg16f => Format::Rg16Float,
            Self::Rg32f => Format::Rg32Float,
            Self::Rgba8 => Format::Rgba8Typeless,
            Self::Rgba16 => Format::Rgba16Unorm,
            Self::Rgba16f => Format::Rgba16Float,
            Self::Rgba32f => Format::Rgba32Float,
            Self::Rgb10a2 => Format::Rgb10a2Unorm,
        }
    }

    /// Channel count of the packed upload layout, or `None` if CPU upload
    /// is not supported for this format.
    ///
    /// Uploads always start from 4-channel 8-bit data.
    pub const fn upload_channels(self) -> Option<usize> {
        match self {
            Self::R8 => Some(1),
            Self::Rg8 => Some(2),
            Self::Rgba8 => Some(4),
            _ => None,
        }
    }
}

/// Concrete device format.
///
/// Variant names follow the usual `<channels><bits><numeric type>` naming.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Format {
    /// No format.
    #[default]
    Unknown,
    R8Unorm,
    R16Unorm,
    R16Float,
    R32Float,
    Rg8Unorm,
    Rg16Unorm,
    Rg16Float,
    Rg32Float,
    Rgba8Typeless,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Typeless,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
    Rgb10a2Unorm,
    R16Typeless,
    D16Unorm,
    R24G8Typeless,
    D24UnormS8Uint,
    R24UnormX8Typeless,
    R32Typeless,
    D32Float,
}

impl Format {
    /// Bytes per texel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Unknown => 0,
            Self::R8Unorm => 1,
            Self::R16Unorm | Self::R16Float | Self::Rg8Unorm | Self::R16Typeless | Self::D16Unorm => 2,
            Self::R32Float
            | Self::Rg16Unorm
            | Self::Rg16Float
            | Self::Rgba8Typeless
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Typeless
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10a2Unorm
            | Self::R24G8Typeless
            | Self::D24UnormS8Uint
            | Self::R24UnormX8Typeless
            | Self::R32Typeless
            | Self::D32Float => 4,
            Self::Rg32Float | Self::Rgba16Unorm | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Whether every channel is an 8-bit unorm value.
    pub const fn is_8bit_unorm(self) -> bool {
        matches!(
            self,
            Self::R8Unorm
                | Self::Rg8Unorm
                | Self::Rgba8Typeless
                | Self::Rgba8Unorm
                | Self::Rgba8UnormSrgb
                | Self::Bgra8Typeless
                | Self::Bgra8Unorm
                | Self::Bgra8UnormSrgb
        )
    }

    /// Whether this is a depth or depth-stencil format (including the
    /// typeless formats depth buffers are allocated with).
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Self::R16Typeless
                | Self::D16Unorm
                | Self::R24G8Typeless
                | Self::D24UnormS8Uint
                | Self::R24UnormX8Typeless
                | Self::R32Typeless
                | Self::D32Float
        )
    }

    /// Typeless variant sharing this format's memory layout.
    pub const fn typeless(self) -> Self {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb => Self::Rgba8Typeless,
            Self::Bgra8Unorm | Self::Bgra8UnormSrgb => Self::Bgra8Typeless,
            Self::D16Unorm | Self::R16Unorm => Self::R16Typeless,
            Self::D24UnormS8Uint | Self::R24UnormX8Typeless => Self::R24G8Typeless,
            Self::D32Float | Self::R32Float => Self::R32Typeless,
            other => other,
        }
    }

    /// Linear (non-sRGB) variant usable for shader reads and render targets.
    ///
    /// Depth formats map to their shader-readable color variant.
    pub const fn normal(self) -> Self {
        match self {
            Self::Rgba8Typeless | Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            Self::Bgra8Typeless | Self::Bgra8UnormSrgb => Self::Bgra8Unorm,
            Self::R16Typeless | Self::D16Unorm => Self::R16Unorm,
            Self::R24G8Typeless | Self::D24UnormS8Uint => Self::R24UnormX8Typeless,
            Self::R32Typeless | Self::D32Float => Self::R32Float,
            other => other,
        }
    }

    /// Gamma-encoded variant, or the format itself if none exists.
    pub const fn srgb(self) -> Self {
        match self {
            Self::Rgba8Typeless | Self::Rgba8Unorm => Self::Rgba8UnormSrgb,
            Self::Bgra8Typeless | Self::Bgra8Unorm => Self::Bgra8UnormSrgb,
            other => other,
        }
    }

    /// Color bit depth of a swapchain format.
    pub const fn color_bit_depth(self) -> u32 {
        match self {
            Self::Rgb10a2Unorm => 10,
            _ => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_share_layout() {
        for format in [
            Format::Rgba8Unorm,
            Format::Bgra8UnormSrgb,
            Format::D24UnormS8Uint,
            Format::D32Float,
            Format::Rgba16Float,
        ] {
            assert_eq!(format.typeless().bytes_per_pixel(), format.bytes_per_pixel());
            assert_eq!(format.normal().bytes_per_pixel(), format.bytes_per_pixel());
            assert_eq!(format.srgb().bytes_per_pixel(), format.bytes_per_pixel());
        }
    }

    #[test]
    fn srgb_only_for_8bit_color() {
        assert_eq!(Format::Rgba16Float.srgb(), Format::Rgba16Float);
        assert_eq!(Format::R8Unorm.srgb(), Format::R8Unorm);
        assert_eq!(Format::Bgra8Typeless.srgb(), Format::Bgra8UnormSrgb);
    }

    #[test]
    fn depth_formats_read_as_color() {
        assert_eq!(Format::R24G8Typeless.normal(), Format::R24UnormX8Typeless);
        assert_eq!(Format::R32Typeless.normal(), Format::R32Float);
        assert!(Format::R24G8Typeless.is_depth());
        assert!(!Format::Rgba8Unorm.is_depth());
    }

    #[test]
    fn upload_channels() {
        assert_eq!(TextureFormat::R8.upload_channels(), Some(1));
        assert_eq!(TextureFormat::Rg8.upload_channels(), Some(2));
        assert_eq!(TextureFormat::Rgba8.upload_channels(), Some(4));
        assert_eq!(TextureFormat::Rgba16f.upload_channels(), None);
    }
}
