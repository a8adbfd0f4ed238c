//! Device objects backing effect-owned textures, and CPU uploads into them.
//!
//! Every owned texture gets a resource with a typeless format where one
//! exists, plus a pair of shader views: `[linear, gamma-encoded]`. When the
//! format has no gamma-encoded variant both entries hold the same view.
//! Render target views are created on demand by the pass builder.

use std::borrow::Cow;

use postfx_core::TextureInfo;
use rayon::prelude::*;
use tracing::{error, trace};

use crate::backend::{
    DeviceObject, GpuDevice, RenderTargetView, ResourceId, ShaderView, TextureDesc, TextureUsage,
};
use crate::error::{RuntimeError, RuntimeResult};

/// Device objects of one effect-owned texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedTexture {
    pub resource: ResourceId,
    /// `[linear, gamma-encoded]` shader views.
    pub srv: [ShaderView; 2],
    /// `[linear, gamma-encoded]` render target views, created on first use.
    pub rtv: [Option<RenderTargetView>; 2],
}

impl OwnedTexture {
    /// Creates the resource and its shader views.
    pub fn create<D: GpuDevice>(device: &mut D, info: &TextureInfo) -> RuntimeResult<Self> {
        let format = info.format.device_format();
        let desc = TextureDesc {
            levels: info.levels,
            ..TextureDesc::new(info.width, info.height, format, TextureUsage::EFFECT_TEXTURE)
        };

        let resource = device
            .create_texture(&desc)
            .map_err(|source| RuntimeError::TextureCreation {
                name: info.unique_name.clone(),
                width: info.width,
                height: info.height,
                levels: info.levels,
                format,
                source,
            })?;

        let levels = device
            .texture_desc(resource)
            .map_or(info.levels.max(1), |desc| desc.levels);

        let linear = match device.create_shader_view(resource, format.normal(), levels) {
            Ok(view) => view,
            Err(source) => {
                device.release(DeviceObject::Texture(resource));
                return Err(RuntimeError::ShaderViewCreation {
                    name: info.unique_name.clone(),
                    format: format.normal(),
                    source,
                });
            }
        };

        let srgb = if format.srgb() != format.normal() {
            match device.create_shader_view(resource, format.srgb(), levels) {
                Ok(view) => view,
                Err(source) => {
                    device.release(DeviceObject::ShaderView(linear));
                    device.release(DeviceObject::Texture(resource));
                    return Err(RuntimeError::ShaderViewCreation {
                        name: info.unique_name.clone(),
                        format: format.srgb(),
                        source,
                    });
                }
            }
        } else {
            linear
        };

        trace!(name = %info.unique_name, width = info.width, height = info.height, levels, "texture created");
        Ok(Self {
            resource,
            srv: [linear, srgb],
            rtv: [None, None],
        })
    }

    /// Render target view for `srgb`, creating it on first use. A newly
    /// created view is cleared to transparent black.
    pub fn render_target<D: GpuDevice>(
        &mut self,
        device: &mut D,
        name: &str,
        srgb: bool,
    ) -> RuntimeResult<RenderTargetView> {
        let slot = usize::from(srgb);
        if let Some(view) = self.rtv[slot] {
            return Ok(view);
        }

        let format = device
            .texture_desc(self.resource)
            .map(|desc| if srgb { desc.format.srgb() } else { desc.format.normal() })
            .ok_or_else(|| RuntimeError::UnknownTexture { name: name.to_string() })?;

        let view = device
            .create_render_target_view(self.resource, format)
            .map_err(|source| RuntimeError::RenderTargetViewCreation {
                name: name.to_string(),
                format,
                source,
            })?;
        device.clear_render_target(view, [0.0; 4]);
        self.rtv[slot] = Some(view);
        Ok(view)
    }

    /// Whether the resource has more than one mip level.
    pub fn has_mips<D: GpuDevice>(&self, device: &D) -> bool {
        device.texture_desc(self.resource).is_some_and(|desc| desc.levels > 1)
    }

    /// Releases all views and the resource.
    pub fn release<D: GpuDevice>(self, device: &mut D) {
        for view in self.rtv.into_iter().flatten() {
            device.release(DeviceObject::RenderTargetView(view));
        }
        if self.srv[1] != self.srv[0] {
            device.release(DeviceObject::ShaderView(self.srv[1]));
        }
        device.release(DeviceObject::ShaderView(self.srv[0]));
        device.release(DeviceObject::Texture(self.resource));
    }
}

/// Converts 4-channel 8-bit pixels into the texel layout of `info.format`.
///
/// Only single, dual and quad channel 8-bit formats can be uploaded.
pub fn pack_upload<'a>(info: &TextureInfo, pixels: &'a [u8]) -> RuntimeResult<Cow<'a, [u8]>> {
    let Some(channels) = info.format.upload_channels() else {
        error!(name = %info.unique_name, format = ?info.format, "texture upload is not supported for this format");
        return Err(RuntimeError::UnsupportedUploadFormat {
            name: info.unique_name.clone(),
            format: info.format.device_format(),
        });
    };

    let texel_count = info.width as usize * info.height as usize;
    let expected = texel_count * 4;
    if pixels.len() != expected {
        return Err(RuntimeError::UploadSizeMismatch {
            name: info.unique_name.clone(),
            expected,
            actual: pixels.len(),
        });
    }

    if channels == 4 {
        return Ok(Cow::Borrowed(pixels));
    }

    let mut packed = vec![0u8; texel_count * channels];
    packed
        .par_chunks_exact_mut(channels)
        .zip(pixels.par_chunks_exact(4))
        .for_each(|(dst, src)| dst.copy_from_slice(&src[..channels]));
    Ok(Cow::Owned(packed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ObjectKind, SoftwareDevice};
    use postfx_core::TextureFormat;

    #[test]
    fn rgba8_gets_two_views() {
        let mut device = SoftwareDevice::new();
        let tex = OwnedTexture::create(&mut device, &TextureInfo::new("Tex", 8, 8, TextureFormat::Rgba8)).unwrap();
        assert_ne!(tex.srv[0], tex.srv[1]);
        tex.release(&mut device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn float_format_reuses_linear_view() {
        let mut device = SoftwareDevice::new();
        let info = TextureInfo::new("Tex", 8, 8, TextureFormat::Rgba16f);
        let mut tex = OwnedTexture::create(&mut device, &info).unwrap();
        assert_eq!(tex.srv[0], tex.srv[1]);

        let rtv = tex.render_target(&mut device, "Tex", false).unwrap();
        assert_eq!(tex.render_target(&mut device, "Tex", false).unwrap(), rtv);
        assert_eq!(device.live_objects(), 3);
        tex.release(&mut device);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn view_failure_releases_resource() {
        let mut device = SoftwareDevice::new();
        device.fail_next(ObjectKind::ShaderView);
        let err = OwnedTexture::create(&mut device, &TextureInfo::new("Tex", 8, 8, TextureFormat::Rgba8)).unwrap_err();
        assert!(matches!(err, RuntimeError::ShaderViewCreation { .. }));
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn creation_error_names_texture_and_parameters() {
        let mut device = SoftwareDevice::new();
        device.fail_next(ObjectKind::Texture);
        let info = TextureInfo::new("BloomTex", 960, 540, TextureFormat::Rgba16f).with_levels(4);
        let message = OwnedTexture::create(&mut device, &info).unwrap_err().to_string();
        assert!(message.contains("BloomTex"));
        assert!(message.contains("width = 960"));
        assert!(message.contains("levels = 4"));
    }

    #[test]
    fn pack_r8_keeps_first_channel() {
        let info = TextureInfo::new("Mask", 2, 1, TextureFormat::R8);
        let packed = pack_upload(&info, &[10, 20, 30, 40, 50, 60, 70, 80]).unwrap();
        assert_eq!(&*packed, &[10, 50]);
    }

    #[test]
    fn pack_rejects_float_formats() {
        let info = TextureInfo::new("Hdr", 1, 1, TextureFormat::Rgba16f);
        assert!(matches!(
            pack_upload(&info, &[0; 4]),
            Err(RuntimeError::UnsupportedUploadFormat { .. })
        ));
    }

    #[test]
    fn pack_checks_size() {
        let info = TextureInfo::new("Tex", 2, 2, TextureFormat::Rgba8);
        assert!(matches!(
            pack_upload(&info, &[0; 4]),
            Err(RuntimeError::UploadSizeMismatch { expected: 16, actual: 4, .. })
        ));
    }
}
