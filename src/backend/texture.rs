// Model texture: decoded pixels plus a sampled GPU image

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::image::GpuImage;
use super::transfer::OneTimeCommands;
use super::VulkanDevice;

/// Tightly packed RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .with_context(|| format!("Failed to decode texture {:?}", path))?
            .to_rgba8();

        let (width, height) = decoded.dimensions();
        log::info!("Loaded texture {:?} ({}x{})", path, width, height);

        Ok(Self {
            width,
            height,
            pixels: decoded.into_raw(),
        })
    }

    /// Black and white squares, `cells` per side
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x / cell + y / cell) % 2 == 0))
            .flat_map(|light| if light { [255u8; 4] } else { [32, 32, 32, 255] })
            .collect();

        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }
}

pub struct Texture {
    pub image: GpuImage,
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn upload(device: Arc<VulkanDevice>, commands: &OneTimeCommands, data: &TextureData) -> Result<Self> {
        let image = GpuImage::sampled_rgba8(device.clone(), commands, data.extent(), &data.pixels)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.properties.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self {
            image,
            sampler,
            device,
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_is_rgba8_sized() {
        let data = TextureData::checkerboard(64, 8);
        assert_eq!(data.pixels.len(), 64 * 64 * 4);
        assert_eq!(data.extent(), vk::Extent2D { width: 64, height: 64 });
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let data = TextureData::checkerboard(4, 2);
        let texel = |x: usize, y: usize| &data.pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(0, 0), &[255, 255, 255, 255]);
        assert_eq!(texel(2, 0), &[32, 32, 32, 255]);
        assert_eq!(texel(2, 2), &[255, 255, 255, 255]);
    }

    #[test]
    fn missing_texture_file_is_an_error() {
        assert!(TextureData::load("no/such/texture.png").is_err());
    }
}
