//! Texture surfaces: a CPU-side one for headless use and a `wgpu` one
//! for real rendering.

use crate::prelude::HashMap;
use crate::rendering::decode::Bitmap;
use crate::traits::TextureSurface;
use crate::{Error, Result};

/// Opaque handle to a texture living on some [`TextureSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn check_fits(texture: TextureId, tex_size: (u32, u32), bitmap: &Bitmap) -> Result<()> {
    if bitmap.width > tex_size.0 || bitmap.height > tex_size.1 {
        return Err(Error::Texture(format!(
            "bitmap {}x{} does not fit texture {:?} ({}x{})",
            bitmap.width, bitmap.height, texture, tex_size.0, tex_size.1
        )));
    }
    Ok(())
}

/// A texture held in main memory.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTexture {
    pub width: u32,
    pub height: u32,
    /// Size of the last upload; may be smaller than the texture at image edges
    pub uploaded: Option<(u32, u32)>,
    pub pixels: Vec<u8>,
    pub mipmapped: bool,
}

/// CPU implementation of [`TextureSurface`], used in headless mode.
///
/// An optional slot limit mimics a GPU that has run out of texture memory.
#[derive(Debug, Default)]
pub struct MemoryTextureSurface {
    textures: HashMap<TextureId, MemoryTexture>,
    next_id: u64,
    max_textures: Option<usize>,
    created: usize,
    destroyed: usize,
}

impl MemoryTextureSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot_limit(max_textures: usize) -> Self {
        Self {
            max_textures: Some(max_textures),
            ..Self::default()
        }
    }

    pub fn texture(&self, id: TextureId) -> Option<&MemoryTexture> {
        self.textures.get(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed
    }
}

impl TextureSurface for MemoryTextureSurface {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
        if let Some(max) = self.max_textures {
            if self.textures.len() >= max {
                return Err(Error::Texture(format!("no free texture slot ({max} in use)")));
            }
        }
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.textures.insert(
            id,
            MemoryTexture {
                width,
                height,
                uploaded: None,
                pixels: vec![0; width as usize * height as usize * 4],
                mipmapped: false,
            },
        );
        Ok(id)
    }

    fn upload(&mut self, texture: TextureId, bitmap: &Bitmap) -> Result<()> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| Error::Texture(format!("unknown texture {:?}", texture)))?;
        check_fits(texture, (tex.width, tex.height), bitmap)?;

        let row = bitmap.width as usize * 4;
        let stride = tex.width as usize * 4;
        for y in 0..bitmap.height as usize {
            let src = &bitmap.pixels[y * row..(y + 1) * row];
            tex.pixels[y * stride..y * stride + row].copy_from_slice(src);
        }
        tex.uploaded = Some((bitmap.width, bitmap.height));
        tex.mipmapped = false;
        Ok(())
    }

    fn destroy(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            self.destroyed += 1;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        let tex = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| Error::Texture(format!("unknown texture {:?}", texture)))?;
        tex.mipmapped = mip_level_count(tex.width, tex.height) > 1;
        Ok(())
    }
}

#[cfg(feature = "render")]
pub use gpu::WgpuTextureSurface;

#[cfg(feature = "render")]
mod gpu {
    use super::*;
    use std::sync::Arc;

    struct GpuTexture {
        texture: wgpu::Texture,
        view: wgpu::TextureView,
        width: u32,
        height: u32,
        mip_levels: u32,
    }

    /// [`TextureSurface`] on top of a `wgpu` device.
    ///
    /// Mip levels are produced on the CPU from the last uploaded bitmap and
    /// written level by level, so no extra render pipeline is needed.
    pub struct WgpuTextureSurface {
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        format: wgpu::TextureFormat,
        textures: HashMap<TextureId, GpuTexture>,
        /// Level-0 pixels kept until mipmaps are generated
        mip_sources: HashMap<TextureId, image::RgbaImage>,
        next_id: u64,
        max_textures: Option<usize>,
    }

    impl WgpuTextureSurface {
        pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
            Self {
                device,
                queue,
                format: wgpu::TextureFormat::Rgba8UnormSrgb,
                textures: HashMap::default(),
                mip_sources: HashMap::default(),
                next_id: 0,
                max_textures: None,
            }
        }

        pub fn with_slot_limit(mut self, max_textures: usize) -> Self {
            self.max_textures = Some(max_textures);
            self
        }

        /// View for binding `texture` in a draw call.
        pub fn view(&self, texture: TextureId) -> Option<&wgpu::TextureView> {
            self.textures.get(&texture).map(|t| &t.view)
        }

        fn write_level(&self, texture: &wgpu::Texture, mip_level: u32, img: &image::RgbaImage) {
            let (width, height) = img.dimensions();
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture,
                    mip_level,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                img.as_raw(),
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * width),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    impl TextureSurface for WgpuTextureSurface {
        fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId> {
            if let Some(max) = self.max_textures {
                if self.textures.len() >= max {
                    return Err(Error::Texture(format!("no free texture slot ({max} in use)")));
                }
            }
            let id = TextureId(self.next_id);
            self.next_id += 1;

            let mip_levels = mip_level_count(width, height);
            let label = format!("tilescope_tile_{}", id.0);
            let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: mip_levels,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: self.format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.textures.insert(
                id,
                GpuTexture {
                    texture,
                    view,
                    width,
                    height,
                    mip_levels,
                },
            );
            Ok(id)
        }

        fn upload(&mut self, texture: TextureId, bitmap: &Bitmap) -> Result<()> {
            let tex = self
                .textures
                .get(&texture)
                .ok_or_else(|| Error::Texture(format!("unknown texture {:?}", texture)))?;
            check_fits(texture, (tex.width, tex.height), bitmap)?;

            let img = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.pixels.clone())
                .ok_or_else(|| Error::Texture("bitmap buffer does not match its size".into()))?;
            let mip_levels = tex.mip_levels;
            self.write_level(&tex.texture, 0, &img);
            if mip_levels > 1 {
                self.mip_sources.insert(texture, img);
            }
            Ok(())
        }

        fn destroy(&mut self, texture: TextureId) {
            self.mip_sources.remove(&texture);
            if let Some(tex) = self.textures.remove(&texture) {
                tex.texture.destroy();
            }
        }

        fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
            let Some(mut level_img) = self.mip_sources.remove(&texture) else {
                return Ok(());
            };
            let tex = self
                .textures
                .get(&texture)
                .ok_or_else(|| Error::Texture(format!("unknown texture {:?}", texture)))?;

            for mip_level in 1..tex.mip_levels {
                let (w, h) = level_img.dimensions();
                if w == 1 && h == 1 {
                    break;
                }
                level_img = image::imageops::resize(
                    &level_img,
                    (w / 2).max(1),
                    (h / 2).max(1),
                    image::imageops::FilterType::Triangle,
                );
                self.write_level(&tex.texture, mip_level, &level_img);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(300, 20), 9);
    }

    #[test]
    fn test_memory_surface_upload_partial_tile() {
        let mut surface = MemoryTextureSurface::new();
        let id = surface.create_texture(4, 4).unwrap();
        surface.upload(id, &Bitmap::solid(2, 1, [7, 7, 7, 255])).unwrap();

        let tex = surface.texture(id).unwrap();
        assert_eq!(tex.uploaded, Some((2, 1)));
        assert_eq!(&tex.pixels[0..8], &[7, 7, 7, 255, 7, 7, 7, 255]);
        assert_eq!(&tex.pixels[8..12], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_memory_surface_rejects_oversized_bitmap() {
        let mut surface = MemoryTextureSurface::new();
        let id = surface.create_texture(2, 2).unwrap();
        assert!(surface.upload(id, &Bitmap::solid(3, 2, [0; 4])).is_err());
        assert!(surface.upload(TextureId(99), &Bitmap::solid(1, 1, [0; 4])).is_err());
    }

    #[test]
    fn test_memory_surface_slot_limit() {
        let mut surface = MemoryTextureSurface::with_slot_limit(1);
        let id = surface.create_texture(2, 2).unwrap();
        assert!(matches!(surface.create_texture(2, 2), Err(Error::Texture(_))));

        surface.destroy(id);
        assert_eq!(surface.destroyed(), 1);
        assert!(surface.create_texture(2, 2).is_ok());
        assert_eq!(surface.created(), 2);
    }

    #[test]
    fn test_memory_surface_mipmaps() {
        let mut surface = MemoryTextureSurface::new();
        let id = surface.create_texture(8, 8).unwrap();
        surface.upload(id, &Bitmap::solid(8, 8, [1; 4])).unwrap();
        assert!(!surface.texture(id).unwrap().mipmapped);
        surface.generate_mipmaps(id).unwrap();
        assert!(surface.texture(id).unwrap().mipmapped);
    }
}
