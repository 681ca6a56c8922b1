use crate::rendering::texture::TextureId;
use crate::traits::TextureSurface;
use crate::Result;

/// Bounded free-list of tile-sized texture handles.
///
/// Released handles are parked here instead of destroyed so the next upload
/// can skip texture allocation. When the pool is full the handle is destroyed.
#[derive(Debug)]
pub struct TexturePool {
    free: Vec<TextureId>,
    capacity: usize,
    tile_size: u32,
}

impl TexturePool {
    pub fn new(capacity: usize, tile_size: u32) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
            tile_size,
        }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn acquire(&mut self, surface: &mut dyn TextureSurface) -> Result<TextureId> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        surface.create_texture(self.tile_size, self.tile_size)
    }

    pub fn release(&mut self, surface: &mut dyn TextureSurface, texture: TextureId) {
        if self.free.len() < self.capacity {
            self.free.push(texture);
        } else {
            surface.destroy(texture);
        }
    }

    /// Destroy every pooled handle and switch to a new tile size.
    pub fn reset(&mut self, surface: &mut dyn TextureSurface, tile_size: u32) {
        for id in self.free.drain(..) {
            surface.destroy(id);
        }
        self.tile_size = tile_size;
    }
}
