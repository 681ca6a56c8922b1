pub mod compositor;
pub mod decode;
pub mod plan;
pub mod texture;

// Re-export main types
pub use compositor::{CoverageReport, FramePlan, LevelCompositor, TileRequest};
pub use decode::{Bitmap, RawRgbaDecoder};
pub use plan::{DeviceRect, DrawCommand, DrawPlan, FilterMode};
pub use texture::{MemoryTextureSurface, TextureId};

#[cfg(feature = "render")]
pub use decode::ImageCrateDecoder;
#[cfg(feature = "render")]
pub use texture::WgpuTextureSurface;
