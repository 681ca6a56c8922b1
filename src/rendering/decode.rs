//! Image decoding surface (bytes → RGBA bitmap)

use crate::traits::ImageDecoder;
use crate::{Error, Result};

/// Decoded RGBA8 pixels of one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| Error::Decode(format!("bitmap {}x{} is too large", width, height)))?;
        if pixels.len() != expected {
            return Err(Error::Decode(format!(
                "bitmap {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A bitmap filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Decoder backed by the `image` crate; handles WebP, PNG and JPEG tiles.
#[cfg(feature = "render")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

#[cfg(feature = "render")]
impl ImageDecoder for ImageCrateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| Error::Decode(format!("Failed to load image: {}", e)))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Bitmap {
            width,
            height,
            pixels: img.into_raw(),
        })
    }
}

/// Decoder for tiles that are already raw RGBA8, prefixed with their
/// dimensions as two little-endian u32 values.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawRgbaDecoder;

impl RawRgbaDecoder {
    pub fn encode(bitmap: &Bitmap) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + bitmap.pixels.len());
        out.extend_from_slice(&bitmap.width.to_le_bytes());
        out.extend_from_slice(&bitmap.height.to_le_bytes());
        out.extend_from_slice(&bitmap.pixels);
        out
    }
}

impl ImageDecoder for RawRgbaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap> {
        if bytes.len() < 8 {
            return Err(Error::Decode(format!("raw tile too short: {} bytes", bytes.len())));
        }
        let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let height = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Bitmap::new(width, height, bytes[8..].to_vec())
    }
}
