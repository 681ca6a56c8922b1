//! GTPK tile archive: a whole pyramid in one buffer.
//!
//! ```text
//! header  16 bytes   magic "GTPK" (u32 LE) | version (u32 LE) | tile count (u32 LE) | tile size (u32 LE)
//! index   13 bytes   z (u8) | x (u16 LE) | y (u16 LE) | offset (u32 LE) | length (u32 LE), per tile
//! data               concatenated image blobs, addressed by absolute offset
//! ```

use crate::core::constants::{PACK_HEADER_LEN, PACK_INDEX_ENTRY_LEN, PACK_MAGIC, PACK_VERSION};
use crate::core::geo::TileKey;
use crate::prelude::HashMap;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlobRef {
    offset: usize,
    length: usize,
}

/// Parsed, validated GTPK archive.
#[derive(Debug, Clone)]
pub struct TilePack {
    data: Vec<u8>,
    index: HashMap<TileKey, BlobRef>,
    tile_size: u32,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl TilePack {
    /// Parse `data`, rejecting a wrong magic or version, a truncated header
    /// or index, and index entries that point outside the buffer.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        if data.len() < PACK_HEADER_LEN {
            return Err(Error::InvalidPack(format!(
                "header truncated: {} of {} bytes",
                data.len(),
                PACK_HEADER_LEN
            )));
        }
        let magic = read_u32(&data, 0);
        if magic != PACK_MAGIC {
            return Err(Error::InvalidPack(format!("bad magic {:#010x}", magic)));
        }
        let version = read_u32(&data, 4);
        if version != PACK_VERSION {
            return Err(Error::InvalidPack(format!("unsupported version {}", version)));
        }
        let count = read_u32(&data, 8) as usize;
        let tile_size = read_u32(&data, 12);

        let index_end = count
            .checked_mul(PACK_INDEX_ENTRY_LEN)
            .and_then(|len| len.checked_add(PACK_HEADER_LEN))
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::InvalidPack(format!("index of {} entries is truncated", count)))?;

        let mut index = HashMap::default();
        for entry in data[PACK_HEADER_LEN..index_end].chunks_exact(PACK_INDEX_ENTRY_LEN) {
            let key = TileKey::new(entry[0], read_u16(entry, 1) as u32, read_u16(entry, 3) as u32);
            let blob = BlobRef {
                offset: read_u32(entry, 5) as usize,
                length: read_u32(entry, 9) as usize,
            };
            if blob.offset.checked_add(blob.length).map_or(true, |end| end > data.len()) {
                return Err(Error::InvalidPack(format!(
                    "tile {} points past the end of the archive",
                    key
                )));
            }
            index.insert(key, blob);
        }

        log::debug!("parsed tile pack: {} tiles of {}px", index.len(), tile_size);
        Ok(Self {
            data,
            index,
            tile_size,
        })
    }

    /// Encoded bytes of `key`, or `None` if the archive has no such tile.
    pub fn get_blob(&self, key: &TileKey) -> Option<&[u8]> {
        self.index
            .get(key)
            .map(|blob| &self.data[blob.offset..blob.offset + blob.length])
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TileKey> {
        self.index.keys()
    }

    /// Highest level present in the archive.
    pub fn max_level(&self) -> Option<u8> {
        self.index.keys().map(|k| k.level).max()
    }
}

/// Writes GTPK archives.
#[derive(Debug, Clone, Default)]
pub struct TilePackBuilder {
    tile_size: u32,
    tiles: Vec<(TileKey, Vec<u8>)>,
}

impl TilePackBuilder {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size,
            tiles: Vec::new(),
        }
    }

    /// Add a tile. Coordinates must fit the index format (`x`, `y` < 65536).
    pub fn add(&mut self, key: TileKey, blob: impl Into<Vec<u8>>) -> Result<&mut Self> {
        if key.x > u16::MAX as u32 || key.y > u16::MAX as u32 {
            return Err(Error::InvalidPack(format!("tile {} does not fit a 16-bit index", key)));
        }
        self.tiles.push((key, blob.into()));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let data_start = PACK_HEADER_LEN + self.tiles.len() * PACK_INDEX_ENTRY_LEN;
        let data_len: usize = self.tiles.iter().map(|(_, blob)| blob.len()).sum();
        if data_start + data_len > u32::MAX as usize {
            return Err(Error::InvalidPack("archive exceeds 4 GiB".into()));
        }

        let mut out = Vec::with_capacity(data_start + data_len);
        out.extend_from_slice(&PACK_MAGIC.to_le_bytes());
        out.extend_from_slice(&PACK_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tiles.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.tile_size.to_le_bytes());

        let mut offset = data_start;
        for (key, blob) in &self.tiles {
            out.push(key.level);
            out.extend_from_slice(&(key.x as u16).to_le_bytes());
            out.extend_from_slice(&(key.y as u16).to_le_bytes());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
            offset += blob.len();
        }
        for (_, blob) in &self.tiles {
            out.extend_from_slice(blob);
        }
        Ok(out)
    }
}
