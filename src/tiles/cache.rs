use fxhash::FxBuildHasher;
use lru::LruCache;

use crate::core::geo::TileKey;
use crate::prelude::HashSet;
use crate::rendering::decode::Bitmap;
use crate::rendering::texture::TextureId;
use crate::tiles::pool::TexturePool;
use crate::traits::{CacheBackend, TextureSurface};
use crate::Result;

/// Lifecycle of a cached tile: `(absent) → Loading → Ready | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Loading,
    Ready {
        texture: TextureId,
        width: u32,
        height: u32,
    },
    /// Terminal: the tile is never re-requested and renders nothing
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRecord {
    pub status: TileStatus,
    pub last_used_frame: Option<u64>,
    pub pinned: bool,
}

impl TileRecord {
    fn new(status: TileStatus, pinned: bool) -> Self {
        Self {
            status,
            last_used_frame: None,
            pinned,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, TileStatus::Ready { .. })
    }

    pub fn is_loading(&self) -> bool {
        self.status == TileStatus::Loading
    }

    pub fn is_error(&self) -> bool {
        self.status == TileStatus::Error
    }

    pub fn texture(&self) -> Option<TextureId> {
        match self.status {
            TileStatus::Ready { texture, .. } => Some(texture),
            _ => None,
        }
    }
}

/// Tile-key → texture-record cache with pinning and LRU eviction.
///
/// Owns the texture surface and a pool of recycled tile-sized handles.
/// `Loading` and pinned records are never evicted, nor are records used in
/// the frame being evicted, so the cache may sit above capacity while they
/// are outstanding.
pub struct TileCache {
    /// Unbounded LRU; capacity is enforced by [`evict_if_needed`](CacheBackend::evict_if_needed)
    records: LruCache<TileKey, TileRecord, FxBuildHasher>,
    /// Pins requested before the record existed
    deferred_pins: HashSet<TileKey>,
    capacity: usize,
    pool: TexturePool,
    surface: Box<dyn TextureSurface>,
}

impl TileCache {
    pub fn new(capacity: usize, pool_size: usize, tile_size: u32, surface: Box<dyn TextureSurface>) -> Self {
        Self {
            records: LruCache::unbounded_with_hasher(FxBuildHasher::default()),
            deferred_pins: HashSet::default(),
            capacity: capacity.max(1),
            pool: TexturePool::new(pool_size, tile_size),
            surface,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pinned_count(&self) -> usize {
        self.records.iter().filter(|(_, r)| r.pinned).count()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn tile_size(&self) -> u32 {
        self.pool.tile_size()
    }

    pub fn is_deferred_pin(&self, key: &TileKey) -> bool {
        self.deferred_pins.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &TileRecord)> {
        self.records.iter()
    }

    pub fn surface(&self) -> &dyn TextureSurface {
        self.surface.as_ref()
    }

    /// Drop every record and pooled handle, e.g. when the tile source changes.
    pub fn clear(&mut self, tile_size: u32) {
        let textures: Vec<TextureId> = self.records.iter().filter_map(|(_, r)| r.texture()).collect();
        for texture in textures {
            self.surface.destroy(texture);
        }
        self.records.clear();
        self.deferred_pins.clear();
        self.pool.reset(self.surface.as_mut(), tile_size);
    }

    fn recycle(&mut self, texture: TextureId) {
        self.pool.release(self.surface.as_mut(), texture);
    }

    fn remove(&mut self, key: &TileKey) {
        if let Some(texture) = self.records.pop(key).and_then(|r| r.texture()) {
            self.recycle(texture);
        }
    }

    /// Unpinned records matching `pick`, least recently used first.
    fn eviction_order(&self, current_frame: u64, pick: impl Fn(&TileRecord) -> bool) -> Vec<TileKey> {
        self.records
            .iter()
            .rev()
            .filter(|(_, r)| !r.pinned && r.last_used_frame != Some(current_frame) && pick(r))
            .map(|(k, _)| *k)
            .collect()
    }

    fn ensure_record(&mut self, key: TileKey) {
        if !self.records.contains(&key) {
            self.records.put(key, TileRecord::new(TileStatus::Loading, false));
        }
    }
}

impl CacheBackend for TileCache {
    fn get(&self, key: &TileKey) -> Option<&TileRecord> {
        self.records.peek(key)
    }

    fn set_loading(&mut self, key: TileKey) {
        let pinned = self.deferred_pins.remove(&key);
        let previous = self.records.put(key, TileRecord::new(TileStatus::Loading, pinned));
        if let Some(texture) = previous.and_then(|r| r.texture()) {
            self.recycle(texture);
        }
    }

    fn set_ready(&mut self, key: TileKey, texture: TextureId, width: u32, height: u32, frame: u64) {
        let pinned = self.deferred_pins.remove(&key);
        self.ensure_record(key);
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        record.pinned |= pinned;
        let previous = record.texture().filter(|old| *old != texture);
        record.status = TileStatus::Ready {
            texture,
            width,
            height,
        };
        record.last_used_frame = Some(frame);
        if let Some(old) = previous {
            self.recycle(old);
        }
    }

    fn set_error(&mut self, key: TileKey) {
        let pinned = self.deferred_pins.remove(&key);
        self.ensure_record(key);
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        record.pinned |= pinned;
        let previous = record.texture();
        record.status = TileStatus::Error;
        if let Some(old) = previous {
            self.recycle(old);
        }
    }

    fn discard_loading(&mut self, key: &TileKey) {
        if self.records.peek(key).is_some_and(TileRecord::is_loading) {
            self.records.pop(key);
        }
    }

    fn pin(&mut self, key: TileKey) {
        match self.records.peek_mut(&key) {
            Some(record) => record.pinned = true,
            None => {
                self.deferred_pins.insert(key);
            }
        }
    }

    fn unpin(&mut self, key: &TileKey) {
        self.deferred_pins.remove(key);
        if let Some(record) = self.records.peek_mut(key) {
            record.pinned = false;
        }
    }

    fn touch(&mut self, key: &TileKey, frame: u64) {
        // get_mut promotes the key to most recently used
        if let Some(record) = self.records.get_mut(key) {
            record.last_used_frame = Some(frame);
        }
    }

    fn evict_if_needed(&mut self, current_frame: u64) -> usize {
        if self.records.len() <= self.capacity {
            return 0;
        }

        let mut evicted = 0;
        let ready = self.eviction_order(current_frame, TileRecord::is_ready);
        let errors = self.eviction_order(current_frame, TileRecord::is_error);
        for key in ready.into_iter().chain(errors) {
            if self.records.len() <= self.capacity {
                break;
            }
            self.remove(&key);
            evicted += 1;
        }

        if evicted > 0 {
            log::debug!(
                "evicted {} tiles, {} remain (capacity {})",
                evicted,
                self.records.len(),
                self.capacity
            );
        }
        evicted
    }

    fn acquire_texture(&mut self) -> Result<TextureId> {
        self.pool.acquire(self.surface.as_mut())
    }

    fn release_texture(&mut self, texture: TextureId) {
        self.recycle(texture);
    }

    fn upload_texture(&mut self, texture: TextureId, bitmap: &Bitmap) -> Result<()> {
        self.surface.upload(texture, bitmap)
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        self.surface.generate_mipmaps(texture)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::texture::MemoryTextureSurface;

    fn cache(capacity: usize) -> TileCache {
        TileCache::new(capacity, 20, 4, Box::new(MemoryTextureSurface::new()))
    }

    fn ready(cache: &mut TileCache, key: TileKey, frame: u64) -> TextureId {
        let tex = cache.acquire_texture().unwrap();
        cache.set_loading(key);
        cache.set_ready(key, tex, 4, 4, frame);
        tex
    }

    #[test]
    fn test_ready_and_error_transitions() {
        let mut cache = cache(8);
        let key = TileKey::new(2, 1, 1);

        cache.set_loading(key);
        assert!(cache.get(&key).unwrap().is_loading());

        let tex = cache.acquire_texture().unwrap();
        cache.set_ready(key, tex, 4, 3, 7);
        let record = cache.get(&key).unwrap();
        assert_eq!(
            record.status,
            TileStatus::Ready {
                texture: tex,
                width: 4,
                height: 3
            }
        );
        assert_eq!(record.last_used_frame, Some(7));

        cache.set_error(key);
        let record = cache.get(&key).unwrap();
        assert!(record.is_error());
        assert_eq!(record.texture(), None);
        // The texture went back to the pool.
        assert_eq!(cache.pool_len(), 1);
    }

    #[test]
    fn test_lru_eviction_keeps_newest() {
        let mut cache = cache(2);
        let a = TileKey::new(1, 0, 0);
        let b = TileKey::new(1, 1, 0);
        let c = TileKey::new(1, 0, 1);
        ready(&mut cache, a, 1);
        ready(&mut cache, b, 2);
        ready(&mut cache, c, 3);

        assert_eq!(cache.evict_if_needed(100), 1);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_touch_refreshes_lru_position() {
        let mut cache = cache(2);
        let a = TileKey::new(1, 0, 0);
        let b = TileKey::new(1, 1, 0);
        let c = TileKey::new(1, 0, 1);
        ready(&mut cache, a, 1);
        ready(&mut cache, b, 2);
        ready(&mut cache, c, 3);
        cache.touch(&a, 4);

        cache.evict_if_needed(100);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
    }

    #[test]
    fn test_pinned_and_loading_records_survive_eviction() {
        let mut cache = cache(1);
        let pinned = TileKey::new(0, 0, 0);
        let loading = TileKey::new(1, 0, 0);
        ready(&mut cache, pinned, 1);
        cache.pin(pinned);
        cache.set_loading(loading);

        assert_eq!(cache.evict_if_needed(100), 0);
        assert_eq!(cache.len(), 2);
        assert!(cache.iter().all(|(_, r)| r.pinned || r.is_loading()));
    }

    #[test]
    fn test_error_records_evicted_after_ready_ones() {
        let mut cache = cache(1);
        let err = TileKey::new(3, 0, 0);
        let a = TileKey::new(3, 1, 0);
        let b = TileKey::new(3, 2, 0);
        cache.set_error(err);
        ready(&mut cache, a, 5);
        ready(&mut cache, b, 6);

        // Ready records go first, oldest first; errors only after them.
        assert_eq!(cache.evict_if_needed(100), 2);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&err).unwrap().is_error());

        ready(&mut cache, a, 7);
        cache.pin(a);
        assert_eq!(cache.evict_if_needed(100), 1);
        assert!(cache.get(&err).is_none());
        assert!(cache.get(&a).is_some());
    }

    #[test]
    fn test_records_used_this_frame_survive_eviction() {
        let mut cache = cache(1);
        let a = TileKey::new(2, 0, 0);
        let b = TileKey::new(2, 1, 0);
        let c = TileKey::new(2, 2, 0);
        let tex_a = ready(&mut cache, a, 3);
        let tex_b = ready(&mut cache, b, 3);
        ready(&mut cache, c, 2);

        // Only c is from an earlier frame, so it is the only one that may go.
        assert_eq!(cache.evict_if_needed(3), 1);
        assert!(cache.get(&c).is_none());
        assert_eq!(cache.get(&a).and_then(TileRecord::texture), Some(tex_a));
        assert_eq!(cache.get(&b).and_then(TileRecord::texture), Some(tex_b));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.evict_if_needed(4), 1);
        assert!(cache.get(&a).is_none());
    }

    #[test]
    fn test_deferred_pin_applies_on_creation() {
        let mut cache = cache(4);
        let key = TileKey::new(4, 3, 2);
        cache.pin(key);
        assert!(cache.is_deferred_pin(&key));
        assert!(cache.get(&key).is_none());

        cache.set_loading(key);
        assert!(cache.get(&key).unwrap().pinned);
        assert!(!cache.is_deferred_pin(&key));
    }

    #[test]
    fn test_reloading_resets_pin_and_recycles_texture() {
        let mut cache = cache(4);
        let key = TileKey::new(2, 0, 0);
        let tex = ready(&mut cache, key, 1);
        cache.pin(key);
        assert!(cache.get(&key).unwrap().pinned);

        cache.set_loading(key);
        let record = cache.get(&key).unwrap();
        assert!(!record.pinned);
        assert!(record.is_loading());
        assert_eq!(cache.acquire_texture().unwrap(), tex);
    }

    #[test]
    fn test_discard_loading_only_drops_loading_records() {
        let mut cache = cache(4);
        let loading = TileKey::new(1, 0, 0);
        let done = TileKey::new(1, 1, 0);
        cache.set_loading(loading);
        ready(&mut cache, done, 1);

        cache.discard_loading(&loading);
        cache.discard_loading(&done);
        assert!(cache.get(&loading).is_none());
        assert!(cache.get(&done).is_some());
    }

    #[test]
    fn test_clear_destroys_textures() {
        let mut cache = cache(4);
        ready(&mut cache, TileKey::new(0, 0, 0), 1);
        cache.clear(8);
        assert!(cache.is_empty());
        assert_eq!(cache.tile_size(), 8);
    }
}
