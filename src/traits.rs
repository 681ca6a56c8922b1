//! Named seams between the scheduler and its collaborators
//!
//! The scheduler never talks to a concrete cache, loader, clock, network
//! stack, decoder or GPU directly; each is injected behind one of the traits
//! below so hosts (and tests) can substitute their own.

use async_trait::async_trait;
use instant::Instant;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::core::geo::TileKey;
use crate::prelude::HashSet;
use crate::rendering::decode::Bitmap;
use crate::rendering::texture::TextureId;
use crate::tiles::cache::TileRecord;
use crate::tiles::queue::RequestTask;
use crate::Result;

/// Tile-key → texture-record store owned by the render tick.
pub trait CacheBackend {
    fn get(&self, key: &TileKey) -> Option<&TileRecord>;

    /// Whether any record (ready, loading or error) exists for `key`.
    fn contains(&self, key: &TileKey) -> bool {
        self.get(key).is_some()
    }

    fn set_loading(&mut self, key: TileKey);

    fn set_ready(&mut self, key: TileKey, texture: TextureId, width: u32, height: u32, frame: u64);

    fn set_error(&mut self, key: TileKey);

    /// Drop a record that is still `Loading`, e.g. after its load was cancelled.
    fn discard_loading(&mut self, key: &TileKey);

    fn pin(&mut self, key: TileKey);

    fn unpin(&mut self, key: &TileKey);

    fn touch(&mut self, key: &TileKey, frame: u64);

    /// Evict records until the cache is within capacity; returns how many went.
    /// Records last used in `current_frame` are kept.
    fn evict_if_needed(&mut self, current_frame: u64) -> usize;

    /// Hand out a texture handle, recycled from the pool when possible.
    fn acquire_texture(&mut self) -> Result<TextureId>;

    /// Return a texture handle that never made it into a record.
    fn release_texture(&mut self, texture: TextureId);

    fn upload_texture(&mut self, texture: TextureId, bitmap: &Bitmap) -> Result<()>;

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded-concurrency decode pipeline.
pub trait LoaderBackend {
    /// Whether another task may be started right now.
    fn has_capacity(&self, moving: bool) -> bool;

    /// Whether `key` is queued for decode or in flight.
    fn is_pending(&self, key: &TileKey) -> bool;

    /// Begin loading `task`, superseding any earlier load of the same key.
    fn start(&mut self, task: RequestTask, cache: &mut dyn CacheBackend, moving: bool);

    /// Cancel the load of `key`, wherever it currently is.
    fn cancel(&mut self, key: &TileKey, cache: &mut dyn CacheBackend) -> bool;

    /// Cancel every pending load whose key is not in `wanted`.
    fn cancel_unwanted(&mut self, wanted: &HashSet<TileKey>, cache: &mut dyn CacheBackend) -> usize;

    /// Apply finished decodes to the cache. Must only be called from the render tick.
    fn poll_completions(&mut self, cache: &mut dyn CacheBackend, frame: u64, moving: bool) -> usize;

    /// Run deferred mipmap generation within the frame budget while idle.
    fn process_mipmaps(&mut self, cache: &mut dyn CacheBackend, clock: &dyn ClockSource, idle: bool) -> usize;

    fn pending_count(&self) -> usize;
}

/// Time and frame scheduling provided by the host.
pub trait ClockSource: Send + Sync {
    /// Monotonic milliseconds.
    fn now_ms(&self) -> f64;

    /// Ask the host to run another tick on the next animation frame.
    fn request_frame(&self);
}

/// Fetches the encoded bytes of one tile.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    async fn fetch(&self, task: &RequestTask) -> Result<Vec<u8>>;
}

/// Turns encoded image bytes into an RGBA bitmap.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Bitmap>;
}

/// The GPU texture surface. Only ever touched from the render tick.
pub trait TextureSurface {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureId>;

    fn upload(&mut self, texture: TextureId, bitmap: &Bitmap) -> Result<()>;

    fn destroy(&mut self, texture: TextureId);

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()>;
}

/// Wall clock backed by `instant`, counting requested frames.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
    frame_requests: AtomicUsize,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            frame_requests: AtomicUsize::new(0),
        }
    }

    /// Consume pending frame requests; true if at least one was made.
    pub fn take_frame_request(&self) -> bool {
        self.frame_requests.swap(0, Ordering::AcqRel) > 0
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }

    fn request_frame(&self) {
        self.frame_requests.fetch_add(1, Ordering::AcqRel);
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_bits: AtomicU64,
    frame_requests: AtomicUsize,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_bits: AtomicU64::new(start_ms.to_bits()),
            frame_requests: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, now_ms: f64) {
        self.now_bits.store(now_ms.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.set(self.now_ms() + delta_ms);
    }

    pub fn frame_requests(&self) -> usize {
        self.frame_requests.load(Ordering::Acquire)
    }
}

impl ClockSource for ManualClock {
    fn now_ms(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }

    fn request_frame(&self) {
        self.frame_requests.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10.0);
        assert_eq!(clock.now_ms(), 10.0);
        clock.advance(5.5);
        assert_eq!(clock.now_ms(), 15.5);
        clock.request_frame();
        clock.request_frame();
        assert_eq!(clock.frame_requests(), 2);
    }

    #[test]
    fn test_system_clock_frame_requests() {
        let clock = SystemClock::new();
        assert!(!clock.take_frame_request());
        clock.request_frame();
        assert!(clock.take_frame_request());
        assert!(!clock.take_frame_request());
        assert!(clock.now_ms() >= 0.0);
    }
}
