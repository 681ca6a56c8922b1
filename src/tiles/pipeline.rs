//! Request orchestration: bounds checks, deduplication, dispatch under the
//! loader's concurrency bound, baseline prefetch and cancellation.

use crate::core::config::SchedulerConfig;
use crate::core::constants::PRIORITY_PREFETCH;
use crate::core::coords::tile_index;
use crate::core::geo::{Point, PyramidGrid, TileKey};
use crate::core::view::MotionState;
use crate::prelude::{Arc, HashSet};
use crate::tiles::cache::TileCache;
use crate::tiles::loader::TileLoader;
use crate::tiles::queue::{RequestQueue, RequestTask};
use crate::tiles::source::TileSource;
use crate::traits::{CacheBackend, ClockSource, LoaderBackend};

pub struct TilePipeline<C = TileCache, L = TileLoader>
where
    C: CacheBackend,
    L: LoaderBackend,
{
    cache: C,
    loader: L,
    queue: RequestQueue,
    source: TileSource,
    grid: PyramidGrid,
    clock: Arc<dyn ClockSource>,
    motion: MotionState,
    base_level: u8,
    center: Point,
    wrap_x: bool,
    prefetch_ring: HashSet<TileKey>,
    retry_scheduled: bool,
}

impl<C: CacheBackend, L: LoaderBackend> TilePipeline<C, L> {
    pub fn new(
        config: &SchedulerConfig,
        cache: C,
        loader: L,
        source: TileSource,
        grid: PyramidGrid,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            cache,
            loader,
            queue: RequestQueue::new(config, grid.max_zoom, grid.tile_size),
            source,
            grid,
            clock,
            motion: MotionState::new(config.moving_window_ms),
            base_level: grid.min_zoom,
            center: Point::default(),
            wrap_x: false,
            prefetch_ring: HashSet::default(),
            retry_scheduled: false,
        }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut C {
        &mut self.cache
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut L {
        &mut self.loader
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn grid(&self) -> &PyramidGrid {
        &self.grid
    }

    pub fn source(&self) -> &TileSource {
        &self.source
    }

    pub fn prefetch_ring(&self) -> &HashSet<TileKey> {
        &self.prefetch_ring
    }

    /// Switch to another tile source. Everything queued, in flight or
    /// pinned for the old source is dropped.
    pub fn set_source(&mut self, source: TileSource, grid: PyramidGrid) {
        self.loader.cancel_unwanted(&HashSet::default(), &mut self.cache);
        for key in self.prefetch_ring.drain() {
            self.cache.unpin(&key);
        }
        self.queue.reset(grid.max_zoom, grid.tile_size);
        self.base_level = self.base_level.clamp(grid.min_zoom, grid.max_zoom);
        self.source = source;
        self.grid = grid;
        self.retry_scheduled = false;
    }

    /// Where the view is looking; used to score queued tasks.
    pub fn set_focus(&mut self, base_level: u8, center: Point, wrap_x: bool) {
        self.base_level = base_level;
        self.center = center;
        self.wrap_x = wrap_x;
    }

    pub fn note_interaction(&mut self) {
        self.motion.note_interaction(self.clock.now_ms());
    }

    pub fn set_animating(&mut self, animating: bool) {
        self.motion.set_animating(animating);
    }

    pub fn is_moving(&self) -> bool {
        self.motion.is_moving(self.clock.now_ms())
    }

    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled
    }

    /// Start of a render tick: consumes a retry scheduled by the previous one.
    pub fn begin_frame(&mut self) -> bool {
        std::mem::take(&mut self.retry_scheduled)
    }

    fn schedule_retry(&mut self) {
        if !self.retry_scheduled {
            self.retry_scheduled = true;
            self.clock.request_frame();
            log::trace!("loader saturated while moving, retrying next frame");
        }
    }

    /// Request tile `(level, x, y)`. Indices outside the level's grid are
    /// ignored, as are tiles already cached (including failed ones) or pending.
    pub fn enqueue(&mut self, level: u8, x: i64, y: i64, priority: u32) -> bool {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return false;
        };
        let key = TileKey::new(level, x, y);
        if !self.grid.contains(&key) {
            log::trace!("tile {} is outside the pyramid", key);
            return false;
        }
        if self.cache.contains(&key) || self.loader.is_pending(&key) {
            return false;
        }
        let task = RequestTask::new(key, priority, self.source.url(&key));
        if !self.queue.enqueue(task) {
            return false;
        }
        self.process();
        true
    }

    /// Dispatch queued tasks while the loader has room. Returns how many started.
    pub fn process(&mut self) -> usize {
        if !self.source.is_available() {
            log::trace!("tile source not available yet, holding {} tasks", self.queue.len());
            return 0;
        }

        let moving = self.is_moving();
        let mut started = 0;
        while !self.queue.is_empty() {
            if !self.loader.has_capacity(moving) {
                if moving {
                    self.schedule_retry();
                }
                break;
            }
            let Some(task) = self.queue.next(self.base_level, self.center, !moving) else {
                break;
            };
            if self.cache.contains(&task.key) || self.loader.is_pending(&task.key) {
                continue;
            }
            self.loader.start(task, &mut self.cache, moving);
            started += 1;
        }
        started
    }

    /// Pin and request the `(2r+1)²` tiles around the view center at `level`.
    /// Tiles of the previous ring that fall outside the new one are unpinned.
    pub fn schedule_baseline_prefetch(&mut self, level: u8, radius: u32) -> usize {
        if !self.grid.has_level(level) {
            return 0;
        }
        let (cx, cy) = tile_index(self.center, &self.grid, level, self.wrap_x);
        let (_, rows) = self.grid.tiles_at(level);
        let r = radius as i64;

        let mut ring = HashSet::default();
        for dy in -r..=r {
            let y = cy as i64 + dy;
            if y < 0 || y >= rows as i64 {
                continue;
            }
            for dx in -r..=r {
                if let Some(x) = self.grid.resolve_column(level, cx as i64 + dx, self.wrap_x) {
                    ring.insert(TileKey::new(level, x, y as u32));
                }
            }
        }

        for key in self.prefetch_ring.difference(&ring) {
            self.cache.unpin(key);
        }
        for key in &ring {
            self.cache.pin(*key);
        }
        self.prefetch_ring = ring;

        let mut keys: Vec<TileKey> = self.prefetch_ring.iter().copied().collect();
        keys.sort();
        let queued = keys
            .into_iter()
            .filter(|key| self.enqueue(key.level, key.x as i64, key.y as i64, PRIORITY_PREFETCH))
            .count();
        log::debug!(
            "baseline prefetch at level {}: {} tiles pinned, {} requested",
            level,
            self.prefetch_ring.len(),
            queued
        );
        self.prefetch_ring.len()
    }

    /// Drop queued and in-flight work for keys outside `wanted`. Tiles of the
    /// current prefetch ring always count as wanted.
    pub fn cancel_unwanted(&mut self, wanted: &HashSet<TileKey>) -> usize {
        let mut keep = wanted.clone();
        keep.extend(self.prefetch_ring.iter().copied());
        let pruned = self.queue.prune(&keep);
        let cancelled = self.loader.cancel_unwanted(&keep, &mut self.cache);
        pruned + cancelled
    }

    pub fn poll_completions(&mut self, frame: u64) -> usize {
        let moving = self.is_moving();
        self.loader.poll_completions(&mut self.cache, frame, moving)
    }

    pub fn process_mipmaps(&mut self) -> usize {
        let idle = !self.is_moving();
        self.loader
            .process_mipmaps(&mut self.cache, self.clock.as_ref(), idle)
    }

    pub fn evict_if_needed(&mut self, current_frame: u64) -> usize {
        self.cache.evict_if_needed(current_frame)
    }
}
