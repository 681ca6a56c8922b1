//! Frame orchestration.
//!
//! [`TileEngine::tick`] is the single entry point a host calls once per
//! animation frame. It applies finished decodes, builds the frame's draw
//! plan, requests what is missing and cancels what is no longer visible.
//! Nothing in here blocks on I/O.

use serde::Serialize;

use crate::core::animation::ViewAnimation;
use crate::core::config::{SchedulerConfig, SchedulerProfile};
use crate::core::geo::{Point, PyramidGrid, TileKey};
use crate::core::view::ViewState;
use crate::prelude::{Arc, HashSet};
use crate::rendering::compositor::{FramePlan, LevelCompositor};
use crate::rendering::plan::DrawPlan;
use crate::rendering::texture::MemoryTextureSurface;
use crate::runtime::{default_spawner, AsyncSpawner};
use crate::tiles::cache::TileCache;
use crate::tiles::loader::TileLoader;
use crate::tiles::pipeline::TilePipeline;
use crate::tiles::source::TileSource;
use crate::traits::{CacheBackend, ClockSource, ImageDecoder, LoaderBackend, SystemClock, TextureSurface, TileFetcher};
use crate::Result;

/// What one tick did.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame: u64,
    /// The view actually drawn, after any running animation was applied
    pub view: ViewState,
    pub plan: FramePlan,
    pub moving: bool,
    /// Decodes applied to the cache this tick
    pub completed: usize,
    /// Missing tiles newly queued this tick
    pub requested: usize,
    /// Queued or in-flight loads dropped because they left the view
    pub cancelled: usize,
    /// Size of the prefetch ring scheduled this tick, 0 if none
    pub prefetched: usize,
    pub evicted: usize,
}

impl FrameOutput {
    pub fn draws(&self) -> &DrawPlan {
        &self.plan.draws
    }
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub frame: u64,
    pub cached_tiles: usize,
    pub cache_capacity: usize,
    pub pinned_tiles: usize,
    pub pooled_textures: usize,
    pub queued_requests: usize,
    pub pending_loads: usize,
    pub in_flight: usize,
    pub pending_mipmaps: usize,
    pub moving: bool,
}

/// Builder for [`TileEngine`]; every collaborator has a headless default.
pub struct TileEngineBuilder {
    config: SchedulerConfig,
    surface: Option<Box<dyn TextureSurface>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    fetcher: Option<Arc<dyn TileFetcher>>,
    spawner: Option<Arc<dyn AsyncSpawner>>,
    clock: Option<Arc<dyn ClockSource>>,
    concurrency: Option<usize>,
}

impl TileEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            surface: None,
            decoder: None,
            fetcher: None,
            spawner: None,
            clock: None,
            concurrency: None,
        }
    }

    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_profile(mut self, profile: SchedulerProfile) -> Self {
        self.config = profile.resolve();
        self
    }

    pub fn with_surface(mut self, surface: Box<dyn TextureSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Fetch tile bytes with `fetcher` instead of the tile source itself.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn TileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn AsyncSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fix the decode concurrency instead of deriving it from the hardware.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn build(self, source: TileSource, grid: PyramidGrid) -> Result<TileEngine> {
        self.config.validate()?;

        let surface = self
            .surface
            .unwrap_or_else(|| Box::new(MemoryTextureSurface::new()) as Box<dyn TextureSurface>);
        let decoder = self.decoder.unwrap_or_else(default_decoder);
        let spawner = match self.spawner {
            Some(spawner) => spawner,
            None => default_spawner()?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn ClockSource>);
        let custom_fetcher = self.fetcher.is_some();
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(source.clone()) as Arc<dyn TileFetcher>);

        let cache = TileCache::new(
            self.config.cache_capacity,
            self.config.texture_pool_size,
            grid.tile_size,
            surface,
        );
        let mut loader = TileLoader::new(&self.config, spawner, fetcher, decoder);
        if let Some(concurrency) = self.concurrency {
            loader = loader.with_concurrency(concurrency);
        }
        let pipeline = TilePipeline::new(&self.config, cache, loader, source, grid, clock.clone());

        log::info!(
            "tile engine ready: levels {}..={}, {}px tiles, cache capacity {}",
            grid.min_zoom,
            grid.max_zoom,
            grid.tile_size,
            self.config.cache_capacity
        );
        Ok(TileEngine {
            compositor: LevelCompositor::new(&self.config),
            view: ViewState::default().with_pyramid(grid.tile_size, grid.max_zoom),
            config: self.config,
            pipeline,
            clock,
            frame: 0,
            animation: None,
            prefetched_level: None,
            custom_fetcher,
        })
    }
}

impl Default for TileEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "render")]
fn default_decoder() -> Arc<dyn ImageDecoder> {
    Arc::new(crate::rendering::decode::ImageCrateDecoder)
}

#[cfg(not(feature = "render"))]
fn default_decoder() -> Arc<dyn ImageDecoder> {
    Arc::new(crate::rendering::decode::RawRgbaDecoder)
}

/// The tile scheduler as seen by a host: one [`tick`](Self::tick) per frame.
pub struct TileEngine {
    config: SchedulerConfig,
    pipeline: TilePipeline,
    compositor: LevelCompositor,
    clock: Arc<dyn ClockSource>,
    frame: u64,
    view: ViewState,
    animation: Option<ViewAnimation>,
    /// Base level of the last idle prefetch
    prefetched_level: Option<u8>,
    custom_fetcher: bool,
}

impl TileEngine {
    pub fn builder() -> TileEngineBuilder {
        TileEngineBuilder::new()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// The view drawn by the last tick.
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn grid(&self) -> &PyramidGrid {
        self.pipeline.grid()
    }

    pub fn cache(&self) -> &TileCache {
        self.pipeline.cache()
    }

    pub fn pipeline(&self) -> &TilePipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut TilePipeline {
        &mut self.pipeline
    }

    pub fn is_moving(&self) -> bool {
        self.pipeline.is_moving()
    }

    /// Replace the tile source. The cache, queue and every pending load of
    /// the previous source are dropped.
    pub fn set_source(&mut self, source: TileSource, grid: PyramidGrid) {
        log::info!(
            "switching tile source: levels {}..={}, {}px tiles, {}x{} map",
            grid.min_zoom,
            grid.max_zoom,
            grid.tile_size,
            grid.map_width,
            grid.map_height
        );
        if !self.custom_fetcher {
            self.pipeline
                .loader_mut()
                .set_fetcher(Arc::new(source.clone()));
        }
        self.pipeline.set_source(source, grid);
        self.pipeline.cache_mut().clear(grid.tile_size);
        self.compositor.reset();
        self.prefetched_level = None;
        self.view = self.view.clone().with_pyramid(grid.tile_size, grid.max_zoom);
    }

    /// The user touched the view; it counts as moving for the configured window.
    pub fn note_interaction(&mut self) {
        self.pipeline.note_interaction();
    }

    /// Ease from the current view to `zoom` / `center` over `duration_ms`.
    pub fn animate_to(&mut self, zoom: f64, center: Point, duration_ms: f64) {
        let from = &self.view;
        self.animation = Some(ViewAnimation::new(
            self.clock.now_ms(),
            duration_ms,
            from.zoom,
            zoom,
            from.center,
            center,
        ));
        self.pipeline.set_animating(true);
        self.clock.request_frame();
    }

    pub fn cancel_animation(&mut self) {
        self.animation = None;
        self.pipeline.set_animating(false);
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }

    pub fn enqueue(&mut self, level: u8, x: i64, y: i64, priority: u32) -> bool {
        self.pipeline.enqueue(level, x, y, priority)
    }

    pub fn cancel_unwanted(&mut self, wanted: &HashSet<TileKey>) -> usize {
        self.pipeline.cancel_unwanted(wanted)
    }

    /// Pin and request the neighborhood of the view center at `level`.
    pub fn prefetch(&mut self, level: u8, radius: u32) -> usize {
        self.pipeline.schedule_baseline_prefetch(level, radius)
    }

    /// Draw plan for `view` from what the cache holds right now, without
    /// requesting or cancelling anything.
    pub fn build_draw_plan(&mut self, view: &ViewState) -> DrawPlan {
        let grid = *self.pipeline.grid();
        self.compositor
            .compose(view, &grid, self.pipeline.cache_mut(), self.frame)
            .draws
    }

    /// Run one frame.
    pub fn tick(&mut self, view: &ViewState) -> FrameOutput {
        self.frame += 1;
        let frame = self.frame;
        self.pipeline.begin_frame();

        let mut view = view.clone();
        if let Some(animation) = &self.animation {
            let sample = animation.sample(self.clock.now_ms());
            view.zoom = sample.zoom;
            view.center = sample.center;
            if sample.finished {
                self.cancel_animation();
            } else {
                self.clock.request_frame();
            }
        }
        self.view = view.clone();

        let completed = self.pipeline.poll_completions(frame);

        let grid = *self.pipeline.grid();
        let plan = self
            .compositor
            .compose(&view, &grid, self.pipeline.cache_mut(), frame);
        self.pipeline
            .set_focus(plan.base_level, view.center, view.wrap_x);

        let requested = plan
            .requests
            .iter()
            .filter(|r| {
                self.pipeline
                    .enqueue(r.key.level, r.key.x as i64, r.key.y as i64, r.priority)
            })
            .count();
        self.pipeline.process();
        let cancelled = self.pipeline.cancel_unwanted(&plan.wanted);

        let moving = self.pipeline.is_moving();
        let mut prefetched = 0;
        if !moving && self.prefetched_level != Some(plan.base_level) {
            prefetched = self
                .pipeline
                .schedule_baseline_prefetch(plan.base_level, self.config.prefetch_radius);
            self.prefetched_level = Some(plan.base_level);
        }

        self.pipeline.process_mipmaps();
        let evicted = self.pipeline.evict_if_needed(frame);

        // Keep ticking while decodes are outstanding so their results land.
        if self.pipeline.loader().pending_count() > 0 {
            self.clock.request_frame();
        }

        FrameOutput {
            frame,
            view,
            plan,
            moving,
            completed,
            requested,
            cancelled,
            prefetched,
            evicted,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let cache = self.pipeline.cache();
        let loader = self.pipeline.loader();
        EngineStats {
            frame: self.frame,
            cached_tiles: cache.len(),
            cache_capacity: cache.capacity(),
            pinned_tiles: cache.pinned_count(),
            pooled_textures: cache.pool_len(),
            queued_requests: self.pipeline.queue().len(),
            pending_loads: loader.pending_count(),
            in_flight: loader.in_flight(),
            pending_mipmaps: loader.pending_mipmaps(),
            moving: self.pipeline.is_moving(),
        }
    }
}
