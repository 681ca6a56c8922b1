//! Per-frame level selection, coverage-driven backfill and cross-fade.
//!
//! The compositor reads the cache and produces a [`FramePlan`]: the draw
//! commands for this frame plus every tile it wished it had, so the
//! scheduler can request the missing ones and cancel the rest.

use crate::core::config::SchedulerConfig;
use crate::core::constants::{PRIORITY_BACKFILL, PRIORITY_BASE_LEVEL, PRIORITY_NEXT_LEVEL};
use crate::core::coords::LevelFrame;
use crate::core::geo::{PyramidGrid, TileKey};
use crate::core::view::ViewState;
use crate::prelude::{HashMap, HashSet};
use crate::rendering::plan::{DeviceRect, DrawCommand, DrawPlan, FilterMode};
use crate::tiles::cache::TileStatus;
use crate::traits::CacheBackend;

/// Fraction of a level's visible tiles that are ready this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageReport {
    pub level: u8,
    pub ready_fraction: f64,
}

/// A tile the compositor wanted but the cache did not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRequest {
    pub key: TileKey,
    pub priority: u32,
}

/// Everything the compositor decided for one frame.
#[derive(Debug, Clone, Default)]
pub struct FramePlan {
    pub draws: DrawPlan,
    /// Every visible key of every level drawn this frame
    pub wanted: HashSet<TileKey>,
    /// In evaluation order: base level, backfill levels, next level
    pub coverage: Vec<CoverageReport>,
    pub requests: Vec<TileRequest>,
    pub base_level: u8,
    /// Fractional part of the zoom above `base_level`, in `[0, 1]`
    pub fraction: f64,
}

impl FramePlan {
    pub fn coverage_of(&self, level: u8) -> Option<f64> {
        self.coverage
            .iter()
            .find(|c| c.level == level)
            .map(|c| c.ready_fraction)
    }
}

/// Visible tiles of one level, with the unwrapped column each is drawn at.
struct LevelPass {
    frame: LevelFrame,
    tiles: Vec<(i64, i64, TileKey)>,
    keys: HashSet<TileKey>,
}

impl LevelPass {
    fn new(view: &ViewState, grid: &PyramidGrid, level: u8) -> Self {
        let frame = LevelFrame::compute(view, grid, level);
        let mut tiles = Vec::with_capacity(frame.range.len());
        let mut keys = HashSet::default();
        for (x, y) in frame.range.iter() {
            let Some(column) = grid.resolve_column(level, x, view.wrap_x) else {
                continue;
            };
            let key = TileKey::new(level, column, y as u32);
            tiles.push((x, y, key));
            keys.insert(key);
        }
        Self { frame, tiles, keys }
    }

    fn coverage(&self, cache: &dyn CacheBackend) -> f64 {
        if self.keys.is_empty() {
            return 1.0;
        }
        let ready = self
            .keys
            .iter()
            .filter(|key| cache.get(key).is_some_and(|r| r.is_ready()))
            .count();
        ready as f64 / self.keys.len() as f64
    }
}

pub struct LevelCompositor {
    backfill_target: f64,
    filter_enter: f64,
    filter_exit: f64,
    snap: f64,
    opacity: f32,
    previous_base: Option<u8>,
    filters: HashMap<u8, FilterMode>,
}

impl LevelCompositor {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            backfill_target: config.backfill_coverage_target,
            filter_enter: config.filter_enter_scale,
            filter_exit: config.filter_exit_scale,
            snap: config.level_snap_threshold,
            opacity: config.layer_opacity,
            previous_base: None,
            filters: HashMap::default(),
        }
    }

    /// Forget hysteresis state, e.g. after the tile source changed.
    pub fn reset(&mut self) {
        self.previous_base = None;
        self.filters.clear();
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    /// Pick the base level for `zoom`. The zoom snaps up to the next level
    /// within `snap` of it, and the previous base is kept while the zoom stays
    /// within `[base - snap, base + 1 + snap)` so boundaries do not flicker.
    pub fn select_base_level(&mut self, zoom: f64, min_level: u8, max_level: u8) -> u8 {
        let kept = self.previous_base.filter(|p| {
            let offset = zoom - *p as f64;
            offset >= -self.snap && offset < 1.0 + self.snap
        });
        let level = match kept {
            Some(p) => p as f64,
            None => (zoom + self.snap).floor(),
        };
        let base = level.clamp(min_level as f64, max_level as f64) as u8;
        self.previous_base = Some(base);
        base
    }

    /// Filter for `level` drawn at `scale`: high quality above the enter
    /// threshold, back to linear only below the exit threshold.
    pub fn filter_for(&mut self, level: u8, scale: f64) -> FilterMode {
        let current = self.filters.get(&level).copied().unwrap_or_default();
        let next = match current {
            FilterMode::Linear if scale > self.filter_enter => FilterMode::HighQuality,
            FilterMode::HighQuality if scale < self.filter_exit => FilterMode::Linear,
            other => other,
        };
        self.filters.insert(level, next);
        next
    }

    /// Ready fraction of the tiles of `level` visible in `view`; 1.0 when none are visible.
    pub fn coverage(view: &ViewState, grid: &PyramidGrid, cache: &dyn CacheBackend, level: u8) -> f64 {
        LevelPass::new(view, grid, level).coverage(cache)
    }

    /// Build the frame: backfill passes (coarsest first), the base level at
    /// layer opacity, then the next level faded in by the zoom fraction.
    /// Ready tiles that get drawn are touched with `frame`.
    pub fn compose(
        &mut self,
        view: &ViewState,
        grid: &PyramidGrid,
        cache: &mut dyn CacheBackend,
        frame: u64,
    ) -> FramePlan {
        let zoom = view.clamped_zoom();
        let base = self.select_base_level(zoom, grid.min_zoom, grid.max_zoom);
        let fraction = (zoom - base as f64).clamp(0.0, 1.0);

        let mut plan = FramePlan {
            base_level: base,
            fraction,
            ..FramePlan::default()
        };
        let mut commands = Vec::new();

        let base_pass = LevelPass::new(view, grid, base);
        let base_coverage = self.account(&base_pass, cache, PRIORITY_BASE_LEVEL, &mut plan);

        let mut backfill = Vec::new();
        if base_coverage < self.backfill_target {
            let mut level = base;
            while level > grid.min_zoom {
                level -= 1;
                let pass = LevelPass::new(view, grid, level);
                let covered = self.account(&pass, cache, PRIORITY_BACKFILL, &mut plan);
                backfill.push(pass);
                if covered >= self.backfill_target {
                    break;
                }
            }
        }

        for pass in backfill.iter().rev() {
            self.emit(pass, view, grid, cache, 1.0, frame, &mut commands);
        }
        self.emit(&base_pass, view, grid, cache, self.opacity, frame, &mut commands);

        if fraction > 0.0 && base < grid.max_zoom {
            let next = LevelPass::new(view, grid, base + 1);
            self.account(&next, cache, PRIORITY_NEXT_LEVEL, &mut plan);
            let alpha = fraction as f32 * self.opacity;
            self.emit(&next, view, grid, cache, alpha, frame, &mut commands);
        }

        log::trace!(
            "frame {}: base {} (+{:.2}), {} draws, {} requests, backfill {:?}",
            frame,
            base,
            fraction,
            commands.len(),
            plan.requests.len(),
            backfill.iter().map(|p| p.frame.level).collect::<Vec<_>>()
        );
        plan.draws = DrawPlan::new(commands);
        plan
    }

    /// Record coverage, wanted keys and missing-tile requests of `pass`.
    fn account(&self, pass: &LevelPass, cache: &dyn CacheBackend, priority: u32, plan: &mut FramePlan) -> f64 {
        let coverage = pass.coverage(cache);
        plan.coverage.push(CoverageReport {
            level: pass.frame.level,
            ready_fraction: coverage,
        });
        for (_, _, key) in &pass.tiles {
            if plan.wanted.insert(*key) && !cache.contains(key) {
                plan.requests.push(TileRequest { key: *key, priority });
            }
        }
        coverage
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        pass: &LevelPass,
        view: &ViewState,
        grid: &PyramidGrid,
        cache: &mut dyn CacheBackend,
        alpha: f32,
        frame: u64,
        out: &mut Vec<DrawCommand>,
    ) {
        if alpha <= 0.0 {
            return;
        }
        let level = pass.frame.level;
        let filter = self.filter_for(level, pass.frame.scale);
        let dpr = view.pixel_ratio();
        let to_device = pass.frame.scale * dpr;

        for (x, y, key) in &pass.tiles {
            let Some(TileStatus::Ready {
                texture,
                width,
                height,
            }) = cache.get(key).map(|r| r.status)
            else {
                continue;
            };
            let origin = pass.frame.tile_origin(*x, *y, grid.tile_size);
            out.push(DrawCommand {
                key: *key,
                level,
                dest: DeviceRect::new(
                    origin.x * dpr,
                    origin.y * dpr,
                    width as f64 * to_device,
                    height as f64 * to_device,
                ),
                alpha,
                filter,
                texture,
            });
            cache.touch(key, frame);
        }
    }
}
