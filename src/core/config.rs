//! Configuration for the tile scheduler
//!
//! Every threshold that encodes deliberate UX tuning lives here, with its
//! default documented next to the field. Presets are available through
//! [`SchedulerProfile`]; configurations round-trip through JSON.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerProfile {
    Balanced,
    LowMemory,
    HighQuality,
    Custom(SchedulerConfig),
}

impl SchedulerProfile {
    pub fn resolve(&self) -> SchedulerConfig {
        match self {
            Self::Balanced => SchedulerConfig::default(),
            Self::LowMemory => SchedulerConfig {
                cache_capacity: 128,
                texture_pool_size: 8,
                prefetch_radius: 1,
                max_concurrency: 4,
                ..SchedulerConfig::default()
            },
            Self::HighQuality => SchedulerConfig {
                cache_capacity: 2048,
                texture_pool_size: 40,
                prefetch_radius: 3,
                mipmap_budget_ms: 4.0,
                ..SchedulerConfig::default()
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for SchedulerProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ready/error records kept before LRU eviction kicks in. Default 512.
    pub cache_capacity: usize,
    /// Recycled texture handles kept around instead of destroyed. Default 20.
    pub texture_pool_size: usize,
    /// Coverage at which the backfill walk stops. Default 0.995.
    pub backfill_coverage_target: f64,
    /// Level scale above which the high-quality upscale filter engages. Default 1.02.
    pub filter_enter_scale: f64,
    /// Level scale below which the filter falls back to linear. Default 0.99.
    pub filter_exit_scale: f64,
    /// How close to the next integer zoom the base level already switches,
    /// and the width of the band in which the previous base level is kept.
    /// Default 0.02.
    pub level_snap_threshold: f64,
    /// Neighborhood radius (in tiles) of the baseline prefetch ring. Default 2.
    pub prefetch_radius: u32,
    /// An interaction within this many milliseconds counts as moving. Default 50.
    pub moving_window_ms: f64,
    /// Lower clamp of the decode concurrency. Default 2.
    pub min_concurrency: usize,
    /// Upper clamp of the decode concurrency. Default 8.
    pub max_concurrency: usize,
    /// Queue score weight per priority step. Default 100.
    pub priority_weight: f64,
    /// Queue score weight per level of distance from the base level. Default 12.
    pub level_weight: f64,
    /// Queue score weight per tile of distance from the center while idle. Default 4.
    pub distance_weight_idle: f64,
    /// Queue score weight per tile of distance from the center while moving. Default 1.
    pub distance_weight_moving: f64,
    /// Time budget per frame for deferred mipmap generation. Default 3 ms.
    pub mipmap_budget_ms: f64,
    /// Opacity of the tile layer. Default 1.0.
    pub layer_opacity: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 512,
            texture_pool_size: 20,
            backfill_coverage_target: 0.995,
            filter_enter_scale: 1.02,
            filter_exit_scale: 0.99,
            level_snap_threshold: 0.02,
            prefetch_radius: 2,
            moving_window_ms: 50.0,
            min_concurrency: 2,
            max_concurrency: 8,
            priority_weight: 100.0,
            level_weight: 12.0,
            distance_weight_idle: 4.0,
            distance_weight_moving: 1.0,
            mipmap_budget_ms: 3.0,
            layer_opacity: 1.0,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.backfill_coverage_target) {
            return Err(Error::Config(format!(
                "backfill_coverage_target {} is outside [0, 1]",
                self.backfill_coverage_target
            )));
        }
        if self.filter_exit_scale > self.filter_enter_scale {
            return Err(Error::Config(format!(
                "filter_exit_scale {} exceeds filter_enter_scale {}",
                self.filter_exit_scale, self.filter_enter_scale
            )));
        }
        if !(0.0..0.5).contains(&self.level_snap_threshold) {
            return Err(Error::Config(format!(
                "level_snap_threshold {} is outside [0, 0.5)",
                self.level_snap_threshold
            )));
        }
        if self.min_concurrency == 0 || self.min_concurrency > self.max_concurrency {
            return Err(Error::Config(format!(
                "concurrency clamp [{}, {}] is empty",
                self.min_concurrency, self.max_concurrency
            )));
        }
        if !(0.0..=1.0).contains(&self.layer_opacity) {
            return Err(Error::Config(format!(
                "layer_opacity {} is outside [0, 1]",
                self.layer_opacity
            )));
        }
        Ok(())
    }

    /// Hardware concurrency clamped to the configured bounds.
    pub fn base_concurrency(&self) -> usize {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(self.min_concurrency);
        hw.clamp(self.min_concurrency, self.max_concurrency)
    }

    pub fn distance_weight(&self, idle: bool) -> f64 {
        if idle {
            self.distance_weight_idle
        } else {
            self.distance_weight_moving
        }
    }
}
