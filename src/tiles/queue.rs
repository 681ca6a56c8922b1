use std::cmp::Ordering;

use crate::core::config::SchedulerConfig;
use crate::core::coords::world_to_level;
use crate::core::geo::{Point, TileKey};
use crate::prelude::{HashMap, HashSet};

/// Pending fetch for one tile. Lower `priority` values are served first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTask {
    pub key: TileKey,
    pub level: u8,
    pub x: u32,
    pub y: u32,
    pub priority: u32,
    pub url: String,
}

impl RequestTask {
    pub fn new(key: TileKey, priority: u32, url: impl Into<String>) -> Self {
        Self {
            key,
            level: key.level,
            x: key.x,
            y: key.y,
            priority,
            url: url.into(),
        }
    }
}

/// Deduplicated set of tasks waiting for a loader slot.
///
/// Tasks are re-scored against the current view on every [`next`](Self::next)
/// call, so a task queued for a since-abandoned view position sinks naturally.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tasks: HashMap<TileKey, RequestTask>,
    config: SchedulerConfig,
    /// Native level of the pyramid, the level world pixels belong to
    native_level: u8,
    tile_size: u32,
}

impl RequestQueue {
    pub fn new(config: &SchedulerConfig, native_level: u8, tile_size: u32) -> Self {
        Self {
            tasks: HashMap::default(),
            config: config.clone(),
            native_level,
            tile_size: tile_size.max(1),
        }
    }

    /// Point the queue at a different pyramid; queued tasks are dropped.
    pub fn reset(&mut self, native_level: u8, tile_size: u32) {
        self.tasks.clear();
        self.native_level = native_level;
        self.tile_size = tile_size.max(1);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestTask> {
        self.tasks.values()
    }

    /// Queue `task`; no-op when its key is already queued.
    pub fn enqueue(&mut self, task: RequestTask) -> bool {
        if self.tasks.contains_key(&task.key) {
            return false;
        }
        self.tasks.insert(task.key, task);
        true
    }

    pub fn remove(&mut self, key: &TileKey) -> Option<RequestTask> {
        self.tasks.remove(key)
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }

    /// Score of `task` for the current view; lower is better.
    pub fn score(&self, task: &RequestTask, base_level: u8, center_world: Point, idle: bool) -> f64 {
        let level_gap = (task.level as f64 - base_level as f64).abs();
        task.priority as f64 * self.config.priority_weight
            + level_gap * self.config.level_weight
            + self.distance_from_center(task, center_world) * self.config.distance_weight(idle)
    }

    /// Distance, in tiles, between `task` and the tile under the view center
    /// at the task's own level.
    fn distance_from_center(&self, task: &RequestTask, center_world: Point) -> f64 {
        let center = world_to_level(center_world, self.native_level, task.level as i32);
        let ts = self.tile_size as f64;
        let center_tile = Point::new((center.x / ts).floor(), (center.y / ts).floor());
        Point::new(task.x as f64, task.y as f64).distance_to(&center_tile)
    }

    /// Remove and return the best-scoring task. Tasks finer than `base_level`
    /// are held back while the view is moving.
    pub fn next(&mut self, base_level: u8, center_world: Point, idle: bool) -> Option<RequestTask> {
        let best = self
            .tasks
            .values()
            .filter(|t| idle || t.level <= base_level)
            .map(|t| (self.score(t, base_level, center_world, idle), t.key))
            .min_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            })
            .map(|(_, key)| key)?;
        self.tasks.remove(&best)
    }

    /// Drop every queued task whose key is not in `wanted`.
    pub fn prune(&mut self, wanted: &HashSet<TileKey>) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|key, _| wanted.contains(key));
        let pruned = before - self.tasks.len();
        if pruned > 0 {
            log::trace!("pruned {} queued tiles no longer wanted", pruned);
        }
        pruned
    }
}
