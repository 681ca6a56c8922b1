use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::constants::MAX_LEVEL;
use crate::Error;

/// Identifies one grid cell of one pyramid level.
///
/// The canonical string form is `"z/x/y"`, which is also the key format of
/// the GTPK index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub level: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub fn new(level: u8, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let mut next = |name: &str| {
            parts
                .next()
                .ok_or_else(|| Error::NotFound(format!("tile key {s:?} is missing {name}")))
        };
        let level = next("z")?
            .parse::<u8>()
            .map_err(|e| Error::NotFound(format!("tile key {s:?}: bad z: {e}")))?;
        let x = next("x")?
            .parse::<u32>()
            .map_err(|e| Error::NotFound(format!("tile key {s:?}: bad x: {e}")))?;
        let y = next("y")?
            .parse::<u32>()
            .map_err(|e| Error::NotFound(format!("tile key {s:?}: bad y: {e}")))?;
        if parts.next().is_some() {
            return Err(Error::NotFound(format!("tile key {s:?} has trailing parts")));
        }
        Ok(TileKey::new(level, x, y))
    }
}

/// Represents a point in world, level or screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn subtract(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y)
    }

    pub fn multiply(&self, scalar: f64) -> Point {
        Point::new(self.x * scalar, self.y * scalar)
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Inclusive range of tile indices at one level.
///
/// `x` bounds are kept unwrapped so that a horizontally wrapping view can
/// place the same column at two screen positions; use
/// [`PyramidGrid::resolve_column`] to turn them into real columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub level: u8,
    pub min_x: i64,
    pub max_x: i64,
    pub min_y: i64,
    pub max_y: i64,
}

impl TileRange {
    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        ((self.max_x - self.min_x + 1) * (self.max_y - self.min_y + 1)) as usize
    }

    /// Iterate `(x, y)` pairs row by row.
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| (self.min_x..=self.max_x).map(move |x| (x, y)))
    }
}

/// Static description of the image pyramid served by a tile source.
///
/// World pixels are full-resolution image pixels, i.e. pixels of `max_zoom`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PyramidGrid {
    pub tile_size: u32,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub map_width: f64,
    pub map_height: f64,
}

impl PyramidGrid {
    pub fn new(tile_size: u32, min_zoom: u8, max_zoom: u8, map_width: f64, map_height: f64) -> Self {
        let max_zoom = max_zoom.min(MAX_LEVEL);
        Self {
            tile_size: tile_size.max(1),
            min_zoom: min_zoom.min(max_zoom),
            max_zoom,
            map_width: map_width.max(0.0),
            map_height: map_height.max(0.0),
        }
    }

    /// Square world whose full resolution is exactly `tile_size * 2^max_zoom`,
    /// the classic web-map layout.
    pub fn square(tile_size: u32, min_zoom: u8, max_zoom: u8) -> Self {
        let side = tile_size as f64 * 2_f64.powi(max_zoom as i32);
        Self::new(tile_size, min_zoom, max_zoom, side, side)
    }

    /// World pixels per level pixel at `level`.
    pub fn level_divisor(&self, level: u8) -> f64 {
        2_f64.powi(self.max_zoom as i32 - level as i32)
    }

    /// Number of tile columns and rows at `level`.
    pub fn tiles_at(&self, level: u8) -> (u32, u32) {
        let divisor = self.level_divisor(level);
        let ts = self.tile_size as f64;
        let cols = (self.map_width / divisor / ts).ceil().max(1.0) as u32;
        let rows = (self.map_height / divisor / ts).ceil().max(1.0) as u32;
        (cols, rows)
    }

    pub fn has_level(&self, level: u8) -> bool {
        level >= self.min_zoom && level <= self.max_zoom
    }

    /// Whether `key` names an existing tile of this pyramid.
    pub fn contains(&self, key: &TileKey) -> bool {
        if !self.has_level(key.level) {
            return false;
        }
        let (cols, rows) = self.tiles_at(key.level);
        key.x < cols && key.y < rows
    }

    /// Map an unwrapped column index onto a real column, wrapping when
    /// `wrap_x` is set and rejecting out-of-range columns otherwise.
    pub fn resolve_column(&self, level: u8, x: i64, wrap_x: bool) -> Option<u32> {
        let (cols, _) = self.tiles_at(level);
        let cols = cols as i64;
        if wrap_x {
            Some(x.rem_euclid(cols) as u32)
        } else if (0..cols).contains(&x) {
            Some(x as u32)
        } else {
            None
        }
    }
}
