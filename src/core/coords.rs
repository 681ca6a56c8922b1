//! Conversions between world pixels, per-level pixels and screen pixels.
//!
//! * world pixels: full-resolution image pixels (pixels of the native level)
//! * level pixels: pixels of one pyramid level, `world / 2^(native - level)`
//! * screen pixels: CSS pixels of the viewport; device pixels are
//!   `css * device_pixel_ratio`
//!
//! Everything in here is pure.

use crate::core::geo::{Point, PyramidGrid, TileRange};
use crate::core::view::ViewState;

/// Screen pixels per level pixel when drawing `level` at `zoom`.
pub fn level_scale(zoom: f64, level: u8) -> f64 {
    2_f64.powf(zoom - level as f64)
}

/// World pixels per level pixel.
pub fn level_divisor(native_level: u8, level: i32) -> f64 {
    2_f64.powi(native_level as i32 - level)
}

pub fn world_to_level(world: Point, native_level: u8, level: i32) -> Point {
    world.multiply(1.0 / level_divisor(native_level, level))
}

/// Top-left corner of the viewport expressed in level pixels.
pub fn top_left_level(center_world: Point, css_size: Point, native_level: u8, level: u8, scale: f64) -> Point {
    let center = world_to_level(center_world, native_level, level as i32);
    let half_extent = css_size.multiply(0.5 / scale);
    center.subtract(&half_extent)
}

/// Screen position (CSS pixels) of a level-space position.
pub fn level_to_screen(level_pos: Point, top_left: Point, scale: f64) -> Point {
    level_pos.subtract(&top_left).multiply(scale)
}

/// Round a level coordinate to the nearest device-pixel boundary so that
/// panning does not shimmer.
pub fn snap_to_device(v: f64, scale: f64, dpr: f64) -> f64 {
    let k = scale * dpr;
    if k <= 0.0 || !k.is_finite() {
        return v;
    }
    (v * k).round() / k
}

pub fn snap_point(p: Point, scale: f64, dpr: f64) -> Point {
    Point::new(snap_to_device(p.x, scale, dpr), snap_to_device(p.y, scale, dpr))
}

/// Tile holding a world position at `level`. Columns wrap when `wrap_x` is
/// set, everything else clamps into the grid.
pub fn tile_index(world: Point, grid: &PyramidGrid, level: u8, wrap_x: bool) -> (u32, u32) {
    let pos = world_to_level(world, grid.max_zoom, level as i32);
    let ts = grid.tile_size as f64;
    let (cols, rows) = grid.tiles_at(level);
    let tx = (pos.x / ts).floor() as i64;
    let ty = (pos.y / ts).floor() as i64;
    let x = if wrap_x {
        tx.rem_euclid(cols as i64)
    } else {
        tx.clamp(0, cols as i64 - 1)
    };
    let y = ty.clamp(0, rows as i64 - 1);
    (x as u32, y as u32)
}

/// Geometry of one pyramid level as drawn in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelFrame {
    pub level: u8,
    /// CSS pixels per level pixel
    pub scale: f64,
    /// Snapped top-left of the viewport in level pixels
    pub top_left: Point,
    /// Tiles intersecting the viewport (x unwrapped when the view wraps)
    pub range: TileRange,
}

impl LevelFrame {
    /// Compute the frame geometry of `level` for `view`.
    pub fn compute(view: &ViewState, grid: &PyramidGrid, level: u8) -> Self {
        let zoom = view.clamped_zoom();
        let scale = level_scale(zoom, level);
        let css = view.css_size();
        let dpr = view.pixel_ratio();
        let top_left = snap_point(
            top_left_level(view.center, css, grid.max_zoom, level, scale),
            scale,
            dpr,
        );
        let range = visible_range(grid, level, top_left, css.multiply(1.0 / scale), view.wrap_x);
        Self {
            level,
            scale,
            top_left,
            range,
        }
    }

    /// Screen-space (CSS pixel) origin of the tile at unwrapped column `x`, row `y`.
    pub fn tile_origin(&self, x: i64, y: i64, tile_size: u32) -> Point {
        let ts = tile_size as f64;
        level_to_screen(Point::new(x as f64 * ts, y as f64 * ts), self.top_left, self.scale)
    }
}

fn visible_range(grid: &PyramidGrid, level: u8, top_left: Point, extent: Point, wrap_x: bool) -> TileRange {
    let ts = grid.tile_size as f64;
    let (cols, rows) = grid.tiles_at(level);

    let mut min_x = (top_left.x / ts).floor() as i64;
    let mut max_x = ((top_left.x + extent.x) / ts).ceil() as i64 - 1;
    let mut min_y = (top_left.y / ts).floor() as i64;
    let mut max_y = ((top_left.y + extent.y) / ts).ceil() as i64 - 1;

    if !wrap_x {
        min_x = min_x.max(0);
        max_x = max_x.min(cols as i64 - 1);
    }
    min_y = min_y.max(0);
    max_y = max_y.min(rows as i64 - 1);

    TileRange {
        level,
        min_x,
        max_x,
        min_y,
        max_y,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_world_to_level() {
        let world = Point::new(4096.0, 1024.0);
        assert_eq!(world_to_level(world, 10, 8), Point::new(1024.0, 256.0));
        assert_eq!(world_to_level(world, 10, 10), world);
        assert!(approx(level_scale(3.5, 3), 2_f64.sqrt()));
    }

    #[test]
    fn test_screen_position_from_center() {
        // Native level 4, drawn at zoom 4: level pixels == world pixels.
        let center = Point::new(2048.0, 2048.0);
        let css = Point::new(800.0, 600.0);
        let tl = top_left_level(center, css, 4, 4, 1.0);
        assert_eq!(tl, Point::new(1648.0, 1748.0));
        assert_eq!(level_to_screen(center, tl, 1.0), Point::new(400.0, 300.0));
    }

    #[test]
    fn test_snap_to_device() {
        assert!(approx(snap_to_device(10.26, 1.0, 2.0), 10.5));
        assert!(approx(snap_to_device(10.2, 1.0, 1.0), 10.0));
        assert!(approx(snap_to_device(3.3, 0.0, 1.0), 3.3));
    }

    #[test]
    fn test_tile_index_wraps_or_clamps() {
        let grid = PyramidGrid::square(256, 0, 3);
        // Level 2 has 4 columns of 256 level px = 512 world px each.
        assert_eq!(tile_index(Point::new(600.0, 10.0), &grid, 2, false), (1, 0));
        assert_eq!(tile_index(Point::new(-10.0, 10.0), &grid, 2, true), (3, 0));
        assert_eq!(tile_index(Point::new(-10.0, 10.0), &grid, 2, false), (0, 0));
        assert_eq!(tile_index(Point::new(99_999.0, 99_999.0), &grid, 2, false), (3, 3));
    }

    #[test]
    fn test_level_frame_covers_viewport() {
        let grid = PyramidGrid::square(256, 0, 4);
        let view = ViewState::new(4.0, Point::new(2048.0, 2048.0), 512.0, 512.0).with_pyramid(256, 4);
        let frame = LevelFrame::compute(&view, &grid, 4);
        // 512px viewport centered on a tile corner: 2x2 tiles.
        assert_eq!(frame.range.min_x, 7);
        assert_eq!(frame.range.max_x, 8);
        assert_eq!(frame.range.len(), 4);
        assert_eq!(frame.tile_origin(7, 7, 256), Point::new(0.0, 0.0));
    }

    #[test]
    fn test_level_frame_clamps_without_wrap() {
        let grid = PyramidGrid::square(256, 0, 2);
        let view = ViewState::new(2.0, Point::new(0.0, 0.0), 1024.0, 1024.0).with_pyramid(256, 2);
        let frame = LevelFrame::compute(&view, &grid, 2);
        assert_eq!(frame.range.min_x, 0);
        assert_eq!(frame.range.min_y, 0);
        assert_eq!(frame.range.max_x, 1);

        let wrapped = LevelFrame::compute(&view.clone().with_wrap_x(true), &grid, 2);
        assert_eq!(wrapped.range.min_x, -2);
    }
}
