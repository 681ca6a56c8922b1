use serde::{Deserialize, Serialize};

use crate::core::geo::Point;

/// Read-only description of what the host wants to show this frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    /// Fractional zoom; integer values coincide with pyramid levels
    pub zoom: f64,
    /// View center in world pixels (full-resolution image pixels)
    pub center: Point,
    /// Viewport width in device pixels
    pub viewport_width: f64,
    /// Viewport height in device pixels
    pub viewport_height: f64,
    /// Device pixels per CSS pixel
    pub device_pixel_ratio: f64,
    /// Repeat the image horizontally
    pub wrap_x: bool,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Native tile size of the pyramid in pixels
    pub tile_size: u32,
    /// Native (full-resolution) level of the pyramid
    pub max_level: u8,
}

impl ViewState {
    pub fn new(zoom: f64, center: Point, viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            zoom,
            center,
            viewport_width,
            viewport_height,
            ..Default::default()
        }
    }

    pub fn with_pixel_ratio(mut self, dpr: f64) -> Self {
        self.device_pixel_ratio = dpr;
        self
    }

    pub fn with_zoom_bounds(mut self, min_zoom: f64, max_zoom: f64) -> Self {
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        self
    }

    pub fn with_pyramid(mut self, tile_size: u32, max_level: u8) -> Self {
        self.tile_size = tile_size;
        self.max_level = max_level;
        self
    }

    pub fn with_wrap_x(mut self, wrap_x: bool) -> Self {
        self.wrap_x = wrap_x;
        self
    }

    /// Zoom clamped to the view's allowed range.
    pub fn clamped_zoom(&self) -> f64 {
        if self.min_zoom <= self.max_zoom {
            self.zoom.clamp(self.min_zoom, self.max_zoom)
        } else {
            self.zoom
        }
    }

    pub fn pixel_ratio(&self) -> f64 {
        if self.device_pixel_ratio > 0.0 {
            self.device_pixel_ratio
        } else {
            1.0
        }
    }

    /// Viewport size in CSS pixels.
    pub fn css_size(&self) -> Point {
        let dpr = self.pixel_ratio();
        Point::new(self.viewport_width / dpr, self.viewport_height / dpr)
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: 0.0,
            center: Point::default(),
            viewport_width: 1024.0,
            viewport_height: 768.0,
            device_pixel_ratio: 1.0,
            wrap_x: false,
            min_zoom: 0.0,
            max_zoom: 20.0,
            tile_size: crate::core::constants::TILE_SIZE,
            max_level: 0,
        }
    }
}

/// Tracks whether the view is "moving": an interaction happened within the
/// last `window_ms`, or a pan/zoom animation is in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionState {
    last_interaction_ms: Option<f64>,
    animating: bool,
    window_ms: f64,
}

impl MotionState {
    pub fn new(window_ms: f64) -> Self {
        Self {
            last_interaction_ms: None,
            animating: false,
            window_ms,
        }
    }

    pub fn note_interaction(&mut self, now_ms: f64) {
        self.last_interaction_ms = Some(now_ms);
    }

    pub fn set_animating(&mut self, animating: bool) {
        self.animating = animating;
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    pub fn is_moving(&self, now_ms: f64) -> bool {
        if self.animating {
            return true;
        }
        self.last_interaction_ms
            .is_some_and(|t| now_ms - t < self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_size_uses_pixel_ratio() {
        let view = ViewState::new(3.0, Point::new(0.0, 0.0), 2000.0, 1000.0).with_pixel_ratio(2.0);
        assert_eq!(view.css_size(), Point::new(1000.0, 500.0));

        let broken = ViewState::new(3.0, Point::new(0.0, 0.0), 800.0, 600.0).with_pixel_ratio(0.0);
        assert_eq!(broken.pixel_ratio(), 1.0);
    }

    #[test]
    fn test_clamped_zoom() {
        let view = ViewState::new(12.5, Point::default(), 10.0, 10.0).with_zoom_bounds(1.0, 8.0);
        assert_eq!(view.clamped_zoom(), 8.0);
    }

    #[test]
    fn test_motion_window() {
        let mut motion = MotionState::new(50.0);
        assert!(!motion.is_moving(0.0));

        motion.note_interaction(100.0);
        assert!(motion.is_moving(120.0));
        assert!(!motion.is_moving(151.0));

        motion.set_animating(true);
        assert!(motion.is_moving(10_000.0));
    }
}
