use crate::core::geo::Point;

/// Convenience functions for common animations
pub fn ease_out_cubic(t: f64) -> f64 {
    EasingType::EaseOut.apply(t)
}

pub fn lerp(start: f64, end: f64, t: f64) -> f64 {
    start + (end - start) * t
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EasingType {
    Linear,
    EaseIn,
    EaseOut,
    EaseInOut,
    Smooth,
}

impl EasingType {
    /// Apply easing function to a normalized time value (0.0 to 1.0)
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            EasingType::Linear => t,
            EasingType::EaseIn => t * t * t,
            EasingType::EaseOut => {
                let t = t - 1.0;
                t * t * t + 1.0
            }
            EasingType::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            // Smooth step (3t^2 - 2t^3)
            EasingType::Smooth => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// A pan/zoom animation sampled once per frame tick.
///
/// Zoom is interpolated linearly in zoom space, which is logarithmic in
/// scale, so the apparent zoom speed stays constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewAnimation {
    start_ms: f64,
    duration_ms: f64,
    easing: EasingType,
    from_zoom: f64,
    to_zoom: f64,
    from_center: Point,
    to_center: Point,
}

/// One sample of a [`ViewAnimation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationSample {
    pub zoom: f64,
    pub center: Point,
    pub finished: bool,
}

impl ViewAnimation {
    pub fn new(
        start_ms: f64,
        duration_ms: f64,
        from_zoom: f64,
        to_zoom: f64,
        from_center: Point,
        to_center: Point,
    ) -> Self {
        Self::with_easing(
            start_ms,
            duration_ms,
            EasingType::EaseOut,
            from_zoom,
            to_zoom,
            from_center,
            to_center,
        )
    }

    pub fn with_easing(
        start_ms: f64,
        duration_ms: f64,
        easing: EasingType,
        from_zoom: f64,
        to_zoom: f64,
        from_center: Point,
        to_center: Point,
    ) -> Self {
        Self {
            start_ms,
            duration_ms: duration_ms.max(0.0),
            easing,
            from_zoom,
            to_zoom,
            from_center,
            to_center,
        }
    }

    pub fn target_zoom(&self) -> f64 {
        self.to_zoom
    }

    pub fn sample(&self, now_ms: f64) -> AnimationSample {
        let elapsed = now_ms - self.start_ms;
        if self.duration_ms <= 0.0 || elapsed >= self.duration_ms {
            return AnimationSample {
                zoom: self.to_zoom,
                center: self.to_center,
                finished: true,
            };
        }

        let t = self.easing.apply(elapsed.max(0.0) / self.duration_ms);
        AnimationSample {
            zoom: lerp(self.from_zoom, self.to_zoom, t),
            center: Point::new(
                lerp(self.from_center.x, self.to_center.x, t),
                lerp(self.from_center.y, self.to_center.y, t),
            ),
            finished: false,
        }
    }
}
