//! Frame-rate estimate shown on the overlay.

use std::time::Instant;

/// Default smoothing weight applied to the previous estimate.
pub const DEFAULT_ALPHA: f64 = 0.9;

/// Exponentially weighted moving average of the frame rate.
///
/// `fps = alpha * fps + (1 - alpha) * (1 / dt)` where `dt` is the time since the
/// previous tick. The first tick only sets the baseline and reports 0.
#[derive(Clone, Debug)]
pub struct FpsCounter {
    alpha: f64,
    last: Option<Instant>,
    fps: f64,
}

impl FpsCounter {
    /// `alpha` must lie in (0, 1); out-of-range values fall back to the default.
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha > 0.0 && alpha < 1.0 {
            alpha
        } else {
            DEFAULT_ALPHA
        };
        Self {
            alpha,
            last: None,
            fps: 0.0,
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Current estimate without ticking.
    pub fn current(&self) -> f64 {
        self.fps
    }

    /// Record a frame now and return the updated estimate.
    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Record a frame at `now` and return the updated estimate.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        let Some(last) = self.last.replace(now) else {
            return 0.0;
        };
        let dt = now.saturating_duration_since(last).as_secs_f64();
        if dt == 0.0 {
            return self.fps;
        }
        self.fps = self.alpha * self.fps + (1.0 - self.alpha) * (1.0 / dt);
        self.fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn first_tick_reports_zero() {
        let mut fps = FpsCounter::default();
        assert_eq!(fps.tick(), 0.0);
    }

    #[test]
    fn ema_over_fixed_intervals() {
        let mut fps = FpsCounter::new(0.9);
        let base = Instant::now();
        assert_eq!(fps.tick_at(base), 0.0);
        assert!(close(fps.tick_at(base + Duration::from_secs(1)), 0.1));
        assert!(close(fps.tick_at(base + Duration::from_secs(2)), 0.19));
    }

    #[test]
    fn zero_interval_keeps_previous_value() {
        let mut fps = FpsCounter::new(0.9);
        let base = Instant::now();
        fps.tick_at(base);
        let t1 = base + Duration::from_millis(500);
        let value = fps.tick_at(t1);
        assert!(close(value, 0.2));
        assert_eq!(fps.tick_at(t1), value);
        assert_eq!(fps.current(), value);
    }

    #[test]
    fn invalid_alpha_falls_back_to_default() {
        assert_eq!(FpsCounter::new(1.0).alpha(), DEFAULT_ALPHA);
        assert_eq!(FpsCounter::new(0.0).alpha(), DEFAULT_ALPHA);
        assert_eq!(FpsCounter::new(0.5).alpha(), 0.5);
    }
}
