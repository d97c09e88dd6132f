//! Scroll velocity estimation
//!
//! Turns raw scroll offsets (pixels) into a speed in rows per second and a
//! direction of travel. The estimate is a least-squares slope over a short
//! rolling buffer of recent samples, which smooths out the jitter of
//! individual scroll events without lagging behind direction changes.

use crate::window::Direction;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Slopes smaller than this (rows per second) do not change direction
const DIRECTION_EPSILON: f64 = 0.01;

/// Smallest usable row height in pixels
const MIN_ROW_HEIGHT: f64 = 1.0;

/// Speed and direction of the reader
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Velocity {
    /// Rows per second, never negative
    pub rows_per_sec: f64,
    pub direction: Direction,
}

impl Velocity {
    /// A stationary reader facing `direction`
    pub fn idle(direction: Direction) -> Self {
        Self {
            rows_per_sec: 0.0,
            direction,
        }
    }

    /// Rows per second, negative when moving up
    pub fn signed(&self) -> f64 {
        self.rows_per_sec * self.direction.sign()
    }
}

/// Tunables for [`VelocityTracker`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Samples kept in the rolling buffer
    pub sample_capacity: usize,
    /// Samples older than this are ignored
    pub staleness_ms: u64,
    /// Height of one row, used to convert pixel offsets to rows
    pub row_height_px: f64,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            sample_capacity: 8,
            staleness_ms: 250,
            row_height_px: 32.0,
        }
    }
}

impl VelocityConfig {
    pub fn with_row_height(mut self, px: f64) -> Self {
        self.row_height_px = px;
        self
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_ms)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    rows: f64,
}

/// Rolling velocity estimator
///
/// # Example
///
/// ```
/// use lectern_scheduler::{Direction, VelocityConfig, VelocityTracker};
/// use std::time::{Duration, Instant};
///
/// let mut tracker = VelocityTracker::new(VelocityConfig::default().with_row_height(10.0));
/// let start = Instant::now();
/// for step in 0..4u32 {
///     let at = start + Duration::from_millis(50 * u64::from(step));
///     tracker.observe(at, f64::from(step) * 50.0);
/// }
///
/// let velocity = tracker.current_velocity_at(start + Duration::from_millis(150));
/// assert!((velocity.rows_per_sec - 100.0).abs() < 1e-6);
/// assert_eq!(velocity.direction, Direction::Down);
/// ```
#[derive(Debug, Clone)]
pub struct VelocityTracker {
    samples: VecDeque<Sample>,
    capacity: usize,
    staleness: Duration,
    row_height: f64,
    last_direction: Direction,
}

impl VelocityTracker {
    pub fn new(config: VelocityConfig) -> Self {
        let capacity = config.sample_capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            staleness: config.staleness(),
            row_height: config.row_height_px.max(MIN_ROW_HEIGHT),
            last_direction: Direction::Down,
        }
    }

    /// Record the scroll offset (pixels) observed at `at`
    ///
    /// Samples older than the newest one already recorded are dropped, as are
    /// non-finite offsets.
    pub fn observe(&mut self, at: Instant, position_px: f64) {
        if !position_px.is_finite() {
            return;
        }
        if let Some(newest) = self.samples.back() {
            if at < newest.at {
                log::trace!("dropping out-of-order scroll sample");
                return;
            }
        }

        self.samples.push_back(Sample {
            at,
            rows: position_px / self.row_height,
        });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        while let Some(oldest) = self.samples.front() {
            if at.saturating_duration_since(oldest.at) > self.staleness {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        let slope = self.slope(at);
        if slope > DIRECTION_EPSILON {
            self.last_direction = Direction::Down;
        } else if slope < -DIRECTION_EPSILON {
            self.last_direction = Direction::Up;
        }
    }

    /// Velocity as of now
    pub fn current_velocity(&self) -> Velocity {
        self.current_velocity_at(Instant::now())
    }

    /// Velocity as of `now`, ignoring samples older than the staleness window
    ///
    /// With fewer than two fresh samples the speed is zero and the direction
    /// is the last one observed (down before any movement).
    pub fn current_velocity_at(&self, now: Instant) -> Velocity {
        let slope = self.slope(now);
        let direction = if slope > DIRECTION_EPSILON {
            Direction::Down
        } else if slope < -DIRECTION_EPSILON {
            Direction::Up
        } else {
            self.last_direction
        };
        Velocity {
            rows_per_sec: slope.abs(),
            direction,
        }
    }

    /// Row height used for new samples. Existing samples keep their row
    /// positions, so a resize does not register as movement.
    pub fn set_row_height(&mut self, px: f64) {
        if px.is_finite() {
            self.row_height = px.max(MIN_ROW_HEIGHT);
        }
    }

    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    /// Forget all samples, e.g. after a programmatic jump
    pub fn reset(&mut self) {
        self.samples.clear();
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Least-squares slope in rows per second over samples fresh at `now`
    fn slope(&self, now: Instant) -> f64 {
        let fresh: Vec<Sample> = self
            .samples
            .iter()
            .filter(|sample| now.saturating_duration_since(sample.at) <= self.staleness)
            .copied()
            .collect();
        if fresh.len() < 2 {
            return 0.0;
        }

        let origin = fresh[0].at;
        let n = fresh.len() as f64;
        let times: Vec<f64> = fresh
            .iter()
            .map(|sample| sample.at.duration_since(origin).as_secs_f64())
            .collect();
        let mean_t = times.iter().sum::<f64>() / n;
        let mean_y = fresh.iter().map(|sample| sample.rows).sum::<f64>() / n;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (t, sample) in times.iter().zip(&fresh) {
            let dt = t - mean_t;
            sxx += dt * dt;
            sxy += dt * (sample.rows - mean_y);
        }
        if sxx <= f64::EPSILON {
            return 0.0;
        }
        sxy / sxx
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new(VelocityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> VelocityTracker {
        VelocityTracker::new(VelocityConfig::default().with_row_height(10.0))
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_no_samples_is_idle_down() {
        let tracker = tracker();
        let velocity = tracker.current_velocity();
        assert_eq!(velocity, Velocity::idle(Direction::Down));
    }

    #[test]
    fn test_single_sample_is_idle() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start, 500.0);
        assert_eq!(tracker.current_velocity_at(start).rows_per_sec, 0.0);
    }

    #[test]
    fn test_steady_downward_scroll() {
        let mut tracker = tracker();
        let start = Instant::now();
        for step in 0..5u64 {
            tracker.observe(start + ms(16 * step), 16.0 * step as f64);
        }

        // 16px per 16ms at 10px rows = 100 rows/s
        let velocity = tracker.current_velocity_at(start + ms(64));
        assert!((velocity.rows_per_sec - 100.0).abs() < 1e-6);
        assert_eq!(velocity.direction, Direction::Down);
        assert!(velocity.signed() > 0.0);
    }

    #[test]
    fn test_upward_scroll() {
        let mut tracker = tracker();
        let start = Instant::now();
        for step in 0..4u64 {
            tracker.observe(start + ms(20 * step), 1_000.0 - 40.0 * step as f64);
        }

        let velocity = tracker.current_velocity_at(start + ms(60));
        assert_eq!(velocity.direction, Direction::Up);
        assert!((velocity.rows_per_sec - 200.0).abs() < 1e-6);
        assert!(velocity.signed() < 0.0);
    }

    #[test]
    fn test_stale_samples_are_ignored() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start, 0.0);
        tracker.observe(start + ms(16), 160.0);

        // Long after the last sample the reader counts as stopped
        let velocity = tracker.current_velocity_at(start + ms(1_000));
        assert_eq!(velocity.rows_per_sec, 0.0);
        // ...but still faces the way it was going
        assert_eq!(velocity.direction, Direction::Down);
    }

    #[test]
    fn test_direction_survives_stop() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start, 500.0);
        tracker.observe(start + ms(16), 400.0);
        tracker.observe(start + ms(32), 400.0);
        tracker.observe(start + ms(48), 400.0);

        let later = tracker.current_velocity_at(start + ms(2_000));
        assert_eq!(later, Velocity::idle(Direction::Up));
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut tracker = VelocityTracker::new(VelocityConfig {
            sample_capacity: 4,
            staleness_ms: 10_000,
            row_height_px: 10.0,
        });
        let start = Instant::now();
        for step in 0..20u64 {
            tracker.observe(start + ms(step), step as f64);
        }
        assert_eq!(tracker.sample_count(), 4);
    }

    #[test]
    fn test_out_of_order_sample_dropped() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start + ms(100), 0.0);
        tracker.observe(start, 10_000.0);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn test_non_finite_position_dropped() {
        let mut tracker = tracker();
        tracker.observe(Instant::now(), f64::NAN);
        assert_eq!(tracker.sample_count(), 0);
    }

    #[test]
    fn test_same_timestamp_is_not_infinite() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start, 0.0);
        tracker.observe(start, 900.0);
        assert_eq!(tracker.current_velocity_at(start).rows_per_sec, 0.0);
    }

    #[test]
    fn test_row_height_floor() {
        let mut tracker = tracker();
        tracker.set_row_height(0.0);
        assert_eq!(tracker.row_height(), MIN_ROW_HEIGHT);
        tracker.set_row_height(f64::INFINITY);
        assert_eq!(tracker.row_height(), MIN_ROW_HEIGHT);
    }

    #[test]
    fn test_reset_clears_samples() {
        let mut tracker = tracker();
        let start = Instant::now();
        tracker.observe(start, 0.0);
        tracker.observe(start + ms(10), 10.0);
        tracker.reset();
        assert_eq!(tracker.sample_count(), 0);
    }
}
