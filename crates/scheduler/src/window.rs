//! Velocity-adaptive prefetch windows
//!
//! Derives three nested row windows from the reader's scroll state:
//! 1. Render - the rows on screen plus a small margin
//! 2. Safety - what the reader reaches within the next few frames
//! 3. Background - opportunistic runway, biased toward the scroll direction
//!
//! Windows are closed row intervals clamped to `[0, total_rows - 1]`. Padding
//! cut off at either end of the dataset is not moved to the other side.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::Range;

/// 0-based position of a record in the shared dataset ordering
pub type RowIndex = u32;

/// Direction of travel through the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward lower row indices
    Up,
    /// Toward higher row indices
    #[default]
    Down,
}

impl Direction {
    /// `-1.0` for up, `1.0` for down
    pub fn sign(self) -> f64 {
        match self {
            Direction::Up => -1.0,
            Direction::Down => 1.0,
        }
    }
}

/// Coarse device class, used to pick padding and concurrency defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

/// A contiguous run of rows
///
/// Stored half-open; `first()` and `last()` give the closed bounds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexRange {
    start: RowIndex,
    end: RowIndex,
}

impl IndexRange {
    /// The empty range
    pub const EMPTY: IndexRange = IndexRange { start: 0, end: 0 };

    /// Half-open range `start..end`. An inverted range is empty.
    pub fn new(start: RowIndex, end: RowIndex) -> Self {
        if end <= start {
            Self::EMPTY
        } else {
            Self { start, end }
        }
    }

    /// Closed range `[first, last]`
    pub fn inclusive(first: RowIndex, last: RowIndex) -> Self {
        if last < first {
            Self::EMPTY
        } else {
            Self {
                start: first,
                end: last.saturating_add(1),
            }
        }
    }

    /// Closed range `[lo, hi]` clipped to the rows of a dataset with
    /// `total_rows` rows
    pub fn clamped(lo: i64, hi: i64, total_rows: RowIndex) -> Self {
        if total_rows == 0 || hi < lo {
            return Self::EMPTY;
        }
        let max = i64::from(total_rows) - 1;
        let lo = lo.clamp(0, max);
        let hi = hi.clamp(0, max);
        if hi < lo {
            return Self::EMPTY;
        }
        // Both bounds are within [0, total_rows - 1] and fit in a RowIndex
        Self::inclusive(lo as RowIndex, hi as RowIndex)
    }

    /// Smallest range covering every index in the iterator
    pub fn spanning<I>(indices: I) -> Self
    where
        I: IntoIterator<Item = RowIndex>,
    {
        let mut bounds: Option<(RowIndex, RowIndex)> = None;
        for index in indices {
            bounds = Some(match bounds {
                None => (index, index),
                Some((lo, hi)) => (lo.min(index), hi.max(index)),
            });
        }
        match bounds {
            Some((lo, hi)) => Self::inclusive(lo, hi),
            None => Self::EMPTY,
        }
    }

    /// First row, or `None` for an empty range
    pub fn first(&self) -> Option<RowIndex> {
        (!self.is_empty()).then_some(self.start)
    }

    /// Last row, or `None` for an empty range
    pub fn last(&self) -> Option<RowIndex> {
        (!self.is_empty()).then(|| self.end - 1)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, index: RowIndex) -> bool {
        index >= self.start && index < self.end
    }

    /// Whether every row of `other` is also in `self`. The empty range is
    /// contained in everything.
    pub fn contains_range(&self, other: &IndexRange) -> bool {
        other.is_empty() || (self.start <= other.start && other.end <= self.end)
    }

    pub fn intersects(&self, other: &IndexRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Rows of the range in ascending order
    pub fn iter(&self) -> Range<RowIndex> {
        self.start..self.end
    }
}

impl fmt::Debug for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.first(), self.last()) {
            (Some(first), Some(last)) => write!(f, "[{}, {}]", first, last),
            _ => write!(f, "[]"),
        }
    }
}

impl Serialize for IndexRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("IndexRange", 3)?;
        state.serialize_field("first", &self.first())?;
        state.serialize_field("last", &self.last())?;
        state.serialize_field("len", &self.len())?;
        state.end()
    }
}

/// The three nested windows for one scroll state
///
/// `render ⊆ safety ⊆ background` holds for everything produced by
/// [`WindowPolicy::compute`]; the type itself does not enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WindowSet {
    pub render: IndexRange,
    pub safety: IndexRange,
    pub background: IndexRange,
}

impl WindowSet {
    pub fn new(render: IndexRange, safety: IndexRange, background: IndexRange) -> Self {
        Self {
            render,
            safety,
            background,
        }
    }

    /// Windows for an empty dataset
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the windows are nested render within safety within background
    pub fn is_nested(&self) -> bool {
        self.safety.contains_range(&self.render) && self.background.contains_range(&self.safety)
    }
}

/// Inputs to the window computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScrollState {
    /// Row at the vertical center of the viewport
    pub center_index: RowIndex,

    /// Speed in rows per second; the sign is ignored
    pub velocity: f64,

    pub direction: Direction,

    pub device: DeviceClass,
}

impl ScrollState {
    pub fn new(center_index: RowIndex, velocity: f64, direction: Direction, device: DeviceClass) -> Self {
        Self {
            center_index,
            velocity,
            direction,
            device,
        }
    }

    /// A reader parked at `center_index`
    pub fn idle(center_index: RowIndex, device: DeviceClass) -> Self {
        Self::new(center_index, 0.0, Direction::Down, device)
    }
}

/// Padding for one window, in rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    /// Each side, while the reader is stationary
    pub idle: u32,
    /// Opposite the direction of travel
    pub behind: u32,
    /// In the direction of travel
    pub ahead: u32,
}

impl Padding {
    pub const fn new(idle: u32, behind: u32, ahead: u32) -> Self {
        Self {
            idle,
            behind,
            ahead,
        }
    }
}

/// Paddings and speed threshold for one device class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowProfile {
    /// Added around the center row
    pub render: Padding,
    /// Added beyond the render window
    pub safety: Padding,
    /// Added beyond the safety window
    pub background: Padding,
    /// Rows per second above which safety and background padding are scaled
    pub fast_threshold: f64,
}

impl WindowProfile {
    pub fn desktop() -> Self {
        Self {
            render: Padding::new(60, 40, 80),
            safety: Padding::new(250, 150, 400),
            background: Padding::new(450, 250, 900),
            fast_threshold: 20.0,
        }
    }

    /// Touch scrolling flings harder, so the fast threshold is lower and the
    /// backward trail longer.
    pub fn mobile() -> Self {
        Self {
            render: Padding::new(60, 40, 80),
            safety: Padding::new(250, 200, 400),
            background: Padding::new(300, 150, 700),
            fast_threshold: 6.0,
        }
    }
}

/// Largest accepted [`WindowPolicy::fast_factor`]
pub const MAX_FAST_FACTOR: f64 = 100.0;

/// Pure mapping from scroll state to windows
///
/// # Example
///
/// ```
/// use lectern_scheduler::{DeviceClass, ScrollState, WindowPolicy};
///
/// let policy = WindowPolicy::default();
/// let windows = policy.compute(&ScrollState::idle(15_000, DeviceClass::Desktop), 31_102);
///
/// assert!(windows.render.contains(15_000));
/// assert!(windows.is_nested());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    pub desktop: WindowProfile,
    pub mobile: WindowProfile,
    /// Rows per second below which the reader counts as stationary
    pub moving_threshold: f64,
    /// Multiplier for safety and background padding above the fast threshold
    pub fast_factor: f64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            desktop: WindowProfile::desktop(),
            mobile: WindowProfile::mobile(),
            moving_threshold: 1.0,
            fast_factor: 2.0,
        }
    }
}

impl WindowPolicy {
    pub fn profile(&self, device: DeviceClass) -> &WindowProfile {
        match device {
            DeviceClass::Desktop => &self.desktop,
            DeviceClass::Mobile => &self.mobile,
        }
    }

    /// Set the multiplier applied to safety and background padding when fast
    pub fn with_fast_factor(mut self, factor: f64) -> Self {
        self.fast_factor = factor;
        self
    }

    /// Check the speed tunables, returning the name of the first bad field
    ///
    /// `fast_factor` must lie in `[1, MAX_FAST_FACTOR]`; thresholds must be
    /// finite and non-negative.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !(1.0..=MAX_FAST_FACTOR).contains(&self.fast_factor) {
            return Err("fast_factor");
        }
        if !is_threshold(self.moving_threshold) {
            return Err("moving_threshold");
        }
        if !is_threshold(self.desktop.fast_threshold) {
            return Err("desktop.fast_threshold");
        }
        if !is_threshold(self.mobile.fast_threshold) {
            return Err("mobile.fast_threshold");
        }
        Ok(())
    }

    /// Compute the windows for `state` over a dataset of `total_rows` rows
    ///
    /// Deterministic and side-effect free. For `total_rows == 0` every window
    /// is empty; otherwise every window contains the clamped center row.
    pub fn compute(&self, state: &ScrollState, total_rows: RowIndex) -> WindowSet {
        if total_rows == 0 {
            return WindowSet::empty();
        }

        let profile = self.profile(state.device);
        let center = i64::from(state.center_index.min(total_rows - 1));
        let speed = if state.velocity.is_finite() {
            state.velocity.abs()
        } else {
            0.0
        };
        let moving = speed >= self.moving_threshold;
        let scale = if speed > profile.fast_threshold {
            self.fast_factor.max(1.0)
        } else {
            1.0
        };

        let (up, down) = sides(profile.render, moving, state.direction, 1.0);
        let render = (center.saturating_sub(up), center.saturating_add(down));

        let (up, down) = sides(profile.safety, moving, state.direction, scale);
        let safety = (render.0.saturating_sub(up), render.1.saturating_add(down));

        let (up, down) = sides(profile.background, moving, state.direction, scale);
        let background = (safety.0.saturating_sub(up), safety.1.saturating_add(down));

        WindowSet {
            render: IndexRange::clamped(render.0, render.1, total_rows),
            safety: IndexRange::clamped(safety.0, safety.1, total_rows),
            background: IndexRange::clamped(background.0, background.1, total_rows),
        }
    }
}

fn is_threshold(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Padding toward lower and higher indices respectively
fn sides(padding: Padding, moving: bool, direction: Direction, scale: f64) -> (i64, i64) {
    let scaled = |rows: u32| (f64::from(rows) * scale).round() as i64;
    if !moving {
        let each = scaled(padding.idle);
        return (each, each);
    }
    match direction {
        Direction::Down => (scaled(padding.behind), scaled(padding.ahead)),
        Direction::Up => (scaled(padding.ahead), scaled(padding.behind)),
    }
}
