//! Direction-biased eviction hints
//!
//! The scheduler tells the cache where the reader is. Eviction then keeps
//! the rows on screen and the runway ahead, drops the trail behind the
//! reader first, and only then touches everything else.

use crate::record::{DatasetId, RecordKey};
use lectern_scheduler::{IndexRange, WindowSet};
use std::cmp::Ordering;

/// Eviction order of an entry; lower classes go first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum EvictionClass {
    Trail,
    Other,
    Protected,
}

/// Rows of the active dataset that eviction keeps or prefers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionHints {
    pub dataset: DatasetId,
    /// Never evicted
    pub pinned: IndexRange,
    /// Never evicted
    pub forward: IndexRange,
    /// Evicted before unrelated rows
    pub trail: IndexRange,
}

impl EvictionHints {
    /// Hints for a reader at `windows`
    ///
    /// The render window is pinned. The direction of travel is read from
    /// which side of the background window reaches further past the render
    /// window: that side and the render window are protected, the other side
    /// is the trail. A symmetric window protects the whole background.
    ///
    /// # Example
    ///
    /// ```
    /// use lectern_cache::{DatasetId, EvictionHints};
    /// use lectern_scheduler::{IndexRange, WindowSet};
    ///
    /// let windows = WindowSet::new(
    ///     IndexRange::inclusive(100, 120),
    ///     IndexRange::inclusive(80, 200),
    ///     IndexRange::inclusive(50, 500),
    /// );
    /// let hints = EvictionHints::from_windows(DatasetId::new("KJV"), &windows);
    ///
    /// assert_eq!(hints.forward, IndexRange::inclusive(100, 500));
    /// assert_eq!(hints.trail, IndexRange::inclusive(50, 99));
    /// ```
    pub fn from_windows(dataset: DatasetId, windows: &WindowSet) -> Self {
        let render = windows.render;
        let background = windows.background;
        let bounds = (
            render.first(),
            render.last(),
            background.first(),
            background.last(),
        );
        let (Some(render_first), Some(render_last), Some(first), Some(last)) = bounds else {
            return Self {
                dataset,
                pinned: render,
                forward: IndexRange::EMPTY,
                trail: IndexRange::EMPTY,
            };
        };

        let reach_up = render_first.saturating_sub(first);
        let reach_down = last.saturating_sub(render_last);
        let (forward, trail) = match reach_down.cmp(&reach_up) {
            Ordering::Greater => (
                IndexRange::inclusive(render_first, last),
                IndexRange::new(first, render_first),
            ),
            Ordering::Less => (
                IndexRange::inclusive(first, render_last),
                IndexRange::inclusive(render_last.saturating_add(1), last),
            ),
            Ordering::Equal => (background, IndexRange::EMPTY),
        };

        Self {
            dataset,
            pinned: render,
            forward,
            trail,
        }
    }

    pub(crate) fn class(&self, key: &RecordKey) -> EvictionClass {
        if key.dataset != self.dataset {
            return EvictionClass::Other;
        }
        if self.pinned.contains(key.index) || self.forward.contains(key.index) {
            EvictionClass::Protected
        } else if self.trail.contains(key.index) {
            EvictionClass::Trail
        } else {
            EvictionClass::Other
        }
    }
}
