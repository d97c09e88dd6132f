//! Lectern Scheduler Library
//!
//! Scroll-driven building blocks for the prefetch pipeline: velocity
//! estimation, the window policy, tier-ordered batch queues, cancellation
//! tokens and the fetch worker pool.
//!
//! # Example
//!
//! ```
//! use lectern_scheduler::{
//!     DeviceClass, ScrollState, VelocityConfig, VelocityTracker, WindowPolicy,
//! };
//! use std::time::{Duration, Instant};
//!
//! let mut tracker = VelocityTracker::new(VelocityConfig::default());
//! let start = Instant::now();
//! tracker.observe(start, 0.0);
//! tracker.observe(start + Duration::from_millis(16), 64.0);
//!
//! let velocity = tracker.current_velocity_at(start + Duration::from_millis(16));
//! let state = ScrollState::new(1_200, velocity.rows_per_sec, velocity.direction, DeviceClass::Desktop);
//! let windows = WindowPolicy::default().compute(&state, 31_102);
//!
//! assert!(windows.is_nested());
//! ```

mod cancel;
mod priority;
mod velocity;
mod window;
mod worker;

// Re-export public API
pub use cancel::CancellationToken;
pub use priority::{BatchId, BatchPriority, BatchQueue, QueuedBatch, WindowTier};
pub use velocity::{Velocity, VelocityConfig, VelocityTracker};
pub use window::{
    DeviceClass, Direction, IndexRange, Padding, RowIndex, ScrollState, WindowPolicy,
    WindowProfile, WindowSet, MAX_FAST_FACTOR,
};
pub use worker::{JobSource, WorkSignal, WorkerPool, WorkerPoolConfig};
