//! Reader session
//!
//! The thin layer between a scrolling view and the prefetch machinery. The
//! view reports scroll samples and the row at the center of the viewport;
//! the session turns those into windows, forwards changed windows to the
//! scheduler, and answers record reads straight from the cache.

use crate::config::LecternConfig;
use crate::diagnostics::DiagnosticsSnapshot;
use crate::driver::FetchDriver;
use crate::error::SessionResult;
use crate::loader::RecordLoader;
use crate::prefetch::{PrefetchScheduler, SchedulerStats};
use lectern_cache::{CacheConfig, CacheStats, DatasetId, RecordCache, RecordKey, RecordState};
use lectern_scheduler::{
    DeviceClass, RowIndex, ScrollState, Velocity, VelocityTracker, WindowSet, WorkerPool,
    WorkerPoolConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One reader's view onto a set of datasets
///
/// # Example
///
/// ```
/// use lectern_core::{BatchResults, FetchError, LecternConfig, ReaderSession};
/// use lectern_cache::DatasetId;
/// use lectern_scheduler::{CancellationToken, DeviceClass};
///
/// let mut session = ReaderSession::new(LecternConfig::default(), "KJV").unwrap();
/// session.report_center_index(15_000, DeviceClass::Desktop);
///
/// let loader = |_: &DatasetId, indices: &[u32], _: &CancellationToken|
///  -> Result<BatchResults, FetchError> {
///     Ok(indices.iter().map(|&i| (i, Ok(format!("verse {}", i)))).collect())
/// };
/// session.pump(&loader);
///
/// let record = session.read_record(&DatasetId::new("KJV"), 15_000);
/// assert_eq!(record.text(), Some("verse 15000"));
/// ```
pub struct ReaderSession {
    config: LecternConfig,
    cache: Arc<RecordCache>,
    scheduler: Arc<PrefetchScheduler>,
    tracker: VelocityTracker,
    dataset: DatasetId,
    device: DeviceClass,
    center: Option<RowIndex>,
    windows: Option<WindowSet>,
    workers: Option<WorkerPool>,
}

impl ReaderSession {
    /// Create a session reading `dataset`
    ///
    /// # Errors
    /// [`SessionError::Config`](crate::SessionError::Config) if the
    /// configuration does not validate.
    pub fn new(config: LecternConfig, dataset: impl Into<DatasetId>) -> SessionResult<Self> {
        config.validate()?;
        let device = DeviceClass::default();
        let cache = Arc::new(RecordCache::new(&config.cache));
        let scheduler = Arc::new(PrefetchScheduler::new(
            cache.clone(),
            config.prefetch.clone(),
            device,
        ));
        let tracker = VelocityTracker::new(config.velocity.clone());

        Ok(Self {
            config,
            cache,
            scheduler,
            tracker,
            dataset: dataset.into(),
            device,
            center: None,
            windows: None,
            workers: None,
        })
    }

    pub fn config(&self) -> &LecternConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<PrefetchScheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn active_dataset(&self) -> &DatasetId {
        &self.dataset
    }

    pub fn device_class(&self) -> DeviceClass {
        self.device
    }

    /// Stepped center row, once one has been reported
    pub fn center_index(&self) -> Option<RowIndex> {
        self.center
    }

    /// Windows last forwarded to the scheduler
    pub fn windows(&self) -> Option<WindowSet> {
        self.windows
    }

    pub fn velocity(&self) -> Velocity {
        self.tracker.current_velocity()
    }

    /// Change the row height used to convert scroll offsets into rows
    pub fn set_row_height(&mut self, px: f64) {
        self.tracker.set_row_height(px);
    }

    /// Feed a raw scroll offset into the velocity tracker
    pub fn report_scroll(&mut self, at: Instant, position_px: f64) {
        self.tracker.observe(at, position_px);
        if self.center.is_some() {
            self.recompute(at);
        }
    }

    /// Report the row at the center of the viewport
    ///
    /// Returns the windows for the new position.
    pub fn report_center_index(&mut self, index: RowIndex, device: DeviceClass) -> WindowSet {
        self.report_center_index_at(index, device, Instant::now())
    }

    /// [`report_center_index`](Self::report_center_index) with an explicit
    /// clock reading
    pub fn report_center_index_at(
        &mut self,
        index: RowIndex,
        device: DeviceClass,
        now: Instant,
    ) -> WindowSet {
        if device != self.device {
            self.switch_device(device);
        }
        self.center = Some(self.anchor(index));
        self.recompute(now)
    }

    /// Switch the dataset being read
    ///
    /// Work for the previous dataset is cancelled; its cached records stay.
    pub fn set_active_dataset(&mut self, dataset: impl Into<DatasetId>) {
        self.set_active_dataset_at(dataset, Instant::now());
    }

    pub fn set_active_dataset_at(&mut self, dataset: impl Into<DatasetId>, now: Instant) {
        let dataset = dataset.into();
        if dataset == self.dataset {
            return;
        }
        self.dataset = dataset;
        if let Some(windows) = self.windows {
            self.scheduler
                .on_window_set_changed_at(windows, &self.dataset, now);
        }
    }

    /// Drop every cached record of a dataset and cancel its work
    pub fn clear_dataset(&self, dataset: &DatasetId) -> usize {
        self.scheduler.clear_dataset(dataset)
    }

    /// Current state of a record; never starts a fetch
    pub fn read_record(&self, dataset: &DatasetId, index: RowIndex) -> RecordState {
        self.cache.get(&RecordKey::new(dataset.clone(), index))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics_at(Instant::now())
    }

    pub fn diagnostics_at(&self, now: Instant) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            dataset: self.scheduler.active_dataset(),
            center_index: self.center,
            windows: self.windows,
            velocity: self.tracker.current_velocity_at(now),
            device: self.device,
            concurrency_cap: self.scheduler.concurrency_cap(),
            cache: self.cache.stats(),
            scheduler: self.scheduler.stats(),
            recent_batches: self.scheduler.history(),
        }
    }

    /// Start background fetch workers using `loader`
    ///
    /// Running workers are stopped first.
    ///
    /// # Errors
    /// [`SessionError::WorkerSpawn`](crate::SessionError::WorkerSpawn) if a
    /// worker thread cannot be spawned.
    pub fn start_workers(&mut self, loader: Arc<dyn RecordLoader>) -> SessionResult<()> {
        self.stop_workers();
        let driver = Arc::new(FetchDriver::new(self.scheduler.clone(), loader));
        let pool = WorkerPool::new(
            driver,
            self.scheduler.signal(),
            WorkerPoolConfig::new(self.config.session.workers),
        )?;
        self.workers = Some(pool);
        Ok(())
    }

    /// Stop background workers, letting running batches finish
    pub fn stop_workers(&mut self) {
        if let Some(pool) = self.workers.take() {
            pool.shutdown();
        }
    }

    pub fn has_workers(&self) -> bool {
        self.workers.is_some()
    }

    /// Fetch on the calling thread until nothing more can dispatch
    ///
    /// Returns the number of batches run.
    pub fn pump(&self, loader: &dyn RecordLoader) -> usize {
        self.pump_at(loader, Instant::now())
    }

    /// [`pump`](Self::pump) with an explicit clock reading; background work
    /// still inside its debounce interval at `now` is not run
    pub fn pump_at(&self, loader: &dyn RecordLoader, now: Instant) -> usize {
        self.scheduler.run_until_idle_at(loader, now)
    }

    /// Block until the scheduler has nothing queued or in flight, or until
    /// `timeout` passes. Returns `true` if it went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let signal = self.scheduler.signal();
        loop {
            let seen = signal.generation();
            if self.scheduler.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            // Debounced background work only becomes visible when polled
            self.scheduler.flush_due_at(now);
            signal.wait_for_change(seen, (deadline - now).min(Duration::from_millis(50)));
        }
    }

    /// Watermarks follow the device while the configured ones are a
    /// per-device default; explicit watermarks stay fixed.
    fn switch_device(&mut self, device: DeviceClass) {
        let follows_device = [DeviceClass::Desktop, DeviceClass::Mobile]
            .into_iter()
            .any(|class| self.config.cache == CacheConfig::for_device(class));
        self.device = device;
        self.scheduler.set_device_class(device);
        if follows_device {
            let watermarks = CacheConfig::for_device(device);
            self.cache
                .set_watermarks(watermarks.high_water_mark, watermarks.target_size);
            log::debug!(
                "cache watermarks {}/{} for {:?}",
                watermarks.high_water_mark,
                watermarks.target_size,
                device
            );
        }
    }

    fn anchor(&self, index: RowIndex) -> RowIndex {
        let total = self.config.session.total_rows;
        if total == 0 {
            return 0;
        }
        let step = self.config.session.anchor_step.max(1);
        let clamped = index.min(total - 1);
        clamped - clamped % step
    }

    fn recompute(&mut self, now: Instant) -> WindowSet {
        let center = self.center.unwrap_or(0);
        let velocity = self.tracker.current_velocity_at(now);
        let state = ScrollState::new(center, velocity.rows_per_sec, velocity.direction, self.device);
        let windows = self
            .config
            .windows
            .compute(&state, self.config.session.total_rows);

        if self.windows != Some(windows) {
            log::debug!(
                "windows at {} ({:.1} rows/s {:?}): render {} safety {} background {}",
                center,
                velocity.rows_per_sec,
                velocity.direction,
                windows.render,
                windows.safety,
                windows.background
            );
            self.windows = Some(windows);
            self.scheduler
                .on_window_set_changed_at(windows, &self.dataset, now);
        }
        windows
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.stop_workers();
    }
}
