//! Prefetch scheduler
//!
//! Turns window changes into fetch batches and keeps the record cache in step
//! with them:
//!
//! - Render and safety misses are queued immediately as high-priority work.
//!   Rows they need are taken away from queued background batches.
//! - Background misses are queued once the windows have been still for the
//!   debounce interval, in larger batches.
//! - Background batches whose rows all fell out of the background window are
//!   cancelled, queued or in flight. Dispatched high-priority batches are
//!   only cancelled when the active dataset changes.
//! - At most `concurrency(device)` batches are in flight, and background
//!   batches may only use `low_slots(device)` of those.
//!
//! Every row of a dispatched batch is `Loading` in the cache until the batch
//! completes or is cancelled, at which point it becomes ready, failed or
//! missing again.

use crate::config::PrefetchConfig;
use crate::diagnostics::{BatchHistory, BatchRecord, BatchStatus};
use crate::loader::{BatchResults, FetchError, RecordLoader};
use lectern_cache::{DatasetId, EvictionHints, RecordCache, RecordKey};
use lectern_scheduler::{
    BatchId, BatchPriority, BatchQueue, CancellationToken, DeviceClass, IndexRange, QueuedBatch,
    RowIndex, WindowSet, WindowTier, WorkSignal,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// A dispatched unit of fetch work
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub id: BatchId,
    pub dataset: DatasetId,
    /// Sorted, without duplicates
    pub indices: Vec<RowIndex>,
    pub tier: WindowTier,
    pub created_at: Instant,
    pub cancel: CancellationToken,
}

impl FetchBatch {
    pub fn priority(&self) -> BatchPriority {
        self.tier.priority()
    }

    /// Smallest range covering the batch's rows
    pub fn range(&self) -> IndexRange {
        IndexRange::spanning(self.indices.iter().copied())
    }
}

/// Scheduler counters and queue occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// Batches waiting to dispatch
    pub queue_size: usize,
    pub queued_high: usize,
    pub queued_low: usize,
    pub in_flight_high: usize,
    pub in_flight_low: usize,
    /// Whether any batch is in flight
    pub is_processing: bool,
    /// Whether a debounced background pass is waiting
    pub background_pending: bool,
    pub concurrency_cap: usize,
    /// Batches that reached the loader and came back, successfully or not
    pub total_batches_processed: u64,
    pub batches_dispatched: u64,
    pub batches_cancelled: u64,
    pub batches_errored: u64,
    pub records_loaded: u64,
    pub records_failed: u64,
    /// Results that arrived for batches already cancelled
    pub late_results_discarded: u64,
    /// Ranges of the most recently completed batches, newest last
    pub recently_completed: Vec<IndexRange>,
}

#[derive(Debug)]
struct PendingWork {
    dataset: DatasetId,
    indices: Vec<RowIndex>,
    created_at: Instant,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct InFlight {
    dataset: DatasetId,
    tier: WindowTier,
    indices: Vec<RowIndex>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Counters {
    total_batches_processed: u64,
    batches_dispatched: u64,
    batches_cancelled: u64,
    batches_errored: u64,
    records_loaded: u64,
    records_failed: u64,
    late_results_discarded: u64,
}

struct SchedulerState {
    dataset: Option<DatasetId>,
    windows: Option<WindowSet>,
    device: DeviceClass,
    queue: BatchQueue<PendingWork>,
    in_flight: HashMap<BatchId, InFlight>,
    background_due: Option<Instant>,
    history: BatchHistory,
    recently_completed: VecDeque<IndexRange>,
    counters: Counters,
}

/// Priority fetch scheduler bound to one record cache
///
/// All methods take `&self`. Workers call [`next_batch`](Self::next_batch)
/// and [`complete_batch`](Self::complete_batch); the viewport side calls
/// [`on_window_set_changed`](Self::on_window_set_changed).
///
/// # Example
///
/// ```
/// use lectern_cache::{DatasetId, EvictionHints, RecordCache, RecordKey};
/// use lectern_core::{BatchResults, PrefetchConfig, PrefetchScheduler};
/// use lectern_scheduler::{DeviceClass, IndexRange, WindowSet};
/// use std::sync::Arc;
///
/// let cache = Arc::new(RecordCache::with_watermarks(1_000, 800));
/// let scheduler = PrefetchScheduler::new(
///     cache.clone(),
///     PrefetchConfig::default().with_debounce_ms(0),
///     DeviceClass::Desktop,
/// );
///
/// let kjv = DatasetId::new("KJV");
/// let range = IndexRange::inclusive(0, 9);
/// scheduler.on_window_set_changed(WindowSet::new(range, range, range), &kjv);
///
/// let batch = scheduler.next_batch().unwrap();
/// let results: BatchResults = batch
///     .indices
///     .iter()
///     .map(|&index| (index, Ok(format!("verse {}", index))))
///     .collect();
/// scheduler.complete_batch(batch.id, Ok(results));
///
/// assert!(cache.contains_ready(&RecordKey::new(kjv, 9)));
/// ```
pub struct PrefetchScheduler {
    cache: Arc<RecordCache>,
    config: PrefetchConfig,
    state: Mutex<SchedulerState>,
    signal: Arc<WorkSignal>,
    epoch: Instant,
}

impl PrefetchScheduler {
    pub fn new(cache: Arc<RecordCache>, config: PrefetchConfig, device: DeviceClass) -> Self {
        let history = BatchHistory::new(config.history_capacity);
        Self {
            cache,
            config,
            state: Mutex::new(SchedulerState {
                dataset: None,
                windows: None,
                device,
                queue: BatchQueue::new(),
                in_flight: HashMap::new(),
                background_due: None,
                history,
                recently_completed: VecDeque::new(),
                counters: Counters::default(),
            }),
            signal: Arc::new(WorkSignal::new()),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal notified whenever work is queued or a slot frees up
    pub fn signal(&self) -> Arc<WorkSignal> {
        self.signal.clone()
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn active_dataset(&self) -> Option<DatasetId> {
        self.lock().dataset.clone()
    }

    pub fn windows(&self) -> Option<WindowSet> {
        self.lock().windows
    }

    pub fn device_class(&self) -> DeviceClass {
        self.lock().device
    }

    /// Current in-flight cap
    pub fn concurrency_cap(&self) -> usize {
        self.config.concurrency(self.lock().device)
    }

    /// Switch device class; the new cap applies to the next dispatch
    pub fn set_device_class(&self, device: DeviceClass) {
        let mut state = self.lock();
        if state.device != device {
            log::info!(
                "device class {:?} -> {:?}, concurrency cap {}",
                state.device,
                device,
                self.config.concurrency(device)
            );
            state.device = device;
        }
        drop(state);
        self.signal.notify();
    }

    /// Plan fetches for new windows
    pub fn on_window_set_changed(&self, windows: WindowSet, dataset: &DatasetId) {
        self.on_window_set_changed_at(windows, dataset, Instant::now());
    }

    /// [`on_window_set_changed`](Self::on_window_set_changed) with an
    /// explicit clock reading for the background debounce
    pub fn on_window_set_changed_at(&self, windows: WindowSet, dataset: &DatasetId, now: Instant) {
        let mut state = self.lock();
        if state.dataset.as_ref() != Some(dataset) {
            self.activate_dataset(&mut state, dataset.clone(), now);
        }
        let background_changed = state
            .windows
            .map_or(true, |previous| previous.background != windows.background);
        state.windows = Some(windows);
        self.plan(&mut state, background_changed, now);
        drop(state);
        self.signal.notify();
    }

    /// Queue any background work whose debounce has elapsed
    ///
    /// Returns `true` if a background pass ran.
    pub fn flush_due_at(&self, now: Instant) -> bool {
        let mut state = self.lock();
        let flushed = self.flush_due(&mut state, now);
        drop(state);
        if flushed {
            self.signal.notify();
        }
        flushed
    }

    /// Queue pending background work without waiting for the debounce
    pub fn flush_background(&self) {
        let mut state = self.lock();
        if state.background_due.is_some() {
            self.queue_background(&mut state, Instant::now());
        }
        drop(state);
        self.signal.notify();
    }

    /// Take the next batch to fetch, if a slot is free
    pub fn next_batch(&self) -> Option<FetchBatch> {
        self.next_batch_at(Instant::now())
    }

    /// [`next_batch`](Self::next_batch) with an explicit clock reading
    pub fn next_batch_at(&self, now: Instant) -> Option<FetchBatch> {
        let mut state = self.lock();
        self.flush_due(&mut state, now);

        loop {
            if state.in_flight.len() >= self.config.concurrency(state.device) {
                return None;
            }
            if !state.queue.peek()?.priority().is_high() {
                let low_in_flight = state
                    .in_flight
                    .values()
                    .filter(|flight| !flight.tier.priority().is_high())
                    .count();
                if low_in_flight >= self.config.low_slots(state.device) {
                    return None;
                }
            }

            let queued = state.queue.pop()?;
            let work = queued.payload;
            if work.cancel.is_cancelled() || state.dataset.as_ref() != Some(&work.dataset) {
                state.counters.batches_cancelled += 1;
                continue;
            }

            // Rows may have loaded or been claimed since the batch was cut
            let indices: Vec<RowIndex> = self
                .cache
                .fetchable(&work.dataset, work.indices.iter().copied(), self.config.max_attempts)
                .into_iter()
                .filter(|&row| {
                    self.cache
                        .mark_loading(RecordKey::new(work.dataset.clone(), row), work.cancel.clone())
                })
                .collect();
            if indices.is_empty() {
                log::trace!("batch {} has nothing left to fetch", queued.id);
                continue;
            }

            let batch = FetchBatch {
                id: queued.id,
                dataset: work.dataset,
                indices,
                tier: queued.tier,
                created_at: work.created_at,
                cancel: work.cancel,
            };
            state.in_flight.insert(
                batch.id,
                InFlight {
                    dataset: batch.dataset.clone(),
                    tier: batch.tier,
                    indices: batch.indices.clone(),
                    cancel: batch.cancel.clone(),
                },
            );
            state.counters.batches_dispatched += 1;
            state.history.push(BatchRecord {
                batch_id: batch.id,
                dataset: batch.dataset.clone(),
                priority: batch.priority(),
                tier: batch.tier,
                index_range: batch.range(),
                requested: batch.indices.len(),
                result_count: 0,
                status: BatchStatus::Dispatched,
                elapsed_ms: self.elapsed_ms(now),
            });
            log::trace!(
                "dispatching batch {} ({:?}, {} rows of {} in {})",
                batch.id,
                batch.tier,
                batch.indices.len(),
                batch.dataset,
                batch.range()
            );
            return Some(batch);
        }
    }

    /// Report the outcome of a dispatched batch and release its slot
    ///
    /// Results for a batch that was cancelled in the meantime are discarded.
    pub fn complete_batch(
        &self,
        batch_id: BatchId,
        outcome: Result<BatchResults, FetchError>,
    ) -> BatchStatus {
        let now = Instant::now();
        let mut state = self.lock();
        let Some(flight) = state.in_flight.remove(&batch_id) else {
            state.counters.late_results_discarded += 1;
            log::trace!("discarding results of cancelled batch {}", batch_id);
            return BatchStatus::Cancelled;
        };
        let elapsed_ms = self.elapsed_ms(now);

        let status = if flight.cancel.is_cancelled() || matches!(outcome, Err(FetchError::Cancelled)) {
            self.revert(&flight);
            state.counters.batches_cancelled += 1;
            state.history.update(batch_id, BatchStatus::Cancelled, 0, elapsed_ms);
            BatchStatus::Cancelled
        } else {
            match outcome {
                Ok(mut results) => {
                    let (loaded, failed) = self.store_results(&flight, &mut results);
                    state.counters.records_loaded += loaded as u64;
                    state.counters.records_failed += failed as u64;
                    state.counters.total_batches_processed += 1;
                    state.history.update(batch_id, BatchStatus::Completed, loaded, elapsed_ms);
                    self.remember_completed(&mut state, &flight);
                    if failed > 0 {
                        log::warn!(
                            "batch {}: {} of {} rows failed",
                            batch_id,
                            failed,
                            flight.indices.len()
                        );
                    }
                    BatchStatus::Completed
                }
                Err(err) => {
                    let reason = err.to_string();
                    let failed = flight
                        .indices
                        .iter()
                        .filter(|&&row| {
                            self.cache
                                .fail(&RecordKey::new(flight.dataset.clone(), row), reason.as_str())
                        })
                        .count();
                    state.counters.records_failed += failed as u64;
                    state.counters.batches_errored += 1;
                    state.counters.total_batches_processed += 1;
                    state.history.update(batch_id, BatchStatus::Errored, 0, elapsed_ms);
                    log::warn!("batch {} of {} failed: {}", batch_id, flight.dataset, reason);
                    BatchStatus::Errored
                }
            }
        };
        drop(state);
        self.signal.notify();
        status
    }

    /// Cancel all work for a dataset and drop its cached records
    ///
    /// If the dataset is active, the current windows are planned again so
    /// visible rows are refetched. Returns the number of records dropped.
    pub fn clear_dataset(&self, dataset: &DatasetId) -> usize {
        let now = Instant::now();
        let mut state = self.lock();

        let ids: Vec<BatchId> = state
            .in_flight
            .iter()
            .filter(|(_, flight)| &flight.dataset == dataset)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.cancel_in_flight(&mut state, id, now);
        }
        let removed = state.queue.remove_if(|batch| &batch.payload.dataset == dataset);
        self.discard_queued(&mut state, removed);

        let dropped = self.cache.clear(dataset);
        if state.dataset.as_ref() == Some(dataset) {
            state.background_due = None;
            self.plan(&mut state, true, now);
        }
        drop(state);
        self.signal.notify();
        dropped
    }

    /// Whether nothing is queued, in flight or waiting on the debounce
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight.is_empty() && state.background_due.is_none()
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        let in_flight_high = state
            .in_flight
            .values()
            .filter(|flight| flight.tier.priority().is_high())
            .count();
        SchedulerStats {
            queue_size: state.queue.len(),
            queued_high: state.queue.count_priority(BatchPriority::High),
            queued_low: state.queue.count_priority(BatchPriority::Low),
            in_flight_high,
            in_flight_low: state.in_flight.len() - in_flight_high,
            is_processing: !state.in_flight.is_empty(),
            background_pending: state.background_due.is_some(),
            concurrency_cap: self.config.concurrency(state.device),
            total_batches_processed: state.counters.total_batches_processed,
            batches_dispatched: state.counters.batches_dispatched,
            batches_cancelled: state.counters.batches_cancelled,
            batches_errored: state.counters.batches_errored,
            records_loaded: state.counters.records_loaded,
            records_failed: state.counters.records_failed,
            late_results_discarded: state.counters.late_results_discarded,
            recently_completed: state.recently_completed.iter().copied().collect(),
        }
    }

    /// Recent batches, oldest first
    pub fn history(&self) -> Vec<BatchRecord> {
        self.lock().history.records()
    }

    /// Fetch on the calling thread until nothing more can dispatch at `now`
    ///
    /// Returns the number of batches run. Background work still inside its
    /// debounce interval stays pending.
    pub fn run_until_idle_at(&self, loader: &dyn RecordLoader, now: Instant) -> usize {
        let mut processed = 0;
        while let Some(batch) = self.next_batch_at(now) {
            let outcome = load_guarded(loader, &batch);
            self.complete_batch(batch.id, outcome);
            processed += 1;
        }
        processed
    }

    fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn activate_dataset(&self, state: &mut SchedulerState, dataset: DatasetId, now: Instant) {
        let ids: Vec<BatchId> = state.in_flight.keys().copied().collect();
        for id in ids {
            self.cancel_in_flight(state, id, now);
        }
        let drained = state.queue.drain();
        self.discard_queued(state, drained);
        state.background_due = None;
        state.windows = None;

        let reset = self.cache.forget_failures(&dataset);
        match state.dataset.replace(dataset.clone()) {
            Some(previous) => log::info!(
                "active dataset {} -> {} ({} failed records reset)",
                previous,
                dataset,
                reset
            ),
            None => log::info!("active dataset {}", dataset),
        }
    }

    /// Queue high-priority misses for the current windows and arm the
    /// background pass
    fn plan(&self, state: &mut SchedulerState, background_changed: bool, now: Instant) {
        let (Some(windows), Some(dataset)) = (state.windows, state.dataset.clone()) else {
            return;
        };

        self.cache
            .set_eviction_hints(EvictionHints::from_windows(dataset.clone(), &windows));
        self.cancel_outside(state, &windows.background, now);

        let queued_high: HashSet<RowIndex> = state
            .queue
            .iter()
            .filter(|batch| batch.priority().is_high())
            .flat_map(|batch| batch.payload.indices.iter().copied())
            .collect();
        let render_rows = self.cache.fetchable(
            &dataset,
            windows.render.iter().filter(|row| !queued_high.contains(row)),
            self.config.max_attempts,
        );
        let safety_rows = self.cache.fetchable(
            &dataset,
            windows
                .safety
                .iter()
                .filter(|&row| !windows.render.contains(row) && !queued_high.contains(&row)),
            self.config.max_attempts,
        );

        if !render_rows.is_empty() || !safety_rows.is_empty() {
            let claimed: HashSet<RowIndex> =
                render_rows.iter().chain(safety_rows.iter()).copied().collect();
            let emptied = state.queue.edit_payloads(|tier, work| {
                if tier.priority().is_high() {
                    return true;
                }
                work.indices.retain(|row| !claimed.contains(row));
                !work.indices.is_empty()
            });
            if !emptied.is_empty() {
                log::trace!("{} background batches absorbed by high-priority work", emptied.len());
            }
        }

        let center = window_center(&windows.render);
        for (tier, rows) in [(WindowTier::Render, render_rows), (WindowTier::Safety, safety_rows)] {
            let mut runs = contiguous_runs(&rows, self.config.high_batch_size);
            nearest_first(&mut runs, center);
            for indices in runs {
                self.enqueue(state, tier, &dataset, indices, now);
            }
        }

        if self.config.debounce_ms == 0 {
            self.queue_background(state, now);
        } else if background_changed || state.background_due.is_none() {
            state.background_due = Some(now + self.config.debounce());
        }
    }

    fn flush_due(&self, state: &mut SchedulerState, now: Instant) -> bool {
        match state.background_due {
            Some(due) if due <= now => {
                self.queue_background(state, now);
                true
            }
            _ => false,
        }
    }

    /// Queue background misses that no queued batch covers yet
    fn queue_background(&self, state: &mut SchedulerState, now: Instant) {
        state.background_due = None;
        let (Some(windows), Some(dataset)) = (state.windows, state.dataset.clone()) else {
            return;
        };

        let queued: HashSet<RowIndex> = state
            .queue
            .iter()
            .flat_map(|batch| batch.payload.indices.iter().copied())
            .collect();
        let rows = self.cache.fetchable(
            &dataset,
            windows.background.iter().filter(|row| !queued.contains(row)),
            self.config.max_attempts,
        );
        if rows.is_empty() {
            return;
        }

        let mut chunks: Vec<Vec<RowIndex>> = rows
            .chunks(self.config.background_batch_size.max(1))
            .map(<[RowIndex]>::to_vec)
            .collect();
        nearest_first(&mut chunks, window_center(&windows.render));
        log::debug!(
            "queueing {} background rows of {} in {} batches",
            rows.len(),
            dataset,
            chunks.len()
        );
        for indices in chunks {
            self.enqueue(state, WindowTier::Background, &dataset, indices, now);
        }
    }

    fn enqueue(
        &self,
        state: &mut SchedulerState,
        tier: WindowTier,
        dataset: &DatasetId,
        indices: Vec<RowIndex>,
        now: Instant,
    ) -> BatchId {
        state.queue.push(
            tier,
            PendingWork {
                dataset: dataset.clone(),
                indices,
                created_at: now,
                cancel: CancellationToken::new(),
            },
        )
    }

    /// Cancel background work that no longer touches the background window
    /// and trim queued batches to it
    fn cancel_outside(&self, state: &mut SchedulerState, background: &IndexRange, now: Instant) {
        let stale: Vec<BatchId> = state
            .in_flight
            .iter()
            .filter(|(_, flight)| {
                !flight.tier.priority().is_high()
                    && !flight.indices.iter().any(|&row| background.contains(row))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.cancel_in_flight(state, id, now);
        }

        let dropped = state.queue.edit_payloads(|_, work| {
            work.indices.retain(|&row| background.contains(row));
            !work.indices.is_empty()
        });
        self.discard_queued(state, dropped);
    }

    fn cancel_in_flight(&self, state: &mut SchedulerState, id: BatchId, now: Instant) {
        let Some(flight) = state.in_flight.remove(&id) else {
            return;
        };
        flight.cancel.cancel();
        self.revert(&flight);
        state.counters.batches_cancelled += 1;
        state
            .history
            .update(id, BatchStatus::Cancelled, 0, self.elapsed_ms(now));
        log::debug!(
            "cancelled batch {} ({:?}, {} rows of {})",
            id,
            flight.tier,
            flight.indices.len(),
            flight.dataset
        );
    }

    fn discard_queued(
        &self,
        state: &mut SchedulerState,
        batches: Vec<QueuedBatch<PendingWork>>,
    ) {
        for batch in batches {
            batch.payload.cancel.cancel();
            state.counters.batches_cancelled += 1;
        }
    }

    /// Put the loading rows of a batch back to their state before dispatch
    fn revert(&self, flight: &InFlight) {
        for &row in &flight.indices {
            self.cache
                .cancel(&RecordKey::new(flight.dataset.clone(), row));
        }
    }

    /// Returns (loaded, failed) row counts
    fn store_results(&self, flight: &InFlight, results: &mut BatchResults) -> (usize, usize) {
        let mut loaded = 0;
        let mut failed = 0;
        for &row in &flight.indices {
            let key = RecordKey::new(flight.dataset.clone(), row);
            match results.remove(&row) {
                Some(Ok(text)) => {
                    if self.cache.resolve(&key, text) {
                        loaded += 1;
                    }
                }
                Some(Err(FetchError::Cancelled)) => {
                    self.cache.cancel(&key);
                }
                Some(Err(err)) => {
                    if self.cache.fail(&key, err.to_string()) {
                        failed += 1;
                    }
                }
                None => {
                    if self.cache.fail(&key, "no result returned for row") {
                        failed += 1;
                    }
                }
            }
        }
        (loaded, failed)
    }

    fn remember_completed(&self, state: &mut SchedulerState, flight: &InFlight) {
        let capacity = self.config.recent_completed_capacity;
        if capacity == 0 {
            return;
        }
        while state.recently_completed.len() >= capacity {
            state.recently_completed.pop_front();
        }
        state
            .recently_completed
            .push_back(IndexRange::spanning(flight.indices.iter().copied()));
    }
}

/// Run the loader for one batch, turning a panic into a batch failure so
/// the batch's rows never stay loading
pub(crate) fn load_guarded(
    loader: &dyn RecordLoader,
    batch: &FetchBatch,
) -> Result<BatchResults, FetchError> {
    if batch.cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }
    match panic::catch_unwind(AssertUnwindSafe(|| {
        loader.load_batch(&batch.dataset, &batch.indices, &batch.cancel)
    })) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("loader panicked on batch {}: {}", batch.id, reason);
            Err(FetchError::Failed(format!("loader panicked: {}", reason)))
        }
    }
}

fn window_center(range: &IndexRange) -> Option<RowIndex> {
    Some(range.first()? + (range.last()? - range.first()?) / 2)
}

/// Split sorted rows into runs of consecutive indices, at most `max_len` long
fn contiguous_runs(rows: &[RowIndex], max_len: usize) -> Vec<Vec<RowIndex>> {
    let max_len = max_len.max(1);
    let mut runs = Vec::new();
    let mut current: Vec<RowIndex> = Vec::new();
    for &row in rows {
        let breaks = current
            .last()
            .is_some_and(|&last| last.checked_add(1) != Some(row))
            || current.len() >= max_len;
        if breaks {
            runs.push(mem::take(&mut current));
        }
        current.push(row);
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Order batches by their distance from the viewport center; ties keep
/// ascending order
fn nearest_first(batches: &mut [Vec<RowIndex>], center: Option<RowIndex>) {
    let Some(center) = center else {
        return;
    };
    batches.sort_by_key(|rows| match (rows.first(), rows.last()) {
        (Some(&first), _) if center < first => first - center,
        (_, Some(&last)) if center > last => center - last,
        _ => 0,
    });
}
