//! Record cache with watermark eviction
//!
//! Holds the lifecycle state of every record the prefetcher has touched.
//! Ready and failed records are evictable; loading records are pinned until
//! their batch resolves, fails or is cancelled. When the cache grows past its
//! high-water mark, entries are evicted until it is back at its target size.
//!
//! With [`EvictionHints`] set, rows on screen and ahead of the reader are
//! kept, the trail behind the reader goes first, and least-recently-read
//! order applies within each group. Without hints eviction is plain LRU.

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::eviction::{EvictionClass, EvictionHints};
use crate::record::{DatasetId, RecordKey, RecordState};
use lectern_scheduler::{CancellationToken, RowIndex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Snapshot of cache occupancy and traffic
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries of any state, across all datasets
    pub total_size: usize,

    /// Entries per dataset
    pub per_dataset_size: BTreeMap<DatasetId, usize>,

    /// Entries currently loading
    pub in_flight_count: usize,

    pub ready_count: usize,

    pub failed_count: usize,

    pub high_water_mark: usize,

    pub target_size: usize,

    /// Reads that found ready text
    pub hits: u64,

    /// Reads that did not
    pub misses: u64,

    /// Entries removed by eviction
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of reads that found ready text (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Size relative to the high-water mark
    pub fn utilization(&self) -> f64 {
        if self.high_water_mark == 0 {
            0.0
        } else {
            self.total_size as f64 / self.high_water_mark as f64
        }
    }
}

struct CacheEntry {
    state: RecordState,
    /// Access tick of the last read or write
    last_access: u64,
    /// Consecutive failed fetches; survives the failed -> loading -> failed cycle
    failures: u32,
    /// Error and time of the latest failure, restored when a retry is cancelled
    last_failure: Option<(String, Instant)>,
}

struct CacheState {
    entries: HashMap<RecordKey, CacheEntry>,
    in_flight: HashMap<RecordKey, CancellationToken>,
    per_dataset: HashMap<DatasetId, usize>,
    hints: Option<EvictionHints>,
    clock: u64,
    high_water_mark: usize,
    target_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn new(high_water_mark: usize, target_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            in_flight: HashMap::new(),
            per_dataset: HashMap::new(),
            hints: None,
            clock: 0,
            high_water_mark,
            target_size,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn write(&mut self, key: RecordKey, state: RecordState, failures: u32) {
        let last_access = self.tick();
        let last_failure = match &state {
            RecordState::Failed {
                error, failed_at, ..
            } => Some((error.clone(), *failed_at)),
            RecordState::Ready { .. } => None,
            _ => self
                .entries
                .get(&key)
                .and_then(|entry| entry.last_failure.clone()),
        };
        let entry = CacheEntry {
            state,
            last_access,
            failures,
            last_failure,
        };
        if self.entries.insert(key.clone(), entry).is_none() {
            *self.per_dataset.entry(key.dataset).or_insert(0) += 1;
        }
    }

    fn remove(&mut self, key: &RecordKey) -> Option<CacheEntry> {
        self.in_flight.remove(key);
        let entry = self.entries.remove(key)?;
        if let Some(count) = self.per_dataset.get_mut(&key.dataset) {
            *count -= 1;
            if *count == 0 {
                self.per_dataset.remove(&key.dataset);
            }
        }
        Some(entry)
    }

    fn is_loading(&self, key: &RecordKey) -> bool {
        self.in_flight.contains_key(key)
    }

    fn class(&self, key: &RecordKey) -> EvictionClass {
        if self.in_flight.contains_key(key) {
            return EvictionClass::Protected;
        }
        self.hints
            .as_ref()
            .map_or(EvictionClass::Other, |hints| hints.class(key))
    }

    fn evictable_count(&self) -> usize {
        self.entries
            .keys()
            .filter(|key| self.class(key) != EvictionClass::Protected)
            .count()
    }

    /// Evict settled, unprotected entries once past the high-water mark:
    /// trail rows first, then the rest, least recently used first in each
    fn evict(&mut self) -> Result<usize, CacheError> {
        if self.entries.len() <= self.high_water_mark {
            return Ok(0);
        }

        let mut candidates: Vec<(EvictionClass, u64, RecordKey)> = self
            .entries
            .iter()
            .map(|(key, entry)| (self.class(key), entry.last_access, key.clone()))
            .filter(|(class, _, _)| *class != EvictionClass::Protected)
            .collect();
        candidates.sort_unstable_by_key(|(class, tick, _)| (*class, *tick));

        let mut evicted = 0;
        for (_, _, key) in candidates {
            if self.entries.len() <= self.target_size {
                break;
            }
            self.remove(&key);
            evicted += 1;
        }
        self.evictions += evicted as u64;

        log::debug!(
            "evicted {} records, {} remain ({} loading, {} protected)",
            evicted,
            self.entries.len(),
            self.in_flight.len(),
            self.entries.len() - self.evictable_count()
        );

        let evictable = self.evictable_count();
        if evictable > self.high_water_mark {
            return Err(CacheError::CapacityExceeded {
                evictable,
                ceiling: self.high_water_mark,
            });
        }
        Ok(evicted)
    }

    /// Eviction check after a mutation; violations are logged, not returned
    fn enforce(&mut self) {
        if let Err(err) = self.evict() {
            log::error!("{}", err);
        }
    }
}

/// Capacity-bounded record store
///
/// All methods take `&self`; mutations are serialized behind one lock. Reads
/// never start a fetch.
///
/// # Example
///
/// ```
/// use lectern_cache::{DatasetId, RecordCache, RecordKey};
/// use lectern_scheduler::CancellationToken;
///
/// let cache = RecordCache::with_watermarks(3_000, 2_500);
/// let key = RecordKey::new(DatasetId::new("KJV"), 0);
///
/// assert!(cache.get(&key).is_missing());
///
/// cache.mark_loading(key.clone(), CancellationToken::new());
/// assert!(cache.get(&key).is_loading());
///
/// cache.resolve(&key, "In the beginning");
/// assert_eq!(cache.get(&key).text(), Some("In the beginning"));
/// ```
pub struct RecordCache {
    state: Arc<Mutex<CacheState>>,
}

impl RecordCache {
    /// Create a cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_watermarks(config.high_water_mark, config.target_size)
    }

    /// Create a cache with explicit watermarks
    ///
    /// `target_size` is capped at `high_water_mark`.
    pub fn with_watermarks(high_water_mark: usize, target_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(
                high_water_mark,
                target_size.min(high_water_mark),
            ))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the state of a record and mark it recently used
    ///
    /// This is a blocking operation that will wait if the cache is currently
    /// locked. For non-blocking access, use `try_get()`.
    pub fn get(&self, key: &RecordKey) -> RecordState {
        let mut state = self.lock();
        read(&mut state, key)
    }

    /// Like [`get`](Self::get), but returns `None` instead of waiting when
    /// the cache is busy
    pub fn try_get(&self, key: &RecordKey) -> Option<RecordState> {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(std::sync::TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(std::sync::TryLockError::WouldBlock) => return None,
        };
        Some(read(&mut state, key))
    }

    /// Read the state of a record without touching recency or statistics
    pub fn peek(&self, key: &RecordKey) -> RecordState {
        let state = self.lock();
        state
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
            .unwrap_or(RecordState::Missing)
    }

    /// Number of consecutive failed fetches recorded for a key
    pub fn failures(&self, key: &RecordKey) -> u32 {
        let state = self.lock();
        state.entries.get(key).map_or(0, |entry| entry.failures)
    }

    /// Insert or overwrite a record
    ///
    /// `Missing` removes the entry. `Loading` registers a fresh in-flight
    /// marker; use [`mark_loading`](Self::mark_loading) to attach a batch
    /// token instead.
    pub fn put(&self, key: RecordKey, record: RecordState) {
        let mut state = self.lock();
        match record {
            RecordState::Missing => {
                state.remove(&key);
            }
            RecordState::Loading { .. } => {
                let failures = state.entries.get(&key).map_or(0, |entry| entry.failures);
                state.in_flight.insert(key.clone(), CancellationToken::new());
                state.write(key, record, failures);
            }
            RecordState::Failed { attempts, .. } => {
                state.in_flight.remove(&key);
                state.write(key, record, attempts);
            }
            RecordState::Ready { .. } => {
                state.in_flight.remove(&key);
                state.write(key, record, 0);
            }
        }
        state.enforce();
    }

    /// Mark a record as part of a dispatched batch
    ///
    /// Returns `false` (and changes nothing) if the record is already loading.
    pub fn mark_loading(&self, key: RecordKey, token: CancellationToken) -> bool {
        let mut state = self.lock();
        if state.is_loading(&key) {
            return false;
        }
        let failures = state.entries.get(&key).map_or(0, |entry| entry.failures);
        state.in_flight.insert(key.clone(), token);
        state.write(
            key,
            RecordState::Loading {
                started_at: Instant::now(),
            },
            failures,
        );
        state.enforce();
        true
    }

    /// Store fetched text for a loading record
    ///
    /// Ignored (returns `false`) unless the record is loading, so results for
    /// cancelled or cleared records cannot resurrect them.
    pub fn resolve(&self, key: &RecordKey, text: impl Into<Arc<str>>) -> bool {
        let mut state = self.lock();
        if state.in_flight.remove(key).is_none() {
            return false;
        }
        state.write(
            key.clone(),
            RecordState::Ready {
                text: text.into(),
                loaded_at: Instant::now(),
            },
            0,
        );
        state.enforce();
        true
    }

    /// Record a failed fetch for a loading record
    ///
    /// Increments the record's failure count. Ignored (returns `false`)
    /// unless the record is loading.
    pub fn fail(&self, key: &RecordKey, error: impl Into<String>) -> bool {
        let mut state = self.lock();
        if state.in_flight.remove(key).is_none() {
            return false;
        }
        let attempts = state.entries.get(key).map_or(0, |entry| entry.failures) + 1;
        state.write(
            key.clone(),
            RecordState::Failed {
                error: error.into(),
                failed_at: Instant::now(),
                attempts,
            },
            attempts,
        );
        state.enforce();
        true
    }

    /// Revert a loading record to its state before the fetch
    ///
    /// A record that had never failed becomes missing. A retry of a failed
    /// record goes back to `Failed` with its attempt count intact, so
    /// cancelling a retry does not refund it.
    ///
    /// The batch token is left alone; the caller decides whether the whole
    /// batch is cancelled. Returns `false` unless the record was loading.
    pub fn cancel(&self, key: &RecordKey) -> bool {
        let mut state = self.lock();
        if state.in_flight.remove(key).is_none() {
            return false;
        }
        let prior = state
            .entries
            .get(key)
            .filter(|entry| entry.failures > 0)
            .map(|entry| (entry.failures, entry.last_failure.clone()));
        match prior {
            Some((attempts, last_failure)) => {
                let (error, failed_at) =
                    last_failure.unwrap_or_else(|| (String::from("fetch failed"), Instant::now()));
                state.write(
                    key.clone(),
                    RecordState::Failed {
                        error,
                        failed_at,
                        attempts,
                    },
                    attempts,
                );
            }
            None => {
                state.remove(key);
            }
        }
        true
    }

    /// Run an eviction pass if the cache is past its high-water mark
    ///
    /// Returns the number of records evicted.
    ///
    /// # Errors
    /// [`CacheError::CapacityExceeded`] if evictable records still exceed the
    /// high-water mark afterwards.
    pub fn evict_if_needed(&self) -> Result<usize, CacheError> {
        self.lock().evict()
    }

    /// Drop every record of one dataset
    ///
    /// Loading records have their batch tokens cancelled. Other datasets are
    /// untouched. Returns the number of records dropped.
    pub fn clear(&self, dataset: &DatasetId) -> usize {
        let mut state = self.lock();
        let keys: Vec<RecordKey> = state
            .entries
            .keys()
            .filter(|key| &key.dataset == dataset)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(token) = state.in_flight.get(key) {
                token.cancel();
            }
            state.remove(key);
        }
        log::info!("cleared {} records of dataset {}", keys.len(), dataset);
        keys.len()
    }

    /// Drop every record of every dataset, cancelling loading ones
    pub fn clear_all(&self) {
        let mut state = self.lock();
        for token in state.in_flight.values() {
            token.cancel();
        }
        state.in_flight.clear();
        state.entries.clear();
        state.per_dataset.clear();
        log::info!("cleared record cache");
    }

    /// Turn failed records of a dataset back into missing ones, restoring
    /// their retry budget. Returns the number of records reset.
    pub fn forget_failures(&self, dataset: &DatasetId) -> usize {
        let mut state = self.lock();
        let keys: Vec<RecordKey> = state
            .entries
            .iter()
            .filter(|(key, entry)| &key.dataset == dataset && entry.state.is_failed())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Tell eviction where the reader is; replaces earlier hints
    pub fn set_eviction_hints(&self, hints: EvictionHints) {
        self.lock().hints = Some(hints);
    }

    /// Go back to plain LRU eviction
    pub fn clear_eviction_hints(&self) {
        self.lock().hints = None;
    }

    pub fn eviction_hints(&self) -> Option<EvictionHints> {
        self.lock().hints.clone()
    }

    /// Change the watermarks, evicting immediately if needed
    pub fn set_watermarks(&self, high_water_mark: usize, target_size: usize) {
        let mut state = self.lock();
        state.high_water_mark = high_water_mark;
        state.target_size = target_size.min(high_water_mark);
        state.enforce();
    }

    /// Rows of `dataset` among `rows` that a fetch should be issued for:
    /// missing ones, and failed ones with fewer than `max_attempts` failures.
    /// Loading and ready rows are skipped. Does not touch recency.
    pub fn fetchable<I>(&self, dataset: &DatasetId, rows: I, max_attempts: u32) -> Vec<RowIndex>
    where
        I: IntoIterator<Item = RowIndex>,
    {
        let state = self.lock();
        let mut probe = RecordKey::new(dataset.clone(), 0);
        rows.into_iter()
            .filter(|&row| {
                probe.index = row;
                match state.entries.get(&probe) {
                    None => true,
                    Some(entry) => match entry.state {
                        RecordState::Missing => true,
                        RecordState::Failed { attempts, .. } => attempts < max_attempts,
                        RecordState::Loading { .. } | RecordState::Ready { .. } => false,
                    },
                }
            })
            .collect()
    }

    /// Whether a record has ready text, without touching recency
    pub fn contains_ready(&self, key: &RecordKey) -> bool {
        let state = self.lock();
        state
            .entries
            .get(key)
            .is_some_and(|entry| entry.state.is_ready())
    }

    /// Number of entries in any state
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let ready_count = state
            .entries
            .values()
            .filter(|entry| entry.state.is_ready())
            .count();
        let failed_count = state
            .entries
            .values()
            .filter(|entry| entry.state.is_failed())
            .count();
        CacheStats {
            total_size: state.entries.len(),
            per_dataset_size: state
                .per_dataset
                .iter()
                .map(|(dataset, count)| (dataset.clone(), *count))
                .collect(),
            in_flight_count: state.in_flight.len(),
            ready_count,
            failed_count,
            high_water_mark: state.high_water_mark,
            target_size: state.target_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

fn read(state: &mut CacheState, key: &RecordKey) -> RecordState {
    let tick = state.tick();
    match state.entries.get_mut(key) {
        Some(entry) => {
            entry.last_access = tick;
            let record = entry.state.clone();
            if record.is_ready() {
                state.hits += 1;
            } else {
                state.misses += 1;
            }
            record
        }
        None => {
            state.misses += 1;
            RecordState::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_scheduler::IndexRange;
    use rand::Rng;

    fn key(dataset: &str, index: u32) -> RecordKey {
        RecordKey::new(DatasetId::new(dataset), index)
    }

    fn load(cache: &RecordCache, key: &RecordKey, text: &str) {
        assert!(cache.mark_loading(key.clone(), CancellationToken::new()));
        assert!(cache.resolve(key, text));
    }

    #[test]
    fn test_missing_by_default() {
        let cache = RecordCache::with_watermarks(10, 5);
        assert!(cache.get(&key("KJV", 1)).is_missing());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_loading_then_ready() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);

        assert!(cache.mark_loading(k.clone(), CancellationToken::new()));
        assert_eq!(cache.in_flight_count(), 1);
        // A second dispatch of the same record is refused
        assert!(!cache.mark_loading(k.clone(), CancellationToken::new()));

        assert!(cache.resolve(&k, "text"));
        assert_eq!(cache.in_flight_count(), 0);
        assert_eq!(cache.get(&k).text(), Some("text"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_resolve_requires_loading() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);
        assert!(!cache.resolve(&k, "late"));
        assert!(cache.get(&k).is_missing());
    }

    #[test]
    fn test_fail_counts_attempts_across_retries() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);

        cache.mark_loading(k.clone(), CancellationToken::new());
        assert!(cache.fail(&k, "offline"));
        assert_eq!(cache.failures(&k), 1);

        cache.mark_loading(k.clone(), CancellationToken::new());
        assert!(cache.fail(&k, "offline"));
        match cache.get(&k) {
            RecordState::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(error, "offline");
            }
            other => panic!("expected failed record, got {:?}", other),
        }

        // Success clears the failure count
        cache.mark_loading(k.clone(), CancellationToken::new());
        cache.resolve(&k, "back online");
        assert_eq!(cache.failures(&k), 0);
    }

    #[test]
    fn test_cancel_reverts_to_missing() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);

        let token = CancellationToken::new();
        cache.mark_loading(k.clone(), token.clone());
        assert!(cache.cancel(&k));
        assert!(cache.get(&k).is_missing());
        assert_eq!(cache.in_flight_count(), 0);
        assert!(!token.is_cancelled());

        // Results that arrive afterwards are ignored
        assert!(!cache.resolve(&k, "late"));
        assert!(!cache.cancel(&k));
    }

    #[test]
    fn test_cancelled_retry_keeps_failure_count() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 0);

        cache.mark_loading(k.clone(), CancellationToken::new());
        assert!(cache.fail(&k, "timeout"));

        // The retry is cancelled by a window jump
        cache.mark_loading(k.clone(), CancellationToken::new());
        assert!(cache.cancel(&k));
        assert_eq!(cache.failures(&k), 1);
        assert_eq!(cache.in_flight_count(), 0);
        match cache.peek(&k) {
            RecordState::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(error, "timeout");
            }
            other => panic!("expected failed record, got {:?}", other),
        }
        assert_eq!(cache.fetchable(&DatasetId::new("KJV"), [0], 2), vec![0]);

        // The next retry failing exhausts the budget
        cache.mark_loading(k.clone(), CancellationToken::new());
        assert!(cache.fail(&k, "timeout"));
        assert_eq!(cache.failures(&k), 2);
        assert!(cache.fetchable(&DatasetId::new("KJV"), [0], 2).is_empty());
    }

    #[test]
    fn test_hints_keep_rows_on_screen() {
        let cache = RecordCache::with_watermarks(1_000, 1_000);
        for index in 0..100 {
            load(&cache, &key("KJV", index), "text");
        }
        // Rows 0..10 are now the least recently used
        for index in 10..100 {
            cache.get(&key("KJV", index));
        }
        cache.set_eviction_hints(EvictionHints {
            dataset: DatasetId::new("KJV"),
            pinned: IndexRange::inclusive(0, 9),
            forward: IndexRange::inclusive(0, 49),
            trail: IndexRange::EMPTY,
        });

        cache.set_watermarks(50, 20);
        for index in 0..50 {
            assert!(cache.peek(&key("KJV", index)).is_ready(), "row {} evicted", index);
        }
        assert!(cache.peek(&key("KJV", 50)).is_missing());
        assert_eq!(cache.len(), 50);
        assert_eq!(cache.stats().evictions, 50);
        assert_eq!(cache.evict_if_needed().unwrap(), 0);
    }

    #[test]
    fn test_trail_evicted_before_other_rows() {
        let cache = RecordCache::with_watermarks(100, 50);
        cache.set_eviction_hints(EvictionHints {
            dataset: DatasetId::new("KJV"),
            pinned: IndexRange::inclusive(200, 209),
            forward: IndexRange::inclusive(200, 259),
            trail: IndexRange::inclusive(150, 199),
        });

        for index in (0..40).chain(150..200).chain(200..260) {
            load(&cache, &key("KJV", index), "text");
        }

        for index in 150..200 {
            assert!(cache.peek(&key("KJV", index)).is_missing());
        }
        for index in 200..260 {
            assert!(cache.peek(&key("KJV", index)).is_ready());
        }
        // Only the oldest unrelated row was needed after the trail
        assert!(cache.peek(&key("KJV", 0)).is_missing());
        assert!(cache.peek(&key("KJV", 1)).is_ready());
        assert_eq!(cache.len(), 99);
    }

    #[test]
    fn test_hints_do_not_protect_other_datasets() {
        let cache = RecordCache::with_watermarks(10, 5);
        cache.set_eviction_hints(EvictionHints {
            dataset: DatasetId::new("KJV"),
            pinned: IndexRange::inclusive(0, 9),
            forward: IndexRange::inclusive(0, 9),
            trail: IndexRange::EMPTY,
        });
        for index in 0..6 {
            load(&cache, &key("KJV", index), "kjv");
        }
        for index in 0..6 {
            load(&cache, &key("WEB", index), "web");
        }

        assert_eq!(cache.stats().per_dataset_size[&DatasetId::new("KJV")], 6);
        assert!(cache.len() <= 10);

        cache.clear_eviction_hints();
        assert!(cache.eviction_hints().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);

        cache.put(k.clone(), RecordState::ready("a"));
        cache.put(k.clone(), RecordState::ready("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&k).text(), Some("b"));

        cache.put(k.clone(), RecordState::Missing);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_loading_registers_in_flight() {
        let cache = RecordCache::with_watermarks(10, 5);
        let k = key("KJV", 1);
        cache.put(
            k.clone(),
            RecordState::Loading {
                started_at: Instant::now(),
            },
        );
        assert_eq!(cache.in_flight_count(), 1);
        assert!(cache.resolve(&k, "done"));
    }

    #[test]
    fn test_eviction_to_target_lru_first() {
        let cache = RecordCache::with_watermarks(4, 2);
        for i in 0..4 {
            cache.put(key("KJV", i), RecordState::ready("x"));
        }
        // Touch 0 so 1 and 2 are the oldest
        cache.get(&key("KJV", 0));

        cache.put(key("KJV", 4), RecordState::ready("x"));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains_ready(&key("KJV", 0)));
        assert!(cache.contains_ready(&key("KJV", 4)));
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_loading_never_evicted() {
        let cache = RecordCache::with_watermarks(3, 1);
        let loading: Vec<_> = (0..3).map(|i| key("KJV", i)).collect();
        for k in &loading {
            cache.mark_loading(k.clone(), CancellationToken::new());
        }
        cache.put(key("KJV", 10), RecordState::ready("x"));
        cache.put(key("KJV", 11), RecordState::ready("x"));

        for k in &loading {
            assert!(cache.peek(k).is_loading());
        }
        assert_eq!(cache.in_flight_count(), 3);
        // Past the mark only because of loading records
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_evict_if_needed_noop_under_mark() {
        let cache = RecordCache::with_watermarks(10, 5);
        cache.put(key("KJV", 0), RecordState::ready("x"));
        assert_eq!(cache.evict_if_needed().unwrap(), 0);
    }

    #[test]
    fn test_set_watermarks_evicts() {
        let cache = RecordCache::with_watermarks(100, 80);
        for i in 0..50 {
            cache.put(key("KJV", i), RecordState::ready("x"));
        }
        cache.set_watermarks(20, 10);
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.stats().target_size, 10);
    }

    #[test]
    fn test_clear_dataset_isolated() {
        let cache = RecordCache::with_watermarks(100, 80);
        load(&cache, &key("KJV", 0), "kjv");
        load(&cache, &key("WEB", 0), "web");

        let token = CancellationToken::new();
        cache.mark_loading(key("KJV", 1), token.clone());

        assert_eq!(cache.clear(&DatasetId::new("KJV")), 2);
        assert!(token.is_cancelled());
        assert!(cache.get(&key("KJV", 0)).is_missing());
        assert_eq!(cache.get(&key("WEB", 0)).text(), Some("web"));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[test]
    fn test_clear_all_cancels_loading() {
        let cache = RecordCache::with_watermarks(100, 80);
        let token = CancellationToken::new();
        cache.mark_loading(key("KJV", 1), token.clone());
        load(&cache, &key("WEB", 0), "web");

        cache.clear_all();
        assert!(token.is_cancelled());
        assert!(cache.is_empty());
        assert!(cache.stats().per_dataset_size.is_empty());
    }

    #[test]
    fn test_forget_failures() {
        let cache = RecordCache::with_watermarks(100, 80);
        let failed = key("KJV", 1);
        cache.mark_loading(failed.clone(), CancellationToken::new());
        cache.fail(&failed, "offline");
        load(&cache, &key("KJV", 2), "ok");

        assert_eq!(cache.forget_failures(&DatasetId::new("KJV")), 1);
        assert!(cache.peek(&failed).is_missing());
        assert_eq!(cache.failures(&failed), 0);
        assert!(cache.contains_ready(&key("KJV", 2)));
    }

    #[test]
    fn test_fetchable_rows() {
        let cache = RecordCache::with_watermarks(100, 80);
        let kjv = DatasetId::new("KJV");
        load(&cache, &key("KJV", 1), "ready");
        cache.mark_loading(key("KJV", 2), CancellationToken::new());
        cache.mark_loading(key("KJV", 3), CancellationToken::new());
        cache.fail(&key("KJV", 3), "offline");
        load(&cache, &key("WEB", 4), "other dataset");

        assert_eq!(cache.fetchable(&kjv, 0..5, 2), vec![0, 3, 4]);
        // Out of retries
        assert_eq!(cache.fetchable(&kjv, 0..5, 1), vec![0, 4]);
    }

    #[test]
    fn test_stats_per_dataset() {
        let cache = RecordCache::with_watermarks(100, 80);
        load(&cache, &key("KJV", 0), "a");
        load(&cache, &key("KJV", 1), "b");
        load(&cache, &key("WEB", 0), "c");
        cache.mark_loading(key("WEB", 1), CancellationToken::new());

        let stats = cache.stats();
        assert_eq!(stats.total_size, 4);
        assert_eq!(stats.per_dataset_size[&DatasetId::new("KJV")], 2);
        assert_eq!(stats.per_dataset_size[&DatasetId::new("WEB")], 2);
        assert_eq!(stats.in_flight_count, 1);
        assert_eq!(stats.ready_count, 3);
        assert!((stats.utilization() - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate() {
        let cache = RecordCache::with_watermarks(100, 80);
        load(&cache, &key("KJV", 0), "a");
        cache.get(&key("KJV", 0));
        cache.get(&key("KJV", 1));
        assert!((cache.stats().hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_try_get() {
        let cache = RecordCache::with_watermarks(100, 80);
        load(&cache, &key("KJV", 0), "a");
        assert_eq!(cache.try_get(&key("KJV", 0)).unwrap().text(), Some("a"));
    }

    #[test]
    fn test_peek_does_not_touch_recency() {
        let cache = RecordCache::with_watermarks(2, 1);
        cache.put(key("KJV", 0), RecordState::ready("x"));
        cache.put(key("KJV", 1), RecordState::ready("x"));
        cache.peek(&key("KJV", 0));

        cache.put(key("KJV", 2), RecordState::ready("x"));
        assert!(!cache.contains_ready(&key("KJV", 0)));
        assert!(cache.contains_ready(&key("KJV", 2)));
    }

    #[test]
    fn test_random_workload_respects_ceiling() {
        let high = 200;
        let target = 150;
        let cache = RecordCache::with_watermarks(high, target);
        let mut rng = rand::thread_rng();
        let mut evictions_seen = 0;

        for _ in 0..5_000 {
            let k = key(if rng.gen_bool(0.5) { "KJV" } else { "WEB" }, rng.gen_range(0..2_000));
            match rng.gen_range(0..3) {
                0 => cache.put(k, RecordState::ready("x")),
                1 => {
                    if cache.mark_loading(k.clone(), CancellationToken::new()) {
                        cache.resolve(&k, "y");
                    }
                }
                _ => {
                    cache.get(&k);
                }
            }

            let stats = cache.stats();
            assert_eq!(stats.in_flight_count, 0);
            assert!(stats.total_size <= high);
            if stats.evictions > evictions_seen {
                evictions_seen = stats.evictions;
                assert!(stats.total_size <= target + 1);
            }
        }
        assert!(evictions_seen > 0);
    }

    #[test]
    fn test_random_workload_keeps_loading_entries() {
        let cache = RecordCache::with_watermarks(50, 30);
        let mut rng = rand::thread_rng();
        let mut loading = Vec::new();

        for i in 0..20 {
            let k = key("KJV", 10_000 + i);
            cache.mark_loading(k.clone(), CancellationToken::new());
            loading.push(k);
        }
        for _ in 0..2_000 {
            cache.put(key("KJV", rng.gen_range(0..1_000)), RecordState::ready("x"));
        }

        for k in &loading {
            assert!(cache.peek(k).is_loading());
        }
        let stats = cache.stats();
        assert!(stats.total_size - stats.in_flight_count <= 50);
    }
}
