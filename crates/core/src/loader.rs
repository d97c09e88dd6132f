//! Record loader contract
//!
//! The loader is the only part of the pipeline that does I/O. Workers call it
//! with one batch at a time; it may return results for a subset of the
//! requested rows and may poll the cancellation token to stop early.

use lectern_cache::DatasetId;
use lectern_scheduler::{CancellationToken, RowIndex};
use std::collections::HashMap;

/// Per-row results of one batch
pub type BatchResults = HashMap<RowIndex, Result<String, FetchError>>;

/// Why a fetch did not produce text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network or storage failure for one row or the whole batch
    #[error("fetch failed: {0}")]
    Failed(String),

    /// The loader stopped because the batch token fired
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn failed(reason: impl Into<String>) -> Self {
        FetchError::Failed(reason.into())
    }
}

/// Fetches record text for a batch of rows
///
/// # Example
///
/// ```
/// use lectern_core::{BatchResults, DatasetId, FetchError, RecordLoader};
/// use lectern_scheduler::CancellationToken;
///
/// let loader = |dataset: &DatasetId,
///               indices: &[u32],
///               _cancel: &CancellationToken|
///  -> Result<BatchResults, FetchError> {
///     let results: BatchResults = indices
///         .iter()
///         .map(|&index| (index, Ok(format!("{} {}", dataset, index))))
///         .collect();
///     Ok(results)
/// };
///
/// let results = loader
///     .load_batch(&DatasetId::new("KJV"), &[1, 2], &CancellationToken::new())
///     .unwrap();
/// assert_eq!(results[&2], Ok("KJV 2".to_string()));
/// ```
pub trait RecordLoader: Send + Sync {
    /// Fetch `indices` of `dataset`
    ///
    /// Rows absent from a successful response count as failed. A whole-batch
    /// `Err` fails every row, except `FetchError::Cancelled`, which reverts
    /// them to missing.
    fn load_batch(
        &self,
        dataset: &DatasetId,
        indices: &[RowIndex],
        cancel: &CancellationToken,
    ) -> Result<BatchResults, FetchError>;
}

impl<F> RecordLoader for F
where
    F: Fn(&DatasetId, &[RowIndex], &CancellationToken) -> Result<BatchResults, FetchError>
        + Send
        + Sync,
{
    fn load_batch(
        &self,
        dataset: &DatasetId,
        indices: &[RowIndex],
        cancel: &CancellationToken,
    ) -> Result<BatchResults, FetchError> {
        self(dataset, indices, cancel)
    }
}
