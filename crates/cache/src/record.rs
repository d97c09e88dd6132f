//! Record identity and lifecycle state

use lectern_scheduler::RowIndex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Identifier of one dataset (for example a translation code like `"KJV"`)
///
/// Cheap to clone; the name is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(Arc<str>);

impl DatasetId {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DatasetId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for DatasetId {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({:?})", &*self.0)
    }
}

impl Serialize for DatasetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A record address: dataset plus row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub dataset: DatasetId,
    pub index: RowIndex,
}

impl RecordKey {
    pub fn new(dataset: DatasetId, index: RowIndex) -> Self {
        Self { dataset, index }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.dataset, self.index)
    }
}

/// Where a record is in its fetch lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum RecordState {
    /// Not cached and not being fetched
    Missing,

    /// Part of a dispatched batch
    Loading { started_at: Instant },

    /// Text is available
    Ready { text: Arc<str>, loaded_at: Instant },

    /// The last fetch failed; `attempts` counts consecutive failures
    Failed {
        error: String,
        failed_at: Instant,
        attempts: u32,
    },
}

impl RecordState {
    pub fn ready(text: impl Into<Arc<str>>) -> Self {
        RecordState::Ready {
            text: text.into(),
            loaded_at: Instant::now(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, RecordState::Missing)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, RecordState::Loading { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, RecordState::Ready { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RecordState::Failed { .. })
    }

    /// The record text, if ready
    pub fn text(&self) -> Option<&str> {
        match self {
            RecordState::Ready { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Short lowercase name of the state
    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Missing => "missing",
            RecordState::Loading { .. } => "loading",
            RecordState::Ready { .. } => "ready",
            RecordState::Failed { .. } => "failed",
        }
    }
}
