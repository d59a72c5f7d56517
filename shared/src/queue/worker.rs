//! Per-item unit of work.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::model::ClaimedItem;

/// Why a worker could not finish an item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// An input the task depends on does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The language model or speech provider failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Uploading the artifact failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Reading or writing records failed.
    #[error("database failure: {0}")]
    Database(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl From<crate::Error> for WorkError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::NotFound(what) => WorkError::NotFound(what),
            crate::Error::Database(e) => WorkError::Database(e.to_string()),
            crate::Error::Storage(msg) => WorkError::Storage(msg),
            other => WorkError::Upstream(other.to_string()),
        }
    }
}

/// What a successful worker run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkReport {
    /// Locations of the artifacts written for the item.
    pub artifacts: Vec<String>,
    /// Set when the worker found existing output and did nothing.
    pub skipped: bool,
}

impl WorkReport {
    pub fn produced(artifact: impl Into<String>) -> Self {
        Self {
            artifacts: vec![artifact.into()],
            skipped: false,
        }
    }

    pub fn already_done() -> Self {
        Self {
            artifacts: Vec::new(),
            skipped: true,
        }
    }
}

/// Executes the task behind one claimed queue item.
///
/// Workers run concurrently on disjoint items and must not share mutable
/// state across calls. A worker is expected to bound its own external calls;
/// the dispatcher's optional timeout is a backstop.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn process(&self, item: &ClaimedItem) -> Result<WorkReport, WorkError>;

    /// Side-effect free check for output already produced for the item's
    /// subject.
    async fn already_processed(&self, _item: &ClaimedItem) -> Result<bool, WorkError> {
        Ok(false)
    }
}
