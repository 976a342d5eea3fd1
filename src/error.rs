//! Error taxonomy for the extraction core.
//!
//! The Extraction Engine and the Decorator Scheduler each own one error
//! enum; `anyhow` is reserved for the daemon entrypoint, where every
//! startup failure collapses to a process exit code.

use thiserror::Error;

/// Errors surfaced by the Extraction Engine. Every variant here is reported
/// to the Decorator, never process-fatal (the deadline is handled
/// separately, by exiting the process before an error value ever exists).
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("item has no mime type recorded")]
    NoMimeType,

    #[error("no extractor registered for mime type `{0}`")]
    NoExtractor(String),

    #[error("file url `{0}` is not a native (local-filesystem) url")]
    InvalidFile(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("extraction was cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Whether this error should cause the file to be quarantined
    /// (§7: `HandlerError` quarantines, pre-flight rejections and
    /// `Cancelled` do not).
    pub fn quarantines(&self) -> bool {
        matches!(self, ExtractError::Handler(_))
    }
}

/// Errors surfaced by the Decorator Scheduler's interaction with the graph
/// store. `BatchError` is the only variant visible to the scheduler's own
/// control flow; everything else is an infrastructure failure that should
/// abort the current processing cycle without corrupting the state
/// machine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("batch commit failed: {0}")]
    BatchError(#[source] anyhow::Error),

    #[error("graph store query failed: {0}")]
    QueryFailed(#[source] anyhow::Error),

    #[error("persistence slot unavailable: {0}")]
    PersistenceUnavailable(#[source] anyhow::Error),
}
