use async_trait::async_trait;
use snafu::Snafu;

use crate::record::Record;

/// Errors returned by a [`RecordCommitter`].
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum CommitError {
    #[snafu(display("failed to commit offsets: {message}"))]
    Rejected { message: String },
    #[snafu(display("committer closed"))]
    Closed,
}

/// Acknowledges records back to the capture engine.
#[async_trait]
pub trait RecordCommitter: Send + Sync {
    /// Marks a single record as delivered. Must be idempotent.
    async fn mark_processed(&self, record: &Record) -> Result<(), CommitError>;

    /// Marks the whole batch handed to the sink as finished.
    async fn mark_batch_finished(&self) -> Result<(), CommitError>;
}
