use snafu::Snafu;

use crate::{commit::CommitError, error_kind::ErrorKind, partition::PartitionTarget, store::StoreError};

/// Dispatch error types.
///
/// Only fatal errors are returned to the caller of
/// [`Dispatcher::handle_batch`](crate::Dispatcher::handle_batch). Retryable
/// errors are absorbed by the retry loop and only show up in logs.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DispatchError {
    /// A single record doesn't fit in an empty batch.
    #[snafu(display(
        "record for {destination} is {size} bytes, more than the batch capacity of {capacity} bytes"
    ))]
    RecordTooLarge {
        destination: String,
        size: u64,
        capacity: u64,
    },
    /// The store is temporarily out of room.
    #[snafu(display("store is out of capacity for {count} record(s)"))]
    CapacityExceeded { count: usize },
    /// The connection to the store was lost.
    #[snafu(display("connection to the store lost"))]
    ConnectionLost { source: StoreError },
    /// Unexpected delivery failure.
    #[snafu(display("delivery failed: {message}"))]
    FatalDelivery {
        message: &'static str,
        source: StoreError,
    },
    /// The record resolved to a partition the store doesn't know about.
    #[snafu(display("no batch for {target}"))]
    UnknownPartition { target: PartitionTarget },
    /// The store replied with a different number of outcomes than entries sent.
    #[snafu(display("store returned {actual} outcome(s) for {expected} entries"))]
    OutcomeMismatch { expected: usize, actual: usize },
    /// The committer failed.
    #[snafu(display("failed to commit records"))]
    Commit { source: CommitError },
    /// The dispatcher was cancelled while waiting.
    #[snafu(display("dispatcher is shutting down"))]
    Shutdown,
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;

impl DispatchError {
    /// Wraps a store error, keeping connection failures retryable.
    pub fn from_store(message: &'static str, source: StoreError) -> Self {
        if source.is_connection() {
            Self::ConnectionLost { source }
        } else {
            Self::FatalDelivery { message, source }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecordTooLarge { .. } => ErrorKind::Validation,
            Self::CapacityExceeded { .. } | Self::ConnectionLost { .. } => ErrorKind::Temporary,
            Self::UnknownPartition { .. } => ErrorKind::NotFound,
            Self::FatalDelivery { .. } | Self::OutcomeMismatch { .. } | Self::Commit { .. } => {
                ErrorKind::Internal
            }
            Self::Shutdown => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
