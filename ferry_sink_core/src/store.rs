//! Boundary to the external store the sink delivers to.
//!
//! The [`StoreClient`] hides the wire protocol of the target store. Replies
//! are classified into [`ItemOutcome`] at this boundary, so the dispatcher
//! never inspects raw store payloads.
use std::sync::Arc;

use async_trait::async_trait;
use bytesize::ByteSize;
use snafu::Snafu;

use crate::{batch::CreateOptions, error_kind::ErrorKind, record::Record, serialize::WireEntry};

/// Reply text a stream store sends when it hit its memory ceiling.
pub const OUT_OF_MEMORY_REPLY: &str = "OOM command not allowed when used memory > 'maxmemory'";

/// Outcome of a single entry of a wire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The store appended the entry.
    Accepted,
    /// The store is temporarily out of room, the entry should be retried.
    CapacityExceeded,
}

/// Errors returned by store clients.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The connection to the store is gone.
    #[snafu(display("connection error: {message}"))]
    Connection { message: String },
    /// The store refused the request.
    #[snafu(display("request rejected: {message}"))]
    Rejected { message: String },
    /// The store replied with something the client can't interpret.
    #[snafu(display("protocol error: {message}"))]
    Protocol { message: String },
    /// Anything else.
    #[snafu(display("internal store error: {message}"))]
    Internal { message: String },
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// List the partition ids known to the store.
    async fn list_partitions(&self) -> Result<Vec<String>, StoreError>;

    /// Append the entries in one network call.
    ///
    /// Returns one outcome per entry, in the same order.
    async fn send_batch(&self, entries: &[WireEntry]) -> Result<Vec<ItemOutcome>, StoreError>;

    /// Send the records of a partition batch as one atomic operation.
    async fn send_partition_batch(
        &self,
        options: &CreateOptions,
        records: &[Record],
    ) -> Result<(), StoreError>;

    /// Batch capacity used when the configuration doesn't set one.
    fn default_batch_capacity(&self) -> ByteSize;

    /// Close the connection.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Creates store clients. Called on startup and on every reconnect.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn StoreClient>, StoreError>;
}

impl ItemOutcome {
    /// Classifies the text reply of a stream append.
    pub fn from_reply(reply: &str) -> Self {
        if reply.contains(OUT_OF_MEMORY_REPLY) {
            Self::CapacityExceeded
        } else {
            Self::Accepted
        }
    }
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Temporary,
            Self::Rejected { .. } => ErrorKind::Validation,
            Self::Protocol { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_reply_is_capacity_exceeded() {
        let reply = format!("{OUT_OF_MEMORY_REPLY}.");
        assert_eq!(ItemOutcome::from_reply(&reply), ItemOutcome::CapacityExceeded);
        assert_eq!(
            ItemOutcome::from_reply("1718000000000-0"),
            ItemOutcome::Accepted
        );
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        let connection = StoreError::Connection {
            message: "reset by peer".to_string(),
        };
        let rejected = StoreError::Rejected {
            message: "WRONGTYPE".to_string(),
        };

        assert!(connection.is_connection());
        assert!(connection.kind().is_retryable());
        assert!(!rejected.is_connection());
        assert!(!rejected.kind().is_retryable());
    }
}
