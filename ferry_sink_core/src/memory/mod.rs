//! In-memory implementation of the store and committer traits.
//!
//! The store behaves like a stream store with partitions: entries are
//! appended per destination, partition batches are recorded as sent, and
//! memory usage is tracked against an optional ceiling. Faults can be
//! scripted to simulate capacity pressure and connection loss. It is
//! suitable for testing and development.
mod committer;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use bytesize::ByteSize;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{
    backpressure::{MemoryStatsSource, MemoryUsage},
    batch::CreateOptions,
    record::Record,
    serialize::WireEntry,
    store::{ItemOutcome, OUT_OF_MEMORY_REPLY, StoreClient, StoreConnector, StoreError},
};

pub use self::committer::InMemoryCommitter;

const DEFAULT_BATCH_CAPACITY: ByteSize = ByteSize::mib(1);

/// A fault applied to the next send call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFault {
    /// Every entry is rejected with an out-of-memory reply.
    CapacityExceeded,
    /// The first `n` entries are accepted, the rest are rejected as out of memory.
    AcceptFirst(usize),
    /// The connection drops before any entry is appended.
    ConnectionLost,
    /// The request is refused.
    Rejected(String),
}

/// An entry appended to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

/// A partition batch received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredBatch {
    pub options: CreateOptions,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
    partitions: Vec<String>,
    default_batch_capacity: ByteSize,
    max_memory: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Map of destination to stream entries.
    streams: HashMap<String, Vec<StreamEntry>>,
    /// Partition batches, in the order they were received.
    partition_batches: Vec<DeliveredBatch>,
    faults: VecDeque<SendFault>,
    failing_connects: usize,
    failing_listings: usize,
    connect_attempts: usize,
    closes: usize,
    send_calls: usize,
    sequence: u64,
    used_bytes: u64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            partitions: Vec::new(),
            default_batch_capacity: DEFAULT_BATCH_CAPACITY,
            max_memory: 0,
        }
    }

    /// Change the partitions reported by the store.
    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = partitions.into_iter().map(Into::into).collect();
        self
    }

    /// Change the default batch capacity.
    pub fn with_default_batch_capacity(mut self, capacity: ByteSize) -> Self {
        self.default_batch_capacity = capacity;
        self
    }

    /// Change the memory ceiling. Entries above it get out-of-memory replies.
    pub fn with_max_memory(mut self, max_memory: ByteSize) -> Self {
        self.max_memory = max_memory.as_u64();
        self
    }

    /// Queue a fault for a future send call.
    pub async fn push_fault(&self, fault: SendFault) {
        self.state.write().await.faults.push_back(fault);
    }

    /// Make the next `count` connection attempts fail.
    pub async fn fail_next_connects(&self, count: usize) {
        self.state.write().await.failing_connects = count;
    }

    /// Make the next `count` partition listings fail with a lost connection.
    pub async fn fail_next_partition_listings(&self, count: usize) {
        self.state.write().await.failing_listings = count;
    }

    /// Override the memory in use, e.g. to simulate eviction.
    pub async fn set_used_memory(&self, used: ByteSize) {
        self.state.write().await.used_bytes = used.as_u64();
    }

    /// Returns the entries appended to a destination.
    pub async fn entries(&self, destination: &str) -> Vec<StreamEntry> {
        self.state
            .read()
            .await
            .streams
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the destinations with at least one entry, sorted.
    pub async fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<_> = self.state.read().await.streams.keys().cloned().collect();
        destinations.sort();
        destinations
    }

    /// Returns the number of entries across all destinations.
    pub async fn total_entries(&self) -> usize {
        self.state.read().await.streams.values().map(Vec::len).sum()
    }

    pub async fn partition_batches(&self) -> Vec<DeliveredBatch> {
        self.state.read().await.partition_batches.clone()
    }

    pub async fn connect_attempts(&self) -> usize {
        self.state.read().await.connect_attempts
    }

    pub async fn close_count(&self) -> usize {
        self.state.read().await.closes
    }

    pub async fn send_calls(&self) -> usize {
        self.state.read().await.send_calls
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for InMemoryStore {
    async fn connect(&self) -> Result<Arc<dyn StoreClient>, StoreError> {
        let mut state = self.state.write().await;
        state.connect_attempts += 1;

        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(StoreError::Connection {
                message: "connection refused".to_string(),
            });
        }

        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn list_partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.write().await;
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(StoreError::Connection {
                message: "connection reset by peer".to_string(),
            });
        }

        Ok(self.partitions.clone())
    }

    async fn send_batch(&self, entries: &[WireEntry]) -> Result<Vec<ItemOutcome>, StoreError> {
        let mut state = self.state.write().await;
        state.send_calls += 1;

        let accept_limit = match state.faults.pop_front() {
            None => usize::MAX,
            Some(SendFault::CapacityExceeded) => 0,
            Some(SendFault::AcceptFirst(count)) => count,
            Some(SendFault::ConnectionLost) => {
                return Err(StoreError::Connection {
                    message: "connection reset by peer".to_string(),
                });
            }
            Some(SendFault::Rejected(message)) => return Err(StoreError::Rejected { message }),
        };

        let mut replies = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let size = entry.approximate_size();
            let over_memory = self.max_memory > 0 && state.used_bytes + size > self.max_memory;

            if index >= accept_limit || over_memory {
                replies.push(format!("{OUT_OF_MEMORY_REPLY}."));
                continue;
            }

            state.sequence += 1;
            state.used_bytes += size;
            let id = format!("{}-0", state.sequence);
            state
                .streams
                .entry(entry.destination.clone())
                .or_default()
                .push(StreamEntry {
                    id: id.clone(),
                    fields: entry.fields.clone(),
                });
            replies.push(id);
        }

        trace!(count = replies.len(), "appended entries");

        Ok(replies
            .iter()
            .map(|reply| ItemOutcome::from_reply(reply))
            .collect())
    }

    async fn send_partition_batch(
        &self,
        options: &CreateOptions,
        records: &[Record],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.send_calls += 1;

        match state.faults.pop_front() {
            None => {}
            Some(SendFault::ConnectionLost) => {
                return Err(StoreError::Connection {
                    message: "connection reset by peer".to_string(),
                });
            }
            Some(SendFault::Rejected(message)) => return Err(StoreError::Rejected { message }),
            Some(SendFault::CapacityExceeded) | Some(SendFault::AcceptFirst(_)) => {
                return Err(StoreError::Rejected {
                    message: "quota exceeded".to_string(),
                });
            }
        }

        if records.is_empty() {
            return Err(StoreError::Rejected {
                message: "empty batch".to_string(),
            });
        }

        state.used_bytes += records.iter().map(Record::approximate_size).sum::<u64>();
        state.partition_batches.push(DeliveredBatch {
            options: options.clone(),
            records: records.to_vec(),
        });

        Ok(())
    }

    fn default_batch_capacity(&self) -> ByteSize {
        self.default_batch_capacity
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.state.write().await.closes += 1;
        Ok(())
    }
}

#[async_trait]
impl MemoryStatsSource for InMemoryStore {
    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
        Ok(MemoryUsage {
            used_bytes: self.state.read().await.used_bytes,
            max_bytes: self.max_memory,
        })
    }
}
