//! Resilient delivery of record batches to the store.
//!
//! [`Dispatcher::handle_batch`] splits the records into chunks and drives
//! each chunk through a retry loop until every record is acknowledged or a
//! fatal error occurs:
//!
//! 1. reconnect if the connection was lost,
//! 2. acknowledge heartbeats without sending them,
//! 3. ask the backpressure oracle and wait if it denies,
//! 4. send the pending records and acknowledge the accepted ones,
//! 5. back off before retrying what is left.
mod backoff;
mod connection;
mod outcome;
mod retry;

use std::{sync::Arc, time::Duration};

use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    accumulator::{AccumulatorOptions, BatchAccumulator},
    backpressure::{BackpressureOracle, NoBackpressure},
    commit::RecordCommitter,
    error::{CommitSnafu, DispatchError, Result, ShutdownSnafu},
    metrics::DispatchMetrics,
    record::Record,
    serialize::{RecordSerializer, SerializerOptions, WireEntry},
    store::{StoreClient, StoreConnector},
};

pub use self::{
    backoff::ExponentialBackoff,
    connection::Connection,
    outcome::{DeliveryOutcome, response_order},
    retry::RetryState,
};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_HEARTBEAT_PREFIX: &str = "__debezium-heartbeat";
pub const DEFAULT_FILL_RATE_THRESHOLD: u64 = 30_000;

/// How pending records reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Serialize each chunk into stream entries and send them in one call.
    #[default]
    Stream,
    /// Accumulate records into partition batches and flush them.
    Partitioned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherOptions {
    pub mode: DispatchMode,
    /// Maximum number of records driven through one retry loop.
    pub chunk_size: usize,
    pub heartbeat_prefix: String,
    pub skip_heartbeats: bool,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
    /// Wait after a backpressure denial.
    pub backpressure_delay: Duration,
    pub fill_rate_threshold: u64,
    pub serializer: SerializerOptions,
    pub accumulator: AccumulatorOptions,
}

/// Counters of one [`Dispatcher::handle_batch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleBatchSummary {
    pub records: usize,
    pub acknowledged: usize,
    pub heartbeats_skipped: usize,
    pub chunks: usize,
    pub send_attempts: usize,
    /// Number of backoff sleeps.
    pub retries: usize,
    /// Connections re-established after a connection loss.
    pub reconnects: usize,
    pub backpressure_waits: usize,
    /// Time spent in backoff sleeps.
    pub total_backoff: Duration,
}

pub struct Dispatcher {
    options: DispatcherOptions,
    connector: Arc<dyn StoreConnector>,
    connection: Connection,
    connected_once: bool,
    serializer: RecordSerializer,
    accumulator: BatchAccumulator,
    backpressure: Arc<dyn BackpressureOracle>,
    metrics: DispatchMetrics,
    ct: CancellationToken,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            heartbeat_prefix: DEFAULT_HEARTBEAT_PREFIX.to_string(),
            skip_heartbeats: true,
            initial_retry_delay: Duration::from_millis(300),
            max_retry_delay: Duration::from_secs(10),
            backpressure_delay: Duration::from_secs(1),
            fill_rate_threshold: DEFAULT_FILL_RATE_THRESHOLD,
            serializer: SerializerOptions::default(),
            accumulator: AccumulatorOptions::default(),
        }
    }
}

impl DispatcherOptions {
    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Change the chunk size. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Change the heartbeat prefix and whether heartbeats are skipped.
    pub fn with_heartbeats(mut self, prefix: impl Into<String>, skip: bool) -> Self {
        self.heartbeat_prefix = prefix.into();
        self.skip_heartbeats = skip;
        self
    }

    /// Change the initial and maximum backoff delays.
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_retry_delay = initial;
        self.max_retry_delay = max;
        self
    }

    pub fn with_backpressure_delay(mut self, delay: Duration) -> Self {
        self.backpressure_delay = delay;
        self
    }

    pub fn with_fill_rate_threshold(mut self, threshold: u64) -> Self {
        self.fill_rate_threshold = threshold;
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerOptions) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn with_accumulator(mut self, accumulator: AccumulatorOptions) -> Self {
        self.accumulator = accumulator;
        self
    }
}

impl Dispatcher {
    pub fn new(
        options: DispatcherOptions,
        connector: Arc<dyn StoreConnector>,
        ct: CancellationToken,
    ) -> Self {
        let serializer = RecordSerializer::new(options.serializer.clone());
        let accumulator = BatchAccumulator::new(options.accumulator.clone());

        Self {
            options,
            connector,
            connection: Connection::Disconnected,
            connected_once: false,
            serializer,
            accumulator,
            backpressure: Arc::new(NoBackpressure),
            metrics: DispatchMetrics::default(),
            ct,
        }
    }

    /// Change the backpressure oracle consulted before every send.
    pub fn with_backpressure(mut self, oracle: Arc<dyn BackpressureOracle>) -> Self {
        self.backpressure = oracle;
        self
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Number of records waiting in partition batches.
    pub fn pending_records(&self) -> usize {
        self.accumulator.pending_records()
    }

    /// Connects to the store and prepares the partition batches.
    ///
    /// Calling it is optional, `handle_batch` connects lazily.
    pub async fn connect(&mut self) -> Result<()> {
        let client = self
            .connection
            .establish(self.connector.as_ref())
            .await
            .map_err(|source| {
                DispatchError::from_store("failed to connect to the store", source)
            })?;
        self.connected_once = true;

        if self.options.mode == DispatchMode::Partitioned {
            self.accumulator.initialize(client.as_ref()).await?;
        }

        info!(mode = ?self.options.mode, "connected to the store");
        Ok(())
    }

    /// Delivers the records, marking each one processed once acknowledged.
    ///
    /// Capacity and connection failures are retried until they clear.
    /// The committer is told the batch is finished after the last chunk.
    pub async fn handle_batch(
        &mut self,
        records: Vec<Record>,
        committer: &dyn RecordCommitter,
    ) -> Result<HandleBatchSummary> {
        let mut summary = HandleBatchSummary {
            records: records.len(),
            ..Default::default()
        };

        let chunk_size = self.options.chunk_size.max(1);
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let chunk: Vec<_> = records.by_ref().take(chunk_size).collect();
            summary.chunks += 1;
            self.dispatch_chunk(chunk, committer, &mut summary).await?;
        }

        committer.mark_batch_finished().await.context(CommitSnafu)?;

        debug!(
            records = summary.records,
            acknowledged = summary.acknowledged,
            heartbeats = summary.heartbeats_skipped,
            retries = summary.retries,
            "batch handled"
        );

        Ok(summary)
    }

    /// Flushes the partition batches and closes the connection.
    pub async fn shutdown(&mut self, committer: &dyn RecordCommitter) -> Result<()> {
        if let Some(client) = self.connection.client() {
            if self.accumulator.pending_records() > 0 {
                let emitted = self.accumulator.emitted_batches();
                let delivered = self.accumulator.flush_all(client.as_ref()).await?;
                self.record_flushes(emitted);

                let mut summary = HandleBatchSummary::default();
                self.acknowledge(committer, &delivered, &mut summary).await?;
                info!(count = delivered.len(), "flushed pending batches");
            }
        }

        self.connection.close().await;
        Ok(())
    }

    async fn dispatch_chunk(
        &mut self,
        chunk: Vec<Record>,
        committer: &dyn RecordCommitter,
        summary: &mut HandleBatchSummary,
    ) -> Result<()> {
        let backoff = ExponentialBackoff::new(
            self.options.initial_retry_delay,
            self.options.max_retry_delay,
        );
        let mut state = RetryState::new(chunk, backoff);

        loop {
            let Some(client) = self.connection.client() else {
                match self.connection.establish(self.connector.as_ref()).await {
                    Ok(_) if self.connected_once => {
                        info!("reconnected to the store");
                        summary.reconnects += 1;
                        self.metrics.reconnects.add(1, &[]);
                    }
                    Ok(_) => self.connected_once = true,
                    Err(err) => {
                        warn!(err = ?err, "failed to connect to the store");
                        self.backoff(&mut state, summary).await?;
                    }
                }
                continue;
            };

            if self.options.skip_heartbeats {
                let heartbeats = state.take_heartbeats(&self.options.heartbeat_prefix);
                for record in &heartbeats {
                    trace!(destination = record.destination(), "skipping heartbeat");
                    committer.mark_processed(record).await.context(CommitSnafu)?;
                }
                summary.heartbeats_skipped += heartbeats.len();
            }

            if state.is_empty() {
                return Ok(());
            }

            let entries = match self.options.mode {
                DispatchMode::Stream => Some(self.serializer.serialize(state.pending())),
                DispatchMode::Partitioned => None,
            };
            let (estimated, count) = match &entries {
                Some(entries) => (
                    entries.first().map_or(0, WireEntry::approximate_size),
                    entries.len(),
                ),
                None => (state.pending()[0].approximate_size(), state.len()),
            };
            let allowed = self
                .backpressure
                .check_capacity(estimated, count, self.options.fill_rate_threshold)
                .await;
            if !allowed {
                summary.backpressure_waits += 1;
                self.metrics.backpressure_waits.add(1, &[]);
                debug!(
                    pending = state.len(),
                    delay = ?self.options.backpressure_delay,
                    "store is near capacity, waiting before sending"
                );
                self.sleep(self.options.backpressure_delay).await?;
                continue;
            }

            summary.send_attempts += 1;
            let outcome = match entries {
                Some(entries) => {
                    self.send_stream(client.as_ref(), entries, &mut state, committer, summary)
                        .await?
                }
                None => {
                    self.send_partitioned(client.as_ref(), &mut state, committer, summary)
                        .await?
                }
            };

            match outcome {
                DeliveryOutcome::FullyAcknowledged => {}
                DeliveryOutcome::PartiallyAcknowledged(_) | DeliveryOutcome::CapacityExceeded(_) => {
                    let err = DispatchError::CapacityExceeded { count: state.len() };
                    self.metrics.retried_records.add(state.len() as u64, &[]);
                    debug!(err = %err, "retrying records the store had no room for");
                }
                DeliveryOutcome::ConnectionLost(err) => {
                    warn!(err = ?err, "lost connection to the store");
                    self.connection.close().await;
                }
                DeliveryOutcome::Fatal(err) => return Err(err),
            }

            if state.is_empty() {
                return Ok(());
            }

            self.backoff(&mut state, summary).await?;
        }
    }

    async fn send_stream(
        &self,
        client: &dyn StoreClient,
        entries: Vec<WireEntry>,
        state: &mut RetryState,
        committer: &dyn RecordCommitter,
        summary: &mut HandleBatchSummary,
    ) -> Result<DeliveryOutcome> {
        trace!(
            entries = entries.len(),
            records = state.len(),
            "sending entries to the store"
        );

        let reply = client.send_batch(&entries).await;
        let outcome = DeliveryOutcome::classify(&entries, reply);

        let accepted = match &outcome {
            DeliveryOutcome::FullyAcknowledged => state.take_accepted(&response_order(&entries)),
            DeliveryOutcome::PartiallyAcknowledged(indices) => state.take_accepted(indices),
            _ => return Ok(outcome),
        };

        self.acknowledge(committer, &accepted, summary).await?;
        Ok(outcome)
    }

    async fn send_partitioned(
        &mut self,
        client: &dyn StoreClient,
        state: &mut RetryState,
        committer: &dyn RecordCommitter,
        summary: &mut HandleBatchSummary,
    ) -> Result<DeliveryOutcome> {
        match self.accumulator.initialize(client).await {
            Ok(()) => {}
            Err(DispatchError::ConnectionLost { source }) => {
                return Ok(DeliveryOutcome::ConnectionLost(source));
            }
            Err(err) => return Err(err),
        }

        let emitted = self.accumulator.emitted_batches();
        let result = self
            .fill_and_flush(client, state.take_all(), committer, summary)
            .await;
        self.record_flushes(emitted);

        if let Err(err) = result {
            // Buffered records belong to this call and must not be
            // committed by the next one.
            let dropped = self.accumulator.discard();
            if dropped > 0 {
                warn!(err = %err, dropped, "discarding buffered records after a failed delivery");
            }
            return Err(err);
        }

        Ok(DeliveryOutcome::FullyAcknowledged)
    }

    async fn fill_and_flush(
        &mut self,
        client: &dyn StoreClient,
        records: Vec<Record>,
        committer: &dyn RecordCommitter,
        summary: &mut HandleBatchSummary,
    ) -> Result<()> {
        for record in records {
            let target = self.accumulator.resolve(&record);
            if let Some(flushed) = self.accumulator.append(client, record, target).await? {
                self.acknowledge(committer, &flushed, summary).await?;
            }
        }

        let delivered = self.accumulator.flush_all(client).await?;
        self.acknowledge(committer, &delivered, summary).await
    }

    async fn acknowledge(
        &self,
        committer: &dyn RecordCommitter,
        records: &[Record],
        summary: &mut HandleBatchSummary,
    ) -> Result<()> {
        for record in records {
            committer.mark_processed(record).await.context(CommitSnafu)?;
        }

        summary.acknowledged += records.len();
        self.metrics
            .acknowledged_records
            .add(records.len() as u64, &[]);
        Ok(())
    }

    fn record_flushes(&self, emitted_before: u64) {
        let flushed = self.accumulator.emitted_batches() - emitted_before;
        self.metrics.flushed_batches.add(flushed, &[]);
    }

    async fn backoff(
        &self,
        state: &mut RetryState,
        summary: &mut HandleBatchSummary,
    ) -> Result<()> {
        let delay = state.next_delay();
        summary.retries += 1;
        summary.total_backoff += delay;

        debug!(
            attempt = state.attempts(),
            delay = ?delay,
            pending = state.len(),
            "backing off before retrying"
        );

        self.sleep(delay).await
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.ct.cancelled() => ShutdownSnafu {}.fail(),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::{InMemoryCommitter, InMemoryStore, SendFault},
        test_utils::keyed_records,
    };

    fn dispatcher(store: &InMemoryStore, options: DispatcherOptions) -> Dispatcher {
        Dispatcher::new(
            options.with_retry_delays(Duration::from_millis(100), Duration::from_millis(400)),
            Arc::new(store.clone()),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_split_into_chunks() {
        let store = InMemoryStore::new();
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default().with_chunk_size(2));

        let summary = dispatcher
            .handle_batch(keyed_records("orders", 5), &committer)
            .await
            .expect("handle batch");

        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.send_attempts, 3);
        assert_eq!(summary.acknowledged, 5);
        assert_eq!(store.send_calls().await, 3);
        assert_eq!(committer.batches_finished().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_acceptance_retries_the_rest() {
        let store = InMemoryStore::new();
        store.push_fault(SendFault::AcceptFirst(1)).await;
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        let summary = dispatcher
            .handle_batch(keyed_records("orders", 3), &committer)
            .await
            .expect("handle batch");

        assert_eq!(summary.send_attempts, 2);
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.total_backoff, Duration::from_millis(100));

        let keys: Vec<_> = committer
            .processed()
            .await
            .iter()
            .filter_map(Record::key_str)
            .collect();
        assert_eq!(keys, vec!["0", "1", "2"]);
        assert_eq!(store.total_entries().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_restarts_for_each_chunk() {
        let store = InMemoryStore::new();
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        for _ in 0..3 {
            store.push_fault(SendFault::CapacityExceeded).await;
        }
        let summary = dispatcher
            .handle_batch(keyed_records("orders", 1), &committer)
            .await
            .expect("handle batch");
        assert_eq!(summary.total_backoff, Duration::from_millis(100 + 200 + 400));

        store.push_fault(SendFault::CapacityExceeded).await;
        let summary = dispatcher
            .handle_batch(keyed_records("orders", 1), &committer)
            .await
            .expect("handle batch");
        assert_eq!(summary.total_backoff, Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_store_error_aborts() {
        let store = InMemoryStore::new();
        store
            .push_fault(SendFault::Rejected("WRONGTYPE".to_string()))
            .await;
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        let err = dispatcher
            .handle_batch(keyed_records("orders", 2), &committer)
            .await
            .expect_err("fatal");

        assert!(matches!(err, DispatchError::FatalDelivery { .. }));
        assert_eq!(committer.processed_count().await, 0);
        assert_eq!(committer.batches_finished().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_aborts() {
        let store = InMemoryStore::new();
        let committer = InMemoryCommitter::new();
        committer.fail_after(1).await;
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        let err = dispatcher
            .handle_batch(keyed_records("orders", 2), &committer)
            .await
            .expect_err("commit fails");
        assert!(matches!(err, DispatchError::Commit { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_batch_is_finished() {
        let store = InMemoryStore::new();
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        let summary = dispatcher
            .handle_batch(Vec::new(), &committer)
            .await
            .expect("handle batch");

        assert_eq!(summary, HandleBatchSummary::default());
        assert_eq!(committer.batches_finished().await, 1);
        assert_eq!(store.connect_attempts().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_initializes_partition_batches() {
        let store = InMemoryStore::new().with_partitions(["0", "1"]);
        let mut dispatcher = dispatcher(
            &store,
            DispatcherOptions::default()
                .with_mode(DispatchMode::Partitioned)
                .with_accumulator(AccumulatorOptions {
                    dynamic_partition_key: false,
                    ..Default::default()
                }),
        );

        dispatcher.connect().await.expect("connect");
        assert!(dispatcher.is_connected());
        assert_eq!(dispatcher.accumulator.num_batches(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_connection() {
        let store = InMemoryStore::new();
        let committer = InMemoryCommitter::new();
        let mut dispatcher = dispatcher(&store, DispatcherOptions::default());

        dispatcher
            .handle_batch(keyed_records("orders", 1), &committer)
            .await
            .expect("handle batch");
        dispatcher.shutdown(&committer).await.expect("shutdown");

        assert!(!dispatcher.is_connected());
        assert_eq!(store.close_count().await, 1);
    }
}
