use std::{sync::Arc, time::Duration};

use bytesize::ByteSize;
use clap::{ArgAction, Args, ValueEnum};
use ferry_sink_core::{
    AccumulatorOptions, BackpressureOracle, DEFAULT_CHUNK_SIZE, DEFAULT_FILL_RATE_THRESHOLD,
    DEFAULT_HEARTBEAT_PREFIX, DispatchMode, DispatcherOptions, MemoryThresholdOracle,
    MessageFormat, NoBackpressure, SerializerOptions, memory::InMemoryStore,
};

use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Send each chunk as stream entries
    Stream,
    /// Accumulate records into partition batches
    Partitioned,
}

/// Sink configuration.
#[derive(Debug, Args)]
pub struct SinkArgs {
    /// How records are delivered to the store.
    #[arg(long, env = "FERRY_MODE", value_enum, default_value = "stream")]
    mode: ModeArg,
    /// Send every record to this partition id.
    #[arg(long, env = "FERRY_PARTITION_ID")]
    partition_id: Option<String>,
    /// Send every record with this partition key.
    #[arg(long, env = "FERRY_PARTITION_KEY")]
    partition_key: Option<String>,
    /// Derive the partition key from the record key.
    #[arg(long, env = "FERRY_DYNAMIC_PARTITION_KEY", default_value_t = true, action = ArgAction::Set)]
    dynamic_partition_key: bool,
    /// Maximum partition batch size. Zero uses the store default.
    #[arg(long, env = "FERRY_MAX_BATCH_SIZE", default_value = "0")]
    max_batch_size: ByteSize,
    /// Number of records driven through one retry loop.
    #[arg(long, env = "FERRY_BATCH_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    batch_size: usize,
    /// Wire format of stream entries (compact or extended).
    #[arg(long, env = "FERRY_MESSAGE_FORMAT", default_value = "compact")]
    message_format: MessageFormat,
    /// Written in place of a missing key.
    #[arg(long, env = "FERRY_NULL_KEY", default_value = "default")]
    null_key: String,
    /// Written in place of a missing value.
    #[arg(long, env = "FERRY_NULL_VALUE", default_value = "default")]
    null_value: String,
    /// Destination prefix of heartbeat records.
    #[arg(long, env = "FERRY_HEARTBEAT_PREFIX", default_value = DEFAULT_HEARTBEAT_PREFIX)]
    heartbeat_prefix: String,
    /// Acknowledge heartbeats without sending them.
    #[arg(long, env = "FERRY_SKIP_HEARTBEATS", default_value_t = true, action = ArgAction::Set)]
    skip_heartbeats: bool,
    /// First backoff delay, in milliseconds.
    #[arg(long, env = "FERRY_INITIAL_RETRY_DELAY_MS", default_value_t = 300)]
    initial_retry_delay_ms: u64,
    /// Maximum backoff delay, in milliseconds.
    #[arg(long, env = "FERRY_MAX_RETRY_DELAY_MS", default_value_t = 10_000)]
    max_retry_delay_ms: u64,
    /// Wait after a backpressure denial, in milliseconds.
    #[arg(long, env = "FERRY_BACKPRESSURE_DELAY_MS", default_value_t = 1_000)]
    backpressure_delay_ms: u64,
    /// Records accounted between two store memory probes.
    #[arg(long, env = "FERRY_FILL_RATE", default_value_t = DEFAULT_FILL_RATE_THRESHOLD)]
    fill_rate: u64,
    /// Store memory limit. Zero uses the store's own limit.
    #[arg(long, env = "FERRY_MEMORY_LIMIT", default_value = "0")]
    memory_limit: ByteSize,
}

/// In-memory store configuration.
#[derive(Debug, Args)]
pub struct StoreArgs {
    /// Partition ids reported by the store, comma separated.
    #[arg(long, env = "FERRY_STORE_PARTITIONS", value_delimiter = ',')]
    store_partitions: Vec<String>,
    /// Default partition batch capacity of the store.
    #[arg(long, env = "FERRY_STORE_BATCH_CAPACITY", default_value = "1MiB")]
    store_batch_capacity: ByteSize,
    /// Memory ceiling of the store. Zero means unlimited.
    #[arg(long, env = "FERRY_STORE_MAX_MEMORY", default_value = "0")]
    store_max_memory: ByteSize,
}

impl SinkArgs {
    pub fn dispatcher_options(&self) -> Result<DispatcherOptions> {
        if self.batch_size == 0 {
            return Err(CliError::InvalidArgument {
                name: "batch-size",
                message: "must be greater than zero".to_string(),
            });
        }

        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(CliError::InvalidArgument {
                name: "initial-retry-delay-ms",
                message: format!(
                    "{} is greater than the maximum delay of {}",
                    self.initial_retry_delay_ms, self.max_retry_delay_ms
                ),
            });
        }

        let mode = match self.mode {
            ModeArg::Stream => DispatchMode::Stream,
            ModeArg::Partitioned => DispatchMode::Partitioned,
        };

        let serializer = SerializerOptions::default()
            .with_format(self.message_format)
            .with_null_key(self.null_key.clone())
            .with_null_value(self.null_value.clone());

        let accumulator = AccumulatorOptions {
            partition_id: self.partition_id.clone(),
            partition_key: self.partition_key.clone(),
            dynamic_partition_key: self.dynamic_partition_key,
            max_batch_size: Some(self.max_batch_size),
        };

        Ok(DispatcherOptions::default()
            .with_mode(mode)
            .with_chunk_size(self.batch_size)
            .with_heartbeats(self.heartbeat_prefix.clone(), self.skip_heartbeats)
            .with_retry_delays(
                Duration::from_millis(self.initial_retry_delay_ms),
                Duration::from_millis(self.max_retry_delay_ms),
            )
            .with_backpressure_delay(Duration::from_millis(self.backpressure_delay_ms))
            .with_fill_rate_threshold(self.fill_rate)
            .with_serializer(serializer)
            .with_accumulator(accumulator))
    }

    /// Returns the backpressure oracle for `store`.
    ///
    /// Memory checks only run in stream mode and when a limit is known.
    pub fn backpressure(
        &self,
        store: &InMemoryStore,
        store_max_memory: ByteSize,
    ) -> Arc<dyn BackpressureOracle> {
        let limit_known = self.memory_limit.as_u64() > 0 || store_max_memory.as_u64() > 0;
        if self.mode == ModeArg::Stream && limit_known {
            Arc::new(MemoryThresholdOracle::new(
                Arc::new(store.clone()),
                self.memory_limit,
            ))
        } else {
            Arc::new(NoBackpressure)
        }
    }
}

impl StoreArgs {
    pub fn store(&self) -> InMemoryStore {
        InMemoryStore::new()
            .with_partitions(self.store_partitions.iter().map(|id| id.trim().to_string()))
            .with_default_batch_capacity(self.store_batch_capacity)
            .with_max_memory(self.store_max_memory)
    }

    pub fn max_memory(&self) -> ByteSize {
        self.store_max_memory
    }
}
