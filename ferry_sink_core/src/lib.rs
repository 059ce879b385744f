//! Delivery core of a change-data-capture sink.
//!
//! Records handed over by the capture engine are delivered to a stream or
//! partitioned log store by the [`Dispatcher`], either as stream entries
//! ([`DispatchMode::Stream`]) or as size-bounded partition batches built by
//! the [`BatchAccumulator`] ([`DispatchMode::Partitioned`]).
pub mod accumulator;
pub mod backpressure;
pub mod batch;
pub mod commit;
pub mod dispatcher;
pub mod error;
pub mod error_kind;
pub mod memory;
pub mod metrics;
pub mod partition;
pub mod record;
pub mod serialize;
pub mod store;

#[cfg(test)]
pub mod test_utils;

pub use accumulator::{AccumulatorOptions, BatchAccumulator};
pub use backpressure::{BackpressureOracle, MemoryThresholdOracle, NoBackpressure};
pub use batch::{Batch, CreateOptions};
pub use commit::{CommitError, RecordCommitter};
pub use dispatcher::{
    DispatchMode, Dispatcher, DispatcherOptions, HandleBatchSummary, DEFAULT_CHUNK_SIZE,
    DEFAULT_FILL_RATE_THRESHOLD, DEFAULT_HEARTBEAT_PREFIX,
};
pub use error::{DispatchError, Result};
pub use error_kind::ErrorKind;
pub use partition::{PartitionStrategy, PartitionTarget};
pub use record::Record;
pub use serialize::{MessageFormat, RecordSerializer, SerializerOptions, WireEntry};
pub use store::{ItemOutcome, StoreClient, StoreConnector, StoreError};
