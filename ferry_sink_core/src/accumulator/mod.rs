//! Partition-aware accumulation of records into size-bounded batches.
//!
//! The accumulator owns one live [`Batch`] per [`PartitionTarget`]. When a
//! record doesn't fit, the batch is emitted to the store and renewed from the
//! cached [`CreateOptions`].
use std::collections::{HashMap, hash_map::Entry};

use bytesize::ByteSize;
use snafu::ResultExt;
use tracing::{debug, trace};

use crate::{
    batch::{Batch, CreateOptions},
    error::{
        DispatchError, FatalDeliverySnafu, RecordTooLargeSnafu, Result, UnknownPartitionSnafu,
    },
    partition::{PartitionStrategy, PartitionTarget},
    record::Record,
    store::StoreClient,
};

/// Options for the batch accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorOptions {
    /// Send every record to this partition id.
    pub partition_id: Option<String>,
    /// Send every record with this partition key.
    pub partition_key: Option<String>,
    /// Derive the partition key from the record key when no fixed target is set.
    pub dynamic_partition_key: bool,
    /// Maximum batch size. `None` or zero uses the store default.
    pub max_batch_size: Option<ByteSize>,
}

impl Default for AccumulatorOptions {
    fn default() -> Self {
        Self {
            partition_id: None,
            partition_key: None,
            dynamic_partition_key: true,
            max_batch_size: None,
        }
    }
}

pub struct BatchAccumulator {
    strategy: PartitionStrategy,
    max_batch_size: Option<ByteSize>,
    slots: HashMap<PartitionTarget, PartitionSlot>,
    initialized: bool,
    emitted_batches: u64,
}

struct PartitionSlot {
    options: CreateOptions,
    batch: Batch,
}

impl BatchAccumulator {
    pub fn new(options: AccumulatorOptions) -> Self {
        let strategy = PartitionStrategy::from_config(
            options.partition_id.as_deref(),
            options.partition_key.as_deref(),
            options.dynamic_partition_key,
        );

        Self {
            strategy,
            max_batch_size: options.max_batch_size.filter(|size| size.as_u64() > 0),
            slots: HashMap::new(),
            initialized: false,
            emitted_batches: 0,
        }
    }

    pub fn strategy(&self) -> &PartitionStrategy {
        &self.strategy
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Creates the batches known up front.
    ///
    /// Fixed targets get exactly one batch. In unassigned mode the store's
    /// partitions are listed and one batch is created per partition, plus
    /// one for records without a partition. Calling it again does nothing.
    pub async fn initialize(&mut self, client: &dyn StoreClient) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let store_default = client.default_batch_capacity();

        match self.strategy.clone() {
            PartitionStrategy::Fixed(target) => {
                let options = match &target {
                    PartitionTarget::ExplicitId(id) => {
                        CreateOptions::for_partition_id(id.clone(), self.max_batch_size)
                    }
                    PartitionTarget::ExplicitKey(key) | PartitionTarget::DynamicKey(key) => {
                        CreateOptions::for_partition_key(key.clone(), self.max_batch_size)
                    }
                    PartitionTarget::Unassigned => {
                        CreateOptions::unpartitioned(self.max_batch_size)
                    }
                };
                self.insert_slot(target, options, store_default);
            }
            PartitionStrategy::Unassigned => {
                let partitions = client.list_partitions().await.map_err(|source| {
                    DispatchError::from_store("failed to list partitions", source)
                })?;

                debug!(count = partitions.len(), "preparing batches for store partitions");

                self.insert_slot(
                    PartitionTarget::Unassigned,
                    CreateOptions::unpartitioned(self.max_batch_size),
                    store_default,
                );
                for partition_id in partitions {
                    let options =
                        CreateOptions::for_partition_id(partition_id.clone(), self.max_batch_size);
                    self.insert_slot(
                        PartitionTarget::ExplicitId(partition_id),
                        options,
                        store_default,
                    );
                }
            }
            PartitionStrategy::Dynamic => {}
        }

        self.initialized = true;
        Ok(())
    }

    /// Returns the partition target of the record.
    pub fn resolve(&self, record: &Record) -> PartitionTarget {
        self.strategy.resolve(record)
    }

    /// Appends the record to the batch of `target`.
    ///
    /// If the batch is full it is emitted and renewed, and the emitted records
    /// are returned so the caller can acknowledge them.
    pub async fn append(
        &mut self,
        client: &dyn StoreClient,
        record: Record,
        target: PartitionTarget,
    ) -> Result<Option<Vec<Record>>> {
        let store_default = client.default_batch_capacity();
        let max_batch_size = self.max_batch_size;
        let dynamic = matches!(self.strategy, PartitionStrategy::Dynamic);

        let slot = match self.slots.entry(target) {
            Entry::Occupied(inner) => inner.into_mut(),
            Entry::Vacant(inner) => {
                let key = match inner.key() {
                    PartitionTarget::DynamicKey(key) if dynamic => Some(key.clone()),
                    _ => None,
                };
                let Some(key) = key else {
                    return UnknownPartitionSnafu {
                        target: inner.into_key(),
                    }
                    .fail();
                };

                trace!(partition_key = %key, "creating batch for dynamic partition key");
                let options = CreateOptions::for_partition_key(key, max_batch_size);
                let batch = options.new_batch(store_default);
                inner.insert(PartitionSlot { options, batch })
            }
        };

        let record = match slot.batch.try_add(record) {
            Ok(()) => return Ok(None),
            Err(record) => record,
        };

        if slot.batch.is_empty() {
            return record_too_large(&record, slot.batch.capacity());
        }

        debug!(
            count = slot.batch.len(),
            size = slot.batch.size_bytes(),
            "maximum batch size reached, dispatching batch"
        );

        let full = std::mem::replace(&mut slot.batch, slot.options.new_batch(store_default));
        emit(client, &slot.options, &full).await?;
        self.emitted_batches += 1;

        if let Err(record) = slot.batch.try_add(record) {
            return record_too_large(&record, slot.batch.capacity());
        }

        Ok(Some(full.into_records()))
    }

    /// Emits every non-empty batch and returns the delivered records.
    pub async fn flush_all(&mut self, client: &dyn StoreClient) -> Result<Vec<Record>> {
        let store_default = client.default_batch_capacity();
        let mut delivered = Vec::new();

        for (target, slot) in self.slots.iter_mut() {
            if slot.batch.is_empty() {
                continue;
            }

            trace!(%target, count = slot.batch.len(), "dispatching batch");
            let batch = std::mem::replace(&mut slot.batch, slot.options.new_batch(store_default));
            emit(client, &slot.options, &batch).await?;
            self.emitted_batches += 1;
            delivered.extend(batch.into_records());
        }

        Ok(delivered)
    }

    /// Drops every buffered record and returns how many were dropped.
    ///
    /// Batches are renewed empty with their current capacity, so the
    /// partition layout survives.
    pub fn discard(&mut self) -> usize {
        let mut dropped = 0;
        for slot in self.slots.values_mut() {
            if slot.batch.is_empty() {
                continue;
            }
            let capacity = slot.batch.capacity();
            dropped += std::mem::replace(&mut slot.batch, Batch::new(capacity)).len();
        }
        dropped
    }

    /// Number of records waiting in batches.
    pub fn pending_records(&self) -> usize {
        self.slots.values().map(|slot| slot.batch.len()).sum()
    }

    /// Number of batches sent to the store since creation.
    pub fn emitted_batches(&self) -> u64 {
        self.emitted_batches
    }

    /// Number of live batches.
    pub fn num_batches(&self) -> usize {
        self.slots.len()
    }

    fn insert_slot(
        &mut self,
        target: PartitionTarget,
        options: CreateOptions,
        store_default: ByteSize,
    ) {
        let batch = options.new_batch(store_default);
        self.slots.insert(target, PartitionSlot { options, batch });
    }
}

async fn emit(client: &dyn StoreClient, options: &CreateOptions, batch: &Batch) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    trace!(count = batch.len(), "sending batch to store");
    client
        .send_partition_batch(options, batch.records())
        .await
        .context(FatalDeliverySnafu {
            message: "failed to send partition batch",
        })?;
    trace!("sent batch to store");

    Ok(())
}

fn record_too_large<T>(record: &Record, capacity: u64) -> Result<T> {
    RecordTooLargeSnafu {
        destination: record.destination(),
        size: record.approximate_size(),
        capacity,
    }
    .fail()
}
