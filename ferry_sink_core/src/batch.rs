use bytesize::ByteSize;

use crate::record::Record;

/// Options used to create (and renew) the batch of one partition or key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateOptions {
    /// The partition the batch is sent to.
    pub partition_id: Option<String>,
    /// The partition key the store hashes to pick a partition.
    pub partition_key: Option<String>,
    /// Maximum batch size. `None` uses the store default.
    pub max_size: Option<ByteSize>,
}

/// An ordered, size-bounded group of records for one partition target.
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    size_bytes: u64,
    capacity: u64,
}

impl CreateOptions {
    /// Options for a batch bound to an explicit partition id.
    pub fn for_partition_id(partition_id: impl Into<String>, max_size: Option<ByteSize>) -> Self {
        Self {
            partition_id: Some(partition_id.into()),
            partition_key: None,
            max_size,
        }
    }

    /// Options for a batch bound to a partition key.
    pub fn for_partition_key(partition_key: impl Into<String>, max_size: Option<ByteSize>) -> Self {
        Self {
            partition_id: None,
            partition_key: Some(partition_key.into()),
            max_size,
        }
    }

    /// Options for a batch the store assigns to a partition.
    pub fn unpartitioned(max_size: Option<ByteSize>) -> Self {
        Self {
            partition_id: None,
            partition_key: None,
            max_size,
        }
    }

    /// Returns the batch capacity in bytes, falling back to the store default.
    pub fn capacity(&self, store_default: ByteSize) -> u64 {
        self.max_size
            .filter(|size| size.as_u64() > 0)
            .unwrap_or(store_default)
            .as_u64()
    }

    /// Creates a new empty batch from these options.
    pub fn new_batch(&self, store_default: ByteSize) -> Batch {
        Batch::new(self.capacity(store_default))
    }
}

impl Batch {
    pub fn new(capacity: u64) -> Self {
        Self {
            records: Vec::new(),
            size_bytes: 0,
            capacity,
        }
    }

    /// Adds the record if it fits, otherwise hands it back.
    pub fn try_add(&mut self, record: Record) -> Result<(), Record> {
        let size = record.approximate_size();
        if self.size_bytes + size > self.capacity {
            return Err(record);
        }

        self.size_bytes += size;
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
