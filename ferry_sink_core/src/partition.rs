//! Resolution of the partition target a record is batched for.
use std::fmt;

use crate::record::Record;

/// Key used for records without a usable key in dynamic mode.
pub const DEFAULT_PARTITION_KEY: &str = "default";

/// The partition a batch is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartitionTarget {
    /// A partition id fixed by configuration or assigned by the capture engine.
    ExplicitId(String),
    /// A partition key fixed by configuration.
    ExplicitKey(String),
    /// A partition key derived from the record key.
    DynamicKey(String),
    /// The store picks the partition.
    Unassigned,
}

/// How records are mapped to partition targets, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Every record goes to the same configured target.
    Fixed(PartitionTarget),
    /// The target is derived from each record's key.
    Dynamic,
    /// The record's partition hint is used if present, otherwise the store decides.
    Unassigned,
}

impl PartitionStrategy {
    /// Builds the strategy from configuration.
    ///
    /// A fixed partition id wins over a fixed key, a fixed key wins over
    /// dynamic keys. Blank values count as absent.
    pub fn from_config(
        partition_id: Option<&str>,
        partition_key: Option<&str>,
        dynamic_partition_key: bool,
    ) -> Self {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        if let Some(id) = non_blank(partition_id) {
            return Self::Fixed(PartitionTarget::ExplicitId(id));
        }

        if let Some(key) = non_blank(partition_key) {
            return Self::Fixed(PartitionTarget::ExplicitKey(key));
        }

        if dynamic_partition_key {
            Self::Dynamic
        } else {
            Self::Unassigned
        }
    }

    /// Returns the target for the record.
    pub fn resolve(&self, record: &Record) -> PartitionTarget {
        match self {
            Self::Fixed(target) => target.clone(),
            Self::Dynamic => dynamic_key(record),
            Self::Unassigned => match record.partition() {
                Some(partition) => PartitionTarget::ExplicitId(partition.to_string()),
                None => PartitionTarget::Unassigned,
            },
        }
    }
}

/// Derives the partition key from the record key.
pub fn dynamic_key(record: &Record) -> PartitionTarget {
    let key = record
        .key_str()
        .filter(|key| !key.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_PARTITION_KEY.to_string());
    PartitionTarget::DynamicKey(key)
}

impl fmt::Display for PartitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExplicitId(id) => write!(f, "partition id '{id}'"),
            Self::ExplicitKey(key) => write!(f, "partition key '{key}'"),
            Self::DynamicKey(key) => write!(f, "dynamic partition key '{key}'"),
            Self::Unassigned => write!(f, "unassigned partition"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_id_takes_precedence() {
        let strategy = PartitionStrategy::from_config(Some("3"), Some("orders"), true);
        assert_eq!(
            strategy,
            PartitionStrategy::Fixed(PartitionTarget::ExplicitId("3".to_string()))
        );
    }

    #[test]
    fn test_partition_key_takes_precedence_over_dynamic() {
        let strategy = PartitionStrategy::from_config(None, Some("orders"), true);
        let record = Record::new("t").with_key("customer-1");
        assert_eq!(
            strategy.resolve(&record),
            PartitionTarget::ExplicitKey("orders".to_string())
        );
    }

    #[test]
    fn test_blank_configuration_falls_back_to_dynamic() {
        let strategy = PartitionStrategy::from_config(Some(""), Some("   "), true);
        assert_eq!(strategy, PartitionStrategy::Dynamic);
    }

    #[test]
    fn test_dynamic_key_uses_record_key() {
        let strategy = PartitionStrategy::Dynamic;
        let record = Record::new("t").with_key("customer-1");
        assert_eq!(
            strategy.resolve(&record),
            PartitionTarget::DynamicKey("customer-1".to_string())
        );
    }

    #[test]
    fn test_dynamic_key_defaults_for_missing_or_blank_key() {
        let missing = Record::new("t");
        let blank = Record::new("t").with_key("  ");

        let expected = PartitionTarget::DynamicKey(DEFAULT_PARTITION_KEY.to_string());
        assert_eq!(dynamic_key(&missing), expected);
        assert_eq!(dynamic_key(&blank), expected);
    }

    #[test]
    fn test_unassigned_uses_partition_hint() {
        let strategy = PartitionStrategy::from_config(None, None, false);
        assert_eq!(strategy, PartitionStrategy::Unassigned);

        let hinted = Record::new("t").with_partition("2");
        assert_eq!(
            strategy.resolve(&hinted),
            PartitionTarget::ExplicitId("2".to_string())
        );
        assert_eq!(
            strategy.resolve(&Record::new("t")),
            PartitionTarget::Unassigned
        );
    }
}
