use crate::record::Record;

/// Create a record whose approximate size is exactly `size` bytes.
///
/// The record has no key and a value of `size` ASCII bytes.
pub fn record_of_size(destination: &str, size: usize) -> Record {
    Record::new(destination).with_value("x".repeat(size))
}

/// Create `count` records for `destination` keyed `0..count`.
pub fn keyed_records(destination: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(destination)
                .with_key(i.to_string())
                .with_value(format!("value-{i}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_of_size() {
        let record = record_of_size("orders", 42);
        assert_eq!(record.approximate_size(), 42);
        assert!(record.key().is_none());
    }

    #[test]
    fn test_keyed_records() {
        let records = keyed_records("orders", 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].key_str().as_deref(), Some("2"));
    }
}
