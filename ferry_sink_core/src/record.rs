//! Change-event records handed to the sink by the capture engine.
use bytes::Bytes;

/// A change event ready to be delivered.
///
/// Records are immutable once built. The capture engine owns their
/// identity, the sink only forwards and acknowledges them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    destination: String,
    key: Option<Bytes>,
    value: Option<Bytes>,
    headers: Vec<(String, String)>,
    partition: Option<String>,
}

impl Record {
    /// Create an empty record for the given logical destination.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            key: None,
            value: None,
            headers: Vec::new(),
            partition: None,
        }
    }

    /// Set the record key.
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the record value.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Append a header. Headers keep their insertion order.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the partition assigned by the capture engine.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.key.as_ref()
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    /// Returns the key as text, if any.
    pub fn key_str(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|key| String::from_utf8_lossy(key).into_owned())
    }

    /// Returns the value as text, if any.
    pub fn value_str(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Approximate size in bytes of key, value and headers.
    pub fn approximate_size(&self) -> u64 {
        let key = self.key.as_ref().map(Bytes::len).unwrap_or_default();
        let value = self.value.as_ref().map(Bytes::len).unwrap_or_default();
        let headers = self
            .headers
            .iter()
            .fold(0, |acc, (name, value)| acc + name.len() + value.len());
        (key + value + headers) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approximate_size_counts_key_value_and_headers() {
        let record = Record::new("inventory.customers")
            .with_key("k1")
            .with_value("hello")
            .with_header("op", "c");

        assert_eq!(record.approximate_size(), 2 + 5 + 3);
    }

    #[test]
    fn test_empty_record_has_zero_size() {
        let record = Record::new("inventory.customers");
        assert_eq!(record.approximate_size(), 0);
        assert_eq!(record.key_str(), None);
        assert_eq!(record.value_str(), None);
    }

    #[test]
    fn test_headers_keep_insertion_order() {
        let record = Record::new("t")
            .with_header("b", "2")
            .with_header("a", "1");

        let names: Vec<_> = record.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
