//! Mapping of records to stream store entries.
//!
//! Two formats are supported:
//!
//! - **compact**: one field per entry, `{key: value}`. Records for the same
//!   destination and key inside one wire call collapse into a single entry
//!   holding the latest value.
//! - **extended**: fields `key` and `value`, plus one field per header with
//!   the header name upper-cased.
use std::{collections::HashMap, fmt, str::FromStr};

use snafu::Snafu;

use crate::record::Record;

const EXTENDED_KEY_FIELD: &str = "key";
const EXTENDED_VALUE_FIELD: &str = "value";
const DEFAULT_NULL_LITERAL: &str = "default";

/// Wire format of stream entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    #[default]
    Compact,
    Extended,
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown message format '{value}', expected 'compact' or 'extended'"))]
pub struct MessageFormatParseError {
    value: String,
}

/// Options for the record serializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerOptions {
    pub format: MessageFormat,
    /// Written in place of a missing key.
    pub null_key: String,
    /// Written in place of a missing value.
    pub null_value: String,
}

/// One entry of a wire call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireEntry {
    /// The stream the entry is appended to.
    pub destination: String,
    /// The entry fields, in order.
    pub fields: Vec<(String, String)>,
    /// Indices of the records this entry was built from.
    sources: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct RecordSerializer {
    options: SerializerOptions,
}

impl RecordSerializer {
    pub fn new(options: SerializerOptions) -> Self {
        Self { options }
    }

    pub fn format(&self) -> MessageFormat {
        self.options.format
    }

    /// Builds the entries of one wire call for the records, in order.
    pub fn serialize(&self, records: &[Record]) -> Vec<WireEntry> {
        match self.options.format {
            MessageFormat::Extended => records
                .iter()
                .enumerate()
                .map(|(index, record)| WireEntry {
                    destination: record.destination().to_string(),
                    fields: self.extended_fields(record),
                    sources: vec![index],
                })
                .collect(),
            MessageFormat::Compact => self.serialize_compact(records),
        }
    }

    fn serialize_compact(&self, records: &[Record]) -> Vec<WireEntry> {
        let mut entries: Vec<WireEntry> = Vec::with_capacity(records.len());
        let mut by_key: HashMap<(String, String), usize> = HashMap::new();

        for (index, record) in records.iter().enumerate() {
            let key = self.key(record);
            let value = self.value(record);
            let destination = record.destination().to_string();

            match by_key.get(&(destination.clone(), key.clone())) {
                Some(&position) => {
                    let entry = &mut entries[position];
                    entry.fields = vec![(key, value)];
                    entry.sources.push(index);
                }
                None => {
                    by_key.insert((destination.clone(), key.clone()), entries.len());
                    entries.push(WireEntry {
                        destination,
                        fields: vec![(key, value)],
                        sources: vec![index],
                    });
                }
            }
        }

        entries
    }

    fn extended_fields(&self, record: &Record) -> Vec<(String, String)> {
        let mut fields = Vec::with_capacity(2 + record.headers().len());
        fields.push((EXTENDED_KEY_FIELD.to_string(), self.key(record)));
        fields.push((EXTENDED_VALUE_FIELD.to_string(), self.value(record)));
        for (name, value) in record.headers() {
            fields.push((name.to_uppercase(), value.clone()));
        }
        fields
    }

    fn key(&self, record: &Record) -> String {
        record
            .key_str()
            .unwrap_or_else(|| self.options.null_key.clone())
    }

    fn value(&self, record: &Record) -> String {
        record
            .value_str()
            .unwrap_or_else(|| self.options.null_value.clone())
    }
}

impl WireEntry {
    /// Indices, in the serialized slice, of the records covered by this entry.
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Returns the value of the first field with the given name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Approximate size in bytes of the destination and all fields.
    pub fn approximate_size(&self) -> u64 {
        let fields = self
            .fields
            .iter()
            .fold(0, |acc, (name, value)| acc + name.len() + value.len());
        (self.destination.len() + fields) as u64
    }
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            format: MessageFormat::default(),
            null_key: DEFAULT_NULL_LITERAL.to_string(),
            null_value: DEFAULT_NULL_LITERAL.to_string(),
        }
    }
}

impl SerializerOptions {
    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_null_key(mut self, null_key: impl Into<String>) -> Self {
        self.null_key = null_key.into();
        self
    }

    pub fn with_null_value(mut self, null_value: impl Into<String>) -> Self {
        self.null_value = null_value.into();
        self
    }
}

impl FromStr for MessageFormat {
    type Err = MessageFormatParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "extended" => Ok(Self::Extended),
            _ => MessageFormatParseSnafu { value }.fail(),
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compact => write!(f, "compact"),
            Self::Extended => write!(f, "extended"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serializer(format: MessageFormat) -> RecordSerializer {
        RecordSerializer::new(SerializerOptions::default().with_format(format))
    }

    #[test]
    fn test_compact_collapses_same_key_to_later_value() {
        let records = vec![
            Record::new("orders").with_key("1").with_value("first"),
            Record::new("orders").with_key("2").with_value("other"),
            Record::new("orders").with_key("1").with_value("second"),
        ];

        let entries = serializer(MessageFormat::Compact).serialize(&records);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field("1"), Some("second"));
        assert_eq!(entries[0].fields.len(), 1);
        assert_eq!(entries[0].sources(), &[0, 2]);
        assert_eq!(entries[1].field("2"), Some("other"));
        assert_eq!(entries[1].sources(), &[1]);
    }

    #[test]
    fn test_compact_keeps_same_key_on_different_destinations() {
        let records = vec![
            Record::new("orders").with_key("1").with_value("a"),
            Record::new("customers").with_key("1").with_value("b"),
        ];

        let entries = serializer(MessageFormat::Compact).serialize(&records);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_extended_preserves_entries_and_headers() {
        let records = vec![
            Record::new("orders")
                .with_key("1")
                .with_value("first")
                .with_header("op", "c")
                .with_header("source_ts", "10"),
            Record::new("orders")
                .with_key("1")
                .with_value("second")
                .with_header("op", "u"),
        ];

        let entries = serializer(MessageFormat::Extended).serialize(&records);

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].fields,
            vec![
                ("key".to_string(), "1".to_string()),
                ("value".to_string(), "first".to_string()),
                ("OP".to_string(), "c".to_string()),
                ("SOURCE_TS".to_string(), "10".to_string()),
            ]
        );
        assert_eq!(entries[1].field("value"), Some("second"));
        assert_eq!(entries[1].field("OP"), Some("u"));
    }

    #[test]
    fn test_null_key_and_value_use_literals() {
        let serializer = RecordSerializer::new(
            SerializerOptions::default()
                .with_format(MessageFormat::Extended)
                .with_null_key("<none>")
                .with_null_value("<tombstone>"),
        );

        let entries = serializer.serialize(&[Record::new("orders")]);
        assert_eq!(entries[0].field("key"), Some("<none>"));
        assert_eq!(entries[0].field("value"), Some("<tombstone>"));
    }

    #[test]
    fn test_approximate_size() {
        let entries = serializer(MessageFormat::Compact)
            .serialize(&[Record::new("abc").with_key("k").with_value("vv")]);
        assert_eq!(entries[0].approximate_size(), 3 + 1 + 2);
    }

    #[test]
    fn test_parse_message_format() {
        assert_eq!("compact".parse::<MessageFormat>().ok(), Some(MessageFormat::Compact));
        assert_eq!(
            "EXTENDED".parse::<MessageFormat>().ok(),
            Some(MessageFormat::Extended)
        );
        assert!("json".parse::<MessageFormat>().is_err());
    }
}
