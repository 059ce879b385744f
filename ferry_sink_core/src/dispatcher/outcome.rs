use crate::{
    error::DispatchError,
    serialize::WireEntry,
    store::{ItemOutcome, StoreError},
};

/// Result of one delivery attempt of a chunk.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Every pending record was acknowledged.
    FullyAcknowledged,
    /// Only the records at these pending indices were acknowledged, in store response order.
    PartiallyAcknowledged(Vec<usize>),
    /// The store had no room for any of the `count` records.
    CapacityExceeded(usize),
    ConnectionLost(StoreError),
    Fatal(DispatchError),
}

impl DeliveryOutcome {
    /// Classifies the reply of a wire call carrying `entries`.
    pub fn classify(
        entries: &[WireEntry],
        reply: Result<Vec<ItemOutcome>, StoreError>,
    ) -> Self {
        let outcomes = match reply {
            Ok(outcomes) => outcomes,
            Err(source) if source.is_connection() => return Self::ConnectionLost(source),
            Err(source) => {
                return Self::Fatal(DispatchError::from_store("failed to send batch", source));
            }
        };

        if outcomes.len() != entries.len() {
            return Self::Fatal(DispatchError::OutcomeMismatch {
                expected: entries.len(),
                actual: outcomes.len(),
            });
        }

        let total: usize = entries.iter().map(|entry| entry.sources().len()).sum();
        let accepted: Vec<usize> = entries
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| **outcome == ItemOutcome::Accepted)
            .flat_map(|(entry, _)| entry.sources().iter().copied())
            .collect();

        if accepted.len() == total {
            Self::FullyAcknowledged
        } else if accepted.is_empty() {
            Self::CapacityExceeded(total)
        } else {
            Self::PartiallyAcknowledged(accepted)
        }
    }
}

/// Pending indices covered by `entries`, in response order.
pub fn response_order(entries: &[WireEntry]) -> Vec<usize> {
    entries
        .iter()
        .flat_map(|entry| entry.sources().iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::Record,
        serialize::{RecordSerializer, SerializerOptions},
    };

    fn entries(keys: &[&'static str]) -> Vec<WireEntry> {
        let records: Vec<_> = keys
            .iter()
            .map(|key| Record::new("orders").with_key(*key).with_value("v"))
            .collect();
        RecordSerializer::new(SerializerOptions::default()).serialize(&records)
    }

    #[test]
    fn test_all_accepted() {
        let entries = entries(&["a", "b"]);
        let outcome =
            DeliveryOutcome::classify(&entries, Ok(vec![ItemOutcome::Accepted; 2]));
        assert!(matches!(outcome, DeliveryOutcome::FullyAcknowledged));
    }

    #[test]
    fn test_partial_acceptance_lists_covered_records() {
        // "a" collapses records 0 and 2 into the first entry.
        let entries = entries(&["a", "b", "a"]);
        let outcome = DeliveryOutcome::classify(
            &entries,
            Ok(vec![ItemOutcome::Accepted, ItemOutcome::CapacityExceeded]),
        );

        match outcome {
            DeliveryOutcome::PartiallyAcknowledged(accepted) => assert_eq!(accepted, vec![0, 2]),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_nothing_accepted() {
        let entries = entries(&["a", "b", "a"]);
        let outcome =
            DeliveryOutcome::classify(&entries, Ok(vec![ItemOutcome::CapacityExceeded; 2]));
        assert!(matches!(outcome, DeliveryOutcome::CapacityExceeded(3)));
    }

    #[test]
    fn test_outcome_count_mismatch_is_fatal() {
        let entries = entries(&["a", "b"]);
        let outcome = DeliveryOutcome::classify(&entries, Ok(vec![ItemOutcome::Accepted]));
        assert!(matches!(
            outcome,
            DeliveryOutcome::Fatal(DispatchError::OutcomeMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_store_errors() {
        let entries = entries(&["a"]);

        let lost = DeliveryOutcome::classify(
            &entries,
            Err(StoreError::Connection {
                message: "reset".to_string(),
            }),
        );
        assert!(matches!(lost, DeliveryOutcome::ConnectionLost(_)));

        let fatal = DeliveryOutcome::classify(
            &entries,
            Err(StoreError::Rejected {
                message: "WRONGTYPE".to_string(),
            }),
        );
        assert!(matches!(
            fatal,
            DeliveryOutcome::Fatal(DispatchError::FatalDelivery { .. })
        ));
    }

    #[test]
    fn test_response_order() {
        let entries = entries(&["a", "b", "a"]);
        assert_eq!(response_order(&entries), vec![0, 2, 1]);
    }
}
