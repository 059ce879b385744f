use std::time::Duration;

use crate::record::Record;

use super::backoff::ExponentialBackoff;

/// Retry state of one in-flight chunk.
#[derive(Debug)]
pub struct RetryState {
    pending: Vec<Record>,
    backoff: ExponentialBackoff,
}

impl RetryState {
    pub fn new(chunk: Vec<Record>, backoff: ExponentialBackoff) -> Self {
        Self {
            pending: chunk,
            backoff,
        }
    }

    /// Records not acknowledged yet, in their original order.
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes and returns the records whose destination starts with `prefix`.
    ///
    /// An empty prefix matches nothing.
    pub fn take_heartbeats(&mut self, prefix: &str) -> Vec<Record> {
        if prefix.is_empty() {
            return Vec::new();
        }

        let (heartbeats, pending) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|record| record.destination().starts_with(prefix));
        self.pending = pending;
        heartbeats
    }

    /// Removes and returns the records at `indices`, in the order given.
    ///
    /// Out of range or repeated indices are ignored.
    pub fn take_accepted(&mut self, indices: &[usize]) -> Vec<Record> {
        let mut slots: Vec<Option<Record>> =
            std::mem::take(&mut self.pending).into_iter().map(Some).collect();

        let accepted = indices
            .iter()
            .filter_map(|&index| slots.get_mut(index).and_then(Option::take))
            .collect();

        self.pending = slots.into_iter().flatten().collect();
        accepted
    }

    /// Removes and returns every pending record.
    pub fn take_all(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.pending)
    }

    pub fn next_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::keyed_records;

    fn state(records: Vec<Record>) -> RetryState {
        RetryState::new(
            records,
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_millis(100)),
        )
    }

    #[test]
    fn test_take_accepted_keeps_remaining_order() {
        let mut state = state(keyed_records("t", 5));

        let accepted = state.take_accepted(&[3, 1, 3, 9]);
        let accepted: Vec<_> = accepted.iter().filter_map(Record::key_str).collect();
        assert_eq!(accepted, vec!["3", "1"]);

        let pending: Vec<_> = state.pending().iter().filter_map(Record::key_str).collect();
        assert_eq!(pending, vec!["0", "2", "4"]);
    }

    #[test]
    fn test_take_heartbeats() {
        let mut records = keyed_records("t", 2);
        records.insert(1, Record::new("__debezium-heartbeat.server1"));
        let mut state = state(records);

        let heartbeats = state.take_heartbeats("__debezium-heartbeat");
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(state.len(), 2);

        assert!(state.take_heartbeats("").is_empty());
        assert_eq!(state.len(), 2);
    }
}
