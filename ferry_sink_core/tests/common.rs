use std::{sync::Arc, time::Duration};

use ferry_sink_core::{Dispatcher, DispatcherOptions, Record, memory::InMemoryStore};
use tokio_util::sync::CancellationToken;

pub fn create_dispatcher(
    store: &InMemoryStore,
    options: DispatcherOptions,
) -> (Dispatcher, CancellationToken) {
    let ct = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        options
            .with_retry_delays(initial_retry_delay(), max_retry_delay())
            .with_backpressure_delay(Duration::from_secs(1)),
        Arc::new(store.clone()),
        ct.clone(),
    );

    (dispatcher, ct)
}

pub fn initial_retry_delay() -> Duration {
    Duration::from_millis(100)
}

pub fn max_retry_delay() -> Duration {
    Duration::from_millis(400)
}

pub fn keyed_records(destination: &str, count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(destination)
                .with_key(i.to_string())
                .with_value(format!("value-{i}"))
        })
        .collect()
}

pub fn record_of_size(destination: &str, size: usize) -> Record {
    Record::new(destination).with_value("x".repeat(size))
}

pub fn keys(records: &[Record]) -> Vec<String> {
    records.iter().filter_map(Record::key_str).collect()
}
