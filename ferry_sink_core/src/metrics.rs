use ferry_observability::Counter;

pub struct DispatchMetrics {
    pub acknowledged_records: Counter<u64>,
    pub retried_records: Counter<u64>,
    pub flushed_batches: Counter<u64>,
    pub reconnects: Counter<u64>,
    pub backpressure_waits: Counter<u64>,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        let meter = ferry_observability::meter("sink");
        Self {
            acknowledged_records: meter
                .u64_counter("sink.records.acknowledged")
                .with_unit("{record}")
                .with_description("records acknowledged by the store")
                .build(),
            retried_records: meter
                .u64_counter("sink.records.retried")
                .with_unit("{record}")
                .with_description("records left pending after a send attempt")
                .build(),
            flushed_batches: meter
                .u64_counter("sink.batches.flushed")
                .with_unit("{batch}")
                .with_description("partition batches sent to the store")
                .build(),
            reconnects: meter
                .u64_counter("sink.reconnects")
                .with_unit("{connection}")
                .with_description("connections re-established after a connection loss")
                .build(),
            backpressure_waits: meter
                .u64_counter("sink.backpressure.waits")
                .with_unit("{wait}")
                .with_description("waits caused by a backpressure denial")
                .build(),
        }
    }
}
