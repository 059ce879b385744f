use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use clap::Args;
use ferry_sink_core::{
    DispatchMode, Dispatcher, HandleBatchSummary, Record,
    memory::{InMemoryCommitter, InMemoryStore},
};
use serde::Deserialize;
use snafu::ResultExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    args::{SinkArgs, StoreArgs},
    error::{DispatchSnafu, IoSnafu, JsonParseSnafu, Result},
};

/// Replay newline-delimited JSON records through the sink.
///
/// Each line is an object such as
/// `{"destination": "inventory.orders", "key": {"id": 1}, "value": {...}, "headers": {"op": "c"}}`.
/// String keys and values are sent as is, other JSON values as their JSON text.
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// File to read records from, `-` for stdin.
    input: String,
    /// Records handed to the sink per batch, like one poll of the capture engine.
    #[arg(long, env = "FERRY_RECORDS_PER_BATCH", default_value_t = 2_048)]
    records_per_batch: usize,
    #[clap(flatten)]
    sink: SinkArgs,
    #[clap(flatten)]
    store: StoreArgs,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonRecord {
    destination: String,
    #[serde(default)]
    key: Option<serde_json::Value>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    headers: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    partition: Option<String>,
}

impl ReplayArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let options = self.sink.dispatcher_options()?;
        let mode = options.mode;
        let store = self.store.store();
        let committer = InMemoryCommitter::new();

        let backpressure = self.sink.backpressure(&store, self.store.max_memory());
        let mut dispatcher = Dispatcher::new(options, Arc::new(store.clone()), ct.clone())
            .with_backpressure(backpressure);
        dispatcher.connect().await.context(DispatchSnafu {})?;

        let mut lines = self.open().await?.lines();
        let mut total = HandleBatchSummary::default();
        let mut batches = 0;
        let mut line_number = 0;
        let mut pending = Vec::with_capacity(self.records_per_batch);

        loop {
            let line = lines.next_line().await.context(IoSnafu {
                path: self.input.clone(),
            })?;
            let Some(line) = line else {
                break;
            };
            line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            pending.push(parse_record(&line, line_number)?);
            if pending.len() >= self.records_per_batch.max(1) {
                let summary = dispatcher
                    .handle_batch(std::mem::take(&mut pending), &committer)
                    .await
                    .context(DispatchSnafu {})?;
                accumulate(&mut total, &summary);
                batches += 1;
            }

            if ct.is_cancelled() {
                info!("replay cancelled");
                break;
            }
        }

        if !pending.is_empty() && !ct.is_cancelled() {
            let summary = dispatcher
                .handle_batch(pending, &committer)
                .await
                .context(DispatchSnafu {})?;
            accumulate(&mut total, &summary);
            batches += 1;
        }

        dispatcher
            .shutdown(&committer)
            .await
            .context(DispatchSnafu {})?;

        print_report(&store, mode, &total, batches, &committer).await;
        Ok(())
    }

    async fn open(&self) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
        if self.input == "-" {
            return Ok(Box::new(BufReader::new(tokio::io::stdin())));
        }

        let file = tokio::fs::File::open(&self.input)
            .await
            .context(IoSnafu {
                path: self.input.clone(),
            })?;
        debug!(path = %self.input, "replaying records from file");
        Ok(Box::new(BufReader::new(file)))
    }
}

fn parse_record(line: &str, line_number: usize) -> Result<Record> {
    let parsed: JsonRecord =
        serde_json::from_str(line).context(JsonParseSnafu { line: line_number })?;
    Ok(parsed.into_record())
}

impl JsonRecord {
    fn into_record(self) -> Record {
        let mut record = Record::new(self.destination);
        if let Some(key) = self.key.and_then(payload) {
            record = record.with_key(key);
        }
        if let Some(value) = self.value.and_then(payload) {
            record = record.with_value(value);
        }
        for (name, value) in self.headers {
            record = record.with_header(name, header_text(value));
        }
        if let Some(partition) = self.partition {
            record = record.with_partition(partition);
        }
        record
    }
}

fn payload(value: serde_json::Value) -> Option<Bytes> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(text) => Some(Bytes::from(text)),
        other => Some(Bytes::from(other.to_string())),
    }
}

/// Header values are strings, anything else keeps its JSON text.
fn header_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

fn accumulate(total: &mut HandleBatchSummary, summary: &HandleBatchSummary) {
    total.records += summary.records;
    total.acknowledged += summary.acknowledged;
    total.heartbeats_skipped += summary.heartbeats_skipped;
    total.chunks += summary.chunks;
    total.send_attempts += summary.send_attempts;
    total.retries += summary.retries;
    total.reconnects += summary.reconnects;
    total.backpressure_waits += summary.backpressure_waits;
    total.total_backoff += summary.total_backoff;
}

async fn print_report(
    store: &InMemoryStore,
    mode: DispatchMode,
    total: &HandleBatchSummary,
    batches: usize,
    committer: &InMemoryCommitter,
) {
    println!(
        "Replayed {} records in {} batches ({} acknowledged, {} heartbeats skipped)",
        total.records, batches, total.acknowledged, total.heartbeats_skipped
    );
    println!(
        "Send attempts: {}, retries: {}, reconnects: {}, backpressure waits: {}",
        total.send_attempts, total.retries, total.reconnects, total.backpressure_waits
    );
    println!(
        "Committed: {} records, {} batches finished",
        committer.processed_count().await,
        committer.batches_finished().await
    );

    match mode {
        DispatchMode::Stream => {
            for destination in store.destinations().await {
                let entries = store.entries(&destination).await;
                println!("  {destination}: {} entries", entries.len());
            }
        }
        DispatchMode::Partitioned => {
            let mut by_target = BTreeMap::<String, (usize, usize)>::new();
            for batch in store.partition_batches().await {
                let target = batch
                    .options
                    .partition_id
                    .map(|id| format!("partition {id}"))
                    .or_else(|| batch.options.partition_key.map(|key| format!("key {key}")))
                    .unwrap_or_else(|| "unassigned".to_string());
                let counts = by_target.entry(target).or_default();
                counts.0 += 1;
                counts.1 += batch.records.len();
            }

            for (target, (batches, records)) in by_target {
                println!("  {target}: {batches} batches, {records} records");
            }
        }
    }
}
