use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    commit::{CommitError, RecordCommitter},
    record::Record,
};

/// A committer that remembers every call it receives.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommitter {
    state: Arc<Mutex<CommitterState>>,
}

#[derive(Debug, Default)]
struct CommitterState {
    processed: Vec<Record>,
    batches_finished: usize,
    /// Reject marks once this many records were processed.
    fail_after: Option<usize>,
}

impl InMemoryCommitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every `mark_processed` call after `count` successful ones.
    pub async fn fail_after(&self, count: usize) {
        self.state.lock().await.fail_after = Some(count);
    }

    /// Records marked as processed, in call order.
    pub async fn processed(&self) -> Vec<Record> {
        self.state.lock().await.processed.clone()
    }

    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }

    pub async fn batches_finished(&self) -> usize {
        self.state.lock().await.batches_finished
    }
}

#[async_trait]
impl RecordCommitter for InMemoryCommitter {
    async fn mark_processed(&self, record: &Record) -> Result<(), CommitError> {
        let mut state = self.state.lock().await;
        if state
            .fail_after
            .is_some_and(|limit| state.processed.len() >= limit)
        {
            return Err(CommitError::Rejected {
                message: "offset store unavailable".to_string(),
            });
        }

        state.processed.push(record.clone());
        Ok(())
    }

    async fn mark_batch_finished(&self) -> Result<(), CommitError> {
        self.state.lock().await.batches_finished += 1;
        Ok(())
    }
}
