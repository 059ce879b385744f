//! Backpressure checks performed before every send attempt.
use std::sync::Arc;

use async_trait::async_trait;
use bytesize::ByteSize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::store::StoreError;

/// Answers whether sending more data risks exceeding the store's capacity.
#[async_trait]
pub trait BackpressureOracle: Send + Sync {
    /// Returns `true` if `item_count` items of about `estimated_bytes` each can be sent.
    async fn check_capacity(
        &self,
        estimated_bytes: u64,
        item_count: usize,
        fill_rate_threshold: u64,
    ) -> bool;
}

/// An oracle that always allows sending.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackpressure;

/// Memory usage reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    /// Memory currently used.
    pub used_bytes: u64,
    /// Memory ceiling configured on the store. `0` means unlimited.
    pub max_bytes: u64,
}

/// Source of memory statistics, usually the store itself.
#[async_trait]
pub trait MemoryStatsSource: Send + Sync {
    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError>;
}

/// Denies sends that would push the store's memory above a limit.
///
/// Probing the store on every call is expensive, so the oracle probes once
/// and then accounts the bytes it allowed locally, probing again after
/// `fill_rate_threshold` items or after a denial.
pub struct MemoryThresholdOracle {
    source: Arc<dyn MemoryStatsSource>,
    memory_limit: ByteSize,
    state: Mutex<ThresholdState>,
}

#[derive(Debug, Default)]
struct ThresholdState {
    last_usage: Option<MemoryUsage>,
    accounted_bytes: u64,
    accounted_items: u64,
}

#[async_trait]
impl BackpressureOracle for NoBackpressure {
    async fn check_capacity(&self, _: u64, _: usize, _: u64) -> bool {
        true
    }
}

impl MemoryThresholdOracle {
    /// Creates a new oracle.
    ///
    /// A zero `memory_limit` uses the ceiling reported by the store.
    pub fn new(source: Arc<dyn MemoryStatsSource>, memory_limit: ByteSize) -> Self {
        Self {
            source,
            memory_limit,
            state: Mutex::new(ThresholdState::default()),
        }
    }
}

#[async_trait]
impl BackpressureOracle for MemoryThresholdOracle {
    async fn check_capacity(
        &self,
        estimated_bytes: u64,
        item_count: usize,
        fill_rate_threshold: u64,
    ) -> bool {
        let mut state = self.state.lock().await;

        if state.last_usage.is_none() || state.accounted_items >= fill_rate_threshold {
            match self.source.memory_usage().await {
                Ok(usage) => {
                    debug!(
                        used = usage.used_bytes,
                        max = usage.max_bytes,
                        "probed store memory"
                    );
                    state.last_usage = Some(usage);
                    state.accounted_bytes = 0;
                    state.accounted_items = 0;
                }
                Err(err) => {
                    // The send itself will surface connection problems.
                    warn!(err = ?err, "failed to probe store memory");
                    return true;
                }
            }
        }

        let Some(usage) = state.last_usage else {
            return true;
        };

        let limit = if self.memory_limit.as_u64() > 0 {
            self.memory_limit.as_u64()
        } else {
            usage.max_bytes
        };

        if limit == 0 {
            return true;
        }

        let required = estimated_bytes.saturating_mul(item_count as u64);
        let projected = usage
            .used_bytes
            .saturating_add(state.accounted_bytes)
            .saturating_add(required);

        if projected > limit {
            info!(
                projected = %ByteSize(projected),
                limit = %ByteSize(limit),
                "store memory limit reached, pausing consumption"
            );
            state.last_usage = None;
            return false;
        }

        state.accounted_bytes += required;
        state.accounted_items += item_count as u64;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use super::*;

    struct FixedStats {
        used: AtomicU64,
        max: u64,
        probes: AtomicUsize,
    }

    impl FixedStats {
        fn new(used: u64, max: u64) -> Arc<Self> {
            Arc::new(Self {
                used: AtomicU64::new(used),
                max,
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MemoryStatsSource for FixedStats {
        async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(MemoryUsage {
                used_bytes: self.used.load(Ordering::SeqCst),
                max_bytes: self.max,
            })
        }
    }

    struct FailingStats;

    #[async_trait]
    impl MemoryStatsSource for FailingStats {
        async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
            Err(StoreError::Connection {
                message: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_no_backpressure_always_allows() {
        assert!(NoBackpressure.check_capacity(u64::MAX, usize::MAX, 0).await);
    }

    #[tokio::test]
    async fn test_denies_above_store_max() {
        let stats = FixedStats::new(900, 1000);
        let oracle = MemoryThresholdOracle::new(stats.clone(), ByteSize::b(0));

        assert!(oracle.check_capacity(10, 5, 100).await);
        assert!(!oracle.check_capacity(10, 10, 100).await);
    }

    #[tokio::test]
    async fn test_configured_limit_overrides_store_max() {
        let stats = FixedStats::new(500, 0);
        let oracle = MemoryThresholdOracle::new(stats, ByteSize::b(600));

        assert!(!oracle.check_capacity(50, 3, 100).await);
        assert!(oracle.check_capacity(50, 2, 100).await);
    }

    #[tokio::test]
    async fn test_unlimited_when_no_limit_known() {
        let stats = FixedStats::new(u64::MAX / 2, 0);
        let oracle = MemoryThresholdOracle::new(stats, ByteSize::b(0));
        assert!(oracle.check_capacity(1_000_000, 1_000, 10).await);
    }

    #[tokio::test]
    async fn test_reprobes_after_fill_rate_threshold() {
        let stats = FixedStats::new(0, 1_000_000);
        let oracle = MemoryThresholdOracle::new(stats.clone(), ByteSize::b(0));

        assert!(oracle.check_capacity(1, 3, 5).await);
        assert!(oracle.check_capacity(1, 3, 5).await);
        assert_eq!(stats.probes.load(Ordering::SeqCst), 1);

        // 6 items accounted, above the threshold of 5.
        assert!(oracle.check_capacity(1, 3, 5).await);
        assert_eq!(stats.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reprobes_after_denial() {
        let stats = FixedStats::new(990, 1000);
        let oracle = MemoryThresholdOracle::new(stats.clone(), ByteSize::b(0));

        assert!(!oracle.check_capacity(100, 1, 1_000).await);
        stats.used.store(100, Ordering::SeqCst);
        assert!(oracle.check_capacity(100, 1, 1_000).await);
        assert_eq!(stats.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_allows_when_probe_fails() {
        let oracle = MemoryThresholdOracle::new(Arc::new(FailingStats), ByteSize::b(1));
        assert!(oracle.check_capacity(100, 100, 10).await);
    }
}
