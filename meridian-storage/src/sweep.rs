//! Eviction Sweep Background Task
//!
//! Optional driver for hosts that have no scheduler of their own. It
//! calls [`CacheRegistry::evict_all`] on a fixed interval until told to
//! stop. The caches never spawn this themselves.
//!
//! # Configuration
//!
//! ```rust
//! use meridian_core::SweepConfig;
//! use std::time::Duration;
//!
//! let config = SweepConfig::default().with_interval(Duration::from_secs(30));
//! assert!(config.validate().is_ok());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use meridian_core::SweepConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{CacheRegistry, SweepReport};

// ============================================================================
// METRICS
// ============================================================================

/// Counters accumulated over the task's lifetime.
#[derive(Debug, Default)]
pub struct SweepMetrics {
    /// Sweep cycles completed
    pub cycles: AtomicU64,

    /// Memory entries evicted
    pub evicted: AtomicU64,

    /// Whole histories evicted
    pub histories_evicted: AtomicU64,

    /// Evicted entries written to a durable tier
    pub persisted: AtomicU64,

    /// Durable rows deleted by cleanup
    pub durable_deleted: AtomicU64,

    /// Backend failures plus cycles that panicked
    pub failures: AtomicU64,
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &SweepReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.evicted.fetch_add(report.evicted, Ordering::Relaxed);
        self.histories_evicted
            .fetch_add(report.histories_evicted, Ordering::Relaxed);
        self.persisted.fetch_add(report.persisted, Ordering::Relaxed);
        self.durable_deleted
            .fetch_add(report.durable_deleted, Ordering::Relaxed);
        self.failures
            .fetch_add(report.backend_failures, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SweepSnapshot {
        SweepSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            histories_evicted: self.histories_evicted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            durable_deleted: self.durable_deleted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweep metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSnapshot {
    pub cycles: u64,
    pub evicted: u64,
    pub histories_evicted: u64,
    pub persisted: u64,
    pub durable_deleted: u64,
    pub failures: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Run `evict_all` every `config.interval` until `shutdown_rx` turns
/// `true` or its sender is dropped.
///
/// Each sweep runs on the blocking pool because durable cleanup does
/// synchronous I/O. An invalid `config` is logged and the task returns at
/// once with empty metrics.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(eviction_sweep_task(registry.clone(), SweepConfig::from_env(), shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn eviction_sweep_task(
    registry: Arc<CacheRegistry>,
    config: SweepConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweepMetrics> {
    let metrics = Arc::new(SweepMetrics::new());

    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Eviction sweep task not started");
        return metrics;
    }

    let mut sweep_interval = interval(config.interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Eviction sweep task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Eviction sweep task shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                run_sweep(&registry, &config, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        evicted = snapshot.evicted,
        persisted = snapshot.persisted,
        durable_deleted = snapshot.durable_deleted,
        failures = snapshot.failures,
        "Eviction sweep task completed"
    );

    metrics
}

async fn run_sweep(registry: &Arc<CacheRegistry>, config: &SweepConfig, metrics: &SweepMetrics) {
    let registry = Arc::clone(registry);
    match tokio::task::spawn_blocking(move || registry.evict_all()).await {
        Ok(report) => {
            metrics.record(&report);
            if report.is_empty() && config.log_empty_cycles {
                tracing::debug!(caches = report.caches, "Eviction sweep found nothing to evict");
            } else if report.is_empty() {
                tracing::trace!("Eviction sweep cycle completed with nothing to evict");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Eviction sweep cycle failed");
            metrics.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ItemCache;
    use meridian_core::{CacheLimits, Point};
    use meridian_test_utils::fixtures::point_at;
    use std::time::Duration;

    #[test]
    fn test_metrics_snapshot() {
        let metrics = SweepMetrics::new();
        metrics.record(&SweepReport {
            caches: 2,
            evicted: 5,
            histories_evicted: 1,
            persisted: 3,
            durable_deleted: 4,
            backend_failures: 2,
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles, 1);
        assert_eq!(snapshot.evicted, 5);
        assert_eq!(snapshot.histories_evicted, 1);
        assert_eq!(snapshot.persisted, 3);
        assert_eq!(snapshot.durable_deleted, 4);
        assert_eq!(snapshot.failures, 2);
    }

    #[tokio::test]
    async fn test_task_sweeps_and_shuts_down() {
        let registry = Arc::new(CacheRegistry::new());
        let cache = registry
            .register(ItemCache::<Point>::new("points", CacheLimits::default()))
            .unwrap();
        cache.put(point_at(1, 1, 0.0, 0.0));
        cache.put(point_at(2, 1, 0.0, 0.0));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = SweepConfig::default().with_interval(Duration::from_millis(10));
        let handle = tokio::spawn(eviction_sweep_task(registry.clone(), config, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        let snapshot = metrics.snapshot();
        assert!(snapshot.cycles >= 1);
        assert_eq!(snapshot.evicted, 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_interval_returns_without_sweeping() {
        let registry = Arc::new(CacheRegistry::new());
        let cache = registry
            .register(ItemCache::<Point>::new("points", CacheLimits::default()))
            .unwrap();
        cache.put(point_at(1, 1, 0.0, 0.0));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(eviction_sweep_task(
            registry,
            SweepConfig::default().with_interval(Duration::ZERO),
            shutdown_rx,
        ));

        let metrics = handle.await.unwrap();
        assert_eq!(metrics.snapshot().cycles, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_task_stops_when_sender_dropped() {
        let registry = Arc::new(CacheRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(eviction_sweep_task(
            registry,
            SweepConfig::default().with_interval(Duration::from_secs(3600)),
            shutdown_rx,
        ));

        drop(shutdown_tx);
        let metrics = handle.await.unwrap();
        assert!(metrics.snapshot().cycles <= 1);
    }
}
