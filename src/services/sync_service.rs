use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::Metrics;
use crate::utils::RunScope;
use super::CacheService;

// ============================================================================
// Reconciliation
// ============================================================================
//
// Each run clears every order key, then streams the whole store back into
// the cache. Between the two steps readers may miss the cache and fall back
// to the store.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub deleted: usize,
    pub cached: usize,
}

pub struct SyncService {
    cache_service: Arc<CacheService>,
    interval: Duration,
    timeout: Duration,
    batch_size: usize,
    metrics: Arc<Metrics>,
}

impl SyncService {
    pub fn new(cache_service: Arc<CacheService>, config: &SyncConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            cache_service,
            interval: config.interval(),
            timeout: config.timeout(),
            batch_size: config.batch_size.max(1),
            metrics,
        }
    }

    /// One reconciliation run, bounded by the configured per-run timeout
    pub async fn sync_data(&self, scope: &RunScope) -> Result<SyncReport, SyncError> {
        let scope = scope.with_timeout(self.timeout);
        let started = Instant::now();

        let result = self.run_once(&scope).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) if e.is_interrupted() => "interrupted",
            Err(_) => "failed",
        };
        self.metrics.record_sync_run(outcome, started.elapsed().as_secs_f64());
        self.metrics
            .update_circuit_breaker_state(self.cache_service.cache().circuit_state().await);

        result
    }

    async fn run_once(&self, scope: &RunScope) -> Result<SyncReport, SyncError> {
        let deleted = match self.cache_service.clear_old_data(scope).await {
            Ok(deleted) => deleted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to clear old cache entries, repopulating anyway");
                0
            }
        };

        let cached = self.cache_service.reload(scope, self.batch_size).await?;

        Ok(SyncReport { deleted, cached })
    }

    /// Run `sync_data` every interval until `shutdown` fires. Failed runs
    /// are logged and the next tick proceeds as usual.
    pub async fn run_periodic(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately; warm-up has just run
        ticker.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "🔄 Periodic sync started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let scope = RunScope::new(shutdown.child_token());
            let started = Instant::now();

            match self.sync_data(&scope).await {
                Ok(report) => {
                    tracing::info!(
                        deleted = report.deleted,
                        cached = report.cached,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Cache reconciled with store"
                    );
                }
                Err(e) if e.is_interrupted() && shutdown.is_cancelled() => break,
                Err(e) => {
                    tracing::error!(error = %e, "Cache reconciliation failed");
                }
            }
        }

        tracing::info!("🛑 Periodic sync stopped");
    }
}
