use futures_util::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};

use crate::cache::{CacheKeys, OrderCache};
use crate::config::CacheConfig;
use crate::error::{CacheError, SyncError};
use crate::metrics::Metrics;
use crate::models::Order;
use crate::store::{get_orders_batch, OrderStore};
use crate::utils::RunScope;

// ============================================================================
// Cache Warm-up / Restore
// ============================================================================
//
// Bulk loads go through a bounded job queue drained by a fixed pool of
// workers. Only the first failure is returned to the caller; every failure
// is logged and counted.
//
// ============================================================================

pub struct CacheService {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn OrderCache>,
    keys: CacheKeys,
    workers: usize,
    restore_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl CacheService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache: Arc<dyn OrderCache>,
        keys: CacheKeys,
        config: &CacheConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            workers: config.workers.max(1),
            restore_timeout: config.restore_timeout(),
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<dyn OrderCache> {
        &self.cache
    }

    pub async fn cache_order(&self, order: &Order) -> Result<(), CacheError> {
        let key = self.keys.order_key(&order.order_uid);
        self.cache.set(&key, order).await
    }

    pub async fn get_cached(&self, order_uid: &str) -> Result<Order, CacheError> {
        self.cache.get(&self.keys.order_key(order_uid)).await
    }

    /// Warm the cache from the whole store, bounded by the restore timeout
    pub async fn restore_cache(&self, scope: &RunScope, page_size: usize) -> Result<usize, SyncError> {
        let scope = scope.with_timeout(self.restore_timeout);
        let started = Instant::now();

        tracing::info!(page_size = page_size, workers = self.workers, "Restoring cache from store");

        let cached = self.reload(&scope, page_size).await?;

        tracing::info!(
            cached = cached,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache restored"
        );
        Ok(cached)
    }

    /// Scan the store page by page and load each page into the cache
    pub async fn reload(&self, scope: &RunScope, page_size: usize) -> Result<usize, SyncError> {
        let cached = AtomicUsize::new(0);
        let cached_ref = &cached;

        get_orders_batch(&*self.store, scope, page_size, move |page| async move {
            let loaded = self.load_batch(scope, page).await?;
            cached_ref.fetch_add(loaded, Ordering::Relaxed);
            Ok::<(), SyncError>(())
        })
        .await?;

        Ok(cached.into_inner())
    }

    /// Cache `orders` with the worker pool. Returns the number cached, or
    /// the first failure once every worker has finished.
    ///
    /// On interruption this returns without waiting for the workers; writes
    /// already started may still land.
    pub async fn load_batch(&self, scope: &RunScope, orders: Vec<Order>) -> Result<usize, SyncError> {
        if orders.is_empty() {
            return Ok(0);
        }
        scope.check()?;

        let total = orders.len();
        let (job_tx, job_rx) = mpsc::channel::<Order>(total);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (err_tx, mut err_rx) = mpsc::channel::<SyncError>(total);
        let cached = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers.min(total) {
            let job_rx = job_rx.clone();
            let err_tx = err_tx.clone();
            let cached = cached.clone();
            let cache = self.cache.clone();
            let keys = self.keys.clone();
            let metrics = self.metrics.clone();
            let scope = scope.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = job_rx.lock().await.recv().await;
                    let Some(order) = next else { break };

                    if scope.check().is_err() {
                        break;
                    }

                    let key = keys.order_key(&order.order_uid);
                    match cache.set(&key, &order).await {
                        Ok(()) => {
                            cached.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            tracing::warn!(worker = worker_id, key = %key, error = %e, "Failed to cache order");
                            metrics.record_load_failure();
                            let _ = err_tx.try_send(SyncError::Cache { key, source: e });
                        }
                    }
                }
            }));
        }
        drop(err_tx);

        for order in orders {
            tokio::select! {
                biased;
                reason = scope.interrupted() => return Err(reason.into()),
                sent = job_tx.send(order) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(job_tx);

        tokio::select! {
            biased;
            reason = scope.interrupted() => return Err(reason.into()),
            _ = join_all(handles) => {}
        }

        let cached = cached.load(Ordering::Relaxed);
        self.metrics.record_orders_cached(cached);

        if let Ok(first) = err_rx.try_recv() {
            tracing::warn!(
                total = total,
                cached = cached,
                failed = total - cached,
                "Batch load finished with failures"
            );
            return Err(first);
        }

        tracing::debug!(cached = cached, "Batch loaded into cache");
        Ok(cached)
    }

    /// Best-effort removal of every order key
    pub async fn clear_old_data(&self, scope: &RunScope) -> Result<usize, CacheError> {
        let deleted = self.cache.delete_by_pattern(scope, &self.keys.pattern()).await?;
        self.metrics.record_keys_deleted(deleted);
        Ok(deleted)
    }
}
