use std::sync::Arc;

use crate::error::StoreError;
use crate::metrics::{source, Metrics};
use crate::models::Order;
use crate::store::OrderStore;
use super::CacheService;

/// Cache-aside reads for the HTTP layer
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache_service: Arc<CacheService>,
    metrics: Arc<Metrics>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>, cache_service: Arc<CacheService>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            cache_service,
            metrics,
        }
    }

    /// Cache first, store on any cache failure; a store hit is written back.
    /// `StoreError::NotFound` is passed through untouched.
    pub async fn get_order_by_id(&self, id: &str) -> Result<Order, StoreError> {
        match self.cache_service.get_cached(id).await {
            Ok(order) => {
                self.metrics.record_read(source::CACHE);
                return Ok(order);
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(order_uid = %id, "Cache miss");
            }
            Err(e) => {
                tracing::warn!(order_uid = %id, error = %e, "Cache read failed, falling back to store");
            }
        }

        match self.store.get_order_by_id(id).await {
            Ok(order) => {
                if let Err(e) = self.cache_service.cache_order(&order).await {
                    tracing::warn!(order_uid = %id, error = %e, "Failed to repopulate cache");
                }
                self.metrics.record_read(source::STORE);
                Ok(order)
            }
            Err(e) if e.is_not_found() => {
                self.metrics.record_read(source::NOT_FOUND);
                Err(e)
            }
            Err(e) => {
                tracing::error!(order_uid = %id, error = %e, "Failed to read order from store");
                self.metrics.record_read(source::ERROR);
                Err(e)
            }
        }
    }
}
