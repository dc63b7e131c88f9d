// ============================================================================
// Store Gateway
// ============================================================================
//
// The relational store is the system of record. `OrderStore` is the seam the
// consumer, warm-up, reconciliation and read services call through;
// `PgOrderStore` is the Postgres implementation.
//
// ============================================================================

mod postgres;

pub use postgres::PgOrderStore;

use async_trait::async_trait;
use std::future::Future;

use crate::error::StoreError;
use crate::models::Order;
use crate::utils::RunScope;

#[async_trait]
pub trait OrderStore: Send + Sync + 'static {
    /// Atomically upsert a full order (delivery, payment, order row, items).
    /// Writing the same `order_uid` again replaces the previous record.
    async fn add_order(&self, order: &Order) -> Result<(), StoreError>;

    /// Read one order with its nested records; `StoreError::NotFound` if absent
    async fn get_order_by_id(&self, id: &str) -> Result<Order, StoreError>;

    async fn count_orders(&self) -> Result<i64, StoreError>;

    /// One page ordered by `order_uid`, items included
    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<Order>, StoreError>;
}

/// Scan every order `batch_size` rows at a time and hand each page to
/// `process_batch`, in order, one page at a time.
///
/// The row count is taken once up front and paging is by offset, so rows
/// written or deleted during the scan can be missed or seen twice. Good
/// enough for cache reconciliation, which heals on the next run; not for
/// exports that need a consistent snapshot.
///
/// Cancellation is checked right before each callback and every store call
/// is bounded by `scope`. An empty page while rows remain by the initial
/// count is a hard error. Returns the number of orders handed out.
pub async fn get_orders_batch<S, F, Fut, E>(
    store: &S,
    scope: &RunScope,
    batch_size: usize,
    mut process_batch: F,
) -> Result<usize, E>
where
    S: OrderStore + ?Sized,
    F: FnMut(Vec<Order>) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: From<StoreError>,
{
    let limit = batch_size.max(1) as i64;
    let total = scope.run(store.count_orders()).await.map_err(StoreError::from)??;

    tracing::debug!(total = total, batch_size = limit, "Starting batch scan");

    let mut offset = 0i64;
    let mut handed_out = 0usize;

    while offset < total {
        let page = scope
            .run(store.fetch_page(limit, offset))
            .await
            .map_err(StoreError::from)??;

        if page.is_empty() {
            return Err(StoreError::InconsistentPage { offset, total }.into());
        }

        scope.check().map_err(StoreError::from)?;

        let page_len = page.len();
        tracing::debug!(offset = offset, rows = page_len, "Processing batch");
        process_batch(page).await?;

        handed_out += page_len;
        offset += limit;
    }

    Ok(handed_out)
}
