mod cache_service;
mod order_service;
mod sync_service;

pub use cache_service::CacheService;
pub use order_service::OrderService;
pub use sync_service::{SyncReport, SyncService};
