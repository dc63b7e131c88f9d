pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod server;
pub mod services;
pub mod store;
pub mod utils;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;
