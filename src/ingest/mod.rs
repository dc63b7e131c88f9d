mod consumer;

pub use consumer::{IngestionConsumer, Outcome};
