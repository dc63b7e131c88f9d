// ============================================================================
// Broker Abstraction
// ============================================================================
//
// A durable subscription hands out messages one at a time. Each message
// carries its own acknowledger. `ack` marks it consumed; `nack` hands it
// back so the running subscription delivers it again. A message dropped
// with neither is never marked consumed and only comes back after the
// subscription is rebuilt.
//
// ============================================================================

pub mod ack_tracker;
mod kafka;
mod redpanda;

pub use ack_tracker::AckTracker;
pub use kafka::{KafkaBroker, KafkaSubscription};
pub use redpanda::OrderProducer;

use async_trait::async_trait;
use std::fmt;

use crate::error::BrokerError;

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Join the durable subscription `durable_name` on `topic`
    async fn subscribe(&self, topic: &str, durable_name: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Next message; `BrokerError::Closed` once the subscription has ended
    async fn next_message(&mut self) -> Result<Message, BrokerError>;

    /// Stop receiving and flush acknowledged positions to the broker
    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Release the message for redelivery on this subscription
    async fn nack(&self) -> Result<(), BrokerError>;
}

pub struct Message {
    payload: Vec<u8>,
    source: String,
    acker: Box<dyn Acknowledger>,
}

impl Message {
    /// `source` identifies the delivery in logs, e.g. `orders/0@42`
    pub fn new(payload: Vec<u8>, source: impl Into<String>, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            payload,
            source: source.into(),
            acker,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<(), BrokerError> {
        self.acker.nack().await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("source", &self.source)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
