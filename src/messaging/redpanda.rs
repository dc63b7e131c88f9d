use rdkafka::{
    producer::{FutureProducer, FutureRecord},
    config::ClientConfig,
};
use std::time::Duration;

use crate::error::BrokerError;
use crate::models::Order;
use crate::utils::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, RetryConfig};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes orders to the ingestion topic, keyed by `order_uid`
pub struct OrderProducer {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    retry: RetryConfig,
}

impl OrderProducer {
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new("redpanda", cb_config),
            retry: RetryConfig::publish(),
        })
    }

    pub async fn publish_order(&self, topic: &str, order: &Order) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(order)?;
        self.publish(topic, &order.order_uid, &payload).await
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let result = retry_with_backoff(self.retry.clone(), "redpanda_publish", |_attempt| {
            self.send_once(topic, key, payload)
        })
        .await
        .into_result();

        match result {
            Ok(()) => {
                tracing::info!(topic = %topic, key = %key, "Published to Redpanda");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, topic = %topic, key = %key, "Failed to publish to Redpanda");
                Err(e)
            }
        }
    }

    async fn send_once(&self, topic: &str, key: &str, payload: &[u8]) -> anyhow::Result<()> {
        let send = async {
            let record = FutureRecord::to(topic).key(key).payload(payload);
            self.producer
                .send(record, SEND_TIMEOUT)
                .await
                .map(|_| ())
                .map_err(|(e, _)| BrokerError::Kafka(e))
        };

        match self.circuit_breaker.call(send).await {
            Ok(()) => Ok(()),
            Err(CircuitBreakerError::CircuitOpen) => {
                Err(anyhow::anyhow!("Circuit breaker open for Redpanda"))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e.into()),
        }
    }

    pub async fn get_circuit_breaker_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }
}
