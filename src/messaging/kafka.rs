use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::BrokerError;
use super::{AckTracker, Acknowledger, Message, MessageBroker, Subscription};

// ============================================================================
// Kafka / Redpanda Subscription
// ============================================================================
//
// The durable name is the consumer group. Offsets are stored explicitly on
// acknowledgement (enable.auto.offset.store=false) and the stored positions
// are committed in the background by librdkafka.
//
// A nack seeks the partition back to the released offset, so the running
// consumer fetches it again along with everything after it. Those later
// messages are processed a second time; writes are idempotent.
//
// ============================================================================

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

type OrderConsumer = StreamConsumer<RebalanceContext>;

/// Resets ack tracking for partitions this member gains or loses
struct RebalanceContext {
    tracker: Arc<Mutex<AckTracker>>,
}

impl RebalanceContext {
    fn forget(&self, partitions: &TopicPartitionList, reason: &str) {
        let Ok(mut tracker) = self.tracker.lock() else {
            tracing::error!("Ack tracker poisoned during rebalance");
            return;
        };

        for elem in partitions.elements() {
            tracker.forget(elem.topic(), elem.partition());
            tracing::info!(
                topic = %elem.topic(),
                partition = elem.partition(),
                reason = reason,
                "Partition ack state reset"
            );
        }
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(partitions) = rebalance {
            self.forget(partitions, "revoked");
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => self.forget(partitions, "assigned"),
            Rebalance::Error(e) => tracing::warn!(error = %e, "Rebalance failed"),
            Rebalance::Revoke(_) => {}
        }
    }
}

pub struct KafkaBroker {
    brokers: String,
}

impl KafkaBroker {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self { brokers: brokers.into() }
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn subscribe(&self, topic: &str, durable_name: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let tracker = Arc::new(Mutex::new(AckTracker::new()));
        let context = RebalanceContext {
            tracker: tracker.clone(),
        };

        let consumer: OrderConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", durable_name)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "45000")
            .set("max.poll.interval.ms", "300000")
            .create_with_context(context)?;

        consumer.subscribe(&[topic])?;

        tracing::info!(
            brokers = %self.brokers,
            topic = %topic,
            durable_name = %durable_name,
            "Subscribed to topic"
        );

        Ok(Box::new(KafkaSubscription {
            consumer: Arc::new(consumer),
            tracker,
        }))
    }
}

pub struct KafkaSubscription {
    consumer: Arc<OrderConsumer>,
    tracker: Arc<Mutex<AckTracker>>,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_message(&mut self) -> Result<Message, BrokerError> {
        let received = self.consumer.recv().await?;

        let topic = received.topic().to_string();
        let partition = received.partition();
        let offset = received.offset();
        let payload = received.payload().map(<[u8]>::to_vec).unwrap_or_default();

        self.tracker
            .lock()
            .map_err(|_| BrokerError::Ack("ack tracker poisoned".to_string()))?
            .track(&topic, partition, offset);

        let source = format!("{}/{}@{}", topic, partition, offset);
        let acker = KafkaAcker {
            consumer: self.consumer.clone(),
            tracker: self.tracker.clone(),
            topic,
            partition,
            offset,
        };

        Ok(Message::new(payload, source, Box::new(acker)))
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError> {
        // Fails with NoOffset when nothing was acked since the last commit
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            tracing::warn!(error = %e, "Final offset commit failed");
        }

        self.consumer.unsubscribe();
        tracing::info!("Unsubscribed from topic");
        Ok(())
    }
}

struct KafkaAcker {
    consumer: Arc<OrderConsumer>,
    tracker: Arc<Mutex<AckTracker>>,
    topic: String,
    partition: i32,
    offset: i64,
}

#[async_trait]
impl Acknowledger for KafkaAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        let position = self
            .tracker
            .lock()
            .map_err(|_| BrokerError::Ack("ack tracker poisoned".to_string()))?
            .ack(&self.topic, self.partition, self.offset);

        if let Some(next) = position {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&self.topic, self.partition, Offset::Offset(next))?;
            self.consumer.store_offsets(&tpl)?;
        }

        Ok(())
    }

    async fn nack(&self) -> Result<(), BrokerError> {
        let consumer = self.consumer.clone();
        let topic = self.topic.clone();
        let (partition, offset) = (self.partition, self.offset);

        // seek blocks on librdkafka for up to SEEK_TIMEOUT
        tokio::task::spawn_blocking(move || {
            consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
        })
        .await
        .map_err(|e| BrokerError::Ack(format!("seek task failed: {e}")))??;

        tracing::debug!(
            topic = %self.topic,
            partition = self.partition,
            offset = self.offset,
            "Partition rewound for redelivery"
        );
        Ok(())
    }
}
