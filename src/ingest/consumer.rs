use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::BrokerError;
use crate::messaging::{Message, Subscription};
use crate::metrics::{outcome, Metrics};
use crate::models::Order;
use crate::services::CacheService;
use crate::store::OrderStore;
use crate::validation::OrderValidator;

// ============================================================================
// Ingestion Consumer
// ============================================================================
//
// decode -> validate -> store -> cache -> ack
//
// A store failure is transient from the message's point of view: after a
// short pause the message is nacked and the subscription delivers it again.
// Malformed and invalid payloads are neither acked nor nacked.
//
// Every message is handled on its own task. A slot permit is taken before a
// message is pulled and released when its handler finishes, so each slot
// holds at most one unacknowledged message. Taking every permit back is the
// shutdown drain.
//
// ============================================================================

const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stored,
    Malformed,
    Invalid,
    StoreFailed,
    AckFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Stored => outcome::STORED,
            Outcome::Malformed => outcome::MALFORMED,
            Outcome::Invalid => outcome::INVALID,
            Outcome::StoreFailed => outcome::STORE_FAILED,
            Outcome::AckFailed => outcome::ACK_FAILED,
        }
    }
}

pub struct IngestionConsumer {
    store: Arc<dyn OrderStore>,
    cache_service: Arc<CacheService>,
    validator: OrderValidator,
    slots: Arc<Semaphore>,
    max_in_flight: usize,
    in_flight: AtomicUsize,
    redelivery_delay: Duration,
    metrics: Arc<Metrics>,
}

impl IngestionConsumer {
    pub fn new(
        store: Arc<dyn OrderStore>,
        cache_service: Arc<CacheService>,
        validator: OrderValidator,
        max_in_flight: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            store,
            cache_service,
            validator,
            slots: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            in_flight: AtomicUsize::new(0),
            redelivery_delay: DEFAULT_REDELIVERY_DELAY,
            metrics,
        }
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Pull messages until `shutdown` fires or the subscription closes.
    /// Returns the subscription so the caller can drain before unsubscribing.
    pub async fn run(
        self: Arc<Self>,
        mut subscription: Box<dyn Subscription>,
        shutdown: CancellationToken,
    ) -> Box<dyn Subscription> {
        tracing::info!(max_in_flight = self.max_in_flight, "🚀 Ingestion consumer started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = subscription.next_message() => received,
            };

            match received {
                Ok(message) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    self.metrics.ingest_in_flight.inc();

                    let consumer = self.clone();
                    tokio::spawn(async move {
                        consumer.handle_message(message).await;
                        consumer.in_flight.fetch_sub(1, Ordering::SeqCst);
                        consumer.metrics.ingest_in_flight.dec();
                        drop(permit);
                    });
                }
                Err(BrokerError::Closed) => {
                    tracing::info!("Subscription closed");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive message");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(in_flight = self.in_flight(), "🛑 Ingestion consumer stopped receiving");
        subscription
    }

    /// Handle one message end to end and record its outcome
    pub async fn handle_message(&self, message: Message) -> Outcome {
        let started = Instant::now();
        let outcome = self.process(message).await;
        self.metrics.record_ingest(outcome.as_str(), started.elapsed().as_secs_f64());
        outcome
    }

    async fn process(&self, message: Message) -> Outcome {
        let order = match Order::from_json_bytes(message.payload()) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(
                    source = %message.source(),
                    error = %e,
                    "Malformed order payload, leaving unacknowledged"
                );
                return Outcome::Malformed;
            }
        };

        let span = tracing::info_span!("ingest", order_uid = %order.order_uid);
        self.persist(order, message).instrument(span).await
    }

    async fn persist(&self, order: Order, message: Message) -> Outcome {
        if let Err(e) = self.validator.validate(&order) {
            tracing::error!(
                source = %message.source(),
                error = %e,
                "Invalid order, leaving unacknowledged"
            );
            return Outcome::Invalid;
        }

        if let Err(e) = self.store.add_order(&order).await {
            tracing::error!(
                error = %e,
                delay_ms = self.redelivery_delay.as_millis() as u64,
                "Failed to store order, releasing for redelivery"
            );
            tokio::time::sleep(self.redelivery_delay).await;
            if let Err(e) = message.nack().await {
                tracing::warn!(error = %e, "Failed to release message for redelivery");
            }
            return Outcome::StoreFailed;
        }

        if let Err(e) = self.cache_service.cache_order(&order).await {
            tracing::warn!(error = %e, "Failed to cache order, acknowledging anyway");
            self.metrics.record_cache_write_failure();
        }

        match message.ack().await {
            Ok(()) => {
                tracing::debug!("Order stored and acknowledged");
                Outcome::Stored
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to acknowledge message");
                Outcome::AckFailed
            }
        }
    }

    /// Wait for every running handler, up to `timeout`. Returns false when
    /// the deadline passed first; those handlers are left to finish alone.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let all = self.max_in_flight as u32;

        match tokio::time::timeout(timeout, self.slots.acquire_many(all)).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}
