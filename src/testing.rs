//! In-memory gateways for unit tests. Nothing here touches the network.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cache::OrderCache;
use crate::error::{BrokerError, CacheError, StoreError};
use crate::messaging::{Acknowledger, Message, MessageBroker, Subscription};
use crate::models::{Order, SAMPLE_ORDER_JSON};
use crate::store::OrderStore;
use crate::utils::RunScope;

/// The wire sample with `order_uid` and the payment transaction replaced
pub fn sample_order(uid: &str) -> Order {
    let mut order = Order::from_json_bytes(SAMPLE_ORDER_JSON.as_bytes()).unwrap();
    order.order_uid = uid.to_string();
    order.payment.transaction = uid.to_string();
    order
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<BTreeMap<String, Order>>,
    fail_writes: AtomicBool,
    failures_left: AtomicUsize,
    page_delay: Mutex<Option<Duration>>,
    count_override: Mutex<Option<i64>>,
    writes: AtomicUsize,
    reads: AtomicUsize,
    page_calls: Mutex<Vec<(i64, i64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` writes, then succeed
    pub fn fail_next_writes(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_count_override(&self, count: Option<i64>) {
        *self.count_override.lock().unwrap() = count;
    }

    pub fn len(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.orders.lock().unwrap().contains_key(uid)
    }

    /// Successful `add_order` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// `get_order_by_id` calls, hits and misses alike
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> Vec<(i64, i64)> {
        self.page_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn add_order(&self, order: &Order) -> Result<(), StoreError> {
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.orders
            .lock()
            .unwrap()
            .insert(order.order_uid.clone(), order.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_order_by_id(&self, id: &str) -> Result<Order, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.orders
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn count_orders(&self) -> Result<i64, StoreError> {
        if let Some(count) = *self.count_override.lock().unwrap() {
            return Ok(count);
        }
        Ok(self.orders.lock().unwrap().len() as i64)
    }

    async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<Order>, StoreError> {
        self.page_calls.lock().unwrap().push((limit, offset));

        let delay = *self.page_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ============================================================================
// MemoryCache
// ============================================================================

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
    fail_sets: AtomicBool,
    fail_gets: AtomicBool,
    fail_keys: Mutex<HashSet<String>>,
    undeletable: Mutex<HashSet<String>>,
    set_delay: Mutex<Option<Duration>>,
    sets: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_sets(&self, fail: bool) {
        self.fail_sets.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Fail `set` for this key only
    pub fn fail_key(&self, key: &str) {
        self.fail_keys.lock().unwrap().insert(key.to_string());
    }

    /// Make `delete_by_pattern` fail for this key
    pub fn protect_key(&self, key: &str) {
        self.undeletable.lock().unwrap().insert(key.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.set_delay.lock().unwrap() = Some(delay);
    }

    /// Insert a raw value, bypassing serialization
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Successful `set` calls
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[async_trait]
impl OrderCache for MemoryCache {
    async fn set(&self, key: &str, order: &Order) -> Result<(), CacheError> {
        let delay = *self.set_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_sets.load(Ordering::SeqCst) || self.fail_keys.lock().unwrap().contains(key) {
            return Err(CacheError::CircuitOpen);
        }

        let json = serde_json::to_string(order)?;
        self.entries.lock().unwrap().insert(key.to_string(), json);
        self.sets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Order, CacheError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(CacheError::CircuitOpen);
        }

        let raw = self.entries.lock().unwrap().get(key).cloned();
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_by_pattern(&self, scope: &RunScope, pattern: &str) -> Result<usize, CacheError> {
        scope.check()?;

        let undeletable = self.undeletable.lock().unwrap().clone();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|key, _| !glob_matches(pattern, key) || undeletable.contains(key));
        Ok(before - entries.len())
    }
}

// ============================================================================
// MemoryBroker
// ============================================================================

/// Feeds published payloads to one subscription and records acks. A nacked
/// delivery goes back on the queue under the same id.
#[derive(Clone)]
pub struct MemoryBroker {
    sender: mpsc::UnboundedSender<(u64, Vec<u8>)>,
    receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<(u64, Vec<u8>)>>>>,
    next_id: Arc<AtomicUsize>,
    acked: Arc<Mutex<Vec<u64>>>,
    nacked: Arc<Mutex<Vec<u64>>>,
    unsubscribed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(Some(receiver))),
            next_id: Arc::new(AtomicUsize::new(0)),
            acked: Arc::new(Mutex::new(Vec::new())),
            nacked: Arc::new(Mutex::new(Vec::new())),
            unsubscribed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the delivery id later reported by `acked`
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        let _ = self.sender.send((id, payload.into()));
        id
    }

    pub fn publish_order(&self, order: &Order) -> u64 {
        self.publish(serde_json::to_vec(order).unwrap())
    }

    pub fn acked(&self) -> Vec<u64> {
        let mut acked = self.acked.lock().unwrap().clone();
        acked.sort();
        acked
    }

    pub fn is_acked(&self, id: u64) -> bool {
        self.acked.lock().unwrap().contains(&id)
    }

    /// Every nack in arrival order, repeats included
    pub fn nacked(&self) -> Vec<u64> {
        self.nacked.lock().unwrap().clone()
    }

    pub fn is_nacked(&self, id: u64) -> bool {
        self.nacked.lock().unwrap().contains(&id)
    }

    pub fn unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    /// Build a standalone message whose ack is recorded here
    pub fn message(&self, payload: impl Into<Vec<u8>>) -> (u64, Message) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64;
        (id, self.wrap(id, payload.into()))
    }

    fn wrap(&self, id: u64, payload: Vec<u8>) -> Message {
        let acker = MemoryAcker {
            id,
            payload: payload.clone(),
            acked: self.acked.clone(),
            nacked: self.nacked.clone(),
            requeue: self.sender.clone(),
        };
        Message::new(payload, format!("memory@{}", id), Box::new(acker))
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn subscribe(&self, _topic: &str, _durable_name: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or(BrokerError::Closed)?;

        Ok(Box::new(MemorySubscription {
            broker: self.clone(),
            receiver,
        }))
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    receiver: mpsc::UnboundedReceiver<(u64, Vec<u8>)>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Message, BrokerError> {
        match self.receiver.recv().await {
            Some((id, payload)) => Ok(self.broker.wrap(id, payload)),
            None => Err(BrokerError::Closed),
        }
    }

    async fn unsubscribe(self: Box<Self>) -> Result<(), BrokerError> {
        self.broker.unsubscribed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryAcker {
    id: u64,
    payload: Vec<u8>,
    acked: Arc<Mutex<Vec<u64>>>,
    nacked: Arc<Mutex<Vec<u64>>>,
    requeue: mpsc::UnboundedSender<(u64, Vec<u8>)>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acked.lock().unwrap().push(self.id);
        Ok(())
    }

    async fn nack(&self) -> Result<(), BrokerError> {
        self.nacked.lock().unwrap().push(self.id);
        self.requeue
            .send((self.id, self.payload.clone()))
            .map_err(|_| BrokerError::Closed)
    }
}
