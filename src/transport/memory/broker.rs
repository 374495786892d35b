// src/transport/memory/broker.rs

//! Shared state of the in-memory broker.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    // ---
    log_debug,
    Address,
    ConsumerHandle,
    Delivery,
    Envelope,
    QueueOptions,
    Result,
    RpcError,
};

/// Simulated message broker living inside one process.
///
/// Every [`MemoryConnector`](super::MemoryConnector) built from the same
/// `MemoryBroker` talks to the same queues, exactly as services connected to
/// one RabbitMQ node would. Tests keep a handle to the broker to inspect
/// queues and to make it refuse connections.
///
/// ```
/// # use lms_rpc::{MemoryBroker, MemoryConnector, ConnectionManager};
/// # use std::sync::Arc;
/// let broker = MemoryBroker::new();
/// let connections = Arc::new(ConnectionManager::new(Arc::new(MemoryConnector::new(broker.clone()))));
/// broker.set_reachable(false); // next connect attempt fails
/// ```
pub struct MemoryBroker {
    // ---
    state: Mutex<BrokerState>,
    reachable: AtomicBool,
    connects: AtomicUsize,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<Arc<str>, QueueState>,
    next_delivery_tag: u64,
    next_channel_id: u64,
}

struct QueueState {
    exclusive_owner: Option<u64>,
    auto_delete: bool,
    ready: VecDeque<Pending>,
    consumers: Vec<ConsumerState>,
    cursor: usize,
    unacked: BTreeMap<u64, Unacked>,
    ever_consumed: bool,
}

struct Pending {
    envelope: Envelope,
    redelivered: bool,
}

struct ConsumerState {
    tag: Arc<str>,
    channel_id: u64,
    no_ack: bool,
    prefetch: u16,
    in_flight: usize,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Unacked {
    channel_id: u64,
    consumer_tag: Arc<str>,
    envelope: Envelope,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl QueueState {
    fn new(opts: QueueOptions, channel_id: u64) -> Self {
        // ---
        Self {
            exclusive_owner: opts.exclusive.then_some(channel_id),
            auto_delete: opts.auto_delete,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            cursor: 0,
            unacked: BTreeMap::new(),
            ever_consumed: false,
        }
    }

    fn locked_for(&self, channel_id: u64) -> bool {
        matches!(self.exclusive_owner, Some(owner) if owner != channel_id)
    }

    fn abandoned(&self) -> bool {
        self.auto_delete && self.ever_consumed && self.consumers.is_empty()
    }

    /// Round-robin pick of the next consumer allowed to take a message.
    fn next_consumer(&mut self) -> Option<usize> {
        // ---
        let n = self.consumers.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let c = &self.consumers[idx];
            if c.no_ack || c.prefetch == 0 || c.in_flight < usize::from(c.prefetch) {
                self.cursor = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }

    fn dispatch(&mut self, next_tag: &mut u64) {
        // ---
        while !self.ready.is_empty() {
            let Some(idx) = self.next_consumer() else {
                break;
            };
            let Some(pending) = self.ready.pop_front() else {
                break;
            };

            *next_tag += 1;
            let delivery_tag = *next_tag;

            let delivery = Delivery {
                delivery_tag,
                envelope: pending.envelope.clone(),
                redelivered: pending.redelivered,
            };

            let consumer = &mut self.consumers[idx];
            if consumer.tx.send(delivery).is_err() {
                // inbox dropped; the consumer is gone
                self.consumers.remove(idx);
                self.ready.push_front(pending);
                continue;
            }

            if !consumer.no_ack {
                consumer.in_flight += 1;
                self.unacked.insert(
                    delivery_tag,
                    Unacked {
                        channel_id: consumer.channel_id,
                        consumer_tag: consumer.tag.clone(),
                        envelope: pending.envelope,
                    },
                );
            }
        }
    }

    /// Remove an unacked delivery owned by `channel_id`.
    fn settle(&mut self, channel_id: u64, delivery_tag: u64) -> Option<Envelope> {
        // ---
        match self.unacked.get(&delivery_tag) {
            Some(entry) if entry.channel_id == channel_id => {}
            _ => return None,
        }
        let entry = self.unacked.remove(&delivery_tag)?;

        if let Some(c) = self
            .consumers
            .iter_mut()
            .find(|c| c.tag == entry.consumer_tag)
        {
            c.in_flight = c.in_flight.saturating_sub(1);
        }
        Some(entry.envelope)
    }

    /// Put every delivery held by `channel_id` back at the head of the
    /// queue, keeping the original order.
    fn requeue_channel(&mut self, channel_id: u64) {
        // ---
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == channel_id)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in tags.into_iter().rev() {
            if let Some(entry) = self.unacked.remove(&tag) {
                self.ready.push_front(Pending {
                    envelope: entry.envelope,
                    redelivered: true,
                });
            }
        }
    }
}

impl MemoryBroker {
    /// Create a new, empty broker that accepts connections.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self {
            state: Mutex::new(BrokerState::default()),
            reachable: AtomicBool::new(true),
            connects: AtomicUsize::new(0),
        })
    }

    /// Make the broker accept or refuse new connections.
    ///
    /// Existing connections are unaffected.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Whether new connections are accepted.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Whether a queue with this name currently exists.
    pub fn queue_exists(&self, name: &str) -> bool {
        lock_ignore_poison(&self.state).queues.contains_key(name)
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        // ---
        let state = lock_ignore_poison(&self.state);
        let mut names: Vec<String> = state.queues.keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Messages waiting for a consumer. Zero for a missing queue.
    pub fn message_count(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.ready.len())
    }

    /// Delivered but not yet acknowledged messages. Zero for a missing queue.
    pub fn unacked_count(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.unacked.len())
    }

    /// Active consumers. Zero for a missing queue.
    pub fn consumer_count(&self, name: &str) -> usize {
        lock_ignore_poison(&self.state)
            .queues
            .get(name)
            .map_or(0, |q| q.consumers.len())
    }

    pub(super) fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    pub(super) fn open_channel(&self) -> u64 {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.next_channel_id += 1;
        state.next_channel_id
    }

    pub(super) fn declare(&self, channel_id: u64, name: &str, opts: QueueOptions) -> Result<Address> {
        // ---
        let name: Arc<str> = if name.is_empty() {
            Arc::from(format!("amq.gen-{}", Uuid::new_v4().simple()))
        } else {
            Arc::from(name)
        };

        let mut state = lock_ignore_poison(&self.state);
        match state.queues.get(&name) {
            Some(queue) if queue.locked_for(channel_id) => {
                return Err(RpcError::ResourceLocked(name.to_string()));
            }
            Some(_) => {}
            None => {
                log_debug!("memory broker: channel {channel_id} declared queue {name}");
                state
                    .queues
                    .insert(name.clone(), QueueState::new(opts, channel_id));
            }
        }

        Ok(Address(name))
    }

    pub(super) fn publish(&self, env: Envelope) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let BrokerState {
            queues,
            next_delivery_tag,
            ..
        } = &mut *state;

        match queues.get_mut(env.address.as_str()) {
            Some(queue) => {
                queue.ready.push_back(Pending {
                    envelope: env,
                    redelivered: false,
                });
                queue.dispatch(next_delivery_tag);
            }
            None => {
                log_debug!("memory broker: no queue {}, message dropped", env.address);
            }
        }
    }

    pub(super) fn consume(
        &self,
        channel_id: u64,
        queue: &Address,
        no_ack: bool,
        prefetch: u16,
    ) -> Result<ConsumerHandle> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let BrokerState {
            queues,
            next_delivery_tag,
            ..
        } = &mut *state;

        let q = queues
            .get_mut(queue.as_str())
            .ok_or_else(|| RpcError::QueueNotFound(queue.to_string()))?;

        if q.locked_for(channel_id) {
            return Err(RpcError::ResourceLocked(queue.to_string()));
        }

        let tag: Arc<str> = Arc::from(format!("ctag-{}", Uuid::new_v4().simple()));
        let (tx, rx) = mpsc::unbounded_channel();

        q.consumers.push(ConsumerState {
            tag: tag.clone(),
            channel_id,
            no_ack,
            prefetch,
            in_flight: 0,
            tx,
        });
        q.ever_consumed = true;
        q.dispatch(next_delivery_tag);

        Ok(ConsumerHandle { tag, inbox: rx })
    }

    pub(super) fn ack(&self, channel_id: u64, delivery_tag: u64) -> Result<()> {
        // ---
        self.settle(channel_id, delivery_tag, |_, _| {})
    }

    pub(super) fn nack(&self, channel_id: u64, delivery_tag: u64, requeue: bool) -> Result<()> {
        // ---
        self.settle(channel_id, delivery_tag, |queue, envelope| {
            if requeue {
                queue.ready.push_front(Pending {
                    envelope,
                    redelivered: true,
                });
            }
        })
    }

    fn settle<F>(&self, channel_id: u64, delivery_tag: u64, then: F) -> Result<()>
    where
        F: FnOnce(&mut QueueState, Envelope),
    {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let BrokerState {
            queues,
            next_delivery_tag,
            ..
        } = &mut *state;

        for queue in queues.values_mut() {
            if let Some(envelope) = queue.settle(channel_id, delivery_tag) {
                then(queue, envelope);
                queue.dispatch(next_delivery_tag);
                return Ok(());
            }
        }

        Err(RpcError::Channel(format!(
            "unknown delivery tag {delivery_tag} on channel {channel_id}"
        )))
    }

    pub(super) fn cancel(&self, channel_id: u64, consumer_tag: &str) {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        state.queues.retain(|name, queue| {
            let before = queue.consumers.len();
            queue
                .consumers
                .retain(|c| !(c.channel_id == channel_id && c.tag.as_ref() == consumer_tag));

            if before != queue.consumers.len() && queue.abandoned() {
                log_debug!("memory broker: auto-deleting queue {name}");
                return false;
            }
            true
        });
    }

    pub(super) fn close_channel(&self, channel_id: u64) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let BrokerState {
            queues,
            next_delivery_tag,
            ..
        } = &mut *state;

        queues.retain(|name, queue| {
            queue.consumers.retain(|c| c.channel_id != channel_id);
            queue.requeue_channel(channel_id);

            if queue.exclusive_owner == Some(channel_id) || queue.abandoned() {
                log_debug!("memory broker: deleting queue {name} on channel {channel_id} close");
                return false;
            }

            queue.dispatch(next_delivery_tag);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;

    fn message(queue: &str, body: &'static str) -> Envelope {
        Envelope::response(Address::from(queue), Bytes::from_static(body.as_bytes()), "cid".into())
    }

    #[test]
    fn test_empty_name_generates_unique_queue() {
        // ---
        let broker = MemoryBroker::new();
        let a = broker.declare(1, "", QueueOptions::reply_queue()).unwrap();
        let b = broker.declare(1, "", QueueOptions::reply_queue()).unwrap();

        assert!(a.as_str().starts_with("amq.gen-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_exclusive_queue_is_locked_for_other_channels() {
        // ---
        let broker = MemoryBroker::new();
        let q = broker.declare(1, "", QueueOptions::reply_queue()).unwrap();

        assert!(matches!(
            broker.consume(2, &q, true, 0),
            Err(RpcError::ResourceLocked(_))
        ));
        assert!(matches!(
            broker.declare(2, q.as_str(), QueueOptions::reply_queue()),
            Err(RpcError::ResourceLocked(_))
        ));
    }

    #[test]
    fn test_publish_to_missing_queue_is_dropped() {
        // ---
        let broker = MemoryBroker::new();
        broker.publish(message("nowhere", "x"));
        assert!(broker.queue_names().is_empty());
    }

    #[tokio::test]
    async fn test_prefetch_limits_in_flight_deliveries() {
        // ---
        let broker = MemoryBroker::new();
        let q = broker.declare(1, "work", QueueOptions::request_queue()).unwrap();
        broker.publish(message("work", "a"));
        broker.publish(message("work", "b"));

        let mut consumer = broker.consume(1, &q, false, 1).unwrap();

        let first = consumer.inbox.recv().await.unwrap();
        assert!(consumer.inbox.try_recv().is_err());
        assert_eq!(broker.message_count("work"), 1);
        assert_eq!(broker.unacked_count("work"), 1);

        broker.ack(1, first.delivery_tag).unwrap();

        let second = consumer.inbox.recv().await.unwrap();
        assert_eq!(second.envelope.payload, Bytes::from_static(b"b"));
        assert_eq!(broker.message_count("work"), 0);
    }

    #[tokio::test]
    async fn test_channel_close_requeues_unacked() {
        // ---
        let broker = MemoryBroker::new();
        let q = broker.declare(1, "work", QueueOptions::request_queue()).unwrap();
        broker.publish(message("work", "a"));

        let mut first = broker.consume(1, &q, false, 1).unwrap();
        let delivery = first.inbox.recv().await.unwrap();
        assert!(!delivery.redelivered);

        broker.close_channel(1);
        assert!(first.inbox.recv().await.is_none());
        assert_eq!(broker.message_count("work"), 1);

        let mut second = broker.consume(2, &q, false, 1).unwrap();
        let again = second.inbox.recv().await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.envelope.payload, Bytes::from_static(b"a"));
    }

    #[test]
    fn test_channel_close_deletes_exclusive_queue() {
        // ---
        let broker = MemoryBroker::new();
        let q = broker.declare(7, "", QueueOptions::reply_queue()).unwrap();
        assert!(broker.queue_exists(q.as_str()));

        broker.close_channel(7);
        assert!(!broker.queue_exists(q.as_str()));
    }

    #[test]
    fn test_cancel_last_consumer_auto_deletes() {
        // ---
        let broker = MemoryBroker::new();
        let q = broker
            .declare(
                1,
                "fanout",
                QueueOptions {
                    auto_delete: true,
                    ..QueueOptions::default()
                },
            )
            .unwrap();

        let consumer = broker.consume(1, &q, true, 0).unwrap();
        broker.cancel(1, &consumer.tag);

        assert!(!broker.queue_exists("fanout"));
    }

    #[test]
    fn test_ack_unknown_tag_fails() {
        // ---
        let broker = MemoryBroker::new();
        assert!(matches!(broker.ack(1, 42), Err(RpcError::Channel(_))));
    }
}
