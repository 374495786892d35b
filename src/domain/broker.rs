// src/domain/broker.rs

//! Broker domain abstractions.
//!
//! These traits describe the small slice of AMQP 0-9-1 the RPC layer relies
//! on: connections that hand out channels, and channels that declare queues,
//! publish to the default exchange, consume, and acknowledge.
//!
//! Higher-level semantics (correlation, timeouts, error replies) are built
//! on top of them in `requester` and `responder`. The in-memory broker under
//! `src/transport/memory/` is the reference implementation of these
//! semantics; the lapin backend approximates it against a real broker.
//!
//! # Notes
//!
//! These traits use `async_trait`; the expanded documentation may show
//! explicit lifetimes and a boxed `Future`. Consumers should treat the
//! methods as normal `async fn`s.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Address, Envelope};
use crate::Result;

/// Queue declaration options.
///
/// An empty queue name passed to [`Channel::declare_queue`] asks the broker
/// to generate one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Usable only by the declaring channel; deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueOptions {
    /// Options for a well-known RPC request queue.
    ///
    /// RPC calls are ephemeral, so the queue is not durable.
    pub fn request_queue() -> Self {
        Self {
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Options for a private, single-call reply queue.
    pub fn reply_queue() -> Self {
        Self {
            durable: false,
            exclusive: true,
            auto_delete: true,
        }
    }
}

/// Consumer registration options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeOptions {
    /// Deliveries are considered acknowledged as soon as they are sent.
    pub no_ack: bool,
}

impl ConsumeOptions {
    /// Manual acknowledgement.
    pub fn manual_ack() -> Self {
        Self { no_ack: false }
    }

    /// Broker-side automatic acknowledgement.
    pub fn auto_ack() -> Self {
        Self { no_ack: true }
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag used to ack or nack this delivery on the consuming channel.
    pub delivery_tag: u64,
    /// The message as published.
    pub envelope: Envelope,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
}

/// Handle returned from a successful [`Channel::consume`].
///
/// The inbox closes when the consumer is cancelled or its channel closes.
pub struct ConsumerHandle {
    // ---
    /// Consumer tag, used with [`Channel::cancel`].
    pub tag: Arc<str>,

    /// Deliveries for this consumer, in broker order.
    pub inbox: mpsc::UnboundedReceiver<Delivery>,
}

/// A logical channel multiplexed over a broker connection.
///
/// Channels are not shared between independent in-flight operations; the
/// connection manager hands out a fresh one per call.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    // ---
    /// Channel number, unique within its connection.
    fn id(&self) -> u64;

    /// Whether the channel can still be used.
    fn is_open(&self) -> bool;

    /// Declare (or assert) a queue and return its name.
    ///
    /// Passing an empty name asks the broker to generate a unique one.
    async fn declare_queue(&self, name: &str, opts: QueueOptions) -> Result<Address>;

    /// Limit the number of unacknowledged deliveries per consumer created
    /// afterwards on this channel. Zero means unlimited.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Publish an envelope to the queue named by `env.address`.
    ///
    /// As with the AMQP default exchange, publishing to a queue that does
    /// not exist is not an error; the message is dropped.
    async fn publish(&self, env: Envelope) -> Result<()>;

    /// Start consuming from `queue`.
    async fn consume(&self, queue: &Address, opts: ConsumeOptions) -> Result<ConsumerHandle>;

    /// Acknowledge a delivery, removing it from its queue.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Negatively acknowledge a delivery, optionally putting it back.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Cancel a consumer. Cancelling an unknown tag is a no-op.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Close the channel. Unacknowledged deliveries are requeued and
    /// exclusive queues owned by the channel are deleted. Closing an
    /// already-closed channel is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Shared channel pointer.
pub type ChannelPtr = Arc<dyn Channel>;

/// A live connection to a broker.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    // ---
    /// Open a new logical channel.
    async fn create_channel(&self) -> Result<ChannelPtr>;

    /// Whether the connection is still usable.
    fn is_connected(&self) -> bool;

    /// Close the connection and every channel opened on it.
    async fn close(&self) -> Result<()>;
}

/// Shared connection pointer.
pub type ConnectionPtr = Arc<dyn Connection>;

/// Establishes broker connections.
///
/// The connection manager calls this lazily and memoizes the result. Test
/// code substitutes a connector backed by the in-memory broker.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    // ---
    /// Open a new connection.
    async fn connect(&self) -> Result<ConnectionPtr>;
}

/// Shared connector pointer.
pub type ConnectorPtr = Arc<dyn Connector>;
