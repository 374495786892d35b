// src/transport/memory/connection.rs

//! Connector, connection and channel handles onto a [`MemoryBroker`].

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use super::MemoryBroker;
use crate::{
    // ---
    log_debug,
    Address,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    ConsumeOptions,
    ConsumerHandle,
    Connector,
    Envelope,
    QueueOptions,
    Result,
    RpcError,
};

/// Connector for the in-memory broker.
///
/// Always available; used by tests and by `memory://` configurations.
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnector {
    /// Create a connector onto `broker`.
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    /// The broker this connector talks to.
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<ConnectionPtr> {
        // ---
        if !self.broker.is_reachable() {
            return Err(RpcError::Connection("memory broker is unreachable".into()));
        }

        self.broker.record_connect();
        log_debug!("memory broker: connection opened");

        Ok(Arc::new(MemoryConnection {
            broker: self.broker.clone(),
            open: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    open: AtomicBool,
    channels: Mutex<Vec<Arc<MemoryChannel>>>,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<ChannelPtr> {
        // ---
        if !self.is_connected() {
            return Err(RpcError::Connection("connection is closed".into()));
        }

        let channel = Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            id: self.broker.open_channel(),
            open: AtomicBool::new(true),
            prefetch: AtomicU16::new(0),
        });

        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.retain(|c| c.is_open());
        channels.push(channel.clone());

        Ok(channel)
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let channels: Vec<Arc<MemoryChannel>> = {
            let mut guard = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for channel in channels {
            channel.shut();
        }

        log_debug!("memory broker: connection closed");
        Ok(())
    }
}

struct MemoryChannel {
    broker: Arc<MemoryBroker>,
    id: u64,
    open: AtomicBool,
    prefetch: AtomicU16,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(RpcError::ChannelClosed)
        }
    }

    fn shut(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.close_channel(self.id);
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    // ---
    fn id(&self) -> u64 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_queue(&self, name: &str, opts: QueueOptions) -> Result<Address> {
        self.ensure_open()?;
        self.broker.declare(self.id, name, opts)
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.ensure_open()?;
        self.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, env: Envelope) -> Result<()> {
        self.ensure_open()?;
        self.broker.publish(env);
        Ok(())
    }

    async fn consume(&self, queue: &Address, opts: ConsumeOptions) -> Result<ConsumerHandle> {
        // ---
        self.ensure_open()?;
        let prefetch = self.prefetch.load(Ordering::SeqCst);
        self.broker.consume(self.id, queue, opts.no_ack, prefetch)
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.ensure_open()?;
        self.broker.ack(self.id, delivery_tag)
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.ensure_open()?;
        self.broker.nack(self.id, delivery_tag, requeue)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        // ---
        if self.is_open() {
            self.broker.cancel(self.id, consumer_tag);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shut();
        Ok(())
    }
}
