//! Broker connection manager.
//!
//! Owns the single broker connection of a process. The connection is opened
//! lazily on the first [`ConnectionManager::get_channel`] call and reused by
//! every later call; each call still gets its own fresh channel, because a
//! channel must not be shared between independent in-flight requests.
//!
//! The manager is an ordinary value passed (usually as an `Arc`) to the
//! requester and responder, so tests can hand in a connector backed by the
//! in-memory broker and services can close the connection on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time;

use crate::policy::DEFAULT_CONNECT_TIMEOUT;
use crate::{
    // ---
    log_info,
    log_warn,
    ChannelPtr,
    ConnectionPtr,
    ConnectorPtr,
    Result,
    RpcError,
};

/// Lazily connects and memoizes one broker connection.
///
/// # Example
///
/// ```
/// # use lms_rpc::{ConnectionManager, MemoryBroker, MemoryConnector};
/// # use std::sync::Arc;
/// # async fn example() -> lms_rpc::Result<()> {
/// let broker = MemoryBroker::new();
/// let connections = ConnectionManager::new(Arc::new(MemoryConnector::new(broker.clone())));
///
/// let a = connections.get_channel().await?;
/// let b = connections.get_channel().await?;
/// assert_ne!(a.id(), b.id());
/// assert_eq!(broker.connect_count(), 1);
///
/// connections.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager {
    // ---
    connector: ConnectorPtr,
    connection: Mutex<Option<ConnectionPtr>>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    /// Create a manager; no connection is opened until first use.
    pub fn new(connector: ConnectorPtr) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound each connect attempt. Callers waiting on the shared connection
    /// wait at most this long for a broker that does not answer.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Open a new channel on the shared connection, connecting first if
    /// needed.
    ///
    /// Concurrent first callers wait for a single connect attempt. A failed
    /// attempt is not remembered; the next call tries again.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Connection`](crate::RpcError::Connection) if the
    /// broker is unreachable, or the backend's error if the channel cannot be
    /// opened.
    pub async fn get_channel(&self) -> Result<ChannelPtr> {
        // ---
        let connection = self.connection().await?;
        connection.create_channel().await
    }

    /// Whether a live connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.is_connected())
    }

    /// Close the held connection, if any.
    ///
    /// Every channel on it closes too, so in-flight calls resolve and
    /// responders stop consuming. A later `get_channel` reconnects.
    pub async fn shutdown(&self) -> Result<()> {
        // ---
        let connection = self.connection.lock().await.take();

        match connection {
            Some(connection) => {
                log_info!("closing broker connection");
                connection.close().await
            }
            None => Ok(()),
        }
    }

    async fn connection(&self) -> Result<ConnectionPtr> {
        // ---
        let mut guard = self.connection.lock().await;

        if let Some(connection) = guard.as_ref() {
            if connection.is_connected() {
                return Ok(Arc::clone(connection));
            }
            log_warn!("broker connection lost, reconnecting");
        }

        let connection = match time::timeout(self.connect_timeout, self.connector.connect()).await {
            Ok(connected) => connected?,
            Err(_) => {
                log_warn!("broker did not accept a connection within {:?}", self.connect_timeout);
                return Err(RpcError::Connection(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )));
            }
        };
        *guard = Some(Arc::clone(&connection));

        log_info!("broker connection established");
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{Connector, MemoryBroker, MemoryConnector};

    /// Hands out memory connections and remembers the last one, so a test
    /// can close it behind the manager's back.
    struct RecordingConnector {
        inner: MemoryConnector,
        last: std::sync::Mutex<Option<ConnectionPtr>>,
    }

    #[async_trait::async_trait]
    impl Connector for RecordingConnector {
        async fn connect(&self) -> Result<ConnectionPtr> {
            let connection = self.inner.connect().await?;
            *self.last.lock().unwrap() = Some(Arc::clone(&connection));
            Ok(connection)
        }
    }

    /// A broker that never answers the connect.
    struct BlackholeConnector;

    #[async_trait::async_trait]
    impl Connector for BlackholeConnector {
        async fn connect(&self) -> Result<ConnectionPtr> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_lost_connection_is_replaced() {
        // ---
        let broker = MemoryBroker::new();
        let connector = Arc::new(RecordingConnector {
            inner: MemoryConnector::new(broker.clone()),
            last: std::sync::Mutex::new(None),
        });
        let connections = ConnectionManager::new(connector.clone());

        connections.get_channel().await.expect("first channel");
        assert_eq!(broker.connect_count(), 1);

        let first = connector.last.lock().unwrap().clone().expect("connection");
        first.close().await.expect("close");
        assert!(!connections.is_connected().await);

        let channel = connections.get_channel().await.expect("channel after reconnect");
        assert!(channel.is_open());
        assert_eq!(broker.connect_count(), 2);
        assert!(connections.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_bounded_by_timeout() {
        // ---
        let connections = ConnectionManager::new(Arc::new(BlackholeConnector))
            .with_connect_timeout(Duration::from_secs(2));

        let started = time::Instant::now();
        let err = connections.get_channel().await.err().expect("connect must fail");

        assert!(matches!(err, RpcError::Connection(_)));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(!connections.is_connected().await);
    }
}
