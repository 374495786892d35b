//! Broker backends.
//!
//! This module provides concrete implementations of the domain-level
//! `Connector`, `Connection` and `Channel` traits. The in-memory broker is
//! always compiled; the AMQP backend sits behind the `transport_lapin`
//! feature.
//!
//! Requester and responder code must not depend on backend-specific types.

mod amqp;
mod memory;

use std::sync::Arc;

use crate::{ConnectorPtr, Result, RpcConfig, RpcError};

#[cfg(feature = "transport_lapin")]
pub use amqp::LapinConnector;

pub use memory::{MemoryBroker, MemoryConnector};

/// Build a connector for the broker named by `config.broker_uri`.
///
/// | scheme             | backend                                  |
/// |--------------------|------------------------------------------|
/// | `memory://`        | fresh in-process [`MemoryBroker`]        |
/// | `amqp://`, `amqps://` | lapin (requires `transport_lapin`)    |
///
/// No network I/O happens here; the connection is opened lazily by the
/// `ConnectionManager`.
///
/// # Errors
///
/// Returns [`RpcError::InvalidConfig`] for an unknown scheme, or for an AMQP
/// URI when the crate was built without the `transport_lapin` feature.
pub fn create_connector(config: &RpcConfig) -> Result<ConnectorPtr> {
    // ---
    let uri = config.broker_uri.as_str();

    match uri.split_once("://").map(|(scheme, _)| scheme) {
        Some("memory") => Ok(Arc::new(MemoryConnector::new(MemoryBroker::new()))),
        Some("amqp") | Some("amqps") => create_amqp_connector(uri),
        _ => Err(RpcError::InvalidConfig(format!(
            "unsupported broker uri: {uri}, expected amqp://, amqps:// or memory://"
        ))),
    }
}

#[cfg(feature = "transport_lapin")]
fn create_amqp_connector(uri: &str) -> Result<ConnectorPtr> {
    Ok(Arc::new(LapinConnector::new(uri)))
}

#[cfg(not(feature = "transport_lapin"))]
fn create_amqp_connector(_uri: &str) -> Result<ConnectorPtr> {
    Err(RpcError::InvalidConfig(
        "amqp broker uri requires the transport_lapin feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_memory_scheme_builds_connector() {
        // ---
        let config = RpcConfig::memory();
        let connector = create_connector(&config).expect("memory connector");
        let connection = connector.connect().await.expect("connect");
        assert!(connection.is_connected());
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        // ---
        let config = RpcConfig::with_broker("kafka://localhost:9092");
        assert!(matches!(
            create_connector(&config),
            Err(RpcError::InvalidConfig(_))
        ));
    }

    #[cfg(not(feature = "transport_lapin"))]
    #[test]
    fn test_amqp_requires_feature() {
        // ---
        let config = RpcConfig::with_broker("amqp://localhost:5672/%2f");
        assert!(matches!(
            create_connector(&config),
            Err(RpcError::InvalidConfig(_))
        ));
    }
}
