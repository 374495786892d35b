//! Validate a token against the auth service over RabbitMQ.
//!
//! Run with: cargo run --example auth_rpc_client --features transport_lapin -- <token>
//!
//! Start `auth_rpc_server` first; with no server running the call resolves
//! to the timeout sentinel after `RPC_TIMEOUT_MS` (8 s by default).
mod common;

use std::sync::Arc;

use common::{LoginRequest, LOGIN};
use lms_rpc::{create_connector, ConnectionManager, RequestEnvelope, RpcConfig, RpcRequester};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_logging();

    let token = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "student-token".to_string());

    let config = RpcConfig::from_env()?;
    let connections = Arc::new(ConnectionManager::new(create_connector(&config)?));
    let requester = RpcRequester::new(connections.clone()).with_timeout(config.request_timeout);

    let outcome = requester
        .call(&config.auth_queue, &RequestEnvelope::new(LOGIN, LoginRequest { token }))
        .await;

    println!("{outcome:?}");
    println!("legacy value: {}", outcome.into_legacy_value());

    connections.shutdown().await?;
    Ok(())
}
