//! Auth RPC round trip inside one process, on the in-memory broker.
//!
//! Run with: cargo run --example auth_rpc_memory
//!
//! Set `RUST_LOG=lms_rpc=debug` to watch the reply queue come and go.
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{AuthUser, LoginRequest, LOGIN};
use lms_rpc::{
    create_connector, CallOutcome, ConnectionManager, EventRouter, RequestEnvelope, RpcConfig,
    RpcError, RpcRequester, RpcResponder,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_logging();

    let config = RpcConfig::memory().with_request_timeout(Duration::from_secs(2));
    let connections = Arc::new(ConnectionManager::new(create_connector(&config)?));

    let router = EventRouter::new().register(LOGIN, |req: LoginRequest| async move {
        common::verify(&req.token).ok_or_else(|| RpcError::Handler("invalid token".into()))
    });

    let auth = RpcResponder::new(connections.clone())
        .serve(&config.auth_queue, router)
        .await?;

    let requester = RpcRequester::new(connections.clone()).with_timeout(config.request_timeout);

    for token in ["student-token", "forged-token"] {
        let request = RequestEnvelope::new(
            LOGIN,
            LoginRequest {
                token: token.to_string(),
            },
        );

        match requester.call(&config.auth_queue, &request).await {
            CallOutcome::Reply(value) => {
                let user: AuthUser = serde_json::from_value(value)?;
                println!("{token}: user {} with role {}", user._id, user.role);
            }
            other => println!("{token}: {other:?}"),
        }
    }

    // nobody serves this queue, so the call runs into its window
    let outcome = requester
        .call_with_timeout(
            "NO_SUCH_SERVICE",
            &RequestEnvelope::new(LOGIN, serde_json::json!({})),
            Duration::from_millis(250),
        )
        .await;
    println!("unserved queue: {}", outcome.into_legacy_value());

    auth.shutdown().await?;
    connections.shutdown().await?;
    Ok(())
}
