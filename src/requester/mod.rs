//! RPC requester: publishes a request and waits for its correlated reply.
mod reply;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time;

use crate::policy::DEFAULT_CALL_TIMEOUT;
use crate::{
    // ---
    log_debug,
    log_warn,
    Address,
    CallOutcome,
    ChannelPtr,
    ConnectionManager,
    ConsumeOptions,
    CorrelationId,
    Envelope,
    QueueOptions,
    RequestEnvelope,
    Result,
};
use reply::await_reply;

/// Calls responders over the broker.
///
/// Every call gets its own channel, its own exclusive server-named reply
/// queue and a fresh [`CorrelationId`], so concurrent calls on one requester
/// never see each other's replies. The requester is cheap to clone; clones
/// share the connection manager.
///
/// # Example
///
/// ```no_run
/// use lms_rpc::{ConnectionManager, RequestEnvelope, RpcRequester, CallOutcome};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example(connections: Arc<ConnectionManager>) {
/// let requester = RpcRequester::new(connections);
///
/// let outcome = requester
///     .call("AUTH_RPC", &RequestEnvelope::new("LOGIN", json!({ "token": "abc" })))
///     .await;
///
/// match outcome {
///     CallOutcome::Reply(user) => println!("authenticated: {user}"),
///     CallOutcome::TimedOut => println!("auth service did not answer"),
///     other => println!("auth failed: {other:?}"),
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct RpcRequester {
    // ---
    connections: Arc<ConnectionManager>,
    timeout: Duration,
}

impl RpcRequester {
    /// Create a requester with the default 8 s call window.
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the call window used by [`call`](Self::call).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured call window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` to `queue` and wait for the reply.
    ///
    /// Never fails: broker errors, timeouts and handler failures all come
    /// back as a [`CallOutcome`] variant.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future before it resolves (an outer timeout, a
    /// losing `select!` branch) still releases the call's channel, reply
    /// queue and consumer: the close runs on a spawned task.
    pub async fn call<T>(&self, queue: &str, request: &RequestEnvelope<T>) -> CallOutcome
    where
        T: Serialize,
    {
        self.call_with_timeout(queue, request, self.timeout).await
    }

    /// Like [`call`](Self::call), with a window for this call only.
    pub async fn call_with_timeout<T>(
        &self,
        queue: &str,
        request: &RequestEnvelope<T>,
        timeout: Duration,
    ) -> CallOutcome
    where
        T: Serialize,
    {
        // ---
        let payload = match serde_json::to_vec(request) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                log_warn!("could not encode {} request: {e}", request.event);
                return CallOutcome::InvalidPayload(e.to_string());
            }
        };

        let channel = match self.connections.get_channel().await {
            Ok(channel) => CallChannel::new(channel),
            Err(e) => {
                log_warn!("rpc request to {queue} failed: {e}");
                return CallOutcome::ConnectionFailed(e.to_string());
            }
        };

        let outcome = match Self::exchange(channel.get(), queue, payload, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_warn!("rpc request to {queue} failed: {e}");
                CallOutcome::ConnectionFailed(e.to_string())
            }
        };

        // closing the channel drops the exclusive reply queue with it
        channel.close().await;

        outcome
    }

    /// One request/reply exchange on a dedicated channel.
    async fn exchange(
        channel: &ChannelPtr,
        queue: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<CallOutcome> {
        // ---
        let reply_queue = channel.declare_queue("", QueueOptions::reply_queue()).await?;
        let correlation_id = CorrelationId::generate();

        // consume before publishing so even an instant reply has a taker
        let mut consumer = channel
            .consume(&reply_queue, ConsumeOptions::auto_ack())
            .await?;

        let request = Envelope::request(
            Address::from(queue),
            payload,
            correlation_id.shared(),
            reply_queue.clone(),
        );
        channel.publish(request).await?;

        log_debug!("sent request {correlation_id} to {queue}, replies on {reply_queue}");

        let outcome = match time::timeout(timeout, await_reply(&mut consumer.inbox, &correlation_id))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                log_warn!("no reply from {queue} within {timeout:?} for {correlation_id}");
                CallOutcome::TimedOut
            }
        };

        if let Err(_e) = channel.cancel(&consumer.tag).await {
            log_debug!("cancelling reply consumer failed: {_e}");
        }

        Ok(outcome)
    }
}

/// The channel of one call; closed even if the call future is dropped.
struct CallChannel {
    channel: ChannelPtr,
    armed: bool,
}

impl CallChannel {
    fn new(channel: ChannelPtr) -> Self {
        Self {
            channel,
            armed: true,
        }
    }

    fn get(&self) -> &ChannelPtr {
        &self.channel
    }

    async fn close(mut self) {
        // ---
        if let Err(_e) = self.channel.close().await {
            log_debug!("closing requester channel failed: {_e}");
        }
        self.armed = false;
    }
}

impl Drop for CallChannel {
    fn drop(&mut self) {
        // ---
        if !self.armed {
            return;
        }

        let channel = Arc::clone(&self.channel);
        log_debug!("rpc call dropped before completion, closing channel {}", channel.id());

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(_e) = channel.close().await {
                        log_debug!("closing abandoned requester channel failed: {_e}");
                    }
                });
            }
            Err(_) => {
                log_warn!("rpc call dropped outside a runtime, channel {} left open", channel.id());
            }
        }
    }
}
