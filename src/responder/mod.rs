//! RPC responder: consumes a request queue and answers each request on its
//! `reply_to` queue.
mod handler;

pub use handler::{handler_fn, BoxFuture, EventRouter, FnHandler, HandlerPtr, RequestHandler};

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::policy::RESPONDER_PREFETCH;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Address,
    ChannelPtr,
    ConnectionManager,
    ConsumeOptions,
    Delivery,
    Envelope,
    QueueOptions,
    Result,
    RpcError,
};

/// Serves RPC requests from named queues.
///
/// Each [`serve`](Self::serve) opens its own channel, declares the request
/// queue, limits the consumer to one unacknowledged delivery and processes
/// requests strictly one after another: run the handler, publish the reply,
/// then ack. If several responder processes serve the same queue the broker
/// spreads requests across them.
///
/// # Example
///
/// ```no_run
/// use lms_rpc::{ConnectionManager, EventRouter, RpcResponder};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// # async fn example(connections: Arc<ConnectionManager>) -> lms_rpc::Result<()> {
/// let router = EventRouter::new().register("LOGIN", |_: Value| async move {
///     Ok(json!({ "_id": "u1", "role": 0 }))
/// });
///
/// let handle = RpcResponder::new(connections).serve("AUTH_RPC", router).await?;
/// // ...
/// handle.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcResponder {
    // ---
    connections: Arc<ConnectionManager>,
}

impl RpcResponder {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Start answering requests published to `queue`.
    ///
    /// The queue is declared non-durable, non-exclusive and not
    /// auto-deleted, so it outlives this responder and other instances may
    /// consume from it too. Processing runs on a spawned task until the
    /// returned handle is shut down or the connection closes.
    ///
    /// # Errors
    ///
    /// Returns the broker error if no channel can be opened, the queue
    /// cannot be declared, or the consumer cannot be registered.
    pub async fn serve<H>(&self, queue: &str, handler: H) -> Result<ResponderHandle>
    where
        H: RequestHandler + 'static,
    {
        // ---
        let channel = self.connections.get_channel().await?;

        let queue = channel
            .declare_queue(queue, QueueOptions::request_queue())
            .await?;
        channel.set_prefetch(RESPONDER_PREFETCH).await?;

        let consumer = channel
            .consume(&queue, ConsumeOptions::manual_ack())
            .await?;

        log_info!("serving rpc requests on {queue}");

        let task = tokio::spawn(run(
            Arc::clone(&channel),
            queue.clone(),
            Arc::new(handler) as HandlerPtr,
            consumer.inbox,
        ));

        Ok(ResponderHandle {
            queue,
            channel,
            consumer_tag: consumer.tag,
            task,
        })
    }
}

/// A running responder.
///
/// Dropping the handle leaves the responder running; call
/// [`shutdown`](Self::shutdown) to stop it.
pub struct ResponderHandle {
    // ---
    queue: Address,
    channel: ChannelPtr,
    consumer_tag: Arc<str>,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    /// The request queue being served.
    pub fn queue(&self) -> &Address {
        &self.queue
    }

    /// Whether the processing loop has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop consuming and close the responder's channel.
    ///
    /// A request that was delivered but not yet acknowledged goes back to
    /// the queue and is redelivered to another consumer. A handler that is
    /// still running finishes on its own task; its result is discarded.
    pub async fn shutdown(self) -> Result<()> {
        // ---
        log_info!("stopping rpc responder on {}", self.queue);

        self.channel.cancel(&self.consumer_tag).await?;
        self.channel.close().await?;
        self.task.abort();

        match self.task.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(RpcError::Handler(format!("responder task failed: {e}"))),
        }
    }

    /// Wait until the processing loop ends on its own, which happens when
    /// the consumer is cancelled or the connection closes.
    pub async fn join(self) -> Result<()> {
        // ---
        self.task
            .await
            .map_err(|e| RpcError::Handler(format!("responder task failed: {e}")))
    }
}

async fn run(
    channel: ChannelPtr,
    queue: Address,
    handler: HandlerPtr,
    mut inbox: tokio::sync::mpsc::UnboundedReceiver<Delivery>,
) {
    // ---
    while let Some(delivery) = inbox.recv().await {
        process(&channel, &handler, delivery).await;
    }

    log_info!("rpc responder on {queue} stopped consuming");
}

/// Answer one request and settle its delivery.
async fn process(channel: &ChannelPtr, handler: &HandlerPtr, delivery: Delivery) {
    // ---
    let Delivery {
        delivery_tag,
        envelope,
        redelivered,
    } = delivery;

    let (reply_to, correlation_id) = match (envelope.reply_to, envelope.correlation_id) {
        (Some(reply_to), Some(correlation_id)) => (reply_to, correlation_id),
        (reply_to, _) => {
            let missing = if reply_to.is_none() {
                RpcError::MissingProperty("reply_to")
            } else {
                RpcError::MissingProperty("correlation_id")
            };
            log_warn!("rejecting request on {}: {missing}", envelope.address);

            if let Err(_e) = channel.nack(delivery_tag, false).await {
                log_error!("failed to reject request {delivery_tag}: {_e}");
            }
            return;
        }
    };

    if redelivered {
        log_debug!("handling redelivered request {correlation_id}");
    }

    let reply = match run_handler(handler, envelope.payload).await {
        Ok(body) => Envelope::response(reply_to, body, correlation_id),
        Err(e) => {
            log_warn!("handler failed for request {correlation_id}: {e}");
            Envelope::error_response(reply_to, error_body(&e), correlation_id)
        }
    };

    let correlation_id = reply.correlation_id.clone();

    match channel.publish(reply).await {
        Ok(()) => {
            if let Err(_e) = channel.ack(delivery_tag).await {
                log_error!("failed to ack request {correlation_id:?}: {_e}");
            }
        }
        Err(_e) => {
            log_error!("failed to publish reply for {correlation_id:?}, requeueing: {_e}");
            if let Err(_e) = channel.nack(delivery_tag, true).await {
                log_error!("failed to requeue request {correlation_id:?}: {_e}");
            }
        }
    }
}

/// Run the handler on its own task and wait for it.
///
/// A panic stays inside that task and comes back as a handler failure, so
/// the request still gets a reply and the loop keeps consuming.
async fn run_handler(handler: &HandlerPtr, payload: Bytes) -> Result<Bytes> {
    // ---
    match tokio::spawn(handler.handle(payload)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(RpcError::Handler("handler panicked".into())),
        Err(e) => Err(RpcError::Handler(format!("handler task failed: {e}"))),
    }
}

/// `{"error": detail}` for a failed handler.
fn error_body(err: &RpcError) -> Bytes {
    // ---
    let detail = match err {
        RpcError::Handler(detail) => detail.clone(),
        other => other.to_string(),
    };
    Bytes::from(serde_json::json!({ "error": detail }).to_string())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{MemoryBroker, MemoryConnector};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryBroker>, Arc<ConnectionManager>) {
        // ---
        let broker = MemoryBroker::new();
        let connections = Arc::new(ConnectionManager::new(Arc::new(MemoryConnector::new(
            broker.clone(),
        ))));
        (broker, connections)
    }

    fn echo() -> impl RequestHandler {
        handler_fn(|payload: Bytes| async move { Ok(payload) })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_error_body_uses_handler_detail() {
        // ---
        let body = error_body(&RpcError::Handler("token expired".into()));
        assert_eq!(&body[..], br#"{"error":"token expired"}"#);

        let body = error_body(&RpcError::UnknownEvent("LOGOUT".into()));
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "no handler registered for event: LOGOUT");
    }

    #[tokio::test]
    async fn test_serve_declares_queue_with_one_consumer() {
        // ---
        let (broker, connections) = setup();

        let handle = RpcResponder::new(connections)
            .serve("AUTH_RPC", echo())
            .await
            .expect("serve");

        assert_eq!(handle.queue().as_str(), "AUTH_RPC");
        assert!(broker.queue_exists("AUTH_RPC"));
        assert_eq!(broker.consumer_count("AUTH_RPC"), 1);

        handle.shutdown().await.expect("shutdown");
        assert_eq!(broker.consumer_count("AUTH_RPC"), 0);
        // request queues outlive their responders
        assert!(broker.queue_exists("AUTH_RPC"));
    }

    #[tokio::test]
    async fn test_request_without_reply_to_is_dropped() {
        // ---
        let (broker, connections) = setup();

        let handle = RpcResponder::new(connections.clone())
            .serve("AUTH_RPC", echo())
            .await
            .expect("serve");

        let publisher = connections.get_channel().await.expect("channel");
        let mut env = Envelope::response(
            Address::from("AUTH_RPC"),
            Bytes::from_static(b"{}"),
            "cid-1".into(),
        );
        env.reply_to = None;
        publisher.publish(env).await.expect("publish");

        settle().await;

        assert_eq!(broker.message_count("AUTH_RPC"), 0);
        assert_eq!(broker.unacked_count("AUTH_RPC"), 0);

        handle.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_reply_carries_correlation_id() {
        // ---
        let (_broker, connections) = setup();

        let handle = RpcResponder::new(connections.clone())
            .serve("AUTH_RPC", echo())
            .await
            .expect("serve");

        let caller = connections.get_channel().await.expect("channel");
        let reply_queue = caller
            .declare_queue("", QueueOptions::reply_queue())
            .await
            .expect("reply queue");
        let mut consumer = caller
            .consume(&reply_queue, ConsumeOptions::auto_ack())
            .await
            .expect("consume");

        caller
            .publish(Envelope::request(
                Address::from("AUTH_RPC"),
                Bytes::from_static(br#"{"event":"PING","data":null}"#),
                "cid-42".into(),
                reply_queue.clone(),
            ))
            .await
            .expect("publish");

        let reply = tokio::time::timeout(Duration::from_secs(1), consumer.inbox.recv())
            .await
            .expect("reply in time")
            .expect("reply delivered");

        assert_eq!(reply.envelope.correlation_id.as_deref(), Some("cid-42"));
        assert_eq!(
            reply.envelope.content_type.as_deref(),
            Some(crate::JSON_CONTENT_TYPE)
        );
        assert_eq!(&reply.envelope.payload[..], br#"{"event":"PING","data":null}"#);

        handle.shutdown().await.expect("shutdown");
        caller.close().await.expect("close");
    }
}
