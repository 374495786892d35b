use std::collections::HashMap;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{RequestEnvelope, Result, RpcError};

/// Boxed, sendable future returned by request handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Turns a raw request body into a raw reply body.
///
/// The responder hands over the payload exactly as it was published and
/// publishes whatever bytes come back. An `Err` is answered with an error
/// reply rather than dropped, so the caller learns why.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>>;
}

/// Shared handler pointer.
pub type HandlerPtr = Arc<dyn RequestHandler>;

impl<H> RequestHandler for Arc<H>
where
    H: RequestHandler + ?Sized,
{
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        (**self).handle(payload)
    }
}

/// Handler built from a closure; see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure over raw bytes as a [`RequestHandler`].
///
/// ```
/// # use lms_rpc::handler_fn;
/// # use bytes::Bytes;
/// let echo = handler_fn(|payload: Bytes| async move { Ok(payload) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    FnHandler { f }
}

impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes>> + Send + 'static,
{
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        Box::pin((self.f)(payload))
    }
}

/// Type-erased typed handler: takes the request's `data`, returns the
/// encoded reply.
type EventFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Bytes>> + Send + Sync>;

/// Dispatches requests to typed handlers by their `event` name.
///
/// The router decodes the `{"event", "data"}` body, deserializes `data` into
/// the handler's argument type and encodes the handler's return value as
/// JSON. A request naming an event nobody registered fails with
/// [`RpcError::UnknownEvent`].
///
/// # Example
///
/// ```
/// use lms_rpc::{EventRouter, RpcError};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize)]
/// struct Login { token: String }
///
/// #[derive(Serialize)]
/// struct User { _id: String, role: u8 }
///
/// let router = EventRouter::new().register("LOGIN", |req: Login| async move {
///     if req.token.is_empty() {
///         return Err(RpcError::Handler("missing token".into()));
///     }
///     Ok(User { _id: "u1".into(), role: 0 })
/// });
/// assert!(router.handles("LOGIN"));
/// ```
#[derive(Clone, Default)]
pub struct EventRouter {
    // ---
    handlers: HashMap<String, EventFn>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any earlier registration.
    pub fn register<F, Fut, TReq, TResp>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
    {
        // ---
        let handler = Arc::new(handler);

        let erased: EventFn = Arc::new(move |data: Value| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                // ---
                let request: TReq = serde_json::from_value(data)
                    .map_err(|e| RpcError::InvalidPayload(format!("request data: {e}")))?;

                let response = handler(request).await?;
                Ok(Bytes::from(serde_json::to_vec(&response)?))
            }) as BoxFuture<'static, Result<Bytes>>
        });

        self.handlers.insert(event.into(), erased);
        self
    }

    /// Whether a handler is registered for `event`.
    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    fn route(&self, payload: &[u8]) -> Result<(EventFn, Value)> {
        // ---
        let request: RequestEnvelope = serde_json::from_slice(payload)
            .map_err(|e| RpcError::InvalidPayload(format!("request body: {e}")))?;

        let handler = self
            .handlers
            .get(&request.event)
            .cloned()
            .ok_or(RpcError::UnknownEvent(request.event))?;

        Ok((handler, request.data))
    }
}

impl RequestHandler for EventRouter {
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes>> {
        // ---
        match self.route(&payload) {
            Ok((handler, data)) => handler(data),
            Err(e) => Box::pin(future::ready(Err(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Login {
        token: String,
    }

    fn router() -> EventRouter {
        EventRouter::new()
            .register("LOGIN", |req: Login| async move {
                Ok(json!({ "_id": "u1", "token": req.token }))
            })
            .register("PING", |_: Value| async move { Ok("pong") })
    }

    fn body(value: Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&value).unwrap())
    }

    #[tokio::test]
    async fn test_router_dispatches_by_event() {
        // ---
        let reply = router()
            .handle(body(json!({"event": "LOGIN", "data": {"token": "abc"}})))
            .await
            .expect("login reply");

        let value: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(value, json!({"_id": "u1", "token": "abc"}));

        let reply = router()
            .handle(body(json!({"event": "PING", "data": null})))
            .await
            .expect("ping reply");
        assert_eq!(&reply[..], br#""pong""#);
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected() {
        // ---
        let err = router()
            .handle(body(json!({"event": "LOGOUT", "data": {}})))
            .await
            .unwrap_err();

        assert!(matches!(err, RpcError::UnknownEvent(e) if e == "LOGOUT"));
    }

    #[tokio::test]
    async fn test_malformed_request_is_invalid_payload() {
        // ---
        let err = router()
            .handle(Bytes::from_static(b"not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidPayload(_)));

        let err = router()
            .handle(body(json!({"event": "LOGIN", "data": {"user": 1}})))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_handler_fn_passes_raw_bytes() {
        // ---
        let echo = handler_fn(|payload: Bytes| async move { Ok(payload) });
        let reply = echo.handle(Bytes::from_static(b"raw")).await.unwrap();
        assert_eq!(&reply[..], b"raw");
    }
}
