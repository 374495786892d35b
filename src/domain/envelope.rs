// src/domain/envelope.rs

//! Message envelope carried by every broker backend.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Content type stamped on every request and reply.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Message type marking a reply produced by a failed handler.
pub const ERROR_KIND: &str = "error";

/// A queue name.
///
/// With the default exchange the routing key is the queue name, so an
/// `Address` is all that is needed to publish a message or consume from a
/// queue. Addresses are immutable, cheap to clone, and safe to share across
/// threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address(pub Arc<str>);

impl Address {
    /// Borrow the queue name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T> From<T> for Address
where
    T: Into<Arc<str>>,
{
    fn from(value: T) -> Self {
        Address(value.into())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque message envelope.
///
/// The payload is never interpreted by a backend. The optional fields map
/// one-to-one onto AMQP basic properties:
///
/// | field            | property         |
/// |------------------|------------------|
/// | `correlation_id` | `correlation-id` |
/// | `reply_to`       | `reply-to`       |
/// | `content_type`   | `content-type`   |
/// | `kind`           | `type`           |
///
/// # Examples
///
/// ```
/// # use lms_rpc::{Address, Envelope};
/// # use bytes::Bytes;
/// let request = Envelope::request(
///     Address::from("AUTH_RPC"),
///     Bytes::from_static(br#"{"event":"LOGIN","data":{"token":"abc"}}"#),
///     "correlation-123".into(),
///     Address::from("amq.gen-reply"),
/// );
/// assert_eq!(request.reply_to, Some(Address::from("amq.gen-reply")));
/// ```
#[derive(Clone, Debug)]
pub struct Envelope {
    // ---
    /// Destination queue.
    pub address: Address,

    /// Opaque payload bytes (JSON for everything this crate publishes).
    pub payload: Bytes,

    /// Correlation identifier pairing a request with its reply.
    pub correlation_id: Option<Arc<str>>,

    /// Queue the reply must be published to. Only set on requests.
    pub reply_to: Option<Address>,

    /// Informational payload format.
    pub content_type: Option<Arc<str>>,

    /// Message type; [`ERROR_KIND`] on replies from a failed handler.
    pub kind: Option<Arc<str>>,
}

impl Envelope {
    // ---
    /// Create a request envelope.
    ///
    /// # Arguments
    ///
    /// * `address` - Request queue of the responding service
    /// * `payload` - Encoded `RequestEnvelope`
    /// * `correlation_id` - Fresh identifier for this call
    /// * `reply_to` - Private reply queue of the caller
    pub fn request(
        address: Address,
        payload: Bytes,
        correlation_id: Arc<str>,
        reply_to: Address,
    ) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            content_type: Some(Arc::from(JSON_CONTENT_TYPE)),
            kind: None,
        }
    }

    /// Create a reply envelope carrying the handler's encoded result.
    pub fn response(address: Address, payload: Bytes, correlation_id: Arc<str>) -> Self {
        // ---
        Self {
            address,
            payload,
            correlation_id: Some(correlation_id),
            reply_to: None,
            content_type: Some(Arc::from(JSON_CONTENT_TYPE)),
            kind: None,
        }
    }

    /// Create a reply envelope reporting a handler failure.
    pub fn error_response(address: Address, payload: Bytes, correlation_id: Arc<str>) -> Self {
        // ---
        Self {
            kind: Some(Arc::from(ERROR_KIND)),
            ..Self::response(address, payload, correlation_id)
        }
    }

    /// Whether this envelope is an error reply.
    pub fn is_error(&self) -> bool {
        self.kind.as_deref() == Some(ERROR_KIND)
    }
}
