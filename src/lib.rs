//! Request/reply RPC over an AMQP message broker.
//!
//! Services of the learning platform ask the auth service to validate tokens
//! by publishing a `{"event", "data"}` request to its queue and waiting for
//! the correlated reply on a private, server-named reply queue. This crate
//! implements that exchange: request encoding, correlation-id matching,
//! reply-queue lifecycle, and timeout and error fallback.
//!
//! - [`RpcRequester`] makes calls and always resolves to a [`CallOutcome`].
//! - [`RpcResponder`] serves a queue with a [`RequestHandler`], usually an
//!   [`EventRouter`].
//! - [`ConnectionManager`] owns the single broker connection of a process.
//!
//! The in-memory broker ([`MemoryBroker`]) is always available and is what
//! the tests run against; the AMQP backend needs the `transport_lapin`
//! feature.

// Import all sub modules once...
mod connection;
mod domain;
mod macros;
mod outcome;
mod protocol;
mod requester;
mod responder;
mod transport;

mod rpc_config;

mod correlation;
mod error;

pub mod policy;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use requester::RpcRequester;
pub use responder::{
    //
    handler_fn,
    BoxFuture,
    EventRouter,
    FnHandler,
    HandlerPtr,
    RequestHandler,
    ResponderHandle,
    RpcResponder,
};

pub use connection::ConnectionManager;
pub use outcome::CallOutcome;
pub use protocol::{ErrorReply, ReplyEnvelope, RequestEnvelope};
pub use rpc_config::{
    //
    RpcConfig,
    DEFAULT_AUTH_QUEUE,
    ENV_AUTH_QUEUE,
    ENV_BROKER_URI,
    ENV_TIMEOUT_MS,
};

pub use correlation::CorrelationId;
pub use error::{Result, RpcError};

pub use policy::{
    //
    correlation_matches,
    DEFAULT_CALL_TIMEOUT,
    DEFAULT_CONNECT_TIMEOUT,
    ERROR_SENTINEL,
    RESPONDER_PREFETCH,
    TIMEOUT_SENTINEL,
};

pub use transport::{create_connector, MemoryBroker, MemoryConnector};

#[cfg(feature = "transport_lapin")]
pub use transport::LapinConnector;

// --- public re-exports
pub use domain::{
    //
    Address,
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    ConnectorPtr,
    ConsumeOptions,
    ConsumerHandle,
    Connector,
    Delivery,
    Envelope,
    QueueOptions,
    ERROR_KIND,
    JSON_CONTENT_TYPE,
};
