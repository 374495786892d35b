use thiserror::Error;

/// Errors that can occur while talking to the broker or running RPC calls.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The broker could not be reached or the connection was refused.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// A channel-level broker operation failed.
    #[error("channel error: {0}")]
    Channel(String),

    /// The channel was already closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Consume was attempted on a queue that does not exist.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// The queue is exclusive to another channel.
    #[error("queue is locked by another channel: {0}")]
    ResourceLocked(String),

    /// No matching reply arrived inside the call window.
    #[error("request timed out")]
    Timeout,

    /// The remote handler failed and answered with an error reply.
    #[error("handler failed: {0}")]
    Handler(String),

    /// No handler is registered for the request's event.
    #[error("no handler registered for event: {0}")]
    UnknownEvent(String),

    /// A message property required by the protocol was absent.
    #[error("message is missing the {0} property")]
    MissingProperty(&'static str),

    /// A request could not be encoded or a reply was not valid JSON.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required configuration was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Configuration was provided but could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for RPC operations
pub type Result<T> = std::result::Result<T, RpcError>;
