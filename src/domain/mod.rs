//! Domain layer public interface.
//!
//! This module defines the broker abstractions the requester and responder
//! are written against. Nothing here names a concrete client library; the
//! backends under `src/transport/` implement these traits.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod broker;
mod envelope;

// --- Broker domain re-exports ---

pub use broker::{
    //
    Channel,
    ChannelPtr,
    Connection,
    ConnectionPtr,
    ConsumeOptions,
    ConsumerHandle,
    Connector,
    ConnectorPtr,
    Delivery,
    QueueOptions,
};

pub use envelope::{
    //
    Address,
    Envelope,
    ERROR_KIND,
    JSON_CONTENT_TYPE,
};
