// src/transport/memory/mod.rs

//! In-memory broker.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Connector`/`Connection`/`Channel` traits. It is intended primarily for
//! testing, local execution, and as a reference for broker semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory broker defines the **reference behavior** the RPC layer is
//! written against. The lapin backend approximates it against RabbitMQ and
//! documents any deviation.
//!
//! - Queues are addressed by name through the default exchange; publishing
//!   to a missing queue silently drops the message.
//! - An empty queue name on declare yields a generated `amq.gen-*` name.
//! - Exclusive queues belong to the declaring channel and are deleted when
//!   it closes. Auto-delete queues are deleted when their last consumer goes.
//! - Ready messages are dispatched round-robin to consumers with spare
//!   prefetch capacity.
//! - Unacknowledged deliveries are requeued, flagged as redelivered, when the
//!   owning channel closes.
//!
//! ## Non-Goals
//!
//! Persistence, exchanges other than the default one, and network failure
//! simulation beyond refusing new connections.

mod broker;
mod connection;

pub use broker::MemoryBroker;
pub use connection::MemoryConnector;
