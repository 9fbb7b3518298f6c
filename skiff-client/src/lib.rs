//! # skiff-client
//!
//! Client library for skiff services.
//!
//! This crate provides:
//! - A pending-call table keyed by sequence id
//! - A multiplexed connection with one read loop and serialized writes
//! - A high-level client with typed calls and request timeouts

pub mod client;
pub mod connection;
pub mod error;
pub mod pending;

pub use client::Client;
pub use connection::{CallHandle, Connection, ConnectionConfig};
pub use error::ClientError;
pub use pending::{PendingCalls, ReplyFrame};
