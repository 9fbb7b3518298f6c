//! # skiff-server
//!
//! TCP server for skiff services.
//!
//! This crate provides:
//! - A method registry that dispatches CALL and ONEWAY messages to typed handlers
//! - Per-connection read loop with a single serialized writer
//! - Per-method call statistics
//! - YAML and environment configuration

pub mod config;
pub mod error;
pub mod processor;
pub mod server;
pub mod stats;

pub use config::{Config, ConfigError, DispatchConfig, NetworkConfig, ProtocolConfig};
pub use error::ServerError;
pub use processor::{DispatchError, Dispatched, Processor, ProcessorBuilder};
pub use server::{Server, ServerConfig, ServerStats};
pub use stats::{MethodSnapshot, MethodStats};
