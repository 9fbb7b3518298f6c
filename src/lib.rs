//! # skiff
//!
//! Example service built on the skiff runtime: a registry mapping service
//! names to network endpoints. The types in [`types`] are what a code
//! generator would emit for the registry's IDL.

pub mod client;
pub mod service;
pub mod types;

pub use client::{EndpointClient, LookupError};
pub use service::{processor, EndpointService, InMemoryRegistry};
pub use types::{Endpoint, NotFound};
