//! # Stampede client
//!
//! HTTP collaborators for the load generator: the management-server API
//! client (node CRUD, role and environment lookup, dependency solving,
//! cookbook file downloads, proxied telemetry) and the direct telemetry
//! collector client.
//!
//! Every request both clients make reports its `(method, resolved URL,
//! status code)` to the shared request channel, which feeds the request
//! log and the profile aggregator.

#![deny(unsafe_code)]

pub mod api;
pub mod collector;
pub mod error;

pub use api::{ApiClient, ApiConfig, ApiResponse, NodeApi};
pub use collector::{CollectorClient, CollectorConfig};
pub use error::ClientError;
