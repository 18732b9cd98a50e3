//! # Stampede core
//!
//! Pure logic for the stampede load generator: run-list parsing and
//! expansion, cookbook artifact types and download planning, convergence
//! telemetry records, and the request profile aggregator.
//!
//! Nothing in this crate performs I/O. The backend is reached through the
//! [`RoleSource`] seam, implemented by `stampede-client`; everything else
//! is data in, data out, which is what makes the expansion and profiling
//! logic testable without a server.

#![deny(unsafe_code)]

pub mod cookbook;
pub mod error;
pub mod node;
pub mod profile;
pub mod record;
pub mod run_list;
pub mod synthetic;

pub use cookbook::{download_plan, Cookbook, CookbookFile, Cookbooks};
pub use error::CoreError;
pub use node::Node;
pub use profile::{ProfileRow, RequestProfile, RequestRecord, RequestTally};
pub use run_list::{
    parse, parse_entries, parse_strict, ItemKind, ParsedEntry, Role, RoleSource, RunList,
    RunListItem,
};
