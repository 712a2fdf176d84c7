//! cloudscan - query cloud API objects as rows
//!
//! A table definition describes how to list, get and hydrate one resource
//! type. The [`engine`] fans a query out across regions, pushes qualifiers
//! down as API filters, follows pagination, enriches each item with the
//! hydrate calls the requested columns need, and streams rows back under a
//! shared row limit.

pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod resource;

pub use engine::{Engine, EngineSettings, QueryRequest, Row, RowStream};
pub use error::{ApiError, Result, ScanError};

/// Version injected at compile time via CLOUDSCAN_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDSCAN_VERSION") {
    Some(v) => v,
    None => "dev",
};
