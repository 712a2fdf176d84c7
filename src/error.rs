//! Error types
//!
//! [`ApiError`] is what a provider hands back when a call fails. [`ScanError`]
//! is what the engine surfaces to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failed provider API call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Provider-specific error code, e.g. `ResourceNotFoundException`
    pub code: String,
    #[serde(default)]
    pub message: String,
    /// HTTP status when the provider speaks HTTP
    #[serde(default)]
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Errors surfaced by the engine
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("table {table} has no column named {column}")]
    UnknownColumn { table: String, column: String },

    #[error("invalid qualifier: {0}")]
    InvalidQualifier(String),

    #[error("invalid definition for table {table}: {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to discover enabled regions: {0}")]
    ScopeDiscovery(#[source] ApiError),

    #[error("{table} [{scope}]: {source}")]
    Api {
        table: String,
        scope: String,
        #[source]
        source: ApiError,
    },

    #[error("query cancelled")]
    Cancelled,
}

impl ScanError {
    pub(crate) fn invalid_table(table: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTable {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    /// The provider error code behind this failure, if any
    pub fn api_code(&self) -> Option<&str> {
        match self {
            ScanError::ScopeDiscovery(err) => Some(&err.code),
            ScanError::Api { source, .. } => Some(&source.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
