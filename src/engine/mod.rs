//! Enumeration engine
//!
//! Turns a query against one resource table into a stream of rows:
//!
//! - [`matrix`] - which regions (scopes) to enumerate
//! - [`qualifier`] - which qualifiers become API filters
//! - [`paginator`] - the per-scope page stream
//! - [`sink`] - the shared row limit and hydrate worker pool
//! - [`hydrate`] - per-item enrichment calls
//! - [`classify`] - ignore vs fatal errors
//! - [`query`] - ties it all together

pub mod classify;
pub mod hydrate;
pub mod matrix;
pub mod paginator;
pub mod qualifier;
pub mod query;
pub mod sink;

pub use matrix::{Partition, RegionSettings, Scope};
pub use qualifier::{Operator, Qualifier};
pub use query::{Engine, EngineSettings, QueryRequest, Row, RowStream, ScopeReport, ScopeState};

use crate::resource::ResourceTable;
use std::sync::Arc;
use uuid::Uuid;

/// One (table, scope) pair being enumerated for one query
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub table: Arc<ResourceTable>,
    pub scope: Scope,
    pub partition: Partition,
    pub query_id: Uuid,
}

impl ExecutionContext {
    pub fn new(table: Arc<ResourceTable>, scope: Scope, partition: Partition, query_id: Uuid) -> Self {
        Self {
            table,
            scope,
            partition,
            query_id,
        }
    }

    /// Region whose endpoint serves this scope
    pub fn region(&self) -> &str {
        self.scope.endpoint_region()
    }
}
