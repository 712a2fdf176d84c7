//! Providers
//!
//! A [`Provider`] performs the actual API calls for the engine. Two are
//! built in:
//!
//! - [`http::HttpProvider`] - talks to JSON-over-HTTP endpoints
//! - [`fixture::FixtureProvider`] - serves canned responses from a JSON file

pub mod fixture;
pub mod http;

use crate::engine::hydrate::HydrateNode;
use crate::engine::matrix::{Partition, RegionData};
use crate::engine::qualifier::ApiFilter;
use crate::engine::ExecutionContext;
use crate::error::ApiError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

pub use fixture::FixtureProvider;
pub use http::HttpProvider;

/// One list call
#[derive(Debug, Clone)]
pub struct ListRequest<'a> {
    pub filters: &'a [ApiFilter],
    /// Cursor returned by the previous page
    pub cursor: Option<&'a str>,
    pub page_size: Option<u32>,
}

/// One page of list results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// Get-by-key call; keys are column name -> value
#[derive(Debug, Clone)]
pub struct GetRequest<'a> {
    pub keys: &'a BTreeMap<String, Value>,
}

/// One hydrate call for one item
#[derive(Debug, Clone)]
pub struct HydrateRequest<'a> {
    pub node: &'a HydrateNode,
    /// The base item being hydrated
    pub item: &'a Value,
    /// Natural key of the item
    pub key: &'a str,
    /// Outputs of the node's dependencies, by node name
    pub dependencies: &'a BTreeMap<String, Value>,
}

/// Source of cloud API data
#[async_trait]
pub trait Provider: Send + Sync {
    /// Regions known to and enabled for the account
    async fn enabled_regions(&self, partition: Partition) -> Result<RegionData, ApiError>;

    /// Regions a service is offered in; `None` means unrestricted
    async fn service_regions(&self, _service: &str) -> Result<Option<Vec<String>>, ApiError> {
        Ok(None)
    }

    /// Fetch one page of a table's list operation in `ctx.scope`
    async fn list(&self, ctx: &ExecutionContext, request: &ListRequest<'_>) -> Result<Page, ApiError>;

    /// Fetch a single item; `Ok(None)` when it does not exist
    async fn get(
        &self,
        ctx: &ExecutionContext,
        request: &GetRequest<'_>,
    ) -> Result<Option<Value>, ApiError>;

    /// Run one hydrate node for one item
    async fn hydrate(
        &self,
        ctx: &ExecutionContext,
        request: &HydrateRequest<'_>,
    ) -> Result<Value, ApiError>;
}
