//! Fixture provider
//!
//! Serves canned API responses from a JSON document, for offline runs and
//! tests. Every call is recorded so callers can check what was requested.
//!
//! ```json
//! {
//!   "regions": ["us-east-1", "eu-west-1"],
//!   "not_opted_in": ["af-south-1"],
//!   "service_regions": { "sns": ["us-east-1"] },
//!   "tables": {
//!     "aws_sns_topic": {
//!       "us-east-1": { "items": [{"TopicArn": "..."}], "page_size": 2,
//!                      "fail_after_pages": 1, "error": {"code": "Throttling"} }
//!     }
//!   },
//!   "get": { "aws_iam_role": { "global": { "admin": { "value": {...} } } } },
//!   "hydrate": { "GetTopicAttributes": { "<natural key>": { "value": {...} }, "*": { ... } } }
//! }
//! ```

use super::{GetRequest, HydrateRequest, ListRequest, Page, Provider};
use crate::engine::matrix::{Partition, RegionData};
use crate::engine::qualifier::{ApiFilter, Operator};
use crate::engine::ExecutionContext;
use crate::error::ApiError;
use crate::resource::projection::lookup_path;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Key used in `hydrate` and `get` maps to match any item
pub const WILDCARD_KEY: &str = "*";

/// Canned list responses for one (table, scope)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeFixture {
    #[serde(default)]
    pub items: Vec<Value>,
    /// Largest page the fake server returns
    #[serde(default)]
    pub page_size: Option<usize>,
    /// Error returned once `fail_after_pages` pages were served
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub fail_after_pages: usize,
    /// Artificial latency per page
    #[serde(default)]
    pub delay_ms: u64,
    /// Keep returning the first page's cursor
    #[serde(default)]
    pub repeat_cursor: bool,
}

/// A canned value or error
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureResponse {
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Root of a fixture document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub not_opted_in: Vec<String>,
    #[serde(default)]
    pub regions_error: Option<ApiError>,
    #[serde(default)]
    pub service_regions: HashMap<String, Vec<String>>,
    /// table -> scope name -> responses
    #[serde(default)]
    pub tables: HashMap<String, HashMap<String, ScopeFixture>>,
    /// table -> scope name -> joined key values -> response
    #[serde(default)]
    pub get: HashMap<String, HashMap<String, HashMap<String, FixtureResponse>>>,
    /// operation -> natural key -> response
    #[serde(default)]
    pub hydrate: HashMap<String, HashMap<String, FixtureResponse>>,
}

/// A recorded list call
#[derive(Debug, Clone, PartialEq)]
pub struct ListCall {
    pub table: String,
    pub scope: String,
    pub filters: Vec<ApiFilter>,
    pub cursor: Option<String>,
    pub page_size: Option<u32>,
    /// Index of the first item the call asked for
    pub offset: usize,
    /// Items the call returned
    pub returned: usize,
}

#[derive(Debug, Default)]
struct CallLog {
    lists: Vec<ListCall>,
    gets: Vec<(String, String)>,
    /// (operation, natural key)
    hydrates: Vec<(String, String)>,
}

/// Provider backed by a fixture document
#[derive(Debug, Default)]
pub struct FixtureProvider {
    data: FixtureData,
    calls: Mutex<CallLog>,
}

impl FixtureProvider {
    pub fn new(data: FixtureData) -> Self {
        Self {
            data,
            calls: Mutex::new(CallLog::default()),
        }
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let data: FixtureData =
            serde_json::from_str(content).context("Failed to parse fixture JSON")?;
        Ok(Self::new(data))
    }

    pub fn from_value(value: Value) -> anyhow::Result<Self> {
        let data: FixtureData = serde_json::from_value(value).context("Invalid fixture")?;
        Ok(Self::new(data))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// Every list call so far, in order
    pub fn list_calls(&self) -> Vec<ListCall> {
        self.log(|log| log.lists.clone())
    }

    /// Number of list calls made in one scope
    pub fn list_call_count(&self, table: &str, scope: &str) -> usize {
        self.log(|log| {
            log.lists
                .iter()
                .filter(|c| c.table == table && c.scope == scope)
                .count()
        })
    }

    pub fn get_call_count(&self) -> usize {
        self.log(|log| log.gets.len())
    }

    /// Number of times `operation` ran for the item with `key`
    pub fn hydrate_call_count(&self, operation: &str, key: &str) -> usize {
        self.log(|log| {
            log.hydrates
                .iter()
                .filter(|(op, k)| op == operation && k == key)
                .count()
        })
    }

    pub fn total_calls(&self) -> usize {
        self.log(|log| log.lists.len() + log.gets.len() + log.hydrates.len())
    }

    fn log<T>(&self, f: impl FnOnce(&mut CallLog) -> T) -> T {
        let mut guard = match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

async fn delay(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Server-side filtering on fields named like the filter.
/// Filters naming no field of the item are not applied.
fn matches_filters(item: &Value, filters: &[ApiFilter]) -> bool {
    filters
        .iter()
        .filter(|f| f.operator == Operator::Eq)
        .all(|filter| match lookup_path(item, &filter.name) {
            None => true,
            Some(Value::String(s)) => filter.values.contains(s),
            Some(Value::Null) => false,
            Some(other) => filter.values.contains(&other.to_string()),
        })
}

fn respond(response: &FixtureResponse) -> Result<Value, ApiError> {
    if let Some(err) = &response.error {
        return Err(err.clone());
    }
    Ok(response.value.clone().unwrap_or(Value::Null))
}

/// Where the next page starts. Encoded in the cursor so a smaller page size
/// on a later call never re-serves items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PagePosition {
    page: usize,
    offset: usize,
}

impl PagePosition {
    fn parse(cursor: &str) -> Option<Self> {
        let (page, offset) = cursor.split_once('/')?;
        Some(Self {
            page: page.strip_prefix("page-")?.parse().ok()?,
            offset: offset.strip_prefix("offset-")?.parse().ok()?,
        })
    }

    fn cursor(self) -> String {
        format!("page-{}/offset-{}", self.page, self.offset)
    }
}

fn serve_page(
    fixture: &ScopeFixture,
    request: &ListRequest<'_>,
    position: PagePosition,
) -> Result<Page, ApiError> {
    if let Some(err) = &fixture.error {
        if position.page >= fixture.fail_after_pages {
            return Err(err.clone());
        }
    }

    let items: Vec<&Value> = fixture
        .items
        .iter()
        .filter(|item| matches_filters(item, request.filters))
        .collect();

    let server_max = fixture.page_size.unwrap_or(items.len().max(1));
    let size = match request.page_size {
        Some(requested) => server_max.min(requested as usize).max(1),
        None => server_max,
    };

    let start = position.offset.min(items.len());
    let end = (start + size).min(items.len());
    let page_items: Vec<Value> = items[start..end].iter().map(|v| (*v).clone()).collect();

    let next = PagePosition {
        page: position.page + 1,
        offset: end,
    };
    let error_pending = fixture.error.is_some() && fixture.fail_after_pages > position.page;
    let next_cursor = match request.cursor {
        Some(cursor) if fixture.repeat_cursor => Some(cursor.to_string()),
        _ if end < items.len() || error_pending => Some(next.cursor()),
        _ => None,
    };

    Ok(Page {
        items: page_items,
        next_cursor,
    })
}

#[async_trait]
impl Provider for FixtureProvider {
    async fn enabled_regions(&self, partition: Partition) -> Result<RegionData, ApiError> {
        if let Some(err) = &self.data.regions_error {
            return Err(err.clone());
        }
        if self.data.regions.is_empty() {
            return Ok(RegionData::from_partition(partition));
        }
        let mut all = self.data.regions.clone();
        all.extend(self.data.not_opted_in.iter().cloned());
        Ok(RegionData {
            all,
            enabled: self.data.regions.clone(),
        })
    }

    async fn service_regions(&self, service: &str) -> Result<Option<Vec<String>>, ApiError> {
        Ok(self.data.service_regions.get(service).cloned())
    }

    async fn list(&self, ctx: &ExecutionContext, request: &ListRequest<'_>) -> Result<Page, ApiError> {
        let table = ctx.table.name.as_str();
        let scope = ctx.scope.name();
        let position = match request.cursor {
            None => Some(PagePosition::default()),
            Some(cursor) => PagePosition::parse(cursor),
        };
        let mut call = ListCall {
            table: table.to_string(),
            scope: scope.to_string(),
            filters: request.filters.to_vec(),
            cursor: request.cursor.map(String::from),
            page_size: request.page_size,
            offset: position.map_or(0, |p| p.offset),
            returned: 0,
        };

        let Some(position) = position else {
            self.log(|log| log.lists.push(call));
            return Err(ApiError::new(
                "InvalidNextToken",
                request.cursor.unwrap_or_default().to_string(),
            ));
        };
        let Some(fixture) = self.data.tables.get(table).and_then(|t| t.get(scope)) else {
            self.log(|log| log.lists.push(call));
            return Ok(Page::default());
        };

        let page = serve_page(fixture, request, position);
        call.returned = page.as_ref().map_or(0, |p| p.items.len());
        self.log(|log| log.lists.push(call));

        delay(fixture.delay_ms).await;
        page
    }

    async fn get(
        &self,
        ctx: &ExecutionContext,
        request: &GetRequest<'_>,
    ) -> Result<Option<Value>, ApiError> {
        let table = ctx.table.name.as_str();
        let scope = ctx.scope.name();
        let key_columns = ctx
            .table
            .def
            .get
            .as_ref()
            .map(|g| g.key_columns.clone())
            .unwrap_or_default();
        let key = key_columns
            .iter()
            .filter_map(|c| request.keys.get(c))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/");
        self.log(|log| log.gets.push((table.to_string(), key.clone())));

        let Some(response) = self
            .data
            .get
            .get(table)
            .and_then(|t| t.get(scope))
            .and_then(|s| s.get(&key))
        else {
            return Ok(None);
        };
        delay(response.delay_ms).await;
        respond(response).map(Some)
    }

    async fn hydrate(
        &self,
        _ctx: &ExecutionContext,
        request: &HydrateRequest<'_>,
    ) -> Result<Value, ApiError> {
        let operation = request.node.operation.as_str();
        self.log(|log| {
            log.hydrates
                .push((operation.to_string(), request.key.to_string()))
        });

        let responses = self.data.hydrate.get(operation);
        let response = responses
            .and_then(|r| r.get(request.key))
            .or_else(|| responses.and_then(|r| r.get(WILDCARD_KEY)));
        let Some(response) = response else {
            return Err(ApiError::new(
                "NotFound",
                format!("no fixture for {} {}", operation, request.key),
            ));
        };
        delay(response.delay_ms).await;
        respond(response)
    }
}
