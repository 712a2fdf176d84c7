//! HTTP provider for JSON REST endpoints
//!
//! Requests are built from the table definitions: the endpoint template picks
//! the host per service and region, operation paths fill `{Field}` placeholders
//! from the item, the get keys or a dependency's output (`{node.Field}`).
//! Tables may add query parameters per scope kind (global or regional).

use super::{GetRequest, HydrateRequest, ListRequest, Page, Provider};
use crate::engine::matrix::{Partition, RegionData};
use crate::engine::qualifier::Operator;
use crate::engine::ExecutionContext;
use crate::error::ApiError;
use crate::resource::projection::lookup_path;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and drops control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Provider speaking JSON over HTTP
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    /// e.g. `https://{service}.{region}.example.com`
    endpoint: String,
    regions_url: Option<String>,
    endpoints_url: Option<String>,
}

impl HttpProvider {
    /// Create a provider for an endpoint template containing `{service}` and/or `{region}`
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            regions_url: None,
            endpoints_url: None,
        })
    }

    /// Document listing the account's regions (`Regions[].RegionName`, `OptInStatus`)
    pub fn with_regions_url(mut self, url: impl Into<String>) -> Self {
        self.regions_url = Some(url.into());
        self
    }

    /// Document mapping services to the regions they are offered in
    pub fn with_endpoints_url(mut self, url: impl Into<String>) -> Self {
        self.endpoints_url = Some(url.into());
        self
    }

    fn base_url(&self, service: &str, region: &str) -> String {
        self.endpoint
            .replace("{service}", service)
            .replace("{region}", region)
    }

    fn build_url(&self, ctx: &ExecutionContext, path: &str) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.base_url(&ctx.table.def.service, ctx.region()), path);
        Url::parse(&raw).map_err(|e| ApiError::new("InvalidEndpoint", format!("{}: {}", raw, e)))
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>, ApiError> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::new("RequestError", e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::new("RequestError", e.to_string()))?;

        if !status.is_success() {
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            let error = parse_error(status, &body);
            if status == StatusCode::NOT_FOUND && error.code == "NotFound" {
                return Ok(None);
            }
            return Err(error);
        }

        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ApiError::new("InvalidResponse", format!("Failed to parse response JSON: {}", e)))
    }

    async fn fetch(&self, url: &str) -> Result<Value, ApiError> {
        match self.get_json(url).await? {
            Some(value) => Ok(value),
            None => Err(ApiError::new("NotFound", url.to_string()).with_status(404)),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn enabled_regions(&self, partition: Partition) -> Result<RegionData, ApiError> {
        let Some(url) = &self.regions_url else {
            return Ok(RegionData::from_partition(partition));
        };

        let body = self.fetch(url).await?;
        let regions = body
            .get("Regions")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ApiError::new("InvalidResponse", "missing Regions"))?;

        let mut data = RegionData::default();
        for region in regions {
            let Some(name) = region.get("RegionName").and_then(|v| v.as_str()) else {
                continue;
            };
            data.all.push(name.to_string());
            let opt_in = region.get("OptInStatus").and_then(|v| v.as_str());
            if opt_in != Some("not-opted-in") {
                data.enabled.push(name.to_string());
            }
        }
        Ok(data)
    }

    async fn service_regions(&self, service: &str) -> Result<Option<Vec<String>>, ApiError> {
        let Some(url) = &self.endpoints_url else {
            return Ok(None);
        };

        let body = self.fetch(url).await?;
        let regions = body
            .get("services")
            .and_then(|s| s.get(service))
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|r| r.as_str().map(String::from))
                    .collect()
            });
        Ok(regions)
    }

    async fn list(&self, ctx: &ExecutionContext, request: &ListRequest<'_>) -> Result<Page, ApiError> {
        let def = &ctx.table.def.list;
        let path = expand_template(&def.path, |name| match name {
            "region" => Some(ctx.region().to_string()),
            _ => None,
        })?;
        let mut url = self.build_url(ctx, &path)?;

        {
            let mut query = url.query_pairs_mut();
            for (name, value) in def.scope_params.for_scope(&ctx.scope) {
                query.append_pair(name, value);
            }
            for filter in request.filters {
                let name = filter_param(&filter.name, filter.operator);
                for value in &filter.values {
                    query.append_pair(&name, value);
                }
            }
            if let (Some(param), Some(size)) = (&def.page_size_param, request.page_size) {
                query.append_pair(param, &size.to_string());
            }
            if let Some(cursor) = request.cursor {
                query.append_pair(&def.token_param, cursor);
            }
        }

        let body = self.fetch(url.as_str()).await?;
        let items = lookup_path(&body, &def.items_path)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let next_cursor = lookup_path(&body, &def.next_token_path)
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(Page { items, next_cursor })
    }

    async fn get(
        &self,
        ctx: &ExecutionContext,
        request: &GetRequest<'_>,
    ) -> Result<Option<Value>, ApiError> {
        let Some(def) = &ctx.table.def.get else {
            return Ok(None);
        };
        let path = expand_template(&def.path, |name| match name {
            "region" => Some(ctx.region().to_string()),
            _ => request.keys.get(name).map(render),
        })?;
        let mut url = self.build_url(ctx, &path)?;
        append_params(&mut url, def.scope_params.for_scope(&ctx.scope));

        self.get_json(url.as_str()).await
    }

    async fn hydrate(
        &self,
        ctx: &ExecutionContext,
        request: &HydrateRequest<'_>,
    ) -> Result<Value, ApiError> {
        let path = expand_template(&request.node.path, |name| {
            if name == "region" {
                return Some(ctx.region().to_string());
            }
            placeholder_value(name, request.item, request.dependencies)
        })?;
        let mut url = self.build_url(ctx, &path)?;
        append_params(&mut url, request.node.scope_params.for_scope(&ctx.scope));

        self.fetch(url.as_str()).await
    }
}

fn append_params(url: &mut Url, params: &BTreeMap<String, String>) {
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
}

/// Query parameter name for a filter; equality uses the bare name
fn filter_param(name: &str, operator: Operator) -> String {
    let suffix = match operator {
        Operator::Eq => return name.to_string(),
        Operator::Ne => "ne",
        Operator::Lt => "lt",
        Operator::Le => "lte",
        Operator::Gt => "gt",
        Operator::Ge => "gte",
    };
    format!("{}.{}", name, suffix)
}

/// `{Field}` reads the item, `{node.Field}` reads a dependency's output
fn placeholder_value(
    name: &str,
    item: &Value,
    dependencies: &BTreeMap<String, Value>,
) -> Option<String> {
    if let Some((head, rest)) = name.split_once('.') {
        if let Some(dep) = dependencies.get(head) {
            return lookup_path(dep, rest).map(render);
        }
    }
    lookup_path(item, name).map(render)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace `{name}` placeholders with URL-encoded values
fn expand_template(
    template: &str,
    resolve: impl Fn(&str) -> Option<String>,
) -> Result<String, ApiError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(ApiError::new(
                "InvalidParameter",
                format!("unterminated placeholder in {}", template),
            ));
        };
        let name = &after[..end];
        let value = resolve(name).ok_or_else(|| {
            ApiError::new("MissingParameter", format!("no value for {{{}}} in {}", name, template))
        })?;
        out.push_str(&urlencoding::encode(&value));
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Pull an error code and message out of a failed response
fn parse_error(status: StatusCode, body: &str) -> ApiError {
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let code = ["error.code", "Error.Code", "__type", "code"]
        .iter()
        .find_map(|path| lookup_path(&json, path).and_then(|v| v.as_str()))
        .map(|code| code.rsplit('#').next().unwrap_or(code).to_string());
    let message = ["error.message", "Error.Message", "message", "Message"]
        .iter()
        .find_map(|path| lookup_path(&json, path).and_then(|v| v.as_str()))
        .unwrap_or("")
        .to_string();

    let code = code.unwrap_or_else(|| match status {
        StatusCode::NOT_FOUND => "NotFound".to_string(),
        _ => format!("HTTP{}", status.as_u16()),
    });

    ApiError::new(code, message).with_status(status.as_u16())
}
