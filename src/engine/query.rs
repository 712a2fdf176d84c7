//! Query Orchestration
//!
//! [`Engine::execute`] validates a query, expands its scopes, and runs one
//! task per scope. Rows arrive on a [`RowStream`]; once it is drained,
//! [`RowStream::finish`] yields the per-scope reports or the query's error.

use super::classify::ErrorClassifier;
use super::hydrate::{HydrateCache, HydrateFailure};
use super::matrix::{expand_scopes, RegionSettings, Scope};
use super::paginator::pages;
use super::qualifier::{plan_filters, plan_key_lookup, ApiFilter, FilterPlan, KeyPlan, Qualifier};
use super::sink::{RowLimit, RowSink};
use super::ExecutionContext;
use crate::error::{ApiError, Result, ScanError};
use crate::provider::{GetRequest, Provider};
use crate::resource::projection::lookup_path;
use crate::resource::{BaseItem, Resource, ResourceTable, TableRegistry};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;
use uuid::Uuid;

/// Default hydrate worker pool size
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
/// Default number of finished rows buffered ahead of the consumer
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Engine-wide options
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub regions: RegionSettings,
    /// Error codes (or glob patterns) ignored for every table
    pub ignore_error_codes: Vec<String>,
    pub max_concurrency: usize,
    /// A fatal scope error fails the query and cancels the other scopes
    pub fail_fast: bool,
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            regions: RegionSettings::default(),
            ignore_error_codes: Vec::new(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fail_fast: true,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// A query against one table
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub table: String,
    pub qualifiers: Vec<Qualifier>,
    /// Columns to produce; empty means all
    pub columns: Vec<String>,
    pub limit: Option<u64>,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub columns: Map<String, Value>,
    /// Scope the row was enumerated in
    pub scope: String,
    /// Fatal hydrate failures; the affected columns are null
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<HydrateFailure>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }
}

/// Lifecycle of one scope's enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    Idle,
    Listing,
    /// Stop was requested; finishing the current page
    Draining,
    Failed,
    Done,
}

impl ScopeState {
    pub fn can_transition(self, to: ScopeState) -> bool {
        use ScopeState::*;
        matches!(
            (self, to),
            (Idle, Listing)
                | (Listing, Listing)
                | (Listing, Draining)
                | (Listing, Failed)
                | (Listing, Done)
                | (Draining, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ScopeState::Failed | ScopeState::Done)
    }
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeState::Idle => "idle",
            ScopeState::Listing => "listing",
            ScopeState::Draining => "draining",
            ScopeState::Failed => "failed",
            ScopeState::Done => "done",
        };
        f.write_str(s)
    }
}

/// What happened in one scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeReport {
    pub scope: String,
    pub state: ScopeState,
    /// Items accepted into the output
    pub rows: u64,
    pub pages: u64,
    /// Error that ended the scope quietly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored_error: Option<ApiError>,
    /// Error that failed the scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ScopeReport {
    fn new(scope: &Scope) -> Self {
        Self {
            scope: scope.name().to_string(),
            state: ScopeState::Idle,
            rows: 0,
            pages: 0,
            ignored_error: None,
            error: None,
        }
    }

    fn enter(&mut self, to: ScopeState) {
        if self.state.can_transition(to) {
            self.state = to;
        } else {
            tracing::warn!("scope {}: ignoring transition {} -> {}", self.scope, self.state, to);
        }
    }
}

struct QueryOutcome {
    reports: Vec<ScopeReport>,
    error: Option<ScanError>,
}

/// Rows of a running query
pub struct RowStream {
    query_id: Uuid,
    rx: mpsc::Receiver<Row>,
    driver: JoinHandle<QueryOutcome>,
    /// Cancels the query when the stream is dropped
    _guard: DropGuard,
}

impl RowStream {
    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    /// Drain any remaining rows and wait for every scope to finish
    pub async fn finish(mut self) -> Result<Vec<ScopeReport>> {
        while self.rx.recv().await.is_some() {}
        let outcome = (&mut self.driver).await.map_err(|e| {
            tracing::error!("query driver failed: {}", e);
            ScanError::Cancelled
        })?;
        match outcome.error {
            Some(err) => Err(err),
            None => Ok(outcome.reports),
        }
    }

    /// Gather every row, then the reports
    pub async fn collect_all(mut self) -> Result<(Vec<Row>, Vec<ScopeReport>)> {
        let mut rows = Vec::new();
        while let Some(row) = self.rx.recv().await {
            rows.push(row);
        }
        let reports = self.finish().await?;
        Ok((rows, reports))
    }
}

impl Stream for RowStream {
    type Item = Row;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Row>> {
        self.rx.poll_recv(cx)
    }
}

/// Query engine over one provider and a set of tables
#[derive(Clone)]
pub struct Engine {
    provider: Arc<dyn Provider>,
    registry: TableRegistry,
    settings: EngineSettings,
    classifier: Arc<ErrorClassifier>,
}

impl Engine {
    pub fn new(provider: Arc<dyn Provider>, registry: TableRegistry, settings: EngineSettings) -> Self {
        let classifier = Arc::new(ErrorClassifier::new(settings.ignore_error_codes.clone()));
        Self {
            provider,
            registry,
            settings,
            classifier,
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Scopes a query against `table` would enumerate
    pub async fn scopes(&self, table: &str, qualifiers: &[Qualifier]) -> Result<Vec<Scope>> {
        let table = self.table(table)?;
        expand_scopes(&table, self.provider.as_ref(), &self.settings.regions, qualifiers).await
    }

    fn table(&self, name: &str) -> Result<Arc<ResourceTable>> {
        self.registry
            .get(name)
            .ok_or_else(|| ScanError::UnknownTable(name.to_string()))
    }

    /// Start a query. Validation and scope discovery errors are returned here;
    /// scope failures surface from [`RowStream::finish`].
    pub async fn execute(&self, request: QueryRequest) -> Result<RowStream> {
        let table = self.table(&request.table)?;

        let unknown = request
            .columns
            .iter()
            .chain(request.qualifiers.iter().map(|q| &q.column))
            .find(|c| table.column(c).is_none());
        if let Some(column) = unknown {
            return Err(ScanError::UnknownColumn {
                table: table.name.clone(),
                column: column.clone(),
            });
        }

        let columns: Vec<String> = if request.columns.is_empty() {
            table.column_names().map(String::from).collect()
        } else {
            request.columns.clone()
        };

        let query_id = Uuid::new_v4();
        tracing::info!(
            "query {}: table={}, qualifiers=[{}], limit={:?}",
            query_id,
            table.name,
            request
                .qualifiers
                .iter()
                .map(|q| q.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            request.limit
        );

        let scopes =
            expand_scopes(&table, self.provider.as_ref(), &self.settings.regions, &request.qualifiers)
                .await?;

        let filters = plan_filters(&table.def.pushdown, &request.qualifiers);
        let key_plan = match &table.def.get {
            Some(get) => plan_key_lookup(&get.key_columns, &request.qualifiers),
            None => KeyPlan::List,
        };

        let abort = CancellationToken::new();
        let stop = abort.child_token();
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));

        let column_defs: Vec<_> = columns.iter().filter_map(|c| table.column(c)).collect();
        let required = table.graph.required_for_columns(&table, &column_defs);

        let sink = RowSink::new(
            self.provider.clone(),
            self.classifier.clone(),
            Arc::new(RowLimit::new(request.limit)),
            self.settings.max_concurrency,
            columns,
            required,
            tx,
            stop,
            abort.clone(),
        );

        let plan = Arc::new(ScopePlan { filters, key_plan });
        let driver = tokio::spawn(drive(
            self.clone(),
            table,
            scopes,
            plan,
            sink,
            abort.clone(),
            query_id,
        ));

        Ok(RowStream {
            query_id,
            rx,
            driver,
            _guard: abort.drop_guard(),
        })
    }
}

/// What every scope of one query does
struct ScopePlan {
    filters: FilterPlan,
    key_plan: KeyPlan,
}

async fn drive(
    engine: Engine,
    table: Arc<ResourceTable>,
    scopes: Vec<Scope>,
    plan: Arc<ScopePlan>,
    sink: RowSink,
    abort: CancellationToken,
    query_id: Uuid,
) -> QueryOutcome {
    let partition = engine.settings.regions.partition();
    let mut tasks = JoinSet::new();

    for (index, scope) in scopes.into_iter().enumerate() {
        let ctx = ExecutionContext::new(table.clone(), scope, partition, query_id);
        let span = tracing::info_span!(
            "scope",
            query_id = %query_id,
            table = %table.name,
            scope = %ctx.scope
        );
        let engine = engine.clone();
        let plan = plan.clone();
        let sink = sink.clone();
        tasks.spawn(
            async move {
                let report = run_scope(&engine, &ctx, &plan, &sink).await;
                (index, report)
            }
            .instrument(span),
        );
    }
    // Scope tasks and their hydrate workers hold the remaining senders
    drop(sink);

    let mut reports: Vec<(usize, ScopeReport)> = Vec::new();
    let mut error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, report)) => {
                if let Some(err) = &report.error {
                    if engine.settings.fail_fast && error.is_none() {
                        tracing::error!(
                            "query {}: scope {} failed, cancelling remaining scopes",
                            query_id,
                            report.scope
                        );
                        abort.cancel();
                        error = Some(ScanError::Api {
                            table: table.name.clone(),
                            scope: report.scope.clone(),
                            source: err.clone(),
                        });
                    }
                }
                reports.push((index, report));
            },
            Err(e) => {
                tracing::error!("query {}: scope task failed: {}", query_id, e);
                abort.cancel();
                error.get_or_insert(ScanError::Cancelled);
            },
        }
    }
    reports.sort_by_key(|(index, _)| *index);
    let reports: Vec<ScopeReport> = reports.into_iter().map(|(_, r)| r).collect();

    if error.is_none() && !reports.is_empty() && reports.iter().all(|r| r.error.is_some()) {
        let first = &reports[0];
        error = first.error.clone().map(|source| ScanError::Api {
            table: table.name.clone(),
            scope: first.scope.clone(),
            source,
        });
    }

    let rows: u64 = reports.iter().map(|r| r.rows).sum();
    tracing::info!(
        "query {}: {} row(s) from {} scope(s){}",
        query_id,
        rows,
        reports.len(),
        if error.is_some() { ", failed" } else { "" }
    );

    QueryOutcome { reports, error }
}

async fn run_scope(
    engine: &Engine,
    ctx: &ExecutionContext,
    plan: &ScopePlan,
    sink: &RowSink,
) -> ScopeReport {
    let mut report = ScopeReport::new(&ctx.scope);
    report.enter(ScopeState::Listing);

    if sink.limit().is_exhausted() || sink.stop_token().is_cancelled() {
        tracing::debug!("row budget already spent, skipping API");
        report.enter(ScopeState::Done);
        return report;
    }

    let filters: &[ApiFilter] = match &plan.filters {
        FilterPlan::Contradiction { column } => {
            tracing::debug!("qualifiers on {} cannot match, skipping API", column);
            report.enter(ScopeState::Done);
            return report;
        },
        FilterPlan::Filters(filters) => filters,
    };

    match &plan.key_plan {
        KeyPlan::Contradiction { column } => {
            tracing::debug!("key qualifiers on {} cannot match, skipping API", column);
            report.enter(ScopeState::Done);
        },
        KeyPlan::Get(keys) => get_scope(engine, ctx, keys, sink, &mut report).await,
        KeyPlan::List => list_scope(engine, ctx, filters, sink, &mut report).await,
    }

    report
}

async fn get_scope(
    engine: &Engine,
    ctx: &ExecutionContext,
    keys: &BTreeMap<String, Value>,
    sink: &RowSink,
    report: &mut ScopeReport,
) {
    let Some(get) = &ctx.table.def.get else {
        report.enter(ScopeState::Done);
        return;
    };
    tracing::debug!("{} [{}] keys={:?}", get.operation, ctx.scope, keys);

    match engine.provider.get(ctx, &GetRequest { keys }).await {
        Ok(Some(value)) => {
            report.pages += 1;
            let mut cache = HydrateCache::new();
            let item_value = match get.item_path.as_str() {
                "" => value.clone(),
                path => lookup_path(&value, path)
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            // A hydrate node calling the same operation gets the response for free
            for node in ctx.table.graph.nodes() {
                if node.operation == get.operation {
                    cache.seed(node.id, value.clone());
                }
            }
            let item = BaseItem::new(&ctx.table, item_value);
            if sink.accept(ctx, item, cache).await {
                report.rows += 1;
            }
            report.enter(ScopeState::Done);
        },
        Ok(None) => {
            report.pages += 1;
            report.enter(ScopeState::Done);
        },
        Err(err) => {
            let classified = engine.classifier.classify_get(&get.ignore_errors, err);
            finish_with_error(ctx, report, classified.is_fatal(), classified.error);
        },
    }
}

async fn list_scope(
    engine: &Engine,
    ctx: &ExecutionContext,
    filters: &[ApiFilter],
    sink: &RowSink,
    report: &mut ScopeReport,
) {
    let stop = sink.stop_token();
    let mut seen: HashSet<String> = HashSet::new();
    let mut stream = Box::pin(pages(engine.provider.as_ref(), ctx, filters, sink.limit(), stop));

    while let Some(page) = stream.next().await {
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                let classified = engine
                    .classifier
                    .classify(&ctx.table.def.list.ignore_errors, err);
                finish_with_error(ctx, report, classified.is_fatal(), classified.error);
                return;
            },
        };
        report.pages += 1;
        report.enter(ScopeState::Listing);

        for value in page.items {
            if stop.is_cancelled() {
                break;
            }
            let item = BaseItem::new(&ctx.table, value);
            if item.has_key() && !seen.insert(item.natural_key()) {
                tracing::debug!("[{}] skipping duplicate {}", ctx.scope, item.natural_key());
                continue;
            }
            if !sink.accept(ctx, item, HydrateCache::new()).await {
                break;
            }
            report.rows += 1;
        }

        if stop.is_cancelled() {
            break;
        }
    }

    if stop.is_cancelled() {
        report.enter(ScopeState::Draining);
    }
    report.enter(ScopeState::Done);
}

fn finish_with_error(ctx: &ExecutionContext, report: &mut ScopeReport, fatal: bool, error: ApiError) {
    if fatal {
        tracing::error!("{} [{}]: {}", ctx.table.name, ctx.scope, error);
        report.error = Some(error);
        report.enter(ScopeState::Failed);
    } else {
        tracing::warn!("{} [{}]: ignoring {}", ctx.table.name, ctx.scope, error);
        report.ignored_error = Some(error);
        report.enter(ScopeState::Done);
    }
}
