//! Row Sink / Limit Tracker
//!
//! Every scope pushes its items through one shared [`RowSink`]. The sink
//! charges each item against the query's [`RowLimit`], then hands it to the
//! bounded hydrate worker pool, which projects the finished row onto the
//! output channel.

use super::classify::ErrorClassifier;
use super::hydrate::{HydrateCache, HydrateFailure, HydrateResolver, NodeId};
use super::query::Row;
use super::ExecutionContext;
use crate::provider::Provider;
use crate::resource::projection::project_row;
use crate::resource::BaseItem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Shared row budget; `None` means unlimited
#[derive(Debug)]
pub struct RowLimit {
    remaining: Option<AtomicU64>,
}

impl RowLimit {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            remaining: limit.map(AtomicU64::new),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Take one row from the budget. Never goes below zero.
    pub fn try_take(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(counter) => counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    pub fn remaining(&self) -> Option<u64> {
        self.remaining.as_ref().map(|c| c.load(Ordering::Acquire))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }
}

/// Entry point from the scope loops into hydration and output
#[derive(Clone)]
pub struct RowSink {
    provider: Arc<dyn Provider>,
    classifier: Arc<ErrorClassifier>,
    limit: Arc<RowLimit>,
    workers: Arc<Semaphore>,
    /// Requested output columns
    columns: Arc<[String]>,
    /// Hydrate nodes the requested columns need
    required: Arc<[NodeId]>,
    tx: mpsc::Sender<Row>,
    /// Raised once the limit is reached; ends list loops
    stop: CancellationToken,
    /// Raised on fatal errors or when the consumer goes away; ends everything
    abort: CancellationToken,
}

impl RowSink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn Provider>,
        classifier: Arc<ErrorClassifier>,
        limit: Arc<RowLimit>,
        max_concurrency: usize,
        columns: Vec<String>,
        required: Vec<NodeId>,
        tx: mpsc::Sender<Row>,
        stop: CancellationToken,
        abort: CancellationToken,
    ) -> Self {
        Self {
            provider,
            classifier,
            limit,
            workers: Arc::new(Semaphore::new(max_concurrency.max(1))),
            columns: columns.into(),
            required: required.into(),
            tx,
            stop,
            abort,
        }
    }

    pub fn limit(&self) -> &RowLimit {
        &self.limit
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Charge `item` to the row limit and schedule its hydration.
    /// Returns false once the budget is gone or the query was aborted;
    /// the caller must stop producing items.
    pub async fn accept(&self, ctx: &ExecutionContext, item: BaseItem, cache: HydrateCache) -> bool {
        if self.abort.is_cancelled() {
            return false;
        }
        if !self.limit.try_take() {
            self.stop.cancel();
            return false;
        }
        if self.limit.is_exhausted() {
            tracing::debug!("row limit reached, stopping list loops");
            self.stop.cancel();
        }

        // Waiting for a worker slot throttles the list loop
        let permit = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return false,
            permit = self.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let sink = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let row = sink.hydrate_row(&ctx, item, cache).await;
            drop(permit);
            if sink.abort.is_cancelled() {
                return;
            }
            if sink.tx.send(row).await.is_err() {
                tracing::debug!("row consumer went away, aborting query {}", ctx.query_id);
                sink.abort.cancel();
            }
        });

        true
    }

    async fn hydrate_row(&self, ctx: &ExecutionContext, mut item: BaseItem, mut cache: HydrateCache) -> Row {
        let resolver = HydrateResolver::new(self.provider.as_ref(), &self.classifier);
        let errors: Vec<HydrateFailure> = resolver
            .resolve(ctx, &mut item, &self.required, &mut cache, &self.abort)
            .await;

        let table = &ctx.table;
        let columns: Vec<_> = self.columns.iter().filter_map(|c| table.column(c)).collect();

        Row {
            columns: project_row(table, &columns, &item, &cache, ctx),
            scope: ctx.scope.name().to_string(),
            errors,
        }
    }
}
