//! Hydrate Resolver
//!
//! Each table declares zero or more hydrate calls, each possibly depending on
//! the output of others. They are compiled into a [`HydrateGraph`] once, when
//! the table is loaded. Per item, only the nodes needed by the requested
//! columns (plus their transitive dependencies) run, each at most once, with
//! independent nodes running concurrently.

use super::classify::ErrorClassifier;
use super::ExecutionContext;
use crate::error::{ApiError, Result, ScanError};
use crate::provider::{HydrateRequest, Provider};
use crate::resource::item::parse_tags;
use crate::resource::projection::{lookup_path, Transform};
use crate::resource::{BaseItem, ColumnDef, HydrateDef, Resource, ResourceTable, ScopeParams};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

/// Index of a node inside its table's graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// One hydrate call with its resolved dependencies
#[derive(Debug, Clone)]
pub struct HydrateNode {
    pub id: NodeId,
    pub name: String,
    pub operation: String,
    pub path: String,
    pub depends_on: Vec<NodeId>,
    pub ignore_errors: Vec<String>,
    pub scope_params: ScopeParams,
}

/// Validated hydrate DAG of one table
#[derive(Debug, Clone, Default)]
pub struct HydrateGraph {
    nodes: Vec<HydrateNode>,
    /// Topological order over all nodes
    order: Vec<NodeId>,
}

impl HydrateGraph {
    /// Resolve dependency names and reject duplicates, dangling edges and cycles
    pub fn build(table: &str, defs: &[HydrateDef]) -> Result<Self> {
        let mut ids: HashMap<&str, NodeId> = HashMap::new();
        for (idx, def) in defs.iter().enumerate() {
            if ids.insert(def.name.as_str(), NodeId(idx)).is_some() {
                return Err(ScanError::invalid_table(
                    table,
                    format!("duplicate hydrate {}", def.name),
                ));
            }
        }

        let mut nodes = Vec::with_capacity(defs.len());
        for (idx, def) in defs.iter().enumerate() {
            let mut depends_on = Vec::with_capacity(def.depends_on.len());
            for dep in &def.depends_on {
                let Some(&dep_id) = ids.get(dep.as_str()) else {
                    return Err(ScanError::invalid_table(
                        table,
                        format!("hydrate {} depends on unknown hydrate {}", def.name, dep),
                    ));
                };
                if !depends_on.contains(&dep_id) {
                    depends_on.push(dep_id);
                }
            }
            nodes.push(HydrateNode {
                id: NodeId(idx),
                name: def.name.clone(),
                operation: def.operation.clone(),
                path: def.path.clone(),
                depends_on,
                ignore_errors: def.ignore_errors.clone(),
                scope_params: def.scope_params.clone(),
            });
        }

        // Kahn's algorithm
        let mut indegree: Vec<usize> = nodes.iter().map(|n| n.depends_on.len()).collect();
        let mut queue: VecDeque<NodeId> = nodes
            .iter()
            .filter(|n| n.depends_on.is_empty())
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for node in &nodes {
                if node.depends_on.contains(&id) {
                    indegree[node.id.0] -= 1;
                    if indegree[node.id.0] == 0 {
                        queue.push_back(node.id);
                    }
                }
            }
        }
        if order.len() != nodes.len() {
            let stuck: Vec<&str> = nodes
                .iter()
                .filter(|n| indegree[n.id.0] > 0)
                .map(|n| n.name.as_str())
                .collect();
            return Err(ScanError::invalid_table(
                table,
                format!("hydrate dependency cycle through {}", stuck.join(", ")),
            ));
        }

        Ok(Self { nodes, order })
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn node(&self, id: NodeId) -> &HydrateNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HydrateNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Roots plus everything they transitively depend on, in topological order
    pub fn required(&self, roots: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut needed = BTreeSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if needed.insert(id) {
                stack.extend(self.node(id).depends_on.iter().copied());
            }
        }
        self.order
            .iter()
            .copied()
            .filter(|id| needed.contains(id))
            .collect()
    }

    /// Nodes needed to produce the given columns
    pub fn required_for_columns(&self, table: &ResourceTable, columns: &[&ColumnDef]) -> Vec<NodeId> {
        let mut roots: Vec<NodeId> = columns
            .iter()
            .filter_map(|c| c.hydrate.as_deref())
            .filter_map(|name| self.node_id(name))
            .collect();

        if columns.iter().any(|c| c.transform == Transform::Tags) {
            if let Some(id) = table
                .def
                .tags
                .as_ref()
                .and_then(|t| t.hydrate.as_deref())
                .and_then(|name| self.node_id(name))
            {
                roots.push(id);
            }
        }

        self.required(roots)
    }
}

/// What happened to one node for one item
#[derive(Debug, Clone, PartialEq)]
pub enum HydrateOutcome {
    Ready(Value),
    /// Failed with an error on the ignore list
    Ignored(ApiError),
    /// Failed with a fatal error
    Failed(ApiError),
    /// Not run because a dependency produced no value, or the query was aborted
    Skipped,
}

/// Per-item node outcomes
#[derive(Debug, Clone, Default)]
pub struct HydrateCache {
    outcomes: HashMap<NodeId, HydrateOutcome>,
}

impl HydrateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value produced elsewhere (e.g. by a get call) so the node never runs
    pub fn seed(&mut self, id: NodeId, value: Value) {
        self.outcomes.insert(id, HydrateOutcome::Ready(value));
    }

    pub fn value(&self, id: NodeId) -> Option<&Value> {
        match self.outcomes.get(&id) {
            Some(HydrateOutcome::Ready(value)) => Some(value),
            _ => None,
        }
    }

    pub fn outcome(&self, id: NodeId) -> Option<&HydrateOutcome> {
        self.outcomes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.outcomes.contains_key(&id)
    }

    fn record(&mut self, id: NodeId, outcome: HydrateOutcome) {
        self.outcomes.insert(id, outcome);
    }
}

/// A fatal hydrate error attached to the row it happened on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydrateFailure {
    pub hydrate: String,
    pub code: String,
    pub message: String,
}

/// Runs hydrate nodes for one item at a time
pub struct HydrateResolver<'a> {
    provider: &'a dyn Provider,
    classifier: &'a ErrorClassifier,
}

impl<'a> HydrateResolver<'a> {
    pub fn new(provider: &'a dyn Provider, classifier: &'a ErrorClassifier) -> Self {
        Self {
            provider,
            classifier,
        }
    }

    /// Run `required` (topologically ordered) for `item`, skipping nodes already in
    /// `cache`. Tags produced along the way are applied to the item. Returns the
    /// fatal failures for the row.
    pub async fn resolve(
        &self,
        ctx: &ExecutionContext,
        item: &mut BaseItem,
        required: &[NodeId],
        cache: &mut HydrateCache,
        abort: &CancellationToken,
    ) -> Vec<HydrateFailure> {
        let graph = &ctx.table.graph;
        let mut failures = Vec::new();

        {
            let item_value = item.value();
            let key = item.natural_key();
            let mut pending: Vec<NodeId> = required
                .iter()
                .copied()
                .filter(|id| !cache.contains(*id))
                .collect();
            let mut in_flight = FuturesUnordered::new();

            loop {
                // Start everything whose dependencies have settled
                let mut still_pending = Vec::with_capacity(pending.len());
                for id in pending {
                    let node = graph.node(id);
                    if !node.depends_on.iter().all(|dep| cache.contains(*dep)) {
                        still_pending.push(id);
                        continue;
                    }
                    let mut dependencies = BTreeMap::new();
                    let mut missing = false;
                    for dep in &node.depends_on {
                        match cache.value(*dep) {
                            Some(value) => {
                                dependencies.insert(graph.node(*dep).name.clone(), value.clone());
                            },
                            None => missing = true,
                        }
                    }
                    if missing {
                        cache.record(id, HydrateOutcome::Skipped);
                    } else {
                        in_flight.push(self.run_node(ctx, id, item_value, &key, dependencies));
                    }
                }
                pending = still_pending;

                if in_flight.is_empty() {
                    // Skipped nodes may have unblocked (and skipped) their dependents
                    if pending.is_empty() {
                        break;
                    }
                    continue;
                }

                let next = tokio::select! {
                    biased;
                    _ = abort.cancelled() => None,
                    next = in_flight.next() => next,
                };
                let Some((id, result)) = next else {
                    for id in pending.drain(..) {
                        cache.record(id, HydrateOutcome::Skipped);
                    }
                    break;
                };

                let node = graph.node(id);
                let outcome = match result {
                    Ok(value) => HydrateOutcome::Ready(value),
                    Err(err) => {
                        let classified = self.classifier.classify(&node.ignore_errors, err);
                        if classified.is_fatal() {
                            tracing::error!(
                                "hydrate {} failed for {} [{}]: {}",
                                node.name,
                                key,
                                ctx.scope,
                                classified.error
                            );
                            failures.push(HydrateFailure {
                                hydrate: node.name.clone(),
                                code: classified.error.code.clone(),
                                message: classified.error.message.clone(),
                            });
                            HydrateOutcome::Failed(classified.error)
                        } else {
                            tracing::warn!(
                                "hydrate {} ignored error for {} [{}]: {}",
                                node.name,
                                key,
                                ctx.scope,
                                classified.error
                            );
                            HydrateOutcome::Ignored(classified.error)
                        }
                    },
                };
                cache.record(id, outcome);
            }
        }

        apply_item_tags(&ctx.table, item, cache);
        failures
    }

    async fn run_node(
        &self,
        ctx: &ExecutionContext,
        id: NodeId,
        item: &Value,
        key: &str,
        dependencies: BTreeMap<String, Value>,
    ) -> (NodeId, std::result::Result<Value, ApiError>) {
        let node = ctx.table.graph.node(id);
        tracing::debug!("hydrate {} ({}) for {}", node.name, node.operation, key);
        let request = HydrateRequest {
            node,
            item,
            key,
            dependencies: &dependencies,
        };
        (id, self.provider.hydrate(ctx, &request).await)
    }
}

/// Parse the table's tag payload (from the base item or its tags node) onto the item
fn apply_item_tags(table: &ResourceTable, item: &mut BaseItem, cache: &HydrateCache) {
    let Some(tags_def) = &table.def.tags else {
        return;
    };

    let source = match tags_def.hydrate.as_deref() {
        Some(name) => match table.graph.node_id(name).and_then(|id| cache.value(id)) {
            Some(value) => value,
            None => return,
        },
        None => item.value(),
    };

    let Some(raw) = lookup_path(source, &tags_def.path) else {
        return;
    };
    let tags = parse_tags(raw, tags_def.format);
    item.apply_tags(tags);
}
