//! Table Registry - Load resource table definitions from JSON
//!
//! This module loads all resource table definitions from embedded JSON files
//! and provides lookup functions for the rest of the application. Extra
//! definitions can be merged in from a JSON or YAML file at runtime.

use super::projection::Transform;
use crate::engine::hydrate::HydrateGraph;
use crate::engine::matrix::Scope;
use crate::engine::qualifier::{Operator, ValueType};
use crate::error::{Result, ScanError};
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Embedded table JSON files (compiled into the binary)
const TABLE_FILES: &[&str] = &[
    include_str!("../resources/sns.json"),
    include_str!("../resources/ec2.json"),
    include_str!("../resources/rds.json"),
    include_str!("../resources/iam.json"),
    include_str!("../resources/s3.json"),
    include_str!("../resources/waf.json"),
];

/// Column holding the scope a row came from
pub const REGION_COLUMN: &str = "region";
/// Column holding the partition a row came from
pub const PARTITION_COLUMN: &str = "partition";

/// Where a table's resources live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One scope per enabled region
    #[default]
    Regional,
    /// A single synthetic `global` scope
    Global,
    /// The `global` scope plus every region (WAF style)
    RegionalAndGlobal,
}

/// List operation definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ListDef {
    pub operation: String,
    pub path: String,
    /// Dot path to the item array in the response; empty means the body is the array
    #[serde(default)]
    pub items_path: String,
    #[serde(default = "default_next_token_path")]
    pub next_token_path: String,
    #[serde(default = "default_token_param")]
    pub token_param: String,
    #[serde(default)]
    pub page_size_param: Option<String>,
    #[serde(default)]
    pub max_page_size: Option<u32>,
    #[serde(default)]
    pub min_page_size: Option<u32>,
    #[serde(default)]
    pub ignore_errors: Vec<String>,
    #[serde(default)]
    pub scope_params: ScopeParams,
}

fn default_next_token_path() -> String {
    "NextToken".to_string()
}

fn default_token_param() -> String {
    "NextToken".to_string()
}

/// Get-by-key operation definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct GetDef {
    pub operation: String,
    pub path: String,
    pub key_columns: Vec<String>,
    /// Dot path to the item in the response; empty means the whole body
    #[serde(default)]
    pub item_path: String,
    #[serde(default)]
    pub ignore_errors: Vec<String>,
    #[serde(default)]
    pub scope_params: ScopeParams,
}

/// Hydrate (enrichment) call definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct HydrateDef {
    pub name: String,
    pub operation: String,
    pub path: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub ignore_errors: Vec<String>,
    #[serde(default)]
    pub scope_params: ScopeParams,
}

/// Extra query parameters that depend on the scope kind.
///
/// Some APIs select global or regional resources with a parameter rather
/// than an endpoint, e.g. WAFv2 `Scope=CLOUDFRONT` vs `Scope=REGIONAL`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScopeParams {
    #[serde(default)]
    pub global: BTreeMap<String, String>,
    #[serde(default)]
    pub regional: BTreeMap<String, String>,
}

impl ScopeParams {
    pub fn for_scope(&self, scope: &Scope) -> &BTreeMap<String, String> {
        if scope.is_global() {
            &self.global
        } else {
            &self.regional
        }
    }
}

/// A column whose qualifiers can be translated into an API filter
#[derive(Debug, Clone, Deserialize)]
pub struct PushdownDef {
    pub column: String,
    pub filter: String,
    #[serde(default)]
    pub multi_value: bool,
    #[serde(default = "default_operators")]
    pub operators: Vec<Operator>,
    #[serde(default)]
    pub value_type: ValueType,
}

fn default_operators() -> Vec<Operator> {
    vec![Operator::Eq]
}

/// Shape of the tag payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagFormat {
    /// `[{"Key": "k", "Value": "v"}, ...]`
    #[default]
    KeyValueList,
    /// `{"k": "v", ...}`
    Map,
}

/// Where a table finds its tags
#[derive(Debug, Clone, Deserialize)]
pub struct TagsDef {
    /// Hydrate node producing the tags; `None` reads them from the base item
    #[serde(default)]
    pub hydrate: Option<String>,
    pub path: String,
    #[serde(default)]
    pub format: TagFormat,
}

/// Column definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hydrate: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub transform: Transform,
}

/// Table definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub description: String,
    pub service: String,
    #[serde(default)]
    pub scope: ScopeKind,
    /// Item fields that together identify a resource within a scope
    pub key_fields: Vec<String>,
    pub list: ListDef,
    #[serde(default)]
    pub get: Option<GetDef>,
    #[serde(default)]
    pub hydrate: Vec<HydrateDef>,
    #[serde(default)]
    pub pushdown: Vec<PushdownDef>,
    #[serde(default)]
    pub tags: Option<TagsDef>,
    pub columns: Vec<ColumnDef>,
    /// Regions the service is offered in; absent means ask the provider
    #[serde(default)]
    pub supported_regions: Option<Vec<String>>,
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub tables: HashMap<String, TableDef>,
}

/// A validated table definition, ready for the engine
#[derive(Debug)]
pub struct ResourceTable {
    pub name: String,
    pub def: TableDef,
    pub graph: HydrateGraph,
    /// Declared columns followed by the standard `region` and `partition` columns
    pub columns: Vec<ColumnDef>,
}

impl ResourceTable {
    /// Validate a definition and build its hydrate graph
    pub fn compile(name: &str, def: TableDef) -> Result<Self> {
        if def.key_fields.is_empty() {
            return Err(ScanError::invalid_table(name, "key_fields must not be empty"));
        }

        let graph = HydrateGraph::build(name, &def.hydrate)?;

        let mut columns = def.columns.clone();
        for standard in [REGION_COLUMN, PARTITION_COLUMN] {
            if columns.iter().any(|c| c.name == standard) {
                return Err(ScanError::invalid_table(
                    name,
                    format!("column {} is reserved", standard),
                ));
            }
            columns.push(ColumnDef {
                name: standard.to_string(),
                description: format!("The AWS {} the resource was listed from.", standard),
                hydrate: None,
                path: None,
                transform: Transform::Field,
            });
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ScanError::invalid_table(
                    name,
                    format!("duplicate column {}", column.name),
                ));
            }
            if let Some(node) = &column.hydrate {
                if graph.node_id(node).is_none() {
                    return Err(ScanError::invalid_table(
                        name,
                        format!("column {} references unknown hydrate {}", column.name, node),
                    ));
                }
            }
        }

        if let Some(node) = def.tags.as_ref().and_then(|t| t.hydrate.as_ref()) {
            if graph.node_id(node).is_none() {
                return Err(ScanError::invalid_table(
                    name,
                    format!("tags reference unknown hydrate {}", node),
                ));
            }
        }

        let referenced = def
            .pushdown
            .iter()
            .map(|p| p.column.as_str())
            .chain(def.get.iter().flat_map(|g| g.key_columns.iter().map(|c| c.as_str())));
        for column in referenced {
            if !seen.contains(column) {
                return Err(ScanError::invalid_table(
                    name,
                    format!("{} is not a column", column),
                ));
            }
        }

        Ok(Self {
            name: name.to_string(),
            def,
            graph,
            columns,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Set of compiled tables keyed by name
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, Arc<ResourceTable>>,
}

impl TableRegistry {
    /// Compile every table of a parsed config
    pub fn from_config(config: TableConfig) -> Result<Self> {
        let mut registry = Self::default();
        registry.extend(config)?;
        Ok(registry)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let config: TableConfig =
            serde_json::from_str(content).context("Failed to parse table JSON")?;
        Ok(Self::from_config(config)?)
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: TableConfig =
            serde_yaml::from_str(content).context("Failed to parse table YAML")?;
        Ok(Self::from_config(config)?)
    }

    /// Merge definitions from a `.json`, `.yaml` or `.yml` file, replacing same-named tables
    pub fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read table file {}", path.display()))?;
        let config: TableConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            _ => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
        };
        self.extend(config)?;
        Ok(())
    }

    pub fn extend(&mut self, config: TableConfig) -> Result<()> {
        for (name, def) in config.tables {
            let table = ResourceTable::compile(&name, def)?;
            self.tables.insert(name, Arc::new(table));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceTable>> {
        self.tables.get(name).cloned()
    }

    /// Table names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Global registry loaded from JSON
static REGISTRY: OnceLock<TableRegistry> = OnceLock::new();

/// Get the built-in registry (loads from embedded JSON on first access)
pub fn get_registry() -> &'static TableRegistry {
    REGISTRY.get_or_init(|| {
        let mut registry = TableRegistry::default();

        for content in TABLE_FILES {
            let partial: TableConfig = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded table JSON: {}", e));
            registry
                .extend(partial)
                .unwrap_or_else(|e| panic!("Invalid embedded table definition: {}", e));
        }

        registry
    })
}

/// Get a built-in table by name
pub fn get_table(name: &str) -> Option<Arc<ResourceTable>> {
    get_registry().get(name)
}

/// Get all built-in table names (sorted)
pub fn get_all_table_names() -> Vec<&'static str> {
    get_registry().names()
}
