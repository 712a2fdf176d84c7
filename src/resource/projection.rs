//! Row Projection
//!
//! Turns a hydrated item into an output row holding the requested columns.

use super::item::{tags_to_value, BaseItem};
use super::registry::{ColumnDef, ResourceTable, PARTITION_COLUMN, REGION_COLUMN};
use crate::engine::hydrate::HydrateCache;
use crate::engine::ExecutionContext;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Declarative column transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Value at `path` as-is
    #[default]
    Field,
    /// Tags applied to the item, as an object
    Tags,
    /// ARN wrapped in a single-element array
    Akas,
    /// Resource name taken from the tail of an ARN
    Title,
    /// Length of an array
    Count,
    /// Segment after the last `/`
    LastPathElement,
}

/// Look up a value using a dot-notation path (numeric parts index arrays)
pub fn lookup_path<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(item);
    }

    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) if current.is_array() => current.get(idx)?,
            _ => current.get(part)?,
        };
    }

    Some(current)
}

/// Build the output row for one item
pub fn project_row(
    table: &ResourceTable,
    columns: &[&ColumnDef],
    item: &BaseItem,
    cache: &HydrateCache,
    ctx: &ExecutionContext,
) -> Map<String, Value> {
    let mut row = Map::new();

    for column in columns {
        let value = match column.name.as_str() {
            REGION_COLUMN => Value::String(ctx.scope.name().to_string()),
            PARTITION_COLUMN => Value::String(ctx.partition.as_str().to_string()),
            _ => column_value(table, column, item, cache),
        };
        row.insert(column.name.clone(), value);
    }

    row
}

fn column_value(
    table: &ResourceTable,
    column: &ColumnDef,
    item: &BaseItem,
    cache: &HydrateCache,
) -> Value {
    if column.transform == Transform::Tags {
        return item.tags().map(tags_to_value).unwrap_or(Value::Null);
    }

    let source = match &column.hydrate {
        Some(node) => match table.graph.node_id(node).and_then(|id| cache.value(id)) {
            Some(value) => value,
            None => return Value::Null,
        },
        None => item.value(),
    };

    let raw = match column.path.as_deref() {
        Some(path) => lookup_path(source, path),
        None => Some(source),
    };
    let Some(raw) = raw else {
        return Value::Null;
    };

    apply_transform(column.transform, raw)
}

fn apply_transform(transform: Transform, raw: &Value) -> Value {
    match transform {
        Transform::Field | Transform::Tags => raw.clone(),
        Transform::Akas => match raw {
            Value::String(arn) => Value::Array(vec![Value::String(arn.clone())]),
            Value::Array(_) => raw.clone(),
            _ => Value::Null,
        },
        Transform::Title => match raw.as_str() {
            Some(arn) => Value::String(arn_title(arn).to_string()),
            None => Value::Null,
        },
        Transform::Count => match raw.as_array() {
            Some(arr) => Value::from(arr.len()),
            None => Value::Null,
        },
        Transform::LastPathElement => match raw.as_str() {
            Some(path) => Value::String(path.rsplit('/').next().unwrap_or(path).to_string()),
            None => Value::Null,
        },
    }
}

/// "arn:aws:iam::123:role/path/name" -> "name", "arn:aws:sns:r:1:topic" -> "topic"
fn arn_title(arn: &str) -> &str {
    let resource = arn.splitn(6, ':').nth(5).unwrap_or(arn);
    resource.rsplit('/').next().unwrap_or(resource)
}
