//! Qualifier Filter
//!
//! Translates caller-supplied column constraints into API filter parameters
//! for the columns a table declares pushdown-eligible. Constraints that cannot
//! be translated are left alone: the caller filters those rows itself, the
//! engine never drops rows on its own.

use crate::error::{Result, ScanError};
use crate::resource::PushdownDef;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Comparison operators a qualifier may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pushdown column's values are rendered for the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Int,
    Bool,
    Time,
}

/// A caller constraint on one column
#[derive(Debug, Clone, PartialEq)]
pub struct Qualifier {
    pub column: String,
    pub operator: Operator,
    /// A scalar, or an array meaning "any of these"
    pub value: Value,
}

impl Qualifier {
    pub fn new(column: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, Operator::Eq, value.into())
    }

    /// Parse `column<op>value`, e.g. `name=alerts`, `size>=10`, `id=["a","b"]`.
    /// The value is read as JSON when it parses, otherwise as a plain string.
    pub fn parse(expr: &str) -> Result<Self> {
        const OPERATORS: &[(&str, Operator)] = &[
            ("<>", Operator::Ne),
            ("!=", Operator::Ne),
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ];

        let Some(pos) = expr.find(&['=', '<', '>', '!'][..]) else {
            return Err(ScanError::InvalidQualifier(format!("no operator in '{}'", expr)));
        };

        let rest = &expr[pos..];
        let Some((token, operator)) = OPERATORS.iter().find(|(t, _)| rest.starts_with(t)) else {
            return Err(ScanError::InvalidQualifier(format!("bad operator in '{}'", expr)));
        };

        let column = expr[..pos].trim();
        if column.is_empty()
            || !column
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ScanError::InvalidQualifier(format!(
                "bad column name in '{}'",
                expr
            )));
        }

        let raw = rest[token.len()..].trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        Ok(Self::new(column, *operator, value))
    }

    /// The candidate values: array elements, or the scalar itself
    pub fn candidates(&self) -> Vec<&Value> {
        match &self.value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        }
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator, self.value)
    }
}

/// A filter parameter for the provider request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFilter {
    pub name: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

/// Result of planning pushdown filters for a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterPlan {
    Filters(Vec<ApiFilter>),
    /// No item can satisfy the qualifiers; skip the API entirely
    Contradiction { column: String },
}

impl FilterPlan {
    pub fn filters(&self) -> &[ApiFilter] {
        match self {
            FilterPlan::Filters(filters) => filters,
            FilterPlan::Contradiction { .. } => &[],
        }
    }

    pub fn is_contradiction(&self) -> bool {
        matches!(self, FilterPlan::Contradiction { .. })
    }
}

/// Build API filters from the qualifiers the table can push down
pub fn plan_filters(pushdown: &[PushdownDef], quals: &[Qualifier]) -> FilterPlan {
    let mut filters = Vec::new();

    for def in pushdown {
        let column_quals: Vec<Qualifier> = quals
            .iter()
            .filter(|q| q.column == def.column)
            .map(|q| as_equality(def, q))
            .collect();
        if column_quals.is_empty() {
            continue;
        }

        if def.operators.contains(&Operator::Eq) {
            let sets: Vec<Vec<String>> = column_quals
                .iter()
                .filter(|q| q.operator == Operator::Eq)
                .filter_map(|q| normalize_all(def.value_type, &q.candidates()))
                .collect();

            if !sets.is_empty() {
                if def.multi_value {
                    let mut union: Vec<String> = Vec::new();
                    for value in sets.into_iter().flatten() {
                        if !union.contains(&value) {
                            union.push(value);
                        }
                    }
                    filters.push(ApiFilter {
                        name: def.filter.clone(),
                        operator: Operator::Eq,
                        values: union,
                    });
                } else {
                    let survivors = intersect(sets);
                    match survivors.len() {
                        0 => {
                            return FilterPlan::Contradiction {
                                column: def.column.clone(),
                            }
                        },
                        1 => filters.push(ApiFilter {
                            name: def.filter.clone(),
                            operator: Operator::Eq,
                            values: survivors,
                        }),
                        // An IN list on a single-value filter stays client-side
                        _ => {},
                    }
                }
            }
        }

        for q in &column_quals {
            if q.operator == Operator::Eq || !def.operators.contains(&q.operator) {
                continue;
            }
            if let Some(value) = normalize(def.value_type, &q.value) {
                filters.push(ApiFilter {
                    name: def.filter.clone(),
                    operator: q.operator,
                    values: vec![value],
                });
            }
        }
    }

    FilterPlan::Filters(filters)
}

/// `flag <> true` on a boolean column is `flag = false`
fn as_equality(def: &PushdownDef, q: &Qualifier) -> Qualifier {
    if def.value_type == ValueType::Bool && q.operator == Operator::Ne {
        if let Some(b) = q.value.as_bool() {
            return Qualifier::new(q.column.clone(), Operator::Eq, Value::Bool(!b));
        }
    }
    q.clone()
}

fn intersect(sets: Vec<Vec<String>>) -> Vec<String> {
    let mut iter = sets.into_iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut acc: Vec<String> = Vec::new();
    for value in first {
        if !acc.contains(&value) {
            acc.push(value);
        }
    }
    for set in iter {
        acc.retain(|v| set.contains(v));
    }
    acc
}

fn normalize_all(value_type: ValueType, values: &[&Value]) -> Option<Vec<String>> {
    values.iter().map(|v| normalize(value_type, v)).collect()
}

/// Render a qualifier value the way the API expects it; `None` if it cannot be
fn normalize(value_type: ValueType, value: &Value) -> Option<String> {
    match value_type {
        ValueType::String => match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        },
        ValueType::Int => match value {
            Value::Number(n) => n.as_i64().map(|i| i.to_string()),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i.to_string()),
            _ => None,
        },
        ValueType::Bool => match value {
            Value::Bool(b) => Some(b.to_string()),
            Value::String(s) => s.parse::<bool>().ok().map(|b| b.to_string()),
            _ => None,
        },
        ValueType::Time => {
            let parsed = DateTime::parse_from_rfc3339(value.as_str()?).ok()?;
            Some(
                parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            )
        },
    }
}

/// Equality candidates for a column: the intersection of every `=` qualifier on it.
/// `None` when the column carries no equality qualifier.
pub fn equality_candidates(quals: &[Qualifier], column: &str) -> Option<Vec<Value>> {
    let mut result: Option<Vec<Value>> = None;

    for q in quals
        .iter()
        .filter(|q| q.column == column && q.operator == Operator::Eq)
    {
        let candidates: Vec<Value> = q.candidates().into_iter().cloned().collect();
        result = Some(match result {
            None => candidates,
            Some(mut acc) => {
                acc.retain(|v| candidates.contains(v));
                acc
            },
        });
    }

    result
}

/// How a scope should fetch rows given the table's get key columns
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPlan {
    /// Not every key column is pinned to one value; list instead
    List,
    /// Fetch a single item by key
    Get(BTreeMap<String, Value>),
    /// Two different values were demanded for one key column
    Contradiction { column: String },
}

/// Decide between get-by-key and list
pub fn plan_key_lookup(key_columns: &[String], quals: &[Qualifier]) -> KeyPlan {
    if key_columns.is_empty() {
        return KeyPlan::List;
    }

    let mut keys = BTreeMap::new();
    for column in key_columns {
        match equality_candidates(quals, column) {
            None => return KeyPlan::List,
            Some(values) if values.is_empty() => {
                return KeyPlan::Contradiction {
                    column: column.clone(),
                }
            },
            Some(mut values) if values.len() == 1 => {
                keys.insert(column.clone(), values.remove(0));
            },
            Some(_) => return KeyPlan::List,
        }
    }

    KeyPlan::Get(keys)
}
