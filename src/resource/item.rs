//! Base items
//!
//! A [`BaseItem`] is one record returned by a list or get call, before
//! hydration. Downstream code only talks to it through [`Resource`].

use super::projection::lookup_path;
use super::registry::{ResourceTable, TagFormat};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Capabilities every resource item exposes to the engine
pub trait Resource {
    /// Identifier unique within one scope
    fn natural_key(&self) -> String;

    /// Attach tags resolved by a hydrate call
    fn apply_tags(&mut self, tags: BTreeMap<String, String>);
}

/// One raw resource record
#[derive(Debug, Clone)]
pub struct BaseItem {
    value: Value,
    key: String,
    has_key: bool,
    tags: Option<BTreeMap<String, String>>,
}

impl BaseItem {
    /// Wrap a raw API record, computing its natural key from the table's key fields.
    /// A single key field is used as-is; several are encoded as a JSON array so
    /// distinct tuples never collide.
    pub fn new(table: &ResourceTable, value: Value) -> Self {
        let parts: Vec<Option<String>> = table
            .def
            .key_fields
            .iter()
            .map(|field| match lookup_path(&value, field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .collect();
        let has_key = parts.iter().any(Option::is_some);

        let key = match parts.as_slice() {
            [single] => single.clone().unwrap_or_default(),
            _ => Value::Array(
                parts
                    .into_iter()
                    .map(|p| p.map(Value::String).unwrap_or(Value::Null))
                    .collect(),
            )
            .to_string(),
        };

        Self {
            value,
            key,
            has_key,
            tags: None,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        self.tags.as_ref()
    }

    /// True when at least one key field was present
    pub fn has_key(&self) -> bool {
        self.has_key
    }
}

impl Resource for BaseItem {
    fn natural_key(&self) -> String {
        self.key.clone()
    }

    fn apply_tags(&mut self, tags: BTreeMap<String, String>) {
        self.tags = Some(tags);
    }
}

/// Parse a tag payload in the declared format
pub fn parse_tags(raw: &Value, format: TagFormat) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    match format {
        TagFormat::KeyValueList => {
            if let Some(list) = raw.as_array() {
                for entry in list {
                    let key = entry.get("Key").and_then(|v| v.as_str());
                    let value = entry.get("Value").and_then(|v| v.as_str()).unwrap_or("");
                    if let Some(key) = key {
                        tags.insert(key.to_string(), value.to_string());
                    }
                }
            }
        },
        TagFormat::Map => {
            if let Some(map) = raw.as_object() {
                for (key, value) in map {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    tags.insert(key.clone(), value);
                }
            }
        },
    }

    tags
}

/// Render tags as a JSON object
pub fn tags_to_value(tags: &BTreeMap<String, String>) -> Value {
    let map: Map<String, Value> = tags
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{get_table, TableRegistry};
    use serde_json::json;

    #[test]
    fn test_natural_key_from_key_fields() {
        let table = get_table("aws_sns_topic").unwrap();
        let item = BaseItem::new(&table, json!({"TopicArn": "arn:aws:sns:us-east-1:1:a"}));
        assert_eq!(item.natural_key(), "arn:aws:sns:us-east-1:1:a");
        assert!(item.has_key());
    }

    #[test]
    fn test_missing_key_fields_detected() {
        let table = get_table("aws_sns_topic").unwrap();
        let item = BaseItem::new(&table, json!({"Other": 1}));
        assert!(!item.has_key());
    }

    #[test]
    fn test_composite_keys_do_not_collide() {
        let registry = TableRegistry::from_json_str(
            r#"{"tables": {"pairs": {
                "service": "pairs",
                "key_fields": ["A", "B"],
                "list": {"operation": "ListPairs", "path": "/pairs"},
                "columns": [{"name": "a", "path": "A"}]
            }}}"#,
        )
        .unwrap();
        let table = registry.get("pairs").unwrap();

        let left = BaseItem::new(&table, json!({"A": "a/b", "B": ""}));
        let right = BaseItem::new(&table, json!({"A": "a", "B": "b/"}));
        assert_ne!(left.natural_key(), right.natural_key());

        let slash = BaseItem::new(&table, json!({"A": "/"}));
        assert!(slash.has_key());
        assert!(!BaseItem::new(&table, json!({"C": 1})).has_key());
    }

    #[test]
    fn test_slash_only_key_is_present() {
        let table = get_table("aws_sns_topic").unwrap();
        let item = BaseItem::new(&table, json!({"TopicArn": "/"}));
        assert!(item.has_key());
        assert_eq!(item.natural_key(), "/");
    }

    #[test]
    fn test_parse_key_value_tags() {
        let raw = json!([{"Key": "env", "Value": "prod"}, {"Key": "team"}]);
        let tags = parse_tags(&raw, TagFormat::KeyValueList);
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
        assert_eq!(tags.get("team").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_map_tags_and_apply() {
        let table = get_table("aws_sns_topic").unwrap();
        let mut item = BaseItem::new(&table, json!({"TopicArn": "a"}));
        item.apply_tags(parse_tags(&json!({"env": "dev", "n": 3}), TagFormat::Map));
        let tags = item.tags().unwrap();
        assert_eq!(tags["env"], "dev");
        assert_eq!(tags["n"], "3");
        assert_eq!(tags_to_value(tags), json!({"env": "dev", "n": "3"}));
    }
}
