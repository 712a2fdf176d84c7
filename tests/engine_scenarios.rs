//! End-to-end engine scenarios against the fixture provider
//!
//! Each test builds a small fixture document, runs a query through the
//! engine, and checks both the rows and the API calls that were made.

use cloudscan::engine::{EngineSettings, Operator, Qualifier, RegionSettings, ScopeState};
use cloudscan::provider::FixtureProvider;
use cloudscan::resource::{get_registry, TableRegistry};
use cloudscan::{Engine, QueryRequest, Row, ScanError};
use serde_json::{json, Value};
use std::sync::Arc;

const WIDGET_TABLES: &str = r#"{
  "tables": {
    "test_widget": {
      "service": "widget",
      "scope": "regional",
      "key_fields": ["Id"],
      "list": {
        "operation": "ListWidgets",
        "path": "/widgets",
        "items_path": "Widgets",
        "page_size_param": "MaxResults",
        "max_page_size": 100,
        "ignore_errors": ["AccessDenied"]
      },
      "get": {
        "operation": "GetWidget",
        "path": "/widgets/{id}",
        "key_columns": ["id"]
      },
      "hydrate": [
        { "name": "details", "operation": "DescribeWidget", "path": "/widgets/{Id}", "ignore_errors": ["WidgetGone"] },
        { "name": "owner", "operation": "GetOwner", "path": "/owners/{details.OwnerId}", "depends_on": ["details"] },
        { "name": "tags_src", "operation": "ListWidgetTags", "path": "/tags/{Id}" }
      ],
      "pushdown": [
        { "column": "name", "filter": "Name" },
        { "column": "color", "filter": "Color", "multi_value": true }
      ],
      "tags": { "hydrate": "tags_src", "path": "Tags", "format": "map" },
      "columns": [
        { "name": "id", "path": "Id" },
        { "name": "name", "path": "Name" },
        { "name": "color", "path": "Color" },
        { "name": "size", "hydrate": "details", "path": "Size" },
        { "name": "weight", "hydrate": "details", "path": "Weight" },
        { "name": "owner_name", "hydrate": "owner", "path": "Name" },
        { "name": "tags", "transform": "tags" }
      ]
    }
  }
}"#;

const REGIONS: [&str; 3] = ["us-east-1", "us-west-2", "eu-west-1"];

fn widgets(prefix: &str, count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "Id": format!("{}-{}", prefix, i),
                "Name": format!("widget {}", i),
                "Color": if i % 2 == 0 { "red" } else { "blue" }
            })
        })
        .collect()
}

fn widget_registry() -> TableRegistry {
    TableRegistry::from_json_str(WIDGET_TABLES).unwrap()
}

fn settings() -> EngineSettings {
    EngineSettings {
        regions: RegionSettings::new(vec!["*".to_string()], "us-east-1"),
        ..Default::default()
    }
}

fn engine(provider: Arc<FixtureProvider>, registry: TableRegistry, settings: EngineSettings) -> Engine {
    Engine::new(provider, registry, settings)
}

async fn run(engine: &Engine, request: QueryRequest) -> cloudscan::Result<Vec<Row>> {
    let stream = engine.execute(request).await?;
    let (rows, _) = stream.collect_all().await?;
    Ok(rows)
}

fn ids(rows: &[Row]) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_ignored_region_error_keeps_rows_from_all_regions() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 5) },
                    "us-west-2": {
                        "items": widgets("b", 2),
                        "page_size": 2,
                        "fail_after_pages": 1,
                        "error": { "code": "AccessDenied", "message": "not allowed" }
                    },
                    "eu-west-1": { "items": widgets("c", 5) }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let stream = engine
        .execute(QueryRequest::new("test_widget").columns(["id", "region"]))
        .await
        .unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();

    assert_eq!(rows.len(), 12);
    assert_eq!(rows.iter().filter(|r| r.scope == "us-west-2").count(), 2);
    assert!(rows.iter().all(|r| r.get("region") == Some(&json!(r.scope))));

    let west = reports.iter().find(|r| r.scope == "us-west-2").unwrap();
    assert_eq!(west.state, ScopeState::Done);
    assert_eq!(west.rows, 2);
    assert_eq!(west.ignored_error.as_ref().map(|e| e.code.as_str()), Some("AccessDenied"));
    assert!(reports.iter().all(|r| r.error.is_none()));
}

#[tokio::test]
async fn test_limit_bounds_rows_and_stops_pagination() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 10), "page_size": 2 },
                    "us-west-2": { "items": widgets("b", 10), "page_size": 2 },
                    "eu-west-1": { "items": widgets("c", 10), "page_size": 2 }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id"]).limit(7))
        .await
        .unwrap();

    assert_eq!(rows.len(), 7);
    let calls = provider.list_calls();
    assert!(calls.len() < 15, "expected early stop, got {} list calls", calls.len());
    assert!(calls.iter().all(|c| c.page_size.unwrap_or(0) <= 7));
}

#[tokio::test]
async fn test_shrinking_page_size_never_reserves_items() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 10), "page_size": 3 } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id"]).limit(5))
        .await
        .unwrap();

    assert_eq!(ids(&rows), vec!["a-0", "a-1", "a-2", "a-3", "a-4"]);
    let calls = provider.list_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].offset, 0);
    for pair in calls.windows(2) {
        assert_eq!(pair[1].offset, pair[0].offset + pair[0].returned);
    }
    assert!(calls.iter().map(|c| c.returned).sum::<usize>() <= 10);
}

#[tokio::test]
async fn test_zero_limit_makes_no_api_calls() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 3) } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let stream = engine
        .execute(QueryRequest::new("test_widget").columns(["id"]).limit(0))
        .await
        .unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(provider.total_calls(), 0);
    assert!(reports.iter().all(|r| r.state == ScopeState::Done && r.pages == 0));

    let stream = engine
        .execute(
            QueryRequest::new("test_widget")
                .qualifier(Qualifier::eq("id", "a-1"))
                .limit(0),
        )
        .await
        .unwrap();
    assert!(stream.collect_all().await.unwrap().0.is_empty());
    assert_eq!(provider.get_call_count(), 0);
}

#[tokio::test]
async fn test_conflicting_equalities_make_no_api_calls() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 3) } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget")
        .qualifier(Qualifier::eq("name", "widget 0"))
        .qualifier(Qualifier::eq("name", "widget 1"));
    let stream = engine.execute(request).await.unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();

    assert!(rows.is_empty());
    assert_eq!(provider.total_calls(), 0);
    assert!(reports.iter().all(|r| r.state == ScopeState::Done && r.pages == 0));
}

#[tokio::test]
async fn test_global_table_with_region_qualifier_has_no_scopes() {
    let provider = Arc::new(FixtureProvider::from_value(json!({ "regions": REGIONS })).unwrap());
    let engine = engine(provider.clone(), get_registry().clone(), settings());

    let request = QueryRequest::new("aws_iam_role").qualifier(Qualifier::eq("region", "us-east-1"));
    let stream = engine.execute(request).await.unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();

    assert!(rows.is_empty());
    assert!(reports.is_empty());
    assert_eq!(provider.total_calls(), 0);
}

#[tokio::test]
async fn test_region_qualifier_restricts_scopes() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 2) },
                    "eu-west-1": { "items": widgets("c", 2) }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget")
        .qualifier(Qualifier::new("region", Operator::Eq, json!(["eu-west-1", "ap-south-1"])));
    let rows = run(&engine, request.columns(["id"])).await.unwrap();

    assert_eq!(ids(&rows), vec!["c-0", "c-1"]);
    assert_eq!(provider.list_call_count("test_widget", "us-east-1"), 0);
}

#[tokio::test]
async fn test_unsupported_regions_are_never_called() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "service_regions": { "widget": ["us-east-1", "ap-south-1"] },
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 1) } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let stream = engine
        .execute(QueryRequest::new("test_widget").columns(["id"]))
        .await
        .unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(reports.len(), 1);
    assert_eq!(provider.list_call_count("test_widget", "us-west-2"), 0);
    assert_eq!(provider.list_call_count("test_widget", "eu-west-1"), 0);
}

#[tokio::test]
async fn test_hydrate_node_runs_once_per_item() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 3) } } },
            "hydrate": {
                "DescribeWidget": { "*": { "value": { "Size": 3, "Weight": 7, "OwnerId": "o-1" } } },
                "GetOwner": { "*": { "value": { "Name": "alice" } } }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget").columns(["id", "size", "weight", "owner_name"]);
    let rows = run(&engine, request).await.unwrap();

    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert_eq!(row.get("size"), Some(&json!(3)));
        assert_eq!(row.get("weight"), Some(&json!(7)));
        assert_eq!(row.get("owner_name"), Some(&json!("alice")));
        assert!(row.errors.is_empty());
    }
    for key in ["a-0", "a-1", "a-2"] {
        assert_eq!(provider.hydrate_call_count("DescribeWidget", key), 1);
        assert_eq!(provider.hydrate_call_count("GetOwner", key), 1);
        assert_eq!(provider.hydrate_call_count("ListWidgetTags", key), 0);
    }
}

#[tokio::test]
async fn test_fatal_hydrate_error_is_isolated_to_its_row() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 3) } } },
            "hydrate": {
                "DescribeWidget": {
                    "a-1": { "error": { "code": "InternalError", "message": "boom" } },
                    "*": { "value": { "Size": 3, "OwnerId": "o-1" } }
                },
                "GetOwner": { "*": { "value": { "Name": "alice" } } }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget").columns(["id", "size", "owner_name"]);
    let rows = run(&engine, request).await.unwrap();
    assert_eq!(rows.len(), 3);

    let row = |id: &str| rows.iter().find(|r| r.get("id") == Some(&json!(id))).unwrap();
    for id in ["a-0", "a-2"] {
        assert_eq!(row(id).get("size"), Some(&json!(3)));
        assert_eq!(row(id).get("owner_name"), Some(&json!("alice")));
        assert!(row(id).errors.is_empty());
    }

    let failed = row("a-1");
    assert_eq!(failed.get("size"), Some(&Value::Null));
    assert_eq!(failed.get("owner_name"), Some(&Value::Null));
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(failed.errors[0].hydrate, "details");
    assert_eq!(failed.errors[0].code, "InternalError");
    assert_eq!(provider.hydrate_call_count("GetOwner", "a-1"), 0);
}

#[tokio::test]
async fn test_ignored_hydrate_error_nulls_columns_quietly() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 1) } } },
            "hydrate": { "DescribeWidget": { "*": { "error": { "code": "WidgetGone" } } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id", "size"]))
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("size"), Some(&Value::Null));
    assert!(rows[0].errors.is_empty());
}

#[tokio::test]
async fn test_tags_hydrate_applies_tags() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 1) } } },
            "hydrate": { "ListWidgetTags": { "a-0": { "value": { "Tags": { "env": "prod" } } } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id", "tags"]))
        .await
        .unwrap();

    assert_eq!(rows[0].get("tags"), Some(&json!({ "env": "prod" })));
}

#[tokio::test]
async fn test_fatal_scope_error_fails_query_by_default() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 2) },
                    "us-west-2": { "error": { "code": "Throttling", "message": "slow down" } },
                    "eu-west-1": { "items": widgets("c", 2) }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let stream = engine
        .execute(QueryRequest::new("test_widget").columns(["id"]))
        .await
        .unwrap();
    let err = stream.collect_all().await.unwrap_err();

    match err {
        ScanError::Api { scope, source, .. } => {
            assert_eq!(scope, "us-west-2");
            assert_eq!(source.code, "Throttling");
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_without_fail_fast_other_scopes_complete() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": REGIONS,
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 2) },
                    "us-west-2": { "error": { "code": "Throttling" } },
                    "eu-west-1": { "items": widgets("c", 2) }
                }
            }
        }))
        .unwrap(),
    );
    let settings = EngineSettings {
        fail_fast: false,
        ..settings()
    };
    let engine = engine(provider, widget_registry(), settings);

    let stream = engine
        .execute(QueryRequest::new("test_widget").columns(["id"]))
        .await
        .unwrap();
    let (rows, reports) = stream.collect_all().await.unwrap();

    assert_eq!(rows.len(), 4);
    let west = reports.iter().find(|r| r.scope == "us-west-2").unwrap();
    assert_eq!(west.state, ScopeState::Failed);
    assert_eq!(west.error.as_ref().map(|e| e.code.as_str()), Some("Throttling"));
}

#[tokio::test]
async fn test_without_fail_fast_all_scopes_failing_is_an_error() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "error": { "code": "Throttling" } } } }
        }))
        .unwrap(),
    );
    let settings = EngineSettings {
        fail_fast: false,
        ..settings()
    };
    let engine = engine(provider, widget_registry(), settings);

    let stream = engine.execute(QueryRequest::new("test_widget")).await.unwrap();
    assert!(stream.collect_all().await.is_err());
}

#[tokio::test]
async fn test_connection_ignore_codes_apply() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "error": { "code": "OptInRequired" } } } }
        }))
        .unwrap(),
    );
    let settings = EngineSettings {
        ignore_error_codes: vec!["OptIn*".to_string()],
        ..settings()
    };
    let engine = engine(provider, widget_registry(), settings);

    let rows = run(&engine, QueryRequest::new("test_widget")).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_multi_value_pushdown_reaches_provider() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 4) } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget")
        .qualifier(Qualifier::eq("color", json!(["red"])))
        .columns(["id"]);
    let rows = run(&engine, request).await.unwrap();

    assert_eq!(ids(&rows), vec!["a-0", "a-2"]);
    let calls = provider.list_calls();
    assert_eq!(calls[0].filters.len(), 1);
    assert_eq!(calls[0].filters[0].name, "Color");
    assert_eq!(calls[0].filters[0].values, vec!["red"]);
}

#[tokio::test]
async fn test_key_qualifier_uses_get() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": widgets("a", 4) } } },
            "get": {
                "test_widget": {
                    "us-east-1": { "a-1": { "value": { "Id": "a-1", "Name": "widget 1" } } }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let request = QueryRequest::new("test_widget")
        .qualifier(Qualifier::eq("id", "a-1"))
        .columns(["id", "name"]);
    let rows = run(&engine, request).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("widget 1")));
    assert_eq!(provider.get_call_count(), 1);
    assert!(provider.list_calls().is_empty());
}

#[tokio::test]
async fn test_get_response_seeds_matching_hydrate() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "get": {
                "aws_iam_role": {
                    "global": {
                        "admin": {
                            "value": {
                                "Role": {
                                    "RoleName": "admin",
                                    "Arn": "arn:aws:iam::123456789012:role/admin",
                                    "MaxSessionDuration": 3600
                                }
                            }
                        }
                    }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), get_registry().clone(), settings());

    let request = QueryRequest::new("aws_iam_role")
        .qualifier(Qualifier::eq("name", "admin"))
        .columns(["name", "max_session_duration", "region", "partition"]);
    let rows = run(&engine, request).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("max_session_duration"), Some(&json!(3600)));
    assert_eq!(rows[0].get("region"), Some(&json!("global")));
    assert_eq!(rows[0].get("partition"), Some(&json!("aws")));
    assert_eq!(
        provider.hydrate_call_count("GetRole", "arn:aws:iam::123456789012:role/admin"),
        0
    );
}

#[tokio::test]
async fn test_missing_get_item_is_zero_rows() {
    let provider = Arc::new(FixtureProvider::from_value(json!({ "regions": ["us-east-1"] })).unwrap());
    let engine = engine(provider, widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").qualifier(Qualifier::eq("id", "nope")))
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_duplicate_items_emitted_once_per_scope() {
    let mut items = widgets("a", 2);
    items.push(items[0].clone());
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": { "test_widget": { "us-east-1": { "items": items, "page_size": 1 } } }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id"]))
        .await
        .unwrap();
    assert_eq!(ids(&rows), vec!["a-0", "a-1"]);
}

#[tokio::test]
async fn test_repeated_cursor_stops_pagination() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": {
                "test_widget": {
                    "us-east-1": { "items": widgets("a", 5), "page_size": 1, "repeat_cursor": true }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), widget_registry(), settings());

    let rows = run(&engine, QueryRequest::new("test_widget").columns(["id"]))
        .await
        .unwrap();

    assert_eq!(provider.list_call_count("test_widget", "us-east-1"), 2);
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_api_minimum_page_size_is_respected() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions": ["us-east-1"],
            "tables": {
                "aws_rds_db_snapshot": {
                    "us-east-1": {
                        "items": [
                            { "DBSnapshotIdentifier": "s1" },
                            { "DBSnapshotIdentifier": "s2" },
                            { "DBSnapshotIdentifier": "s3" }
                        ]
                    }
                }
            }
        }))
        .unwrap(),
    );
    let engine = engine(provider.clone(), get_registry().clone(), settings());

    let rows = run(
        &engine,
        QueryRequest::new("aws_rds_db_snapshot")
            .columns(["db_snapshot_identifier"])
            .limit(2),
    )
    .await
    .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(provider.list_calls()[0].page_size, Some(20));
}

#[tokio::test]
async fn test_region_discovery_failure_fails_query() {
    let provider = Arc::new(
        FixtureProvider::from_value(json!({
            "regions_error": { "code": "UnauthorizedOperation", "message": "denied" }
        }))
        .unwrap(),
    );
    let engine = engine(provider, widget_registry(), settings());

    let err = engine.execute(QueryRequest::new("test_widget")).await.err().unwrap();
    assert!(matches!(err, ScanError::ScopeDiscovery(_)), "{err}");
}

#[tokio::test]
async fn test_unknown_table_and_column_rejected() {
    let provider = Arc::new(FixtureProvider::default());
    let engine = engine(provider, widget_registry(), settings());

    let err = engine.execute(QueryRequest::new("nope")).await.err().unwrap();
    assert!(matches!(err, ScanError::UnknownTable(_)));

    let err = engine
        .execute(QueryRequest::new("test_widget").columns(["bogus"]))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::UnknownColumn { .. }));

    let err = engine
        .execute(QueryRequest::new("test_widget").qualifier(Qualifier::eq("bogus", 1)))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ScanError::UnknownColumn { .. }));
}

#[tokio::test]
async fn test_regional_and_global_table_lists_global_first() {
    let provider = Arc::new(FixtureProvider::from_value(json!({ "regions": ["eu-west-1"] })).unwrap());
    let engine = engine(provider, get_registry().clone(), settings());

    let scopes = engine.scopes("aws_wafv2_web_acl", &[]).await.unwrap();
    let names: Vec<&str> = scopes.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["global", "eu-west-1"]);
    assert_eq!(scopes[0].endpoint_region(), "us-east-1");
}
