//! End-to-end scenarios driven entirely through the public API: build a
//! dataset from in-memory stripes, hand-build the `Query`/`Expr` tree a
//! parser would otherwise produce, execute, and check the resulting JSON.

use std::collections::HashMap;

use serde_json::json;
use stripe_query::{
    execute, execute_with_abort, Chunk, ColumnSchema, Dtype, EngineConfig, Expr, MemoryCatalog,
    MemoryDataset, MemoryStripe, Query, QueryError, Schema,
};

fn dataset(columns: Vec<(&str, Dtype, Chunk)>) -> MemoryCatalog {
    let schema = Schema::new(
        columns
            .iter()
            .map(|(name, dtype, chunk)| ColumnSchema {
                name: name.to_string(),
                dtype: *dtype,
                nullable: chunk.nullable(),
            })
            .collect(),
    );
    let mut cols = HashMap::new();
    for (name, _, chunk) in columns {
        cols.insert(name.to_string(), chunk);
    }
    let mut catalog = MemoryCatalog::new();
    catalog.insert("t", MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]));
    catalog
}

#[test]
fn s1_basic_projection_with_limit() {
    let catalog = dataset(vec![
        ("foo", Dtype::Int, Chunk::from_ints(vec![1, 4, 7], None)),
        ("bar", Dtype::Int, Chunk::from_ints(vec![2, 5, 8], None)),
        ("baz", Dtype::Int, Chunk::from_ints(vec![3, 6, 9], None)),
    ]);
    let query = Query {
        projections: vec![Expr::identifier("foo"), Expr::identifier("bar"), Expr::identifier("baz")],
        dataset: Some("t".to_string()),
        limit: Some(2),
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["nrows"], json!(2));
    assert_eq!(out["ordering"], json!([null, null, null]));
    assert_eq!(out["data"][0][0], json!(1));
    assert_eq!(out["data"][1][0], json!(4));
}

#[test]
fn s2_filter() {
    let catalog = dataset(vec![
        ("foo", Dtype::Int, Chunk::from_ints(vec![1, 5, 10], None)),
        ("bar", Dtype::Int, Chunk::from_ints(vec![4, 5, 4], None)),
    ]);
    let query = Query {
        projections: vec![Expr::identifier("foo")],
        dataset: Some("t".to_string()),
        filter: Some(Expr::Binary(
            stripe_query::BinaryOp::Gte,
            Box::new(Expr::identifier("foo")),
            Box::new(Expr::identifier("bar")),
        )),
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["data"][0][0], json!(5));
    assert_eq!(out["data"][1][0], json!(10));
    assert_eq!(out["nrows"], json!(2));
}

#[test]
fn s3_group_by_with_aggregates() {
    let catalog = dataset(vec![
        ("foo", Dtype::Int, Chunk::from_ints(vec![1, 13, 1], None)),
        ("bar", Dtype::Int, Chunk::from_ints(vec![12, 2, 3], None)),
    ]);
    let query = Query {
        projections: vec![Expr::identifier("foo"), Expr::call("min", vec![Expr::identifier("bar")])],
        dataset: Some("t".to_string()),
        group_by: vec![Expr::identifier("foo")],
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["data"], json!([[1, 3], [13, 2]]));
}

#[test]
fn s4_null_aware_count() {
    use stripe_query::Bitmap;

    // foo,bar\n1,\n,\n1,10\n,4\n,\n
    let foo = Chunk::from_ints(vec![1, 0, 1, 0, 0], Some(Bitmap::from_ones(5, [1, 3, 4])));
    let bar = Chunk::from_ints(vec![0, 0, 10, 4, 0], Some(Bitmap::from_ones(5, [0, 1, 4])));
    let catalog = dataset(vec![("foo", Dtype::Int, foo), ("bar", Dtype::Int, bar)]);

    let query = Query {
        projections: vec![
            Expr::identifier("foo"),
            Expr::call("count", vec![Expr::identifier("bar")]),
            Expr::call("count", vec![]),
        ],
        dataset: Some("t".to_string()),
        group_by: vec![Expr::identifier("foo")],
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["data"], json!([[1, 1, 2], [null, 1, 3]]));
}

#[test]
fn s5_filter_with_null_literal_equality() {
    use stripe_query::Bitmap;

    let foo = Chunk::from_ints(vec![0, 5, 0], Some(Bitmap::from_ones(3, [0, 2])));
    let bar = Chunk::from_ints(vec![4, 5, 6], None);
    let catalog = dataset(vec![("foo", Dtype::Int, foo), ("bar", Dtype::Int, bar)]);

    let query = Query {
        projections: vec![Expr::identifier("bar")],
        dataset: Some("t".to_string()),
        filter: Some(Expr::Binary(stripe_query::BinaryOp::Eq, Box::new(Expr::identifier("foo")), Box::new(Expr::null()))),
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["data"], json!([[4], [6]]));
}

#[test]
fn s6_order_and_limit() {
    let catalog = dataset(vec![("foo", Dtype::Int, Chunk::from_ints(vec![3, 1, 2, 5, 4], None))]);
    let query = Query {
        projections: vec![Expr::identifier("foo")],
        dataset: Some("t".to_string()),
        order_by: vec![Expr::identifier("foo").order(false, false)],
        limit: Some(2),
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["data"], json!([[5], [4]]));
    assert_eq!(out["ordering"], json!(["desc"]));
}

#[test]
fn scalar_query_has_no_dataset_dependency() {
    let catalog = MemoryCatalog::new();
    let query = Query {
        projections: vec![Expr::lit(stripe_query::Scalar::Int(7)).relabel("answer")],
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["nrows"], json!(1));
    assert_eq!(out["data"][0][0], json!(7));
    assert_eq!(out["schema"]["columns"][0]["name"], json!("answer"));
}

#[test]
fn unknown_column_in_projection_is_a_client_error() {
    let catalog = dataset(vec![("foo", Dtype::Int, Chunk::from_ints(vec![1], None))]);
    let query = Query {
        projections: vec![Expr::identifier("nope")],
        dataset: Some("t".to_string()),
        ..Default::default()
    };
    let err = execute(&query, &catalog, &EngineConfig::default()).unwrap_err();
    assert_eq!(err.classification(), stripe_query::ErrorClass::Client);
}

#[test]
fn column_free_projection_over_a_dataset_repeats_per_row() {
    let catalog = dataset(vec![("foo", Dtype::Int, Chunk::from_ints(vec![1, 4, 7], None))]);
    let query = Query {
        projections: vec![Expr::lit(stripe_query::Scalar::Int(9))],
        dataset: Some("t".to_string()),
        ..Default::default()
    };
    let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
    let out = result.to_json();
    assert_eq!(out["nrows"], json!(3));
    assert_eq!(out["data"], json!([[9], [9], [9]]));
}

#[test]
fn abort_predicate_stops_execution_with_cancelled() {
    let catalog = dataset(vec![("foo", Dtype::Int, Chunk::from_ints(vec![1, 4, 7], None))]);
    let query = Query {
        projections: vec![Expr::identifier("foo")],
        dataset: Some("t".to_string()),
        ..Default::default()
    };
    let err =
        execute_with_abort(&query, &catalog, &EngineConfig::default(), &|| true).unwrap_err();
    assert!(matches!(err, QueryError::Cancelled));
    assert_eq!(err.classification(), stripe_query::ErrorClass::Runtime);
}

#[test]
fn count_distinct_reports_not_implemented() {
    let catalog = dataset(vec![("foo", Dtype::Int, Chunk::from_ints(vec![1, 4, 7], None))]);
    let query = Query {
        projections: vec![Expr::call("count_distinct", vec![Expr::identifier("foo")])],
        dataset: Some("t".to_string()),
        ..Default::default()
    };
    let err = execute(&query, &catalog, &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, QueryError::NotImplemented { .. }));
}
