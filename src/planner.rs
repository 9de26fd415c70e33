//! Planner/Driver: resolves a query against a dataset catalog and drives it
//! through the Parse → Resolve → ExpandStar → TypeCheck → Classify →
//! Execute → Finalise → Emit pipeline.

use std::collections::BTreeSet;

use tracing::debug;

use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::dataset::{Catalog, Dataset};
use crate::error::{QueryError, Result};
use crate::eval::{evaluate, Batch};
use crate::expr::{is_aggregate_name, Expr};
use crate::group::{AggSpec, GroupEngine};
use crate::aggregate::{AggKind, NumericKind};
use crate::result::{QueryResult, SortKey};
use crate::schema::{ColumnSchema, Schema};
use crate::value::Dtype;

/// Query AST consumed from the (out-of-scope) parser.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub projections: Vec<Expr>,
    pub dataset: Option<String>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<Expr>,
    pub limit: Option<i64>,
}

/// Execution configuration threaded into the driver, analogous to
/// `iox_query::exec::ExecutorConfig`.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Null placement used for an `ORDER BY` element that isn't itself
    /// `Ordering`-wrapped with an explicit null order.
    pub default_nulls_first: bool,
    /// Safety cap on distinct groups a single query may create.
    pub max_groups: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { default_nulls_first: false, max_groups: None }
    }
}

/// Checked at each stripe boundary; when it returns `true` the driver stops
/// and reports [`QueryError::Cancelled`] instead of finishing the query.
pub type AbortPredicate<'a> = dyn Fn() -> bool + 'a;

fn check_abort(abort: &AbortPredicate<'_>) -> Result<()> {
    if abort() {
        return Err(QueryError::Cancelled);
    }
    Ok(())
}

pub fn execute(query: &Query, catalog: &dyn Catalog, config: &EngineConfig) -> Result<QueryResult> {
    execute_with_abort(query, catalog, config, &|| false)
}

/// Same as [`execute`], but `abort` is polled at the start of every stripe
/// iteration; a query cancelled mid-scan or mid-aggregation returns
/// [`QueryError::Cancelled`] rather than a partial result.
pub fn execute_with_abort(
    query: &Query,
    catalog: &dyn Catalog,
    config: &EngineConfig,
    abort: &AbortPredicate<'_>,
) -> Result<QueryResult> {
    if query.projections.is_empty() {
        return Err(QueryError::NoProjection);
    }
    let limit = validate_limit(query.limit)?;

    match &query.dataset {
        None => {
            debug!(kind = "Scalar", ?limit, "classified query");
            execute_scalar(query, config, limit)
        }
        Some(id) => {
            let dataset = catalog.get_dataset(id).ok_or_else(|| QueryError::DatasetNotFound { id: id.clone() })?;
            let schema = dataset.schema().clone();
            let projections = expand_star(&query.projections, &schema);
            if projections.is_empty() {
                return Err(QueryError::NoProjection);
            }

            if let Some(filter) = &query.filter {
                let (dtype, _) = filter.return_type(&schema)?;
                if dtype != Dtype::Bool {
                    return Err(QueryError::InvalidFilter {
                        msg: format!("filter must evaluate to bool, got {dtype}"),
                    });
                }
            }

            let mut agg_calls = Vec::new();
            for p in &projections {
                collect_aggregate_calls(p, &mut agg_calls);
            }
            let is_aggregate = !query.group_by.is_empty() || !agg_calls.is_empty();

            if is_aggregate {
                debug!(dataset = %id, ?limit, kind = "Aggregate", "classified query");
                execute_aggregate(&projections, agg_calls, query, dataset, &schema, config, limit, abort)
            } else {
                debug!(dataset = %id, ?limit, kind = "Scan", "classified query");
                execute_scan(&projections, query, dataset, &schema, config, limit, abort)
            }
        }
    }
}

fn validate_limit(limit: Option<i64>) -> Result<Option<usize>> {
    match limit {
        None => Ok(None),
        Some(l) if l < 0 => Err(QueryError::InvalidLimit { limit: l }),
        Some(l) => Ok(Some(l as usize)),
    }
}

/// Replace bare `*` projections with one `Identifier` per schema column, in
/// schema order.
fn expand_star(projections: &[Expr], schema: &Schema) -> Vec<Expr> {
    projections
        .iter()
        .flat_map(|p| match p {
            Expr::Identifier(name) if name == "*" => {
                schema.columns.iter().map(|c| Expr::identifier(c.name.clone())).collect::<Vec<_>>()
            }
            other => vec![other.clone()],
        })
        .collect()
}

fn collect_aggregate_calls(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Function(name, _) if is_aggregate_name(name) => {
            let key = expr.canonical_key();
            if !out.iter().any(|e| e.canonical_key() == key) {
                out.push(expr.clone());
            }
        }
        Expr::Function(_, args) => {
            for a in args {
                collect_aggregate_calls(a, out);
            }
        }
        Expr::Unary(_, c) => collect_aggregate_calls(c, out),
        Expr::Binary(_, l, r) => {
            collect_aggregate_calls(l, out);
            collect_aggregate_calls(r, out);
        }
        Expr::Relabel(inner, _) => collect_aggregate_calls(inner, out),
        Expr::Ordering(inner, _, _) => collect_aggregate_calls(inner, out),
        Expr::Identifier(_) | Expr::Literal(..) => {}
    }
}

fn projection_name(expr: &Expr) -> String {
    if let Some(alias) = expr.alias() {
        return alias.to_string();
    }
    match expr.strip_wrappers() {
        Expr::Identifier(name) => name.clone(),
        other => other.canonical_key(),
    }
}

fn sub_schema_for(schema: &Schema, names: &[&str]) -> Schema {
    let cols = names
        .iter()
        .map(|n| schema.find(n).expect("column validated during columns_used").1.clone())
        .collect();
    Schema::new(cols)
}

/// `SELECT <exprs with no column refs>` — evaluated once at length 1 with no
/// columns bound.
fn execute_scalar(query: &Query, config: &EngineConfig, limit: Option<usize>) -> Result<QueryResult> {
    for p in &query.projections {
        if let Some(name) = p.first_identifier() {
            return Err(QueryError::NoDatasetIdentifiers { name: name.to_string() });
        }
    }
    let batch = Batch::scalar(1);
    let columns: Vec<Chunk> =
        query.projections.iter().map(|p| evaluate(p, &batch)).collect::<Result<_>>()?;

    let empty_schema = Schema::new(vec![]);
    finalize(&query.projections, &empty_schema, columns, query, config, limit)
}

fn execute_scan(
    projections: &[Expr],
    query: &Query,
    dataset: &dyn Dataset,
    schema: &Schema,
    config: &EngineConfig,
    limit: Option<usize>,
    abort: &AbortPredicate<'_>,
) -> Result<QueryResult> {
    let mut needed: BTreeSet<String> = BTreeSet::new();
    for p in projections {
        needed.extend(p.columns_used(schema)?);
    }
    if let Some(f) = &query.filter {
        needed.extend(f.columns_used(schema)?);
    }
    for o in &query.order_by {
        needed.extend(o.strip_wrappers().columns_used(schema)?);
    }
    let names: Vec<&str> = needed.iter().map(String::as_str).collect();

    // Pushdown only applies with no ORDER BY: an order clause needs every
    // matching row collected before it can be sorted and truncated.
    let push_down = limit.is_some() && query.order_by.is_empty();
    let mut remaining = limit;

    let mut acc: Vec<Option<Chunk>> = vec![None; projections.len()];

    for stripe_idx in 0..dataset.stripe_count() {
        check_abort(abort)?;
        if push_down && remaining == Some(0) {
            break;
        }
        let stripe = dataset.stripe(stripe_idx);
        let cols = stripe.read_columns(&names)?;
        let sub_schema = sub_schema_for(schema, &names);
        // A column-free projection list (e.g. `SELECT 1 FROM t`) reads no
        // columns, but the literal must still repeat once per stripe row —
        // drive the batch length from the stripe itself rather than from an
        // empty column list.
        let batch =
            if cols.is_empty() { Batch::scalar(stripe.len()) } else { Batch::new(sub_schema, cols) };

        let mut mask = match &query.filter {
            Some(f) => evaluate(f, &batch)?.truths()?,
            None => Bitmap::all_ones(batch.len()),
        };

        if push_down {
            if let Some(rem) = remaining {
                if mask.count() > rem {
                    mask.keep_first_n(rem);
                }
            }
        }

        let kept = mask.count();
        if kept > 0 {
            let pruned_columns: Vec<Chunk> = batch.columns().iter().map(|c| c.prune(&mask)).collect();
            let pruned_batch = if pruned_columns.is_empty() {
                Batch::scalar(kept)
            } else {
                Batch::new(batch.schema().clone(), pruned_columns)
            };
            for (i, p) in projections.iter().enumerate() {
                let chunk = evaluate(p, &pruned_batch)?;
                acc[i] = Some(match acc[i].take() {
                    Some(prev) => prev.append(&chunk)?,
                    None => chunk,
                });
            }
        }

        if push_down {
            remaining = remaining.map(|r| r.saturating_sub(kept));
        }
    }

    let columns = acc
        .into_iter()
        .enumerate()
        .map(|(i, c)| match c {
            Some(chunk) => Ok(chunk),
            None => Ok(Chunk::constant(projections[i].return_type(schema)?.0, true, None, 0)),
        })
        .collect::<Result<Vec<_>>>()?;

    finalize(projections, schema, columns, query, config, limit)
}

fn build_agg_spec(call: &Expr, schema: &Schema) -> Result<AggSpec> {
    let (name, args) = match call {
        Expr::Function(n, a) => (n.to_lowercase(), a),
        _ => unreachable!("collect_aggregate_calls only collects Function nodes"),
    };
    call.return_type(schema)?;
    match name.as_str() {
        "count_star" => Ok(AggSpec { kind: AggKind::CountStar, arg: None, arg_dtype: Dtype::Null }),
        "count" => {
            if args.is_empty() {
                Ok(AggSpec { kind: AggKind::CountStar, arg: None, arg_dtype: Dtype::Null })
            } else {
                let d = args[0].return_type(schema)?.0;
                Ok(AggSpec { kind: AggKind::Count, arg: Some(args[0].clone()), arg_dtype: d })
            }
        }
        "sum" => {
            let d = args[0].return_type(schema)?.0;
            let nk = match d {
                Dtype::Int => NumericKind::Int,
                Dtype::Float => NumericKind::Float,
                other => return Err(QueryError::TypeError { msg: format!("sum is not supported on dtype {other}") }),
            };
            Ok(AggSpec { kind: AggKind::Sum(nk), arg: Some(args[0].clone()), arg_dtype: d })
        }
        "avg" => {
            let d = args[0].return_type(schema)?.0;
            Ok(AggSpec { kind: AggKind::Avg, arg: Some(args[0].clone()), arg_dtype: d })
        }
        "min" => {
            let d = args[0].return_type(schema)?.0;
            Ok(AggSpec { kind: AggKind::Min, arg: Some(args[0].clone()), arg_dtype: d })
        }
        "max" => {
            let d = args[0].return_type(schema)?.0;
            Ok(AggSpec { kind: AggKind::Max, arg: Some(args[0].clone()), arg_dtype: d })
        }
        other => Err(QueryError::UnknownFunction { name: other.to_string() }),
    }
}

/// Replace every subtree that exactly matches a group key with a reference
/// to its resolved key column, and every aggregate call with a reference to
/// its resolved result column, leaving everything else (arithmetic wrapping
/// aggregates, literals) untouched for ordinary evaluation.
fn substitute(expr: &Expr, group_keys: &[Expr], gk_names: &[String], agg_calls: &[Expr], agg_names: &[String]) -> Expr {
    let key = expr.canonical_key();
    if let Some(pos) = group_keys.iter().position(|g| g.canonical_key() == key) {
        return Expr::identifier(gk_names[pos].clone());
    }
    if let Some(pos) = agg_calls.iter().position(|a| a.canonical_key() == key) {
        return Expr::identifier(agg_names[pos].clone());
    }
    match expr {
        Expr::Identifier(_) | Expr::Literal(..) => expr.clone(),
        Expr::Unary(op, c) => Expr::Unary(*op, Box::new(substitute(c, group_keys, gk_names, agg_calls, agg_names))),
        Expr::Binary(op, l, r) => Expr::Binary(
            *op,
            Box::new(substitute(l, group_keys, gk_names, agg_calls, agg_names)),
            Box::new(substitute(r, group_keys, gk_names, agg_calls, agg_names)),
        ),
        Expr::Function(name, args) => Expr::Function(
            name.clone(),
            args.iter().map(|a| substitute(a, group_keys, gk_names, agg_calls, agg_names)).collect(),
        ),
        Expr::Relabel(inner, label) => {
            Expr::Relabel(Box::new(substitute(inner, group_keys, gk_names, agg_calls, agg_names)), label.clone())
        }
        Expr::Ordering(inner, asc, nulls_first) => Expr::Ordering(
            Box::new(substitute(inner, group_keys, gk_names, agg_calls, agg_names)),
            *asc,
            *nulls_first,
        ),
    }
}

fn execute_aggregate(
    projections: &[Expr],
    agg_calls: Vec<Expr>,
    query: &Query,
    dataset: &dyn Dataset,
    schema: &Schema,
    config: &EngineConfig,
    limit: Option<usize>,
    abort: &AbortPredicate<'_>,
) -> Result<QueryResult> {
    let group_keys = &query.group_by;

    for p in projections {
        let key = p.strip_wrappers().canonical_key();
        let matches_group_key = group_keys.iter().any(|g| g.canonical_key() == key);
        if !matches_group_key && !p.all_free_vars_aggregated() {
            return Err(QueryError::InvalidProjectionInAggregation { expr: p.canonical_key() });
        }
    }

    let agg_specs: Vec<AggSpec> =
        agg_calls.iter().map(|call| build_agg_spec(call, schema)).collect::<Result<_>>()?;

    let mut needed: BTreeSet<String> = BTreeSet::new();
    for g in group_keys {
        needed.extend(g.columns_used(schema)?);
    }
    for call in &agg_calls {
        if let Expr::Function(_, args) = call {
            for a in args {
                needed.extend(a.columns_used(schema)?);
            }
        }
    }
    if let Some(f) = &query.filter {
        needed.extend(f.columns_used(schema)?);
    }
    let names: Vec<&str> = needed.iter().map(String::as_str).collect();

    let mut engine = GroupEngine::new(group_keys.clone(), agg_specs, config.max_groups);
    for stripe_idx in 0..dataset.stripe_count() {
        check_abort(abort)?;
        let stripe = dataset.stripe(stripe_idx);
        let cols = stripe.read_columns(&names)?;
        let sub_schema = sub_schema_for(schema, &names);
        let batch = Batch::new(sub_schema, cols);
        engine.feed_stripe(&batch, query.filter.as_ref())?;
    }
    let (key_chunks, agg_chunks) = engine.finish()?;

    let mut synth_cols = Vec::new();
    let mut synth_chunks = Vec::new();
    let mut gk_names = Vec::new();
    for (i, key_expr) in group_keys.iter().enumerate() {
        let (dtype, _) = key_expr.return_type(schema)?;
        let name = format!("__gk{i}");
        synth_cols.push(ColumnSchema { name: name.clone(), dtype, nullable: true });
        synth_chunks.push(key_chunks[i].clone());
        gk_names.push(name);
    }
    let mut agg_names = Vec::new();
    for (i, call) in agg_calls.iter().enumerate() {
        let (dtype, nullable) = call.return_type(schema)?;
        let name = format!("__agg{i}");
        synth_cols.push(ColumnSchema { name: name.clone(), dtype, nullable });
        synth_chunks.push(agg_chunks[i].clone());
        agg_names.push(name);
    }
    let synth_schema = Schema::new(synth_cols);
    let synth_batch = Batch::new(synth_schema, synth_chunks);

    let out_columns: Vec<Chunk> = projections
        .iter()
        .map(|p| evaluate(&substitute(p, group_keys, &gk_names, &agg_calls, &agg_names), &synth_batch))
        .collect::<Result<_>>()?;

    finalize(projections, schema, out_columns, query, config, limit)
}

fn finalize(
    projections: &[Expr],
    schema: &Schema,
    columns: Vec<Chunk>,
    query: &Query,
    config: &EngineConfig,
    limit: Option<usize>,
) -> Result<QueryResult> {
    let mut out_cols = Vec::with_capacity(projections.len());
    for p in projections {
        let (dtype, nullable) = p.return_type(schema)?;
        out_cols.push(ColumnSchema { name: projection_name(p), dtype, nullable });
    }
    let out_schema = Schema::new(out_cols);
    let mut result = QueryResult::new(out_schema, columns);

    if !query.order_by.is_empty() {
        let mut keys = Vec::with_capacity(query.order_by.len());
        for order_expr in &query.order_by {
            let (asc, nulls_first, inner) = match order_expr {
                Expr::Ordering(inner, asc, nulls_first) => (*asc, *nulls_first, inner.as_ref()),
                other => (true, config.default_nulls_first, other),
            };
            let target_key = inner.canonical_key();
            let idx = projections
                .iter()
                .position(|p| {
                    p.strip_wrappers().canonical_key() == target_key
                        || p.alias().map(|a| a.eq_ignore_ascii_case(&target_key)).unwrap_or(false)
                })
                .ok_or_else(|| QueryError::InvalidOrderClause { expr: target_key.clone() })?;
            keys.push(SortKey { column: idx, asc, nulls_first });
        }
        result.sort(&keys);
    }

    if let Some(limit) = limit {
        result.limit(limit);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{MemoryCatalog, MemoryDataset, MemoryStripe};
    use crate::expr::BinaryOp;
    use crate::value::Scalar;
    use std::collections::HashMap;

    fn make_dataset() -> MemoryCatalog {
        let schema = Schema::new(vec![
            ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: true },
            ColumnSchema { name: "bar".into(), dtype: Dtype::Int, nullable: true },
        ]);
        let mut cols = HashMap::new();
        cols.insert("foo".to_string(), Chunk::from_ints(vec![1, 4, 7], None));
        cols.insert("bar".to_string(), Chunk::from_ints(vec![2, 5, 8], None));
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);
        catalog
    }

    #[test]
    fn s1_basic_projection_with_limit() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("foo"), Expr::identifier("bar")],
            dataset: Some("t".to_string()),
            limit: Some(2),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(1));
        assert_eq!(result.columns[0].get_int(1), Some(4));
    }

    #[test]
    fn s2_filter() {
        let schema = Schema::new(vec![
            ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: false },
            ColumnSchema { name: "bar".into(), dtype: Dtype::Int, nullable: false },
        ]);
        let mut cols = HashMap::new();
        cols.insert("foo".to_string(), Chunk::from_ints(vec![1, 5, 10], None));
        cols.insert("bar".to_string(), Chunk::from_ints(vec![4, 5, 4], None));
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

        let query = Query {
            projections: vec![Expr::identifier("foo")],
            dataset: Some("t".to_string()),
            filter: Some(Expr::Binary(
                BinaryOp::Gte,
                Box::new(Expr::identifier("foo")),
                Box::new(Expr::identifier("bar")),
            )),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(5));
        assert_eq!(result.columns[0].get_int(1), Some(10));
    }

    #[test]
    fn s3_group_by_with_min_aggregate() {
        let schema = Schema::new(vec![
            ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: false },
            ColumnSchema { name: "bar".into(), dtype: Dtype::Int, nullable: false },
        ]);
        let mut cols = HashMap::new();
        cols.insert("foo".to_string(), Chunk::from_ints(vec![1, 13, 1], None));
        cols.insert("bar".to_string(), Chunk::from_ints(vec![12, 2, 3], None));
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

        let query = Query {
            projections: vec![Expr::identifier("foo"), Expr::call("min", vec![Expr::identifier("bar")])],
            dataset: Some("t".to_string()),
            group_by: vec![Expr::identifier("foo")],
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(1));
        assert_eq!(result.columns[1].get_int(0), Some(3));
        assert_eq!(result.columns[0].get_int(1), Some(13));
        assert_eq!(result.columns[1].get_int(1), Some(2));
    }

    #[test]
    fn s4_null_aware_count() {
        let schema = Schema::new(vec![
            ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: true },
            ColumnSchema { name: "bar".into(), dtype: Dtype::Int, nullable: true },
        ]);
        // foo,bar\n1,\n,\n1,10\n,4\n,\n
        let mut cols = HashMap::new();
        cols.insert(
            "foo".to_string(),
            Chunk::from_ints(vec![1, 0, 1, 0, 0], Some(Bitmap::from_ones(5, [1, 3, 4]))),
        );
        cols.insert(
            "bar".to_string(),
            Chunk::from_ints(vec![0, 0, 10, 4, 0], Some(Bitmap::from_ones(5, [0, 1, 4]))),
        );
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

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
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(1));
        assert_eq!(result.columns[1].get_int(0), Some(1));
        assert_eq!(result.columns[2].get_int(0), Some(2));
        assert!(result.columns[0].is_null(1));
        assert_eq!(result.columns[1].get_int(1), Some(1));
        assert_eq!(result.columns[2].get_int(1), Some(3));
    }

    #[test]
    fn s5_filter_with_null_literal_equality() {
        let schema = Schema::new(vec![
            ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: true },
            ColumnSchema { name: "bar".into(), dtype: Dtype::Int, nullable: false },
        ]);
        let mut cols = HashMap::new();
        cols.insert("foo".to_string(), Chunk::from_ints(vec![0, 5, 0], Some(Bitmap::from_ones(3, [0, 2]))));
        cols.insert("bar".to_string(), Chunk::from_ints(vec![4, 5, 6], None));
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

        let query = Query {
            projections: vec![Expr::identifier("bar")],
            dataset: Some("t".to_string()),
            filter: Some(Expr::Binary(BinaryOp::Eq, Box::new(Expr::identifier("foo")), Box::new(Expr::null()))),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(4));
        assert_eq!(result.columns[0].get_int(1), Some(6));
    }

    #[test]
    fn s6_order_and_limit() {
        let schema = Schema::new(vec![ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: false }]);
        let mut cols = HashMap::new();
        cols.insert("foo".to_string(), Chunk::from_ints(vec![3, 1, 2, 5, 4], None));
        let dataset = MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

        let query = Query {
            projections: vec![Expr::identifier("foo")],
            dataset: Some("t".to_string()),
            order_by: vec![Expr::identifier("foo").order(false, false)],
            limit: Some(2),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.columns[0].get_int(0), Some(5));
        assert_eq!(result.columns[0].get_int(1), Some(4));
    }

    #[test]
    fn empty_dataset_aggregate_returns_identity_row() {
        let schema = Schema::new(vec![ColumnSchema { name: "foo".into(), dtype: Dtype::Int, nullable: true }]);
        let dataset = MemoryDataset::new(schema, vec![]);
        let mut catalog = MemoryCatalog::new();
        catalog.insert("t", dataset);

        let query = Query {
            projections: vec![
                Expr::call("count", vec![]),
                Expr::call("sum", vec![Expr::identifier("foo")]),
            ],
            dataset: Some("t".to_string()),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns[0].get_int(0), Some(0));
        assert!(result.columns[1].is_null(0));
    }

    #[test]
    fn scalar_query_with_no_dataset() {
        let query = Query { projections: vec![Expr::lit(Scalar::Int(42))], ..Default::default() };
        let catalog = MemoryCatalog::new();
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns[0].get_int(0), Some(42));
    }

    #[test]
    fn scalar_query_rejects_identifiers() {
        let query = Query { projections: vec![Expr::identifier("foo")], ..Default::default() };
        let catalog = MemoryCatalog::new();
        assert!(execute(&query, &catalog, &EngineConfig::default()).is_err());
    }

    #[test]
    fn unknown_dataset_errors() {
        let query = Query {
            projections: vec![Expr::identifier("foo")],
            dataset: Some("nope".to_string()),
            ..Default::default()
        };
        let catalog = MemoryCatalog::new();
        assert!(execute(&query, &catalog, &EngineConfig::default()).is_err());
    }

    #[test]
    fn invalid_projection_in_aggregation_errors() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("foo"), Expr::identifier("bar")],
            dataset: Some("t".to_string()),
            group_by: vec![Expr::identifier("foo")],
            ..Default::default()
        };
        assert!(execute(&query, &catalog, &EngineConfig::default()).is_err());
    }

    #[test]
    fn negative_limit_errors() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("foo")],
            dataset: Some("t".to_string()),
            limit: Some(-1),
            ..Default::default()
        };
        assert!(execute(&query, &catalog, &EngineConfig::default()).is_err());
    }

    #[test]
    fn star_expands_to_schema_columns() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("*")],
            dataset: Some("t".to_string()),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.schema.len(), 2);
    }

    #[test]
    fn column_free_projection_repeats_literal_per_row() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::lit(Scalar::Int(1))],
            dataset: Some("t".to_string()),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 3);
        assert_eq!(result.columns[0].get_int(2), Some(1));
    }

    #[test]
    fn column_free_filtered_projection_respects_the_mask() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::lit(Scalar::Int(1))],
            dataset: Some("t".to_string()),
            filter: Some(Expr::Binary(
                BinaryOp::Gte,
                Box::new(Expr::identifier("foo")),
                Box::new(Expr::lit(Scalar::Int(4))),
            )),
            ..Default::default()
        };
        let result = execute(&query, &catalog, &EngineConfig::default()).unwrap();
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn abort_predicate_cancels_before_any_stripe_runs() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("foo")],
            dataset: Some("t".to_string()),
            ..Default::default()
        };
        let err = execute_with_abort(&query, &catalog, &EngineConfig::default(), &|| true).unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(err.classification(), crate::error::ErrorClass::Runtime);
    }

    #[test]
    fn abort_predicate_cancels_an_aggregate_query() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::identifier("foo"), Expr::call("count", vec![])],
            dataset: Some("t".to_string()),
            group_by: vec![Expr::identifier("foo")],
            ..Default::default()
        };
        let err = execute_with_abort(&query, &catalog, &EngineConfig::default(), &|| true).unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }

    #[test]
    fn count_distinct_is_not_implemented() {
        let catalog = make_dataset();
        let query = Query {
            projections: vec![Expr::call("count_distinct", vec![Expr::identifier("foo")])],
            dataset: Some("t".to_string()),
            ..Default::default()
        };
        let err = execute(&query, &catalog, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, QueryError::NotImplemented { .. }));
        assert_eq!(err.classification(), crate::error::ErrorClass::Client);
    }
}
