//! Row-wise expression evaluator.
//!
//! Turns an [`Expr`] plus a resolved [`Batch`] of columns into a materialised
//! [`Chunk`]. Aggregate function calls (`min`, `max`, `sum`, `avg`, `count`,
//! `count_star`) are not evaluated here: they are intercepted by the
//! grouping engine before a batch ever reaches this module, and seeing one
//! here is a programmer error in the caller, not a data error.

use tracing::warn;

use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::error::{QueryError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::schema::Schema;
use crate::value::{Dtype, Scalar};

/// A resolved set of columns, in schema order, all of the same length.
pub struct Batch {
    schema: Schema,
    columns: Vec<Chunk>,
    len: usize,
}

impl Batch {
    pub fn new(schema: Schema, columns: Vec<Chunk>) -> Self {
        assert_eq!(schema.len(), columns.len(), "batch column count must match schema");
        let len = columns.first().map(Chunk::len).unwrap_or(0);
        for c in &columns {
            assert_eq!(c.len(), len, "batch columns must share a length");
        }
        Self { schema, columns, len }
    }

    /// A zero-column batch of the given logical length, for the
    /// scalar/no-dataset query path where every projection must be a
    /// column-free expression.
    pub fn scalar(len: usize) -> Self {
        Self { schema: Schema::new(vec![]), columns: Vec::new(), len }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[Chunk] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Chunk> {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn column(&self, name: &str) -> Result<&Chunk> {
        let (idx, _) = self
            .schema
            .find(name)
            .ok_or_else(|| QueryError::UnknownColumn { name: name.to_string() })?;
        Ok(&self.columns[idx])
    }
}

/// Evaluate `expr` against `batch`, returning a chunk of `batch.len()` rows.
pub fn evaluate(expr: &Expr, batch: &Batch) -> Result<Chunk> {
    match expr {
        Expr::Identifier(name) => Ok(batch.column(name)?.clone()),
        Expr::Literal(dtype, value) => {
            Ok(Chunk::constant(*dtype, value.is_none(), value.as_ref(), batch.len()))
        }
        Expr::Unary(op, c) => eval_unary(*op, c, batch),
        Expr::Binary(op, l, r) => eval_binary(*op, l, r, batch),
        Expr::Function(name, args) => eval_function(name, args, batch),
        Expr::Relabel(inner, _) => evaluate(inner, batch),
        Expr::Ordering(inner, _, _) => evaluate(inner, batch),
    }
}

fn eval_unary(op: UnaryOp, c: &Expr, batch: &Batch) -> Result<Chunk> {
    let chunk = evaluate(c, batch)?;
    let n = chunk.len();
    match op {
        UnaryOp::IsNull => Ok(Chunk::from_bools((0..n).map(|i| chunk.is_null(i)).collect(), None)),
        UnaryOp::IsNotNull => {
            Ok(Chunk::from_bools((0..n).map(|i| !chunk.is_null(i)).collect(), None))
        }
        UnaryOp::Not => {
            let mut values = Vec::with_capacity(n);
            let mut nulls = Vec::new();
            for i in 0..n {
                match chunk.get_bool(i) {
                    Some(b) => values.push(!b),
                    None => {
                        values.push(false);
                        nulls.push(i);
                    }
                }
            }
            let mask = if chunk.nullable() { Some(Bitmap::from_ones(n, nulls)) } else { None };
            Ok(Chunk::from_bools(values, mask))
        }
        UnaryOp::Neg => match chunk.dtype() {
            Dtype::Int => {
                let mut values = Vec::with_capacity(n);
                let mut nulls = Vec::new();
                for i in 0..n {
                    match chunk.get_int(i) {
                        Some(v) => values.push(v.checked_neg().ok_or_else(|| {
                            QueryError::Overflow { msg: format!("negation overflow on {v}") }
                        })?),
                        None => {
                            values.push(0);
                            nulls.push(i);
                        }
                    }
                }
                let mask = if chunk.nullable() { Some(Bitmap::from_ones(n, nulls)) } else { None };
                Ok(Chunk::from_ints(values, mask))
            }
            Dtype::Float => {
                let mut values = Vec::with_capacity(n);
                let mut nulls = Vec::new();
                for i in 0..n {
                    match chunk.get_float(i) {
                        Some(v) => values.push(-v),
                        None => {
                            values.push(0.0);
                            nulls.push(i);
                        }
                    }
                }
                let mask = if chunk.nullable() { Some(Bitmap::from_ones(n, nulls)) } else { None };
                Ok(Chunk::from_floats(values, mask))
            }
            other => Err(QueryError::TypeError { msg: format!("cannot negate {other}") }),
        },
    }
}

fn eval_binary(op: BinaryOp, l: &Expr, r: &Expr, batch: &Batch) -> Result<Chunk> {
    if op.is_logical() {
        return eval_logical(op, l, r, batch);
    }

    // `x = NULL` / `x <> NULL` is rewritten to IS [NOT] NULL before anything
    // else, matching the evaluator's null-comparison contract.
    let is_null_literal = |e: &Expr| matches!(e, Expr::Literal(Dtype::Null, None));
    if matches!(op, BinaryOp::Eq | BinaryOp::Neq) {
        if is_null_literal(r) && !is_null_literal(l) {
            let unary = if op == BinaryOp::Eq { UnaryOp::IsNull } else { UnaryOp::IsNotNull };
            return eval_unary(unary, l, batch);
        }
        if is_null_literal(l) && !is_null_literal(r) {
            let unary = if op == BinaryOp::Eq { UnaryOp::IsNull } else { UnaryOp::IsNotNull };
            return eval_unary(unary, r, batch);
        }
    }

    let lc = evaluate(l, batch)?;
    let rc = evaluate(r, batch)?;
    let n = lc.len();

    if op.is_arithmetic() {
        return eval_arithmetic(op, &lc, &rc, n);
    }
    eval_comparison(op, &lc, &rc, n)
}

fn eval_arithmetic(op: BinaryOp, lc: &Chunk, rc: &Chunk, n: usize) -> Result<Chunk> {
    let nullable = lc.nullable() || rc.nullable();
    if lc.dtype() == Dtype::Int && rc.dtype() == Dtype::Int {
        let mut values = Vec::with_capacity(n);
        let mut nulls = Vec::new();
        for i in 0..n {
            match (lc.get_int(i), rc.get_int(i)) {
                (Some(a), Some(b)) => values.push(int_arith(op, a, b)?),
                _ => {
                    values.push(0);
                    nulls.push(i);
                }
            }
        }
        let mask = if nullable { Some(Bitmap::from_ones(n, nulls)) } else { None };
        return Ok(Chunk::from_ints(values, mask));
    }

    if lc.dtype() == Dtype::Int {
        warn_on_widen("lhs", Dtype::Int, Dtype::Float);
    }
    if rc.dtype() == Dtype::Int {
        warn_on_widen("rhs", Dtype::Int, Dtype::Float);
    }

    let as_f64 = |c: &Chunk, i: usize| -> Option<f64> {
        match c.dtype() {
            Dtype::Int => c.get_int(i).map(|v| v as f64),
            Dtype::Float => c.get_float(i),
            _ => None,
        }
    };
    let mut values = Vec::with_capacity(n);
    let mut nulls = Vec::new();
    for i in 0..n {
        match (as_f64(lc, i), as_f64(rc, i)) {
            (Some(a), Some(b)) => values.push(float_arith(op, a, b)),
            _ => {
                values.push(0.0);
                nulls.push(i);
            }
        }
    }
    let mask = if nullable { Some(Bitmap::from_ones(n, nulls)) } else { None };
    Ok(Chunk::from_floats(values, mask))
}

fn int_arith(op: BinaryOp, a: i64, b: i64) -> Result<i64> {
    let overflow = |msg: String| QueryError::Overflow { msg };
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(|| overflow(format!("{a} + {b} overflows i64"))),
        BinaryOp::Sub => a.checked_sub(b).ok_or_else(|| overflow(format!("{a} - {b} overflows i64"))),
        BinaryOp::Mul => a.checked_mul(b).ok_or_else(|| overflow(format!("{a} * {b} overflows i64"))),
        BinaryOp::Div => {
            if b == 0 {
                Err(overflow("division by zero".to_string()))
            } else {
                a.checked_div(b).ok_or_else(|| overflow(format!("{a} / {b} overflows i64")))
            }
        }
        _ => unreachable!("not an arithmetic op"),
    }
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => unreachable!("not an arithmetic op"),
    }
}

fn eval_comparison(op: BinaryOp, lc: &Chunk, rc: &Chunk, n: usize) -> Result<Chunk> {
    let nullable = lc.nullable() || rc.nullable();
    if lc.dtype() == Dtype::Int && rc.dtype() == Dtype::Float {
        warn_on_widen("lhs", Dtype::Int, Dtype::Float);
    }
    if lc.dtype() == Dtype::Float && rc.dtype() == Dtype::Int {
        warn_on_widen("rhs", Dtype::Int, Dtype::Float);
    }
    let mut values = Vec::with_capacity(n);
    let mut nulls = Vec::new();
    for i in 0..n {
        match (lc.get_scalar(i), rc.get_scalar(i)) {
            (Some(a), Some(b)) => values.push(compare_scalars(op, &a, &b)),
            _ => {
                values.push(false);
                nulls.push(i);
            }
        }
    }
    let mask = if nullable { Some(Bitmap::from_ones(n, nulls)) } else { None };
    Ok(Chunk::from_bools(values, mask))
}

fn compare_scalars(op: BinaryOp, a: &Scalar, b: &Scalar) -> bool {
    use std::cmp::Ordering::*;
    if op == BinaryOp::Eq {
        return a.group_eq(b);
    }
    if op == BinaryOp::Neq {
        return !a.group_eq(b);
    }
    let ord = promote_and_cmp(a, b);
    match op {
        BinaryOp::Lt => ord == Less,
        BinaryOp::Lte => ord != Greater,
        BinaryOp::Gt => ord == Greater,
        BinaryOp::Gte => ord != Less,
        _ => unreachable!("not an ordering comparison"),
    }
}

fn promote_and_cmp(a: &Scalar, b: &Scalar) -> std::cmp::Ordering {
    match (a, b) {
        (Scalar::Int(x), Scalar::Float(y)) => (*x as f64).total_cmp(y),
        (Scalar::Float(x), Scalar::Int(y)) => x.total_cmp(&(*y as f64)),
        _ => a.total_cmp(b),
    }
}

/// Three-valued AND/OR: a null operand only forces the result when the other
/// operand cannot already decide it (`NULL AND FALSE = FALSE`,
/// `NULL OR TRUE = TRUE`).
fn eval_logical(op: BinaryOp, l: &Expr, r: &Expr, batch: &Batch) -> Result<Chunk> {
    let lc = evaluate(l, batch)?;
    let rc = evaluate(r, batch)?;
    let n = lc.len();
    let mut values = Vec::with_capacity(n);
    let mut nulls = Vec::new();
    for i in 0..n {
        let a = lc.get_bool(i);
        let b = rc.get_bool(i);
        let result = match op {
            BinaryOp::And => match (a, b) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BinaryOp::Or => match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            _ => unreachable!("not a logical op"),
        };
        match result {
            Some(v) => values.push(v),
            None => {
                values.push(false);
                nulls.push(i);
            }
        }
    }
    let mask = if nulls.is_empty() { None } else { Some(Bitmap::from_ones(n, nulls)) };
    Ok(Chunk::from_bools(values, mask))
}

fn eval_function(name: &str, args: &[Expr], batch: &Batch) -> Result<Chunk> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "nullif" => {
            let a = evaluate(&args[0], batch)?;
            let b = evaluate(&args[1], batch)?;
            let n = a.len();
            let mut out_is_null = vec![false; n];
            for i in 0..n {
                if let (Some(av), Some(bv)) = (a.get_scalar(i), b.get_scalar(i)) {
                    if av.group_eq(&bv) {
                        out_is_null[i] = true;
                    }
                }
            }
            rebuild_with_extra_nulls(&a, &out_is_null)
        }
        "coalesce" => {
            if args.is_empty() {
                return Err(QueryError::TypeError { msg: "coalesce requires at least 1 argument".to_string() });
            }
            let evaluated: Vec<Chunk> = args.iter().map(|a| evaluate(a, batch)).collect::<Result<_>>()?;
            let n = evaluated[0].len();
            let mut first_scalar: Vec<Option<Scalar>> = vec![None; n];
            for chunk in &evaluated {
                for i in 0..n {
                    if first_scalar[i].is_none() {
                        first_scalar[i] = chunk.get_scalar(i);
                    }
                }
            }
            build_chunk_from_scalars(evaluated[0].dtype(), &first_scalar)
        }
        "count_distinct" => {
            Err(QueryError::NotImplemented { what: "count(distinct expr)".to_string() })
        }
        "min" | "max" | "sum" | "avg" | "count" | "count_star" => Err(QueryError::TypeError {
            msg: format!("aggregate function `{lower}` used outside an aggregate context"),
        }),
        other => Err(QueryError::UnknownFunction { name: other.to_string() }),
    }
}

fn rebuild_with_extra_nulls(source: &Chunk, extra_nulls: &[bool]) -> Result<Chunk> {
    let n = source.len();
    let values: Vec<Option<Scalar>> = (0..n)
        .map(|i| if extra_nulls[i] { None } else { source.get_scalar(i) })
        .collect();
    build_chunk_from_scalars(source.dtype(), &values)
}

pub(crate) fn build_chunk_from_scalars(dtype: Dtype, values: &[Option<Scalar>]) -> Result<Chunk> {
    let n = values.len();
    let nulls: Vec<usize> = (0..n).filter(|&i| values[i].is_none()).collect();
    let mask = if nulls.is_empty() { None } else { Some(Bitmap::from_ones(n, nulls)) };
    Ok(match dtype {
        Dtype::Null => Chunk::all_null(n),
        Dtype::Bool => Chunk::from_bools(values.iter().map(|v| matches!(v, Some(Scalar::Bool(true)))).collect(), mask),
        Dtype::Int => Chunk::from_ints(
            values.iter().map(|v| if let Some(Scalar::Int(i)) = v { *i } else { 0 }).collect(),
            mask,
        ),
        Dtype::Float => Chunk::from_floats(
            values.iter().map(|v| if let Some(Scalar::Float(f)) = v { *f } else { 0.0 }).collect(),
            mask,
        ),
        Dtype::Date => Chunk::from_dates(
            values.iter().map(|v| if let Some(Scalar::Date(d)) = v { *d } else { 0 }).collect(),
            mask,
        ),
        Dtype::Datetime => {
            let precision = values
                .iter()
                .filter_map(|v| if let Some(Scalar::Datetime(_, p)) = v { Some(*p) } else { None })
                .max()
                .unwrap_or(0);
            Chunk::from_datetimes(
                values.iter().map(|v| if let Some(Scalar::Datetime(n, _)) = v { *n } else { 0 }).collect(),
                precision,
                mask,
            )
        }
        Dtype::String => Chunk::from_strings(
            values
                .iter()
                .map(|v| if let Some(Scalar::String(s)) = v { s.clone() } else { String::new() })
                .collect(),
            mask,
        ),
    })
}

/// Logged once per evaluation when a mixed-type arithmetic or comparison
/// operator silently promotes an integer operand to float (`foo + 1.5`,
/// `foo > 1.5` where `foo` is `Int`). The promotion is correct, but it can
/// mask precision loss for values outside the range exactly representable
/// as `f64`; surfacing it costs nothing and helps a caller auditing a
/// surprising result.
fn warn_on_widen(side: &str, from: Dtype, to: Dtype) {
    if from != to {
        warn!(side, %from, %to, "implicit numeric widening");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSchema;

    fn batch() -> Batch {
        let schema = Schema::new(vec![
            ColumnSchema { name: "a".into(), dtype: Dtype::Int, nullable: true },
            ColumnSchema { name: "b".into(), dtype: Dtype::Int, nullable: true },
        ]);
        let a = Chunk::from_ints(vec![1, 2, 0], Some(Bitmap::from_ones(3, [2])));
        let b = Chunk::from_ints(vec![10, 20, 30], None);
        Batch::new(schema, vec![a, b])
    }

    #[test]
    fn add_propagates_null() {
        let e = Expr::Binary(BinaryOp::Add, Box::new(Expr::identifier("a")), Box::new(Expr::identifier("b")));
        let c = evaluate(&e, &batch()).unwrap();
        assert_eq!(c.get_int(0), Some(11));
        assert!(c.is_null(2));
    }

    #[test]
    fn eq_null_literal_becomes_is_null() {
        let e = Expr::Binary(BinaryOp::Eq, Box::new(Expr::identifier("a")), Box::new(Expr::null()));
        let c = evaluate(&e, &batch()).unwrap();
        assert!(!c.nullable());
        assert_eq!(c.get_bool(2), Some(true));
        assert_eq!(c.get_bool(0), Some(false));
    }

    #[test]
    fn and_null_false_is_false() {
        let schema = Schema::new(vec![
            ColumnSchema { name: "p".into(), dtype: Dtype::Bool, nullable: true },
            ColumnSchema { name: "q".into(), dtype: Dtype::Bool, nullable: false },
        ]);
        let p = Chunk::from_bools(vec![false, false], Some(Bitmap::from_ones(2, [1])));
        let q = Chunk::from_bools(vec![false, false], None);
        let b = Batch::new(schema, vec![p, q]);
        let e = Expr::Binary(BinaryOp::And, Box::new(Expr::identifier("p")), Box::new(Expr::identifier("q")));
        let c = evaluate(&e, &b).unwrap();
        assert_eq!(c.get_bool(0), Some(false));
        assert_eq!(c.get_bool(1), Some(false));
        assert!(!c.is_null(1));
    }

    #[test]
    fn division_by_zero_is_overflow_error() {
        let e = Expr::Binary(BinaryOp::Div, Box::new(Expr::identifier("a")), Box::new(Expr::lit(Scalar::Int(0))));
        assert!(evaluate(&e, &batch()).is_err());
    }

    #[test]
    fn coalesce_picks_first_non_null() {
        let e = Expr::call("coalesce", vec![Expr::identifier("a"), Expr::identifier("b")]);
        let c = evaluate(&e, &batch()).unwrap();
        assert_eq!(c.get_int(2), Some(30));
        assert_eq!(c.get_int(0), Some(1));
    }

    #[test]
    fn nullif_nulls_out_equal_rows() {
        let schema = Schema::new(vec![ColumnSchema { name: "a".into(), dtype: Dtype::Int, nullable: false }]);
        let a = Chunk::from_ints(vec![5, 5, 6], None);
        let b = Batch::new(schema, vec![a]);
        let e = Expr::call("nullif", vec![Expr::identifier("a"), Expr::lit(Scalar::Int(5))]);
        let c = evaluate(&e, &b).unwrap();
        assert!(c.is_null(0));
        assert_eq!(c.get_int(2), Some(6));
    }

    #[test]
    fn aggregate_call_errors_outside_aggregate_context() {
        let e = Expr::call("count", vec![]);
        assert!(evaluate(&e, &batch()).is_err());
    }
}
