//! Expression AST consumed from the (out-of-scope) SQL parser.
//!
//! Each node computes its return type from a schema and the set of columns
//! it references without evaluating anything, and exposes a canonicalised
//! string form used for structural matching between clauses (group keys vs
//! projections, order-by targets vs projections).

use std::collections::BTreeSet;

use crate::error::{QueryError, Result};
use crate::schema::Schema;
use crate::value::{Dtype, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn is_arithmetic(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }

    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    pub(crate) fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Recognised aggregate function names (case-insensitive, matched in
/// lowercase). `count_distinct` is recognised here so it classifies and
/// substitutes like any other aggregate call, even though it is rejected
/// with [`QueryError::NotImplemented`] before it ever reaches the grouping
/// engine — see [`function_return_type`].
pub const AGGREGATE_NAMES: &[&str] =
    &["min", "max", "sum", "avg", "count", "count_star", "count_distinct"];

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(String),
    /// `value == None` means the literal NULL of dtype `dtype` (usually
    /// `Dtype::Null` for a bare `NULL` keyword).
    Literal(Dtype, Option<Scalar>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Function(String, Vec<Expr>),
    Relabel(Box<Expr>, String),
    Ordering(Box<Expr>, bool /* asc */, bool /* nulls_first */),
}

impl Expr {
    pub fn identifier(name: impl Into<String>) -> Self {
        Expr::Identifier(name.into())
    }

    pub fn lit(scalar: Scalar) -> Self {
        Expr::Literal(scalar.dtype(), Some(scalar))
    }

    pub fn null() -> Self {
        Expr::Literal(Dtype::Null, None)
    }

    pub fn relabel(self, label: impl Into<String>) -> Self {
        Expr::Relabel(Box::new(self), label.into())
    }

    pub fn order(self, asc: bool, nulls_first: bool) -> Self {
        Expr::Ordering(Box::new(self), asc, nulls_first)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function(name.into(), args)
    }

    /// Strip any number of `Relabel`/`Ordering` wrappers, returning the
    /// innermost expression.
    pub fn strip_wrappers(&self) -> &Expr {
        match self {
            Expr::Relabel(inner, _) => inner.strip_wrappers(),
            Expr::Ordering(inner, _, _) => inner.strip_wrappers(),
            other => other,
        }
    }

    /// The alias introduced by the outermost `Relabel`, if any.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Expr::Relabel(_, label) => Some(label.as_str()),
            Expr::Ordering(inner, _, _) => inner.alias(),
            _ => None,
        }
    }

    /// Canonical, whitespace-free, case-folded structural key. `Relabel`
    /// and `Ordering` wrappers are transparent: two expressions that only
    /// differ by an alias or a sort direction compare equal.
    pub fn canonical_key(&self) -> String {
        match self {
            Expr::Identifier(name) => name.to_lowercase(),
            Expr::Literal(dtype, value) => format!(
                "lit<{}>:{}",
                dtype,
                value.as_ref().map(|v| v.canonical_text()).unwrap_or_else(|| "null".to_string())
            ),
            Expr::Unary(op, c) => format!("{op:?}({})", c.canonical_key()),
            Expr::Binary(op, l, r) => format!("{op:?}({},{})", l.canonical_key(), r.canonical_key()),
            Expr::Function(name, args) => format!(
                "{}({})",
                name.to_lowercase(),
                args.iter().map(Expr::canonical_key).collect::<Vec<_>>().join(",")
            ),
            Expr::Relabel(inner, _) => inner.canonical_key(),
            Expr::Ordering(inner, _, _) => inner.canonical_key(),
        }
    }

    /// The first column reference found by a pre-order walk, if any. Used by
    /// the scalar (no-dataset) query path, where no identifiers are valid at
    /// all.
    pub fn first_identifier(&self) -> Option<&str> {
        match self {
            Expr::Identifier(name) => Some(name.as_str()),
            Expr::Literal(..) => None,
            Expr::Unary(_, c) => c.first_identifier(),
            Expr::Binary(_, l, r) => l.first_identifier().or_else(|| r.first_identifier()),
            Expr::Function(_, args) => args.iter().find_map(Expr::first_identifier),
            Expr::Relabel(inner, _) => inner.first_identifier(),
            Expr::Ordering(inner, _, _) => inner.first_identifier(),
        }
    }

    /// Is this (after stripping wrappers) a recognised aggregate function
    /// call?
    pub fn is_aggregate_call(&self) -> bool {
        matches!(self.strip_wrappers(), Expr::Function(name, _) if is_aggregate_name(name))
    }

    /// Every free (non-aggregated) identifier in this tree is itself inside
    /// an aggregate call. True for `count() * 2`, `min(bar) + max(bar)`,
    /// and any pure aggregate call; false for a bare column reference.
    pub fn all_free_vars_aggregated(&self) -> bool {
        match self {
            Expr::Identifier(_) => false,
            Expr::Literal(..) => true,
            Expr::Unary(_, c) => c.all_free_vars_aggregated(),
            Expr::Binary(_, l, r) => l.all_free_vars_aggregated() && r.all_free_vars_aggregated(),
            Expr::Function(name, args) => {
                is_aggregate_name(name) || args.iter().all(Expr::all_free_vars_aggregated)
            }
            Expr::Relabel(inner, _) => inner.all_free_vars_aggregated(),
            Expr::Ordering(inner, _, _) => inner.all_free_vars_aggregated(),
        }
    }

    /// The set of schema column names (canonical casing) this expression
    /// reads, recursively, excluding the arguments of aggregate function
    /// calls (those are resolved against raw stripe columns by the
    /// grouping engine, not by the plain evaluator).
    pub fn columns_used(&self, schema: &Schema) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        self.collect_columns(schema, &mut out)?;
        Ok(out)
    }

    fn collect_columns(&self, schema: &Schema, out: &mut BTreeSet<String>) -> Result<()> {
        match self {
            Expr::Identifier(name) => {
                let (_, col) = schema
                    .find(name)
                    .ok_or_else(|| QueryError::UnknownColumn { name: name.clone() })?;
                out.insert(col.name.clone());
                Ok(())
            }
            Expr::Literal(..) => Ok(()),
            Expr::Unary(_, c) => c.collect_columns(schema, out),
            Expr::Binary(_, l, r) => {
                l.collect_columns(schema, out)?;
                r.collect_columns(schema, out)
            }
            Expr::Function(_, args) => {
                for a in args {
                    a.collect_columns(schema, out)?;
                }
                Ok(())
            }
            Expr::Relabel(inner, _) => inner.collect_columns(schema, out),
            Expr::Ordering(inner, _, _) => inner.collect_columns(schema, out),
        }
    }

    /// `(dtype, nullable)` without evaluating anything.
    pub fn return_type(&self, schema: &Schema) -> Result<(Dtype, bool)> {
        match self {
            Expr::Identifier(name) => {
                let (_, col) = schema
                    .find(name)
                    .ok_or_else(|| QueryError::UnknownColumn { name: name.clone() })?;
                Ok((col.dtype, col.nullable))
            }
            Expr::Literal(dtype, value) => Ok((*dtype, value.is_none())),
            Expr::Unary(op, c) => {
                let (cd, cn) = c.return_type(schema)?;
                match op {
                    UnaryOp::Neg => {
                        if matches!(cd, Dtype::Int | Dtype::Float) {
                            Ok((cd, cn))
                        } else {
                            Err(type_error(format!("cannot negate {cd}")))
                        }
                    }
                    UnaryOp::Not => {
                        if cd == Dtype::Bool {
                            Ok((Dtype::Bool, cn))
                        } else {
                            Err(type_error(format!("NOT requires bool, got {cd}")))
                        }
                    }
                    UnaryOp::IsNull | UnaryOp::IsNotNull => Ok((Dtype::Bool, false)),
                }
            }
            Expr::Binary(op, l, r) => self.binary_return_type(*op, l, r, schema),
            Expr::Function(name, args) => function_return_type(name, args, schema),
            Expr::Relabel(inner, _) => inner.return_type(schema),
            Expr::Ordering(inner, _, _) => inner.return_type(schema),
        }
    }

    fn binary_return_type(
        &self,
        op: BinaryOp,
        l: &Expr,
        r: &Expr,
        schema: &Schema,
    ) -> Result<(Dtype, bool)> {
        let (ld, ln) = l.return_type(schema)?;
        let (rd, rn) = r.return_type(schema)?;

        if op.is_arithmetic() {
            let dtype = numeric_promote(ld, rd)
                .ok_or_else(|| type_error(format!("cannot apply {op:?} to {ld} and {rd}")))?;
            return Ok((dtype, ln || rn));
        }

        if op.is_comparison() {
            // `x = NULL` / `x <> NULL` is interpreted as IS [NOT] NULL and
            // never itself null.
            let is_null_literal =
                |e: &Expr| matches!(e, Expr::Literal(Dtype::Null, None));
            if is_null_literal(l) || is_null_literal(r) {
                return Ok((Dtype::Bool, false));
            }
            if !comparable(ld, rd) {
                return Err(type_error(format!("cannot compare {ld} to {rd}")));
            }
            return Ok((Dtype::Bool, ln || rn));
        }

        debug_assert!(op.is_logical());
        if ld != Dtype::Bool || rd != Dtype::Bool {
            return Err(type_error(format!("{op:?} requires bool operands, got {ld} and {rd}")));
        }
        Ok((Dtype::Bool, ln || rn))
    }
}

fn type_error(msg: String) -> QueryError {
    QueryError::TypeError { msg }
}

fn numeric_promote(a: Dtype, b: Dtype) -> Option<Dtype> {
    match (a, b) {
        (Dtype::Int, Dtype::Int) => Some(Dtype::Int),
        (Dtype::Float, Dtype::Float) | (Dtype::Int, Dtype::Float) | (Dtype::Float, Dtype::Int) => {
            Some(Dtype::Float)
        }
        _ => None,
    }
}

fn comparable(a: Dtype, b: Dtype) -> bool {
    if a == b {
        return true;
    }
    matches!((a, b), (Dtype::Int, Dtype::Float) | (Dtype::Float, Dtype::Int))
}

pub fn is_aggregate_name(name: &str) -> bool {
    AGGREGATE_NAMES.contains(&name.to_lowercase().as_str())
}

fn function_return_type(name: &str, args: &[Expr], schema: &Schema) -> Result<(Dtype, bool)> {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "nullif" => {
            if args.len() != 2 {
                return Err(type_error("nullif requires exactly 2 arguments".to_string()));
            }
            let (ad, _) = args[0].return_type(schema)?;
            let (bd, _) = args[1].return_type(schema)?;
            if !comparable(ad, bd) {
                return Err(type_error(format!("nullif cannot compare {ad} to {bd}")));
            }
            Ok((ad, true))
        }
        "coalesce" => {
            if args.is_empty() {
                return Err(type_error("coalesce requires at least 1 argument".to_string()));
            }
            let mut dtype = None;
            let mut any_non_null = false;
            for a in args {
                let (d, n) = a.return_type(schema)?;
                match dtype {
                    None => dtype = Some(d),
                    Some(prev) if prev == d => {}
                    Some(prev) => {
                        return Err(type_error(format!("coalesce arguments of mismatched types {prev} and {d}")))
                    }
                }
                any_non_null |= !n;
            }
            Ok((dtype.unwrap(), !any_non_null))
        }
        "min" | "max" => {
            if args.len() != 1 {
                return Err(type_error(format!("{lower} requires exactly 1 argument")));
            }
            let (d, _) = args[0].return_type(schema)?;
            if !matches!(d, Dtype::Int | Dtype::Float | Dtype::String | Dtype::Date | Dtype::Datetime) {
                return Err(type_error(format!("{lower} is not supported on dtype {d}")));
            }
            Ok((d, true))
        }
        "sum" => {
            if args.len() != 1 {
                return Err(type_error("sum requires exactly 1 argument".to_string()));
            }
            let (d, _) = args[0].return_type(schema)?;
            match d {
                Dtype::Int => Ok((Dtype::Int, true)),
                Dtype::Float => Ok((Dtype::Float, true)),
                other => Err(type_error(format!("sum is not supported on dtype {other}"))),
            }
        }
        "avg" => {
            if args.len() != 1 {
                return Err(type_error("avg requires exactly 1 argument".to_string()));
            }
            let (d, _) = args[0].return_type(schema)?;
            if !matches!(d, Dtype::Int | Dtype::Float) {
                return Err(type_error(format!("avg is not supported on dtype {d}")));
            }
            Ok((Dtype::Float, true))
        }
        "count" => {
            if args.len() > 1 {
                return Err(type_error("count takes 0 or 1 arguments".to_string()));
            }
            if let Some(a) = args.first() {
                a.return_type(schema)?;
            }
            Ok((Dtype::Int, false))
        }
        "count_star" => {
            if !args.is_empty() {
                return Err(type_error("count_star takes no arguments".to_string()));
            }
            Ok((Dtype::Int, false))
        }
        "count_distinct" => {
            if args.len() != 1 {
                return Err(type_error("count_distinct requires exactly 1 argument".to_string()));
            }
            args[0].return_type(schema)?;
            Err(QueryError::NotImplemented { what: "count(distinct expr)".to_string() })
        }
        other => Err(QueryError::UnknownFunction { name: other.to_string() }),
    }
}
