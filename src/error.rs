//! Error types for the query engine core.
//!
//! Mirrors the `read_buffer`/`table.rs` convention: one `snafu`-derived enum
//! with a display message per variant, constructed either via `ensure!` at
//! the point of the check or via the generated `*Snafu` context selectors.

use snafu::Snafu;

/// Coarse classification carried on every error so an (out-of-scope)
/// transport layer can map it to a status code family without needing to
/// match on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was malformed: bad column names, bad types, bad
    /// clauses. Never the engine's fault.
    Client,
    /// Something went wrong while the engine was doing otherwise-valid work:
    /// arithmetic overflow, cancellation, or a storage failure.
    Runtime,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueryError {
    #[snafu(display("query has no projections"))]
    NoProjection,

    #[snafu(display("dataset not found: {id}"))]
    DatasetNotFound { id: String },

    #[snafu(display("unknown column: {name}"))]
    UnknownColumn { name: String },

    #[snafu(display("unknown function: {name}"))]
    UnknownFunction { name: String },

    #[snafu(display("type error: {msg}"))]
    TypeError { msg: String },

    #[snafu(display("invalid filter: {msg}"))]
    InvalidFilter { msg: String },

    #[snafu(display(
        "projection `{expr}` is neither a group-by key nor an aggregate expression"
    ))]
    InvalidProjectionInAggregation { expr: String },

    #[snafu(display("order clause `{expr}` does not match any projection"))]
    InvalidOrderClause { expr: String },

    #[snafu(display("invalid limit: {limit} (must be non-negative)"))]
    InvalidLimit { limit: i64 },

    #[snafu(display("scalar query (no dataset) must not reference columns: {name}"))]
    NoDatasetIdentifiers { name: String },

    #[snafu(display("arithmetic overflow: {msg}"))]
    Overflow { msg: String },

    #[snafu(display("query cancelled"))]
    Cancelled,

    #[snafu(display("storage error: {msg}"))]
    StorageError { msg: String },

    #[snafu(display("not implemented: {what}"))]
    NotImplemented { what: String },

    #[snafu(display("too many groups: exceeded cap of {cap}"))]
    TooManyGroups { cap: usize },
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;

impl From<crate::chunk::ChunkError> for QueryError {
    fn from(e: crate::chunk::ChunkError) -> Self {
        QueryError::TypeError { msg: e.to_string() }
    }
}

impl QueryError {
    /// See `ErrorClass`. Input-shape errors are client errors; everything
    /// that can happen to an otherwise well-formed query while it runs is a
    /// runtime error.
    pub fn classification(&self) -> ErrorClass {
        match self {
            QueryError::NoProjection
            | QueryError::DatasetNotFound { .. }
            | QueryError::UnknownColumn { .. }
            | QueryError::UnknownFunction { .. }
            | QueryError::TypeError { .. }
            | QueryError::InvalidFilter { .. }
            | QueryError::InvalidProjectionInAggregation { .. }
            | QueryError::InvalidOrderClause { .. }
            | QueryError::InvalidLimit { .. }
            | QueryError::NoDatasetIdentifiers { .. }
            | QueryError::NotImplemented { .. } => ErrorClass::Client,

            QueryError::Overflow { .. }
            | QueryError::Cancelled
            | QueryError::StorageError { .. }
            | QueryError::TooManyGroups { .. } => ErrorClass::Runtime,
        }
    }
}
