#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(clippy::clone_on_ref_ptr, clippy::use_self)]
#![allow(clippy::too_many_arguments)]

//! Columnar query execution core: expression evaluation, filtering,
//! hash-grouped aggregation, ordering and limits over chunked stripes.
//!
//! A query arrives as a [`planner::Query`] — a parsed, unresolved
//! expression tree plus clause metadata. [`planner::execute`] resolves it
//! against a [`dataset::Catalog`], type-checks every expression, drives the
//! scan or grouped-aggregation path stripe by stripe, and returns a
//! [`result::QueryResult`] ready to [`result::QueryResult::to_json`].

mod aggregate;
mod bitmap;
mod chunk;
mod dataset;
mod error;
mod eval;
mod expr;
mod group;
mod planner;
mod result;
mod schema;
mod value;

pub use bitmap::Bitmap;
pub use chunk::{Chunk, ChunkError};
pub use dataset::{Catalog, Dataset, MemoryCatalog, MemoryDataset, MemoryStripe, Stripe};
pub use error::{ErrorClass, QueryError, Result};
pub use eval::{evaluate, Batch};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use planner::{execute, execute_with_abort, AbortPredicate, EngineConfig, Query};
pub use result::{QueryResult, SortKey};
pub use schema::{ColumnSchema, Schema};
pub use value::{Dtype, Scalar};
