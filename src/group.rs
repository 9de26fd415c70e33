//! Hash-based grouped aggregation.
//!
//! One [`GroupEngine`] is driven across every stripe of a query in turn. It
//! assigns dense group ids in first-seen order — stable across stripes as
//! long as stripes are fed in their natural order — and keeps one
//! [`Aggregator`] per (group, aggregate projection) pair.

use hashbrown::HashMap;
use tracing::trace;

use crate::aggregate::{AggKind, Aggregator};
use crate::bitmap::Bitmap;
use crate::error::{QueryError, Result};
use crate::eval::{build_chunk_from_scalars, evaluate, Batch};
use crate::expr::Expr;
use crate::chunk::Chunk;
use crate::value::{Dtype, Scalar};

/// One aggregate projection: which aggregate, and the expression (if any)
/// supplying its argument, resolved ahead of time by the planner.
pub struct AggSpec {
    pub kind: AggKind,
    pub arg: Option<Expr>,
    pub arg_dtype: Dtype,
}

impl AggSpec {
    fn new_aggregator(&self) -> Aggregator {
        Aggregator::new(self.kind, self.arg_dtype)
    }
}

pub struct GroupEngine {
    key_exprs: Vec<Expr>,
    agg_specs: Vec<AggSpec>,
    max_groups: Option<usize>,

    index: HashMap<u64, Vec<usize>>,
    key_dtypes: Vec<Dtype>,
    key_values: Vec<Vec<Option<Scalar>>>,
    aggregators: Vec<Vec<Aggregator>>,
    n_groups: usize,
}

impl GroupEngine {
    /// `key_exprs` empty means "aggregate the whole dataset into one row",
    /// which always produces exactly one output row even if zero input rows
    /// ever match, unlike an explicit `GROUP BY` which produces zero rows
    /// when nothing matches.
    pub fn new(key_exprs: Vec<Expr>, agg_specs: Vec<AggSpec>, max_groups: Option<usize>) -> Self {
        let implicit_single_group = key_exprs.is_empty();
        let mut engine = Self {
            key_exprs,
            agg_specs,
            max_groups,
            index: HashMap::new(),
            key_dtypes: Vec::new(),
            key_values: Vec::new(),
            aggregators: Vec::new(),
            n_groups: 0,
        };
        if implicit_single_group {
            engine.n_groups = 1;
            engine.aggregators.push(engine.agg_specs.iter().map(AggSpec::new_aggregator).collect());
        }
        engine
    }

    pub fn group_count(&self) -> usize {
        self.n_groups
    }

    /// Feed one stripe: load group-key and aggregate-argument columns from
    /// `batch` (already resolved to the columns the planner determined were
    /// needed), apply `filter` if present, and fold every surviving row into
    /// its group's aggregators.
    pub fn feed_stripe(&mut self, batch: &Batch, filter: Option<&Expr>) -> Result<()> {
        let mask = match filter {
            Some(f) => evaluate(f, batch)?.truths()?,
            None => Bitmap::all_ones(batch.len()),
        };
        let kept = mask.count();
        trace!(rows = batch.len(), kept, "grouping engine fed stripe");
        if kept == 0 {
            return Ok(());
        }

        let filtered_columns: Vec<Chunk> = batch.columns().iter().map(|c| c.prune(&mask)).collect();
        let filtered = Batch::new(batch.schema().clone(), filtered_columns);
        let n = filtered.len();

        let key_chunks: Vec<Chunk> =
            self.key_exprs.iter().map(|e| evaluate(e, &filtered)).collect::<Result<_>>()?;
        if self.key_dtypes.is_empty() && !key_chunks.is_empty() {
            self.key_dtypes = key_chunks.iter().map(Chunk::dtype).collect();
            self.key_values = vec![Vec::new(); key_chunks.len()];
        }

        let arg_chunks: Vec<Option<Chunk>> = self
            .agg_specs
            .iter()
            .map(|spec| spec.arg.as_ref().map(|e| evaluate(e, &filtered)).transpose())
            .collect::<Result<_>>()?;

        let group_ids = if key_chunks.is_empty() {
            vec![0usize; n]
        } else {
            let mut hashes = vec![0u64; n];
            for (pos, kc) in key_chunks.iter().enumerate() {
                kc.hash_combine(pos, &mut hashes);
            }

            let mut ids = Vec::with_capacity(n);
            for row in 0..n {
                let row_key: Vec<Option<Scalar>> = key_chunks.iter().map(|c| c.get_scalar(row)).collect();
                ids.push(self.find_or_insert_group(hashes[row], &row_key)?);
            }
            ids
        };

        for (agg_idx, spec) in self.agg_specs.iter().enumerate() {
            match &arg_chunks[agg_idx] {
                Some(chunk) => {
                    for row in 0..n {
                        let gid = group_ids[row];
                        let value = chunk.get_scalar(row);
                        self.aggregators[gid][agg_idx].update(value.as_ref())?;
                    }
                }
                None => {
                    debug_assert!(matches!(spec.kind, AggKind::CountStar));
                    for &gid in &group_ids {
                        self.aggregators[gid][agg_idx].update(None)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn find_or_insert_group(&mut self, hash: u64, row_key: &[Option<Scalar>]) -> Result<usize> {
        if let Some(candidates) = self.index.get(&hash) {
            for &gid in candidates {
                if key_row_eq(&self.key_values_at(gid), row_key) {
                    return Ok(gid);
                }
            }
        }

        if let Some(cap) = self.max_groups {
            if self.n_groups >= cap {
                return Err(QueryError::TooManyGroups { cap });
            }
        }

        let gid = self.n_groups;
        self.n_groups += 1;
        for (col, value) in row_key.iter().enumerate() {
            self.key_values[col].push(value.clone());
        }
        self.aggregators.push(self.agg_specs.iter().map(AggSpec::new_aggregator).collect());
        self.index.entry(hash).or_default().push(gid);
        Ok(gid)
    }

    fn key_values_at(&self, gid: usize) -> Vec<Option<Scalar>> {
        self.key_values.iter().map(|col| col[gid].clone()).collect()
    }

    /// Finalise: `(key chunks, aggregate result chunks)`, each of length
    /// `group_count()`, in first-seen group order.
    pub fn finish(self) -> Result<(Vec<Chunk>, Vec<Chunk>)> {
        let n = self.n_groups;
        let mut key_chunks = Vec::with_capacity(self.key_dtypes.len());
        for (col, dtype) in self.key_dtypes.iter().enumerate() {
            key_chunks.push(build_chunk_from_scalars(*dtype, &self.key_values[col])?);
        }

        let mut agg_chunks = Vec::with_capacity(self.agg_specs.len());
        for (idx, spec) in self.agg_specs.iter().enumerate() {
            let values: Vec<Option<Scalar>> = (0..n)
                .map(|g| {
                    let a = &self.aggregators[g][idx];
                    if a.is_empty() {
                        None
                    } else {
                        Some(a.finish())
                    }
                })
                .collect();
            agg_chunks.push(build_chunk_from_scalars(spec.new_aggregator().result_dtype(), &values)?);
        }

        Ok((key_chunks, agg_chunks))
    }
}

fn key_row_eq(a: &[Option<Scalar>], b: &[Option<Scalar>]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| match (x, y) {
            (None, None) => true,
            (Some(x), Some(y)) => x.group_eq(y),
            _ => false,
        })
}
