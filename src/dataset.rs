//! Storage interface the engine consumes. Reading an actual stripe file
//! format is out of scope; this module defines the trait boundary and an
//! in-memory implementation used by tests and embedders that already hold
//! their data as [`Chunk`]s.

use std::collections::HashMap;

use crate::chunk::Chunk;
use crate::error::{QueryError, Result};
use crate::schema::Schema;

/// One contiguous run of rows within a dataset. Columns are read by name
/// rather than eagerly all at once, so the planner only pays for the
/// columns a query actually touches.
pub trait Stripe: Send + Sync {
    fn len(&self) -> usize;

    /// Read `names` (already validated against the dataset schema) and
    /// return one chunk per name, in the same order, each of length
    /// `self.len()`.
    fn read_columns(&self, names: &[&str]) -> Result<Vec<Chunk>>;
}

/// A named collection of stripes sharing one schema.
pub trait Dataset: Send + Sync {
    fn schema(&self) -> &Schema;
    fn stripe_count(&self) -> usize;
    fn stripe(&self, index: usize) -> &dyn Stripe;
}

/// Resolves dataset identifiers to datasets, the `get_dataset` step of the
/// planner's Resolve phase.
pub trait Catalog: Send + Sync {
    fn get_dataset(&self, id: &str) -> Option<&dyn Dataset>;
}

/// A stripe backed by plain in-memory chunks, keyed by column name.
pub struct MemoryStripe {
    columns: HashMap<String, Chunk>,
    len: usize,
}

impl MemoryStripe {
    pub fn new(columns: HashMap<String, Chunk>) -> Self {
        let len = columns.values().next().map(Chunk::len).unwrap_or(0);
        for c in columns.values() {
            assert_eq!(c.len(), len, "all columns in a stripe must share a length");
        }
        Self { columns, len }
    }
}

impl Stripe for MemoryStripe {
    fn len(&self) -> usize {
        self.len
    }

    fn read_columns(&self, names: &[&str]) -> Result<Vec<Chunk>> {
        names
            .iter()
            .map(|name| {
                self.columns
                    .get(*name)
                    .cloned()
                    .ok_or_else(|| QueryError::UnknownColumn { name: name.to_string() })
            })
            .collect()
    }
}

/// A dataset backed by a fixed, in-memory list of stripes. Primarily for
/// tests and small embedded use; a real deployment backs [`Dataset`] with
/// whatever stripe storage format it owns.
pub struct MemoryDataset {
    schema: Schema,
    stripes: Vec<MemoryStripe>,
}

impl MemoryDataset {
    pub fn new(schema: Schema, stripes: Vec<MemoryStripe>) -> Self {
        Self { schema, stripes }
    }
}

impl Dataset for MemoryDataset {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe(&self, index: usize) -> &dyn Stripe {
        &self.stripes[index]
    }
}

/// A catalog backed by a fixed in-memory map of dataset id to dataset.
#[derive(Default)]
pub struct MemoryCatalog {
    datasets: HashMap<String, Box<dyn Dataset>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, dataset: impl Dataset + 'static) {
        self.datasets.insert(id.into(), Box::new(dataset));
    }
}

impl Catalog for MemoryCatalog {
    fn get_dataset(&self, id: &str) -> Option<&dyn Dataset> {
        self.datasets.get(id).map(|d| d.as_ref())
    }
}
