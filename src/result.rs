//! The final, materialised query result: a schema, its column chunks, and
//! the machinery to sort and serialise them to the wire JSON shape.

use serde_json::{Map, Value};

use crate::chunk::Chunk;
use crate::schema::Schema;

/// One `ORDER BY` key, resolved to a projection column position.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub column: usize,
    pub asc: bool,
    pub nulls_first: bool,
}

/// Schema, column chunks (eagerly kept in emission order — sort and limit
/// are applied by `take`/truncation rather than through a lazy `row_idxs`
/// permutation; see DESIGN.md), and, per column, the direction it was last
/// sorted by (`None` if it was never an order key).
#[derive(Debug)]
pub struct QueryResult {
    pub schema: Schema,
    pub columns: Vec<Chunk>,
    ordering: Vec<Option<bool>>,
}

impl QueryResult {
    pub fn new(schema: Schema, columns: Vec<Chunk>) -> Self {
        assert_eq!(schema.len(), columns.len());
        let ordering = vec![None; schema.len()];
        Self { schema, columns, ordering }
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map(Chunk::len).unwrap_or(0)
    }

    /// Stable multi-key sort. Keys are applied in order: the first key is
    /// the primary sort, later keys only break ties left by earlier ones.
    pub fn sort(&mut self, keys: &[SortKey]) {
        if keys.is_empty() {
            return;
        }
        let n = self.row_count();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            for key in keys {
                let c = &self.columns[key.column];
                let ord = match c.compare(key.asc, key.nulls_first, a, b) {
                    i8::MIN..=-1 => std::cmp::Ordering::Less,
                    0 => std::cmp::Ordering::Equal,
                    1..=i8::MAX => std::cmp::Ordering::Greater,
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.columns = self.columns.iter().map(|c| c.take(&order)).collect();
        for key in keys {
            self.ordering[key.column] = Some(key.asc);
        }
    }

    /// Keep only the first `n` rows. A no-op if the result already has `n`
    /// rows or fewer.
    pub fn limit(&mut self, n: usize) {
        if self.row_count() <= n {
            return;
        }
        let order: Vec<usize> = (0..n).collect();
        self.columns = self.columns.iter().map(|c| c.take(&order)).collect();
    }

    /// `{"schema": <TableSchema>, "nrows": N, "ordering": [...], "data": [[...], ...]}`.
    pub fn to_json(&self) -> Value {
        let ordering: Vec<Value> = self
            .ordering
            .iter()
            .map(|o| match o {
                Some(true) => Value::String("asc".to_string()),
                Some(false) => Value::String("desc".to_string()),
                None => Value::Null,
            })
            .collect();

        let mut data = Vec::with_capacity(self.row_count());
        for r in 0..self.row_count() {
            let mut row = Vec::with_capacity(self.columns.len());
            for (ci, col) in self.columns.iter().enumerate() {
                let (text, present) = col.json_literal(r);
                row.push(if !present {
                    Value::Null
                } else {
                    scalar_json(self.schema.columns[ci].dtype, &text)
                });
            }
            data.push(Value::Array(row));
        }

        let mut top = Map::new();
        top.insert(
            "schema".to_string(),
            serde_json::to_value(&self.schema).expect("Schema serialisation cannot fail"),
        );
        top.insert("nrows".to_string(), Value::from(self.row_count()));
        top.insert("ordering".to_string(), Value::Array(ordering));
        top.insert("data".to_string(), Value::Array(data));
        Value::Object(top)
    }
}

/// Render a non-null scalar's canonical text as a JSON value matching its
/// dtype: numbers as JSON numbers, everything else as a JSON string.
fn scalar_json(dtype: crate::value::Dtype, text: &str) -> Value {
    use crate::value::Dtype;
    match dtype {
        Dtype::Int => text.parse::<i64>().map(Value::from).unwrap_or(Value::String(text.to_string())),
        Dtype::Float => match text {
            "NaN" | "Infinity" | "-Infinity" => Value::String(text.to_string()),
            _ => text
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text.to_string())),
        },
        Dtype::Bool => text.parse::<bool>().map(Value::Bool).unwrap_or(Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}
