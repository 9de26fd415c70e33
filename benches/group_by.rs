use std::collections::HashMap;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use stripe_query::{
    execute, Chunk, ColumnSchema, Dtype, EngineConfig, Expr, MemoryCatalog, MemoryDataset,
    MemoryStripe, Query, Schema,
};

fn build_catalog(n_rows: usize, n_groups: usize) -> MemoryCatalog {
    let mut rng = StdRng::seed_from_u64(42);
    let keys: Vec<i64> = (0..n_rows).map(|_| rng.gen_range(0..n_groups as i64)).collect();
    let values: Vec<i64> = (0..n_rows).map(|_| rng.gen_range(0..10_000)).collect();

    let schema = Schema::new(vec![
        ColumnSchema { name: "k".into(), dtype: Dtype::Int, nullable: false },
        ColumnSchema { name: "v".into(), dtype: Dtype::Int, nullable: false },
    ]);
    let mut cols = HashMap::new();
    cols.insert("k".to_string(), Chunk::from_ints(keys, None));
    cols.insert("v".to_string(), Chunk::from_ints(values, None));

    let mut catalog = MemoryCatalog::new();
    catalog.insert("t", MemoryDataset::new(schema, vec![MemoryStripe::new(cols)]));
    catalog
}

fn group_by_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_by");

    for &(n_rows, n_groups) in &[(10_000, 100), (100_000, 1_000), (100_000, 100_000)] {
        let catalog = build_catalog(n_rows, n_groups);
        let query = Query {
            projections: vec![
                Expr::identifier("k"),
                Expr::call("sum", vec![Expr::identifier("v")]),
                Expr::call("count", vec![]),
            ],
            dataset: Some("t".to_string()),
            group_by: vec![Expr::identifier("k")],
            ..Default::default()
        };
        let config = EngineConfig::default();

        group.throughput(Throughput::Elements(n_rows as u64));
        group.bench_with_input(
            BenchmarkId::new("sum_and_count", format!("{n_rows}rows_{n_groups}groups")),
            &(),
            |b, ()| b.iter(|| execute(&query, &catalog, &config).unwrap()),
        );
    }

    group.finish();
}

criterion_group!(benches, group_by_benchmarks);
criterion_main!(benches);
