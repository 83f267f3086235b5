//! Benchmarks for scenario vector search.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::{Rng, SeedableRng};

use lexgraph::graph::NodeId;
use lexgraph::provider::HashingEmbedder;
use lexgraph::vector::EmbeddingSpace;
use lexgraph::vector::index::VectorIndex;

const DIM: usize = 256;

fn random_index(n: usize, exact_limit: usize) -> VectorIndex {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let mut index = VectorIndex::new(EmbeddingSpace::new("bench", DIM), n, exact_limit);
    for i in 0..n {
        let v: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let id = NodeId::new(format!("S{i}")).unwrap();
        index.insert(id, v).unwrap();
    }
    index
}

fn bench_exact_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("exact_search");
    for n in [1_000, 10_000] {
        let index = random_index(n, usize::MAX);
        let query: Vec<f32> = index.iter().next().unwrap().1.to_vec();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |bench, _| {
            bench.iter(|| black_box(index.search(&query, 5).unwrap()))
        });
    }
    group.finish();
}

fn bench_hnsw_search(c: &mut Criterion) {
    let index = random_index(20_000, 0);
    let query: Vec<f32> = index.iter().next().unwrap().1.to_vec();
    c.bench_function("hnsw_search_20k", |bench| {
        bench.iter(|| black_box(index.search(&query, 5).unwrap()))
    });
}

fn bench_hashing_embed(c: &mut Criterion) {
    let embedder = HashingEmbedder::new(DIM);
    let text = "Police searched my house without a warrant and seized my phone";
    c.bench_function("hashing_embed_256", |bench| {
        bench.iter(|| black_box(embedder.embed_sync(text)))
    });
}

criterion_group!(benches, bench_exact_search, bench_hnsw_search, bench_hashing_embed);
criterion_main!(benches);
