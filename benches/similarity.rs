//! Benchmarks for similarity math, the duplicate pair scan and semantic search

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use cortex::embedding::{cosine_similarity, Embedder, HashEmbedder};
use cortex::search::SearchRequest;
use cortex::storage::{queries, Storage};
use cortex::store::MemoryStore;
use cortex::types::{NewMemory, Tenant};

const SAMPLE_CONTENTS: [&str; 8] = [
    "Prefers oat milk lattes in the morning",
    "Allergic to peanuts and tree nuts",
    "Works remotely from Lisbon",
    "Daughter starts school in September",
    "Training for a half marathon",
    "Uses a standing desk",
    "Favorite cuisine is Thai",
    "Drives an electric car",
];

fn setup_store(count: usize) -> (MemoryStore, Tenant) {
    let store = MemoryStore::new(
        Storage::open_in_memory().unwrap(),
        Arc::new(HashEmbedder::default()),
    );
    let tenant = Tenant::new("bench", "user");

    for i in 0..count {
        let content = format!("{} (note {})", SAMPLE_CONTENTS[i % SAMPLE_CONTENTS.len()], i);
        store.remember(&tenant, &NewMemory::new(content)).unwrap();
    }

    (store, tenant)
}

fn bench_cosine(c: &mut Criterion) {
    let embedder = HashEmbedder::default();
    let a = embedder.embed(SAMPLE_CONTENTS[0], "text/plain").unwrap();
    let b = embedder.embed(SAMPLE_CONTENTS[1], "text/plain").unwrap();

    c.bench_function("cosine_similarity_384", |bench| {
        bench.iter(|| cosine_similarity(black_box(&a), black_box(&b)))
    });
}

fn bench_hash_embed(c: &mut Criterion) {
    let embedder = HashEmbedder::default();

    c.bench_function("hash_embed", |bench| {
        bench.iter(|| embedder.embed(black_box(SAMPLE_CONTENTS[0]), "text/plain").unwrap())
    });
}

fn bench_pair_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_similar_pairs");

    for size in [50, 200, 500] {
        let (store, tenant) = setup_store(size);
        group.throughput(Throughput::Elements((size * (size - 1) / 2) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| {
                store
                    .storage()
                    .with_connection(|conn| {
                        queries::find_similar_pairs(conn, &tenant, None, black_box(0.95), 0)
                    })
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_semantic_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("semantic_search");

    for size in [100, 1000] {
        let (store, tenant) = setup_store(size);
        let engine = store.search_engine();
        let request = SearchRequest::new("morning coffee").with_limit(10);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| engine.semantic_search(&tenant, black_box(&request)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cosine,
    bench_hash_embed,
    bench_pair_scan,
    bench_semantic_search
);
criterion_main!(benches);
