use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tetora::atoms::types::SearchHit;
use tetora::memory::hybrid::{cosine_similarity, mmr_rerank, rrf_merge};

fn make_vec(dim: usize, seed: u64) -> Vec<f32> {
    (0..dim).map(|i| (((i as u64 + seed) * 2654435761) % 1000) as f32 / 1000.0).collect()
}

fn make_hits(count: usize) -> Vec<SearchHit> {
    (0..count)
        .map(|i| SearchHit {
            source_id: format!("id-{}", i),
            source: "memory".to_string(),
            content: format!("content body number {}", i),
            score: 1.0 / (i as f64 + 1.0),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        })
        .collect()
}

fn bench_cosine_similarity(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine_similarity_by_dim");
    for dim in [8, 64, 256, 1536].iter() {
        let a = make_vec(*dim, 1);
        let b = make_vec(*dim, 2);
        group.bench_with_input(BenchmarkId::from_parameter(dim), dim, |bch, _| {
            bch.iter(|| cosine_similarity(black_box(&a), black_box(&b)));
        });
    }
    group.finish();
}

fn bench_rrf_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf_merge_by_result_count");
    for count in [10, 50, 200, 500].iter() {
        let a = make_hits(*count);
        let b = make_hits(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |bch, _| {
            bch.iter(|| rrf_merge(black_box(&a), black_box(&b), 60.0));
        });
    }
    group.finish();
}

fn bench_mmr_rerank(c: &mut Criterion) {
    let mut group = c.benchmark_group("mmr_rerank_by_candidate_count");
    for count in [10, 50, 200].iter() {
        let hits = make_hits(*count);
        let query_vec = make_vec(64, 0);
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |bch, _| {
            bch.iter(|| mmr_rerank(black_box(&hits), black_box(&query_vec), None, 0.5, 10));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_cosine_similarity, bench_rrf_merge, bench_mmr_rerank);
criterion_main!(benches);
