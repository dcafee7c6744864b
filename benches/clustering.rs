//! Benchmarks for the acoustic clusterer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use keyecho::config::ClusterConfig;
use keyecho::similarity::SimilarityMap;
use keyecho::{CancelToken, Clusterer};

/// Block-structured map: `n_keys` groups with high in-group similarity
fn block_map(n_presses: usize, n_keys: usize) -> SimilarityMap {
    SimilarityMap::from_cc(n_presses, |i, j| {
        if i % n_keys == j % n_keys {
            0.92
        } else {
            0.08
        }
    })
}

fn bench_annealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("annealing");
    group.sample_size(10);

    let config = ClusterConfig {
        clusterings_per_iteration: 4,
        mcmc_iterations: 10_000,
        seed: 1,
        ..Default::default()
    };

    for n_presses in [50, 100, 200] {
        let sim = block_map(n_presses, 8);

        group.bench_with_input(
            BenchmarkId::new("presses", n_presses),
            &n_presses,
            |b, _| {
                let clusterer = Clusterer::new(&sim);
                b.iter(|| {
                    let clusterings = clusterer
                        .clusterings(&config, 29, &CancelToken::new())
                        .unwrap();
                    black_box(clusterings)
                })
            },
        );
    }

    group.finish();
}

fn bench_score_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("score_recompute");

    for n_presses in [100, 200, 400] {
        let sim = block_map(n_presses, 8);
        let clusters: Vec<u32> = (0..n_presses).map(|i| (i % 8) as u32).collect();

        group.bench_with_input(
            BenchmarkId::new("presses", n_presses),
            &n_presses,
            |b, _| {
                let clusterer = Clusterer::new(&sim);
                b.iter(|| black_box(clusterer.score(black_box(&clusters))))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_annealing, bench_score_recompute);
criterion_main!(benches);
