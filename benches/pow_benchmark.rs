use criterion::{black_box, criterion_group, criterion_main, Criterion};
use duolink::signaling::challenge::{digest, solve, MAX_SOLVE_ITERATIONS};
use rand::{thread_rng, RngCore};

fn random_target() -> String {
    let mut raw = [0u8; 32];
    thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

fn digest_benchmark(c: &mut Criterion) {
    let target = random_target();
    c.bench_function("challenge_digest", |b| {
        b.iter(|| digest(black_box("brave-fox-123"), black_box(&target), black_box("4096")))
    });
}

/// Solving cost grows sixteenfold per difficulty step.
fn solve_benchmark(c: &mut Criterion) {
    for difficulty in 1..=3 {
        c.bench_function(format!("solve_difficulty_{}", difficulty).as_str(), |b| {
            b.iter(|| {
                let target = random_target();
                solve(&target, difficulty, None, MAX_SOLVE_ITERATIONS)
                    .expect("no nonce within the iteration limit")
            })
        });
    }
}

criterion_group!(benches, digest_benchmark, solve_benchmark);
criterion_main!(benches);
