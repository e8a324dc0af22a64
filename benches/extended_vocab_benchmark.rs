#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use rust_summarus::pgn::extend_batch;
use std::time::{Duration, Instant};
use tch::Tensor;

const VOCAB_SIZE: i64 = 30_000;
const OOV_INDEX: i64 = 1;

fn build_inputs(batch_size: i64, source_length: i64) -> (Tensor, Tensor) {
    // Every 17th source position holds an out-of-vocabulary word, cycling
    // through 5 distinct identities per example.
    let mut tokens = Vec::with_capacity((batch_size * source_length) as usize);
    let mut identities = Vec::with_capacity((batch_size * source_length) as usize);
    for _ in 0..batch_size {
        for position in 0..source_length {
            if position % 17 == 0 {
                tokens.push(OOV_INDEX);
            } else {
                tokens.push(4 + position % 1000);
            }
            identities.push(1 + position % 5);
        }
    }
    (
        Tensor::from_slice(&tokens).view([batch_size, source_length]),
        Tensor::from_slice(&identities).view([batch_size, source_length]),
    )
}

fn extend(iters: u64, source_to_target: &Tensor, source_token_ids: &Tensor) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = extend_batch(
            source_to_target,
            source_token_ids,
            None,
            None,
            VOCAB_SIZE,
            OOV_INDEX,
        );
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn bench_extended_vocab(c: &mut Criterion) {
    let (source_to_target, source_token_ids) = build_inputs(32, 400);

    let _ = extend_batch(
        &source_to_target,
        &source_token_ids,
        None,
        None,
        VOCAB_SIZE,
        OOV_INDEX,
    );
    c.bench_function("Extended vocabulary build ", |b| {
        b.iter_custom(|iters| black_box(extend(iters, &source_to_target, &source_token_ids)))
    });
}

criterion_group! {
name = benches;
config = Criterion::default().sample_size(100);
targets = bench_extended_vocab
}

criterion_main!(benches);
