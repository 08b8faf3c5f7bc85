//! Packing throughput with exact transaction sizing
//!
//! Benchmarks:
//! - Greedy packing of uniform operations at several batch sizes
//! - Single transaction size measurement

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use batch_dispatch::batch::operation::singleton_buckets;
use batch_dispatch::batch::{pack, SizeEstimator, TransactionSizeEstimator, DEFAULT_UNIT_CEILING};

fn operation(data_len: usize) -> Instruction {
    Instruction {
        program_id: Pubkey::new_unique(),
        accounts: vec![
            AccountMeta::new(Pubkey::new_unique(), false),
            AccountMeta::new_readonly(Pubkey::new_unique(), false),
        ],
        data: vec![1u8; data_len],
    }
}

fn bench_pack(c: &mut Criterion) {
    let estimator = TransactionSizeEstimator::new(Pubkey::new_unique());
    let mut group = c.benchmark_group("pack");

    for count in [10usize, 100, 500] {
        let ops: Vec<Instruction> = (0..count).map(|_| operation(64)).collect();
        let buckets = singleton_buckets(&ops);
        group.bench_with_input(BenchmarkId::from_parameter(count), &buckets, |b, buckets| {
            b.iter(|| pack(black_box(buckets), DEFAULT_UNIT_CEILING, &estimator))
        });
    }
    group.finish();
}

fn bench_measure(c: &mut Criterion) {
    let estimator = TransactionSizeEstimator::new(Pubkey::new_unique());
    let ops: Vec<Instruction> = (0..8).map(|_| operation(64)).collect();

    c.bench_function("measure_8_ops", |b| b.iter(|| estimator.measure(black_box(&ops))));
}

criterion_group!(benches, bench_pack, bench_measure);
criterion_main!(benches);
