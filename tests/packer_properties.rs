//! Property tests for the greedy packer

use batch_dispatch::batch::{pack, Bucket, SizeEstimator};
use proptest::prelude::*;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

/// Size is the sum of each operation's data length
struct DataLenEstimator;

impl SizeEstimator for DataLenEstimator {
    fn measure(&self, ops: &[Instruction]) -> usize {
        ops.iter().map(|ix| ix.data.len()).sum()
    }
}

fn sized(len: usize) -> Instruction {
    Instruction::new_with_bytes(Pubkey::default(), &vec![0u8; len], vec![])
}

fn buckets_strategy() -> impl Strategy<Value = Vec<Bucket>> {
    prop::collection::vec(
        prop::collection::vec(1usize..700, 0..4).prop_map(|lens| lens.into_iter().map(sized).collect::<Bucket>()),
        0..60,
    )
}

fn bucket_size(bucket: &Bucket) -> usize {
    DataLenEstimator.measure(bucket)
}

proptest! {
    #[test]
    fn every_bucket_is_placed_or_failed_once(buckets in buckets_strategy(), ceiling in 100usize..1500) {
        let outcome = pack(&buckets, ceiling, &DataLenEstimator);

        let mut seen: Vec<usize> = outcome.units.iter().flat_map(|u| u.buckets.iter().copied()).collect();
        seen.extend(outcome.failed.iter().copied());
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..buckets.len()).collect::<Vec<_>>());

        for &failed in &outcome.failed {
            let bucket = &buckets[failed];
            prop_assert!(bucket.is_empty() || bucket_size(bucket) > ceiling);
        }
    }

    #[test]
    fn units_preserve_input_order(buckets in buckets_strategy(), ceiling in 100usize..1500) {
        let outcome = pack(&buckets, ceiling, &DataLenEstimator);

        let placed: Vec<usize> = outcome.units.iter().flat_map(|u| u.buckets.iter().copied()).collect();
        prop_assert!(placed.windows(2).all(|w| w[0] < w[1]));

        for unit in &outcome.units {
            let expected: Vec<Instruction> = unit.buckets.iter().flat_map(|&i| buckets[i].clone()).collect();
            prop_assert_eq!(&unit.instructions, &expected);
        }
    }

    #[test]
    fn units_respect_the_ceiling(buckets in buckets_strategy(), ceiling in 100usize..1500) {
        let outcome = pack(&buckets, ceiling, &DataLenEstimator);

        for unit in &outcome.units {
            prop_assert!(!unit.buckets.is_empty());
            prop_assert!(DataLenEstimator.measure(&unit.instructions) <= ceiling);
        }
    }

    #[test]
    fn units_are_sealed_only_on_overflow(buckets in buckets_strategy(), ceiling in 100usize..1500) {
        let outcome = pack(&buckets, ceiling, &DataLenEstimator);

        for pair in outcome.units.windows(2) {
            let last = pair[0].buckets[pair[0].buckets.len() - 1];
            let next = pair[1].buckets[0];
            if next == last + 1 {
                let merged = DataLenEstimator.measure(&pair[0].instructions) + bucket_size(&buckets[next]);
                prop_assert!(merged > ceiling);
            }
        }
    }
}
