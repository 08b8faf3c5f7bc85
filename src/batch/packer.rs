//! Greedy, order-preserving packing of buckets into execution units
//!
//! Single pass over the buckets. Each bucket is tentatively appended to the
//! current unit and measured; on overflow the current unit is sealed and the
//! bucket retried alone. A bucket that overflows an empty unit is recorded as
//! failed and packing continues with the next one.

use solana_sdk::instruction::Instruction;
use tracing::{debug, warn};

use super::errors::DispatchError;
use super::operation::Bucket;
use super::size::SizeEstimator;

/// One sealed execution unit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackedUnit {
    /// Concatenated operations of the unit's buckets, in input order
    pub instructions: Vec<Instruction>,
    /// Input indices of the buckets in this unit
    pub buckets: Vec<usize>,
}

impl PackedUnit {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Result of a packing pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackOutcome {
    pub units: Vec<PackedUnit>,
    /// Input indices of buckets that are empty or too large on their own
    pub failed: Vec<usize>,
    /// Ceiling the pass was run against
    pub ceiling: usize,
}

impl PackOutcome {
    /// Every bucket was placed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Units if every bucket was placed, otherwise `PackingOverflow`
    pub fn into_result(self) -> Result<Vec<PackedUnit>, DispatchError> {
        if self.failed.is_empty() {
            Ok(self.units)
        } else {
            Err(DispatchError::PackingOverflow {
                buckets: self.failed,
                ceiling: self.ceiling,
            })
        }
    }
}

/// Pack `buckets` into units no larger than `ceiling` bytes
pub fn pack<E: SizeEstimator + ?Sized>(buckets: &[Bucket], ceiling: usize, estimator: &E) -> PackOutcome {
    let mut outcome = PackOutcome {
        ceiling,
        ..PackOutcome::default()
    };
    let mut current = PackedUnit::default();

    for (index, bucket) in buckets.iter().enumerate() {
        if bucket.is_empty() {
            warn!(bucket = index, "Empty bucket, nothing to pack");
            outcome.failed.push(index);
            continue;
        }

        if fits(&current, bucket, ceiling, estimator) {
            append(&mut current, index, bucket);
            continue;
        }

        if !current.is_empty() {
            debug!(
                unit = outcome.units.len(),
                buckets = current.buckets.len(),
                "Sealing execution unit"
            );
            outcome.units.push(std::mem::take(&mut current));
            if fits(&current, bucket, ceiling, estimator) {
                append(&mut current, index, bucket);
                continue;
            }
        }

        warn!(
            bucket = index,
            ops = bucket.len(),
            ceiling,
            "Bucket exceeds the unit ceiling on its own"
        );
        outcome.failed.push(index);
    }

    if !current.is_empty() {
        outcome.units.push(current);
    }

    outcome
}

fn fits<E: SizeEstimator + ?Sized>(current: &PackedUnit, bucket: &Bucket, ceiling: usize, estimator: &E) -> bool {
    let mut candidate = Vec::with_capacity(current.instructions.len() + bucket.len());
    candidate.extend_from_slice(&current.instructions);
    candidate.extend_from_slice(bucket);
    estimator.measure(&candidate) <= ceiling
}

fn append(current: &mut PackedUnit, index: usize, bucket: &Bucket) {
    current.instructions.extend_from_slice(bucket);
    current.buckets.push(index);
}
