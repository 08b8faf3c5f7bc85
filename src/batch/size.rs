//! Wire-size estimation for candidate execution units
//!
//! Estimators compile the real v0 message a unit will be sent as and return
//! the serialized length of the full signed transaction. Only the values
//! unknown at packing time (payer, blockhash, signatures) are placeholders.
//! Wrapper overhead grows with the number of distinct accounts, so it is
//! measured rather than approximated.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::{v0, AddressLookupTableAccount, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};

use crate::programs::{governance, squads_v4};

/// Returned when a unit cannot be compiled at all
pub const EXCEEDS_MAX_SIZE: usize = usize::MAX;

/// Bytes reserved for the two compute-budget directives added at submit time
pub const COMPUTE_BUDGET_HEADROOM: usize = 64;

/// Default packing ceiling for plain units
pub const DEFAULT_UNIT_CEILING: usize = PACKET_DATA_SIZE - COMPUTE_BUDGET_HEADROOM;

/// Measures the exact serialized size of a candidate unit
pub trait SizeEstimator {
    /// Serialized transaction length in bytes, or [`EXCEEDS_MAX_SIZE`]
    fn measure(&self, ops: &[Instruction]) -> usize;
}

/// Serialized length of a transaction carrying `ixs`, paid by `payer`
///
/// Signatures are zero-filled placeholders, one per required signer.
pub fn transaction_size(payer: &Pubkey, ixs: &[Instruction], lookup_tables: &[AddressLookupTableAccount]) -> usize {
    let Ok(message) = v0::Message::try_compile(payer, ixs, lookup_tables, Hash::default()) else {
        return EXCEEDS_MAX_SIZE;
    };
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
        message: VersionedMessage::V0(message),
    };
    bincode::serialized_size(&tx)
        .ok()
        .and_then(|size| usize::try_from(size).ok())
        .unwrap_or(EXCEEDS_MAX_SIZE)
}

/// Plain unit: the operations are sent as they are
#[derive(Debug, Clone)]
pub struct TransactionSizeEstimator {
    payer: Pubkey,
    lookup_tables: Vec<AddressLookupTableAccount>,
}

impl TransactionSizeEstimator {
    pub fn new(payer: Pubkey) -> Self {
        Self {
            payer,
            lookup_tables: Vec::new(),
        }
    }

    pub fn with_lookup_tables(mut self, lookup_tables: Vec<AddressLookupTableAccount>) -> Self {
        self.lookup_tables = lookup_tables;
        self
    }
}

impl SizeEstimator for TransactionSizeEstimator {
    fn measure(&self, ops: &[Instruction]) -> usize {
        transaction_size(&self.payer, ops, &self.lookup_tables)
    }
}

/// Unit carried inside a Squads v4 `batch_add_transaction`
///
/// Addresses of the batch are real. Member and rent payer are the fee payer,
/// which is unknown until submission and therefore a placeholder.
#[derive(Debug, Clone)]
pub struct BatchAddSizeEstimator {
    pub program_id: Pubkey,
    pub multisig: Pubkey,
    pub vault: Pubkey,
    pub batch_index: u64,
    pub payer: Pubkey,
}

impl BatchAddSizeEstimator {
    /// Wrapper instruction for the unit at 1-based `tx_index`
    pub fn wrap(&self, ops: &[Instruction], tx_index: u32) -> Option<Instruction> {
        let message = squads_v4::compile_vault_message(&self.vault, ops).ok()?;
        let accounts = squads_v4::BatchAddTransactionAccounts {
            multisig: self.multisig,
            proposal: squads_v4::proposal_pda(&self.program_id, &self.multisig, self.batch_index),
            batch: squads_v4::transaction_pda(&self.program_id, &self.multisig, self.batch_index),
            transaction: squads_v4::batch_transaction_pda(&self.program_id, &self.multisig, self.batch_index, tx_index),
            member: self.payer,
            rent_payer: self.payer,
        };
        Some(squads_v4::batch_add_transaction(&self.program_id, &accounts, 0, message))
    }
}

impl SizeEstimator for BatchAddSizeEstimator {
    fn measure(&self, ops: &[Instruction]) -> usize {
        // The slot index only changes a PDA, never the size
        match self.wrap(ops, 1) {
            Some(wrapper) => transaction_size(&self.payer, &[wrapper], &[]),
            None => EXCEEDS_MAX_SIZE,
        }
    }
}

/// Single operation carried inside a governance `insert_transaction`
#[derive(Debug, Clone)]
pub struct InsertTransactionSizeEstimator {
    pub program_id: Pubkey,
    pub accounts: governance::ProposalAccounts,
}

impl SizeEstimator for InsertTransactionSizeEstimator {
    fn measure(&self, ops: &[Instruction]) -> usize {
        let wrapped: Vec<Instruction> = ops
            .iter()
            .map(|ix| governance::insert_transaction(&self.program_id, &self.accounts, 0, ix))
            .collect();
        transaction_size(&self.accounts.payer, &wrapped, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    fn op(n_accounts: usize, data_len: usize) -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &vec![0u8; data_len],
            (0..n_accounts).map(|_| AccountMeta::new(Pubkey::new_unique(), false)).collect(),
        )
    }

    #[test]
    fn test_transaction_size_grows_with_accounts_and_data() {
        let payer = Pubkey::new_unique();
        let estimator = TransactionSizeEstimator::new(payer);

        let base = estimator.measure(&[op(1, 10)]);
        assert!(base < PACKET_DATA_SIZE);
        // One extra account costs its 32 byte key plus one index byte
        assert_eq!(estimator.measure(&[op(2, 10)]), base + 33);
        assert_eq!(estimator.measure(&[op(1, 20)]), base + 10);
    }

    #[test]
    fn test_measure_matches_real_serialization() {
        let payer = solana_sdk::signature::Keypair::new();
        let ix = op(3, 40);
        let estimator = TransactionSizeEstimator::new(solana_sdk::signer::Signer::pubkey(&payer));

        let message = v0::Message::try_compile(
            &solana_sdk::signer::Signer::pubkey(&payer),
            &[ix.clone()],
            &[],
            Hash::new_unique(),
        )
        .unwrap();
        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &[&payer]).unwrap();
        assert_eq!(estimator.measure(&[ix]), bincode::serialize(&tx).unwrap().len());
    }

    #[test]
    fn test_uncompilable_unit_is_sentinel() {
        let estimator = TransactionSizeEstimator::new(Pubkey::new_unique());
        // More than 256 distinct keys cannot be indexed by u8
        let ops: Vec<Instruction> = (0..30).map(|_| op(10, 0)).collect();
        assert_eq!(estimator.measure(&ops), EXCEEDS_MAX_SIZE);
    }

    #[test]
    fn test_batch_wrapper_adds_overhead() {
        let multisig = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let batch = BatchAddSizeEstimator {
            program_id: squads_v4::PROGRAM_ID,
            multisig,
            vault: squads_v4::vault_pda(&squads_v4::PROGRAM_ID, &multisig, 0),
            batch_index: 4,
            payer,
        };
        let plain = TransactionSizeEstimator::new(payer);

        let ops = vec![op(2, 16)];
        assert!(batch.measure(&ops) > plain.measure(&ops));
    }
}
