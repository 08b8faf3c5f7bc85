//! Signer requirement analysis
//!
//! Computes which external authorities a batch needs beyond the fee payer
//! and the signers the caller already holds.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::collections::BTreeSet;

/// Signers demanded by the operations that nobody at hand can provide
pub type SignerSet = BTreeSet<Pubkey>;

/// Collect every `is_signer` account minus the payer and explicit signers
pub fn missing_signers(ops: &[Instruction], fee_payer: &Pubkey, explicit: &[Pubkey]) -> SignerSet {
    ops.iter()
        .flat_map(|ix| ix.accounts.iter())
        .filter(|meta| meta.is_signer)
        .map(|meta| meta.pubkey)
        .filter(|key| key != fee_payer && !explicit.contains(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    fn ix(metas: Vec<AccountMeta>) -> Instruction {
        Instruction::new_with_bytes(Pubkey::new_unique(), &[], metas)
    }

    #[test]
    fn test_payer_and_explicit_signers_removed() {
        let payer = Pubkey::new_unique();
        let explicit = Pubkey::new_unique();
        let authority = Pubkey::new_unique();
        let ops = vec![
            ix(vec![AccountMeta::new(payer, true), AccountMeta::new(explicit, true)]),
            ix(vec![AccountMeta::new_readonly(authority, true)]),
            ix(vec![AccountMeta::new_readonly(authority, true)]),
        ];

        let set = missing_signers(&ops, &payer, &[explicit]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![authority]);
    }

    #[test]
    fn test_non_signers_ignored() {
        let payer = Pubkey::new_unique();
        let ops = vec![ix(vec![AccountMeta::new(Pubkey::new_unique(), false)])];
        assert!(missing_signers(&ops, &payer, &[]).is_empty());
    }
}
