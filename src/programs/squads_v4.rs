//! Squads v4 batch multisig bindings
//!
//! The batch flow is `batch_create` + draft `proposal_create`, then one
//! `batch_add_transaction` per packed unit, then `proposal_activate`. The
//! operations of each unit travel inside the wrapper as a compact
//! vault transaction message, see [`compile_vault_message`].

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::v0,
    pubkey,
    pubkey::Pubkey,
    system_program,
};

use super::{anchor_ix_data, decode_anchor_account};
use crate::batch::errors::DispatchError;

pub const PROGRAM_ID: Pubkey = pubkey!("SQDS4ep65T869zMMBKyuUq6aD6EgTu8psMjkvj52pCf");

const SEED_PREFIX: &[u8] = b"multisig";
const SEED_VAULT: &[u8] = b"vault";
const SEED_TRANSACTION: &[u8] = b"transaction";
const SEED_PROPOSAL: &[u8] = b"proposal";
const SEED_BATCH_TRANSACTION: &[u8] = b"batch_transaction";

pub fn vault_pda(program_id: &Pubkey, multisig: &Pubkey, vault_index: u8) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_PREFIX, multisig.as_ref(), SEED_VAULT, &[vault_index]],
        program_id,
    )
    .0
}

/// Address of the transaction (or batch) at `index`
pub fn transaction_pda(program_id: &Pubkey, multisig: &Pubkey, index: u64) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_PREFIX, multisig.as_ref(), SEED_TRANSACTION, &index.to_le_bytes()],
        program_id,
    )
    .0
}

pub fn proposal_pda(program_id: &Pubkey, multisig: &Pubkey, index: u64) -> Pubkey {
    Pubkey::find_program_address(
        &[
            SEED_PREFIX,
            multisig.as_ref(),
            SEED_TRANSACTION,
            &index.to_le_bytes(),
            SEED_PROPOSAL,
        ],
        program_id,
    )
    .0
}

/// Address of the `tx_index`-th (1-based) transaction inside a batch
pub fn batch_transaction_pda(
    program_id: &Pubkey,
    multisig: &Pubkey,
    batch_index: u64,
    tx_index: u32,
) -> Pubkey {
    Pubkey::find_program_address(
        &[
            SEED_PREFIX,
            multisig.as_ref(),
            SEED_TRANSACTION,
            &batch_index.to_le_bytes(),
            SEED_BATCH_TRANSACTION,
            &tx_index.to_le_bytes(),
        ],
        program_id,
    )
    .0
}

// ============================================================================
// ACCOUNT STATE
// ============================================================================

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct Member {
    pub key: Pubkey,
    pub permissions: u8,
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct Multisig {
    pub create_key: Pubkey,
    pub config_authority: Pubkey,
    pub threshold: u16,
    pub time_lock: u32,
    pub transaction_index: u64,
    pub stale_transaction_index: u64,
    pub rent_collector: Option<Pubkey>,
    pub bump: u8,
    pub members: Vec<Member>,
}

impl Multisig {
    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DispatchError> {
        decode_anchor_account(account, data, "Multisig")
    }
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct Batch {
    pub multisig: Pubkey,
    pub creator: Pubkey,
    pub index: u64,
    pub bump: u8,
    pub vault_index: u8,
    pub vault_bump: u8,
    /// Number of transactions added so far
    pub size: u32,
    pub executed_transaction_index: u32,
}

impl Batch {
    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DispatchError> {
        decode_anchor_account(account, data, "Batch")
    }
}

#[derive(Debug, Clone, Copy, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub enum ProposalStatus {
    Draft { timestamp: i64 },
    Active { timestamp: i64 },
    Rejected { timestamp: i64 },
    Approved { timestamp: i64 },
    Executing,
    Executed { timestamp: i64 },
    Cancelled { timestamp: i64 },
}

impl ProposalStatus {
    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft { .. })
    }
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct Proposal {
    pub multisig: Pubkey,
    pub transaction_index: u64,
    pub status: ProposalStatus,
    pub bump: u8,
    pub approved: Vec<Pubkey>,
    pub rejected: Vec<Pubkey>,
    pub cancelled: Vec<Pubkey>,
}

impl Proposal {
    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DispatchError> {
        decode_anchor_account(account, data, "Proposal")
    }
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

#[derive(BorshSerialize)]
struct BatchCreateArgs {
    vault_index: u8,
    memo: Option<String>,
}

#[derive(BorshSerialize)]
struct ProposalCreateArgs {
    transaction_index: u64,
    draft: bool,
}

#[derive(BorshSerialize)]
struct BatchAddTransactionArgs {
    ephemeral_signers: u8,
    transaction_message: Vec<u8>,
}

#[derive(BorshSerialize)]
struct ProposalActivateArgs {}

#[derive(Debug, Clone, Copy)]
pub struct BatchCreateAccounts {
    pub multisig: Pubkey,
    pub creator: Pubkey,
    pub rent_payer: Pubkey,
    pub batch: Pubkey,
}

pub fn batch_create(
    program_id: &Pubkey,
    accounts: &BatchCreateAccounts,
    vault_index: u8,
    memo: Option<String>,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.multisig, false),
            AccountMeta::new_readonly(accounts.creator, true),
            AccountMeta::new(accounts.rent_payer, true),
            AccountMeta::new(accounts.batch, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: anchor_ix_data("batch_create", &BatchCreateArgs { vault_index, memo }),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProposalCreateAccounts {
    pub multisig: Pubkey,
    pub proposal: Pubkey,
    pub creator: Pubkey,
    pub rent_payer: Pubkey,
}

pub fn proposal_create(
    program_id: &Pubkey,
    accounts: &ProposalCreateAccounts,
    transaction_index: u64,
    draft: bool,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.multisig, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new_readonly(accounts.creator, true),
            AccountMeta::new(accounts.rent_payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: anchor_ix_data(
            "proposal_create",
            &ProposalCreateArgs {
                transaction_index,
                draft,
            },
        ),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchAddTransactionAccounts {
    pub multisig: Pubkey,
    pub proposal: Pubkey,
    pub batch: Pubkey,
    pub transaction: Pubkey,
    pub member: Pubkey,
    pub rent_payer: Pubkey,
}

pub fn batch_add_transaction(
    program_id: &Pubkey,
    accounts: &BatchAddTransactionAccounts,
    ephemeral_signers: u8,
    transaction_message: Vec<u8>,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.multisig, false),
            AccountMeta::new_readonly(accounts.proposal, false),
            AccountMeta::new(accounts.batch, false),
            AccountMeta::new(accounts.transaction, false),
            AccountMeta::new_readonly(accounts.member, true),
            AccountMeta::new(accounts.rent_payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: anchor_ix_data(
            "batch_add_transaction",
            &BatchAddTransactionArgs {
                ephemeral_signers,
                transaction_message,
            },
        ),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProposalActivateAccounts {
    pub multisig: Pubkey,
    pub member: Pubkey,
    pub proposal: Pubkey,
}

pub fn proposal_activate(program_id: &Pubkey, accounts: &ProposalActivateAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.multisig, false),
            AccountMeta::new(accounts.member, true),
            AccountMeta::new(accounts.proposal, false),
        ],
        data: anchor_ix_data("proposal_activate", &ProposalActivateArgs {}),
    }
}

// ============================================================================
// VAULT TRANSACTION MESSAGE
// ============================================================================

/// Compile `ixs` into the compact message format stored by `batch_add_transaction`
///
/// The vault acts as payer of the inner message. Lengths are u8-prefixed
/// except instruction data, which is u16-prefixed.
pub fn compile_vault_message(vault: &Pubkey, ixs: &[Instruction]) -> Result<Vec<u8>, DispatchError> {
    let message = v0::Message::try_compile(vault, ixs, &[], Hash::default())
        .map_err(|e| DispatchError::config(format!("vault message compile failed: {}", e)))?;

    let header = message.header;
    let num_signers = header.num_required_signatures;
    let num_writable_signers = num_signers.saturating_sub(header.num_readonly_signed_accounts);
    let num_writable_non_signers = (message.account_keys.len() as u8)
        .saturating_sub(num_signers)
        .saturating_sub(header.num_readonly_unsigned_accounts);

    let mut out = Vec::with_capacity(64 + message.account_keys.len() * 32);
    out.extend_from_slice(&[num_signers, num_writable_signers, num_writable_non_signers]);

    write_u8_len(&mut out, message.account_keys.len())?;
    for key in &message.account_keys {
        out.extend_from_slice(key.as_ref());
    }

    write_u8_len(&mut out, message.instructions.len())?;
    for ix in &message.instructions {
        out.push(ix.program_id_index);
        write_u8_len(&mut out, ix.accounts.len())?;
        out.extend_from_slice(&ix.accounts);
        let data_len = u16::try_from(ix.data.len())
            .map_err(|_| DispatchError::config("instruction data longer than u16::MAX"))?;
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&ix.data);
    }

    // No lookup tables inside the vault message
    write_u8_len(&mut out, 0)?;
    Ok(out)
}

fn write_u8_len(out: &mut Vec<u8>, len: usize) -> Result<(), DispatchError> {
    let len = u8::try_from(len)
        .map_err(|_| DispatchError::config(format!("vault message section of {} entries exceeds u8", len)))?;
    out.push(len);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::anchor_discriminator;

    #[test]
    fn test_vault_message_layout() {
        let vault = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let target = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            program,
            &[1, 2, 3],
            vec![AccountMeta::new(vault, true), AccountMeta::new(target, false)],
        );

        let bytes = compile_vault_message(&vault, &[ix]).unwrap();
        // 1 writable signer (vault), 1 writable non-signer (target), program readonly
        assert_eq!(&bytes[..3], &[1, 1, 1]);
        assert_eq!(bytes[3], 3);
        assert_eq!(&bytes[4..36], vault.as_ref());
        let ix_section = 4 + 3 * 32;
        assert_eq!(bytes[ix_section], 1);
        // program index, 2 accounts, indices, u16 len 3, data
        assert_eq!(&bytes[ix_section + 1..ix_section + 5], &[2, 2, 0, 1]);
        assert_eq!(&bytes[ix_section + 5..ix_section + 7], &[3, 0]);
        assert_eq!(&bytes[ix_section + 7..ix_section + 10], &[1, 2, 3]);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_batch_decode() {
        let key = Pubkey::new_unique();
        let batch = Batch {
            multisig: Pubkey::new_unique(),
            creator: Pubkey::new_unique(),
            index: 12,
            bump: 255,
            vault_index: 0,
            vault_bump: 254,
            size: 4,
            executed_transaction_index: 0,
        };
        let mut data = anchor_discriminator("account", "Batch").to_vec();
        data.extend(borsh::to_vec(&batch).unwrap());

        assert_eq!(Batch::decode(&key, &data).unwrap(), batch);
        assert!(Multisig::decode(&key, &data).is_err());
    }

    #[test]
    fn test_proposal_decode_ignores_reallocated_tail() {
        let key = Pubkey::new_unique();
        let proposal = Proposal {
            multisig: Pubkey::new_unique(),
            transaction_index: 3,
            status: ProposalStatus::Active { timestamp: 1_700_000_000 },
            bump: 254,
            approved: vec![Pubkey::new_unique()],
            rejected: vec![],
            cancelled: vec![],
        };
        let mut data = anchor_discriminator("account", "Proposal").to_vec();
        data.extend(borsh::to_vec(&proposal).unwrap());
        data.extend_from_slice(&[0u8; 64]);

        let decoded = Proposal::decode(&key, &data).unwrap();
        assert_eq!(decoded, proposal);
        assert!(!decoded.status.is_draft());
    }

    #[test]
    fn test_pdas_are_distinct() {
        let ms = Pubkey::new_unique();
        assert_ne!(transaction_pda(&PROGRAM_ID, &ms, 1), proposal_pda(&PROGRAM_ID, &ms, 1));
        assert_ne!(
            batch_transaction_pda(&PROGRAM_ID, &ms, 1, 1),
            batch_transaction_pda(&PROGRAM_ID, &ms, 1, 2)
        );
    }
}
