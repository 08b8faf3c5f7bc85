//! Squads v3 (MPL) legacy multisig bindings
//!
//! A v3 transaction is built one instruction at a time: `create_transaction`
//! allocates it, each `add_instruction` bumps `instruction_index`, then it is
//! activated, approved and executed instruction by instruction.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program,
};

use super::{anchor_ix_data, decode_anchor_account};
use crate::batch::errors::DispatchError;

pub const PROGRAM_ID: Pubkey = pubkey!("SMPLecH534NA9acpos4G6x7uf3LWbCAwZQE9e8ZekMu");

const SEED_PREFIX: &[u8] = b"squad";

pub fn transaction_pda(program_id: &Pubkey, multisig: &Pubkey, index: u32) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_PREFIX, multisig.as_ref(), &index.to_le_bytes(), b"transaction"],
        program_id,
    )
    .0
}

pub fn instruction_pda(program_id: &Pubkey, transaction: &Pubkey, index: u8) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_PREFIX, transaction.as_ref(), &[index], b"instruction"],
        program_id,
    )
    .0
}

/// Vault PDA that signs for the multisig at `authority_index`
pub fn authority_pda(program_id: &Pubkey, multisig: &Pubkey, authority_index: u32) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_PREFIX, multisig.as_ref(), &authority_index.to_le_bytes(), b"authority"],
        program_id,
    )
    .0
}

// ============================================================================
// ACCOUNT STATE
// ============================================================================

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct Ms {
    pub threshold: u16,
    pub authority_index: u16,
    pub transaction_index: u32,
    pub ms_change_index: u32,
    pub bump: u8,
    pub create_key: Pubkey,
    pub allow_external_execute: bool,
    pub keys: Vec<Pubkey>,
}

impl Ms {
    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DispatchError> {
        decode_anchor_account(account, data, "Ms")
    }
}

#[derive(Debug, Clone, Copy, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub enum MsTransactionStatus {
    Draft,
    Active,
    ExecuteReady,
    Executed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct MsTransaction {
    pub creator: Pubkey,
    pub ms: Pubkey,
    pub transaction_index: u32,
    pub authority_index: u32,
    pub authority_bump: u8,
    pub status: MsTransactionStatus,
    /// Number of instructions attached so far
    pub instruction_index: u8,
    pub bump: u8,
    pub approved: Vec<Pubkey>,
    pub rejected: Vec<Pubkey>,
    pub cancelled: Vec<Pubkey>,
    /// Index of the last executed instruction (0 before any)
    pub executed_index: u8,
}

impl MsTransaction {
    pub fn decode(account: &Pubkey, data: &[u8]) -> Result<Self, DispatchError> {
        decode_anchor_account(account, data, "MsTransaction")
    }
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct MsAccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Instruction payload stored by `add_instruction`
#[derive(Debug, Clone, BorshSerialize, BorshDeserialize, PartialEq, Eq)]
pub struct IncomingInstruction {
    pub program_id: Pubkey,
    pub keys: Vec<MsAccountMeta>,
    pub data: Vec<u8>,
}

impl From<&Instruction> for IncomingInstruction {
    fn from(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id,
            keys: ix
                .accounts
                .iter()
                .map(|meta| MsAccountMeta {
                    pubkey: meta.pubkey,
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
                .collect(),
            data: ix.data.clone(),
        }
    }
}

#[derive(BorshSerialize)]
struct CreateTransactionArgs {
    authority_index: u32,
}

#[derive(BorshSerialize)]
struct NoArgs {}

/// Accounts shared by create/activate; `instruction` is used by add/execute
#[derive(Debug, Clone, Copy)]
pub struct TransactionAccounts {
    pub multisig: Pubkey,
    pub transaction: Pubkey,
    pub member: Pubkey,
}

pub fn create_transaction(program_id: &Pubkey, accounts: &TransactionAccounts, authority_index: u32) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.multisig, false),
            AccountMeta::new(accounts.transaction, false),
            AccountMeta::new(accounts.member, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: anchor_ix_data("create_transaction", &CreateTransactionArgs { authority_index }),
    }
}

pub fn add_instruction(
    program_id: &Pubkey,
    accounts: &TransactionAccounts,
    instruction: &Pubkey,
    incoming: &IncomingInstruction,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.multisig, false),
            AccountMeta::new(accounts.transaction, false),
            AccountMeta::new(*instruction, false),
            AccountMeta::new(accounts.member, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: anchor_ix_data("add_instruction", incoming),
    }
}

pub fn activate_transaction(program_id: &Pubkey, accounts: &TransactionAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.multisig, false),
            AccountMeta::new(accounts.transaction, false),
            AccountMeta::new(accounts.member, true),
        ],
        data: anchor_ix_data("activate_transaction", &NoArgs {}),
    }
}

pub fn approve_transaction(program_id: &Pubkey, accounts: &TransactionAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.multisig, false),
            AccountMeta::new(accounts.transaction, false),
            AccountMeta::new(accounts.member, true),
        ],
        data: anchor_ix_data("approve_transaction", &NoArgs {}),
    }
}

/// Execute the next pending instruction of an approved transaction
///
/// `inner` is the stored instruction; its program and accounts are passed as
/// remaining accounts with the vault's signer flag cleared.
pub fn execute_instruction(
    program_id: &Pubkey,
    accounts: &TransactionAccounts,
    instruction: &Pubkey,
    authority: &Pubkey,
    inner: &Instruction,
) -> Instruction {
    let mut metas = vec![
        AccountMeta::new(accounts.multisig, false),
        AccountMeta::new(accounts.transaction, false),
        AccountMeta::new(*instruction, false),
        AccountMeta::new(accounts.member, true),
        AccountMeta::new_readonly(inner.program_id, false),
    ];
    metas.extend(inner.accounts.iter().map(|meta| AccountMeta {
        pubkey: meta.pubkey,
        is_signer: meta.is_signer && meta.pubkey != *authority,
        is_writable: meta.is_writable,
    }));

    Instruction {
        program_id: *program_id,
        accounts: metas,
        data: anchor_ix_data("execute_instruction", &NoArgs {}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programs::anchor_discriminator;

    #[test]
    fn test_ms_transaction_decode() {
        let key = Pubkey::new_unique();
        let tx = MsTransaction {
            creator: Pubkey::new_unique(),
            ms: Pubkey::new_unique(),
            transaction_index: 5,
            authority_index: 1,
            authority_bump: 250,
            status: MsTransactionStatus::Active,
            instruction_index: 3,
            bump: 251,
            approved: vec![],
            rejected: vec![],
            cancelled: vec![],
            executed_index: 0,
        };
        let mut data = anchor_discriminator("account", "MsTransaction").to_vec();
        data.extend(borsh::to_vec(&tx).unwrap());
        data.extend_from_slice(&[0u8; 16]);

        assert_eq!(MsTransaction::decode(&key, &data).unwrap(), tx);
    }

    #[test]
    fn test_execute_instruction_clears_authority_signer() {
        let authority = Pubkey::new_unique();
        let other_signer = Pubkey::new_unique();
        let inner = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[],
            vec![AccountMeta::new(authority, true), AccountMeta::new(other_signer, true)],
        );
        let accounts = TransactionAccounts {
            multisig: Pubkey::new_unique(),
            transaction: Pubkey::new_unique(),
            member: Pubkey::new_unique(),
        };

        let ix = execute_instruction(&PROGRAM_ID, &accounts, &Pubkey::new_unique(), &authority, &inner);
        assert_eq!(ix.accounts.len(), 7);
        assert!(!ix.accounts[5].is_signer);
        assert!(ix.accounts[6].is_signer);
    }
}
