//! SPL Governance bindings
//!
//! Instructions are borsh encoded with a leading u8 variant tag. Only the
//! variants the proposal backend issues are bound here.

use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program, sysvar,
};

use crate::batch::errors::DispatchError;

pub const PROGRAM_ID: Pubkey = pubkey!("GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw");

const SEED_GOVERNANCE: &[u8] = b"governance";

const IX_DEPOSIT_GOVERNING_TOKENS: u8 = 1;
const IX_WITHDRAW_GOVERNING_TOKENS: u8 = 2;
const IX_CREATE_PROPOSAL: u8 = 6;
const IX_ADD_SIGNATORY: u8 = 7;
const IX_INSERT_TRANSACTION: u8 = 9;
const IX_SIGN_OFF_PROPOSAL: u8 = 12;
const IX_CAST_VOTE: u8 = 13;
const IX_RELINQUISH_VOTE: u8 = 15;
const IX_EXECUTE_TRANSACTION: u8 = 16;
const IX_CREATE_TOKEN_OWNER_RECORD: u8 = 23;

pub fn token_owner_record_pda(program_id: &Pubkey, realm: &Pubkey, mint: &Pubkey, owner: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_GOVERNANCE, realm.as_ref(), mint.as_ref(), owner.as_ref()],
        program_id,
    )
    .0
}

pub fn governing_token_holding_pda(program_id: &Pubkey, realm: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[SEED_GOVERNANCE, realm.as_ref(), mint.as_ref()], program_id).0
}

pub fn realm_config_pda(program_id: &Pubkey, realm: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"realm-config", realm.as_ref()], program_id).0
}

pub fn proposal_pda(program_id: &Pubkey, governance: &Pubkey, mint: &Pubkey, seed: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_GOVERNANCE, governance.as_ref(), mint.as_ref(), seed.as_ref()],
        program_id,
    )
    .0
}

pub fn signatory_record_pda(program_id: &Pubkey, proposal: &Pubkey, signatory: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[SEED_GOVERNANCE, proposal.as_ref(), signatory.as_ref()], program_id).0
}

pub fn proposal_transaction_pda(program_id: &Pubkey, proposal: &Pubkey, option_index: u8, index: u16) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_GOVERNANCE, proposal.as_ref(), &[option_index], &index.to_le_bytes()],
        program_id,
    )
    .0
}

pub fn vote_record_pda(program_id: &Pubkey, proposal: &Pubkey, token_owner_record: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[SEED_GOVERNANCE, proposal.as_ref(), token_owner_record.as_ref()],
        program_id,
    )
    .0
}

/// Treasury PDA that signs for the governance
pub fn native_treasury_pda(program_id: &Pubkey, governance: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[b"native-treasury", governance.as_ref()], program_id).0
}

// ============================================================================
// ACCOUNT STATE
// ============================================================================

/// Proposal lifecycle as stored on-chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    Draft,
    SigningOff,
    Voting,
    Succeeded,
    Executing,
    Completed,
    Cancelled,
    Defeated,
    ExecutingWithErrors,
    Vetoed,
}

impl ProposalState {
    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Draft,
            1 => Self::SigningOff,
            2 => Self::Voting,
            3 => Self::Succeeded,
            4 => Self::Executing,
            5 => Self::Completed,
            6 => Self::Cancelled,
            7 => Self::Defeated,
            8 => Self::ExecutingWithErrors,
            9 => Self::Vetoed,
            _ => return None,
        })
    }

    /// Transactions can be executed from this state
    pub fn is_executable(self) -> bool {
        matches!(self, Self::Succeeded | Self::Executing | Self::ExecutingWithErrors)
    }

    /// The proposal can never become executable
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Cancelled | Self::Defeated | Self::Vetoed)
    }
}

/// Realm a governance account belongs to
pub fn governance_realm(account: &Pubkey, data: &[u8]) -> Result<Pubkey, DispatchError> {
    read_pubkey(account, data, 1)
}

pub fn proposal_state(account: &Pubkey, data: &[u8]) -> Result<ProposalState, DispatchError> {
    // account_type, governance, governing_token_mint, state
    let tag = *data
        .get(65)
        .ok_or_else(|| DispatchError::invalid_account(*account, "proposal account too short"))?;
    ProposalState::from_tag(tag)
        .ok_or_else(|| DispatchError::invalid_account(*account, format!("unknown proposal state {}", tag)))
}

/// Governing tokens the owner has deposited into a token owner record
pub fn token_owner_deposit(account: &Pubkey, data: &[u8]) -> Result<u64, DispatchError> {
    // account_type, realm, governing_token_mint, governing_token_owner, amount
    let bytes: [u8; 8] = data
        .get(97..105)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DispatchError::invalid_account(*account, "token owner record too short"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_pubkey(account: &Pubkey, data: &[u8], offset: usize) -> Result<Pubkey, DispatchError> {
    let bytes: [u8; 32] = data
        .get(offset..offset + 32)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| DispatchError::invalid_account(*account, "account too short"))?;
    Ok(Pubkey::new_from_array(bytes))
}

// ============================================================================
// INSTRUCTIONS
// ============================================================================

#[derive(BorshSerialize)]
struct AccountMetaData {
    pubkey: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

/// Instruction stored inside a proposal transaction
#[derive(BorshSerialize)]
struct InstructionData {
    program_id: Pubkey,
    accounts: Vec<AccountMetaData>,
    data: Vec<u8>,
}

impl From<&Instruction> for InstructionData {
    fn from(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id,
            accounts: ix
                .accounts
                .iter()
                .map(|meta| AccountMetaData {
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
enum VoteType {
    SingleChoice,
}

#[derive(BorshSerialize)]
struct VoteChoice {
    rank: u8,
    weight_percentage: u8,
}

#[derive(BorshSerialize)]
enum Vote {
    Approve(Vec<VoteChoice>),
}

#[derive(BorshSerialize)]
struct CreateProposalArgs {
    name: String,
    description_link: String,
    vote_type: VoteType,
    options: Vec<String>,
    use_deny_option: bool,
    proposal_seed: Pubkey,
}

#[derive(BorshSerialize)]
struct InsertTransactionArgs {
    option_index: u8,
    index: u16,
    hold_up_time: u32,
    instructions: Vec<InstructionData>,
}

fn ix_data<A: BorshSerialize>(tag: u8, args: &A) -> Vec<u8> {
    let mut data = vec![tag];
    // Writing into a Vec cannot fail
    args.serialize(&mut data).unwrap_or_default();
    data
}

/// Addresses every governance instruction of one proposal flow shares
#[derive(Debug, Clone, Copy)]
pub struct ProposalAccounts {
    pub realm: Pubkey,
    pub governance: Pubkey,
    pub governing_token_mint: Pubkey,
    pub proposal: Pubkey,
    pub token_owner_record: Pubkey,
    /// Token owner, governance authority and signatory
    pub owner: Pubkey,
    pub payer: Pubkey,
}

pub fn create_token_owner_record(program_id: &Pubkey, accounts: &ProposalAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new_readonly(accounts.owner, false),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new_readonly(accounts.governing_token_mint, false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: vec![IX_CREATE_TOKEN_OWNER_RECORD],
    }
}

pub fn deposit_governing_tokens(
    program_id: &Pubkey,
    accounts: &ProposalAccounts,
    source: &Pubkey,
    amount: u64,
) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new(
                governing_token_holding_pda(program_id, &accounts.realm, &accounts.governing_token_mint),
                false,
            ),
            AccountMeta::new(*source, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(realm_config_pda(program_id, &accounts.realm), false),
        ],
        data: ix_data(IX_DEPOSIT_GOVERNING_TOKENS, &amount),
    }
}

pub fn withdraw_governing_tokens(program_id: &Pubkey, accounts: &ProposalAccounts, destination: &Pubkey) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new(
                governing_token_holding_pda(program_id, &accounts.realm, &accounts.governing_token_mint),
                false,
            ),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(realm_config_pda(program_id, &accounts.realm), false),
        ],
        data: vec![IX_WITHDRAW_GOVERNING_TOKENS],
    }
}

pub fn create_proposal(
    program_id: &Pubkey,
    accounts: &ProposalAccounts,
    name: &str,
    description_link: &str,
    proposal_seed: &Pubkey,
) -> Instruction {
    let args = CreateProposalArgs {
        name: name.to_string(),
        description_link: description_link.to_string(),
        vote_type: VoteType::SingleChoice,
        options: vec!["Approve".to_string()],
        use_deny_option: true,
        proposal_seed: *proposal_seed,
    };
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new(accounts.governance, false),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new_readonly(accounts.governing_token_mint, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(realm_config_pda(program_id, &accounts.realm), false),
        ],
        data: ix_data(IX_CREATE_PROPOSAL, &args),
    }
}

pub fn add_signatory(program_id: &Pubkey, accounts: &ProposalAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new_readonly(accounts.token_owner_record, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(signatory_record_pda(program_id, &accounts.proposal, &accounts.owner), false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data: ix_data(IX_ADD_SIGNATORY, &accounts.owner),
    }
}

/// Insert `ix` as the proposal transaction at `index` of option 0
pub fn insert_transaction(program_id: &Pubkey, accounts: &ProposalAccounts, index: u16, ix: &Instruction) -> Instruction {
    let args = InsertTransactionArgs {
        option_index: 0,
        index,
        hold_up_time: 0,
        instructions: vec![InstructionData::from(ix)],
    };
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.governance, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new_readonly(accounts.token_owner_record, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(proposal_transaction_pda(program_id, &accounts.proposal, 0, index), false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data: ix_data(IX_INSERT_TRANSACTION, &args),
    }
}

pub fn sign_off_proposal(program_id: &Pubkey, accounts: &ProposalAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new_readonly(accounts.governance, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(signatory_record_pda(program_id, &accounts.proposal, &accounts.owner), false),
        ],
        data: vec![IX_SIGN_OFF_PROPOSAL],
    }
}

pub fn cast_approve_vote(program_id: &Pubkey, accounts: &ProposalAccounts) -> Instruction {
    let vote = Vote::Approve(vec![VoteChoice {
        rank: 0,
        weight_percentage: 100,
    }]);
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new(accounts.governance, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(vote_record_pda(program_id, &accounts.proposal, &accounts.token_owner_record), false),
            AccountMeta::new_readonly(accounts.governing_token_mint, false),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(realm_config_pda(program_id, &accounts.realm), false),
        ],
        data: ix_data(IX_CAST_VOTE, &vote),
    }
}

pub fn relinquish_vote(program_id: &Pubkey, accounts: &ProposalAccounts) -> Instruction {
    Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(accounts.realm, false),
            AccountMeta::new_readonly(accounts.governance, false),
            AccountMeta::new(accounts.proposal, false),
            AccountMeta::new(accounts.token_owner_record, false),
            AccountMeta::new(vote_record_pda(program_id, &accounts.proposal, &accounts.token_owner_record), false),
            AccountMeta::new_readonly(accounts.governing_token_mint, false),
            AccountMeta::new_readonly(accounts.owner, true),
            AccountMeta::new(accounts.payer, false),
        ],
        data: vec![IX_RELINQUISH_VOTE],
    }
}

/// Execute proposal transaction `index`; `inner` supplies the remaining accounts
pub fn execute_transaction(
    program_id: &Pubkey,
    accounts: &ProposalAccounts,
    index: u16,
    treasury: &Pubkey,
    inner: &Instruction,
) -> Instruction {
    let mut metas = vec![
        AccountMeta::new_readonly(accounts.governance, false),
        AccountMeta::new(accounts.proposal, false),
        AccountMeta::new(proposal_transaction_pda(program_id, &accounts.proposal, 0, index), false),
        AccountMeta::new_readonly(inner.program_id, false),
    ];
    metas.extend(inner.accounts.iter().map(|meta| AccountMeta {
        pubkey: meta.pubkey,
        is_signer: meta.is_signer && meta.pubkey != *treasury,
        is_writable: meta.is_writable,
    }));

    Instruction {
        program_id: *program_id,
        accounts: metas,
        data: vec![IX_EXECUTE_TRANSACTION],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_state_decode() {
        let key = Pubkey::new_unique();
        let mut data = vec![0u8; 80];
        data[65] = 3;
        assert_eq!(proposal_state(&key, &data).unwrap(), ProposalState::Succeeded);
        assert!(ProposalState::Succeeded.is_executable());

        data[65] = 42;
        assert!(proposal_state(&key, &data).is_err());
        assert!(proposal_state(&key, &data[..10]).is_err());
    }

    #[test]
    fn test_governance_realm_decode() {
        let key = Pubkey::new_unique();
        let realm = Pubkey::new_unique();
        let mut data = vec![18u8];
        data.extend_from_slice(realm.as_ref());
        data.extend_from_slice(&[0u8; 40]);
        assert_eq!(governance_realm(&key, &data).unwrap(), realm);
    }

    #[test]
    fn test_token_owner_deposit_decode() {
        let key = Pubkey::new_unique();
        let mut data = vec![2u8];
        data.extend_from_slice(&[0u8; 96]);
        data.extend_from_slice(&500u64.to_le_bytes());
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(token_owner_deposit(&key, &data).unwrap(), 500);
        assert!(token_owner_deposit(&key, &data[..100]).is_err());
    }

    #[test]
    fn test_insert_transaction_encoding() {
        let accounts = ProposalAccounts {
            realm: Pubkey::new_unique(),
            governance: Pubkey::new_unique(),
            governing_token_mint: Pubkey::new_unique(),
            proposal: Pubkey::new_unique(),
            token_owner_record: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            payer: Pubkey::new_unique(),
        };
        let inner = Instruction::new_with_bytes(Pubkey::new_unique(), &[7, 7], vec![]);
        let ix = insert_transaction(&PROGRAM_ID, &accounts, 3, &inner);

        // tag, option_index, index u16, hold_up_time u32, vec len u32
        assert_eq!(&ix.data[..12], &[IX_INSERT_TRANSACTION, 0, 3, 0, 0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(&ix.data[12..44], inner.program_id.as_ref());
    }
}
