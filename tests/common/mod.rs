//! Shared fixtures for integration tests

#![allow(dead_code)]

use batch_dispatch::programs::{governance, squads_v3, squads_v4};
use batch_dispatch::test_utils::{anchor_account, MockChain};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Keypair,
};
use std::sync::Arc;

pub fn payer() -> Arc<Keypair> {
    Arc::new(Keypair::new())
}

/// Operation that `signer` must sign, carrying `data_len` bytes
pub fn op_signed_by(signer: &Pubkey, data_len: usize) -> Instruction {
    Instruction {
        program_id: Pubkey::new_unique(),
        accounts: vec![
            AccountMeta::new(*signer, true),
            AccountMeta::new(Pubkey::new_unique(), false),
        ],
        data: vec![7u8; data_len],
    }
}

/// Squads v3 multisig whose only member is `member`
pub fn install_v3_multisig(chain: &MockChain, member: &Pubkey, transaction_index: u32, threshold: u16) -> Pubkey {
    let multisig = Pubkey::new_unique();
    let ms = squads_v3::Ms {
        threshold,
        authority_index: 1,
        transaction_index,
        ms_change_index: 0,
        bump: 255,
        create_key: Pubkey::new_unique(),
        allow_external_execute: false,
        keys: vec![*member],
    };
    chain.set_account(multisig, squads_v3::PROGRAM_ID, anchor_account("Ms", &ms));
    multisig
}

/// Squads v4 multisig whose only member is `member`
pub fn install_v4_multisig(chain: &MockChain, member: &Pubkey, transaction_index: u64) -> Pubkey {
    let multisig = Pubkey::new_unique();
    let ms = squads_v4::Multisig {
        create_key: Pubkey::new_unique(),
        config_authority: Pubkey::default(),
        threshold: 1,
        time_lock: 0,
        transaction_index,
        stale_transaction_index: 0,
        rent_collector: None,
        bump: 255,
        members: vec![squads_v4::Member {
            key: *member,
            permissions: 7,
        }],
    };
    chain.set_account(multisig, squads_v4::PROGRAM_ID, anchor_account("Multisig", &ms));
    multisig
}

/// Governance account of `realm`
pub fn install_governance(chain: &MockChain, realm: &Pubkey) -> Pubkey {
    let governance_account = Pubkey::new_unique();
    let mut data = vec![18u8];
    data.extend_from_slice(realm.as_ref());
    data.extend_from_slice(&[0u8; 96]);
    chain.set_account(governance_account, governance::PROGRAM_ID, data);
    governance_account
}

/// Proposal account bytes in `state`
pub fn proposal_data(governance_account: &Pubkey, mint: &Pubkey, state: u8) -> Vec<u8> {
    let mut data = vec![14u8];
    data.extend_from_slice(governance_account.as_ref());
    data.extend_from_slice(mint.as_ref());
    data.push(state);
    data.extend_from_slice(&[0u8; 64]);
    data
}

/// Token owner record bytes holding `amount` deposited governing tokens
pub fn token_owner_record_data(realm: &Pubkey, mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let mut data = vec![2u8];
    data.extend_from_slice(realm.as_ref());
    data.extend_from_slice(mint.as_ref());
    data.extend_from_slice(owner.as_ref());
    data.extend_from_slice(&amount.to_le_bytes());
    data.extend_from_slice(&[0u8; 16]);
    data
}
