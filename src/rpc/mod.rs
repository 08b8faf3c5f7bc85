//! RPC collaborators consumed by the dispatch engine
//!
//! The engine only talks to the chain through these traits, so backends can
//! be driven against [`RpcChain`] in production and an in-memory chain in
//! tests.

use async_trait::async_trait;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, message::AddressLookupTableAccount,
    pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction,
};

use crate::batch::errors::DispatchError;

pub mod rpc_client;
pub mod rpc_errors;

pub use rpc_client::RpcChain;
pub use rpc_errors::classify_client_error;

/// Reads account state
#[async_trait]
pub trait AccountReader: Send + Sync {
    async fn get_account(&self, key: &Pubkey) -> Result<Option<Account>, DispatchError>;

    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>, DispatchError>;
}

/// Where a submitted signature stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmStatus {
    /// Not yet at the requested commitment
    Pending,
    Confirmed,
}

/// Sends transactions and reports their status
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn latest_blockhash(&self) -> Result<Hash, DispatchError>;

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, DispatchError>;

    /// Check a signature once; a failed transaction is `Err(Deterministic)`
    async fn confirm(&self, signature: &Signature, commitment: CommitmentConfig) -> Result<ConfirmStatus, DispatchError>;

    /// Recent per-slot prioritization fees (micro-lamports per CU) for `accounts`
    async fn recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>, DispatchError>;

    async fn slot(&self) -> Result<u64, DispatchError>;
}

/// Short-lived address lookup tables
#[async_trait]
pub trait LookupTableService: Send + Sync {
    /// Create an empty table owned by `authority`
    async fn create(&self, authority: &Pubkey) -> Result<Pubkey, DispatchError>;

    async fn extend(&self, table: &Pubkey, addresses: &[Pubkey]) -> Result<(), DispatchError>;

    /// Wait until the table holds `expected` addresses and can be used
    async fn wait_until_active(&self, table: &Pubkey, expected: usize) -> Result<AddressLookupTableAccount, DispatchError>;

    /// Start reclaiming the table
    async fn close(&self, table: &Pubkey) -> Result<(), DispatchError>;
}
