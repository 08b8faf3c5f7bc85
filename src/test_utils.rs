//! Test Utilities Module
//!
//! In-memory chain used to drive the dispatcher and its backends without a
//! validator. It serves accounts, records every transaction it is sent and
//! can be told to fail specific submissions.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use borsh::BorshSerialize;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    compute_budget,
    hash::Hash,
    message::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    transaction::VersionedTransaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::batch::errors::DispatchError;
use crate::batch::router::{DispatchSettings, Dispatcher};
use crate::batch::retry::RetryConfig;
use crate::batch::submit::{PriorityFeeConfig, SharedSigner, SubmitConfig, TxSender};
use crate::programs::anchor_discriminator;
use crate::rpc::{AccountReader, ConfirmStatus, LookupTableService, Submitter};

/// Number of calls made to each collaborator method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_account: usize,
    pub get_multiple_accounts: usize,
    pub latest_blockhash: usize,
    pub send: usize,
    pub confirm: usize,
    pub lut_create: usize,
    pub lut_extend: usize,
    pub lut_close: usize,
}

impl CallCounts {
    /// Calls that read chain state
    pub fn lookups(&self) -> usize {
        self.get_account + self.get_multiple_accounts
    }
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<Pubkey, Account>,
    /// Accounts that appear once this many sends have been accepted
    scheduled: Vec<(usize, Pubkey, Account)>,
    /// Successive states of an account, one taken per `get_account`
    queued: HashMap<Pubkey, VecDeque<Account>>,
    sent: Vec<VersionedTransaction>,
    accepted: usize,
    send_failures: HashMap<usize, DispatchError>,
    blockhash_failures: VecDeque<DispatchError>,
    pending_polls: u32,
    polls: HashMap<Signature, u32>,
    fees: Vec<u64>,
    slot: u64,
    tables: HashMap<Pubkey, Vec<Pubkey>>,
    closed_tables: Vec<Pubkey>,
    calls: CallCounts,
}

/// In-memory chain implementing every RPC collaborator
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_account(&self, key: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.state().accounts.insert(key, account(owner, data));
    }

    pub fn remove_account(&self, key: &Pubkey) {
        self.state().accounts.remove(key);
    }

    /// Make `key` visible once `after_sends` transactions have been accepted
    pub fn schedule_account(&self, after_sends: usize, key: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.state().scheduled.push((after_sends, key, account(owner, data)));
    }

    /// Serve `states` of `key` in order, one per `get_account`; the last stays
    pub fn queue_account_states(&self, key: Pubkey, owner: Pubkey, states: Vec<Vec<u8>>) {
        self.state()
            .queued
            .entry(key)
            .or_default()
            .extend(states.into_iter().map(|data| account(owner, data)));
    }

    /// Fail the send attempt with this 0-based position
    pub fn fail_send_at(&self, attempt: usize, error: DispatchError) {
        self.state().send_failures.insert(attempt, error);
    }

    /// Fail the next blockhash fetches, in order
    pub fn fail_blockhash(&self, errors: impl IntoIterator<Item = DispatchError>) {
        self.state().blockhash_failures.extend(errors);
    }

    /// Report `Pending` this many times before a signature confirms
    pub fn set_pending_polls(&self, polls: u32) {
        self.state().pending_polls = polls;
    }

    pub fn set_prioritization_fees(&self, fees: Vec<u64>) {
        self.state().fees = fees;
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls.clone()
    }

    /// Transactions accepted so far, in order
    pub fn sent(&self) -> Vec<VersionedTransaction> {
        self.state().sent.clone()
    }

    /// Programs invoked by each accepted transaction, compute budget excluded
    pub fn sent_programs(&self) -> Vec<Vec<Pubkey>> {
        self.state()
            .sent
            .iter()
            .map(|tx| {
                let keys = tx.message.static_account_keys();
                tx.message
                    .instructions()
                    .iter()
                    .filter_map(|ix| keys.get(ix.program_id_index as usize).copied())
                    .filter(|program| *program != compute_budget::id())
                    .collect()
            })
            .collect()
    }

    /// Instruction data of each accepted transaction, compute budget excluded
    pub fn sent_instruction_data(&self) -> Vec<Vec<Vec<u8>>> {
        self.state()
            .sent
            .iter()
            .map(|tx| {
                let keys = tx.message.static_account_keys();
                tx.message
                    .instructions()
                    .iter()
                    .filter(|ix| keys.get(ix.program_id_index as usize) != Some(&compute_budget::id()))
                    .map(|ix| ix.data.clone())
                    .collect()
            })
            .collect()
    }

    pub fn closed_tables(&self) -> Vec<Pubkey> {
        self.state().closed_tables.clone()
    }
}

fn account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 1_000_000_000,
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

#[async_trait]
impl AccountReader for MockChain {
    async fn get_account(&self, key: &Pubkey) -> Result<Option<Account>, DispatchError> {
        let mut state = self.state();
        state.calls.get_account += 1;
        if let Some(next) = state.queued.get_mut(key).and_then(|queue| queue.pop_front()) {
            state.accounts.insert(*key, next);
        }
        Ok(state.accounts.get(key).cloned())
    }

    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>, DispatchError> {
        let mut state = self.state();
        state.calls.get_multiple_accounts += 1;
        Ok(keys.iter().map(|key| state.accounts.get(key).cloned()).collect())
    }
}

#[async_trait]
impl Submitter for MockChain {
    async fn latest_blockhash(&self) -> Result<Hash, DispatchError> {
        let mut state = self.state();
        state.calls.latest_blockhash += 1;
        match state.blockhash_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(Hash::new_unique()),
        }
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, DispatchError> {
        let mut state = self.state();
        let attempt = state.calls.send;
        state.calls.send += 1;
        if let Some(error) = state.send_failures.remove(&attempt) {
            return Err(error);
        }

        state.sent.push(tx.clone());
        state.accepted += 1;
        let accepted = state.accepted;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.scheduled)
            .into_iter()
            .partition(|(after, _, _)| *after <= accepted);
        state.scheduled = waiting;
        for (_, key, account) in ready {
            state.accounts.insert(key, account);
        }
        state.slot += 1;

        Ok(tx.signatures.first().copied().unwrap_or_default())
    }

    async fn confirm(&self, signature: &Signature, _commitment: CommitmentConfig) -> Result<ConfirmStatus, DispatchError> {
        let mut state = self.state();
        state.calls.confirm += 1;
        let pending_polls = state.pending_polls;
        let polls = state.polls.entry(*signature).or_insert(0);
        *polls += 1;
        if *polls > pending_polls {
            Ok(ConfirmStatus::Confirmed)
        } else {
            Ok(ConfirmStatus::Pending)
        }
    }

    async fn recent_prioritization_fees(&self, _accounts: &[Pubkey]) -> Result<Vec<u64>, DispatchError> {
        Ok(self.state().fees.clone())
    }

    async fn slot(&self) -> Result<u64, DispatchError> {
        Ok(self.state().slot)
    }
}

#[async_trait]
impl LookupTableService for MockChain {
    async fn create(&self, _authority: &Pubkey) -> Result<Pubkey, DispatchError> {
        let mut state = self.state();
        state.calls.lut_create += 1;
        let table = Pubkey::new_unique();
        state.tables.insert(table, Vec::new());
        Ok(table)
    }

    async fn extend(&self, table: &Pubkey, addresses: &[Pubkey]) -> Result<(), DispatchError> {
        let mut state = self.state();
        state.calls.lut_extend += 1;
        state
            .tables
            .get_mut(table)
            .ok_or_else(|| DispatchError::invalid_account(*table, "unknown lookup table"))?
            .extend_from_slice(addresses);
        Ok(())
    }

    async fn wait_until_active(&self, table: &Pubkey, expected: usize) -> Result<AddressLookupTableAccount, DispatchError> {
        let state = self.state();
        let addresses = state
            .tables
            .get(table)
            .ok_or_else(|| DispatchError::invalid_account(*table, "unknown lookup table"))?;
        if addresses.len() < expected {
            return Err(DispatchError::Transient(format!("lookup table {} incomplete", table)));
        }
        Ok(AddressLookupTableAccount {
            key: *table,
            addresses: addresses.clone(),
        })
    }

    async fn close(&self, table: &Pubkey) -> Result<(), DispatchError> {
        let mut state = self.state();
        state.calls.lut_close += 1;
        state.tables.remove(table);
        state.closed_tables.push(*table);
        Ok(())
    }
}

/// Anchor account bytes: discriminator followed by the borsh body
pub fn anchor_account<T: BorshSerialize>(name: &str, value: &T) -> Vec<u8> {
    let mut data = anchor_discriminator("account", name).to_vec();
    // Writing into a Vec cannot fail
    value.serialize(&mut data).unwrap_or_default();
    data
}

/// Submission settings that never wait on real time
pub fn fast_submit_config() -> SubmitConfig {
    SubmitConfig {
        retry: RetryConfig::deterministic(3, 1, 4),
        fees: PriorityFeeConfig {
            fixed_micro_lamports: Some(1_000),
            ..PriorityFeeConfig::default()
        },
        confirm_attempts: 3,
        confirm_interval: std::time::Duration::from_millis(1),
        ..SubmitConfig::default()
    }
}

/// Dispatcher wired entirely to `chain`, paying with `payer`
pub fn mock_dispatcher(chain: &Arc<MockChain>, payer: &Arc<Keypair>, settings: DispatchSettings) -> Dispatcher {
    let signer: SharedSigner = payer.clone();
    let sender = TxSender::new(chain.clone(), signer, fast_submit_config());
    Dispatcher::new(chain.clone(), sender, chain.clone(), settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scheduled_accounts_appear_after_sends() {
        let chain = MockChain::new();
        let key = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        chain.schedule_account(1, key, owner, vec![1, 2, 3]);

        assert!(chain.get_account(&key).await.unwrap().is_none());
        chain.send(&VersionedTransaction::default()).await.unwrap();
        assert_eq!(chain.get_account(&key).await.unwrap().unwrap().data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_queued_states_advance_per_read() {
        let chain = MockChain::new();
        let key = Pubkey::new_unique();
        chain.queue_account_states(key, Pubkey::new_unique(), vec![vec![1], vec![2]]);

        assert_eq!(chain.get_account(&key).await.unwrap().unwrap().data, vec![1]);
        assert_eq!(chain.get_account(&key).await.unwrap().unwrap().data, vec![2]);
        assert_eq!(chain.get_account(&key).await.unwrap().unwrap().data, vec![2]);
    }

    #[tokio::test]
    async fn test_injected_send_failure_is_consumed() {
        let chain = MockChain::new();
        chain.fail_send_at(0, DispatchError::Transient("down".to_string()));

        assert!(chain.send(&VersionedTransaction::default()).await.is_err());
        assert!(chain.send(&VersionedTransaction::default()).await.is_ok());
        assert_eq!(chain.calls().send, 2);
        assert_eq!(chain.sent().len(), 1);
    }
}
