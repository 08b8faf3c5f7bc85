//! `solana-client` backed implementation of the RPC collaborators

use async_trait::async_trait;
use futures::Future;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{classify_client_error, AccountReader, ConfirmStatus, Submitter};
use crate::batch::errors::DispatchError;

/// Most keys a node accepts in one `getMultipleAccounts` call
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// Fetch `keys` in consecutive chunks of at most `chunk`, keeping key order
pub async fn fetch_in_chunks<F, Fut>(keys: &[Pubkey], chunk: usize, mut fetch: F) -> Result<Vec<Option<Account>>, DispatchError>
where
    F: FnMut(Vec<Pubkey>) -> Fut,
    Fut: Future<Output = Result<Vec<Option<Account>>, DispatchError>>,
{
    let mut accounts = Vec::with_capacity(keys.len());
    for part in keys.chunks(chunk.max(1)) {
        let fetched = fetch(part.to_vec()).await?;
        if fetched.len() != part.len() {
            return Err(DispatchError::Transient(format!(
                "requested {} accounts, node returned {}",
                part.len(),
                fetched.len()
            )));
        }
        accounts.extend(fetched);
    }
    Ok(accounts)
}

/// Chain access over a single JSON-RPC endpoint
#[derive(Clone)]
pub struct RpcChain {
    client: Arc<RpcClient>,
    commitment: CommitmentConfig,
}

impl std::fmt::Debug for RpcChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChain")
            .field("url", &self.client.url())
            .field("commitment", &self.commitment.commitment)
            .finish()
    }
}

impl RpcChain {
    pub fn new(url: impl Into<String>, commitment: CommitmentConfig, timeout: Duration) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(url.into(), timeout, commitment)),
            commitment,
        }
    }

    pub fn from_client(client: Arc<RpcClient>) -> Self {
        let commitment = client.commitment();
        Self { client, commitment }
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }
}

#[async_trait]
impl AccountReader for RpcChain {
    async fn get_account(&self, key: &Pubkey) -> Result<Option<Account>, DispatchError> {
        self.client
            .get_account_with_commitment(key, self.commitment)
            .await
            .map(|response| response.value)
            .map_err(|e| classify_client_error(&e))
    }

    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>, DispatchError> {
        fetch_in_chunks(keys, MAX_MULTIPLE_ACCOUNTS, |part| async move {
            self.client
                .get_multiple_accounts_with_commitment(&part, self.commitment)
                .await
                .map(|response| response.value)
                .map_err(|e| classify_client_error(&e))
        })
        .await
    }
}

#[async_trait]
impl Submitter for RpcChain {
    async fn latest_blockhash(&self) -> Result<Hash, DispatchError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| classify_client_error(&e))
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, DispatchError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: Some(0),
            ..RpcSendTransactionConfig::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(tx, config)
            .await
            .map_err(|e| classify_client_error(&e))?;
        debug!(signature = %signature, "Transaction sent");
        Ok(signature)
    }

    async fn confirm(&self, signature: &Signature, commitment: CommitmentConfig) -> Result<ConfirmStatus, DispatchError> {
        let status = self
            .client
            .get_signature_status_with_commitment(signature, commitment)
            .await
            .map_err(|e| classify_client_error(&e))?;

        match status {
            None => Ok(ConfirmStatus::Pending),
            Some(Ok(())) => Ok(ConfirmStatus::Confirmed),
            Some(Err(tx_err)) => Err(DispatchError::Deterministic(format!("{} failed: {}", signature, tx_err))),
        }
    }

    async fn recent_prioritization_fees(&self, accounts: &[Pubkey]) -> Result<Vec<u64>, DispatchError> {
        let fees = self
            .client
            .get_recent_prioritization_fees(accounts)
            .await
            .map_err(|e| classify_client_error(&e))?;
        Ok(fees.into_iter().map(|fee| fee.prioritization_fee).collect())
    }

    async fn slot(&self) -> Result<u64, DispatchError> {
        self.client
            .get_slot_with_commitment(self.commitment)
            .await
            .map_err(|e| classify_client_error(&e))
    }
}
