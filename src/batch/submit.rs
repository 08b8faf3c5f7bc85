//! Submit-and-confirm primitive
//!
//! Every on-chain step of every backend goes through [`TxSender::send_and_confirm`]:
//! 1. compute-budget directives are prepended (CU limit, priority fee)
//! 2. a fresh blockhash is fetched and the unit is signed
//! 3. oversized units are rejected locally with `Overflow`
//! 4. the signature is polled until the configured commitment
//!
//! Steps 2-4 run under [`retry_with_backoff`], so only transient failures are
//! retried.

use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0, AddressLookupTableAccount, VersionedMessage},
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::Signature,
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::errors::DispatchError;
use super::retry::{retry_with_backoff, RetryConfig};
use super::size::EXCEEDS_MAX_SIZE;
use crate::metrics::{DispatchMetrics, Timer};
use crate::rpc::{ConfirmStatus, Submitter};

/// Opaque signing capability; only the public key is ever inspected
pub type SharedSigner = Arc<dyn Signer + Send + Sync>;

/// Runtime compute-unit ceiling per transaction
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

/// Compute-unit limit requested for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeBudget {
    /// `per_instruction_compute_units` for each operation, capped at the runtime max
    Scaled,
    /// Fixed limit regardless of size
    Fixed(u32),
}

/// Priority fee policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFeeConfig {
    /// Use this price instead of asking the node
    #[serde(default)]
    pub fixed_micro_lamports: Option<u64>,
    #[serde(default = "default_min_fee")]
    pub min_micro_lamports: u64,
    #[serde(default = "default_max_fee")]
    pub max_micro_lamports: u64,
    #[serde(default = "default_per_instruction_cu")]
    pub per_instruction_compute_units: u32,
}

fn default_min_fee() -> u64 { 1 }
fn default_max_fee() -> u64 { 500_000 }
fn default_per_instruction_cu() -> u32 { 200_000 }

impl Default for PriorityFeeConfig {
    fn default() -> Self {
        Self {
            fixed_micro_lamports: None,
            min_micro_lamports: default_min_fee(),
            max_micro_lamports: default_max_fee(),
            per_instruction_compute_units: default_per_instruction_cu(),
        }
    }
}

impl PriorityFeeConfig {
    /// Median of `samples` clamped to `[min, max]`
    pub fn price_from_samples(&self, samples: &[u64]) -> u64 {
        if let Some(fixed) = self.fixed_micro_lamports {
            return fixed;
        }
        let mut sorted: Vec<u64> = samples.to_vec();
        sorted.sort_unstable();
        let median = sorted.get(sorted.len() / 2).copied().unwrap_or(0);
        median.clamp(self.min_micro_lamports, self.max_micro_lamports.max(self.min_micro_lamports))
    }

    pub fn compute_unit_limit(&self, budget: ComputeBudget, ops: usize) -> u32 {
        match budget {
            ComputeBudget::Fixed(limit) => limit.min(MAX_COMPUTE_UNITS),
            ComputeBudget::Scaled => self
                .per_instruction_compute_units
                .saturating_mul(ops.max(1) as u32)
                .min(MAX_COMPUTE_UNITS),
        }
    }
}

/// Submission settings
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    pub commitment: CommitmentConfig,
    pub retry: RetryConfig,
    pub fees: PriorityFeeConfig,
    /// Status polls before a confirmation is treated as timed out
    pub confirm_attempts: u32,
    pub confirm_interval: Duration,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            commitment: CommitmentConfig::confirmed(),
            retry: RetryConfig::default(),
            fees: PriorityFeeConfig::default(),
            confirm_attempts: 30,
            confirm_interval: Duration::from_millis(1000),
        }
    }
}

/// Signs, sends and confirms single units for one fee payer
#[derive(Clone)]
pub struct TxSender {
    chain: Arc<dyn Submitter>,
    payer: SharedSigner,
    config: SubmitConfig,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl std::fmt::Debug for TxSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxSender")
            .field("payer", &self.payer.pubkey())
            .field("config", &self.config)
            .finish()
    }
}

impl TxSender {
    pub fn new(chain: Arc<dyn Submitter>, payer: SharedSigner, config: SubmitConfig) -> Self {
        Self {
            chain,
            payer,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    pub fn chain(&self) -> &Arc<dyn Submitter> {
        &self.chain
    }

    pub fn config(&self) -> &SubmitConfig {
        &self.config
    }

    /// Send `ops` as one transaction and wait for confirmation
    ///
    /// `signers` may contain more keys than the unit needs; only required
    /// ones sign. The fee payer always signs.
    pub async fn send_and_confirm(
        &self,
        label: &str,
        ops: &[Instruction],
        signers: &[SharedSigner],
        lookup_tables: &[AddressLookupTableAccount],
        budget: ComputeBudget,
    ) -> Result<Signature, DispatchError> {
        let timer = Timer::new();
        let price = self.priority_fee(ops).await;
        let mut full = Vec::with_capacity(ops.len() + 2);
        full.push(ComputeBudgetInstruction::set_compute_unit_limit(
            self.config.fees.compute_unit_limit(budget, ops.len()),
        ));
        full.push(ComputeBudgetInstruction::set_compute_unit_price(price));
        full.extend_from_slice(ops);

        let result = retry_with_backoff(label, &self.config.retry, |attempt| {
            let full = &full;
            async move {
                if attempt > 0 {
                    if let Some(metrics) = &self.metrics {
                        metrics.submit_retries.inc();
                    }
                }
                let blockhash = self.chain.latest_blockhash().await?;
                let tx = self.sign(full, signers, lookup_tables, blockhash)?;
                let signature = self.chain.send(&tx).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.units_submitted.inc();
                }
                self.await_confirmation(&signature).await?;
                Ok(signature)
            }
        })
        .await;

        match &result {
            Ok(signature) => {
                debug!(step = label, signature = %signature, "Unit confirmed");
                if let Some(metrics) = &self.metrics {
                    metrics.units_confirmed.inc();
                    timer.observe_duration(&metrics.submit_latency);
                }
            }
            Err(err) => {
                warn!(step = label, category = err.category(), error = %err, "Unit failed");
                if let Some(metrics) = &self.metrics {
                    metrics.submit_failures.with_label_values(&[err.category()]).inc();
                }
            }
        }
        result
    }

    /// Compile and sign; rejects transactions over the packet limit
    pub fn sign(
        &self,
        ixs: &[Instruction],
        signers: &[SharedSigner],
        lookup_tables: &[AddressLookupTableAccount],
        blockhash: Hash,
    ) -> Result<VersionedTransaction, DispatchError> {
        let payer = self.payer.pubkey();
        let message = v0::Message::try_compile(&payer, ixs, lookup_tables, blockhash).map_err(|e| {
            debug!(error = %e, "Message compile failed");
            DispatchError::Overflow {
                size: EXCEEDS_MAX_SIZE,
                limit: PACKET_DATA_SIZE,
            }
        })?;

        let required = &message.account_keys[..message.header.num_required_signatures as usize];
        let mut signing: Vec<&dyn Signer> = Vec::with_capacity(required.len());
        for key in required {
            if *key == payer {
                signing.push(self.payer.as_ref());
                continue;
            }
            let signer = signers
                .iter()
                .find(|s| s.pubkey() == *key)
                .ok_or_else(|| DispatchError::config(format!("no signer supplied for {}", key)))?;
            signing.push(signer.as_ref());
        }

        let tx = VersionedTransaction::try_new(VersionedMessage::V0(message), &signing)
            .map_err(|e| DispatchError::config(format!("signing failed: {}", e)))?;

        let size = bincode::serialized_size(&tx)
            .ok()
            .and_then(|s| usize::try_from(s).ok())
            .unwrap_or(EXCEEDS_MAX_SIZE);
        if size > PACKET_DATA_SIZE {
            return Err(DispatchError::Overflow {
                size,
                limit: PACKET_DATA_SIZE,
            });
        }
        Ok(tx)
    }

    async fn priority_fee(&self, ops: &[Instruction]) -> u64 {
        let fees = &self.config.fees;
        if fees.fixed_micro_lamports.is_some() {
            return fees.price_from_samples(&[]);
        }

        let mut writable: Vec<Pubkey> = ops
            .iter()
            .flat_map(|ix| ix.accounts.iter())
            .filter(|meta| meta.is_writable)
            .map(|meta| meta.pubkey)
            .collect();
        writable.sort_unstable();
        writable.dedup();
        // getRecentPrioritizationFees accepts at most 128 accounts
        writable.truncate(128);

        match self.chain.recent_prioritization_fees(&writable).await {
            Ok(samples) => fees.price_from_samples(&samples),
            Err(e) => {
                warn!(error = %e, "Priority fee lookup failed, using minimum");
                fees.min_micro_lamports
            }
        }
    }

    async fn await_confirmation(&self, signature: &Signature) -> Result<(), DispatchError> {
        for _ in 0..self.config.confirm_attempts.max(1) {
            match self.chain.confirm(signature, self.config.commitment).await {
                Ok(ConfirmStatus::Confirmed) => return Ok(()),
                Ok(ConfirmStatus::Pending) => {}
                Err(e) if e.is_retryable() => {
                    debug!(signature = %signature, error = %e, "Status poll failed");
                }
                Err(e) => return Err(e),
            }
            sleep(self.config.confirm_interval).await;
        }
        Err(DispatchError::Transient(format!(
            "{} not confirmed after {} polls",
            signature, self.config.confirm_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_is_clamped_median() {
        let fees = PriorityFeeConfig {
            min_micro_lamports: 10,
            max_micro_lamports: 1000,
            ..PriorityFeeConfig::default()
        };
        assert_eq!(fees.price_from_samples(&[5, 300, 40, 2000, 90]), 90);
        assert_eq!(fees.price_from_samples(&[]), 10);
        assert_eq!(fees.price_from_samples(&[5000, 9000]), 1000);

        let fixed = PriorityFeeConfig {
            fixed_micro_lamports: Some(77),
            ..fees
        };
        assert_eq!(fixed.price_from_samples(&[5000]), 77);
    }

    #[test]
    fn test_compute_unit_limit() {
        let fees = PriorityFeeConfig::default();
        assert_eq!(fees.compute_unit_limit(ComputeBudget::Scaled, 3), 600_000);
        assert_eq!(fees.compute_unit_limit(ComputeBudget::Scaled, 0), 200_000);
        assert_eq!(fees.compute_unit_limit(ComputeBudget::Scaled, 20), MAX_COMPUTE_UNITS);
        assert_eq!(fees.compute_unit_limit(ComputeBudget::Fixed(250_000), 20), 250_000);
    }
}
