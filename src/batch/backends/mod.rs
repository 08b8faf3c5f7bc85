//! Execution backends
//!
//! Each backend drives one authority protocol on top of
//! [`TxSender::send_and_confirm`](crate::batch::submit::TxSender::send_and_confirm).
//! Steps whose on-chain order matters are awaited one by one; only
//! independent steps are fanned out through the limiter.

pub(crate) mod batch_multisig;
pub(crate) mod direct;
pub(crate) mod governance;
pub(crate) mod legacy_multisig;

pub use legacy_multisig::LegacyStep;

use serde::Serialize;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use super::errors::DispatchError;

/// Backend chosen for a batch, with the addresses it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Fee payer and explicit signers cover every signature
    Direct,
    /// Squads v3 multisig whose authority PDA signs
    LegacyMultisig { multisig: Pubkey, authority_index: u32 },
    /// Squads v4 multisig whose vault signs
    BatchMultisig { multisig: Pubkey, vault_index: u8 },
    /// SPL Governance whose native treasury signs
    Governance { governance: Pubkey },
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Direct => BackendKind::Direct,
            Self::LegacyMultisig { .. } => BackendKind::LegacyMultisig,
            Self::BatchMultisig { .. } => BackendKind::BatchMultisig,
            Self::Governance { .. } => BackendKind::Governance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Direct,
    LegacyMultisig,
    BatchMultisig,
    Governance,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::LegacyMultisig => "legacy_multisig",
            Self::BatchMultisig => "batch_multisig",
            Self::Governance => "governance",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit (or lifecycle step) that did not confirm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Position of the unit within the backend's submissions
    pub unit: usize,
    pub step: String,
    pub error: DispatchError,
}

/// Aggregate outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub backend: BackendKind,
    pub units_submitted: usize,
    pub units_confirmed: usize,
    /// Units never sent because an earlier ordered unit failed
    pub units_skipped: usize,
    pub failures: Vec<UnitFailure>,
    /// Buckets that could not be packed
    pub failed_buckets: Vec<usize>,
    /// Signatures of confirmed units, in submission order
    pub signatures: Vec<Signature>,
    /// Multisig transaction, batch or proposal the run created or resumed
    pub address: Option<Pubkey>,
}

impl DispatchResult {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            units_submitted: 0,
            units_confirmed: 0,
            units_skipped: 0,
            failures: Vec::new(),
            failed_buckets: Vec::new(),
            signatures: Vec::new(),
            address: None,
        }
    }

    /// Every unit was sent and confirmed and every bucket was packed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.failed_buckets.is_empty() && self.units_skipped == 0
    }

    pub fn last_signature(&self) -> Option<Signature> {
        self.signatures.last().copied()
    }

    /// Count one submission and its outcome; returns whether it confirmed
    pub(crate) fn record(&mut self, step: &str, outcome: Result<Signature, DispatchError>) -> bool {
        let unit = self.units_submitted;
        self.units_submitted += 1;
        match outcome {
            Ok(signature) => {
                self.units_confirmed += 1;
                self.signatures.push(signature);
                true
            }
            Err(error) => {
                self.failures.push(UnitFailure {
                    unit,
                    step: step.to_string(),
                    error,
                });
                false
            }
        }
    }
}
