//! Dispatch router
//!
//! Picks the backend for a batch from the signatures its operations require:
//! - none beyond the payer and explicit signers → direct send
//! - exactly one → the program owning the authority account decides
//! - more than one → rejected before any RPC call

use serde::{Deserialize, Serialize};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signer::Signer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};

use super::backends::{self, Backend, DispatchResult};
use super::errors::DispatchError;
use super::limiter::{ConcurrencyLimiter, DEFAULT_MAX_CONCURRENCY};
use super::signers::missing_signers;
use super::size::DEFAULT_UNIT_CEILING;
use super::submit::{SharedSigner, TxSender};
use crate::metrics::DispatchMetrics;
use crate::observability::CorrelationId;
use crate::programs::{governance, squads_v3, squads_v4};
use crate::rpc::{AccountReader, LookupTableService};

/// Program ids the router recognises as authority owners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityPrograms {
    pub squads_v3: Pubkey,
    pub squads_v4: Pubkey,
    pub governance: Pubkey,
}

impl Default for AuthorityPrograms {
    fn default() -> Self {
        Self {
            squads_v3: squads_v3::PROGRAM_ID,
            squads_v4: squads_v4::PROGRAM_ID,
            governance: governance::PROGRAM_ID,
        }
    }
}

/// Proposal parameters for the governance backend
#[derive(Debug, Clone)]
pub struct GovernanceSettings {
    /// Required for governance dispatches
    pub governing_token_mint: Option<Pubkey>,
    pub proposal_name: String,
    pub description_link: String,
    pub execution_poll_attempts: u32,
    pub execution_poll_interval: Duration,
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            governing_token_mint: None,
            proposal_name: "Batched operations".to_string(),
            description_link: String::new(),
            execution_poll_attempts: 60,
            execution_poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub programs: AuthorityPrograms,
    pub max_concurrency: usize,
    /// Ceiling for directly sent packed units
    pub unit_ceiling: usize,
    /// Ceiling for units wrapped in `batch_add_transaction`
    pub batch_ceiling: usize,
    /// Compute units for each multi-party lifecycle step
    pub step_compute_units: u32,
    pub legacy_authority_index: u32,
    pub batch_vault_index: u8,
    pub governance: GovernanceSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            programs: AuthorityPrograms::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            unit_ceiling: DEFAULT_UNIT_CEILING,
            batch_ceiling: DEFAULT_UNIT_CEILING,
            step_compute_units: 400_000,
            legacy_authority_index: 1,
            batch_vault_index: 0,
            governance: GovernanceSettings::default(),
        }
    }
}

/// How a direct batch is split into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectMode {
    /// Every operation in one transaction
    #[default]
    Atomic,
    /// Packed into as many transactions as needed
    Packed { parallel: bool },
}

/// Continue a multi-party run started earlier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Existing Squads v3 transaction account
    LegacyTransaction(Pubkey),
    /// Existing Squads v4 batch index
    Batch(u64),
}

/// One batch to dispatch
#[derive(Clone, Default)]
pub struct DispatchRequest {
    pub operations: Vec<Instruction>,
    /// Signers supplied in addition to the fee payer
    pub signers: Vec<SharedSigner>,
    /// Multisig or governance account, when it is not the signer itself
    pub authority_hint: Option<Pubkey>,
    /// Execute multi-party transactions once approved
    pub execute: bool,
    pub direct_mode: DirectMode,
    pub resume: Option<Resume>,
    /// Seed of the governance proposal; random when absent
    pub proposal_seed: Option<Pubkey>,
}

impl DispatchRequest {
    pub fn new(operations: Vec<Instruction>) -> Self {
        Self {
            operations,
            ..Self::default()
        }
    }

    pub fn with_signers(mut self, signers: Vec<SharedSigner>) -> Self {
        self.signers = signers;
        self
    }

    pub fn with_authority(mut self, authority: Pubkey) -> Self {
        self.authority_hint = Some(authority);
        self
    }

    pub fn execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn direct_mode(mut self, mode: DirectMode) -> Self {
        self.direct_mode = mode;
        self
    }

    pub fn resume(mut self, resume: Resume) -> Self {
        self.resume = Some(resume);
        self
    }

    pub fn proposal_seed(mut self, seed: Pubkey) -> Self {
        self.proposal_seed = Some(seed);
        self
    }

    fn explicit_keys(&self) -> Vec<Pubkey> {
        self.signers.iter().map(|s| s.pubkey()).collect()
    }
}

impl std::fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("operations", &self.operations.len())
            .field("signers", &self.explicit_keys())
            .field("authority_hint", &self.authority_hint)
            .field("execute", &self.execute)
            .field("direct_mode", &self.direct_mode)
            .field("resume", &self.resume)
            .finish()
    }
}

/// Routing decision for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub backend: Backend,
    /// The single signer the backend provides, if any
    pub authority: Option<Pubkey>,
}

/// Entry point of the engine; holds collaborators and settings, no globals
pub struct Dispatcher {
    pub(crate) reader: Arc<dyn AccountReader>,
    pub(crate) sender: TxSender,
    pub(crate) lookup_tables: Arc<dyn LookupTableService>,
    pub(crate) limiter: ConcurrencyLimiter,
    pub(crate) settings: DispatchSettings,
    pub(crate) metrics: Option<Arc<DispatchMetrics>>,
}

impl Dispatcher {
    pub fn new(
        reader: Arc<dyn AccountReader>,
        sender: TxSender,
        lookup_tables: Arc<dyn LookupTableService>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            reader,
            sender,
            lookup_tables,
            limiter: ConcurrencyLimiter::new(settings.max_concurrency),
            settings,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.sender = self.sender.with_metrics(Arc::clone(&metrics));
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn fee_payer(&self) -> Pubkey {
        self.sender.payer()
    }

    /// Decide the backend for `ops` without submitting anything
    pub async fn plan(
        &self,
        ops: &[Instruction],
        explicit: &[Pubkey],
        authority_hint: Option<Pubkey>,
    ) -> Result<DispatchPlan, DispatchError> {
        let missing = missing_signers(ops, &self.sender.payer(), explicit);
        let signer = match missing.len() {
            0 => {
                return Ok(DispatchPlan {
                    backend: Backend::Direct,
                    authority: None,
                })
            }
            1 => missing.into_iter().next().ok_or_else(|| DispatchError::config("empty signer set"))?,
            _ => {
                return Err(DispatchError::TooManySigners {
                    signers: missing.into_iter().collect(),
                })
            }
        };

        let authority = authority_hint.unwrap_or(signer);
        let account = self.reader.get_account(&authority).await?;
        let owner = match account {
            Some(account) => account.owner,
            None => return Err(DispatchError::UnsupportedAuthority { authority, owner: None }),
        };

        let programs = &self.settings.programs;
        let (backend, derived) = if owner == programs.squads_v3 {
            let authority_index = self.settings.legacy_authority_index;
            (
                Backend::LegacyMultisig {
                    multisig: authority,
                    authority_index,
                },
                squads_v3::authority_pda(&owner, &authority, authority_index),
            )
        } else if owner == programs.squads_v4 {
            let vault_index = self.settings.batch_vault_index;
            (
                Backend::BatchMultisig {
                    multisig: authority,
                    vault_index,
                },
                squads_v4::vault_pda(&owner, &authority, vault_index),
            )
        } else if owner == programs.governance {
            (
                Backend::Governance { governance: authority },
                governance::native_treasury_pda(&owner, &authority),
            )
        } else {
            return Err(DispatchError::UnsupportedAuthority {
                authority,
                owner: Some(owner),
            });
        };

        if derived != signer {
            return Err(DispatchError::config(format!(
                "{} controls {}, but operations require {}",
                authority, derived, signer
            )));
        }

        Ok(DispatchPlan {
            backend,
            authority: Some(signer),
        })
    }

    /// Route and execute one batch
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResult, DispatchError> {
        let correlation_id = CorrelationId::new();
        let span = info_span!(
            "dispatch",
            correlation_id = %correlation_id,
            operations = request.operations.len()
        );

        async move {
            let plan = self
                .plan(&request.operations, &request.explicit_keys(), request.authority_hint)
                .await?;
            let kind = plan.backend.kind();
            info!(backend = %kind, authority = ?plan.authority, "Dispatch plan resolved");
            if let Some(metrics) = &self.metrics {
                metrics.dispatches.with_label_values(&[kind.as_str()]).inc();
            }

            let result = match plan.backend {
                Backend::Direct => backends::direct::run(self, &request).await?,
                Backend::LegacyMultisig {
                    multisig,
                    authority_index,
                } => backends::legacy_multisig::run(self, &request, &multisig, authority_index).await?,
                Backend::BatchMultisig { multisig, vault_index } => {
                    backends::batch_multisig::run(self, &request, &multisig, vault_index).await?
                }
                Backend::Governance { governance } => {
                    backends::governance::run(self, &request, &governance).await?
                }
            };

            info!(
                backend = %kind,
                submitted = result.units_submitted,
                confirmed = result.units_confirmed,
                skipped = result.units_skipped,
                failures = result.failures.len(),
                failed_buckets = result.failed_buckets.len(),
                "Dispatch finished"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}
