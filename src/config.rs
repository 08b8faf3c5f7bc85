//! Configuration module for batch dispatch
//!
//! This module handles configuration loading from TOML files, `.env` files
//! and `BATCH_DISPATCH_*` environment variables, and converts the result into
//! the settings the engine consumes.

use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::batch::limiter::DEFAULT_MAX_CONCURRENCY;
use crate::batch::retry::RetryConfig;
use crate::batch::router::{AuthorityPrograms, DispatchSettings, GovernanceSettings};
use crate::batch::size::DEFAULT_UNIT_CEILING;
use crate::batch::submit::{PriorityFeeConfig, SubmitConfig};
use crate::programs::{governance, squads_v3, squads_v4};

pub const ENV_RPC_URL: &str = "BATCH_DISPATCH_RPC_URL";
pub const ENV_KEYPAIR: &str = "BATCH_DISPATCH_KEYPAIR";
pub const ENV_COMMITMENT: &str = "BATCH_DISPATCH_COMMITMENT";
pub const ENV_MAX_CONCURRENCY: &str = "BATCH_DISPATCH_MAX_CONCURRENCY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// RPC endpoint configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Fee payer wallet
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Packing, submission and concurrency
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Program ids recognised as authority owners
    #[serde(default)]
    pub programs: ProgramsConfig,

    /// Proposal parameters for governance dispatches
    #[serde(default)]
    pub governance: GovernanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Submissions in flight at once for independent units
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Byte ceiling for directly sent units
    #[serde(default = "default_unit_ceiling")]
    pub unit_ceiling: usize,

    /// Byte ceiling for units wrapped in a Squads v4 batch
    #[serde(default = "default_unit_ceiling")]
    pub batch_ceiling: usize,

    /// Compute units for each multi-party lifecycle step
    #[serde(default = "default_step_compute_units")]
    pub step_compute_units: u32,

    #[serde(default = "default_legacy_authority_index")]
    pub legacy_authority_index: u32,

    #[serde(default)]
    pub batch_vault_index: u8,

    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,

    #[serde(default = "default_confirm_interval_ms")]
    pub confirm_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub fees: PriorityFeeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramsConfig {
    #[serde(default = "default_squads_v3")]
    pub squads_v3: String,
    #[serde(default = "default_squads_v4")]
    pub squads_v4: String,
    #[serde(default = "default_governance")]
    pub governance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Mint whose tokens give the fee payer voting power
    #[serde(default)]
    pub governing_token_mint: Option<String>,

    #[serde(default = "default_proposal_name")]
    pub proposal_name: String,

    #[serde(default)]
    pub description_link: String,

    #[serde(default = "default_execution_poll_attempts")]
    pub execution_poll_attempts: u32,

    #[serde(default = "default_execution_poll_interval")]
    pub execution_poll_interval_secs: u64,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_max_concurrency() -> usize { DEFAULT_MAX_CONCURRENCY }
fn default_unit_ceiling() -> usize { DEFAULT_UNIT_CEILING }
fn default_step_compute_units() -> u32 { 400_000 }
fn default_legacy_authority_index() -> u32 { 1 }
fn default_confirm_attempts() -> u32 { 30 }
fn default_confirm_interval_ms() -> u64 { 1_000 }
fn default_squads_v3() -> String { squads_v3::PROGRAM_ID.to_string() }
fn default_squads_v4() -> String { squads_v4::PROGRAM_ID.to_string() }
fn default_governance() -> String { governance::PROGRAM_ID.to_string() }
fn default_proposal_name() -> String { "Batched operations".to_string() }
fn default_execution_poll_attempts() -> u32 { 60 }
fn default_execution_poll_interval() -> u64 { 5 }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
            commitment: default_commitment(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            unit_ceiling: default_unit_ceiling(),
            batch_ceiling: default_unit_ceiling(),
            step_compute_units: default_step_compute_units(),
            legacy_authority_index: default_legacy_authority_index(),
            batch_vault_index: 0,
            confirm_attempts: default_confirm_attempts(),
            confirm_interval_ms: default_confirm_interval_ms(),
            retry: RetryConfig::default(),
            fees: PriorityFeeConfig::default(),
        }
    }
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            squads_v3: default_squads_v3(),
            squads_v4: default_squads_v4(),
            governance: default_governance(),
        }
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            governing_token_mint: None,
            proposal_name: default_proposal_name(),
            description_link: String::new(),
            execution_poll_attempts: default_execution_poll_attempts(),
            execution_poll_interval_secs: default_execution_poll_interval(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Load `.env`, the file (defaults when it does not exist), apply
    /// environment overrides and validate
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = if std::path::Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BATCH_DISPATCH_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(path) = lookup(ENV_KEYPAIR) {
            self.wallet.keypair_path = path;
        }
        if let Some(commitment) = lookup(ENV_COMMITMENT) {
            self.rpc.commitment = commitment;
        }
        if let Some(value) = lookup(ENV_MAX_CONCURRENCY) {
            self.dispatch.max_concurrency = value
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{} must be a number, got {:?}", ENV_MAX_CONCURRENCY, value)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.url.trim().is_empty() {
            return Err(ConfigError::Invalid("rpc.url must not be empty".to_string()));
        }
        self.commitment()?;
        if self.dispatch.max_concurrency == 0 {
            return Err(ConfigError::Invalid("dispatch.max_concurrency must be at least 1".to_string()));
        }
        for (name, ceiling) in [
            ("unit_ceiling", self.dispatch.unit_ceiling),
            ("batch_ceiling", self.dispatch.batch_ceiling),
        ] {
            if ceiling == 0 || ceiling > DEFAULT_UNIT_CEILING {
                return Err(ConfigError::Invalid(format!(
                    "dispatch.{} must be within 1..={}, got {}",
                    name, DEFAULT_UNIT_CEILING, ceiling
                )));
            }
        }
        if self.dispatch.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("dispatch.retry.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.dispatch.retry.jitter_factor) {
            return Err(ConfigError::Invalid("dispatch.retry.jitter_factor must be within 0.0..=1.0".to_string()));
        }
        let fees = &self.dispatch.fees;
        if fees.min_micro_lamports > fees.max_micro_lamports {
            return Err(ConfigError::Invalid(
                "dispatch.fees.min_micro_lamports exceeds max_micro_lamports".to_string(),
            ));
        }
        self.authority_programs()?;
        self.governing_token_mint()?;
        Ok(())
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, ConfigError> {
        match self.rpc.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(ConfigError::Invalid(format!("unknown commitment level {:?}", other))),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn authority_programs(&self) -> Result<AuthorityPrograms, ConfigError> {
        Ok(AuthorityPrograms {
            squads_v3: parse_pubkey("programs.squads_v3", &self.programs.squads_v3)?,
            squads_v4: parse_pubkey("programs.squads_v4", &self.programs.squads_v4)?,
            governance: parse_pubkey("programs.governance", &self.programs.governance)?,
        })
    }

    fn governing_token_mint(&self) -> Result<Option<Pubkey>, ConfigError> {
        self.governance
            .governing_token_mint
            .as_deref()
            .map(|mint| parse_pubkey("governance.governing_token_mint", mint))
            .transpose()
    }

    pub fn submit_config(&self) -> Result<SubmitConfig, ConfigError> {
        Ok(SubmitConfig {
            commitment: self.commitment()?,
            retry: self.dispatch.retry.clone(),
            fees: self.dispatch.fees.clone(),
            confirm_attempts: self.dispatch.confirm_attempts,
            confirm_interval: Duration::from_millis(self.dispatch.confirm_interval_ms),
        })
    }

    pub fn dispatch_settings(&self) -> Result<DispatchSettings, ConfigError> {
        let dispatch = &self.dispatch;
        Ok(DispatchSettings {
            programs: self.authority_programs()?,
            max_concurrency: dispatch.max_concurrency,
            unit_ceiling: dispatch.unit_ceiling,
            batch_ceiling: dispatch.batch_ceiling,
            step_compute_units: dispatch.step_compute_units,
            legacy_authority_index: dispatch.legacy_authority_index,
            batch_vault_index: dispatch.batch_vault_index,
            governance: GovernanceSettings {
                governing_token_mint: self.governing_token_mint()?,
                proposal_name: self.governance.proposal_name.clone(),
                description_link: self.governance.description_link.clone(),
                execution_poll_attempts: self.governance.execution_poll_attempts,
                execution_poll_interval: Duration::from_secs(self.governance.execution_poll_interval_secs),
            },
        })
    }
}

pub fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, ConfigError> {
    Pubkey::from_str(value.trim()).map_err(|e| ConfigError::Invalid(format!("{} is not a valid address: {}", field, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();

        let settings = config.dispatch_settings().unwrap();
        assert_eq!(settings.programs, AuthorityPrograms::default());
        assert_eq!(settings.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert!(settings.governance.governing_token_mint.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rpc]
            url = "http://localhost:8899"

            [dispatch]
            max_concurrency = 2

            [dispatch.retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.rpc.url, "http://localhost:8899");
        assert_eq!(config.rpc.commitment, "confirmed");
        assert_eq!(config.dispatch.max_concurrency, 2);
        assert_eq!(config.dispatch.retry.max_attempts, 3);
        assert_eq!(config.dispatch.retry.base_backoff_ms, 500);
        assert_eq!(config.dispatch.unit_ceiling, DEFAULT_UNIT_CEILING);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_RPC_URL, "http://override:8899"),
            (ENV_KEYPAIR, "/tmp/payer.json"),
            (ENV_MAX_CONCURRENCY, "9"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.rpc.url, "http://override:8899");
        assert_eq!(config.wallet.keypair_path, "/tmp/payer.json");
        assert_eq!(config.dispatch.max_concurrency, 9);

        let bad = config.apply_overrides(|key| (key == ENV_MAX_CONCURRENCY).then(|| "many".to_string()));
        assert!(matches!(bad, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.rpc.commitment = "eventually".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.unit_ceiling = 5_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.governance.governing_token_mint = Some("not-a-key".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.fees.min_micro_lamports = 10;
        config.dispatch.fees.max_micro_lamports = 1;
        assert!(config.validate().is_err());
    }
}
