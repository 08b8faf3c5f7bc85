//! Error types for the batch dispatch engine
//!
//! Every failure the engine can surface is a variant of [`DispatchError`].
//! Callers branch on the variant (or on [`DispatchError::is_retryable`])
//! instead of inspecting error text:
//! - packing failures are reported per bucket
//! - routing failures are fatal and raised before any submission
//! - RPC failures are split into transient and deterministic classes

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Error taxonomy for packing, routing and submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// One or more buckets could not fit into an execution unit even alone
    #[error("Packing overflow: {} bucket(s) exceed the {ceiling} byte ceiling (indices: {buckets:?})", buckets.len())]
    PackingOverflow {
        /// Indices of the irreducibly oversized buckets
        buckets: Vec<usize>,
        /// Ceiling the buckets were packed against
        ceiling: usize,
    },

    /// More than one external authority is required by the batch
    #[error("Too many missing signers ({}): {signers:?}", signers.len())]
    TooManySigners {
        /// Every signer that is neither the fee payer nor explicitly supplied
        signers: Vec<Pubkey>,
    },

    /// The resolved authority is not owned by any program the engine can drive
    #[error("Unsupported authority {authority} (owner: {owner:?})")]
    UnsupportedAuthority {
        /// Authority account that was inspected
        authority: Pubkey,
        /// Its owning program, if the account exists
        owner: Option<Pubkey>,
    },

    /// A single transaction would exceed the wire packet limit
    #[error("Transaction too large: {size} bytes (limit {limit})")]
    Overflow {
        /// Serialized size, or `usize::MAX` when it could not be compiled
        size: usize,
        /// Limit that was exceeded
        limit: usize,
    },

    /// Network level failure, rate limit or confirmation timeout
    #[error("Transient RPC error: {0}")]
    Transient(String),

    /// Transient failures that outlived the retry budget
    #[error("Submission failed after {attempts} attempt(s): {last}")]
    SubmissionFailed {
        /// Attempts made, including the first
        attempts: u32,
        /// Last transient error observed
        last: String,
    },

    /// Simulation or validation rejected the transaction
    #[error("Transaction rejected: {0}")]
    Deterministic(String),

    /// Invalid settings or an authority that does not control the signer
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An on-chain account could not be decoded as the expected layout
    #[error("Invalid account data for {account}: {reason}")]
    InvalidAccountData {
        /// Account that failed to decode
        account: Pubkey,
        /// Decoder message
        reason: String,
    },
}

impl DispatchError {
    /// Check if retrying the same submission might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Get the error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::PackingOverflow { .. } => "packing",
            Self::TooManySigners { .. } => "signers",
            Self::UnsupportedAuthority { .. } => "authority",
            Self::Overflow { .. } => "overflow",
            Self::Transient(_) => "transient",
            Self::SubmissionFailed { .. } => "submission",
            Self::Deterministic(_) => "rejected",
            Self::Configuration(_) => "config",
            Self::InvalidAccountData { .. } => "account_data",
        }
    }

    /// Create an account decoding error
    pub fn invalid_account(account: Pubkey, reason: impl Into<String>) -> Self {
        Self::InvalidAccountData {
            account,
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }
}
