//! Batch packing and multi-backend dispatch
//!
//! A batch is an ordered list of operations. The [`Dispatcher`] decides who
//! has to sign it, packs the operations into transaction-sized units where the
//! backend allows it, and drives the chosen backend to completion:
//!
//! - **Direct**: the fee payer (plus explicit signers) sends the operations
//! - **Legacy multisig**: Squads v3 transaction, one instruction per operation
//! - **Batch multisig**: Squads v4 batch behind a draft proposal
//! - **Governance**: SPL Governance proposal executed by the native treasury

pub mod backends;
pub mod errors;
pub mod limiter;
pub mod lookup_tables;
pub mod operation;
pub mod packer;
pub mod retry;
pub mod router;
pub mod signers;
pub mod size;
pub mod submit;

pub use backends::{Backend, BackendKind, DispatchResult, LegacyStep, UnitFailure};
pub use errors::{DispatchError, Result};
pub use limiter::ConcurrencyLimiter;
pub use lookup_tables::OnChainLookupTables;
pub use operation::{parse_operations, Bucket, OperationSpec};
pub use packer::{pack, PackOutcome, PackedUnit};
pub use router::{
    AuthorityPrograms, DirectMode, DispatchPlan, DispatchRequest, DispatchSettings, Dispatcher, GovernanceSettings,
    Resume,
};
pub use signers::{missing_signers, SignerSet};
pub use size::{SizeEstimator, TransactionSizeEstimator, DEFAULT_UNIT_CEILING};
pub use submit::{ComputeBudget, PriorityFeeConfig, SharedSigner, SubmitConfig, TxSender};
