//! Batch Dispatch - transaction packing and multi-backend execution for Solana
//!
//! This library exposes the dispatch engine, the protocol bindings it drives
//! and the RPC seams it talks through.

pub mod batch;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod programs;
pub mod rpc;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

// Re-export commonly used types
pub use batch::{DispatchError, DispatchRequest, DispatchResult, Dispatcher};
pub use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Signature};
