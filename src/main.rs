//! Batch Dispatch
//!
//! Command line entry point: loads a batch of operations from JSON, routes it
//! to the right backend and reports the outcome.
//!
//! ## Backends
//!
//! - **Direct**: fee payer and `--signer` keypairs sign everything
//! - **Squads v3**: one multisig transaction per batch
//! - **Squads v4**: packed vault transactions in one batch proposal
//! - **SPL Governance**: proposal executed by the native treasury

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use solana_sdk::signer::Signer;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batch_dispatch::batch::{
    parse_operations, DirectMode, DispatchRequest, Dispatcher, OnChainLookupTables, Resume, SharedSigner, TxSender,
};
use batch_dispatch::config::{parse_pubkey, Config};
use batch_dispatch::metrics::DispatchMetrics;
use batch_dispatch::rpc::RpcChain;
use batch_dispatch::wallet::{read_keypair, WalletManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DirectModeArg {
    /// All operations in one transaction
    Atomic,
    /// Packed units sent one after another
    Sequential,
    /// Packed units sent concurrently
    Parallel,
}

impl From<DirectModeArg> for DirectMode {
    fn from(arg: DirectModeArg) -> Self {
        match arg {
            DirectModeArg::Atomic => DirectMode::Atomic,
            DirectModeArg::Sequential => DirectMode::Packed { parallel: false },
            DirectModeArg::Parallel => DirectMode::Packed { parallel: true },
        }
    }
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// JSON file with the operations to dispatch
    #[arg(short, long)]
    operations: String,

    /// Multisig or governance account controlling the required signer
    #[arg(short, long)]
    authority: Option<String>,

    /// Extra keypair files that may sign operations
    #[arg(short, long = "signer")]
    signers: Vec<String>,

    /// Execute multi-party transactions once approved
    #[arg(long)]
    execute: bool,

    /// How directly signed batches are split
    #[arg(long, value_enum, default_value = "atomic")]
    direct_mode: DirectModeArg,

    /// Resume a Squads v3 transaction at this address
    #[arg(long, conflicts_with = "resume_batch")]
    resume_transaction: Option<String>,

    /// Resume a Squads v4 batch with this index
    #[arg(long)]
    resume_batch: Option<u64>,

    /// Governance proposal seed, to resume an earlier proposal
    #[arg(long)]
    proposal_seed: Option<String>,

    /// Print the routing decision and exit
    #[arg(long)]
    plan_only: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "BATCH_DISPATCH_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting batch dispatch");

    let config = Config::load(&args.config).with_context(|| format!("Failed to load config: {}", args.config))?;
    info!(rpc = %config.rpc.url, commitment = %config.rpc.commitment, "Configuration loaded");

    let wallet = WalletManager::from_file(&config.wallet.keypair_path).context("Failed to load wallet")?;
    info!(payer = %wallet.pubkey(), "Fee payer loaded");

    let signers = args
        .signers
        .iter()
        .map(|path| {
            read_keypair(path)
                .map(|keypair| Arc::new(keypair) as SharedSigner)
                .with_context(|| format!("Failed to load signer {}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let raw = std::fs::read_to_string(&args.operations)
        .with_context(|| format!("Failed to read operations file: {}", args.operations))?;
    let operations = parse_operations(&raw).context("Invalid operations file")?;
    info!(operations = operations.len(), signers = signers.len(), "Operations loaded");

    let metrics = Arc::new(DispatchMetrics::new()?);
    let chain = Arc::new(RpcChain::new(config.rpc.url.clone(), config.commitment()?, config.rpc_timeout()));
    let sender = TxSender::new(chain.clone(), wallet.signer(), config.submit_config()?);
    let lookup_tables = Arc::new(OnChainLookupTables::new(sender.clone(), chain.clone()));
    let dispatcher =
        Dispatcher::new(chain, sender, lookup_tables, config.dispatch_settings()?).with_metrics(Arc::clone(&metrics));

    let mut request = DispatchRequest::new(operations)
        .with_signers(signers)
        .execute(args.execute)
        .direct_mode(args.direct_mode.into());
    if let Some(authority) = &args.authority {
        request = request.with_authority(parse_pubkey("--authority", authority)?);
    }
    if let Some(address) = &args.resume_transaction {
        request = request.resume(Resume::LegacyTransaction(parse_pubkey("--resume-transaction", address)?));
    }
    if let Some(index) = args.resume_batch {
        request = request.resume(Resume::Batch(index));
    }
    if let Some(seed) = &args.proposal_seed {
        request = request.proposal_seed(parse_pubkey("--proposal-seed", seed)?);
    }

    if args.plan_only {
        let explicit: Vec<_> = request.signers.iter().map(|s| s.pubkey()).collect();
        let plan = dispatcher
            .plan(&request.operations, &explicit, request.authority_hint)
            .await?;
        info!(backend = %plan.backend.kind(), authority = ?plan.authority, "Dispatch plan");
        return Ok(());
    }

    let result = match dispatcher.dispatch(request).await {
        Ok(result) => result,
        Err(e) => {
            error!(category = e.category(), error = %e, "Dispatch aborted");
            return Err(e.into());
        }
    };

    info!(
        backend = %result.backend,
        submitted = result.units_submitted,
        confirmed = result.units_confirmed,
        skipped = result.units_skipped,
        address = ?result.address,
        last_signature = ?result.last_signature(),
        "Dispatch complete"
    );
    for failure in &result.failures {
        warn!(unit = failure.unit, step = %failure.step, error = %failure.error, "Unit failed");
    }
    if !result.failed_buckets.is_empty() {
        warn!(buckets = ?result.failed_buckets, "Operations too large to pack");
    }
    info!(metrics = %metrics.render(), "Metrics");

    if !result.is_success() {
        anyhow::bail!(
            "{} of {} units confirmed",
            result.units_confirmed,
            result.units_submitted
        );
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "batch_dispatch=debug,info"
    } else {
        "batch_dispatch=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()?;
    }
    Ok(())
}
