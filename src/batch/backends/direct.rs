//! Direct send: the fee payer and explicit signers cover every signature

use solana_sdk::signature::Signature;
use tracing::{info, warn};

use super::{BackendKind, DispatchResult};
use crate::batch::errors::DispatchError;
use crate::batch::operation::singleton_buckets;
use crate::batch::packer::pack;
use crate::batch::router::{DirectMode, DispatchRequest, Dispatcher};
use crate::batch::size::TransactionSizeEstimator;
use crate::batch::submit::ComputeBudget;

pub(crate) async fn run(dispatcher: &Dispatcher, request: &DispatchRequest) -> Result<DispatchResult, DispatchError> {
    let mut result = DispatchResult::new(BackendKind::Direct);
    let ops = &request.operations;
    if ops.is_empty() {
        return Ok(result);
    }

    let parallel = match request.direct_mode {
        DirectMode::Atomic => {
            let outcome = dispatcher
                .sender
                .send_and_confirm("direct", ops, &request.signers, &[], ComputeBudget::Scaled)
                .await;
            result.record("direct", outcome);
            return Ok(result);
        }
        DirectMode::Packed { parallel } => parallel,
    };

    let estimator = TransactionSizeEstimator::new(dispatcher.fee_payer());
    let outcome = pack(&singleton_buckets(ops), dispatcher.settings.unit_ceiling, &estimator);
    if !outcome.is_complete() {
        warn!(failed = ?outcome.failed, "Operations too large to send on their own are skipped");
        if let Some(metrics) = &dispatcher.metrics {
            metrics.packing_failures.inc_by(outcome.failed.len() as u64);
        }
    }
    result.failed_buckets = outcome.failed;
    info!(units = outcome.units.len(), parallel, "Sending packed units");

    let sends = outcome.units.iter().enumerate().map(|(i, unit)| {
        let label = format!("direct_unit_{}", i);
        async move {
            let sent = dispatcher
                .sender
                .send_and_confirm(&label, &unit.instructions, &request.signers, &[], ComputeBudget::Scaled)
                .await;
            (label, sent)
        }
    });

    let outcomes: Vec<(String, Result<Signature, DispatchError>)> = if parallel {
        dispatcher.limiter.run_all(sends).await
    } else {
        // Later units may read state the earlier ones write
        let mut done = Vec::with_capacity(outcome.units.len());
        for send in sends {
            let (label, sent) = send.await;
            let failed = sent.is_err();
            done.push((label, sent));
            if failed {
                break;
            }
        }
        result.units_skipped = outcome.units.len() - done.len();
        if result.units_skipped > 0 {
            warn!(skipped = result.units_skipped, "Unit failed, later units not sent");
        }
        done
    };

    for (label, sent) in outcomes {
        result.record(&label, sent);
    }
    Ok(result)
}
