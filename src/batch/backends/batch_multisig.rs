//! Squads v4 backend
//!
//! Operations are packed into vault transactions and appended to a single
//! batch behind a draft proposal. The proposal is activated only when every
//! slot of the batch is populated.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::{info, warn};

use super::{BackendKind, DispatchResult};
use crate::batch::errors::DispatchError;
use crate::batch::operation::singleton_buckets;
use crate::batch::packer::pack;
use crate::batch::router::{DispatchRequest, Dispatcher, Resume};
use crate::batch::size::{BatchAddSizeEstimator, EXCEEDS_MAX_SIZE};
use crate::batch::submit::ComputeBudget;
use crate::programs::squads_v4::{self, Batch, Multisig, Proposal};

pub(crate) async fn run(
    dispatcher: &Dispatcher,
    request: &DispatchRequest,
    multisig: &Pubkey,
    vault_index: u8,
) -> Result<DispatchResult, DispatchError> {
    let program_id = dispatcher.settings.programs.squads_v4;
    let member = dispatcher.fee_payer();
    let budget = ComputeBudget::Fixed(dispatcher.settings.step_compute_units);

    let ms_account = dispatcher
        .reader
        .get_account(multisig)
        .await?
        .ok_or_else(|| DispatchError::invalid_account(*multisig, "multisig account not found"))?;
    let ms = Multisig::decode(multisig, &ms_account.data)?;

    let (batch_index, existing) = match request.resume {
        Some(Resume::Batch(index)) => {
            let address = squads_v4::transaction_pda(&program_id, multisig, index);
            let account = dispatcher
                .reader
                .get_account(&address)
                .await?
                .ok_or_else(|| DispatchError::invalid_account(address, "batch account not found"))?;
            let batch = Batch::decode(&address, &account.data)?;
            info!(batch = %address, index, size = batch.size, "Resuming batch");
            (index, Some(batch))
        }
        _ => (ms.transaction_index + 1, None),
    };

    let batch = squads_v4::transaction_pda(&program_id, multisig, batch_index);
    let proposal = squads_v4::proposal_pda(&program_id, multisig, batch_index);
    let estimator = BatchAddSizeEstimator {
        program_id,
        multisig: *multisig,
        vault: squads_v4::vault_pda(&program_id, multisig, vault_index),
        batch_index,
        payer: member,
    };

    // Nothing is submitted unless every operation fits
    let outcome = pack(&singleton_buckets(&request.operations), dispatcher.settings.batch_ceiling, &estimator);
    if !outcome.is_complete() {
        if let Some(metrics) = &dispatcher.metrics {
            metrics.packing_failures.inc_by(outcome.failed.len() as u64);
        }
        return Err(DispatchError::PackingOverflow {
            buckets: outcome.failed,
            ceiling: outcome.ceiling,
        });
    }
    let units = outcome.units;

    let mut result = DispatchResult::new(BackendKind::BatchMultisig);
    result.address = Some(batch);

    if existing.is_none() {
        let create = squads_v4::batch_create(
            &program_id,
            &squads_v4::BatchCreateAccounts {
                multisig: *multisig,
                creator: member,
                rent_payer: member,
                batch,
            },
            vault_index,
            None,
        );
        let draft = squads_v4::proposal_create(
            &program_id,
            &squads_v4::ProposalCreateAccounts {
                multisig: *multisig,
                proposal,
                creator: member,
                rent_payer: member,
            },
            batch_index,
            true,
        );
        let sent = dispatcher
            .sender
            .send_and_confirm("batch_create", &[create, draft], &request.signers, &[], budget)
            .await;
        if !result.record("batch_create", sent) {
            return Ok(result);
        }
    }

    let populated = existing.as_ref().map(|b| b.size as usize).unwrap_or(0);
    if populated > units.len() {
        return Err(DispatchError::invalid_account(
            batch,
            format!("batch holds {} transactions but only {} units were packed", populated, units.len()),
        ));
    }
    info!(batch = %batch, units = units.len(), populated, "Adding batch transactions");

    let adds = units.iter().enumerate().skip(populated).map(|(i, unit)| {
        let tx_index = (i + 1) as u32;
        let label = format!("batch_add_{}", tx_index);
        let estimator = &estimator;
        async move {
            let sent = match estimator.wrap(&unit.instructions, tx_index) {
                Some(ix) => {
                    dispatcher
                        .sender
                        .send_and_confirm(&label, &[ix], &request.signers, &[], budget)
                        .await
                }
                None => Err(DispatchError::Overflow {
                    size: EXCEEDS_MAX_SIZE,
                    limit: dispatcher.settings.batch_ceiling,
                }),
            };
            (label, sent)
        }
    });
    let added: Vec<(String, Result<Signature, DispatchError>)> = dispatcher.limiter.run_all(adds).await;

    let mut all_added = true;
    for (label, sent) in added {
        all_added &= result.record(&label, sent);
    }

    if !all_added {
        warn!(
            batch = %batch,
            index = batch_index,
            confirmed = result.units_confirmed,
            total = result.units_submitted,
            "Batch incomplete, proposal left in draft; resume with the batch index"
        );
        return Ok(result);
    }

    if existing.is_some() {
        if let Some(account) = dispatcher.reader.get_account(&proposal).await? {
            let status = Proposal::decode(&proposal, &account.data)?.status;
            if !status.is_draft() {
                info!(proposal = %proposal, status = ?status, "Proposal already past draft, not activating");
                return Ok(result);
            }
        }
    }

    let activate = squads_v4::proposal_activate(
        &program_id,
        &squads_v4::ProposalActivateAccounts {
            multisig: *multisig,
            member,
            proposal,
        },
    );
    let sent = dispatcher
        .sender
        .send_and_confirm("proposal_activate", &[activate], &request.signers, &[], budget)
        .await;
    if result.record("proposal_activate", sent) {
        info!(batch = %batch, proposal = %proposal, "Batch proposal activated");
    }
    Ok(result)
}
