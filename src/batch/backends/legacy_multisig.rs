//! Squads v3 backend
//!
//! One multisig transaction holds every operation as its own instruction
//! account. The lifecycle is strictly sequential:
//! create → add each instruction → activate → approve → execute each instruction.
//! [`LegacyStep::next`] derives the next step from the transaction state, so a
//! run can resume from any transaction it left behind.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::{debug, info};

use super::{BackendKind, DispatchResult};
use crate::batch::errors::DispatchError;
use crate::batch::router::{DispatchRequest, Dispatcher, Resume};
use crate::batch::submit::ComputeBudget;
use crate::programs::squads_v3::{self, Ms, MsTransaction, MsTransactionStatus, TransactionAccounts};

/// Next lifecycle step of a Squads v3 transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyStep {
    Create,
    /// Attach the operation at this 0-based position
    Append(u8),
    Activate,
    Approve,
    /// Execute the stored instruction with this 1-based index
    Execute(u8),
    Done,
}

impl LegacyStep {
    /// Step following `state` for a transaction meant to hold `total` operations
    pub fn next(state: Option<&MsTransaction>, total: usize, member: &Pubkey, execute: bool) -> Self {
        let Some(tx) = state else {
            return Self::Create;
        };
        match tx.status {
            MsTransactionStatus::Draft if (tx.instruction_index as usize) < total => Self::Append(tx.instruction_index),
            MsTransactionStatus::Draft => Self::Activate,
            MsTransactionStatus::Active if tx.approved.contains(member) => Self::Done,
            MsTransactionStatus::Active => Self::Approve,
            MsTransactionStatus::ExecuteReady if execute && tx.executed_index < tx.instruction_index => {
                Self::Execute(tx.executed_index + 1)
            }
            MsTransactionStatus::ExecuteReady
            | MsTransactionStatus::Executed
            | MsTransactionStatus::Rejected
            | MsTransactionStatus::Cancelled => Self::Done,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Create => "legacy_create".to_string(),
            Self::Append(i) => format!("legacy_add_{}", i),
            Self::Activate => "legacy_activate".to_string(),
            Self::Approve => "legacy_approve".to_string(),
            Self::Execute(i) => format!("legacy_execute_{}", i),
            Self::Done => "legacy_done".to_string(),
        }
    }
}

/// Apply a confirmed step to the local copy of the transaction
fn advance(tx: &mut MsTransaction, step: LegacyStep, member: &Pubkey, threshold: u16) {
    match step {
        LegacyStep::Create | LegacyStep::Done => {}
        LegacyStep::Append(_) => tx.instruction_index += 1,
        LegacyStep::Activate => tx.status = MsTransactionStatus::Active,
        LegacyStep::Approve => {
            tx.approved.push(*member);
            if tx.approved.len() >= threshold as usize {
                tx.status = MsTransactionStatus::ExecuteReady;
            }
        }
        LegacyStep::Execute(index) => {
            tx.executed_index = index;
            if index >= tx.instruction_index {
                tx.status = MsTransactionStatus::Executed;
            }
        }
    }
}

pub(crate) async fn run(
    dispatcher: &Dispatcher,
    request: &DispatchRequest,
    multisig: &Pubkey,
    authority_index: u32,
) -> Result<DispatchResult, DispatchError> {
    let program_id = dispatcher.settings.programs.squads_v3;
    let member = dispatcher.fee_payer();
    let ops = &request.operations;
    if ops.len() > u8::MAX as usize {
        return Err(DispatchError::config(format!(
            "a legacy multisig transaction holds at most {} operations, got {}",
            u8::MAX,
            ops.len()
        )));
    }

    let ms_account = dispatcher
        .reader
        .get_account(multisig)
        .await?
        .ok_or_else(|| DispatchError::invalid_account(*multisig, "multisig account not found"))?;
    let ms = Ms::decode(multisig, &ms_account.data)?;

    let (transaction, mut state) = match request.resume {
        Some(Resume::LegacyTransaction(address)) => {
            let account = dispatcher
                .reader
                .get_account(&address)
                .await?
                .ok_or_else(|| DispatchError::invalid_account(address, "transaction account not found"))?;
            let tx = MsTransaction::decode(&address, &account.data)?;
            info!(transaction = %address, status = ?tx.status, added = tx.instruction_index, "Resuming legacy transaction");
            (address, Some(tx))
        }
        _ => {
            let index = ms.transaction_index + 1;
            (squads_v3::transaction_pda(&program_id, multisig, index), None)
        }
    };

    let accounts = TransactionAccounts {
        multisig: *multisig,
        transaction,
        member,
    };
    let authority = squads_v3::authority_pda(&program_id, multisig, authority_index);
    let budget = ComputeBudget::Fixed(dispatcher.settings.step_compute_units);

    let mut result = DispatchResult::new(BackendKind::LegacyMultisig);
    result.address = Some(transaction);

    loop {
        let step = LegacyStep::next(state.as_ref(), ops.len(), &member, request.execute);
        if step == LegacyStep::Done {
            break;
        }

        let ix = step_instruction(&program_id, &accounts, &authority, authority_index, step, ops)?;
        let label = step.label();
        debug!(step = %label, "Submitting legacy step");
        let sent = dispatcher
            .sender
            .send_and_confirm(&label, &[ix], &request.signers, &[], budget)
            .await;
        if !result.record(&label, sent) {
            break;
        }

        match state.as_mut() {
            Some(tx) => advance(tx, step, &member, ms.threshold),
            None => {
                state = Some(MsTransaction {
                    creator: member,
                    ms: *multisig,
                    transaction_index: ms.transaction_index + 1,
                    authority_index,
                    authority_bump: 0,
                    status: MsTransactionStatus::Draft,
                    instruction_index: 0,
                    bump: 0,
                    approved: Vec::new(),
                    rejected: Vec::new(),
                    cancelled: Vec::new(),
                    executed_index: 0,
                })
            }
        }
    }

    if let Some(tx) = &state {
        info!(transaction = %transaction, status = ?tx.status, "Legacy multisig run finished");
    }
    Ok(result)
}

fn step_instruction(
    program_id: &Pubkey,
    accounts: &TransactionAccounts,
    authority: &Pubkey,
    authority_index: u32,
    step: LegacyStep,
    ops: &[Instruction],
) -> Result<Instruction, DispatchError> {
    let op_at = |position: usize| {
        ops.get(position).ok_or_else(|| {
            DispatchError::config(format!(
                "stored transaction expects operation {} but only {} were supplied",
                position + 1,
                ops.len()
            ))
        })
    };

    let ix = match step {
        LegacyStep::Create => squads_v3::create_transaction(program_id, accounts, authority_index),
        LegacyStep::Append(position) => {
            let slot = squads_v3::instruction_pda(program_id, &accounts.transaction, position + 1);
            squads_v3::add_instruction(program_id, accounts, &slot, &op_at(position as usize)?.into())
        }
        LegacyStep::Activate => squads_v3::activate_transaction(program_id, accounts),
        LegacyStep::Approve => squads_v3::approve_transaction(program_id, accounts),
        LegacyStep::Execute(index) => {
            let slot = squads_v3::instruction_pda(program_id, &accounts.transaction, index);
            let inner = op_at(index.saturating_sub(1) as usize)?;
            squads_v3::execute_instruction(program_id, accounts, &slot, authority, inner)
        }
        LegacyStep::Done => return Err(DispatchError::config("no instruction for a finished transaction")),
    };
    Ok(ix)
}
