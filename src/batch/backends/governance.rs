//! SPL Governance backend
//!
//! Operations the native treasury must sign become transactions of a single
//! proposal; everything else is sent directly first. Proposal steps are
//! strictly sequential since each one depends on the state the previous one
//! left behind.

use solana_sdk::{
    instruction::Instruction,
    message::AddressLookupTableAccount,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use spl_associated_token_account::get_associated_token_address;
use spl_token::solana_program::program_pack::Pack;
use std::collections::BTreeSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{BackendKind, DispatchResult};
use crate::batch::errors::DispatchError;
use crate::batch::operation::{references, singleton_buckets};
use crate::batch::packer::pack;
use crate::batch::router::{DispatchRequest, Dispatcher};
use crate::batch::size::{InsertTransactionSizeEstimator, SizeEstimator, TransactionSizeEstimator};
use crate::batch::submit::ComputeBudget;
use crate::programs::governance::{self, ProposalAccounts, ProposalState};

pub(crate) async fn run(
    dispatcher: &Dispatcher,
    request: &DispatchRequest,
    governance_account: &Pubkey,
) -> Result<DispatchResult, DispatchError> {
    let program_id = dispatcher.settings.programs.governance;
    let settings = &dispatcher.settings.governance;
    let mint = settings
        .governing_token_mint
        .ok_or_else(|| DispatchError::config("governing token mint is required for governance dispatch"))?;
    let owner = dispatcher.fee_payer();
    let treasury = governance::native_treasury_pda(&program_id, governance_account);
    let budget = ComputeBudget::Fixed(dispatcher.settings.step_compute_units);

    let account = dispatcher
        .reader
        .get_account(governance_account)
        .await?
        .ok_or_else(|| DispatchError::invalid_account(*governance_account, "governance account not found"))?;
    let realm = governance::governance_realm(governance_account, &account.data)?;

    let seed = request.proposal_seed.unwrap_or_else(|| Keypair::new().pubkey());
    let accounts = ProposalAccounts {
        realm,
        governance: *governance_account,
        governing_token_mint: mint,
        proposal: governance::proposal_pda(&program_id, governance_account, &mint, &seed),
        token_owner_record: governance::token_owner_record_pda(&program_id, &realm, &mint, &owner),
        owner,
        payer: owner,
    };

    let (treasury_ops, direct_ops): (Vec<(usize, Instruction)>, Vec<(usize, Instruction)>) = request
        .operations
        .iter()
        .cloned()
        .enumerate()
        .partition(|(_, ix)| references(ix, &treasury));
    let treasury_ops: Vec<Instruction> = treasury_ops.into_iter().map(|(_, ix)| ix).collect();
    if treasury_ops.len() > u16::MAX as usize {
        return Err(DispatchError::config(format!(
            "a proposal holds at most {} transactions, got {}",
            u16::MAX,
            treasury_ops.len()
        )));
    }

    let mut result = DispatchResult::new(BackendKind::Governance);
    result.address = Some(accounts.proposal);
    let flow = ProposalFlow {
        dispatcher,
        request,
        program_id,
        accounts,
        treasury,
        budget,
    };

    if !direct_ops.is_empty() && !flow.send_direct(&direct_ops, &mut result).await {
        return Ok(result);
    }
    if treasury_ops.is_empty() {
        return Ok(result);
    }

    // Proposal state left behind by an earlier run with the same seed
    let existing_state = match dispatcher.reader.get_account(&accounts.proposal).await? {
        Some(account) => Some(governance::proposal_state(&accounts.proposal, &account.data)?),
        None => None,
    };

    if existing_state.is_none() {
        if !flow.prepare_owner(&mut result).await? {
            return Ok(result);
        }
    } else {
        info!(proposal = %accounts.proposal, state = ?existing_state, "Resuming proposal");
    }

    if existing_state.is_none() {
        let create = governance::create_proposal(
            &program_id,
            &accounts,
            &settings.proposal_name,
            &settings.description_link,
            &seed,
        );
        let signatory = governance::add_signatory(&program_id, &accounts);
        let sent = dispatcher
            .sender
            .send_and_confirm("proposal_create", &[create, signatory], &request.signers, &[], budget)
            .await;
        if !result.record("proposal_create", sent) {
            return Ok(result);
        }
    }

    if matches!(existing_state, None | Some(ProposalState::Draft)) {
        let slots: Vec<Pubkey> = (0..treasury_ops.len())
            .map(|i| governance::proposal_transaction_pda(&program_id, &accounts.proposal, 0, i as u16))
            .collect();
        let inserted = dispatcher.reader.get_multiple_accounts(&slots).await?;
        let estimator = InsertTransactionSizeEstimator { program_id, accounts };

        for (index, op) in treasury_ops.iter().enumerate() {
            if inserted.get(index).map(|a| a.is_some()).unwrap_or(false) {
                debug!(index, "Proposal transaction already inserted");
                continue;
            }
            let fits = estimator.measure(std::slice::from_ref(op)) <= dispatcher.settings.unit_ceiling;
            let ix = governance::insert_transaction(&program_id, &accounts, index as u16, op);
            let label = format!("proposal_insert_{}", index);
            let sent = flow.send_with_lookup_fallback(&label, ix, fits).await;
            if !result.record(&label, sent) {
                return Ok(result);
            }
        }

        let sign_off = governance::sign_off_proposal(&program_id, &accounts);
        let sent = dispatcher
            .sender
            .send_and_confirm("proposal_sign_off", &[sign_off], &request.signers, &[], budget)
            .await;
        if !result.record("proposal_sign_off", sent) {
            return Ok(result);
        }
        info!(proposal = %accounts.proposal, transactions = treasury_ops.len(), "Proposal signed off");
    }

    if request.execute {
        flow.execute(&treasury_ops, existing_state, &mut result).await?;
    }
    Ok(result)
}

struct ProposalFlow<'a> {
    dispatcher: &'a Dispatcher,
    request: &'a DispatchRequest,
    program_id: Pubkey,
    accounts: ProposalAccounts,
    treasury: Pubkey,
    budget: ComputeBudget,
}

impl ProposalFlow<'_> {
    async fn send(&self, label: &str, ixs: &[Instruction], luts: &[AddressLookupTableAccount]) -> Result<Signature, DispatchError> {
        self.dispatcher
            .sender
            .send_and_confirm(label, ixs, &self.request.signers, luts, self.budget)
            .await
    }

    /// Send operations the treasury does not sign, packed and in order
    async fn send_direct(&self, positioned: &[(usize, Instruction)], result: &mut DispatchResult) -> bool {
        let ops: Vec<Instruction> = positioned.iter().map(|(_, ix)| ix.clone()).collect();
        let estimator = TransactionSizeEstimator::new(self.dispatcher.fee_payer());
        let outcome = pack(&singleton_buckets(&ops), self.dispatcher.settings.unit_ceiling, &estimator);
        if !outcome.is_complete() {
            warn!(failed = ?outcome.failed, "Direct operations too large to send are skipped");
            result
                .failed_buckets
                .extend(outcome.failed.iter().filter_map(|&i| positioned.get(i).map(|(pos, _)| *pos)));
        }
        info!(operations = ops.len(), units = outcome.units.len(), "Sending non-treasury operations directly");

        for (i, unit) in outcome.units.iter().enumerate() {
            let label = format!("governance_direct_{}", i);
            let sent = self
                .dispatcher
                .sender
                .send_and_confirm(&label, &unit.instructions, &self.request.signers, &[], ComputeBudget::Scaled)
                .await;
            if !result.record(&label, sent) {
                return false;
            }
        }
        true
    }

    /// Ensure a token owner record and deposit the owner's governing tokens
    ///
    /// Returns false when a step failed.
    async fn prepare_owner(&self, result: &mut DispatchResult) -> Result<bool, DispatchError> {
        let reader = &self.dispatcher.reader;
        let accounts = &self.accounts;

        if reader.get_account(&accounts.token_owner_record).await?.is_none() {
            let ix = governance::create_token_owner_record(&self.program_id, accounts);
            let sent = self.send("token_owner_record", &[ix], &[]).await;
            if !result.record("token_owner_record", sent) {
                return Ok(false);
            }
        }

        let source = get_associated_token_address(&accounts.owner, &accounts.governing_token_mint);
        let balance = match reader.get_account(&source).await? {
            Some(account) => {
                spl_token::state::Account::unpack(&account.data)
                    .map_err(|e| DispatchError::invalid_account(source, e.to_string()))?
                    .amount
            }
            None => 0,
        };
        if balance == 0 {
            return Ok(true);
        }

        let ix = governance::deposit_governing_tokens(&self.program_id, accounts, &source, balance);
        let sent = self.send("deposit_governing_tokens", &[ix], &[]).await;
        if !result.record("deposit_governing_tokens", sent) {
            return Ok(false);
        }
        info!(amount = balance, "Governing tokens deposited");
        Ok(true)
    }

    /// Send `ix`, retrying once through a temporary lookup table on overflow
    ///
    /// With `try_plain` unset the plain attempt is skipped and the table is
    /// built straight away.
    async fn send_with_lookup_fallback(
        &self,
        label: &str,
        ix: Instruction,
        try_plain: bool,
    ) -> Result<Signature, DispatchError> {
        if try_plain {
            match self.send(label, std::slice::from_ref(&ix), &[]).await {
                Err(DispatchError::Overflow { size, limit }) => {
                    info!(step = label, size, limit, "Unit too large, retrying through a lookup table");
                }
                other => return other,
            }
        } else {
            debug!(step = label, "Unit estimated over the ceiling, using a lookup table");
        }

        let lookup_tables = &self.dispatcher.lookup_tables;
        let addresses = lookup_candidates(&ix, &self.accounts.payer);
        let table = lookup_tables.create(&self.accounts.payer).await?;

        let sent = async {
            lookup_tables.extend(&table, &addresses).await?;
            let account = lookup_tables.wait_until_active(&table, addresses.len()).await?;
            self.send(label, std::slice::from_ref(&ix), &[account]).await
        }
        .await;

        if let Err(e) = lookup_tables.close(&table).await {
            warn!(table = %table, error = %e, "Failed to close lookup table");
        }
        sent
    }

    async fn execute(
        &self,
        ops: &[Instruction],
        existing_state: Option<ProposalState>,
        result: &mut DispatchResult,
    ) -> Result<(), DispatchError> {
        let program_id = &self.program_id;
        let accounts = &self.accounts;
        let reader = &self.dispatcher.reader;

        let vote_record = governance::vote_record_pda(program_id, &accounts.proposal, &accounts.token_owner_record);
        let voting_closed = existing_state.is_some_and(|state| {
            !matches!(state, ProposalState::Draft | ProposalState::SigningOff | ProposalState::Voting)
        });
        let has_vote = if reader.get_account(&vote_record).await?.is_some() {
            debug!(vote_record = %vote_record, "Vote already cast");
            true
        } else if voting_closed {
            false
        } else {
            let vote = governance::cast_approve_vote(program_id, accounts);
            let sent = self.send("cast_vote", &[vote], &[]).await;
            if !result.record("cast_vote", sent) {
                return Ok(());
            }
            true
        };

        if !self.wait_executable().await? {
            return Ok(());
        }

        let slots: Vec<Pubkey> = (0..ops.len())
            .map(|i| governance::proposal_transaction_pda(program_id, &accounts.proposal, 0, i as u16))
            .collect();
        let stored = reader.get_multiple_accounts(&slots).await?;

        for (index, op) in ops.iter().enumerate() {
            // Executed transactions carry a non-zero executed_at timestamp
            if stored.get(index).and_then(|a| a.as_ref()).is_some_and(|a| is_executed(&a.data)) {
                debug!(index, "Proposal transaction already executed");
                continue;
            }
            let ix = governance::execute_transaction(program_id, accounts, index as u16, &self.treasury, op);
            let label = format!("proposal_execute_{}", index);
            let sent = self.send_with_lookup_fallback(&label, ix, true).await;
            if !result.record(&label, sent) {
                return Ok(());
            }
        }
        info!(proposal = %accounts.proposal, "Proposal executed");

        if has_vote {
            let relinquish = governance::relinquish_vote(program_id, accounts);
            let sent = self.send("relinquish_vote", &[relinquish], &[]).await;
            if !result.record("relinquish_vote", sent) {
                return Ok(());
            }
        }

        // Deposits made by any earlier run are withdrawn too
        let deposit = match reader.get_account(&accounts.token_owner_record).await? {
            Some(account) => governance::token_owner_deposit(&accounts.token_owner_record, &account.data)?,
            None => 0,
        };
        if deposit == 0 {
            return Ok(());
        }

        let destination = get_associated_token_address(&accounts.owner, &accounts.governing_token_mint);
        let withdraw = governance::withdraw_governing_tokens(program_id, accounts, &destination);
        let sent = self.send("withdraw_governing_tokens", &[withdraw], &[]).await;
        if result.record("withdraw_governing_tokens", sent) {
            info!(amount = deposit, "Governing tokens withdrawn");
        }
        Ok(())
    }

    /// Poll the proposal until it can be executed; false when it timed out
    async fn wait_executable(&self) -> Result<bool, DispatchError> {
        let settings = &self.dispatcher.settings.governance;
        let proposal = &self.accounts.proposal;

        for attempt in 0..settings.execution_poll_attempts.max(1) {
            if let Some(account) = self.dispatcher.reader.get_account(proposal).await? {
                let state = governance::proposal_state(proposal, &account.data)?;
                if state.is_executable() {
                    return Ok(true);
                }
                if state.is_terminal_failure() {
                    return Err(DispatchError::Deterministic(format!("proposal {} ended as {:?}", proposal, state)));
                }
                debug!(attempt, state = ?state, "Proposal not executable yet");
            }
            sleep(settings.execution_poll_interval).await;
        }

        warn!(proposal = %proposal, "Proposal did not become executable, execute later");
        Ok(false)
    }
}

/// Accounts of `ix` a lookup table may carry: no signers, no invoked program
fn lookup_candidates(ix: &Instruction, payer: &Pubkey) -> Vec<Pubkey> {
    let keys: BTreeSet<Pubkey> = ix
        .accounts
        .iter()
        .filter(|meta| !meta.is_signer && meta.pubkey != *payer && meta.pubkey != ix.program_id)
        .map(|meta| meta.pubkey)
        .collect();
    keys.into_iter().collect()
}

/// ProposalTransaction stores `executed_at: Option<i64>` after its instructions
fn is_executed(data: &[u8]) -> bool {
    // account_type, proposal, option_index, transaction_index, hold_up_time
    const FIXED: usize = 1 + 32 + 1 + 2 + 4;
    let Some(rest) = data.get(FIXED..) else {
        return false;
    };
    let Some(len_bytes) = rest.get(..4) else {
        return false;
    };
    let count = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

    let mut offset = 4;
    for _ in 0..count {
        // program_id, accounts vec, data vec
        offset += 32;
        let Some(n) = read_u32(rest, offset) else { return false };
        offset += 4 + n as usize * 34;
        let Some(d) = read_u32(rest, offset) else { return false };
        offset += 4 + d as usize;
    }
    rest.get(offset).copied() == Some(1)
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    #[test]
    fn test_lookup_candidates_skip_signers_and_program() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ix = Instruction {
            program_id: program,
            accounts: vec![
                AccountMeta::new(payer, true),
                AccountMeta::new(a, false),
                AccountMeta::new_readonly(b, false),
                AccountMeta::new_readonly(a, false),
                AccountMeta::new_readonly(program, false),
            ],
            data: vec![],
        };

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(lookup_candidates(&ix, &payer), expected);
    }

    #[test]
    fn test_executed_flag_after_instructions() {
        let mut data = vec![0u8; 1 + 32 + 1 + 2 + 4];
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[7u8; 32]);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[9u8; 34]);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&[1, 2]);

        let mut pending = data.clone();
        pending.push(0);
        assert!(!is_executed(&pending));

        data.push(1);
        data.extend_from_slice(&1_700_000_000i64.to_le_bytes());
        assert!(is_executed(&data));

        assert!(!is_executed(&[0u8; 8]));
    }
}
