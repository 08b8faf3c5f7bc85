//! On-chain address lookup tables for oversized governance steps

use async_trait::async_trait;
use solana_sdk::{
    address_lookup_table::{
        instruction::{create_lookup_table, deactivate_lookup_table, extend_lookup_table},
        state::AddressLookupTable,
    },
    message::AddressLookupTableAccount,
    pubkey::Pubkey,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

use super::errors::DispatchError;
use super::submit::{ComputeBudget, TxSender};
use crate::rpc::{AccountReader, LookupTableService};

/// Addresses per extend transaction
const EXTEND_CHUNK: usize = 20;

/// Lookup tables created and owned by the fee payer
pub struct OnChainLookupTables {
    sender: TxSender,
    reader: Arc<dyn AccountReader>,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl OnChainLookupTables {
    pub fn new(sender: TxSender, reader: Arc<dyn AccountReader>) -> Self {
        Self {
            sender,
            reader,
            poll_attempts: 30,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.poll_attempts = attempts.max(1);
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl LookupTableService for OnChainLookupTables {
    async fn create(&self, authority: &Pubkey) -> Result<Pubkey, DispatchError> {
        let slot = self.sender.chain().slot().await?;
        let (ix, table) = create_lookup_table(*authority, self.sender.payer(), slot);
        self.sender
            .send_and_confirm("lut_create", &[ix], &[], &[], ComputeBudget::Scaled)
            .await?;
        info!(table = %table, "Lookup table created");
        Ok(table)
    }

    async fn extend(&self, table: &Pubkey, addresses: &[Pubkey]) -> Result<(), DispatchError> {
        let payer = self.sender.payer();
        for chunk in addresses.chunks(EXTEND_CHUNK) {
            let ix = extend_lookup_table(*table, payer, Some(payer), chunk.to_vec());
            self.sender
                .send_and_confirm("lut_extend", &[ix], &[], &[], ComputeBudget::Scaled)
                .await?;
        }
        debug!(table = %table, addresses = addresses.len(), "Lookup table extended");
        Ok(())
    }

    async fn wait_until_active(&self, table: &Pubkey, expected: usize) -> Result<AddressLookupTableAccount, DispatchError> {
        for _ in 0..self.poll_attempts {
            if let Some(account) = self.reader.get_account(table).await? {
                let state = AddressLookupTable::deserialize(&account.data)
                    .map_err(|e| DispatchError::invalid_account(*table, e.to_string()))?;
                // Extensions become usable one slot after they land
                let slot = self.sender.chain().slot().await?;
                if state.addresses.len() >= expected && slot > state.meta.last_extended_slot {
                    return Ok(AddressLookupTableAccount {
                        key: *table,
                        addresses: state.addresses.to_vec(),
                    });
                }
            }
            sleep(self.poll_interval).await;
        }
        Err(DispatchError::Transient(format!(
            "lookup table {} not active after {} polls",
            table, self.poll_attempts
        )))
    }

    async fn close(&self, table: &Pubkey) -> Result<(), DispatchError> {
        // Closing proper is only possible after the deactivation cooldown
        let ix = deactivate_lookup_table(*table, self.sender.payer());
        self.sender
            .send_and_confirm("lut_deactivate", &[ix], &[], &[], ComputeBudget::Scaled)
            .await?;
        info!(table = %table, "Lookup table deactivated");
        Ok(())
    }
}
