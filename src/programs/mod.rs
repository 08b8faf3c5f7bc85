//! Typed bindings for the authority programs the dispatcher can drive
//!
//! Each submodule exposes PDA derivations, instruction builders taking typed
//! account structs, and decoders for the account state the backends read.
//! Nothing here performs I/O.

pub mod governance;
pub mod squads_v3;
pub mod squads_v4;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;

use crate::batch::errors::DispatchError;

/// 8-byte Anchor discriminator for `namespace:name`
pub fn anchor_discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let hash = Sha256::digest(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

/// Instruction data for an Anchor method: discriminator followed by borsh args
pub(crate) fn anchor_ix_data<A: BorshSerialize>(method: &str, args: &A) -> Vec<u8> {
    let mut data = anchor_discriminator("global", method).to_vec();
    // Writing into a Vec cannot fail
    args.serialize(&mut data).unwrap_or_default();
    data
}

/// Decode an Anchor account, checking its discriminator
///
/// Trailing bytes (reallocation padding) are ignored.
pub(crate) fn decode_anchor_account<T: BorshDeserialize>(
    account: &Pubkey,
    data: &[u8],
    type_name: &str,
) -> Result<T, DispatchError> {
    if data.len() < 8 {
        return Err(DispatchError::invalid_account(*account, "account data shorter than discriminator"));
    }
    if data[..8] != anchor_discriminator("account", type_name) {
        return Err(DispatchError::invalid_account(
            *account,
            format!("discriminator mismatch, expected {}", type_name),
        ));
    }
    T::deserialize(&mut &data[8..]).map_err(|e| DispatchError::invalid_account(*account, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(BorshSerialize, BorshDeserialize, Debug, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn test_anchor_ix_data_layout() {
        let data = anchor_ix_data("do_thing", &Sample { value: 7 });
        assert_eq!(&data[..8], &anchor_discriminator("global", "do_thing"));
        assert_eq!(&data[8..], &[7, 0, 0, 0]);
    }

    #[test]
    fn test_decode_anchor_account_checks_discriminator() {
        let key = Pubkey::new_unique();
        let mut data = anchor_discriminator("account", "Sample").to_vec();
        data.extend_from_slice(&[9, 0, 0, 0, 0, 0]);

        let decoded: Sample = decode_anchor_account(&key, &data, "Sample").unwrap();
        assert_eq!(decoded, Sample { value: 9 });

        let err = decode_anchor_account::<Sample>(&key, &data, "Other").unwrap_err();
        assert!(matches!(err, DispatchError::InvalidAccountData { .. }));
    }
}
