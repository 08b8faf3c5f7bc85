//! Operation model
//!
//! An operation is a plain Solana [`Instruction`]: target program, ordered
//! account metas with signer/writable flags, and opaque data. A [`Bucket`] is
//! a run of operations that must execute in the same transaction.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use std::str::FromStr;

use super::errors::DispatchError;

/// Operations that must land in the same execution unit, in order
pub type Bucket = Vec<Instruction>;

/// Wrap every operation in its own bucket
pub fn singleton_buckets(ops: &[Instruction]) -> Vec<Bucket> {
    ops.iter().map(|ix| vec![ix.clone()]).collect()
}

/// Check whether an operation references `key` in any position
pub fn references(ix: &Instruction, key: &Pubkey) -> bool {
    ix.program_id == *key || ix.accounts.iter().any(|meta| meta.pubkey == *key)
}

/// JSON form of an account reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountSpec {
    pub pubkey: String,
    #[serde(default)]
    pub is_signer: bool,
    #[serde(default)]
    pub is_writable: bool,
}

/// JSON form of an operation, as produced by the domain scripts
///
/// `data` is base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationSpec {
    pub program_id: String,
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub data: String,
}

impl OperationSpec {
    /// Validate and convert into an instruction
    pub fn to_instruction(&self) -> Result<Instruction, DispatchError> {
        let program_id = parse_pubkey(&self.program_id)?;
        let accounts = self
            .accounts
            .iter()
            .map(|acc| {
                Ok(AccountMeta {
                    pubkey: parse_pubkey(&acc.pubkey)?,
                    is_signer: acc.is_signer,
                    is_writable: acc.is_writable,
                })
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;
        let data = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| DispatchError::config(format!("Invalid base64 data for {}: {}", self.program_id, e)))?;

        Ok(Instruction {
            program_id,
            accounts,
            data,
        })
    }

    /// Build the JSON form of an instruction
    pub fn from_instruction(ix: &Instruction) -> Self {
        Self {
            program_id: ix.program_id.to_string(),
            accounts: ix
                .accounts
                .iter()
                .map(|meta| AccountSpec {
                    pubkey: meta.pubkey.to_string(),
                    is_signer: meta.is_signer,
                    is_writable: meta.is_writable,
                })
                .collect(),
            data: BASE64.encode(&ix.data),
        }
    }
}

fn parse_pubkey(s: &str) -> Result<Pubkey, DispatchError> {
    Pubkey::from_str(s).map_err(|e| DispatchError::config(format!("Invalid pubkey '{}': {}", s, e)))
}

/// Parse a JSON array of operations
pub fn parse_operations(json: &str) -> Result<Vec<Instruction>, DispatchError> {
    let specs: Vec<OperationSpec> = serde_json::from_str(json)
        .map_err(|e| DispatchError::config(format!("Invalid operations JSON: {}", e)))?;
    specs.iter().map(OperationSpec::to_instruction).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_spec_conversion() {
        let ix = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                AccountMeta::new(Pubkey::new_unique(), true),
                AccountMeta::new_readonly(Pubkey::new_unique(), false),
            ],
            data: vec![1, 2, 3, 250],
        };

        let spec = OperationSpec::from_instruction(&ix);
        assert_eq!(spec.to_instruction().unwrap(), ix);
    }

    #[test]
    fn test_parse_operations_rejects_bad_pubkey() {
        let json = r#"[{"program_id": "not-a-key", "accounts": [], "data": ""}]"#;
        let err = parse_operations(json).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[test]
    fn test_parse_operations_defaults_flags() {
        let program = Pubkey::new_unique();
        let account = Pubkey::new_unique();
        let json = format!(
            r#"[{{"program_id": "{}", "accounts": [{{"pubkey": "{}"}}]}}]"#,
            program, account
        );
        let ops = parse_operations(&json).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].accounts[0], AccountMeta::new_readonly(account, false));
        assert!(ops[0].data.is_empty());
    }

    #[test]
    fn test_references() {
        let key = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[],
            vec![AccountMeta::new_readonly(key, true)],
        );
        assert!(references(&ix, &key));
        assert!(!references(&ix, &Pubkey::new_unique()));
    }
}
