//! Wallet management module

use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::Arc;

use crate::batch::submit::SharedSigner;

/// Fee payer and any extra signers loaded for a dispatch
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Create a new wallet manager from a keypair file
    pub fn from_file(path: &str) -> Result<Self> {
        let keypair = read_keypair(path)?;
        Ok(Self {
            keypair: Arc::new(keypair),
        })
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Get the public key
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Get a reference to the keypair
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// The keypair as a signer the engine can share across tasks
    pub fn signer(&self) -> SharedSigner {
        Arc::clone(&self.keypair) as SharedSigner
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

/// Load a keypair from a JSON byte array or 64 raw bytes
///
/// A leading `~/` is expanded with `$HOME`. All-zero keys are rejected.
pub fn read_keypair(path: &str) -> Result<Keypair> {
    let path = expand_home(path);
    let keypair_bytes = std::fs::read(&path).with_context(|| format!("Failed to read keypair file: {}", path))?;

    let bytes = if keypair_bytes.len() == 64 {
        keypair_bytes
    } else {
        let json: Vec<u8> = serde_json::from_slice(&keypair_bytes).context("Failed to parse keypair JSON")?;
        if json.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", json.len());
        }
        json
    };

    if bytes.iter().all(|&b| b == 0) {
        anyhow::bail!("Invalid keypair: all-zero key rejected");
    }
    Keypair::try_from(bytes.as_slice()).context("Invalid keypair bytes")
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_loads_json_keypair() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
        assert_eq!(wallet.signer().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_loads_raw_keypair() {
        let keypair = Keypair::new();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_zero_and_short_keys() {
        let mut zero = NamedTempFile::new().unwrap();
        zero.write_all(serde_json::to_string(&vec![0u8; 64]).unwrap().as_bytes())
            .unwrap();
        assert!(read_keypair(zero.path().to_str().unwrap()).is_err());

        let mut short = NamedTempFile::new().unwrap();
        short.write_all(b"[1,2,3]").unwrap();
        assert!(read_keypair(short.path().to_str().unwrap()).is_err());

        assert!(read_keypair("/nonexistent/keypair.json").is_err());
    }
}
