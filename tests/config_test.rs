//! Configuration loading from disk

use batch_dispatch::config::{Config, ConfigError};
use solana_sdk::pubkey::Pubkey;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_from_file_reads_every_section() {
    let mint = Pubkey::new_unique();
    let file = write_config(&format!(
        r#"
        [rpc]
        url = "http://127.0.0.1:8899"
        commitment = "finalized"

        [wallet]
        keypair_path = "/tmp/payer.json"

        [dispatch]
        max_concurrency = 8
        batch_ceiling = 1000
        legacy_authority_index = 2

        [dispatch.fees]
        fixed_micro_lamports = 5000

        [governance]
        governing_token_mint = "{mint}"
        proposal_name = "Treasury rebalance"
        "#
    ));

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.wallet.keypair_path, "/tmp/payer.json");
    assert_eq!(config.submit_config().unwrap().fees.fixed_micro_lamports, Some(5000));

    let settings = config.dispatch_settings().unwrap();
    assert_eq!(settings.max_concurrency, 8);
    assert_eq!(settings.batch_ceiling, 1000);
    assert_eq!(settings.legacy_authority_index, 2);
    assert_eq!(settings.governance.governing_token_mint, Some(mint));
    assert_eq!(settings.governance.proposal_name, "Treasury rebalance");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::from_file(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("[dispatch]\nmax_concurrency = \"many\"\n");

    let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
    match err {
        ConfigError::Parse { path, .. } => assert_eq!(path, file.path().to_str().unwrap()),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_invalid_mint_fails_validation() {
    let file = write_config("[governance]\ngoverning_token_mint = \"not-a-key\"\n");

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}
