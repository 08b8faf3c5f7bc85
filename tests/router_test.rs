//! Routing decisions of the dispatcher

mod common;

use batch_dispatch::batch::{Backend, DispatchError, DispatchRequest, DispatchSettings};
use batch_dispatch::programs::{governance, squads_v3, squads_v4};
use batch_dispatch::test_utils::{mock_dispatcher, CallCounts, MockChain};
use common::*;
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};

#[tokio::test]
async fn test_payer_only_batch_routes_direct_without_lookups() {
    let chain = MockChain::new();
    let payer = payer();
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let ops = vec![op_signed_by(&payer.pubkey(), 10), op_signed_by(&payer.pubkey(), 20)];
    let plan = dispatcher.plan(&ops, &[], None).await.unwrap();

    assert_eq!(plan.backend, Backend::Direct);
    assert_eq!(plan.authority, None);
    assert_eq!(chain.calls().lookups(), 0);
}

#[tokio::test]
async fn test_explicit_signer_keeps_batch_direct() {
    let chain = MockChain::new();
    let payer = payer();
    let extra = Keypair::new();
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let ops = vec![op_signed_by(&extra.pubkey(), 10)];
    let plan = dispatcher.plan(&ops, &[extra.pubkey()], None).await.unwrap();

    assert_eq!(plan.backend, Backend::Direct);
    assert_eq!(chain.calls().lookups(), 0);
}

#[tokio::test]
async fn test_two_external_signers_fail_before_any_rpc() {
    let chain = MockChain::new();
    let payer = payer();
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let a = Pubkey::new_unique();
    let b = Pubkey::new_unique();
    let ops = vec![op_signed_by(&a, 10), op_signed_by(&b, 10)];
    let err = dispatcher.plan(&ops, &[], None).await.unwrap_err();

    match err {
        DispatchError::TooManySigners { signers } => {
            assert_eq!(signers.len(), 2);
            assert!(signers.contains(&a) && signers.contains(&b));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(chain.calls(), CallCounts::default());
}

#[tokio::test]
async fn test_dispatch_with_two_external_signers_touches_nothing() {
    let chain = MockChain::new();
    let payer = payer();
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let ops = vec![op_signed_by(&Pubkey::new_unique(), 10), op_signed_by(&Pubkey::new_unique(), 10)];
    let err = dispatcher.dispatch(DispatchRequest::new(ops)).await.unwrap_err();

    assert!(matches!(err, DispatchError::TooManySigners { ref signers } if signers.len() == 2));
    assert_eq!(chain.calls(), CallCounts::default());
    assert!(chain.sent().is_empty());
}

#[tokio::test]
async fn test_v4_vault_routes_to_batch_multisig() {
    let chain = MockChain::new();
    let payer = payer();
    let multisig = install_v4_multisig(&chain, &payer.pubkey(), 3);
    let vault = squads_v4::vault_pda(&squads_v4::PROGRAM_ID, &multisig, 0);
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let ops = vec![op_signed_by(&vault, 10)];
    let first = dispatcher.plan(&ops, &[], Some(multisig)).await.unwrap();
    let second = dispatcher.plan(&ops, &[], Some(multisig)).await.unwrap();

    assert_eq!(
        first.backend,
        Backend::BatchMultisig {
            multisig,
            vault_index: 0
        }
    );
    assert_eq!(first.authority, Some(vault));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_v3_authority_routes_to_legacy_multisig() {
    let chain = MockChain::new();
    let payer = payer();
    let multisig = install_v3_multisig(&chain, &payer.pubkey(), 0, 1);
    let authority = squads_v3::authority_pda(&squads_v3::PROGRAM_ID, &multisig, 1);
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let plan = dispatcher
        .plan(&[op_signed_by(&authority, 10)], &[], Some(multisig))
        .await
        .unwrap();

    assert_eq!(
        plan.backend,
        Backend::LegacyMultisig {
            multisig,
            authority_index: 1
        }
    );
}

#[tokio::test]
async fn test_treasury_routes_to_governance() {
    let chain = MockChain::new();
    let payer = payer();
    let governance_account = install_governance(&chain, &Pubkey::new_unique());
    let treasury = governance::native_treasury_pda(&governance::PROGRAM_ID, &governance_account);
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let plan = dispatcher
        .plan(&[op_signed_by(&treasury, 10)], &[], Some(governance_account))
        .await
        .unwrap();

    assert_eq!(
        plan.backend,
        Backend::Governance {
            governance: governance_account
        }
    );
    assert_eq!(plan.authority, Some(treasury));
}

#[tokio::test]
async fn test_unknown_owner_is_unsupported() {
    let chain = MockChain::new();
    let payer = payer();
    let signer = Pubkey::new_unique();
    let owner = Pubkey::new_unique();
    chain.set_account(signer, owner, vec![]);
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let err = dispatcher.plan(&[op_signed_by(&signer, 10)], &[], None).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::UnsupportedAuthority {
            authority: signer,
            owner: Some(owner)
        }
    );
}

#[tokio::test]
async fn test_missing_authority_account_is_unsupported() {
    let chain = MockChain::new();
    let payer = payer();
    let signer = Pubkey::new_unique();
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let err = dispatcher.plan(&[op_signed_by(&signer, 10)], &[], None).await.unwrap_err();
    assert_eq!(
        err,
        DispatchError::UnsupportedAuthority {
            authority: signer,
            owner: None
        }
    );
}

#[tokio::test]
async fn test_signer_not_controlled_by_authority_is_rejected() {
    let chain = MockChain::new();
    let payer = payer();
    let multisig = install_v4_multisig(&chain, &payer.pubkey(), 3);
    let dispatcher = mock_dispatcher(&chain, &payer, DispatchSettings::default());

    let stranger = Pubkey::new_unique();
    let err = dispatcher
        .plan(&[op_signed_by(&stranger, 10)], &[], Some(multisig))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Configuration(_)));
}
