//! Hardware signer tests
//!
//! Connect, staking policies, PSBT and message signing against the APDU
//! device simulator.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use staking_wallet_connector::bitcoin::bip322::verify_simple;
use staking_wallet_connector::bitcoin::message::verify_ecdsa_message;
use staking_wallet_connector::bitcoin::psbt::{psbt_from_hex, psbt_to_hex};
use staking_wallet_connector::bitcoin::SignMessageType;
use staking_wallet_connector::config::NetworkType;
use staking_wallet_connector::error::WalletError;
use staking_wallet_connector::provider::ledger::apdu::{INS_SIGN_PSBT, P1_LAST, P1_MORE};
use staking_wallet_connector::provider::ledger::policy::{normalize_x_only, NUMS_INTERNAL_KEY};
use staking_wallet_connector::provider::ledger::{
    build_policy, LedgerProvider, PolicyError, RetryPolicy, StakerKey, TransportError,
    WalletPolicy,
};
use staking_wallet_connector::provider::options::MAX_RELATIVE_TIMELOCK_BLOCKS;
use staking_wallet_connector::provider::{
    BtcProvider, ContractId, IProvider, SignPsbtOptions, SigningAction, SigningContract,
};

use crate::common::{
    key_spend_psbt, script_spend_psbt, test_account, DeviceSimulator, BIP86_ACCOUNT_XPUB,
    BIP86_FIRST_ADDRESS,
};

const NETWORK: NetworkType = NetworkType::Mainnet;

fn no_delay(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay: Duration::ZERO,
    }
}

fn provider(device: &Arc<DeviceSimulator>, network: NetworkType) -> LedgerProvider<DeviceSimulator> {
    LedgerProvider::with_retry("Ledger", Arc::clone(device), network, no_delay(3))
}

async fn connected() -> (Arc<DeviceSimulator>, LedgerProvider<DeviceSimulator>) {
    crate::common::init_logger();
    let device = Arc::new(DeviceSimulator::new(NETWORK));
    let ledger = provider(&device, NETWORK);
    ledger.connect_wallet().await.expect("Device connect failed");
    (device, ledger)
}

fn staker_pk() -> String {
    test_account(NETWORK, 0).0
}

fn finality_provider_pk() -> String {
    test_account(NETWORK, 5).0
}

/// Three covenant keys, deliberately unsorted and mixed in format
fn covenant_pks() -> Vec<String> {
    let keys: Vec<String> = (10..13).map(|i| test_account(NETWORK, i).0).collect();
    vec![keys[2].clone(), keys[0][2..].to_string(), keys[1].to_uppercase()]
}

fn staking_contract() -> SigningContract {
    SigningContract::new(
        ContractId::Staking,
        json!({
            "stakerPk": staker_pk(),
            "finalityProviders": [finality_provider_pk()],
            "covenantPks": covenant_pks(),
            "covenantThreshold": 2,
            "stakingDuration": 150,
        }),
    )
}

fn unbonding_contract() -> SigningContract {
    SigningContract::new(
        ContractId::Unbonding,
        json!({
            "stakerPk": staker_pk(),
            "finalityProviders": [finality_provider_pk()],
            "covenantPks": covenant_pks(),
            "covenantThreshold": 2,
            "unbondingTimeBlocks": 101,
        }),
    )
}

fn slashing_contracts() -> Vec<SigningContract> {
    vec![
        staking_contract(),
        SigningContract::new(
            ContractId::Slashing,
            json!({ "unbondingTimeBlocks": 101, "slashingFeeSat": 2_000 }),
        ),
        SigningContract::new(
            ContractId::SlashingBurn,
            json!({ "slashingPkScriptHex": format!("0014{}", "AB".repeat(20)) }),
        ),
    ]
}

fn expected_covenants() -> Vec<String> {
    let mut keys: Vec<String> = (10..13)
        .map(|i| test_account(NETWORK, i).0[2..].to_string())
        .collect();
    keys.sort();
    keys
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_connect_reads_fingerprint_and_account_key() {
    let (device, ledger) = connected().await;

    assert_eq!(ledger.get_address().await.unwrap(), BIP86_FIRST_ADDRESS);
    assert_eq!(ledger.get_public_key_hex().await.unwrap(), staker_pk());
    assert_eq!(ledger.get_network().await.unwrap(), NETWORK);
    assert_eq!(device.command_count(), 2);

    let staker: StakerKey = ledger.staker_key().unwrap();
    assert_eq!(staker.fingerprint.to_string(), "73c5da0a");
    assert_eq!(staker.account_xpub.to_string(), BIP86_ACCOUNT_XPUB);
    assert_eq!(
        staker.key_info(),
        format!("[73c5da0a/86'/0'/0']{}", BIP86_ACCOUNT_XPUB)
    );
}

#[tokio::test]
async fn test_operations_require_connection() {
    let device = Arc::new(DeviceSimulator::new(NETWORK));
    let ledger = provider(&device, NETWORK);

    assert!(matches!(
        ledger.get_address().await,
        Err(WalletError::WalletNotConnected { .. })
    ));
    assert!(matches!(
        ledger.sign_message("hi", SignMessageType::Ecdsa).await,
        Err(WalletError::WalletNotConnected { .. })
    ));
    assert_eq!(device.command_count(), 0);
}

#[tokio::test]
async fn test_disconnect_forgets_the_device_session() {
    let (_device, ledger) = connected().await;
    ledger.disconnect().await.unwrap();
    assert!(ledger.staker_key().is_err());
}

#[tokio::test]
async fn test_transient_io_failures_are_retried() {
    let device = Arc::new(DeviceSimulator::new(NETWORK));
    device.fail_next(2);
    let ledger = provider(&device, NETWORK);

    ledger.connect_wallet().await.expect("Third attempt should succeed");
    // Two failures, then fingerprint and xpub
    assert_eq!(device.attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let device = Arc::new(DeviceSimulator::new(NETWORK));
    device.fail_next(3);
    let ledger = provider(&device, NETWORK);

    let result = ledger.connect_wallet().await;
    assert!(matches!(
        result,
        Err(WalletError::Transport(TransportError::Io(_)))
    ));
    assert_eq!(device.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_device_status_words_are_not_retried() {
    // Device holds mainnet keys; a signet provider asks for the wrong path
    let device = Arc::new(DeviceSimulator::new(NETWORK));
    let ledger = provider(&device, NetworkType::Signet);

    let result = ledger.connect_wallet().await;
    assert!(matches!(
        result,
        Err(WalletError::Transport(TransportError::Status(0x6A80)))
    ));
    assert_eq!(device.attempts.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Policies
// ============================================================================

#[tokio::test]
async fn test_staking_policy_orders_keys_and_sorts_covenants() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let policy = build_policy(SigningAction::Staking, &[staking_contract()], &staker).unwrap();

    let mut expected_keys = vec![
        NUMS_INTERNAL_KEY.to_string(),
        staker.key_info(),
        finality_provider_pk()[2..].to_string(),
    ];
    expected_keys.extend(expected_covenants());
    assert_eq!(policy.keys, expected_keys);
    assert_eq!(policy.covenant_public_keys, expected_covenants());
    assert_eq!(policy.covenant_threshold, 2);
    assert_eq!(policy.timelock, 150);
    assert_eq!(
        policy.descriptor_template,
        "tr(@0,{and_v(v:pk(@1/**),older(150)),{and_v(v:pk(@1/**),multi_a(2,@3,@4,@5)),\
         and_v(v:pk(@1/**),and_v(v:pk(@2),multi_a(2,@3,@4,@5)))}})"
    );
}

#[tokio::test]
async fn test_unbonding_policy_uses_unbonding_timelock() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let policy = build_policy(
        SigningAction::Unbonding,
        &[unbonding_contract(), staking_contract()],
        &staker,
    )
    .unwrap();
    assert_eq!(policy.name, "Unbonding");
    assert_eq!(policy.timelock, 101);
    assert!(policy.descriptor_template.contains("older(150)"));
}

#[tokio::test]
async fn test_slashing_policy_carries_terms() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let policy = build_policy(SigningAction::Slashing, &slashing_contracts(), &staker).unwrap();
    let terms = policy.slashing.expect("Slashing terms should be set");
    assert_eq!(terms.pk_script_hex, format!("0014{}", "ab".repeat(20)));
    assert_eq!(terms.fee_sat, 2_000);
    assert_eq!(policy.timelock, 101);
}

#[tokio::test]
async fn test_withdraw_policy_is_a_single_timelock_leaf() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let contract = SigningContract::new(ContractId::Withdraw, json!({ "timelockBlocks": 64 }));
    let policy = build_policy(SigningAction::Withdraw, &[contract], &staker).unwrap();
    assert_eq!(policy.descriptor_template, "tr(@0,and_v(v:pk(@1/**),older(64)))");
    assert_eq!(policy.keys, vec![NUMS_INTERNAL_KEY.to_string(), staker.key_info()]);
}

#[tokio::test]
async fn test_missing_contract_fails_before_talking_to_device() {
    let (device, ledger) = connected().await;
    let before = device.command_count();

    let psbt_hex = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    let options = SignPsbtOptions::for_action(SigningAction::Unbonding, vec![staking_contract()]);
    let result = ledger.sign_psbt(&psbt_hex, Some(&options)).await;

    assert!(matches!(
        result,
        Err(WalletError::Policy(PolicyError::MissingContract(ContractId::Unbonding)))
    ));
    assert_eq!(device.command_count(), before);
}

#[tokio::test]
async fn test_policy_rejects_foreign_staker_and_bad_threshold() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let mut foreign = staking_contract();
    foreign
        .params
        .insert("stakerPk".to_string(), json!(test_account(NETWORK, 1).0));
    match build_policy(SigningAction::Staking, &[foreign], &staker) {
        Err(PolicyError::InvalidParam { param, .. }) => assert_eq!(param, "stakerPk"),
        other => panic!("Expected stakerPk rejection, got {:?}", other),
    }

    let mut greedy = staking_contract();
    greedy.params.insert("covenantThreshold".to_string(), json!(4));
    match build_policy(SigningAction::Staking, &[greedy], &staker) {
        Err(PolicyError::InvalidParam { param, .. }) => assert_eq!(param, "covenantThreshold"),
        other => panic!("Expected threshold rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_policy_rejects_timelocks_older_cannot_encode() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    for blocks in [0u64, MAX_RELATIVE_TIMELOCK_BLOCKS + 1, u64::from(u32::MAX) + 1] {
        let contract = SigningContract::new(ContractId::Withdraw, json!({ "timelockBlocks": blocks }));
        match build_policy(SigningAction::Withdraw, &[contract], &staker) {
            Err(PolicyError::InvalidParam { param, .. }) => assert_eq!(param, "timelockBlocks"),
            other => panic!("Expected {} blocks to be rejected, got {:?}", blocks, other),
        }
    }

    let mut long_stake = staking_contract();
    long_stake
        .params
        .insert("stakingDuration".to_string(), json!(MAX_RELATIVE_TIMELOCK_BLOCKS + 1));
    match build_policy(SigningAction::Staking, &[long_stake], &staker) {
        Err(PolicyError::InvalidParam { param, .. }) => assert_eq!(param, "stakingDuration"),
        other => panic!("Expected stakingDuration rejection, got {:?}", other),
    }

    let edge = SigningContract::new(
        ContractId::Withdraw,
        json!({ "timelockBlocks": MAX_RELATIVE_TIMELOCK_BLOCKS }),
    );
    assert!(build_policy(SigningAction::Withdraw, &[edge], &staker).is_ok());
}

#[test]
fn test_covenant_key_with_multibyte_character_is_invalid() {
    let garbled = format!("0€{}", "a".repeat(62));
    assert_eq!(garbled.len(), 66);
    assert!(matches!(
        normalize_x_only(&garbled),
        Err(PolicyError::InvalidKey(_))
    ));
}

#[tokio::test]
async fn test_policy_fields_too_wide_for_wire_form_fail() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();
    let contract = SigningContract::new(ContractId::Withdraw, json!({ "timelockBlocks": 64 }));
    let policy = build_policy(SigningAction::Withdraw, &[contract], &staker).unwrap();

    let mut huge_timelock = policy.clone();
    huge_timelock.timelock = u64::from(u32::MAX) + 1;
    assert!(matches!(huge_timelock.to_bytes(), Err(PolicyError::Malformed(_))));

    let mut huge_threshold = policy.clone();
    huge_threshold.covenant_threshold = 256;
    assert!(matches!(huge_threshold.to_bytes(), Err(PolicyError::Malformed(_))));

    let mut long_name = policy;
    long_name.name = "n".repeat(256);
    assert!(matches!(long_name.to_bytes(), Err(PolicyError::Malformed(_))));
}

#[tokio::test]
async fn test_policy_wire_form_round_trips() {
    let (_device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();
    let policy = build_policy(SigningAction::Slashing, &slashing_contracts(), &staker).unwrap();

    let parsed = WalletPolicy::from_bytes(&policy.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed.name, policy.name);
    assert_eq!(parsed.descriptor_template, policy.descriptor_template);
    assert_eq!(parsed.keys, policy.keys);
    assert_eq!(parsed.slashing, policy.slashing);
    assert_eq!(parsed.timelock, policy.timelock);
    // Not part of the wire form
    assert_eq!(parsed.action, None);
    assert!(parsed.covenant_public_keys.is_empty());

    let bytes = policy.to_bytes().unwrap();
    assert!(matches!(
        WalletPolicy::from_bytes(&bytes[..bytes.len() - 3]),
        Err(PolicyError::Malformed(_))
    ));
}

// ============================================================================
// Signing
// ============================================================================

#[tokio::test]
async fn test_key_path_psbt_is_signed_and_finalized() {
    let (device, ledger) = connected().await;

    let psbt_hex = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    let signed_hex = ledger.sign_psbt(&psbt_hex, None).await.expect("Signing failed");
    let signed = psbt_from_hex(&signed_hex).unwrap();

    assert!(signed.inputs[0].final_script_witness.is_some());
    let policy = device.last_policy.lock().unwrap().clone().unwrap();
    assert_eq!(policy.descriptor_template, "tr(@0/**)");

    // The payload went out in chunks, only the last without P1_MORE
    let commands = device.commands.lock().unwrap();
    let sign_commands: Vec<_> = commands.iter().filter(|c| c.ins == INS_SIGN_PSBT).collect();
    let (last, rest) = sign_commands.split_last().unwrap();
    assert_eq!(last.p1, P1_LAST);
    assert!(rest.iter().all(|c| c.p1 == P1_MORE));
}

#[tokio::test]
async fn test_unfinalized_signing_keeps_signature_fields() {
    let (_device, ledger) = connected().await;

    let options = SignPsbtOptions {
        auto_finalized: false,
        ..SignPsbtOptions::default()
    };
    let psbt_hex = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    let signed = psbt_from_hex(&ledger.sign_psbt(&psbt_hex, Some(&options)).await.unwrap()).unwrap();

    assert!(signed.inputs[0].final_script_witness.is_none());
    assert!(signed.inputs[0].tap_key_sig.is_some());
}

#[tokio::test]
async fn test_withdraw_signs_script_path_with_key_origin() {
    let (device, ledger) = connected().await;
    let staker = ledger.staker_key().unwrap();

    let contract = SigningContract::new(ContractId::Withdraw, json!({ "timelockBlocks": 150 }));
    let options = SignPsbtOptions::for_action(SigningAction::Withdraw, vec![contract]);
    let psbt_hex = psbt_to_hex(&script_spend_psbt(NETWORK));

    let signed = psbt_from_hex(&ledger.sign_psbt(&psbt_hex, Some(&options)).await.unwrap()).unwrap();
    let input = &signed.inputs[0];

    assert_eq!(input.tap_script_sigs.len(), 1);
    assert!(input.final_script_witness.is_none(), "Script paths are finalized by the caller");
    let (leaves, (fingerprint, _path)) = input
        .tap_key_origins
        .get(&staker.x_only)
        .expect("Staker key origin should be attached");
    assert_eq!(leaves.len(), 1);
    assert_eq!(*fingerprint, staker.fingerprint);

    let policy = device.last_policy.lock().unwrap().clone().unwrap();
    assert_eq!(policy.name, "Withdraw");
}

#[tokio::test]
async fn test_empty_psbt_is_rejected() {
    let (_device, ledger) = connected().await;
    assert!(matches!(
        ledger.sign_psbt("  ", None).await,
        Err(WalletError::PsbtHexRequired)
    ));
}

#[tokio::test]
async fn test_bip322_signature_from_device_verifies() {
    let (_device, ledger) = connected().await;

    let signature = ledger
        .sign_message("Stake with Ledger", SignMessageType::Bip322Simple)
        .await
        .expect("BIP-322 signing failed");
    assert!(verify_simple(BIP86_FIRST_ADDRESS, "Stake with Ledger", &signature, NETWORK).unwrap());
}

#[tokio::test]
async fn test_ecdsa_signature_from_device_verifies() {
    let (_device, ledger) = connected().await;

    let signature = ledger
        .sign_message("hello device", SignMessageType::Ecdsa)
        .await
        .expect("ECDSA signing failed");
    assert!(verify_ecdsa_message("hello device", &signature, &staker_pk()).unwrap());
}

#[tokio::test]
async fn test_denied_signing_is_rejection() {
    let (device, ledger) = connected().await;
    device.deny_signing();

    assert!(matches!(
        ledger.sign_message("no", SignMessageType::Ecdsa).await,
        Err(WalletError::SigningRejected { .. })
    ));
    let psbt_hex = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    assert!(matches!(
        ledger.sign_psbt(&psbt_hex, None).await,
        Err(WalletError::SigningRejected { .. })
    ));
}

#[tokio::test]
async fn test_inscriptions_are_not_available() {
    let (_device, ledger) = connected().await;
    assert!(matches!(
        ledger.get_inscriptions().await,
        Err(WalletError::NotImplemented { .. })
    ));
}
