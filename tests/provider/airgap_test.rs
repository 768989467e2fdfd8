//! Air-gapped QR signer tests

use std::sync::Arc;
use std::time::Duration;

use staking_wallet_connector::bitcoin::bip322::verify_simple;
use staking_wallet_connector::bitcoin::psbt::{psbt_from_hex, psbt_to_hex};
use staking_wallet_connector::bitcoin::SignMessageType;
use staking_wallet_connector::config::NetworkType;
use staking_wallet_connector::error::WalletError;
use staking_wallet_connector::provider::airgap::{AirGappedProvider, AirGappedRequest, QrError};
use staking_wallet_connector::provider::{BtcProvider, IProvider, ProviderEvent};
use staking_wallet_connector::types::Account;

use crate::common::{key_spend_psbt, FakeQrChannel, ScanStep, BIP86_FIRST_ADDRESS};

const NETWORK: NetworkType = NetworkType::Mainnet;

fn provider(steps: Vec<ScanStep>) -> (Arc<FakeQrChannel>, AirGappedProvider<FakeQrChannel>) {
    let channel = Arc::new(FakeQrChannel::new(NETWORK, steps));
    let provider = AirGappedProvider::with_timeout(
        "Keystone",
        Arc::clone(&channel),
        NETWORK,
        Duration::from_millis(50),
    );
    (channel, provider)
}

fn export_step() -> ScanStep {
    ScanStep::Payload(FakeQrChannel::account_export(NETWORK))
}

#[tokio::test]
async fn test_connect_imports_scanned_account() {
    crate::common::init_logger();
    let (_channel, signer) = provider(vec![export_step()]);

    signer.connect_wallet().await.expect("Import failed");
    assert_eq!(signer.get_address().await.unwrap(), BIP86_FIRST_ADDRESS);

    let device = signer.device_account().unwrap();
    assert_eq!(device.master_fingerprint, "73c5da0a");
    assert_eq!(device.path, "m/86'/0'/0'");

    signer.disconnect().await.unwrap();
    assert!(signer.device_account().is_none());
    assert!(signer.get_address().await.is_err());
}

#[tokio::test]
async fn test_connect_times_out_without_scan() {
    let (_channel, signer) = provider(vec![ScanStep::Hang]);

    match signer.connect_wallet().await {
        Err(WalletError::Timeout { wallet, .. }) => assert_eq!(wallet, "Keystone"),
        other => panic!("Expected a timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_scanner_failures_map_to_qr_errors() {
    let (_channel, signer) = provider(vec![ScanStep::Fail(QrError::Scan("camera busy".to_string()))]);
    assert!(matches!(
        signer.connect_wallet().await,
        Err(WalletError::QrScan { .. })
    ));

    let (_channel, signer) = provider(vec![ScanStep::Fail(QrError::Read("blurry".to_string()))]);
    assert!(matches!(
        signer.connect_wallet().await,
        Err(WalletError::QrRead { .. })
    ));

    let (_channel, signer) = provider(vec![ScanStep::Payload("not json".to_string())]);
    assert!(matches!(
        signer.connect_wallet().await,
        Err(WalletError::QrRead { .. })
    ));
}

#[tokio::test]
async fn test_psbt_round_trip_displays_request_and_finalizes() {
    let (channel, signer) = provider(vec![export_step(), ScanStep::SignDisplayed]);
    signer.connect_wallet().await.unwrap();

    let unsigned = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    let signed = signer.sign_psbt(&unsigned, None).await.expect("Signing failed");

    let displayed = channel.displayed.lock().unwrap().clone();
    assert_eq!(displayed.len(), 1);
    let request: AirGappedRequest = serde_json::from_str(&displayed[0]).unwrap();
    assert_eq!(request, AirGappedRequest::SignPsbt { psbt_hex: unsigned });

    let psbt = psbt_from_hex(&signed).unwrap();
    assert!(psbt.inputs[0].final_script_witness.is_some());
}

#[tokio::test]
async fn test_signing_times_out_when_device_never_answers() {
    let (channel, signer) = provider(vec![export_step(), ScanStep::Hang]);
    signer.connect_wallet().await.unwrap();

    let unsigned = psbt_to_hex(&key_spend_psbt(NETWORK, &[0]));
    assert!(matches!(
        signer.sign_psbt(&unsigned, None).await,
        Err(WalletError::Timeout { .. })
    ));
    assert_eq!(channel.displayed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bip322_message_via_qr_verifies() {
    let (_channel, signer) = provider(vec![export_step(), ScanStep::SignDisplayed]);
    signer.connect_wallet().await.unwrap();

    let signature = signer
        .sign_message("air-gapped", SignMessageType::Bip322Simple)
        .await
        .expect("BIP-322 signing failed");
    assert!(verify_simple(BIP86_FIRST_ADDRESS, "air-gapped", &signature, NETWORK).unwrap());
}

#[tokio::test]
async fn test_unsupported_features() {
    let (_channel, signer) = provider(vec![export_step()]);
    signer.connect_wallet().await.unwrap();

    assert!(matches!(
        signer.sign_message("hi", SignMessageType::Ecdsa).await,
        Err(WalletError::NotImplemented { .. })
    ));
    assert!(matches!(
        signer.get_inscriptions().await,
        Err(WalletError::NotImplemented { .. })
    ));
    assert!(signer
        .on(ProviderEvent::AccountChanged, Arc::new(|_: &Account| {}))
        .is_err());
    assert!(signer.off(ProviderEvent::AccountChanged, 1).is_err());
}
