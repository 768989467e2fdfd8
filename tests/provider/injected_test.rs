//! Injected Bitcoin wallet tests
//!
//! Vendor error normalization, batch signing validation, account change
//! notifications and bounded inscription paging.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use staking_wallet_connector::bitcoin::SignMessageType;
use staking_wallet_connector::config::NetworkType;
use staking_wallet_connector::error::{normalize_vendor_error, WalletError};
use staking_wallet_connector::provider::injected::InjectedProvider;
use staking_wallet_connector::provider::inscriptions::{
    collect_inscriptions_bounded, InscriptionPager, INSCRIPTION_MAX_ITERATIONS,
    INSCRIPTION_PAGE_SIZE,
};
use staking_wallet_connector::provider::{
    BtcProvider, IProvider, ProviderEvent, SignPsbtOptions,
};
use staking_wallet_connector::types::{Account, InscriptionIdentifier};

use crate::common::{test_account, FakeExtension};

const NETWORK: NetworkType = NetworkType::Signet;

async fn connected(extension: FakeExtension) -> (Arc<FakeExtension>, InjectedProvider<FakeExtension>) {
    let extension = Arc::new(extension);
    let provider = InjectedProvider::new("Unisat", Arc::clone(&extension), NETWORK);
    provider.connect_wallet().await.expect("Connect failed");
    (extension, provider)
}

#[test]
fn test_vendor_errors_are_normalized() {
    let wallet = || "Unisat".to_string();
    let cases = vec![
        ("User rejected the request.", WalletError::ConnectionRejected { wallet: wallet() }),
        ("Request DENIED by user", WalletError::ConnectionRejected { wallet: wallet() }),
        ("user canceled", WalletError::ConnectionCanceled { wallet: wallet() }),
        (
            "Extension context invalidated.",
            WalletError::ExtensionContextInvalidated { wallet: wallet() },
        ),
        ("wallet not installed", WalletError::WalletNotFound(wallet())),
        (
            "unsupported version 1.2",
            WalletError::IncompatibleVersion {
                wallet: wallet(),
                reason: String::new(),
            },
        ),
        (
            "socket hang up",
            WalletError::ConnectionFailed {
                wallet: wallet(),
                reason: String::new(),
            },
        ),
    ];

    for (message, expected) in cases {
        let error = normalize_vendor_error("Unisat", message);
        assert_eq!(
            std::mem::discriminant(&error),
            std::mem::discriminant(&expected),
            "{:?} normalized to {:?}",
            message,
            error
        );
    }
}

#[tokio::test]
async fn test_connect_reads_account_from_extension() {
    crate::common::init_logger();
    let (extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;

    assert_eq!(provider.get_address().await.unwrap(), extension.addresses[0]);
    assert_eq!(provider.get_public_key_hex().await.unwrap(), extension.public_key);
    assert_eq!(provider.get_network().await.unwrap(), NETWORK);
    assert_eq!(provider.get_wallet_provider_name(), "Unisat");
}

#[tokio::test]
async fn test_connect_failures() {
    let extension = Arc::new(FakeExtension::with_test_account(NETWORK).failing_connect("User rejected"));
    let provider = InjectedProvider::new("Unisat", Arc::clone(&extension), NETWORK);
    assert!(matches!(
        provider.connect_wallet().await,
        Err(WalletError::ConnectionRejected { .. })
    ));

    let mut empty = FakeExtension::with_test_account(NETWORK);
    empty.addresses.clear();
    let provider = InjectedProvider::new("Unisat", Arc::new(empty), NETWORK);
    assert!(matches!(
        provider.connect_wallet().await,
        Err(WalletError::AddressNotFound { .. })
    ));

    let (_, address) = test_account(NETWORK, 0);
    let keyless = FakeExtension::new(&address, "", NETWORK);
    let provider = InjectedProvider::new("Unisat", Arc::new(keyless), NETWORK);
    assert!(matches!(
        provider.connect_wallet().await,
        Err(WalletError::PublicKeyNotFound { .. })
    ));

    let mainnet = FakeExtension::with_test_account(NETWORK).reporting_network("livenet");
    let provider = InjectedProvider::new("Unisat", Arc::new(mainnet), NETWORK);
    match provider.connect_wallet().await {
        Err(WalletError::NetworkMismatch { expected, actual, .. }) => {
            assert_eq!(expected, "signet");
            assert_eq!(actual, "livenet");
        }
        other => panic!("Expected a network mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_signing_rejection_is_reported_as_signing_error() {
    let (extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;
    *extension.sign_error.lock().unwrap() = Some("User rejected the request".to_string());

    assert!(matches!(
        provider.sign_psbt("70736274ff", None).await,
        Err(WalletError::SigningRejected { .. })
    ));
    assert!(matches!(
        provider.sign_message("hi", SignMessageType::Ecdsa).await,
        Err(WalletError::SigningRejected { .. })
    ));

    *extension.sign_error.lock().unwrap() = Some("internal error".to_string());
    assert!(matches!(
        provider.sign_psbt("70736274ff", None).await,
        Err(WalletError::ConnectionFailed { .. })
    ));
}

#[tokio::test]
async fn test_sign_message_passes_method_through() {
    let (_extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;

    let signature = provider
        .sign_message("stake", SignMessageType::Bip322Simple)
        .await
        .unwrap();
    assert_eq!(signature, "bip322-simple:stake");
}

#[tokio::test]
async fn test_sign_psbts_validates_batch() {
    let (extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;

    assert!(matches!(
        provider.sign_psbts(&[], None).await,
        Err(WalletError::PsbtHexesRequired)
    ));
    assert!(matches!(
        provider
            .sign_psbts(&["aa".to_string(), " ".to_string()], None)
            .await,
        Err(WalletError::PsbtHexRequired)
    ));

    let hexes = vec!["aa".to_string(), "bb".to_string()];
    let options = vec![SignPsbtOptions::default()];
    assert!(matches!(
        provider.sign_psbts(&hexes, Some(&options)).await,
        Err(WalletError::PsbtOptionsLengthMismatch { psbts: 2, options: 1 })
    ));
    assert!(extension.signed.lock().unwrap().is_empty(), "Nothing reaches the wallet");

    let signed = provider.sign_psbts(&hexes, None).await.unwrap();
    assert_eq!(signed, hexes);
}

#[tokio::test]
async fn test_sign_requires_connection_and_hex() {
    let extension = Arc::new(FakeExtension::with_test_account(NETWORK));
    let provider = InjectedProvider::new("Unisat", Arc::clone(&extension), NETWORK);
    assert!(matches!(
        provider.sign_psbt("aa", None).await,
        Err(WalletError::WalletNotConnected { .. })
    ));

    provider.connect_wallet().await.unwrap();
    assert!(matches!(
        provider.sign_psbt("", None).await,
        Err(WalletError::PsbtHexRequired)
    ));
}

#[tokio::test]
async fn test_account_changes_reach_listeners_until_removed() {
    let (_extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let listener = provider
        .on(
            ProviderEvent::AccountChanged,
            Arc::new(move |account: &Account| sink.lock().unwrap().push(account.address.clone())),
        )
        .unwrap();

    let (public_key_hex, address) = test_account(NETWORK, 1);
    provider.handle_account_changed(Account {
        address: address.clone(),
        public_key_hex: public_key_hex.clone(),
    });
    assert_eq!(provider.get_address().await.unwrap(), address);
    assert_eq!(*seen.lock().unwrap(), vec![address.clone()]);

    provider.off(ProviderEvent::AccountChanged, listener).unwrap();
    provider.handle_account_changed(Account {
        address: "tb1pother".to_string(),
        public_key_hex,
    });
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_account_change_ignored_while_disconnected() {
    let (_extension, provider) = connected(FakeExtension::with_test_account(NETWORK)).await;
    provider.disconnect().await.unwrap();

    let (public_key_hex, address) = test_account(NETWORK, 1);
    provider.handle_account_changed(Account {
        address,
        public_key_hex,
    });
    assert!(provider.get_address().await.is_err());
}

// ============================================================================
// Inscriptions
// ============================================================================

#[tokio::test]
async fn test_inscriptions_page_until_short_page() {
    let (extension, provider) =
        connected(FakeExtension::with_test_account(NETWORK).with_inscriptions(Some(250))).await;

    let inscriptions = provider.get_inscriptions().await.unwrap();
    assert_eq!(inscriptions.len(), 250);
    assert_eq!(extension.inscription_calls.load(Ordering::SeqCst), 3);
    assert_eq!(inscriptions[249].txid, format!("{:064x}", 249));
}

#[tokio::test]
async fn test_inscriptions_exact_multiple_needs_empty_page() {
    let (extension, provider) = connected(
        FakeExtension::with_test_account(NETWORK).with_inscriptions(Some(2 * INSCRIPTION_PAGE_SIZE)),
    )
    .await;

    assert_eq!(provider.get_inscriptions().await.unwrap().len(), 2 * INSCRIPTION_PAGE_SIZE);
    assert_eq!(extension.inscription_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_endless_inscriptions_hit_iteration_cap() {
    let (extension, provider) =
        connected(FakeExtension::with_test_account(NETWORK).with_inscriptions(None)).await;

    match provider.get_inscriptions().await {
        Err(WalletError::MaxIterationExceeded { max, .. }) => {
            assert_eq!(max, INSCRIPTION_MAX_ITERATIONS)
        }
        other => panic!("Expected the iteration cap, got {:?}", other.map(|v| v.len())),
    }
    assert_eq!(
        extension.inscription_calls.load(Ordering::SeqCst),
        INSCRIPTION_MAX_ITERATIONS
    );
}

#[tokio::test]
async fn test_bounded_pager_propagates_page_errors() {
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);

    let result = collect_inscriptions_bounded("Unisat", 2, 5, move |cursor, size| {
        let counter = Arc::clone(&counter);
        async move {
            *counter.lock().unwrap() += 1;
            if cursor >= 4 {
                return Err(WalletError::ConnectionFailed {
                    wallet: "Unisat".to_string(),
                    reason: "page failed".to_string(),
                });
            }
            let page: Vec<InscriptionIdentifier> = (cursor..cursor + size)
                .map(|i| InscriptionIdentifier {
                    txid: i.to_string(),
                    vout: 0,
                })
                .collect();
            Ok(page)
        }
    })
    .await;

    assert!(matches!(result, Err(WalletError::ConnectionFailed { .. })));
    assert_eq!(*calls.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_pager_fetches_only_on_demand() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&calls);

    let mut pager = InscriptionPager::new("Unisat", 2, 3, move |cursor, size| {
        log.lock().unwrap().push(cursor);
        async move {
            let page: Vec<InscriptionIdentifier> = (cursor..cursor + size)
                .map(|i| InscriptionIdentifier {
                    txid: i.to_string(),
                    vout: 0,
                })
                .collect();
            Ok(page)
        }
    });
    assert!(calls.lock().unwrap().is_empty(), "Nothing fetched before the first pull");

    let first = pager.next_page().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(*calls.lock().unwrap(), vec![0]);

    assert!(pager.next_page().await.unwrap().is_ok());
    assert!(pager.next_page().await.unwrap().is_ok());
    assert_eq!(pager.iterations(), 3);
    assert_eq!(*calls.lock().unwrap(), vec![0, 2, 4]);

    // Cap reached: one error, then the sequence is over
    assert!(matches!(
        pager.next_page().await,
        Some(Err(WalletError::MaxIterationExceeded { max: 3, .. }))
    ));
    assert!(pager.next_page().await.is_none());
    assert_eq!(calls.lock().unwrap().len(), 3);
}
