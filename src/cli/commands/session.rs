//! Session command implementations
//!
//! The CLI exposes the local keystore as the `keystore` wallet on BTC and
//! BBN. Sessions live in `<data_dir>/session.json`, together with the BTC
//! account index so later commands restore the same account.

use bitcoin::secp256k1::Secp256k1;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use crate::config::{ConfigError, GlobalConfig, NetworkType};
use crate::connector::{
    build_session, ConnectorEvent, MultiChainSession, ProviderContext, WalletCatalog,
    WalletMetadata,
};
use crate::error::WalletError;
use crate::provider::cosmos::CosmosKeystoreProvider;
use crate::provider::keystore::{KeystoreProvider, KEYSTORE_WALLET_ID};
use crate::provider::{BbnProvider, BtcProvider};
use crate::storage::file_system::{load_keystore, FileSystemError};
use crate::storage::models::KeystoreKeys;
use crate::storage::{AccountStorage, StorageError};
use crate::types::{Account, ChainId};

/// Session record key holding the connected BTC account index
pub const BTC_ACCOUNT_INDEX_KEY: &str = "btcAccountIndex";

const ALL_NETWORKS: [NetworkType; 3] = [
    NetworkType::Mainnet,
    NetworkType::Testnet,
    NetworkType::Signet,
];

#[derive(Debug, thiserror::Error)]
pub enum SessionCommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("File system error: {0}")]
    FileSystem(#[from] FileSystemError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Keystore name required (use --keystore <name>)")]
    KeystoreRequired,

    #[error("{0}")]
    InvalidChain(String),

    #[error("{0} is not configured")]
    ChainNotConfigured(ChainId),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),
}

/// Wallet catalog exposing one keystore on BTC and BBN
///
/// The BTC wallet only lists the keystore's own network; its keys are
/// derived for that coin type.
pub fn keystore_catalog(
    name: &str,
    keys: KeystoreKeys,
    network: NetworkType,
    account_index: u32,
) -> WalletCatalog {
    let btc_name = name.to_string();
    let btc_keys = keys.clone();
    let btc = WalletMetadata::<dyn BtcProvider>::new(
        KEYSTORE_WALLET_ID,
        format!("Keystore ({})", name),
        vec![network],
        Arc::new(move |context: &ProviderContext| -> Result<Arc<dyn BtcProvider>, WalletError> {
            let provider = KeystoreProvider::new(btc_name.clone(), btc_keys.clone(), context.network());
            provider.switch_account(account_index)?;
            let provider: Arc<dyn BtcProvider> = Arc::new(provider);
            Ok(provider)
        }),
    );

    let bbn_name = name.to_string();
    let mnemonic = keys.mnemonic;
    let bbn = WalletMetadata::<dyn BbnProvider>::new(
        KEYSTORE_WALLET_ID,
        format!("Keystore ({})", name),
        ALL_NETWORKS.to_vec(),
        Arc::new(move |context: &ProviderContext| -> Result<Arc<dyn BbnProvider>, WalletError> {
            let provider = CosmosKeystoreProvider::from_mnemonic(
                bbn_name.clone(),
                &mnemonic,
                context.config.clone(),
            )?;
            let provider: Arc<dyn BbnProvider> = Arc::new(provider);
            Ok(provider)
        }),
    );

    WalletCatalog::new().with_btc(btc).with_bbn(bbn)
}

/// File-backed session storage under the configured data directory
pub fn session_storage(config: &GlobalConfig) -> Result<AccountStorage, SessionCommandError> {
    let ttl_ms = i64::try_from(config.persistence.ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    Ok(AccountStorage::file_backed(config.data_dir()?, ttl_ms))
}

async fn open_session(
    keystore: Option<&str>,
    password: &str,
    account_index: u32,
    config: &GlobalConfig,
) -> Result<MultiChainSession, SessionCommandError> {
    let name = keystore.ok_or(SessionCommandError::KeystoreRequired)?;
    let secp = Secp256k1::new();
    let (keys, metadata) = load_keystore(&secp, name, password, config.data_dir.as_deref())?;

    let catalog = keystore_catalog(name, keys, metadata.network, account_index);
    let storage = Arc::new(session_storage(config)?);
    Ok(build_session(config, &catalog, storage).await)
}

/// BTC account index recorded by the last `connect`, 0 when absent
pub fn stored_account_index(config: &GlobalConfig) -> Result<u32, SessionCommandError> {
    let stored = session_storage(config)?.get(BTC_ACCOUNT_INDEX_KEY);
    Ok(stored.and_then(|index| index.parse().ok()).unwrap_or(0))
}

fn parse_chain(chain: &str) -> Result<ChainId, SessionCommandError> {
    ChainId::from_str(chain).map_err(SessionCommandError::InvalidChain)
}

/// Connect the keystore wallet on `chain`
pub async fn connect(
    chain: &str,
    keystore: Option<&str>,
    password: &str,
    account_index: u32,
    config: &GlobalConfig,
) -> Result<Account, SessionCommandError> {
    let chain = parse_chain(chain)?;
    let mut session = open_session(keystore, password, account_index, config).await?;

    let last_error: Arc<Mutex<Option<Arc<WalletError>>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&last_error);
    session
        .connector_mut(chain)
        .ok_or(SessionCommandError::ChainNotConfigured(chain))?
        .subscribe(Arc::new(move |event: &ConnectorEvent| {
            if let ConnectorEvent::Error(error) = event {
                *sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(error));
            }
        }));

    match session.connect(chain, KEYSTORE_WALLET_ID).await {
        Some(account) => {
            if chain == ChainId::Btc && config.persistence.enabled {
                session
                    .storage()
                    .set(BTC_ACCOUNT_INDEX_KEY, &account_index.to_string())?;
            }
            println!("✓ Connected {} wallet '{}'", chain, KEYSTORE_WALLET_ID);
            println!();
            println!("  Address:    {}", account.address);
            println!("  Public Key: {}", account.public_key_hex);
            Ok(account)
        }
        None => {
            let reason = last_error
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            Err(SessionCommandError::ConnectFailed(reason))
        }
    }
}

/// Restore stored sessions and print the connected accounts
pub async fn status(
    keystore: Option<&str>,
    password: &str,
    config: &GlobalConfig,
) -> Result<Vec<(ChainId, Account)>, SessionCommandError> {
    let account_index = stored_account_index(config)?;
    let session = open_session(keystore, password, account_index, config).await?;
    let accounts: Vec<(ChainId, Account)> = session.accounts().into_iter().collect();

    println!("Sessions:");
    println!();
    for chain in session.chains() {
        match accounts.iter().find(|(c, _)| *c == chain) {
            Some((_, account)) => println!("  {:<4} connected  {}", chain, account.address),
            None => println!("  {:<4} -", chain),
        }
    }

    Ok(accounts)
}

/// Disconnect `chain` and forget its stored wallet
pub async fn disconnect(
    chain: &str,
    keystore: Option<&str>,
    password: &str,
    config: &GlobalConfig,
) -> Result<(), SessionCommandError> {
    let chain = parse_chain(chain)?;
    let account_index = stored_account_index(config)?;
    let mut session = open_session(keystore, password, account_index, config).await?;

    session.disconnect(chain).await;
    // The stored entry may belong to a wallet that could not be restored
    session.storage().delete(chain.as_str())?;
    if chain == ChainId::Btc {
        session.storage().delete(BTC_ACCOUNT_INDEX_KEY)?;
    }

    println!("✓ Disconnected {}", chain);
    Ok(())
}

/// Print the stored session record
pub fn show(config: &GlobalConfig) -> Result<Vec<(String, String)>, SessionCommandError> {
    let storage = session_storage(config)?;
    let entries = storage.entries();

    match storage.timestamp() {
        Some(ms) => {
            let written = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| ms.to_string());
            println!("Session (written {}):", written);
        }
        None => println!("Session:"),
    }

    if entries.is_empty() {
        println!("  (no live entries)");
    }
    for (chain, wallet_id) in &entries {
        println!("  {:<4} {}", chain, wallet_id);
    }

    Ok(entries)
}

/// Remove every stored session entry
pub fn clear(config: &GlobalConfig) -> Result<(), SessionCommandError> {
    session_storage(config)?.clear()?;
    println!("✓ Session cleared");
    Ok(())
}
