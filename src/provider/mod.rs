//! Wallet provider contract
//!
//! Every wallet integration (browser-style extension, local keystore,
//! hardware device, air-gapped signer) implements [`IProvider`] plus the
//! trait of its chain. Providers use interior mutability so they can be
//! shared behind `Arc` by the connector that owns them.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::bitcoin::SignMessageType;
use crate::config::NetworkType;
use crate::error::WalletError;
use crate::types::{Account, InscriptionIdentifier};

pub mod airgap;
pub mod cosmos;
pub mod eth;
pub mod injected;
pub mod inscriptions;
pub mod keystore;
pub mod ledger;
pub mod options;

pub use options::{ContractId, SignPsbtOptions, SigningAction, SigningContract, ToSignInput};

/// Capabilities shared by every chain's providers
#[async_trait]
pub trait IProvider: Send + Sync {
    /// Perform the vendor handshake and load the account
    async fn connect_wallet(&self) -> Result<(), WalletError>;

    async fn get_address(&self) -> Result<String, WalletError>;

    async fn get_public_key_hex(&self) -> Result<String, WalletError>;

    /// Best-effort vendor disconnect
    async fn disconnect(&self) -> Result<(), WalletError> {
        Ok(())
    }

    /// Display name used to tag errors
    fn get_wallet_provider_name(&self) -> String;
}

/// Bitcoin provider capabilities
#[async_trait]
pub trait BtcProvider: IProvider {
    /// Sign a hex PSBT and return the signed hex PSBT
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, WalletError>;

    /// Sign several PSBTs in order
    ///
    /// When `options` is given it must hold one entry per PSBT.
    async fn sign_psbts(
        &self,
        psbts_hexes: &[String],
        options: Option<&[SignPsbtOptions]>,
    ) -> Result<Vec<String>, WalletError> {
        validate_sign_psbts(psbts_hexes, options)?;

        let mut signed = Vec::with_capacity(psbts_hexes.len());
        for (index, psbt_hex) in psbts_hexes.iter().enumerate() {
            let entry = options.map(|options| &options[index]);
            signed.push(self.sign_psbt(psbt_hex, entry).await?);
        }
        Ok(signed)
    }

    async fn get_network(&self) -> Result<NetworkType, WalletError>;

    async fn sign_message(
        &self,
        message: &str,
        method: SignMessageType,
    ) -> Result<String, WalletError>;

    async fn get_inscriptions(&self) -> Result<Vec<InscriptionIdentifier>, WalletError>;

    /// Register a listener; returns its id
    fn on(
        &self,
        event: ProviderEvent,
        callback: AccountChangedCallback,
    ) -> Result<ListenerId, WalletError>;

    fn off(&self, event: ProviderEvent, listener: ListenerId) -> Result<(), WalletError>;
}

/// Cosmos-SDK chain provider capabilities
#[async_trait]
pub trait BbnProvider: IProvider {
    async fn get_chain_id(&self) -> Result<String, WalletError>;

    /// ADR-036 style arbitrary-data signature (base64)
    async fn sign_arbitrary(&self, message: &str) -> Result<String, WalletError>;
}

/// Ethereum provider capabilities
#[async_trait]
pub trait EthProvider: IProvider {
    /// `personal_sign` over the UTF-8 message
    async fn sign_message(&self, message: &str) -> Result<String, WalletError>;

    async fn get_chain_id(&self) -> Result<u64, WalletError>;
}

/// Provider-level events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountChanged,
}

pub type ListenerId = u64;

pub type AccountChangedCallback = Arc<dyn Fn(&Account) + Send + Sync>;

/// Check the arguments of a batch signing request
pub fn validate_sign_psbts(
    psbts_hexes: &[String],
    options: Option<&[SignPsbtOptions]>,
) -> Result<(), WalletError> {
    if psbts_hexes.is_empty() {
        return Err(WalletError::PsbtHexesRequired);
    }
    if psbts_hexes.iter().any(|hex| hex.trim().is_empty()) {
        return Err(WalletError::PsbtHexRequired);
    }
    if let Some(options) = options {
        if options.len() != psbts_hexes.len() {
            return Err(WalletError::PsbtOptionsLengthMismatch {
                psbts: psbts_hexes.len(),
                options: options.len(),
            });
        }
    }
    Ok(())
}

/// `accountChanged` observer list
#[derive(Default)]
pub struct AccountListeners {
    inner: Mutex<ListenerList>,
}

#[derive(Default)]
struct ListenerList {
    next_id: ListenerId,
    callbacks: Vec<(ListenerId, AccountChangedCallback)>,
}

impl AccountListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: AccountChangedCallback) -> ListenerId {
        let mut list = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        list.next_id += 1;
        let id = list.next_id;
        list.callbacks.push((id, callback));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut list = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = list.callbacks.len();
        list.callbacks.retain(|(listener, _)| *listener != id);
        list.callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener; callbacks run outside the lock
    pub fn emit(&self, account: &Account) {
        let callbacks: Vec<AccountChangedCallback> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(account);
        }
    }
}

/// Connected-account slot shared by provider implementations
#[derive(Debug, Default)]
pub(crate) struct AccountSlot {
    account: Mutex<Option<Account>>,
}

impl AccountSlot {
    pub(crate) fn get(&self) -> Option<Account> {
        self.account
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set(&self, account: Option<Account>) {
        *self.account.lock().unwrap_or_else(|e| e.into_inner()) = account;
    }

    /// The account, or `WalletNotConnected` tagged with `wallet`
    pub(crate) fn require(&self, wallet: &str) -> Result<Account, WalletError> {
        self.get().ok_or_else(|| WalletError::WalletNotConnected {
            wallet: wallet.to_string(),
        })
    }
}
