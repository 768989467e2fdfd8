//! Injected (extension-style) Bitcoin wallets
//!
//! The vendor object is reached through [`BtcExtension`]. Its errors are
//! plain strings that get normalized into [`WalletError`] here, tagged with
//! the wallet name.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;

use crate::bitcoin::SignMessageType;
use crate::config::NetworkType;
use crate::error::{normalize_vendor_error, WalletError};
use crate::provider::inscriptions::collect_inscriptions;
use crate::provider::{
    validate_sign_psbts, AccountChangedCallback, AccountListeners, AccountSlot, BtcProvider,
    IProvider, ListenerId, ProviderEvent, SignPsbtOptions,
};
use crate::types::{Account, InscriptionIdentifier};

/// Vendor boundary of an injected Bitcoin wallet
#[async_trait]
pub trait BtcExtension: Send + Sync {
    /// Prompt for access; returns the wallet's addresses
    async fn request_accounts(&self) -> Result<Vec<String>, String>;

    async fn get_public_key(&self) -> Result<String, String>;

    /// Network name as the vendor reports it
    async fn get_network(&self) -> Result<String, String>;

    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, String>;

    async fn sign_psbts(
        &self,
        psbts_hexes: &[String],
        options: Option<&[SignPsbtOptions]>,
    ) -> Result<Vec<String>, String>;

    async fn sign_message(&self, message: &str, method: SignMessageType) -> Result<String, String>;

    async fn get_inscriptions(
        &self,
        cursor: usize,
        size: usize,
    ) -> Result<Vec<InscriptionIdentifier>, String>;

    async fn disconnect(&self) -> Result<(), String> {
        Ok(())
    }
}

/// [`BtcProvider`] over an injected extension
pub struct InjectedProvider<E: BtcExtension> {
    name: String,
    extension: Arc<E>,
    network: NetworkType,
    account: AccountSlot,
    listeners: AccountListeners,
}

impl<E: BtcExtension> InjectedProvider<E> {
    pub fn new(name: impl Into<String>, extension: Arc<E>, network: NetworkType) -> Self {
        Self {
            name: name.into(),
            extension,
            network,
            account: AccountSlot::default(),
            listeners: AccountListeners::new(),
        }
    }

    /// Feed an account switch reported by the extension
    ///
    /// Updates the connected account and notifies `accountChanged` listeners.
    /// Ignored while disconnected.
    pub fn handle_account_changed(&self, account: Account) {
        if self.account.get().is_none() {
            return;
        }
        log::info!("{}: account changed to {}", self.name, account.address);
        self.account.set(Some(account.clone()));
        self.listeners.emit(&account);
    }

    fn vendor_error(&self, message: String) -> WalletError {
        log::debug!("{}: vendor error: {}", self.name, message);
        normalize_vendor_error(&self.name, &message)
    }

    fn signing_error(&self, message: String) -> WalletError {
        match self.vendor_error(message) {
            WalletError::ConnectionRejected { wallet } => WalletError::SigningRejected { wallet },
            other => other,
        }
    }
}

#[async_trait]
impl<E: BtcExtension + 'static> IProvider for InjectedProvider<E> {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let addresses = self
            .extension
            .request_accounts()
            .await
            .map_err(|e| self.vendor_error(e))?;
        let address = addresses
            .into_iter()
            .next()
            .ok_or_else(|| WalletError::AddressNotFound {
                wallet: self.name.clone(),
            })?;

        let public_key_hex = self
            .extension
            .get_public_key()
            .await
            .map_err(|e| self.vendor_error(e))?;
        if public_key_hex.is_empty() {
            return Err(WalletError::PublicKeyNotFound {
                wallet: self.name.clone(),
            });
        }

        let reported = self
            .extension
            .get_network()
            .await
            .map_err(|e| self.vendor_error(e))?;
        let actual = NetworkType::from_str(&reported)
            .map_err(|_| WalletError::NetworkMismatch {
                wallet: self.name.clone(),
                expected: self.network.to_string(),
                actual: reported.clone(),
            })?;
        if actual != self.network {
            return Err(WalletError::NetworkMismatch {
                wallet: self.name.clone(),
                expected: self.network.to_string(),
                actual: actual.to_string(),
            });
        }

        log::info!("{}: connected {}", self.name, address);
        self.account.set(Some(Account {
            address,
            public_key_hex,
        }));
        Ok(())
    }

    async fn get_address(&self) -> Result<String, WalletError> {
        Ok(self.account.require(&self.name)?.address)
    }

    async fn get_public_key_hex(&self) -> Result<String, WalletError> {
        Ok(self.account.require(&self.name)?.public_key_hex)
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.account.set(None);
        self.extension
            .disconnect()
            .await
            .map_err(|e| self.vendor_error(e))
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl<E: BtcExtension + 'static> BtcProvider for InjectedProvider<E> {
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        if psbt_hex.trim().is_empty() {
            return Err(WalletError::PsbtHexRequired);
        }

        self.extension
            .sign_psbt(psbt_hex, options)
            .await
            .map_err(|e| self.signing_error(e))
    }

    async fn sign_psbts(
        &self,
        psbts_hexes: &[String],
        options: Option<&[SignPsbtOptions]>,
    ) -> Result<Vec<String>, WalletError> {
        self.account.require(&self.name)?;
        validate_sign_psbts(psbts_hexes, options)?;

        let signed = self
            .extension
            .sign_psbts(psbts_hexes, options)
            .await
            .map_err(|e| self.signing_error(e))?;

        if signed.len() != psbts_hexes.len() {
            return Err(WalletError::SignatureExtraction {
                wallet: self.name.clone(),
                reason: format!(
                    "wallet returned {} PSBTs for {} requested",
                    signed.len(),
                    psbts_hexes.len()
                ),
            });
        }
        Ok(signed)
    }

    async fn get_network(&self) -> Result<NetworkType, WalletError> {
        self.account.require(&self.name)?;
        let reported = self
            .extension
            .get_network()
            .await
            .map_err(|e| self.vendor_error(e))?;
        NetworkType::from_str(&reported).map_err(|_| WalletError::NetworkMismatch {
            wallet: self.name.clone(),
            expected: self.network.to_string(),
            actual: reported,
        })
    }

    async fn sign_message(
        &self,
        message: &str,
        method: SignMessageType,
    ) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        self.extension
            .sign_message(message, method)
            .await
            .map_err(|e| self.signing_error(e))
    }

    async fn get_inscriptions(&self) -> Result<Vec<InscriptionIdentifier>, WalletError> {
        self.account.require(&self.name)?;
        collect_inscriptions(&self.name, |cursor, size| async move {
            self.extension
                .get_inscriptions(cursor, size)
                .await
                .map_err(|e| self.vendor_error(e))
        })
        .await
    }

    fn on(
        &self,
        event: ProviderEvent,
        callback: AccountChangedCallback,
    ) -> Result<ListenerId, WalletError> {
        match event {
            ProviderEvent::AccountChanged => Ok(self.listeners.add(callback)),
        }
    }

    fn off(&self, event: ProviderEvent, listener: ListenerId) -> Result<(), WalletError> {
        match event {
            ProviderEvent::AccountChanged => {
                self.listeners.remove(listener);
                Ok(())
            }
        }
    }
}
