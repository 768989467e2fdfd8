//! Air-gapped QR signer
//!
//! The device never touches the host: the account is imported by scanning
//! its QR code, and every signature is a round trip of showing a request
//! and scanning the device's answer. A round trip that does not complete
//! within the configured wait fails with `Timeout`.

use async_trait::async_trait;
use bitcoin::psbt::Psbt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bitcoin::address::derive_p2tr_from_extended_key;
use crate::bitcoin::psbt::{finalize_all, psbt_from_hex, psbt_to_hex};
use crate::bitcoin::{bip322, Bip322Error, SignMessageType};
use crate::config::NetworkType;
use crate::error::WalletError;
use crate::provider::{
    AccountChangedCallback, AccountSlot, BtcProvider, IProvider, ListenerId, ProviderEvent,
    SignPsbtOptions,
};
use crate::types::{Account, InscriptionIdentifier};

/// Default wait for a scanned response
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(60);

/// QR channel failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QrError {
    /// A code was scanned but could not be decoded
    #[error("Failed to read QR code: {0}")]
    Read(String),

    /// The camera or scanner failed
    #[error("QR scan failed: {0}")]
    Scan(String),
}

/// Vendor boundary: a screen to show codes and a scanner to read them
#[async_trait]
pub trait QrChannel: Send + Sync {
    async fn display(&self, payload: &str) -> Result<(), QrError>;

    async fn scan(&self) -> Result<String, QrError>;
}

/// Account export scanned from the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirGappedAccount {
    pub master_fingerprint: String,
    pub xpub: String,
    /// Account path, e.g. `m/86'/0'/0'`
    pub path: String,
}

/// Request shown to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AirGappedRequest {
    SignPsbt { psbt_hex: String },
}

/// [`BtcProvider`] over a [`QrChannel`]
pub struct AirGappedProvider<C: QrChannel> {
    name: String,
    channel: Arc<C>,
    network: NetworkType,
    scan_timeout: Duration,
    account: AccountSlot,
    device: Mutex<Option<AirGappedAccount>>,
}

impl<C: QrChannel> AirGappedProvider<C> {
    pub fn new(name: impl Into<String>, channel: Arc<C>, network: NetworkType) -> Self {
        Self::with_timeout(name, channel, network, DEFAULT_SCAN_TIMEOUT)
    }

    pub fn with_timeout(
        name: impl Into<String>,
        channel: Arc<C>,
        network: NetworkType,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            channel,
            network,
            scan_timeout,
            account: AccountSlot::default(),
            device: Mutex::new(None),
        }
    }

    /// Device account export, once connected
    pub fn device_account(&self) -> Option<AirGappedAccount> {
        self.device.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn qr_error(&self, error: QrError) -> WalletError {
        let wallet = self.name.clone();
        match error {
            QrError::Read(reason) => WalletError::QrRead { wallet, reason },
            QrError::Scan(reason) => WalletError::QrScan { wallet, reason },
        }
    }

    async fn scan_with_timeout(&self) -> Result<String, WalletError> {
        match tokio::time::timeout(self.scan_timeout, self.channel.scan()).await {
            Ok(result) => result.map_err(|e| self.qr_error(e)),
            Err(_) => {
                log::warn!(
                    "{}: no response scanned within {:?}",
                    self.name,
                    self.scan_timeout
                );
                Err(WalletError::Timeout {
                    wallet: self.name.clone(),
                    secs: self.scan_timeout.as_secs(),
                })
            }
        }
    }

    /// Show a PSBT and scan the signed PSBT back
    async fn sign_round_trip(&self, psbt: &Psbt) -> Result<Psbt, WalletError> {
        let request = AirGappedRequest::SignPsbt {
            psbt_hex: psbt_to_hex(psbt),
        };
        let payload = serde_json::to_string(&request).map_err(|e| WalletError::QrRead {
            wallet: self.name.clone(),
            reason: e.to_string(),
        })?;

        self.channel
            .display(&payload)
            .await
            .map_err(|e| self.qr_error(e))?;
        let scanned = self.scan_with_timeout().await?;

        psbt_from_hex(&scanned).map_err(|e| WalletError::QrRead {
            wallet: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl<C: QrChannel + 'static> IProvider for AirGappedProvider<C> {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let scanned = self.scan_with_timeout().await?;
        let export: AirGappedAccount =
            serde_json::from_str(&scanned).map_err(|e| WalletError::QrRead {
                wallet: self.name.clone(),
                reason: format!("not an account export: {}", e),
            })?;

        let derived = derive_p2tr_from_extended_key(&export.xpub, "m/0/0", self.network)?;
        log::info!("{}: imported account {}", self.name, derived.address);

        self.account.set(Some(Account {
            address: derived.address,
            public_key_hex: derived.public_key_hex,
        }));
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = Some(export);
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
        *self.device.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl<C: QrChannel + 'static> BtcProvider for AirGappedProvider<C> {
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        if psbt_hex.trim().is_empty() {
            return Err(WalletError::PsbtHexRequired);
        }

        let psbt = psbt_from_hex(psbt_hex)?;
        let mut signed = self.sign_round_trip(&psbt).await?;

        if options.map(|o| o.auto_finalized).unwrap_or(true) {
            finalize_all(&mut signed)?;
        }
        Ok(psbt_to_hex(&signed))
    }

    async fn get_network(&self) -> Result<NetworkType, WalletError> {
        self.account.require(&self.name)?;
        Ok(self.network)
    }

    async fn sign_message(
        &self,
        message: &str,
        method: SignMessageType,
    ) -> Result<String, WalletError> {
        let account = self.account.require(&self.name)?;

        match method {
            SignMessageType::Bip322Simple => {
                let psbt = bip322::prepare_to_sign(
                    message,
                    &account.address,
                    &account.public_key_hex,
                    self.network,
                )?;
                let signed = self.sign_round_trip(&psbt).await?;
                bip322::extract_signature(signed).map_err(|e| match e {
                    Bip322Error::SignatureExtraction(reason) => WalletError::SignatureExtraction {
                        wallet: self.name.clone(),
                        reason,
                    },
                    other => other.into(),
                })
            }
            SignMessageType::Ecdsa => Err(WalletError::NotImplemented {
                wallet: self.name.clone(),
                feature: "ECDSA message signing".to_string(),
            }),
        }
    }

    async fn get_inscriptions(&self) -> Result<Vec<InscriptionIdentifier>, WalletError> {
        Err(WalletError::NotImplemented {
            wallet: self.name.clone(),
            feature: "inscriptions".to_string(),
        })
    }

    fn on(
        &self,
        _event: ProviderEvent,
        _callback: AccountChangedCallback,
    ) -> Result<ListenerId, WalletError> {
        Err(WalletError::NotImplemented {
            wallet: self.name.clone(),
            feature: "account change events".to_string(),
        })
    }

    fn off(&self, _event: ProviderEvent, _listener: ListenerId) -> Result<(), WalletError> {
        Err(WalletError::NotImplemented {
            wallet: self.name.clone(),
            feature: "account change events".to_string(),
        })
    }
}
