//! Local keystore Bitcoin signer
//!
//! Signs with BIP86 keys derived from a decrypted keystore mnemonic. The
//! active account is receive index `m/86'/coin'/0'/0/<index>`; switching the
//! index notifies `accountChanged` listeners.

use async_trait::async_trait;
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{All, Secp256k1};
use std::sync::Mutex;

use crate::bitcoin::message::sign_ecdsa_message;
use crate::bitcoin::psbt::{finalize_input, psbt_from_hex, psbt_to_hex, sign_input, SignMode};
use crate::bitcoin::{bip322, Bip322Error, SignMessageType};
use crate::config::NetworkType;
use crate::error::WalletError;
use crate::provider::{
    AccountChangedCallback, AccountListeners, AccountSlot, BtcProvider, IProvider, ListenerId,
    ProviderEvent, SignPsbtOptions,
};
use crate::storage::keys::{derive_receive_keypair, KeyError};
use crate::storage::models::KeystoreKeys;
use crate::types::{Account, InscriptionIdentifier};

/// Wallet id of the keystore signer
pub const KEYSTORE_WALLET_ID: &str = "keystore";

/// Bitcoin provider backed by a local keystore
pub struct KeystoreProvider {
    name: String,
    keys: KeystoreKeys,
    network: NetworkType,
    secp: Secp256k1<All>,
    index: Mutex<u32>,
    account: AccountSlot,
    listeners: AccountListeners,
}

impl KeystoreProvider {
    pub fn new(name: impl Into<String>, keys: KeystoreKeys, network: NetworkType) -> Self {
        Self {
            name: name.into(),
            keys,
            network,
            secp: Secp256k1::new(),
            index: Mutex::new(0),
            account: AccountSlot::default(),
            listeners: AccountListeners::new(),
        }
    }

    /// Build directly from a mnemonic (no keystore file involved)
    pub fn from_mnemonic(
        name: impl Into<String>,
        mnemonic: &bip39::Mnemonic,
        network: NetworkType,
    ) -> Result<Self, KeyError> {
        let keys = KeystoreKeys::from_mnemonic(&Secp256k1::new(), mnemonic, network)?;
        Ok(Self::new(name, keys, network))
    }

    /// Current receive index
    pub fn account_index(&self) -> u32 {
        *self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch to receive index `index` and notify listeners
    ///
    /// Before a connection exists only the index is recorded.
    pub fn switch_account(&self, index: u32) -> Result<Account, WalletError> {
        let account = self.derive_account(index)?;
        *self.index.lock().unwrap_or_else(|e| e.into_inner()) = index;

        if self.account.get().is_some() {
            self.account.set(Some(account.clone()));
            log::info!("{}: switched to account {} ({})", self.name, index, account.address);
            self.listeners.emit(&account);
        }

        Ok(account)
    }

    fn derive_account(&self, index: u32) -> Result<Account, WalletError> {
        let (public_key_hex, address) =
            self.keys.receive_account(&self.secp, index, self.network)?;
        Ok(Account {
            address,
            public_key_hex,
        })
    }

    fn keypair(&self) -> Result<Keypair, WalletError> {
        Ok(derive_receive_keypair(
            &self.secp,
            &self.keys.account_xprv,
            self.account_index(),
        )?)
    }

    fn sign_bip322(&self, account: &Account, message: &str) -> Result<String, WalletError> {
        let mut psbt = bip322::prepare_to_sign(
            message,
            &account.address,
            &account.public_key_hex,
            self.network,
        )?;

        if !sign_input(&self.secp, &mut psbt, 0, &self.keypair()?, SignMode::Tweaked)? {
            return Err(WalletError::SignatureExtraction {
                wallet: self.name.clone(),
                reason: "key does not control the message address".to_string(),
            });
        }

        bip322::extract_signature(psbt).map_err(|e| match e {
            Bip322Error::SignatureExtraction(reason) => WalletError::SignatureExtraction {
                wallet: self.name.clone(),
                reason,
            },
            other => other.into(),
        })
    }
}

#[async_trait]
impl IProvider for KeystoreProvider {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let account = self.derive_account(self.account_index())?;
        log::info!("{}: connected {}", self.name, account.address);
        self.account.set(Some(account));
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
        Ok(())
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl BtcProvider for KeystoreProvider {
    async fn sign_psbt(
        &self,
        psbt_hex: &str,
        options: Option<&SignPsbtOptions>,
    ) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        if psbt_hex.trim().is_empty() {
            return Err(WalletError::PsbtHexRequired);
        }

        let mut psbt = psbt_from_hex(psbt_hex)?;
        let keypair = self.keypair()?;
        let auto_finalized = options.map(|o| o.auto_finalized).unwrap_or(true);

        let mut signed = Vec::new();
        match options.and_then(|o| o.to_sign_inputs.as_ref()) {
            Some(inputs) => {
                for input in inputs {
                    let mode = if input.disable_tweak_signer {
                        SignMode::Untweaked
                    } else {
                        SignMode::Tweaked
                    };
                    if sign_input(&self.secp, &mut psbt, input.index, &keypair, mode)? {
                        signed.push(input.index);
                    } else {
                        log::warn!(
                            "{}: input {} is not spendable by this key",
                            self.name,
                            input.index
                        );
                    }
                }
            }
            None => {
                for index in 0..psbt.inputs.len() {
                    let key_path = sign_input(&self.secp, &mut psbt, index, &keypair, SignMode::Tweaked)?;
                    if key_path
                        || sign_input(&self.secp, &mut psbt, index, &keypair, SignMode::Untweaked)?
                    {
                        signed.push(index);
                    }
                }
            }
        }

        log::debug!("{}: signed inputs {:?}", self.name, signed);

        if auto_finalized {
            for index in signed {
                finalize_input(&mut psbt, index)?;
            }
        }

        Ok(psbt_to_hex(&psbt))
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
            SignMessageType::Bip322Simple => self.sign_bip322(&account, message),
            SignMessageType::Ecdsa => Ok(sign_ecdsa_message(
                &self.secp,
                &self.keypair()?.secret_key(),
                message,
            )),
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
