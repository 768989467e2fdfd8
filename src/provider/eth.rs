//! Injected Ethereum wallets (EIP-1193)

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::error::{normalize_vendor_error, WalletError};
use crate::provider::{AccountSlot, EthProvider, IProvider};
use crate::types::Account;

/// EIP-1193 `request` boundary
#[async_trait]
pub trait Eip1193: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, String>;
}

/// Parse a `0x`-prefixed hex quantity
pub fn parse_hex_quantity(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}

/// [`EthProvider`] over an EIP-1193 object
///
/// EIP-1193 exposes no public key, so a connected account carries an empty
/// `public_key_hex`.
pub struct Eip1193Provider<E: Eip1193> {
    name: String,
    ethereum: Arc<E>,
    config: ChainConfig,
    account: AccountSlot,
}

impl<E: Eip1193> Eip1193Provider<E> {
    pub fn new(name: impl Into<String>, ethereum: Arc<E>, config: ChainConfig) -> Self {
        Self {
            name: name.into(),
            ethereum,
            config,
            account: AccountSlot::default(),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, WalletError> {
        self.ethereum
            .request(method, params)
            .await
            .map_err(|e| normalize_vendor_error(&self.name, &e))
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        let value = self.request("eth_chainId", json!([])).await?;
        value
            .as_str()
            .and_then(parse_hex_quantity)
            .ok_or_else(|| WalletError::ChainIdNotInitialized {
                wallet: self.name.clone(),
            })
    }
}

#[async_trait]
impl<E: Eip1193 + 'static> IProvider for Eip1193Provider<E> {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let accounts = self.request("eth_requestAccounts", json!([])).await?;
        let address = accounts
            .as_array()
            .and_then(|list| list.first())
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| WalletError::AddressNotFound {
                wallet: self.name.clone(),
            })?;

        if let Some(expected) = self.config.chain_id.as_deref() {
            let actual = self.chain_id().await?;
            if expected.parse::<u64>().ok() != Some(actual) {
                return Err(WalletError::NetworkMismatch {
                    wallet: self.name.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        log::info!("{}: connected {}", self.name, address);
        self.account.set(Some(Account {
            address,
            public_key_hex: String::new(),
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
        Ok(())
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl<E: Eip1193 + 'static> EthProvider for Eip1193Provider<E> {
    async fn sign_message(&self, message: &str) -> Result<String, WalletError> {
        let account = self.account.require(&self.name)?;
        let data = format!("0x{}", hex::encode(message.as_bytes()));

        let signature = self
            .request("personal_sign", json!([data, account.address]))
            .await
            .map_err(|e| match e {
                WalletError::ConnectionRejected { wallet } => WalletError::SigningRejected { wallet },
                other => other,
            })?;

        signature
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::SignatureExtraction {
                wallet: self.name.clone(),
                reason: "personal_sign returned no signature".to_string(),
            })
    }

    async fn get_chain_id(&self) -> Result<u64, WalletError> {
        self.account.require(&self.name)?;
        self.chain_id().await
    }
}
