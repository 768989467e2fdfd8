//! Cosmos-SDK chain providers
//!
//! A keystore signer deriving the coin-type-118 key from the local
//! mnemonic, and an injected-extension provider. Arbitrary-data signatures
//! follow ADR-036: an amino JSON sign doc carrying one `sign/MsgSignData`
//! message, hashed with SHA-256 and signed with ECDSA (64-byte compact,
//! base64).

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::bech32::{self, Bech32, Hrp};
use bitcoin::hashes::{hash160, sha256, Hash};
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde_json::json;
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::error::{normalize_vendor_error, WalletError};
use crate::provider::{AccountSlot, BbnProvider, IProvider};
use crate::storage::keys::{derive_cosmos_key, KeyError};
use crate::types::Account;

/// Default bech32 prefix of the staking chain
pub const DEFAULT_BECH32_PREFIX: &str = "bbn";

/// Bech32 account address of a compressed public key
pub fn cosmos_address(public_key: &PublicKey, prefix: &str) -> Result<String, KeyError> {
    let hrp = Hrp::parse(prefix).map_err(|e| KeyError::Secp256k1(e.to_string()))?;
    let key_hash = hash160::Hash::hash(&public_key.serialize());
    bech32::encode::<Bech32>(hrp, key_hash.as_byte_array())
        .map_err(|e| KeyError::Secp256k1(e.to_string()))
}

/// ADR-036 amino sign doc (keys sorted, compact)
pub fn adr36_sign_doc(signer: &str, data: &[u8]) -> String {
    json!({
        "account_number": "0",
        "chain_id": "",
        "fee": { "amount": [], "gas": "0" },
        "memo": "",
        "msgs": [{
            "type": "sign/MsgSignData",
            "value": {
                "data": STANDARD.encode(data),
                "signer": signer,
            }
        }],
        "sequence": "0",
    })
    .to_string()
}

/// SHA-256 digest of the ADR-036 sign doc
pub fn adr36_digest(signer: &str, data: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(adr36_sign_doc(signer, data).as_bytes()).to_byte_array()
}

fn required_chain_id(config: &ChainConfig, wallet: &str) -> Result<String, WalletError> {
    config
        .chain_id
        .clone()
        .ok_or_else(|| WalletError::ChainIdNotInitialized {
            wallet: wallet.to_string(),
        })
}

/// [`BbnProvider`] backed by the local keystore mnemonic
pub struct CosmosKeystoreProvider {
    name: String,
    secret_key: SecretKey,
    public_key: PublicKey,
    config: ChainConfig,
    secp: Secp256k1<All>,
    account: AccountSlot,
}

impl CosmosKeystoreProvider {
    pub fn from_mnemonic(
        name: impl Into<String>,
        mnemonic: &bip39::Mnemonic,
        config: ChainConfig,
    ) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = derive_cosmos_key(&secp, mnemonic)?;
        Ok(Self {
            name: name.into(),
            secret_key,
            public_key,
            config,
            secp,
            account: AccountSlot::default(),
        })
    }

    fn prefix(&self) -> &str {
        self.config
            .bech32_prefix
            .as_deref()
            .unwrap_or(DEFAULT_BECH32_PREFIX)
    }
}

#[async_trait]
impl IProvider for CosmosKeystoreProvider {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        required_chain_id(&self.config, &self.name)?;
        if self.config.rpc_url.is_none() {
            return Err(WalletError::RpcNotInitialized {
                wallet: self.name.clone(),
            });
        }

        let address = cosmos_address(&self.public_key, self.prefix())?;
        log::info!("{}: connected {}", self.name, address);
        self.account.set(Some(Account {
            address,
            public_key_hex: hex::encode(self.public_key.serialize()),
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
impl BbnProvider for CosmosKeystoreProvider {
    async fn get_chain_id(&self) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        required_chain_id(&self.config, &self.name)
    }

    async fn sign_arbitrary(&self, message: &str) -> Result<String, WalletError> {
        let account = self.account.require(&self.name)?;
        let digest = adr36_digest(&account.address, message.as_bytes());
        let signature = self
            .secp
            .sign_ecdsa(&Message::from_digest(digest), &self.secret_key);
        Ok(STANDARD.encode(signature.serialize_compact()))
    }
}

/// Key reported by a Cosmos extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosmosKey {
    pub bech32_address: String,
    pub public_key_hex: String,
}

/// Vendor boundary of an injected Cosmos wallet
#[async_trait]
pub trait CosmosExtension: Send + Sync {
    async fn enable(&self, chain_id: &str) -> Result<(), String>;

    async fn get_key(&self, chain_id: &str) -> Result<CosmosKey, String>;

    async fn sign_arbitrary(
        &self,
        chain_id: &str,
        signer: &str,
        data: &str,
    ) -> Result<String, String>;

    async fn disconnect(&self) -> Result<(), String> {
        Ok(())
    }
}

/// [`BbnProvider`] over an injected extension
pub struct InjectedCosmosProvider<E: CosmosExtension> {
    name: String,
    extension: Arc<E>,
    config: ChainConfig,
    account: AccountSlot,
}

impl<E: CosmosExtension> InjectedCosmosProvider<E> {
    pub fn new(name: impl Into<String>, extension: Arc<E>, config: ChainConfig) -> Self {
        Self {
            name: name.into(),
            extension,
            config,
            account: AccountSlot::default(),
        }
    }
}

#[async_trait]
impl<E: CosmosExtension + 'static> IProvider for InjectedCosmosProvider<E> {
    async fn connect_wallet(&self) -> Result<(), WalletError> {
        let chain_id = required_chain_id(&self.config, &self.name)?;

        self.extension
            .enable(&chain_id)
            .await
            .map_err(|e| normalize_vendor_error(&self.name, &e))?;
        let key = self
            .extension
            .get_key(&chain_id)
            .await
            .map_err(|e| normalize_vendor_error(&self.name, &e))?;

        if key.bech32_address.is_empty() {
            return Err(WalletError::AddressNotFound {
                wallet: self.name.clone(),
            });
        }
        if key.public_key_hex.is_empty() {
            return Err(WalletError::PublicKeyNotFound {
                wallet: self.name.clone(),
            });
        }

        log::info!("{}: connected {}", self.name, key.bech32_address);
        self.account.set(Some(Account {
            address: key.bech32_address,
            public_key_hex: key.public_key_hex,
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
            .map_err(|e| normalize_vendor_error(&self.name, &e))
    }

    fn get_wallet_provider_name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl<E: CosmosExtension + 'static> BbnProvider for InjectedCosmosProvider<E> {
    async fn get_chain_id(&self) -> Result<String, WalletError> {
        self.account.require(&self.name)?;
        required_chain_id(&self.config, &self.name)
    }

    async fn sign_arbitrary(&self, message: &str) -> Result<String, WalletError> {
        let account = self.account.require(&self.name)?;
        let chain_id = required_chain_id(&self.config, &self.name)?;

        self.extension
            .sign_arbitrary(&chain_id, &account.address, message)
            .await
            .map_err(|e| match normalize_vendor_error(&self.name, &e) {
                WalletError::ConnectionRejected { wallet } => WalletError::SigningRejected { wallet },
                other => other,
            })
    }
}
