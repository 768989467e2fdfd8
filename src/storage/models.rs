//! Storage data models
//!
//! Keystore key material (in memory only), its encrypted on-disk form,
//! public keystore metadata, and the user-facing creation summary.

use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::secp256k1::{Secp256k1, Signing};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bitcoin::address::derive_taproot_address;
use crate::config::NetworkType;
use crate::storage::keys::{self, KeyError};

/// Complete keystore key material (kept in memory during operations)
///
/// # Security
///
/// This struct should only exist in memory. The mnemonic must be
/// encrypted before saving to disk.
#[derive(Debug, Clone)]
pub struct KeystoreKeys {
    /// BIP39 mnemonic phrase (12 or 24 words)
    pub mnemonic: bip39::Mnemonic,

    /// BIP86 account key (m/86'/coin_type'/0')
    pub account_xprv: Xpriv,

    /// Account-level extended public key
    pub account_xpub: Xpub,

    /// Master key fingerprint (hex)
    pub master_fingerprint: String,
}

impl KeystoreKeys {
    /// Derive all keys from a mnemonic
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mnemonic = generate_mnemonic()?;
    /// let keys = KeystoreKeys::from_mnemonic(&secp, &mnemonic, NetworkType::Signet)?;
    /// ```
    pub fn from_mnemonic<C: Signing>(
        secp: &Secp256k1<C>,
        mnemonic: &bip39::Mnemonic,
        network: NetworkType,
    ) -> Result<Self, KeyError> {
        let account_xprv = keys::derive_bitcoin_keys(secp, mnemonic, network)?;
        let account_xpub = keys::account_xpub(secp, &account_xprv);
        let master_fingerprint = keys::master_fingerprint(secp, mnemonic, network)?.to_string();

        Ok(Self {
            mnemonic: mnemonic.clone(),
            account_xprv,
            account_xpub,
            master_fingerprint,
        })
    }

    /// Compressed public key (hex) and taproot address of receive index `index`
    pub fn receive_account<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        index: u32,
        network: NetworkType,
    ) -> Result<(String, String), KeyError> {
        let keypair = keys::derive_receive_keypair(secp, &self.account_xprv, index)?;
        let public_key_hex = hex::encode(keypair.public_key().serialize());
        let address = derive_taproot_address(&public_key_hex, network)
            .map_err(|e| KeyError::Secp256k1(e.to_string()))?;

        Ok((public_key_hex, address))
    }
}

/// Keystore metadata (non-sensitive information)
///
/// Saved to: `<data_dir>/keystores/<name>/keystore.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreMetadata {
    /// Keystore name (unique identifier)
    pub name: String,

    /// Network this keystore derives addresses for
    pub network: NetworkType,

    /// When the keystore was created
    pub created_at: DateTime<Utc>,

    /// First taproot receive address
    pub first_address: String,

    /// Compressed public key of the first receive address (hex)
    pub public_key_hex: String,
}

impl KeystoreMetadata {
    /// Create new metadata for a keystore
    pub fn new(
        name: String,
        network: NetworkType,
        first_address: String,
        public_key_hex: String,
    ) -> Self {
        Self {
            name,
            network,
            created_at: Utc::now(),
            first_address,
            public_key_hex,
        }
    }
}

/// User-facing keystore information (returned on creation/import)
///
/// Transient; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreInfo {
    pub name: String,

    /// BIP39 mnemonic phrase
    /// ⚠️ Sensitive: only shown once on creation
    pub mnemonic: String,

    pub network: NetworkType,

    pub first_address: String,

    pub public_key_hex: String,

    pub account_xpub: String,

    pub master_fingerprint: String,
}

impl KeystoreInfo {
    /// Create KeystoreInfo from keys and metadata (for user output)
    pub fn from_keys(keys: &KeystoreKeys, metadata: &KeystoreMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            mnemonic: keys.mnemonic.to_string(),
            network: metadata.network,
            first_address: metadata.first_address.clone(),
            public_key_hex: metadata.public_key_hex.clone(),
            account_xpub: keys.account_xpub.to_string(),
            master_fingerprint: keys.master_fingerprint.clone(),
        }
    }
}

/// Encrypted keystore storage format
///
/// This is what gets saved to disk in `keys.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKeystore {
    /// Encrypted BIP39 mnemonic (hex-encoded)
    pub encrypted_mnemonic: String,

    /// Account-level xpub (public, not encrypted)
    pub account_xpub: String,

    /// Master key fingerprint (public, not encrypted)
    pub master_fingerprint: String,
}

impl EncryptedKeystore {
    /// Encrypt keystore keys with a password
    pub fn from_keys(keys: &KeystoreKeys, password: &str) -> Result<Self, KeyError> {
        Ok(Self {
            encrypted_mnemonic: keys::encrypt_mnemonic(&keys.mnemonic, password)?,
            account_xpub: keys.account_xpub.to_string(),
            master_fingerprint: keys.master_fingerprint.clone(),
        })
    }

    /// Decrypt to KeystoreKeys
    pub fn to_keys<C: Signing>(
        &self,
        secp: &Secp256k1<C>,
        password: &str,
        network: NetworkType,
    ) -> Result<KeystoreKeys, KeyError> {
        let mnemonic = keys::decrypt_mnemonic(&self.encrypted_mnemonic, password)?;
        KeystoreKeys::from_mnemonic(secp, &mnemonic, network)
    }
}
