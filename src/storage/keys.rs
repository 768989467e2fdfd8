//! Keystore key material
//!
//! One BIP39 mnemonic backs every local signer: the BIP86 taproot account
//! for Bitcoin and the coin-type-118 key for the Cosmos staking chain. The
//! phrase is sealed at rest with AES-256-GCM.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::key::Keypair;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use std::str::FromStr;

use crate::config::NetworkType;

/// PBKDF2-HMAC-SHA256 iteration count for keystore encryption
const PBKDF2_ROUNDS: u32 = 600_000;

/// Cosmos SDK derivation path (coin type 118)
pub const COSMOS_DERIVATION_PATH: &str = "m/44'/118'/0'/0/0";

/// Keystore key errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("BIP39 error: {0}")]
    Bip39(String),

    #[error("BIP32 derivation error: {0}")]
    Bip32(String),

    #[error("Secp256k1 error: {0}")]
    Secp256k1(String),

    #[error("Keystore sealing failed: {0}")]
    Encryption(String),

    #[error("Keystore unsealing failed: {0}")]
    Decryption(String),
}

/// Fresh 12-word keystore mnemonic
pub fn generate_mnemonic() -> Result<bip39::Mnemonic, KeyError> {
    let mut entropy = [0u8; 16];
    OsRng.fill_bytes(&mut entropy);
    bip39::Mnemonic::from_entropy(&entropy).map_err(|e| KeyError::Bip39(e.to_string()))
}

/// Parse and checksum-validate a mnemonic phrase
pub fn parse_mnemonic(phrase: &str) -> Result<bip39::Mnemonic, KeyError> {
    bip39::Mnemonic::parse(phrase.trim()).map_err(|e| KeyError::Bip39(e.to_string()))
}

/// BIP86 account path for a network: `m/86'/coin_type'/0'`
pub fn bip86_account_path(network: NetworkType) -> String {
    format!("m/86'/{}'/0'", network.coin_type())
}

fn master_key(mnemonic: &bip39::Mnemonic, network: NetworkType) -> Result<Xpriv, KeyError> {
    let seed = mnemonic.to_seed("");
    Xpriv::new_master(network.to_bitcoin(), &seed)
        .map_err(|e| KeyError::Bip32(format!("Failed to create master key: {}", e)))
}

/// Master key fingerprint of a mnemonic
pub fn master_fingerprint<C: Signing>(
    secp: &Secp256k1<C>,
    mnemonic: &bip39::Mnemonic,
    network: NetworkType,
) -> Result<Fingerprint, KeyError> {
    Ok(master_key(mnemonic, network)?.fingerprint(secp))
}

/// Derive the BIP86 account key at `m/86'/coin_type'/0'`
///
/// - Mainnet: m/86'/0'/0'
/// - Testnet and signet: m/86'/1'/0'
///
/// # Example
///
/// ```ignore
/// let mnemonic = generate_mnemonic()?;
/// let xprv = derive_bitcoin_keys(&secp, &mnemonic, NetworkType::Signet)?;
/// ```
pub fn derive_bitcoin_keys<C: Signing>(
    secp: &Secp256k1<C>,
    mnemonic: &bip39::Mnemonic,
    network: NetworkType,
) -> Result<Xpriv, KeyError> {
    let master = master_key(mnemonic, network)?;

    let derivation_path = DerivationPath::from_str(&bip86_account_path(network))
        .map_err(|e| KeyError::Bip32(format!("Invalid derivation path: {}", e)))?;

    master
        .derive_priv(secp, &derivation_path)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))
}

/// Derive the receive keypair `<account>/0/<index>`
pub fn derive_receive_keypair<C: Signing>(
    secp: &Secp256k1<C>,
    account_xprv: &Xpriv,
    index: u32,
) -> Result<Keypair, KeyError> {
    let path = [
        ChildNumber::from_normal_idx(0).map_err(|e| KeyError::Bip32(e.to_string()))?,
        ChildNumber::from_normal_idx(index).map_err(|e| KeyError::Bip32(e.to_string()))?,
    ];

    let child = account_xprv
        .derive_priv(secp, &path)
        .map_err(|e| KeyError::Bip32(format!("Derivation failed: {}", e)))?;

    Ok(Keypair::from_secret_key(secp, &child.private_key))
}

/// Account-level extended public key
pub fn account_xpub<C: Signing>(secp: &Secp256k1<C>, account_xprv: &Xpriv) -> Xpub {
    Xpub::from_priv(secp, account_xprv)
}

/// Derive the Cosmos signing key at `m/44'/118'/0'/0/0`
///
/// Returns the secret key and its compressed public key.
pub fn derive_cosmos_key<C: Signing>(
    secp: &Secp256k1<C>,
    mnemonic: &bip39::Mnemonic,
) -> Result<(SecretKey, PublicKey), KeyError> {
    // The version bytes of the master key do not affect derived key material
    let master = master_key(mnemonic, NetworkType::Mainnet)?;

    let derivation_path = DerivationPath::from_str(COSMOS_DERIVATION_PATH)
        .map_err(|e| KeyError::Bip32(format!("Invalid derivation path: {}", e)))?;

    let derived = master
        .derive_priv(secp, &derivation_path)
        .map_err(|e| KeyError::Bip32(format!("Cosmos key derivation failed: {}", e)))?;

    let secret_key = derived.private_key;
    let public_key = PublicKey::from_secret_key(secp, &secret_key);

    Ok((secret_key, public_key))
}

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Seal bytes under a password for the keystore
///
/// Layout (hex encoded): `salt || nonce || ciphertext || tag`. The AES-256
/// key comes from PBKDF2-HMAC-SHA256 over the password and a fresh salt; the
/// nonce is fresh per call, so sealing the same bytes twice never repeats.
pub fn encrypt_data(data: &[u8], password: &str) -> Result<String, KeyError> {
    let mut header = [0u8; SALT_LEN + NONCE_LEN];
    OsRng.fill_bytes(&mut header);
    let (salt, nonce) = header.split_at(SALT_LEN);

    let sealed = keystore_cipher(password, salt)
        .encrypt(Nonce::from_slice(nonce), data)
        .map_err(|e| KeyError::Encryption(e.to_string()))?;

    Ok(hex::encode([header.as_slice(), sealed.as_slice()].concat()))
}

/// Open bytes sealed by [`encrypt_data`]
pub fn decrypt_data(encrypted_hex: &str, password: &str) -> Result<Vec<u8>, KeyError> {
    let envelope = hex::decode(encrypted_hex).map_err(|e| KeyError::Decryption(e.to_string()))?;

    let min_len = SALT_LEN + NONCE_LEN + TAG_LEN;
    if envelope.len() < min_len {
        return Err(KeyError::Decryption(format!(
            "Envelope too short: {} bytes, need at least {}",
            envelope.len(),
            min_len
        )));
    }

    let (salt, body) = envelope.split_at(SALT_LEN);
    let (nonce, sealed) = body.split_at(NONCE_LEN);

    keystore_cipher(password, salt)
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| KeyError::Decryption("Wrong password or corrupted keystore".to_string()))
}

fn keystore_cipher(password: &str, salt: &[u8]) -> Aes256Gcm {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key))
}

/// Encrypt a mnemonic phrase for storage
pub fn encrypt_mnemonic(mnemonic: &bip39::Mnemonic, password: &str) -> Result<String, KeyError> {
    encrypt_data(mnemonic.to_string().as_bytes(), password)
}

/// Open a sealed mnemonic and re-validate its checksum
pub fn decrypt_mnemonic(encrypted_hex: &str, password: &str) -> Result<bip39::Mnemonic, KeyError> {
    let phrase = String::from_utf8(decrypt_data(encrypted_hex, password)?)
        .map_err(|_| KeyError::Decryption("Keystore phrase is not UTF-8".to_string()))?;
    parse_mnemonic(&phrase)
}
