//! File system operations for keystore persistence
//!
//! Manages the keystore directory structure and saving/loading encrypted
//! keys and keystore metadata.

use bitcoin::secp256k1::{Secp256k1, Signing};
use std::fs;
use std::path::PathBuf;

use crate::storage::keys::KeyError;
use crate::storage::models::{EncryptedKeystore, KeystoreKeys, KeystoreMetadata};

/// File system errors
#[derive(Debug, thiserror::Error)]
pub enum FileSystemError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Keystore already exists: {0}")]
    KeystoreExists(String),

    #[error("Keystore not found: {0}")]
    KeystoreNotFound(String),

    #[error("Keystores directory not found")]
    KeystoresDirectoryNotFound,
}

/// Get the default keystores directory path
///
/// Returns: `~/.staking-wallet-connector/keystores/`
pub fn default_keystores_dir() -> Result<PathBuf, FileSystemError> {
    let config_dir = crate::config::default_config_dir()
        .map_err(|_| FileSystemError::KeystoresDirectoryNotFound)?;
    Ok(config_dir.join("keystores"))
}

/// Get the keystores directory under a custom data directory or the default
pub fn keystores_dir(custom_base: Option<&str>) -> Result<PathBuf, FileSystemError> {
    match custom_base {
        Some(dir) => Ok(PathBuf::from(dir).join("keystores")),
        None => default_keystores_dir(),
    }
}

/// Get the directory path for a specific keystore
///
/// Returns: `<base>/keystores/<name>/`
pub fn keystore_dir(name: &str, custom_base: Option<&str>) -> Result<PathBuf, FileSystemError> {
    Ok(keystores_dir(custom_base)?.join(name))
}

/// Save a new keystore to disk
///
/// Saves:
/// 1. Encrypted keys to `keys.json`
/// 2. Metadata to `keystore.json`
///
/// # Errors
///
/// Returns error if the keystore already exists or files cannot be written.
///
/// # Example
///
/// ```ignore
/// let keys = KeystoreKeys::from_mnemonic(&secp, &mnemonic, network)?;
/// save_keystore(&keys, &metadata, "password", None)?;
/// ```
pub fn save_keystore(
    keys: &KeystoreKeys,
    metadata: &KeystoreMetadata,
    password: &str,
    custom_base: Option<&str>,
) -> Result<PathBuf, FileSystemError> {
    let keystore_path = keystore_dir(&metadata.name, custom_base)?;

    if keystore_path.exists() {
        return Err(FileSystemError::KeystoreExists(metadata.name.clone()));
    }
    fs::create_dir_all(&keystore_path)?;

    let encrypted = EncryptedKeystore::from_keys(keys, password)?;
    fs::write(
        keystore_path.join("keys.json"),
        serde_json::to_string_pretty(&encrypted)?,
    )?;

    fs::write(
        keystore_path.join("keystore.json"),
        serde_json::to_string_pretty(metadata)?,
    )?;

    log::info!("Saved keystore '{}' to {:?}", metadata.name, keystore_path);

    Ok(keystore_path)
}

/// Load and decrypt a keystore
///
/// # Errors
///
/// Returns error if:
/// - Keystore not found
/// - Wrong password
/// - Corrupted files
pub fn load_keystore<C: Signing>(
    secp: &Secp256k1<C>,
    name: &str,
    password: &str,
    custom_base: Option<&str>,
) -> Result<(KeystoreKeys, KeystoreMetadata), FileSystemError> {
    let metadata = load_keystore_metadata(name, custom_base)?;
    let keystore_path = keystore_dir(name, custom_base)?;

    let keys_json = fs::read_to_string(keystore_path.join("keys.json"))?;
    let encrypted: EncryptedKeystore = serde_json::from_str(&keys_json)?;
    let keys = encrypted.to_keys(secp, password, metadata.network)?;

    Ok((keys, metadata))
}

/// Load keystore metadata without decrypting keys
pub fn load_keystore_metadata(
    name: &str,
    custom_base: Option<&str>,
) -> Result<KeystoreMetadata, FileSystemError> {
    let keystore_path = keystore_dir(name, custom_base)?;

    if !keystore_path.exists() {
        return Err(FileSystemError::KeystoreNotFound(name.to_string()));
    }

    let metadata_json = fs::read_to_string(keystore_path.join("keystore.json"))?;
    Ok(serde_json::from_str(&metadata_json)?)
}

/// List all keystores (newest first)
///
/// # Example
///
/// ```ignore
/// for keystore in list_keystores(None)? {
///     println!("{} ({})", keystore.name, keystore.network);
/// }
/// ```
pub fn list_keystores(custom_base: Option<&str>) -> Result<Vec<KeystoreMetadata>, FileSystemError> {
    let keystores_path = keystores_dir(custom_base)?;

    if !keystores_path.exists() {
        return Ok(Vec::new());
    }

    let mut keystores = Vec::new();

    for entry in fs::read_dir(&keystores_path)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let metadata_path = path.join("keystore.json");
        if !metadata_path.exists() {
            continue;
        }

        match fs::read_to_string(&metadata_path) {
            Ok(json) => match serde_json::from_str::<KeystoreMetadata>(&json) {
                Ok(metadata) => keystores.push(metadata),
                Err(e) => log::warn!("Failed to parse keystore metadata at {:?}: {}", path, e),
            },
            Err(e) => log::warn!("Failed to read keystore metadata at {:?}: {}", path, e),
        }
    }

    keystores.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(keystores)
}

/// Check if a keystore exists
pub fn keystore_exists(name: &str, custom_base: Option<&str>) -> bool {
    keystore_dir(name, custom_base)
        .map(|path| path.join("keystore.json").exists())
        .unwrap_or(false)
}
