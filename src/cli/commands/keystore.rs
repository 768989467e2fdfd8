//! Keystore command implementations

use bitcoin::secp256k1::Secp256k1;

use crate::config::{ConfigError, GlobalConfig};
use crate::storage::file_system::{keystore_exists, list_keystores, save_keystore, FileSystemError};
use crate::storage::keys::{generate_mnemonic, parse_mnemonic, KeyError};
use crate::storage::models::{KeystoreInfo, KeystoreKeys, KeystoreMetadata};

#[derive(Debug, thiserror::Error)]
pub enum KeystoreCommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("File system error: {0}")]
    FileSystem(#[from] FileSystemError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Keystore '{0}' already exists")]
    KeystoreExists(String),
}

/// Create a new keystore with a generated mnemonic
pub fn create(
    name: &str,
    password: &str,
    config: &GlobalConfig,
) -> Result<KeystoreInfo, KeystoreCommandError> {
    let mnemonic = generate_mnemonic()?;
    let info = store(name, &mnemonic, password, config)?;

    println!("✓ Keystore '{}' created successfully", name);
    println!();
    print_info(&info);
    println!();
    println!("  IMPORTANT: Write down your recovery phrase:");
    println!("  {}", info.mnemonic);
    println!();
    println!("  Keep this phrase safe and secret!");

    Ok(info)
}

/// Import an existing keystore from a mnemonic phrase
pub fn import(
    name: &str,
    mnemonic: &str,
    password: &str,
    config: &GlobalConfig,
) -> Result<KeystoreInfo, KeystoreCommandError> {
    let mnemonic = parse_mnemonic(mnemonic)?;
    let info = store(name, &mnemonic, password, config)?;

    println!("✓ Keystore '{}' imported successfully", name);
    println!();
    print_info(&info);

    Ok(info)
}

/// List all keystores
pub fn list(config: &GlobalConfig) -> Result<Vec<KeystoreMetadata>, KeystoreCommandError> {
    let data_dir = config.data_dir.as_deref();
    let keystores = list_keystores(data_dir)?;

    if keystores.is_empty() {
        println!("No keystores found.");
        println!();
        println!("Create a new keystore with:");
        println!("  wallet-connector keystore create <name> --password <password>");
        return Ok(keystores);
    }

    println!("Keystores ({}):", keystores.len());
    println!();
    for keystore in &keystores {
        println!("  {} [{}]", keystore.name, keystore.network);
        println!("    Address: {}", keystore.first_address);
        println!(
            "    Created: {}",
            keystore.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!();
    }

    Ok(keystores)
}

fn store(
    name: &str,
    mnemonic: &bip39::Mnemonic,
    password: &str,
    config: &GlobalConfig,
) -> Result<KeystoreInfo, KeystoreCommandError> {
    let data_dir = config.data_dir.as_deref();
    if keystore_exists(name, data_dir) {
        return Err(KeystoreCommandError::KeystoreExists(name.to_string()));
    }

    let network = config.bitcoin_network()?;
    let secp = Secp256k1::new();
    let keys = KeystoreKeys::from_mnemonic(&secp, mnemonic, network)?;
    let (public_key_hex, first_address) = keys.receive_account(&secp, 0, network)?;

    let metadata = KeystoreMetadata::new(name.to_string(), network, first_address, public_key_hex);
    save_keystore(&keys, &metadata, password, data_dir)?;

    Ok(KeystoreInfo::from_keys(&keys, &metadata))
}

fn print_info(info: &KeystoreInfo) {
    println!("  Network:            {}", info.network);
    println!("  First Address:      {}", info.first_address);
    println!("  Public Key:         {}", info.public_key_hex);
    println!("  Master Fingerprint: {}", info.master_fingerprint);
    println!("  Account Xpub:       {}", info.account_xpub);
}
