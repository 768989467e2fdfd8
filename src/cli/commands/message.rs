//! Message command implementations

use bitcoin::secp256k1::Secp256k1;
use std::str::FromStr;

use crate::bitcoin::bip322::verify_simple;
use crate::bitcoin::message::verify_ecdsa_message;
use crate::bitcoin::{Bip322Error, MessageError, SignMessageType};
use crate::config::{ConfigError, GlobalConfig};
use crate::error::WalletError;
use crate::provider::keystore::KeystoreProvider;
use crate::provider::{BtcProvider, IProvider};
use crate::storage::file_system::{load_keystore, FileSystemError};

#[derive(Debug, thiserror::Error)]
pub enum MessageCommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("File system error: {0}")]
    FileSystem(#[from] FileSystemError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("BIP322 error: {0}")]
    Bip322(#[from] Bip322Error),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Invalid signing method: {0}")]
    InvalidMethod(String),

    #[error("Keystore name required (use --keystore <name>)")]
    KeystoreRequired,

    #[error("{0} is required for {1} verification")]
    MissingArgument(&'static str, SignMessageType),

    #[error("Signature does not verify")]
    InvalidSignature,
}

/// Sign a message with a keystore account
pub async fn sign(
    keystore: Option<&str>,
    password: &str,
    message: &str,
    method: &str,
    account_index: u32,
    config: &GlobalConfig,
) -> Result<String, MessageCommandError> {
    let name = keystore.ok_or(MessageCommandError::KeystoreRequired)?;
    let method = SignMessageType::from_str(method).map_err(MessageCommandError::InvalidMethod)?;

    let secp = Secp256k1::new();
    let (keys, metadata) = load_keystore(&secp, name, password, config.data_dir.as_deref())?;

    let provider = KeystoreProvider::new(name, keys, metadata.network);
    provider.switch_account(account_index)?;
    provider.connect_wallet().await?;

    let address = provider.get_address().await?;
    let signature = BtcProvider::sign_message(&provider, message, method).await?;

    println!("✓ Message signed ({})", method);
    println!("  Address:   {}", address);
    println!("  Signature: {}", signature);

    Ok(signature)
}

/// Verify a BIP322-simple or ECDSA signature
pub fn verify(
    message: &str,
    signature: &str,
    address: Option<&str>,
    public_key: Option<&str>,
    method: &str,
    config: &GlobalConfig,
) -> Result<(), MessageCommandError> {
    let method = SignMessageType::from_str(method).map_err(MessageCommandError::InvalidMethod)?;

    let valid = match method {
        SignMessageType::Bip322Simple => {
            let address = address.ok_or(MessageCommandError::MissingArgument("--address", method))?;
            verify_simple(address, message, signature, config.bitcoin_network()?)?
        }
        SignMessageType::Ecdsa => {
            let public_key =
                public_key.ok_or(MessageCommandError::MissingArgument("--public-key", method))?;
            verify_ecdsa_message(message, signature, public_key)?
        }
    };

    if !valid {
        return Err(MessageCommandError::InvalidSignature);
    }

    println!("✓ Signature is valid ({})", method);
    Ok(())
}
