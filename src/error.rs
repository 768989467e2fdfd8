//! Wallet error taxonomy
//!
//! Every provider normalizes vendor failures into [`WalletError`] before
//! they leave the provider, tagging them with the wallet's display name.
//! Layer errors (address codec, PSBT, BIP-322, storage, transport, policy)
//! are folded in with `#[from]`.

use crate::bitcoin::{AddressError, Bip322Error, MessageError, PsbtError};
use crate::config::ConfigError;
use crate::provider::ledger::{PolicyError, TransportError};
use crate::storage::file_system::FileSystemError;
use crate::storage::keys::KeyError;
use crate::storage::StorageError;

/// Errors surfaced by providers, connectors and the registry
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    // Absence
    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("{wallet}: address not found")]
    AddressNotFound { wallet: String },

    #[error("{wallet}: public key not found")]
    PublicKeyNotFound { wallet: String },

    #[error("{wallet}: chain id not initialized")]
    ChainIdNotInitialized { wallet: String },

    #[error("{wallet}: RPC endpoint not initialized")]
    RpcNotInitialized { wallet: String },

    #[error("{wallet}: wallet not connected")]
    WalletNotConnected { wallet: String },

    // Connection
    #[error("{wallet}: connection rejected by user")]
    ConnectionRejected { wallet: String },

    #[error("{wallet}: connection failed: {reason}")]
    ConnectionFailed { wallet: String, reason: String },

    #[error("{wallet}: connection canceled")]
    ConnectionCanceled { wallet: String },

    #[error("{wallet}: extension context invalidated, reload the page")]
    ExtensionContextInvalidated { wallet: String },

    #[error("{wallet}: incompatible wallet version: {reason}")]
    IncompatibleVersion { wallet: String, reason: String },

    #[error("{wallet}: network mismatch: expected {expected}, wallet is on {actual}")]
    NetworkMismatch {
        wallet: String,
        expected: String,
        actual: String,
    },

    // Protocol
    #[error("Address {address} does not belong to public key {public_key_hex}")]
    AddressMismatch {
        address: String,
        public_key_hex: String,
    },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Psbt(#[from] PsbtError),

    #[error(transparent)]
    Bip322(#[from] Bip322Error),

    #[error(transparent)]
    Message(#[from] MessageError),

    // Signing
    #[error("PSBT hex is required")]
    PsbtHexRequired,

    #[error("At least one PSBT hex is required")]
    PsbtHexesRequired,

    #[error("Got {options} signing option entries for {psbts} PSBTs")]
    PsbtOptionsLengthMismatch { psbts: usize, options: usize },

    #[error("{wallet}: signing rejected by user")]
    SigningRejected { wallet: String },

    #[error("{wallet}: failed to extract signature: {reason}")]
    SignatureExtraction { wallet: String, reason: String },

    #[error("{wallet}: failed to read QR code: {reason}")]
    QrRead { wallet: String, reason: String },

    #[error("{wallet}: QR scan failed: {reason}")]
    QrScan { wallet: String, reason: String },

    #[error("{wallet}: timed out after {secs}s waiting for a response")]
    Timeout { wallet: String, secs: u64 },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    // Resource limits
    #[error("{wallet}: maximum iterations ({max}) exceeded")]
    MaxIterationExceeded { wallet: String, max: usize },

    #[error("{wallet}: {feature} is not implemented")]
    NotImplemented { wallet: String, feature: String },

    // Layers
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("File system error: {0}")]
    FileSystem(#[from] FileSystemError),
}

impl WalletError {
    /// Whether the user declined a prompt (connect or sign)
    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            WalletError::ConnectionRejected { .. }
                | WalletError::ConnectionCanceled { .. }
                | WalletError::SigningRejected { .. }
        )
    }
}

/// Map a vendor error message into the taxonomy
///
/// Matching is case-insensitive on well-known fragments; anything else
/// becomes `ConnectionFailed` carrying the original message.
pub fn normalize_vendor_error(wallet: &str, message: &str) -> WalletError {
    let lowered = message.to_lowercase();
    let wallet = wallet.to_string();

    if lowered.contains("context invalidated") {
        WalletError::ExtensionContextInvalidated { wallet }
    } else if lowered.contains("reject") || lowered.contains("denied") || lowered.contains("declined") {
        WalletError::ConnectionRejected { wallet }
    } else if lowered.contains("cancel") {
        WalletError::ConnectionCanceled { wallet }
    } else if lowered.contains("not connected") {
        WalletError::WalletNotConnected { wallet }
    } else if lowered.contains("not installed") {
        WalletError::WalletNotFound(wallet)
    } else if lowered.contains("version") {
        WalletError::IncompatibleVersion {
            wallet,
            reason: message.to_string(),
        }
    } else {
        WalletError::ConnectionFailed {
            wallet,
            reason: message.to_string(),
        }
    }
}
