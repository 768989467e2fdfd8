//! Bitcoin address derivation and validation
//!
//! Derives native segwit (P2WPKH) and BIP-86 taproot (P2TR) addresses from
//! public keys or extended public keys, and checks that an address a wallet
//! reports actually belongs to the public key it reports.

use bitcoin::bip32::{DerivationPath, Xpub};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::config::NetworkType;

/// Address derivation and validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Failed to derive address: {0}")]
    Derivation(String),

    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),

    #[error("Invalid address prefix for {network}: expected '{expected}', got '{address}'")]
    InvalidAddressPrefix {
        network: NetworkType,
        expected: String,
        address: String,
    },

    #[error("Invalid extended public key: {0}")]
    ExtendedKey(String),

    #[error("Elliptic curve context not initialized")]
    EccNotInitialized,
}

/// Human-readable prefixes for one network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefixes {
    pub common: &'static str,
    pub native_segwit: &'static str,
    pub taproot: &'static str,
}

const MAINNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    common: "bc1",
    native_segwit: "bc1q",
    taproot: "bc1p",
};

// Testnet and signet share one bech32 hrp
const TESTNET_PREFIXES: AddressPrefixes = AddressPrefixes {
    common: "tb1",
    native_segwit: "tb1q",
    taproot: "tb1p",
};

/// Prefix table for a network
pub fn prefixes(network: NetworkType) -> &'static AddressPrefixes {
    match network {
        NetworkType::Mainnet => &MAINNET_PREFIXES,
        NetworkType::Testnet | NetworkType::Signet => &TESTNET_PREFIXES,
    }
}

/// Taproot output derived from an extended public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTaprootOutput {
    pub address: String,
    /// Compressed (33-byte) child public key, hex
    pub public_key_hex: String,
    pub script_pubkey_hex: String,
}

static ECC: OnceLock<Secp256k1<All>> = OnceLock::new();

/// Initialize the shared curve context (idempotent)
pub fn init_ecc() -> &'static Secp256k1<All> {
    ECC.get_or_init(|| {
        log::debug!("Initializing secp256k1 context");
        Secp256k1::new()
    })
}

fn ecc() -> Result<&'static Secp256k1<All>, AddressError> {
    ECC.get().ok_or(AddressError::EccNotInitialized)
}

/// Derive a BIP-86 taproot address
///
/// Accepts a 64-char x-only key or a 66-char compressed key; for the latter
/// the leading parity byte is dropped.
///
/// # Example
///
/// ```ignore
/// let address = derive_taproot_address(
///     "cc8a4bc64d897bddc5fbc2f670f7a8ba0b386779106cf1223c6fc5d7cd6fc115",
///     NetworkType::Mainnet,
/// )?;
/// assert!(address.starts_with("bc1p"));
/// ```
pub fn derive_taproot_address(
    public_key_hex: &str,
    network: NetworkType,
) -> Result<String, AddressError> {
    let x_only_hex = match public_key_hex.len() {
        64 => Some(public_key_hex),
        66 => public_key_hex.get(2..),
        other => {
            return Err(AddressError::Derivation(format!(
                "public key must be 64 or 66 hex chars, got {}",
                other
            )))
        }
    }
    .filter(|hex| hex.is_ascii())
    .ok_or_else(|| AddressError::Derivation("public key is not hex".to_string()))?;

    let bytes = hex::decode(x_only_hex).map_err(|e| AddressError::Derivation(e.to_string()))?;
    let internal_key =
        XOnlyPublicKey::from_slice(&bytes).map_err(|e| AddressError::Derivation(e.to_string()))?;

    let secp = init_ecc();
    let address = Address::p2tr(secp, internal_key, None, network.to_bitcoin());

    Ok(address.to_string())
}

/// Derive a native segwit (P2WPKH) address from a compressed public key
pub fn derive_native_segwit_address(
    public_key_hex: &str,
    network: NetworkType,
) -> Result<String, AddressError> {
    if public_key_hex.len() != 66 {
        return Err(AddressError::InvalidPublicKey(format!(
            "native segwit requires a 66-char compressed key, got {} chars",
            public_key_hex.len()
        )));
    }

    let bytes =
        hex::decode(public_key_hex).map_err(|e| AddressError::InvalidPublicKey(e.to_string()))?;
    let public_key = CompressedPublicKey::from_slice(&bytes)
        .map_err(|e| AddressError::InvalidPublicKey(e.to_string()))?;

    Ok(Address::p2wpkh(&public_key, network.to_bitcoin()).to_string())
}

/// Check that `address` is the taproot or native segwit address of the key
///
/// Returns `false` for any other address type or when derivation fails.
pub fn validate_address_matches_key(
    address: &str,
    public_key_hex: &str,
    network: NetworkType,
) -> bool {
    let table = prefixes(network);

    let derived = if address.starts_with(table.taproot) {
        derive_taproot_address(public_key_hex, network)
    } else if address.starts_with(table.native_segwit) {
        derive_native_segwit_address(public_key_hex, network)
    } else {
        return false;
    };

    match derived {
        Ok(derived) => derived == address,
        Err(e) => {
            log::debug!("Address check for {} failed: {}", address, e);
            false
        }
    }
}

/// Validate that an address carries the common prefix of a network
///
/// `network` is a configuration name (`mainnet`, `testnet`, `signet`).
pub fn validate_address_prefix(network: &str, address: &str) -> Result<(), AddressError> {
    let network = NetworkType::from_str(network)
        .map_err(|_| AddressError::UnsupportedNetwork(network.to_string()))?;
    let table = prefixes(network);

    if !address.starts_with(table.common) {
        return Err(AddressError::InvalidAddressPrefix {
            network,
            expected: table.common.to_string(),
            address: address.to_string(),
        });
    }

    Ok(())
}

/// Derive a taproot output from an extended public key and relative path
///
/// Used for signers that only expose an account-level xpub. A missing curve
/// context triggers exactly one lazy initialization and retry.
pub fn derive_p2tr_from_extended_key(
    xpub: &str,
    derivation_path: &str,
    network: NetworkType,
) -> Result<DerivedTaprootOutput, AddressError> {
    match derive_p2tr_once(xpub, derivation_path, network) {
        Err(AddressError::EccNotInitialized) => {
            init_ecc();
            derive_p2tr_once(xpub, derivation_path, network)
        }
        other => other,
    }
}

fn derive_p2tr_once(
    xpub: &str,
    derivation_path: &str,
    network: NetworkType,
) -> Result<DerivedTaprootOutput, AddressError> {
    let secp = ecc()?;

    let xpub = Xpub::from_str(xpub).map_err(|e| AddressError::ExtendedKey(e.to_string()))?;
    let path = parse_relative_path(derivation_path)?;

    let child = xpub
        .derive_pub(secp, &path)
        .map_err(|e| AddressError::ExtendedKey(format!("Derivation failed: {}", e)))?;

    let compressed = child.public_key.serialize();
    let (internal_key, _parity) = child.public_key.x_only_public_key();
    let address = Address::p2tr(secp, internal_key, None, network.to_bitcoin());

    Ok(DerivedTaprootOutput {
        address: address.to_string(),
        public_key_hex: hex::encode(compressed),
        script_pubkey_hex: hex::encode(address.script_pubkey().as_bytes()),
    })
}

/// Parse a path relative to an extended key ("m/0/0", "0/0" or "")
pub(crate) fn parse_relative_path(path: &str) -> Result<DerivationPath, AddressError> {
    let trimmed = path.trim();
    let normalized = if trimmed.is_empty() || trimmed == "m" {
        "m".to_string()
    } else if trimmed.starts_with("m/") {
        trimmed.to_string()
    } else {
        format!("m/{}", trimmed.trim_start_matches('/'))
    };

    DerivationPath::from_str(&normalized)
        .map_err(|e| AddressError::ExtendedKey(format!("Invalid derivation path '{}': {}", path, e)))
}
