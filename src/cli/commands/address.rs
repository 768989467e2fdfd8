//! Address command implementations

use crate::bitcoin::{
    derive_native_segwit_address, derive_p2tr_from_extended_key, derive_taproot_address,
    validate_address_matches_key, validate_address_prefix, AddressError, DerivedTaprootOutput,
};
use crate::config::{ConfigError, GlobalConfig};

#[derive(Debug, thiserror::Error)]
pub enum AddressCommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Unknown address type '{0}'. Use: taproot, segwit")]
    UnknownKind(String),

    #[error("Address {address} does not belong to public key {public_key}")]
    KeyMismatch { address: String, public_key: String },
}

/// Derive a taproot or native segwit address from a public key
pub fn derive(
    public_key: &str,
    kind: &str,
    config: &GlobalConfig,
) -> Result<String, AddressCommandError> {
    let network = config.bitcoin_network()?;

    let address = match kind.to_lowercase().as_str() {
        "taproot" | "p2tr" => derive_taproot_address(public_key, network)?,
        "segwit" | "native-segwit" | "p2wpkh" => derive_native_segwit_address(public_key, network)?,
        other => return Err(AddressCommandError::UnknownKind(other.to_string())),
    };

    println!("{}", address);
    Ok(address)
}

/// Check the network prefix and, when given, the owning public key
pub fn validate(
    address: &str,
    public_key: Option<&str>,
    config: &GlobalConfig,
) -> Result<(), AddressCommandError> {
    let network = config.bitcoin_network()?;
    validate_address_prefix(network.as_str(), address)?;

    if let Some(public_key) = public_key {
        if !validate_address_matches_key(address, public_key, network) {
            return Err(AddressCommandError::KeyMismatch {
                address: address.to_string(),
                public_key: public_key.to_string(),
            });
        }
    }

    println!("✓ Address is valid for {}", network);
    if public_key.is_some() {
        println!("✓ Address matches public key");
    }
    Ok(())
}

/// Derive a taproot output from an xpub and relative path
pub fn from_xpub(
    xpub: &str,
    path: &str,
    config: &GlobalConfig,
) -> Result<DerivedTaprootOutput, AddressCommandError> {
    let network = config.bitcoin_network()?;
    let derived = derive_p2tr_from_extended_key(xpub, path, network)?;

    println!("  Address:       {}", derived.address);
    println!("  Public Key:    {}", derived.public_key_hex);
    println!("  ScriptPubKey:  {}", derived.script_pubkey_hex);
    Ok(derived)
}
