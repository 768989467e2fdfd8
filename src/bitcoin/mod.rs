//! Bitcoin protocol layer
//!
//! Address derivation/validation, PSBT signing helpers, and message signing
//! (BIP-322 simple and legacy ECDSA).

pub mod address;
pub mod bip322;
pub mod message;
pub mod psbt;

pub use address::{
    derive_native_segwit_address, derive_p2tr_from_extended_key, derive_taproot_address,
    validate_address_matches_key, validate_address_prefix, AddressError, DerivedTaprootOutput,
};
pub use bip322::Bip322Error;
pub use message::{MessageError, SignMessageType};
pub use psbt::{psbt_from_hex, psbt_to_hex, PsbtError, SignMode};
