//! Message signing methods
//!
//! `SignMessageType` selects between BIP-322 simple signing and the legacy
//! Bitcoin signed-message (ECDSA) scheme. The ECDSA scheme is implemented
//! here; BIP-322 lives in [`crate::bitcoin::bip322`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, Signing};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use serde::{Deserialize, Serialize};

/// Message signing method requested from a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignMessageType {
    #[serde(rename = "bip322-simple")]
    Bip322Simple,
    #[serde(rename = "ecdsa")]
    Ecdsa,
}

impl SignMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            SignMessageType::Bip322Simple => "bip322-simple",
            SignMessageType::Ecdsa => "ecdsa",
        }
    }
}

impl std::fmt::Display for SignMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignMessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bip322-simple" | "bip322" => Ok(SignMessageType::Bip322Simple),
            "ecdsa" => Ok(SignMessageType::Ecdsa),
            _ => Err(format!(
                "Invalid signing method '{}'. Valid options: bip322-simple, ecdsa",
                s
            )),
        }
    }
}

/// Legacy message signing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Sign with the Bitcoin signed-message prefix
///
/// Returns the 65-byte compact recoverable signature, base64 encoded.
pub fn sign_ecdsa_message<C: Signing>(
    secp: &Secp256k1<C>,
    secret_key: &SecretKey,
    message: &str,
) -> String {
    let digest = signed_msg_hash(message);
    let signature = secp.sign_ecdsa_recoverable(
        &Message::from_digest(digest.to_byte_array()),
        secret_key,
    );
    STANDARD.encode(MessageSignature::new(signature, true).serialize())
}

/// Verify a legacy signature against a compressed public key (hex)
pub fn verify_ecdsa_message(
    message: &str,
    signature: &str,
    public_key_hex: &str,
) -> Result<bool, MessageError> {
    let bytes = STANDARD
        .decode(signature.trim())
        .map_err(|e| MessageError::MalformedSignature(e.to_string()))?;
    let signature = MessageSignature::from_slice(&bytes)
        .map_err(|e| MessageError::MalformedSignature(e.to_string()))?;

    let expected = bitcoin::PublicKey::from_slice(
        &hex::decode(public_key_hex).map_err(|e| MessageError::InvalidPublicKey(e.to_string()))?,
    )
    .map_err(|e| MessageError::InvalidPublicKey(e.to_string()))?;

    let secp = Secp256k1::verification_only();
    match signature.recover_pubkey(&secp, signed_msg_hash(message)) {
        Ok(recovered) => Ok(recovered == expected),
        Err(_) => Ok(false),
    }
}
