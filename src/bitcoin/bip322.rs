//! BIP-322 "simple" message signing
//!
//! Builds the virtual `to_spend` transaction and the `to_sign` PSBT, turns a
//! signed `to_sign` PSBT into the base64 witness signature, and verifies
//! such signatures for P2TR (key path) and P2WPKH addresses.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bitcoin::opcodes::all::{OP_PUSHBYTES_0, OP_RETURN};
use bitcoin::script::Builder;
use bitcoin::consensus::encode;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::psbt::{Psbt, PsbtSighashType};
use bitcoin::secp256k1::{ecdsa, schnorr, Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    absolute, Address, Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness, XOnlyPublicKey,
};
use std::str::FromStr;

use crate::bitcoin::psbt::{finalize_input, PsbtError};
use crate::config::NetworkType;

const MESSAGE_TAG: &[u8] = b"BIP0322-signed-message";

/// BIP-322 errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Bip322Error {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported address type for BIP-322 simple signing: {0}")]
    UnsupportedAddressType(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("PSBT error: {0}")]
    Psbt(#[from] PsbtError),

    #[error("Failed to extract signature: {0}")]
    SignatureExtraction(String),

    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

/// Tagged hash of a message: `sha256(sha256(tag) || sha256(tag) || message)`
pub fn message_hash(message: &[u8]) -> sha256::Hash {
    let tag_hash = sha256::Hash::hash(MESSAGE_TAG);
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_byte_array());
    engine.input(tag_hash.as_byte_array());
    engine.input(message);
    sha256::Hash::from_engine(engine)
}

/// Build the virtual `to_spend` transaction
pub fn build_to_spend(message: &[u8], script_pubkey: &ScriptBuf) -> Transaction {
    let script_sig = Builder::new()
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(message_hash(message).to_byte_array())
        .into_script();

    Transaction {
        version: Version(0),
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig,
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: script_pubkey.clone(),
        }],
    }
}

fn build_to_sign_tx(to_spend: &Transaction) -> Transaction {
    Transaction {
        version: Version(0),
        lock_time: absolute::LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: to_spend.compute_txid(),
                vout: 0,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new().push_opcode(OP_RETURN).into_script(),
        }],
    }
}

/// Build the `to_sign` PSBT for a signer's output script
///
/// The sighash type is always set to `SIGHASH_ALL`; `tap_internal_key`
/// must be given for taproot signers.
pub fn build_to_sign_psbt(
    message: &[u8],
    script_pubkey: &ScriptBuf,
    tap_internal_key: Option<XOnlyPublicKey>,
) -> Result<Psbt, Bip322Error> {
    let to_spend = build_to_spend(message, script_pubkey);
    let mut psbt = Psbt::from_unsigned_tx(build_to_sign_tx(&to_spend))
        .map_err(|e| PsbtError::Invalid(e.to_string()))?;

    let input = &mut psbt.inputs[0];
    input.witness_utxo = Some(to_spend.output[0].clone());
    input.sighash_type = Some(PsbtSighashType::from(EcdsaSighashType::All));
    input.tap_internal_key = tap_internal_key;

    Ok(psbt)
}

/// Build the `to_sign` PSBT for an address and its public key
///
/// Checks that the address is P2TR or P2WPKH on `network` and, for P2TR,
/// attaches the x-only internal key taken from `public_key_hex`.
pub fn prepare_to_sign(
    message: &str,
    address: &str,
    public_key_hex: &str,
    network: NetworkType,
) -> Result<Psbt, Bip322Error> {
    let address = parse_address(address, network)?;
    let script_pubkey = address.script_pubkey();

    let internal_key = if script_pubkey.is_p2tr() {
        Some(x_only_from_hex(public_key_hex)?)
    } else if script_pubkey.is_p2wpkh() {
        None
    } else {
        return Err(Bip322Error::UnsupportedAddressType(address.to_string()));
    };

    build_to_sign_psbt(message.as_bytes(), &script_pubkey, internal_key)
}

/// Finalize input 0 of a signed `to_sign` PSBT and encode its witness
pub fn extract_signature(mut psbt: Psbt) -> Result<String, Bip322Error> {
    if psbt.inputs.is_empty() {
        return Err(Bip322Error::SignatureExtraction(
            "to_sign PSBT has no inputs".to_string(),
        ));
    }

    if !finalize_input(&mut psbt, 0)? {
        return Err(Bip322Error::SignatureExtraction(
            "input 0 carries no finalizable signature".to_string(),
        ));
    }

    psbt.inputs[0]
        .final_script_witness
        .as_ref()
        .map(encode_witness)
        .ok_or_else(|| Bip322Error::SignatureExtraction("missing final witness".to_string()))
}

/// Encode a witness stack as a BIP-322 simple signature (base64)
pub fn encode_witness(witness: &Witness) -> String {
    STANDARD.encode(encode::serialize(witness))
}

/// Decode a base64 BIP-322 simple signature into its witness stack
pub fn decode_witness(signature: &str) -> Result<Witness, Bip322Error> {
    let bytes = STANDARD
        .decode(signature.trim())
        .map_err(|e| Bip322Error::MalformedSignature(e.to_string()))?;
    encode::deserialize::<Witness>(&bytes).map_err(|e| Bip322Error::MalformedSignature(e.to_string()))
}

/// Verify a BIP-322 simple signature
///
/// Supports P2TR key-path and P2WPKH addresses. A well-formed signature that
/// does not verify yields `Ok(false)`.
pub fn verify_simple(
    address: &str,
    message: &str,
    signature: &str,
    network: NetworkType,
) -> Result<bool, Bip322Error> {
    let address = parse_address(address, network)?;
    let script_pubkey = address.script_pubkey();
    let witness = decode_witness(signature)?;

    let to_spend = build_to_spend(message.as_bytes(), &script_pubkey);
    let to_sign = build_to_sign_tx(&to_spend);
    let prevouts = [to_spend.output[0].clone()];
    let secp = Secp256k1::verification_only();

    if script_pubkey.is_p2tr() {
        if witness.len() != 1 {
            return Ok(false);
        }
        let signature = bitcoin::taproot::Signature::from_slice(&witness[0])
            .map_err(|e| Bip322Error::MalformedSignature(e.to_string()))?;
        if !matches!(
            signature.sighash_type,
            TapSighashType::Default | TapSighashType::All
        ) {
            return Ok(false);
        }

        let output_key = XOnlyPublicKey::from_slice(&script_pubkey.as_bytes()[2..34])
            .map_err(|e| Bip322Error::InvalidAddress(e.to_string()))?;
        let sighash = SighashCache::new(&to_sign)
            .taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), signature.sighash_type)
            .map_err(|e| PsbtError::Sighash(e.to_string()))?;

        let message = Message::from_digest(sighash.to_byte_array());
        Ok(verify_schnorr(&secp, &signature.signature, &message, &output_key))
    } else if script_pubkey.is_p2wpkh() {
        if witness.len() != 2 {
            return Ok(false);
        }
        let signature = bitcoin::ecdsa::Signature::from_slice(&witness[0])
            .map_err(|e| Bip322Error::MalformedSignature(e.to_string()))?;
        if signature.sighash_type != EcdsaSighashType::All {
            return Ok(false);
        }
        let public_key = CompressedPublicKey::from_slice(&witness[1])
            .map_err(|e| Bip322Error::InvalidPublicKey(e.to_string()))?;
        if ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()) != script_pubkey {
            return Ok(false);
        }

        let sighash = SighashCache::new(&to_sign)
            .p2wpkh_signature_hash(0, &script_pubkey, Amount::ZERO, EcdsaSighashType::All)
            .map_err(|e| PsbtError::Sighash(e.to_string()))?;

        let message = Message::from_digest(sighash.to_byte_array());
        Ok(verify_ecdsa(&secp, &signature.signature, &message, &public_key))
    } else {
        Err(Bip322Error::UnsupportedAddressType(address.to_string()))
    }
}

fn verify_schnorr(
    secp: &Secp256k1<bitcoin::secp256k1::VerifyOnly>,
    signature: &schnorr::Signature,
    message: &Message,
    key: &XOnlyPublicKey,
) -> bool {
    secp.verify_schnorr(signature, message, key).is_ok()
}

fn verify_ecdsa(
    secp: &Secp256k1<bitcoin::secp256k1::VerifyOnly>,
    signature: &ecdsa::Signature,
    message: &Message,
    key: &CompressedPublicKey,
) -> bool {
    secp.verify_ecdsa(message, signature, &key.0).is_ok()
}

fn parse_address(address: &str, network: NetworkType) -> Result<Address, Bip322Error> {
    Address::from_str(address)
        .map_err(|e| Bip322Error::InvalidAddress(e.to_string()))?
        .require_network(network.to_bitcoin())
        .map_err(|e| Bip322Error::InvalidAddress(e.to_string()))
}

fn x_only_from_hex(public_key_hex: &str) -> Result<XOnlyPublicKey, Bip322Error> {
    let x_only_hex = match public_key_hex.len() {
        66 => public_key_hex.get(2..),
        _ => Some(public_key_hex),
    }
    .ok_or_else(|| Bip322Error::InvalidPublicKey("public key is not hex".to_string()))?;
    let bytes = hex::decode(x_only_hex).map_err(|e| Bip322Error::InvalidPublicKey(e.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|e| Bip322Error::InvalidPublicKey(e.to_string()))
}
