//! PSBT helpers shared by every Bitcoin signer
//!
//! Hex codec at the provider boundary, key-path / script-path taproot and
//! P2WPKH input signing for locally held keys, and finalization of the
//! input types a single-key wallet can complete on its own.

use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Message, Secp256k1, Signing, Verification};
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::{ecdsa, taproot, CompressedPublicKey, ScriptBuf, TxOut, Witness};

/// PSBT handling errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PsbtError {
    #[error("Invalid PSBT hex: {0}")]
    InvalidHex(String),

    #[error("Invalid PSBT: {0}")]
    Invalid(String),

    #[error("Input {0} is missing its witness UTXO")]
    MissingWitnessUtxo(usize),

    #[error("Input index {0} out of range")]
    InputOutOfRange(usize),

    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    #[error("Input {0} has no signature to finalize")]
    MissingSignature(usize),
}

/// How a local key should sign an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMode {
    /// Key-path spend with the BIP-86 tweaked key (or P2WPKH)
    Tweaked,
    /// Script-path spend with the untweaked key over every leaf that commits to it
    Untweaked,
}

/// Parse a hex-encoded PSBT
pub fn psbt_from_hex(psbt_hex: &str) -> Result<Psbt, PsbtError> {
    let bytes = hex::decode(psbt_hex.trim()).map_err(|e| PsbtError::InvalidHex(e.to_string()))?;
    Psbt::deserialize(&bytes).map_err(|e| PsbtError::Invalid(e.to_string()))
}

/// Serialize a PSBT to hex (unknown and proprietary fields are kept)
pub fn psbt_to_hex(psbt: &Psbt) -> String {
    hex::encode(psbt.serialize())
}

/// Witness UTXOs of every input, in order
pub fn prevouts(psbt: &Psbt) -> Result<Vec<TxOut>, PsbtError> {
    psbt.inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            input
                .witness_utxo
                .clone()
                .ok_or(PsbtError::MissingWitnessUtxo(index))
        })
        .collect()
}

/// Sign one input with a local keypair
///
/// Returns `Ok(false)` when the input does not belong to the key, so callers
/// can sweep over all inputs.
pub fn sign_input<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    psbt: &mut Psbt,
    index: usize,
    keypair: &Keypair,
    mode: SignMode,
) -> Result<bool, PsbtError> {
    if index >= psbt.inputs.len() {
        return Err(PsbtError::InputOutOfRange(index));
    }
    let prevouts = prevouts(psbt)?;
    let script_pubkey = prevouts[index].script_pubkey.clone();
    let (x_only, _) = keypair.x_only_public_key();

    match mode {
        SignMode::Tweaked if script_pubkey.is_p2tr() => {
            if script_pubkey != ScriptBuf::new_p2tr(secp, x_only, None) {
                return Ok(false);
            }
            let sighash_type = tap_sighash_type(psbt, index)?;
            let sighash = SighashCache::new(&psbt.unsigned_tx)
                .taproot_key_spend_signature_hash(index, &Prevouts::All(&prevouts), sighash_type)
                .map_err(|e| PsbtError::Sighash(e.to_string()))?;

            let tweaked = keypair.tap_tweak(secp, None).to_keypair();
            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_schnorr_no_aux_rand(&message, &tweaked);

            let input = &mut psbt.inputs[index];
            input.tap_key_sig = Some(taproot::Signature {
                signature,
                sighash_type,
            });
            input.tap_internal_key.get_or_insert(x_only);
            Ok(true)
        }
        SignMode::Tweaked if script_pubkey.is_p2wpkh() => {
            let public_key = CompressedPublicKey(keypair.public_key());
            if script_pubkey != ScriptBuf::new_p2wpkh(&public_key.wpubkey_hash()) {
                return Ok(false);
            }
            let sighash_type = ecdsa_sighash_type(psbt, index)?;
            let sighash = SighashCache::new(&psbt.unsigned_tx)
                .p2wpkh_signature_hash(index, &script_pubkey, prevouts[index].value, sighash_type)
                .map_err(|e| PsbtError::Sighash(e.to_string()))?;

            let message = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa(&message, &keypair.secret_key());

            psbt.inputs[index].partial_sigs.insert(
                bitcoin::PublicKey::new(keypair.public_key()),
                ecdsa::Signature {
                    signature,
                    sighash_type,
                },
            );
            Ok(true)
        }
        SignMode::Tweaked => Ok(false),
        SignMode::Untweaked => {
            let leaves: Vec<TapLeafHash> = psbt.inputs[index]
                .tap_scripts
                .values()
                .filter(|(script, _)| script_commits_to_key(script, &x_only))
                .map(|(script, version)| TapLeafHash::from_script(script, *version))
                .collect();
            if leaves.is_empty() {
                return Ok(false);
            }

            let sighash_type = tap_sighash_type(psbt, index)?;
            for leaf_hash in leaves {
                let sighash = SighashCache::new(&psbt.unsigned_tx)
                    .taproot_script_spend_signature_hash(
                        index,
                        &Prevouts::All(&prevouts),
                        leaf_hash,
                        sighash_type,
                    )
                    .map_err(|e| PsbtError::Sighash(e.to_string()))?;
                let message = Message::from_digest(sighash.to_byte_array());
                let signature = secp.sign_schnorr_no_aux_rand(&message, keypair);

                psbt.inputs[index].tap_script_sigs.insert(
                    (x_only, leaf_hash),
                    taproot::Signature {
                        signature,
                        sighash_type,
                    },
                );
            }
            Ok(true)
        }
    }
}

/// Finalize a key-path taproot or P2WPKH input
///
/// Script-path inputs are left for the party assembling the full witness.
pub fn finalize_input(psbt: &mut Psbt, index: usize) -> Result<bool, PsbtError> {
    let input = psbt
        .inputs
        .get_mut(index)
        .ok_or(PsbtError::InputOutOfRange(index))?;

    if input.final_script_witness.is_some() {
        return Ok(true);
    }

    let witness = if let Some(signature) = &input.tap_key_sig {
        Witness::p2tr_key_spend(signature)
    } else if input.partial_sigs.len() == 1 && is_p2wpkh(input.witness_utxo.as_ref()) {
        let (public_key, signature) = input
            .partial_sigs
            .iter()
            .next()
            .ok_or(PsbtError::MissingSignature(index))?;
        let compressed = CompressedPublicKey::try_from(*public_key)
            .map_err(|e| PsbtError::Invalid(e.to_string()))?;
        Witness::p2wpkh(signature, &compressed.0)
    } else {
        return Ok(false);
    };

    input.final_script_witness = Some(witness);
    input.partial_sigs.clear();
    input.tap_key_sig = None;
    input.tap_script_sigs.clear();
    input.tap_scripts.clear();
    input.tap_key_origins.clear();
    input.bip32_derivation.clear();
    input.tap_internal_key = None;
    input.tap_merkle_root = None;
    input.sighash_type = None;

    Ok(true)
}

/// Finalize every input that can be finalized; returns the number finalized
pub fn finalize_all(psbt: &mut Psbt) -> Result<usize, PsbtError> {
    let mut finalized = 0;
    for index in 0..psbt.inputs.len() {
        if finalize_input(psbt, index)? {
            finalized += 1;
        }
    }
    Ok(finalized)
}

fn is_p2wpkh(utxo: Option<&TxOut>) -> bool {
    utxo.map(|txout| txout.script_pubkey.is_p2wpkh())
        .unwrap_or(false)
}

pub(crate) fn script_commits_to_key(script: &ScriptBuf, key: &bitcoin::XOnlyPublicKey) -> bool {
    let needle = key.serialize();
    script
        .instructions()
        .filter_map(Result::ok)
        .any(|instruction| {
            instruction
                .push_bytes()
                .map(|bytes| bytes.as_bytes() == needle)
                .unwrap_or(false)
        })
}

fn tap_sighash_type(psbt: &Psbt, index: usize) -> Result<TapSighashType, PsbtError> {
    match psbt.inputs[index].sighash_type {
        Some(ty) => ty
            .taproot_hash_ty()
            .map_err(|e| PsbtError::Sighash(e.to_string())),
        None => Ok(TapSighashType::Default),
    }
}

fn ecdsa_sighash_type(psbt: &Psbt, index: usize) -> Result<EcdsaSighashType, PsbtError> {
    match psbt.inputs[index].sighash_type {
        Some(ty) => ty
            .ecdsa_hash_ty()
            .map_err(|e| PsbtError::Sighash(e.to_string())),
        None => Ok(EcdsaSighashType::All),
    }
}

/// Leaf hash of a tapscript at the default leaf version
pub fn leaf_hash(script: &ScriptBuf) -> TapLeafHash {
    TapLeafHash::from_script(script, LeafVersion::TapScript)
}
