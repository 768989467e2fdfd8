//! APDU framing for the hardware signer
//!
//! Short APDUs (`CLA INS P1 P2 Lc DATA`) carrying at most 255 data bytes.
//! Longer payloads are split into chunks; every chunk except the last sets
//! `P1 = 0x80`. Responses end in a two-byte status word.

use bitcoin::bip32::{ChildNumber, DerivationPath};

use super::TransportError;

pub const CLA: u8 = 0xE1;

pub const INS_GET_EXTENDED_PUBKEY: u8 = 0x00;
pub const INS_SIGN_PSBT: u8 = 0x04;
pub const INS_GET_MASTER_FINGERPRINT: u8 = 0x05;
pub const INS_SIGN_MESSAGE: u8 = 0x10;

pub const P1_MORE: u8 = 0x80;
pub const P1_LAST: u8 = 0x00;

pub const SW_OK: u16 = 0x9000;
pub const SW_DENY: u16 = 0x6985;
pub const SW_INCORRECT_DATA: u16 = 0x6A80;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

/// Maximum data bytes in one APDU
pub const MAX_CHUNK_LEN: usize = 255;

/// Command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla: CLA,
            ins,
            p1,
            p2,
            data,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 5 {
            return Err(TransportError::Malformed(format!(
                "command too short: {} bytes",
                bytes.len()
            )));
        }
        let len = bytes[4] as usize;
        if bytes.len() != 5 + len {
            return Err(TransportError::Malformed(format!(
                "command length {} does not match Lc {}",
                bytes.len() - 5,
                len
            )));
        }

        Ok(Self {
            cla: bytes[0],
            ins: bytes[1],
            p1: bytes[2],
            p2: bytes[3],
            data: bytes[5..].to_vec(),
        })
    }

    /// Whether more chunks of the same payload follow
    pub fn has_more(&self) -> bool {
        self.p1 & P1_MORE != 0
    }
}

/// Response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub status: u16,
}

impl ApduResponse {
    pub fn ok(data: Vec<u8>) -> Self {
        Self { data, status: SW_OK }
    }

    pub fn status(status: u16) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < 2 {
            return Err(TransportError::Malformed(
                "response shorter than a status word".to_string(),
            ));
        }
        let (data, status) = bytes.split_at(bytes.len() - 2);
        Ok(Self {
            data: data.to_vec(),
            status: u16::from_be_bytes([status[0], status[1]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        bytes.extend_from_slice(&self.status.to_be_bytes());
        bytes
    }
}

/// Split `payload` into commands for `ins`
///
/// An empty payload still yields one (empty) command.
pub fn chunk(ins: u8, payload: &[u8]) -> Vec<ApduCommand> {
    if payload.is_empty() {
        return vec![ApduCommand::new(ins, P1_LAST, 0x00, Vec::new())];
    }

    let chunks: Vec<&[u8]> = payload.chunks(MAX_CHUNK_LEN).collect();
    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let p1 = if i == last { P1_LAST } else { P1_MORE };
            ApduCommand::new(ins, p1, 0x00, data.to_vec())
        })
        .collect()
}

/// Serialize a derivation path: count byte then big-endian u32 indexes
pub fn encode_path(path: &DerivationPath) -> Vec<u8> {
    let children: &[ChildNumber] = path.as_ref();
    let mut bytes = Vec::with_capacity(1 + children.len() * 4);
    bytes.push(children.len() as u8);
    for child in children {
        bytes.extend_from_slice(&u32::from(*child).to_be_bytes());
    }
    bytes
}

/// Parse a path produced by [`encode_path`]; returns it with the bytes consumed
pub fn decode_path(bytes: &[u8]) -> Result<(DerivationPath, usize), TransportError> {
    let count = *bytes
        .first()
        .ok_or_else(|| TransportError::Malformed("empty derivation path".to_string()))?
        as usize;
    let end = 1 + count * 4;
    if bytes.len() < end {
        return Err(TransportError::Malformed(
            "truncated derivation path".to_string(),
        ));
    }

    let children: Vec<ChildNumber> = bytes[1..end]
        .chunks_exact(4)
        .map(|raw| ChildNumber::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])))
        .collect();

    Ok((DerivationPath::from(children), end))
}

/// `SIGN_PSBT` payload: u32 policy length, policy, PSBT
pub fn frame_sign_psbt(policy: &[u8], psbt: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + policy.len() + psbt.len());
    payload.extend_from_slice(&(policy.len() as u32).to_be_bytes());
    payload.extend_from_slice(policy);
    payload.extend_from_slice(psbt);
    payload
}

/// Split a `SIGN_PSBT` payload into policy and PSBT bytes
pub fn split_sign_psbt(payload: &[u8]) -> Result<(&[u8], &[u8]), TransportError> {
    if payload.len() < 4 {
        return Err(TransportError::Malformed(
            "sign payload too short".to_string(),
        ));
    }
    let policy_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    let rest = &payload[4..];
    if rest.len() < policy_len {
        return Err(TransportError::Malformed("truncated policy".to_string()));
    }
    Ok(rest.split_at(policy_len))
}

/// `SIGN_MESSAGE` payload: path, u32 message length, message
pub fn frame_sign_message(path: &DerivationPath, message: &[u8]) -> Vec<u8> {
    let mut payload = encode_path(path);
    payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
    payload.extend_from_slice(message);
    payload
}

/// Split a `SIGN_MESSAGE` payload into path and message
pub fn split_sign_message(payload: &[u8]) -> Result<(DerivationPath, &[u8]), TransportError> {
    let (path, consumed) = decode_path(payload)?;
    let rest = &payload[consumed..];
    if rest.len() < 4 {
        return Err(TransportError::Malformed(
            "missing message length".to_string(),
        ));
    }
    let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
    let message = &rest[4..];
    if message.len() != len {
        return Err(TransportError::Malformed(format!(
            "message length {} does not match header {}",
            message.len(),
            len
        )));
    }
    Ok((path, message))
}
