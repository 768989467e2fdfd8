//! Shared types for the wallet connector
//!
//! Chain identifiers and connected-account data used across providers,
//! connectors, and session storage.

use serde::{Deserialize, Serialize};

/// Supported chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainId {
    /// Bitcoin
    #[serde(rename = "BTC")]
    Btc,

    /// Cosmos-SDK staking chain
    #[serde(rename = "BBN")]
    Bbn,

    /// Ethereum
    #[serde(rename = "ETH")]
    Eth,
}

impl ChainId {
    pub const ALL: [ChainId; 3] = [ChainId::Btc, ChainId::Bbn, ChainId::Eth];

    /// Key under which the chain's last wallet id is persisted
    pub fn as_str(self) -> &'static str {
        match self {
            ChainId::Btc => "BTC",
            ChainId::Bbn => "BBN",
            ChainId::Eth => "ETH",
        }
    }

    /// Whether a stored session may be restored without user interaction
    ///
    /// ETH sessions are owned by the external wallet framework and are never
    /// silently reconnected here.
    pub fn supports_silent_reconnect(self) -> bool {
        !matches!(self, ChainId::Eth)
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChainId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" => Ok(ChainId::Btc),
            "BBN" => Ok(ChainId::Bbn),
            "ETH" => Ok(ChainId::Eth),
            _ => Err(format!(
                "Invalid chain '{}'. Valid options: BTC, BBN, ETH",
                s
            )),
        }
    }
}

/// Account exposed by a connected wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: String,

    /// Compressed public key (hex); empty for chains whose wallets expose none
    pub public_key_hex: String,
}

/// Inscription location reported by an ordinals-aware wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InscriptionIdentifier {
    pub txid: String,
    pub vout: u32,
}
