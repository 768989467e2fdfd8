//! Configuration types for the wallet connector
//!
//! Manages the per-chain connection entries (network selection, RPC
//! pass-through data, disabled wallets), session persistence settings,
//! and the data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::ChainId;

/// Default session lifetime: 24 hours
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Global connector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// One entry per supported chain
    pub chains: Vec<ChainEntry>,

    pub persistence: PersistenceConfig,

    /// Shared wallet-framework settings handed to every provider factory
    #[serde(default)]
    pub shared: SharedWalletConfig,

    /// Optional custom data directory (keystores, session file)
    pub data_dir: Option<String>,
}

/// A `{chain, config}` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEntry {
    pub chain: ChainId,
    pub config: ChainConfig,
}

/// Per-chain settings
///
/// Everything except `network` and `disabled_wallets` is opaque to the
/// connector and only passed through to providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: NetworkType,

    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Cosmos chain id or EVM chain id (decimal string)
    #[serde(default)]
    pub chain_id: Option<String>,

    /// Bech32 human-readable prefix for Cosmos addresses
    #[serde(default)]
    pub bech32_prefix: Option<String>,

    /// Wallet ids that must never be instantiated for this chain
    #[serde(default)]
    pub disabled_wallets: Vec<String>,
}

/// Session persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

/// Application-level wallet framework settings
///
/// Built once when the application is wired together and injected into
/// every provider through the provider context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedWalletConfig {
    pub app_name: Option<String>,
    pub app_url: Option<String>,
    pub project_id: Option<String>,
}

/// Bitcoin network type
///
/// Testnet and signet share address prefixes but stay distinct values;
/// RPC endpoint selection branches on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Signet,
}

impl NetworkType {
    /// Map to the rust-bitcoin chain parameters
    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            NetworkType::Mainnet => bitcoin::Network::Bitcoin,
            NetworkType::Testnet => bitcoin::Network::Testnet,
            NetworkType::Signet => bitcoin::Network::Signet,
        }
    }

    /// BIP44 coin type used in derivation paths
    pub fn coin_type(self) -> u32 {
        match self {
            NetworkType::Mainnet => 0,
            NetworkType::Testnet | NetworkType::Signet => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Signet => "signet",
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NetworkType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "signet" => Ok(NetworkType::Signet),
            other => Err(ConfigError::InvalidNetwork(other.to_string())),
        }
    }
}

impl GlobalConfig {
    /// Create default configuration for mainnet
    pub fn default_mainnet() -> Self {
        Self::for_network(
            NetworkType::Mainnet,
            "https://rpc.bbn-1.babylonlabs.io",
            "bbn-1",
            "1",
        )
    }

    /// Create default configuration for testnet
    pub fn default_testnet() -> Self {
        Self::for_network(
            NetworkType::Testnet,
            "https://rpc-dapp.testnet.babylonlabs.io",
            "bbn-test-5",
            "11155111",
        )
    }

    /// Create default configuration for signet
    pub fn default_signet() -> Self {
        Self::for_network(
            NetworkType::Signet,
            "https://rpc-dapp.devnet.babylonlabs.io",
            "devnet-9",
            "11155111",
        )
    }

    /// Create default configuration for a network
    pub fn default_for(network: NetworkType) -> Self {
        match network {
            NetworkType::Mainnet => Self::default_mainnet(),
            NetworkType::Testnet => Self::default_testnet(),
            NetworkType::Signet => Self::default_signet(),
        }
    }

    fn for_network(network: NetworkType, bbn_rpc: &str, bbn_chain_id: &str, eth_chain_id: &str) -> Self {
        Self {
            chains: vec![
                ChainEntry {
                    chain: ChainId::Btc,
                    config: ChainConfig {
                        network,
                        rpc_url: Some(default_mempool_url(network)),
                        chain_id: None,
                        bech32_prefix: None,
                        disabled_wallets: Vec::new(),
                    },
                },
                ChainEntry {
                    chain: ChainId::Bbn,
                    config: ChainConfig {
                        network,
                        rpc_url: Some(bbn_rpc.to_string()),
                        chain_id: Some(bbn_chain_id.to_string()),
                        bech32_prefix: Some("bbn".to_string()),
                        disabled_wallets: Vec::new(),
                    },
                },
                ChainEntry {
                    chain: ChainId::Eth,
                    config: ChainConfig {
                        network,
                        rpc_url: None,
                        chain_id: Some(eth_chain_id.to_string()),
                        bech32_prefix: None,
                        disabled_wallets: Vec::new(),
                    },
                },
            ],
            persistence: PersistenceConfig {
                enabled: true,
                ttl_secs: DEFAULT_SESSION_TTL_SECS,
            },
            shared: SharedWalletConfig::default(),
            data_dir: None,
        }
    }

    /// Configuration entry for one chain, if configured
    pub fn chain(&self, chain: ChainId) -> Option<&ChainConfig> {
        self.chains
            .iter()
            .find(|entry| entry.chain == chain)
            .map(|entry| &entry.config)
    }

    /// Network of the Bitcoin entry (falls back to the first entry)
    pub fn bitcoin_network(&self) -> Result<NetworkType, ConfigError> {
        self.chain(ChainId::Btc)
            .or_else(|| self.chains.first().map(|entry| &entry.config))
            .map(|config| config.network)
            .ok_or_else(|| ConfigError::Invalid("no chains configured".to_string()))
    }

    /// Resolved data directory (custom or default)
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => default_config_dir(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::default_signet()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Config directory not found")]
    DirectoryNotFound,
}

/// Configuration overrides from CLI arguments or environment variables
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub network: Option<NetworkType>,
    pub bbn_rpc_url: Option<String>,
    pub bbn_chain_id: Option<String>,
    pub eth_rpc_url: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub persistence: Option<bool>,
    pub disabled_wallets: Option<Vec<String>>,
    pub data_dir: Option<String>,
}

impl ConfigOverrides {
    /// Create empty overrides
    pub fn new() -> Self {
        Self::default()
    }

    /// Create overrides from environment variables
    pub fn from_env() -> Self {
        Self {
            network: std::env::var("BITCOIN_NETWORK")
                .ok()
                .and_then(|s| s.parse().ok()),
            bbn_rpc_url: std::env::var("BBN_RPC_URL").ok(),
            bbn_chain_id: std::env::var("BBN_CHAIN_ID").ok(),
            eth_rpc_url: std::env::var("ETH_RPC_URL").ok(),
            session_ttl_secs: std::env::var("SESSION_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok()),
            persistence: std::env::var("SESSION_PERSISTENCE")
                .ok()
                .and_then(|s| s.parse().ok()),
            disabled_wallets: std::env::var("DISABLED_WALLETS").ok().map(|s| {
                s.split(',')
                    .map(|id| id.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect()
            }),
            data_dir: std::env::var("WALLET_CONNECTOR_DATA_DIR").ok(),
        }
    }

    /// Merge with another set of overrides (other takes precedence)
    pub fn merge(mut self, other: Self) -> Self {
        if other.network.is_some() {
            self.network = other.network;
        }
        if other.bbn_rpc_url.is_some() {
            self.bbn_rpc_url = other.bbn_rpc_url;
        }
        if other.bbn_chain_id.is_some() {
            self.bbn_chain_id = other.bbn_chain_id;
        }
        if other.eth_rpc_url.is_some() {
            self.eth_rpc_url = other.eth_rpc_url;
        }
        if other.session_ttl_secs.is_some() {
            self.session_ttl_secs = other.session_ttl_secs;
        }
        if other.persistence.is_some() {
            self.persistence = other.persistence;
        }
        if other.disabled_wallets.is_some() {
            self.disabled_wallets = other.disabled_wallets;
        }
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
        self
    }
}

/// Get the default configuration directory path
///
/// Returns: `~/.staking-wallet-connector/`
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".staking-wallet-connector"))
        .ok_or(ConfigError::DirectoryNotFound)
}

/// Get the default configuration file path
///
/// Returns: `~/.staking-wallet-connector/config.json`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join("config.json"))
}

/// Default mempool API endpoint for a network
pub fn default_mempool_url(network: NetworkType) -> String {
    match network {
        NetworkType::Mainnet => "https://mempool.space/api".to_string(),
        NetworkType::Testnet => "https://mempool.space/testnet/api".to_string(),
        NetworkType::Signet => "https://mempool.space/signet/api".to_string(),
    }
}

/// Load configuration from file with overrides
///
/// # Priority (highest to lowest):
/// 1. CLI overrides (passed as argument)
/// 2. Environment variables
/// 3. Config file
/// 4. Network defaults
///
/// # Example
///
/// ```ignore
/// use staking_wallet_connector::config::{load_config, ConfigOverrides, NetworkType};
///
/// let mut cli_overrides = ConfigOverrides::new();
/// cli_overrides.network = Some(NetworkType::Signet);
///
/// let config = load_config(None, cli_overrides)?;
/// ```
pub fn load_config(
    config_path: Option<&Path>,
    cli_overrides: ConfigOverrides,
) -> Result<GlobalConfig, ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let env_overrides = ConfigOverrides::from_env();
    let overrides = env_overrides.merge(cli_overrides);

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)?
    } else {
        GlobalConfig::default_for(overrides.network.unwrap_or(NetworkType::Signet))
    };

    apply_overrides(&mut config, overrides);

    Ok(config)
}

/// Save configuration to file
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &GlobalConfig, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;

    Ok(())
}

/// Apply configuration overrides (internal helper)
fn apply_overrides(config: &mut GlobalConfig, overrides: ConfigOverrides) {
    for entry in config.chains.iter_mut() {
        if let Some(network) = overrides.network {
            if entry.config.network != network {
                entry.config.network = network;
                // Keep the mempool endpoint in step with the network
                if entry.chain == ChainId::Btc {
                    entry.config.rpc_url = Some(default_mempool_url(network));
                }
            }
        }

        match entry.chain {
            ChainId::Bbn => {
                if let Some(url) = &overrides.bbn_rpc_url {
                    entry.config.rpc_url = Some(url.clone());
                }
                if let Some(chain_id) = &overrides.bbn_chain_id {
                    entry.config.chain_id = Some(chain_id.clone());
                }
            }
            ChainId::Eth => {
                if let Some(url) = &overrides.eth_rpc_url {
                    entry.config.rpc_url = Some(url.clone());
                }
            }
            ChainId::Btc => {}
        }

        if let Some(disabled) = &overrides.disabled_wallets {
            entry.config.disabled_wallets = disabled.clone();
        }
    }

    if let Some(ttl) = overrides.session_ttl_secs {
        config.persistence.ttl_secs = ttl;
    }
    if let Some(enabled) = overrides.persistence {
        config.persistence.enabled = enabled;
    }
    if let Some(data_dir) = overrides.data_dir {
        config.data_dir = Some(data_dir);
    }
}
