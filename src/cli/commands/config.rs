//! Config command implementations

use std::path::Path;
use std::str::FromStr;

use crate::config::{ConfigError, GlobalConfig, NetworkType};

/// Initialize configuration file with network-specific defaults
pub fn init(network: Option<String>, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let network_type = match network.as_deref() {
        Some(n) => NetworkType::from_str(n)?,
        None => NetworkType::Signet,
    };

    let config = GlobalConfig::default_for(network_type);
    crate::config::save_config(&config, config_path)?;

    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => crate::config::default_config_path()?,
    };
    println!("✓ Configuration initialized for {}", network_type);
    println!("  Config file: {}", path.display());
    for entry in &config.chains {
        println!(
            "  {:<4} rpc: {}",
            entry.chain,
            entry.config.rpc_url.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
