//! Staking Wallet Connector CLI
//!
//! Command-line interface for local keystores, address tooling, message
//! signing and persisted wallet sessions

use clap::Parser;
use staking_wallet_connector::cli::args::{
    AddressAction, Cli, Commands, ConfigAction, KeystoreAction, MessageAction, SessionAction,
};
use staking_wallet_connector::cli::commands;
use staking_wallet_connector::config::{load_config, ConfigOverrides, GlobalConfig, NetworkType};
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let network = cli.network.as_ref().map(|n| match NetworkType::from_str(n) {
        Ok(network) => network,
        Err(_) => {
            eprintln!(
                "Error: Invalid network '{}'. Use: mainnet, testnet, or signet",
                n
            );
            process::exit(1);
        }
    });

    // Build config overrides from global arguments
    let overrides = ConfigOverrides {
        network,
        bbn_rpc_url: cli.bbn_rpc_url.clone(),
        bbn_chain_id: cli.bbn_chain_id.clone(),
        session_ttl_secs: cli.session_ttl,
        data_dir: cli.data_dir.clone(),
        ..ConfigOverrides::default()
    };
    let config_path = cli.config.as_ref().map(PathBuf::from);

    if let Commands::Config { action } = &cli.command {
        let result = match action {
            ConfigAction::Init { network } => {
                commands::config::init(network.clone(), config_path.as_deref())
            }
        };
        if let Err(e) = result {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
        return;
    }

    let config = match load_config(config_path.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli, config: &GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let keystore = cli.keystore.as_deref();

    match cli.command {
        Commands::Config { .. } => Ok(()),

        Commands::Keystore { action } => match action {
            KeystoreAction::Create { name, password } => commands::keystore::create(&name, &password, config)
                .map(|_| ())
                .map_err(Into::into),

            KeystoreAction::Import {
                name,
                mnemonic,
                password,
            } => commands::keystore::import(&name, &mnemonic, &password, config)
                .map(|_| ())
                .map_err(Into::into),

            KeystoreAction::List => commands::keystore::list(config)
                .map(|_| ())
                .map_err(Into::into),
        },

        Commands::Address { action } => match action {
            AddressAction::Derive { public_key, kind } => {
                commands::address::derive(&public_key, &kind, config)
                    .map(|_| ())
                    .map_err(Into::into)
            }

            AddressAction::Validate {
                address,
                public_key,
            } => commands::address::validate(&address, public_key.as_deref(), config)
                .map_err(Into::into),

            AddressAction::FromXpub { xpub, path } => {
                commands::address::from_xpub(&xpub, &path, config)
                    .map(|_| ())
                    .map_err(Into::into)
            }
        },

        Commands::Message { action } => match action {
            MessageAction::Sign {
                message,
                method,
                account_index,
                password,
            } => {
                let rt = tokio::runtime::Runtime::new()?;
                rt.block_on(commands::message::sign(
                    keystore,
                    &password,
                    &message,
                    &method,
                    account_index,
                    config,
                ))
                .map(|_| ())
                .map_err(Into::into)
            }

            MessageAction::Verify {
                message,
                signature,
                address,
                public_key,
                method,
            } => commands::message::verify(
                &message,
                &signature,
                address.as_deref(),
                public_key.as_deref(),
                &method,
                config,
            )
            .map_err(Into::into),
        },

        Commands::Connect {
            chain,
            account_index,
            password,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::session::connect(
                &chain,
                keystore,
                &password,
                account_index,
                config,
            ))
            .map(|_| ())
            .map_err(Into::into)
        }

        Commands::Status { password } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::session::status(keystore, &password, config))
                .map(|_| ())
                .map_err(Into::into)
        }

        Commands::Disconnect { chain, password } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::session::disconnect(&chain, keystore, &password, config))
                .map_err(Into::into)
        }

        Commands::Session { action } => match action {
            SessionAction::Show => commands::session::show(config)
                .map(|_| ())
                .map_err(Into::into),
            SessionAction::Clear => commands::session::clear(config).map_err(Into::into),
        },
    }
}
