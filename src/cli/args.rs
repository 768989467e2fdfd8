//! CLI argument definitions using clap

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "wallet-connector",
    version,
    about = "Staking Wallet Connector - multi-chain wallet sessions and Bitcoin signing",
    long_about = None
)]
pub struct Cli {
    /// Keystore name to use for signing and connecting
    #[arg(short, long, global = true)]
    pub keystore: Option<String>,

    /// Network to use: mainnet, testnet, signet (overrides config)
    #[arg(short, long, global = true)]
    pub network: Option<String>,

    /// Cosmos chain RPC URL (overrides config)
    #[arg(long, global = true)]
    pub bbn_rpc_url: Option<String>,

    /// Cosmos chain id (overrides config)
    #[arg(long, global = true)]
    pub bbn_chain_id: Option<String>,

    /// Session lifetime in seconds (overrides config)
    #[arg(long, global = true)]
    pub session_ttl: Option<u64>,

    /// Custom data directory for keystores and the session file
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Path to config file (defaults to ~/.staking-wallet-connector/config.json)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize or manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Local keystore management
    Keystore {
        #[command(subcommand)]
        action: KeystoreAction,
    },

    /// Address derivation and validation
    Address {
        #[command(subcommand)]
        action: AddressAction,
    },

    /// Message signing and verification
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Connect the keystore wallet on a chain and persist the session
    Connect {
        /// Chain: BTC or BBN
        #[arg(short, long, default_value = "BTC")]
        chain: String,

        /// Receive index of the Bitcoin account
        #[arg(long, default_value = "0")]
        account_index: u32,

        /// Password to decrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// Restore stored sessions and show connected accounts
    Status {
        /// Password to decrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// Disconnect a chain and forget its stored session
    Disconnect {
        /// Chain: BTC, BBN or ETH
        #[arg(short, long)]
        chain: String,

        /// Password to decrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// Inspect or clear the stored session
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Initialize configuration file with defaults
    Init {
        /// Network to initialize for (defaults to signet)
        #[arg(short, long)]
        network: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeystoreAction {
    /// Create a new keystore with a generated mnemonic
    Create {
        /// Name of the keystore
        name: String,

        /// Password to encrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// Import an existing keystore from a mnemonic phrase
    Import {
        /// Name of the keystore
        name: String,

        /// 12 or 24-word BIP39 mnemonic phrase
        #[arg(short, long)]
        mnemonic: String,

        /// Password to encrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// List all keystores
    List,
}

#[derive(Subcommand, Debug)]
pub enum AddressAction {
    /// Derive an address from a compressed public key
    Derive {
        /// Public key (hex, 66 chars; 64 accepted for taproot)
        #[arg(long)]
        public_key: String,

        /// Address type: taproot or segwit
        #[arg(long, default_value = "taproot")]
        kind: String,
    },

    /// Check an address against a public key and the network prefix
    Validate {
        #[arg(short, long)]
        address: String,

        /// Public key (hex) the address should belong to
        #[arg(long)]
        public_key: Option<String>,
    },

    /// Derive a taproot output from an extended public key
    FromXpub {
        #[arg(long)]
        xpub: String,

        /// Path relative to the xpub
        #[arg(long, default_value = "m/0/0")]
        path: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MessageAction {
    /// Sign a message with the keystore's current account
    Sign {
        #[arg(short, long)]
        message: String,

        /// Signing method: bip322-simple or ecdsa
        #[arg(long, default_value = "bip322-simple")]
        method: String,

        /// Receive index of the signing account
        #[arg(long, default_value = "0")]
        account_index: u32,

        /// Password to decrypt the keystore
        #[arg(short, long)]
        password: String,
    },

    /// Verify a message signature
    Verify {
        #[arg(short, long)]
        message: String,

        /// Base64 signature
        #[arg(short, long)]
        signature: String,

        /// Signer address (bip322-simple)
        #[arg(short, long)]
        address: Option<String>,

        /// Signer public key (ecdsa)
        #[arg(long)]
        public_key: Option<String>,

        /// Signing method: bip322-simple or ecdsa
        #[arg(long, default_value = "bip322-simple")]
        method: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Show the stored session record
    Show,

    /// Remove every stored session entry
    Clear,
}
