//! Staking Wallet Connector
//!
//! Multi-chain wallet connection and Bitcoin signing core for a BTC staking
//! platform: wallet discovery and session persistence across Bitcoin, a
//! Cosmos-SDK chain and Ethereum, plus address derivation, PSBT and BIP322
//! signing that stays bit-exact across software and hardware signers.

pub mod bitcoin;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod provider;
pub mod storage;
pub mod types;

pub use error::WalletError;
