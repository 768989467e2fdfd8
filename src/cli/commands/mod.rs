//! CLI command implementations

pub mod address;
pub mod config;
pub mod keystore;
pub mod message;
pub mod session;
