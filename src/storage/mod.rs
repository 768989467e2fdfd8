//! Storage layer
//!
//! Session persistence (last connected wallet per chain) and the local
//! encrypted keystore.

pub mod account_storage;
pub mod file_system;
pub mod keys;
pub mod models;

pub use account_storage::{AccountStorage, FileStore, KeyValueStore, MemoryStore, StorageError};
