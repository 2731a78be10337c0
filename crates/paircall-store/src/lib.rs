//! # paircall-store
//!
//! Local persisted state for a PairCall client, backed by SQLite.
//!
//! The only durable fact a client keeps is its participant id, stored in a
//! small key-value table so it survives restarts on the same device.

pub mod database;
pub mod identity;
pub mod kv;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::StoreError;
