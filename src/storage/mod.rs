//! Storage layer for ipscope
//!
//! SQLite-backed persistence for enriched host records and their ports

pub mod database;
pub mod hosts;

pub use database::{Database, DbPool, DbStats};
pub use hosts::{HostRecord, NewHostRecord, StoreSession};
