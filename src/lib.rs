//! ipscope - IP enrichment backend
//!
//! Accepts IP addresses, enriches each one through a host-intelligence lookup
//! service, persists the enriched records with their open ports, and serves
//! them over a JSON API with buffered and streaming delivery.

pub mod cli;
pub mod config;
pub mod enrich;
pub mod error;
pub mod lookup;
pub mod server;
pub mod storage;

pub use error::{IpScopeError, Result};
