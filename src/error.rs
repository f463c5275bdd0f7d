use crate::lookup::LookupError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ipscope
#[derive(Error, Debug)]
pub enum IpScopeError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Request input was missing or empty
    #[error("{0}")]
    BadRequest(String),

    /// Credential missing or rejected by the lookup service
    #[error("{0}")]
    Unauthorized(String),

    /// No host record with the given id
    #[error("IP address not found (id {id})")]
    HostNotFound { id: i64 },

    /// Lookup service errors outside of per-item processing
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// The consumer of an incremental enrichment went away
    #[error("Event stream closed by consumer")]
    StreamClosed,

    /// A background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for ipscope operations
pub type Result<T> = std::result::Result<T, IpScopeError>;
