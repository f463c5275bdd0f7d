//! Host-intelligence lookup
//!
//! Defines the lookup seam used by the enrichment pipeline and the raw shapes
//! returned by the remote service. `ShodanClient` is the network-backed
//! implementation.

mod shodan;

pub use shodan::{ShodanClient, DEFAULT_BASE_URL};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Failure kinds reported by a lookup call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The service has no data for the address
    #[error("Not found")]
    NotFound,

    /// The address was not a valid IPv4/IPv6 literal
    #[error("Invalid IP address format")]
    InvalidAddress,

    /// The service rejected the credential
    #[error("{0}")]
    Unauthorized(String),

    /// Any other remote failure, message preserved
    #[error("{0}")]
    ServiceError(String),

    /// Catch-all for responses that could not be interpreted
    #[error("Unexpected error")]
    Unexpected(String),
}

/// Raw host data as returned by the lookup service; every field may be absent
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawHostData {
    #[serde(default)]
    pub ip_str: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub hostnames: Option<Vec<String>>,
    #[serde(default)]
    pub isp: Option<String>,
    #[serde(default)]
    pub asn: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default, deserialize_with = "vulns_list_or_map")]
    pub vulns: Option<Vec<String>>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

/// Account plan and remaining credits
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountInfo {
    #[serde(default = "not_available")]
    pub plan: String,
    #[serde(default)]
    pub query_credits: Option<i64>,
    #[serde(default)]
    pub scan_credits: Option<i64>,
}

fn not_available() -> String {
    crate::enrich::NOT_AVAILABLE.to_string()
}

/// Vulnerabilities arrive either as `["CVE-..."]` or as `{"CVE-...": {...}}`
fn vulns_list_or_map<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        Some(serde_json::Value::Object(map)) => Some(map.into_iter().map(|(k, _)| k).collect()),
        _ => None,
    })
}

/// Lookup seam: one round trip per call, no retries
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Fetch the remote record for one address
    async fn fetch_host(&self, credential: &str, ip: &str) -> Result<RawHostData, LookupError>;

    /// Fetch account plan metadata
    async fn fetch_account_info(&self, credential: &str) -> Result<AccountInfo, LookupError>;

    /// True iff an account-info call succeeds. Never fails.
    async fn validate_credential(&self, credential: &str) -> bool {
        match self.fetch_account_info(credential).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Credential validation failed: {}", e);
                false
            }
        }
    }
}
