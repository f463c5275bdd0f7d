// Shodan REST client: key passed as a query parameter, one request per call

use super::{AccountInfo, HostLookup, LookupError, RawHostData};
use crate::error::{IpScopeError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::IpAddr;

/// Public Shodan API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.shodan.io";

/// Marker Shodan uses for addresses it has never seen
const NO_INFORMATION: &str = "No information available";

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    error: String,
}

/// Network-backed lookup client
#[derive(Debug, Clone)]
pub struct ShodanClient {
    http: Client,
    base_url: String,
}

impl ShodanClient {
    /// Create a client against the given base URL (no trailing slash needed)
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ipscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IpScopeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        credential: &str,
    ) -> std::result::Result<T, LookupError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .get(&url)
            .query(&[("key", credential)])
            .send()
            .await
            .map_err(|e| LookupError::ServiceError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                tracing::warn!("Undecodable response from {}: {}", path, e);
                LookupError::Unexpected(e.to_string())
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ServiceErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("HTTP {}", status));

        Err(classify_failure(status, message))
    }
}

/// Map a non-success response onto the lookup error taxonomy
fn classify_failure(status: StatusCode, message: String) -> LookupError {
    if message.contains(NO_INFORMATION) || status == StatusCode::NOT_FOUND {
        LookupError::NotFound
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        LookupError::Unauthorized(message)
    } else {
        LookupError::ServiceError(message)
    }
}

#[async_trait]
impl HostLookup for ShodanClient {
    async fn fetch_host(
        &self,
        credential: &str,
        ip: &str,
    ) -> std::result::Result<RawHostData, LookupError> {
        let address: IpAddr = ip.trim().parse().map_err(|_| LookupError::InvalidAddress)?;
        tracing::debug!("Looking up host {}", address);
        self.get_json(&format!("/shodan/host/{}", address), credential)
            .await
    }

    async fn fetch_account_info(
        &self,
        credential: &str,
    ) -> std::result::Result<AccountInfo, LookupError> {
        self.get_json("/api-info", credential).await
    }
}
