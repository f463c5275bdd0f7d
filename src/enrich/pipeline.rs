// Per-request enrichment: validate, look up, normalize, replace, report

use super::normalize::normalize;
use super::sink::{EnrichEvent, EventSink};
use crate::error::{IpScopeError, Result};
use crate::lookup::{HostLookup, LookupError};
use crate::storage::{Database, HostRecord};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;

const UNAUTHORIZED: &str = "Invalid or missing API key";

/// Why a single token produced no record
#[derive(Error, Debug)]
pub enum ItemFailure {
    #[error("Skipping invalid input: '{0}' is not a valid IP address.")]
    InvalidAddress(String),

    #[error("Could not enrich {ip}: {source}")]
    Lookup { ip: String, source: LookupError },

    #[error("Could not store {ip}: {source}")]
    Storage { ip: String, source: IpScopeError },
}

/// A credential the lookup service accepted
#[derive(Debug, Clone)]
pub struct Credential(String);

/// A request that passed the credential and input checks
#[derive(Debug, Clone)]
pub struct EnrichRequest {
    credential: Credential,
    tokens: Vec<String>,
}

impl EnrichRequest {
    /// Trim tokens and drop blanks; an empty remainder is a bad request
    pub fn new(credential: Credential, tokens: Vec<String>) -> Result<Self> {
        let tokens: Vec<String> = tokens
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.is_empty() {
            return Err(IpScopeError::BadRequest("No IPs provided".to_string()));
        }

        Ok(Self { credential, tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Runs enrichment requests against one database and one lookup service
#[derive(Clone)]
pub struct Enricher {
    database: Arc<Database>,
    lookup: Arc<dyn HostLookup>,
}

impl Enricher {
    pub fn new(database: Arc<Database>, lookup: Arc<dyn HostLookup>) -> Self {
        Self { database, lookup }
    }

    pub fn lookup(&self) -> &Arc<dyn HostLookup> {
        &self.lookup
    }

    /// Reject a missing, blank or unaccepted credential
    pub async fn authorize(&self, credential: Option<&str>) -> Result<Credential> {
        let credential = match credential.map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return Err(IpScopeError::Unauthorized(UNAUTHORIZED.to_string())),
        };

        if !self.lookup.validate_credential(&credential).await {
            tracing::warn!("Rejected enrichment request: credential failed validation");
            return Err(IpScopeError::Unauthorized(UNAUTHORIZED.to_string()));
        }

        Ok(Credential(credential))
    }

    /// Credential check followed by the input check
    pub async fn prepare(
        &self,
        credential: Option<&str>,
        tokens: Vec<String>,
    ) -> Result<EnrichRequest> {
        let credential = self.authorize(credential).await?;
        EnrichRequest::new(credential, tokens)
    }

    /// Process every token in order, emitting `processing` then exactly one
    /// of `error` / `enriched` per token, then a final `complete`.
    ///
    /// No connection is held across lookups; each item checks one out only
    /// for its replace.
    pub async fn run(&self, request: EnrichRequest, sink: &mut dyn EventSink) -> Result<()> {
        let mut enriched = 0usize;
        let mut failed = 0usize;

        tracing::info!("Enriching {} address(es)", request.tokens.len());

        for token in &request.tokens {
            sink.emit(EnrichEvent::Processing { ip: token.clone() })
                .await?;

            match self.enrich_one(&request.credential, token).await {
                Ok(record) => {
                    enriched += 1;
                    sink.emit(EnrichEvent::Enriched { record }).await?;
                }
                Err(failure) => {
                    failed += 1;
                    tracing::warn!("{}", failure);
                    sink.emit(EnrichEvent::Error {
                        ip: token.clone(),
                        error: failure.to_string(),
                    })
                    .await?;
                }
            }
        }

        tracing::info!("Enrichment finished: {} enriched, {} failed", enriched, failed);
        sink.emit(EnrichEvent::Complete { enriched, failed }).await
    }

    async fn enrich_one(
        &self,
        credential: &Credential,
        token: &str,
    ) -> std::result::Result<HostRecord, ItemFailure> {
        let address: IpAddr = token
            .parse()
            .map_err(|_| ItemFailure::InvalidAddress(token.to_string()))?;
        let ip = address.to_string();

        let raw = self
            .lookup
            .fetch_host(&credential.0, &ip)
            .await
            .map_err(|source| ItemFailure::Lookup {
                ip: ip.clone(),
                source,
            })?;

        let host = normalize(address, raw);
        let record = self
            .database
            .with_blocking(move |db| db.session()?.replace(&host))
            .await
            .map_err(|source| {
                tracing::error!("Failed to persist {}: {}", ip, source);
                ItemFailure::Storage {
                    ip: ip.clone(),
                    source,
                }
            })?;

        tracing::debug!("Enriched {} as record {}", ip, record.id);
        Ok(record)
    }
}
