// HTTP surface: routes the /api endpoints onto the pipeline and the gateway

mod handlers;
mod response;
mod stream;

pub use handlers::API_KEY_HEADER;
pub use response::ApiError;
pub use stream::{sse_payload, ChannelSink};

use crate::config::{expand_tilde, Config};
use crate::enrich::Enricher;
use crate::error::{IpScopeError, Result};
use crate::lookup::{HostLookup, ShodanClient};
use crate::storage::Database;
use axum::routing::{get, post};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub enricher: Enricher,
    pub default_api_key: Option<String>,
}

impl AppState {
    pub fn new(
        database: Arc<Database>,
        lookup: Arc<dyn HostLookup>,
        default_api_key: Option<String>,
    ) -> Self {
        Self {
            enricher: Enricher::new(database.clone(), lookup),
            database,
            default_api_key,
        }
    }
}

/// Build the API router
pub fn router(state: AppState, cors_permissive: bool) -> Router {
    let app = Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/validate-api-key", post(handlers::validate_api_key))
        .route("/api/api-info", get(handlers::api_info))
        .route(
            "/api/ips",
            get(handlers::list_ips).post(handlers::enrich_ips),
        )
        .route("/api/ips/stream", post(handlers::enrich_stream))
        .route("/api/ips/bulk-delete", post(handlers::bulk_delete))
        .route(
            "/api/ips/:id",
            get(handlers::get_ip).delete(handlers::delete_ip),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_permissive {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// HTTP server owning its storage and lookup client
pub struct Server {
    config: Config,
    state: AppState,
}

impl Server {
    /// Open the database and build the lookup client from configuration
    pub fn new(config: Config) -> Result<Self> {
        let db_path = expand_tilde(&config.storage.database_path);
        let database = Arc::new(Database::with_pool_size(
            &db_path,
            config.storage.pool_size,
        )?);

        let lookup = Arc::new(ShodanClient::new(config.lookup.base_url.clone())?);

        let default_api_key = config.lookup.default_api_key();
        if default_api_key.is_none() {
            tracing::info!(
                "No default API key in ${}; clients must send X-API-Key",
                config.lookup.api_key_env
            );
        }

        Ok(Self {
            state: AppState::new(database, lookup, default_api_key),
            config,
        })
    }

    /// Serve until SIGTERM, SIGINT or SIGHUP; in-flight requests finish first
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self.config.server.bind.parse().map_err(|_| {
            IpScopeError::InvalidConfigValue {
                path: "server.bind".to_string(),
                message: format!("Cannot parse '{}' as host:port", self.config.server.bind),
            }
        })?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| IpScopeError::Io {
                source: e,
                context: format!("Failed to bind to {}", addr),
            })?;

        tracing::info!("Listening on http://{}", addr);

        let shutdown = shutdown_signal()?;
        let app = router(self.state, self.config.server.cors_permissive);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let sig = shutdown.await;
                tracing::info!("Received {}, shutting down", sig);
            })
            .await
            .map_err(|e| IpScopeError::Io {
                source: e,
                context: "HTTP server failed".to_string(),
            })?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

/// Install the shutdown handlers up front so a failure surfaces before
/// serving starts; the returned future resolves with the first signal's name.
fn shutdown_signal() -> Result<impl Future<Output = &'static str>> {
    let install = |kind: SignalKind, name: &str| {
        signal(kind).map_err(|e| IpScopeError::Io {
            source: e,
            context: format!("Failed to install {} handler", name),
        })
    };

    let mut terminate = install(SignalKind::terminate(), "SIGTERM")?;
    let mut interrupt = install(SignalKind::interrupt(), "SIGINT")?;
    let mut hangup = install(SignalKind::hangup(), "SIGHUP")?;

    Ok(async move {
        tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
            _ = hangup.recv() => "SIGHUP",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_handlers_install() {
        let shutdown = shutdown_signal().unwrap();
        // Nothing has been signalled yet
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), shutdown).await;
        assert!(pending.is_err());
    }
}
