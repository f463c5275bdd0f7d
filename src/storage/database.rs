//! SQLite database management with migrations
//!
//! Provides structured storage for enriched host records and their ports

use super::hosts::StoreSession;
use crate::error::{IpScopeError, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::sync::Arc;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Default pool size
pub const DEFAULT_POOL_SIZE: u32 = 16;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection with the default pool size
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE)
    }

    /// Create a new database connection pool of `pool_size` connections
    pub fn with_pool_size(db_path: &Path, pool_size: u32) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IpScopeError::Io {
                    source: e,
                    context: format!("Failed to create database directory: {:?}", parent),
                })?;
            }
        }

        // Foreign keys are a per-connection setting in SQLite
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(pool_size).build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        tracing::info!("Database ready at {:?}", db_path);
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Check out a storage session scoped to one request
    pub fn session(&self) -> Result<StoreSession> {
        Ok(StoreSession::new(self.get_conn()?))
    }

    /// Run storage work on the blocking pool.
    ///
    /// `Pool::get` and SQLite calls block; keeping them off the runtime
    /// threads lets a full pool stall only the requests that need it.
    pub async fn with_blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&db))
            .await
            .map_err(|e| IpScopeError::Task(format!("Storage task failed: {}", e)))?
    }

    /// Round-trip a trivial query; used by the health check
    pub fn ping(&self) -> Result<()> {
        let conn = self.get_conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let host_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM ip_addresses", [], |row| row.get(0))?;

        let port_count: i64 = conn.query_row("SELECT COUNT(*) FROM ports", [], |row| row.get(0))?;

        Ok(DbStats {
            host_count: host_count as usize,
            port_count: port_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub host_count: usize,
    pub port_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Enriched host records
    CREATE TABLE ip_addresses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ip_address TEXT NOT NULL UNIQUE,
        country TEXT,
        city TEXT,
        org TEXT,
        os TEXT,
        hostname TEXT,
        isp TEXT,
        asn TEXT,
        last_shodan_update TEXT,
        vulns TEXT NOT NULL DEFAULT '[]',  -- JSON array
        last_updated TEXT NOT NULL
    );

    -- Open ports, owned by one host record
    CREATE TABLE ports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        port_number INTEGER NOT NULL,
        ip_id INTEGER NOT NULL,
        FOREIGN KEY (ip_id) REFERENCES ip_addresses(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_ports_ip ON ports(ip_id);

    -- Refresh last_updated on any update that does not set it explicitly
    CREATE TRIGGER trg_ip_addresses_touch
    AFTER UPDATE ON ip_addresses
    FOR EACH ROW WHEN NEW.last_updated = OLD.last_updated
    BEGIN
        UPDATE ip_addresses
        SET last_updated = strftime('%Y-%m-%d %H:%M:%f+00:00', 'now')
        WHERE id = NEW.id;
    END;
    "#,
];
