//! Host record gateway
//!
//! A `StoreSession` owns one pooled connection for the lifetime of a request.
//! Every mutating operation runs in its own transaction and commits or rolls
//! back exactly once.

use crate::error::{IpScopeError, Result};
use chrono::{DateTime, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A persisted, enriched IP address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: i64,
    pub ip_address: String,
    pub country: String,
    pub city: String,
    pub org: String,
    pub os: String,
    pub hostname: String,
    pub isp: String,
    pub asn: String,
    pub last_shodan_update: String,
    pub vulns: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub ports: Vec<u16>,
}

/// A host record ready to be persisted; ids and timestamps are assigned on insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHostRecord {
    pub ip_address: String,
    pub country: String,
    pub city: String,
    pub org: String,
    pub os: String,
    pub hostname: String,
    pub isp: String,
    pub asn: String,
    pub last_shodan_update: String,
    pub vulns: Vec<String>,
    pub ports: Vec<u16>,
}

const HOST_COLUMNS: &str = "id, ip_address, country, city, org, os, hostname, isp, asn, \
                            last_shodan_update, vulns, last_updated";

/// Per-request unit of work over the host tables
pub struct StoreSession {
    conn: PooledConnection<SqliteConnectionManager>,
}

impl StoreSession {
    pub(crate) fn new(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        Self { conn }
    }

    /// All records ordered by id, ports attached
    pub fn list_all(&self) -> Result<Vec<HostRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM ip_addresses ORDER BY id", HOST_COLUMNS))?;
        let mut hosts = stmt
            .query_map([], host_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut ports_by_host: HashMap<i64, Vec<u16>> = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT ip_id, port_number FROM ports ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u16>(1)?)))?;
        for row in rows {
            let (ip_id, port) = row?;
            ports_by_host.entry(ip_id).or_default().push(port);
        }

        for host in &mut hosts {
            host.ports = ports_by_host.remove(&host.id).unwrap_or_default();
        }

        Ok(hosts)
    }

    /// Fetch one record by id
    pub fn get(&self, id: i64) -> Result<HostRecord> {
        load_host(&self.conn, id)?.ok_or(IpScopeError::HostNotFound { id })
    }

    /// Whether a record exists for this exact address
    pub fn exists_by_address(&self, ip_address: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM ip_addresses WHERE ip_address = ?1",
                params![ip_address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a record and its ports as one unit
    pub fn insert(&mut self, host: &NewHostRecord) -> Result<HostRecord> {
        let tx = self.conn.transaction()?;
        let id = insert_host(&tx, host)?;
        let record = load_host(&tx, id)?.ok_or(IpScopeError::HostNotFound { id })?;
        tx.commit()?;
        Ok(record)
    }

    /// Atomically drop any record with the same address (ports included)
    /// and insert the new one
    pub fn replace(&mut self, host: &NewHostRecord) -> Result<HostRecord> {
        let tx = self.conn.transaction()?;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT id FROM ip_addresses WHERE ip_address = ?1",
                params![host.ip_address],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(previous) = previous {
            tracing::debug!("Replacing existing record {} for {}", previous, host.ip_address);
            tx.execute("DELETE FROM ports WHERE ip_id = ?1", params![previous])?;
            tx.execute("DELETE FROM ip_addresses WHERE id = ?1", params![previous])?;
        }

        let id = insert_host(&tx, host)?;
        let record = load_host(&tx, id)?.ok_or(IpScopeError::HostNotFound { id })?;
        tx.commit()?;
        Ok(record)
    }

    /// Delete one record and its ports
    pub fn delete(&mut self, id: i64) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM ports WHERE ip_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM ip_addresses WHERE id = ?1", params![id])?;
        if removed == 0 {
            // Dropping the transaction rolls it back
            return Err(IpScopeError::HostNotFound { id });
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete every listed record and its ports; all or nothing.
    /// Returns the number of records removed.
    pub fn bulk_delete(&mut self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!("DELETE FROM ports WHERE ip_id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        let removed = tx.execute(
            &format!("DELETE FROM ip_addresses WHERE id IN ({})", placeholders),
            params_from_iter(ids.iter()),
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

fn insert_host(conn: &Connection, host: &NewHostRecord) -> Result<i64> {
    let vulns = serde_json::to_string(&host.vulns).map_err(|e| IpScopeError::Json {
        source: e,
        context: "Failed to serialize vulnerability list".to_string(),
    })?;

    conn.execute(
        "INSERT INTO ip_addresses (ip_address, country, city, org, os, hostname, isp, asn,
                                   last_shodan_update, vulns, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            host.ip_address,
            host.country,
            host.city,
            host.org,
            host.os,
            host.hostname,
            host.isp,
            host.asn,
            host.last_shodan_update,
            vulns,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    let mut stmt = conn.prepare("INSERT INTO ports (port_number, ip_id) VALUES (?1, ?2)")?;
    for port in &host.ports {
        stmt.execute(params![port, id])?;
    }

    Ok(id)
}

fn load_host(conn: &Connection, id: i64) -> Result<Option<HostRecord>> {
    let host = conn
        .query_row(
            &format!("SELECT {} FROM ip_addresses WHERE id = ?1", HOST_COLUMNS),
            params![id],
            host_from_row,
        )
        .optional()?;

    let Some(mut host) = host else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT port_number FROM ports WHERE ip_id = ?1 ORDER BY id")?;
    host.ports = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<u16>>>()?;

    Ok(Some(host))
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<HostRecord> {
    let vulns: String = row.get(10)?;
    let vulns: Vec<String> = serde_json::from_str(&vulns).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(HostRecord {
        id: row.get(0)?,
        ip_address: row.get(1)?,
        country: row.get(2)?,
        city: row.get(3)?,
        org: row.get(4)?,
        os: row.get(5)?,
        hostname: row.get(6)?,
        isp: row.get(7)?,
        asn: row.get(8)?,
        last_shodan_update: row.get(9)?,
        vulns,
        last_updated: row.get(11)?,
        ports: Vec::new(),
    })
}
