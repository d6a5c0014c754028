//! Server probes
//!
//! Row-count estimates for the NOT NULL strategy, and the server
//! capabilities the classifier depends on.

use crate::config::SessionDefaults;
use crate::error::AppError;
use crate::naming::quote_ident;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio_postgres::Client;
use tracing::debug;

/// Approximate number of rows in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowEstimate {
    Known(u64),
    /// No statistics yet (never analyzed, or the table does not exist)
    Unknown,
}

impl RowEstimate {
    /// `pg_class.reltuples` is -1 before the first ANALYZE on recent servers
    pub fn from_reltuples(reltuples: Option<f64>) -> Self {
        match reltuples {
            Some(rows) if rows >= 0.0 => RowEstimate::Known(rows.round() as u64),
            _ => RowEstimate::Unknown,
        }
    }
}

/// Approximate row counts from catalog statistics
pub trait TableSizeProbe {
    fn estimate_rows(&self, table: &str) -> impl Future<Output = Result<RowEstimate, AppError>> + Send;
}

/// Reads `pg_class.reltuples` on a live connection
pub struct PostgresSizeProbe<'a> {
    client: &'a Client,
}

impl<'a> PostgresSizeProbe<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }
}

impl TableSizeProbe for PostgresSizeProbe<'_> {
    async fn estimate_rows(&self, table: &str) -> Result<RowEstimate, AppError> {
        let query = r#"
            SELECT reltuples::float8 AS reltuples
            FROM pg_class
            WHERE oid = to_regclass($1)
        "#;

        let regclass = quote_ident(table);
        let row = self.client.query_opt(query, &[&regclass]).await?;
        let estimate = RowEstimate::from_reltuples(row.map(|r| r.get("reltuples")));

        debug!("Row estimate for {}: {:?}", table, estimate);
        Ok(estimate)
    }
}

/// Fixed estimates, for offline planning and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSizeProbe {
    estimates: HashMap<String, u64>,
}

impl StaticSizeProbe {
    pub fn new(estimates: HashMap<String, u64>) -> Self {
        Self { estimates }
    }

    pub fn with(mut self, table: impl Into<String>, rows: u64) -> Self {
        self.estimates.insert(table.into(), rows);
        self
    }
}

impl TableSizeProbe for StaticSizeProbe {
    async fn estimate_rows(&self, table: &str) -> Result<RowEstimate, AppError> {
        Ok(self
            .estimates
            .get(table)
            .map_or(RowEstimate::Unknown, |rows| RowEstimate::Known(*rows)))
    }
}

/// Server version and the capabilities derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCaps {
    /// `server_version_num`, e.g. 120000
    pub server_version_num: u32,
    /// Database collation is C/POSIX, so btree indexes already serve LIKE-prefix queries
    #[serde(default)]
    pub c_collation: bool,
}

impl Default for ServerCaps {
    fn default() -> Self {
        Self {
            server_version_num: 120000,
            c_collation: false,
        }
    }
}

impl ServerCaps {
    pub fn new(server_version_num: u32) -> Self {
        Self {
            server_version_num,
            ..Self::default()
        }
    }

    /// ADD COLUMN with a non-volatile default only touches metadata
    pub fn has_instant_default(&self) -> bool {
        self.server_version_num >= 110000
    }

    /// SET NOT NULL skips its scan when a validated CHECK proves it
    pub fn set_not_null_uses_check(&self) -> bool {
        self.server_version_num >= 120000
    }

    /// Probe a live server
    pub async fn probe(client: &Client) -> Result<Self, AppError> {
        let row = client.query_one("SHOW server_version_num", &[]).await?;
        let version: String = row.get(0);
        let server_version_num = version.trim().parse::<u32>().map_err(|_| {
            AppError::Internal(format!("unexpected server_version_num: {}", version))
        })?;

        let row = client
            .query_one(
                "SELECT datcollate::text FROM pg_database WHERE datname = current_database()",
                &[],
            )
            .await?;
        let collate: String = row.get(0);
        let c_collation = collate == "C" || collate == "POSIX";

        debug!("Server {} (collation {})", server_version_num, collate);
        Ok(Self {
            server_version_num,
            c_collation,
        })
    }
}

/// Current session values of the timeout settings, restored after wrapped regions
pub async fn session_defaults(client: &Client) -> Result<SessionDefaults, AppError> {
    let query = r#"
        SELECT name::text AS name, setting || COALESCE(unit, '') AS value
        FROM pg_settings
        WHERE name IN ('statement_timeout', 'lock_timeout')
    "#;

    let rows = client.query(query, &[]).await?;
    let mut defaults = SessionDefaults::default();
    for row in rows {
        let name: String = row.get("name");
        let value: String = row.get("value");
        match name.as_str() {
            "statement_timeout" => defaults.statement_timeout = value,
            "lock_timeout" => defaults.lock_timeout = value,
            _ => {}
        }
    }
    Ok(defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reltuples_mapping() {
        assert_eq!(RowEstimate::from_reltuples(Some(5.0)), RowEstimate::Known(5));
        assert_eq!(RowEstimate::from_reltuples(Some(0.0)), RowEstimate::Known(0));
        assert_eq!(RowEstimate::from_reltuples(Some(-1.0)), RowEstimate::Unknown);
        assert_eq!(RowEstimate::from_reltuples(None), RowEstimate::Unknown);
    }

    #[test]
    fn test_static_probe_defaults_to_unknown() {
        let probe = StaticSizeProbe::default().with("tests_model", 5);
        assert_eq!(
            tokio_test::block_on(probe.estimate_rows("tests_model")).unwrap(),
            RowEstimate::Known(5)
        );
        assert_eq!(
            tokio_test::block_on(probe.estimate_rows("other")).unwrap(),
            RowEstimate::Unknown
        );
    }

    #[test]
    fn test_capabilities_by_version() {
        assert!(!ServerCaps::new(100000).has_instant_default());
        assert!(ServerCaps::new(110000).has_instant_default());
        assert!(!ServerCaps::new(110000).set_not_null_uses_check());
        assert!(ServerCaps::new(120000).set_not_null_uses_check());
    }
}
