//! SQLite persistence for scans, pages, evidence, and clusters.
//!
//! Each repository owns its own tables and creates them idempotently on
//! construction. Connections are opened per call; WAL mode plus a busy
//! timeout keeps concurrent worker writes from tripping over each other.

mod cluster;
mod evidence;
mod page;
mod scan;

pub use cluster::ClusterRepository;
pub use evidence::EvidenceRepository;
pub use page::{PageCounts, PageRepository};
pub use scan::ScanRepository;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Open a connection with the store-wide pragmas applied.
pub(crate) fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    let _: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    Ok(conn)
}

/// Ensure the store exists with every table created.
///
/// Convenience for `init`-style commands; repositories also create their
/// own tables on construction.
pub fn open_store(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    ScanRepository::new(path)?;
    PageRepository::new(path)?;
    EvidenceRepository::new(path)?;
    ClusterRepository::new(path)?;
    Ok(())
}

/// Map QueryReturnedNoRows to None, passing other errors through.
pub(crate) fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
