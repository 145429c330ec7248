//! Scan persistence: status transitions and budget counters.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row};

use super::{connect, parse_datetime, parse_datetime_opt, to_option, Result};
use crate::models::{BudgetResource, LimitsHit, Scan, ScanStatus};

/// SQLite-backed repository for scans.
pub struct ScanRepository {
    db_path: PathBuf,
}

impl ScanRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',

                -- Budget counters (monotonic within a run)
                pages_fetched INTEGER NOT NULL DEFAULT 0,
                pages_rendered INTEGER NOT NULL DEFAULT 0,
                llm_calls INTEGER NOT NULL DEFAULT 0,
                tokens_used INTEGER NOT NULL DEFAULT 0,

                -- Limit-hit flags
                limit_pages INTEGER NOT NULL DEFAULT 0,
                limit_renders INTEGER NOT NULL DEFAULT 0,
                limit_llm_calls INTEGER NOT NULL DEFAULT 0,
                limit_tokens INTEGER NOT NULL DEFAULT 0,

                last_error TEXT,

                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
        "#,
        )?;
        Ok(())
    }

    /// Insert a new scan record.
    pub fn create(&self, scan: &Scan) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO scans (id, domain, status, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                scan.id,
                scan.domain,
                scan.status.as_str(),
                scan.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a scan by id.
    pub fn get(&self, id: &str) -> Result<Option<Scan>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM scans WHERE id = ?")?;
        to_option(stmt.query_row(params![id], row_to_scan))
    }

    /// List scans, newest first.
    pub fn list(&self, limit: u32) -> Result<Vec<Scan>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT * FROM scans ORDER BY created_at DESC LIMIT ?")?;
        let scans = stmt
            .query_map(params![limit], row_to_scan)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(scans)
    }

    /// Transition pending -> running, stamping started_at once.
    pub fn mark_running(&self, id: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE scans
            SET status = 'running',
                started_at = COALESCE(started_at, ?1)
            WHERE id = ?2 AND status = 'pending'
            "#,
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Mark a scan failed, retaining the causing error.
    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE scans
            SET status = 'failed', last_error = ?1, finished_at = ?2
            WHERE id = ?3 AND status NOT IN ('completed', 'completed_with_limits')
            "#,
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Move a running scan to its terminal completed status.
    pub fn finish(&self, id: &str, status: ScanStatus) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE scans SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Atomically add `amount` to a resource counter iff the result stays
    /// within `ceiling`. Returns whether the increment was applied.
    pub fn increment_within(
        &self,
        id: &str,
        resource: BudgetResource,
        amount: u64,
        ceiling: u64,
    ) -> Result<bool> {
        let column = counter_column(resource);
        let conn = self.connect()?;
        let sql = format!(
            "UPDATE scans SET {col} = {col} + ?1 WHERE id = ?2 AND {col} + ?1 <= ?3",
            col = column
        );
        let rows = conn.execute(&sql, params![amount as i64, id, ceiling as i64])?;
        Ok(rows > 0)
    }

    /// Add as many of `requested` tokens as the ceiling allows, returning
    /// the granted amount (possibly zero).
    pub fn add_tokens_clamped(&self, id: &str, requested: u64, ceiling: u64) -> Result<u64> {
        let conn = self.connect()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<u64> = (|| {
            let used: i64 = conn.query_row(
                "SELECT tokens_used FROM scans WHERE id = ?",
                params![id],
                |row| row.get(0),
            )?;
            let remaining = (ceiling as i64 - used).max(0) as u64;
            let granted = requested.min(remaining);
            if granted > 0 {
                conn.execute(
                    "UPDATE scans SET tokens_used = tokens_used + ?1 WHERE id = ?2",
                    params![granted as i64, id],
                )?;
            }
            Ok(granted)
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Flip the limit-hit flag for a resource.
    pub fn set_limit_hit(&self, id: &str, resource: BudgetResource) -> Result<()> {
        let column = limit_column(resource);
        let conn = self.connect()?;
        let sql = format!("UPDATE scans SET {} = 1 WHERE id = ?", column);
        conn.execute(&sql, params![id])?;
        Ok(())
    }
}

fn counter_column(resource: BudgetResource) -> &'static str {
    match resource {
        BudgetResource::PagesFetched => "pages_fetched",
        BudgetResource::PagesRendered => "pages_rendered",
        BudgetResource::LlmCalls => "llm_calls",
        BudgetResource::Tokens => "tokens_used",
    }
}

fn limit_column(resource: BudgetResource) -> &'static str {
    match resource {
        BudgetResource::PagesFetched => "limit_pages",
        BudgetResource::PagesRendered => "limit_renders",
        BudgetResource::LlmCalls => "limit_llm_calls",
        BudgetResource::Tokens => "limit_tokens",
    }
}

fn row_to_scan(row: &Row) -> rusqlite::Result<Scan> {
    let status: String = row.get("status")?;
    Ok(Scan {
        id: row.get("id")?,
        domain: row.get("domain")?,
        status: ScanStatus::from_str(&status).unwrap_or(ScanStatus::Failed),
        pages_fetched: row.get::<_, i64>("pages_fetched")? as u64,
        pages_rendered: row.get::<_, i64>("pages_rendered")? as u64,
        llm_calls: row.get::<_, i64>("llm_calls")? as u64,
        tokens_used: row.get::<_, i64>("tokens_used")? as u64,
        limits_hit: LimitsHit {
            pages: row.get::<_, i64>("limit_pages")? != 0,
            renders: row.get::<_, i64>("limit_renders")? != 0,
            llm_calls: row.get::<_, i64>("limit_llm_calls")? != 0,
            tokens: row.get::<_, i64>("limit_tokens")? != 0,
        },
        last_error: row.get("last_error")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        started_at: parse_datetime_opt(row.get("started_at")?),
        finished_at: parse_datetime_opt(row.get("finished_at")?),
    })
}
