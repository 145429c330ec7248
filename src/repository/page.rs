//! Page persistence: lifecycle updates and stage-trigger counts.

use std::path::{Path, PathBuf};

use rusqlite::{params, Row};

use super::{connect, parse_datetime, parse_datetime_opt, to_option, Result};
use crate::models::{DiscoveryMethod, Page, PageExtract, PageLifecycle};

/// Per-lifecycle page counts, read from persisted rows so stage triggers
/// survive process restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub total: u64,
    pub discovered: u64,
    pub fetched: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl PageCounts {
    /// Pages that no pipeline stage will touch again.
    pub fn terminal(&self) -> u64 {
        self.extracted + self.skipped + self.failed
    }

    /// Whether every page has reached a terminal lifecycle state.
    pub fn all_terminal(&self) -> bool {
        self.total > 0 && self.terminal() == self.total
    }
}

/// SQLite-backed repository for pages.
pub struct PageRepository {
    db_path: PathBuf,
}

impl PageRepository {
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
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL,
                url TEXT NOT NULL,
                final_url TEXT,
                http_status INTEGER,
                load_time_ms INTEGER,
                lifecycle TEXT NOT NULL DEFAULT 'discovered',
                discovery_method TEXT NOT NULL,
                depth INTEGER NOT NULL DEFAULT 0,
                discovery_order INTEGER NOT NULL DEFAULT 0,
                rendered INTEGER NOT NULL DEFAULT 0,
                html TEXT,
                extract TEXT,
                discovered_at TEXT NOT NULL,
                fetched_at TEXT,

                UNIQUE(scan_id, url)
            );

            CREATE INDEX IF NOT EXISTS idx_pages_scan_lifecycle
                ON pages(scan_id, lifecycle);
        "#,
        )?;
        Ok(())
    }

    /// Insert a discovered page if not already known. Returns whether a
    /// row was inserted.
    pub fn insert(&self, page: &Page) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO pages (
                scan_id, url, lifecycle, discovery_method, depth,
                discovery_order, discovered_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                page.scan_id,
                page.url,
                page.lifecycle.as_str(),
                page.discovery_method.as_str(),
                page.depth,
                page.discovery_order,
                page.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Fetch one page by scan and URL.
    pub fn get(&self, scan_id: &str, url: &str) -> Result<Option<Page>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT * FROM pages WHERE scan_id = ? AND url = ?")?;
        to_option(stmt.query_row(params![scan_id, url], row_to_page))
    }

    /// Persist fetch/render/extract results. The lifecycle column is only
    /// moved forward; a stale writer cannot regress it.
    pub fn update(&self, page: &Page) -> Result<()> {
        let conn = self.connect()?;
        let extract_json = page
            .extract
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"
            UPDATE pages SET
                final_url = ?1,
                http_status = ?2,
                load_time_ms = ?3,
                lifecycle = ?4,
                rendered = ?5,
                html = ?6,
                extract = ?7,
                fetched_at = ?8
            WHERE scan_id = ?9 AND url = ?10
            "#,
            params![
                page.final_url,
                page.http_status,
                page.load_time_ms.map(|v| v as i64),
                page.lifecycle.as_str(),
                page.rendered as i64,
                page.html,
                extract_json,
                page.fetched_at.map(|dt| dt.to_rfc3339()),
                page.scan_id,
                page.url,
            ],
        )?;
        Ok(())
    }

    /// All pages for a scan in discovery order.
    pub fn list_for_scan(&self, scan_id: &str) -> Result<Vec<Page>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT * FROM pages WHERE scan_id = ? ORDER BY discovery_order ASC")?;
        let pages = stmt
            .query_map(params![scan_id], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Pages that completed extraction, in discovery order.
    pub fn extracted_for_scan(&self, scan_id: &str) -> Result<Vec<Page>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM pages
            WHERE scan_id = ? AND lifecycle = 'extracted'
            ORDER BY discovery_order ASC
            "#,
        )?;
        let pages = stmt
            .query_map(params![scan_id], row_to_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Lifecycle counts for a scan, from persisted state.
    pub fn counts(&self, scan_id: &str) -> Result<PageCounts> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT lifecycle, COUNT(*) FROM pages WHERE scan_id = ? GROUP BY lifecycle",
        )?;
        let rows = stmt.query_map(params![scan_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = PageCounts::default();
        for row in rows {
            let (lifecycle, n) = row?;
            counts.total += n;
            match PageLifecycle::from_str(&lifecycle) {
                Some(PageLifecycle::Discovered) => counts.discovered += n,
                Some(PageLifecycle::Fetched) => counts.fetched += n,
                Some(PageLifecycle::Extracted) => counts.extracted += n,
                Some(PageLifecycle::Skipped) => counts.skipped += n,
                Some(PageLifecycle::Failed) => counts.failed += n,
                None => {}
            }
        }
        Ok(counts)
    }
}

fn row_to_page(row: &Row) -> rusqlite::Result<Page> {
    let lifecycle: String = row.get("lifecycle")?;
    let method: String = row.get("discovery_method")?;
    let extract: Option<String> = row.get("extract")?;
    let extract: Option<PageExtract> =
        extract.and_then(|raw| serde_json::from_str(&raw).ok());

    Ok(Page {
        scan_id: row.get("scan_id")?,
        url: row.get("url")?,
        final_url: row.get("final_url")?,
        http_status: row.get::<_, Option<i64>>("http_status")?.map(|v| v as u16),
        load_time_ms: row.get::<_, Option<i64>>("load_time_ms")?.map(|v| v as u64),
        lifecycle: PageLifecycle::from_str(&lifecycle).unwrap_or(PageLifecycle::Discovered),
        discovery_method: DiscoveryMethod::from_str(&method).unwrap_or(DiscoveryMethod::Crawl),
        depth: row.get::<_, i64>("depth")? as u32,
        discovery_order: row.get::<_, i64>("discovery_order")? as u32,
        rendered: row.get::<_, i64>("rendered")? != 0,
        html: row.get("html")?,
        extract,
        discovered_at: parse_datetime(&row.get::<_, String>("discovered_at")?),
        fetched_at: parse_datetime_opt(row.get("fetched_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageLifecycle;
    use tempfile::TempDir;

    fn repo() -> (PageRepository, TempDir) {
        let dir = TempDir::new().unwrap();
        let repo = PageRepository::new(&dir.path().join("aeoscan.db")).unwrap();
        (repo, dir)
    }

    fn page(url: &str, order: u32) -> Page {
        Page::new(
            "scan-1".to_string(),
            url.to_string(),
            DiscoveryMethod::Sitemap,
            0,
            order,
        )
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let (repo, _dir) = repo();
        assert!(repo.insert(&page("https://example.com/a", 0)).unwrap());
        assert!(!repo.insert(&page("https://example.com/a", 1)).unwrap());

        let counts = repo.counts("scan-1").unwrap();
        assert_eq!(counts.total, 1);
    }

    #[test]
    fn update_round_trips_extract() {
        let (repo, _dir) = repo();
        let mut p = page("https://example.com/a", 0);
        repo.insert(&p).unwrap();

        p.http_status = Some(200);
        p.final_url = Some("https://example.com/a/".to_string());
        p.advance_lifecycle(PageLifecycle::Fetched);
        p.advance_lifecycle(PageLifecycle::Extracted);
        p.extract = Some(PageExtract {
            title: Some("Hello".to_string()),
            word_count: 42,
            ..Default::default()
        });
        repo.update(&p).unwrap();

        let loaded = repo.get("scan-1", "https://example.com/a").unwrap().unwrap();
        assert_eq!(loaded.lifecycle, PageLifecycle::Extracted);
        assert_eq!(loaded.extract.unwrap().word_count, 42);
    }

    #[test]
    fn counts_track_terminal_states() {
        let (repo, _dir) = repo();
        for (i, url) in ["/a", "/b", "/c"].iter().enumerate() {
            repo.insert(&page(&format!("https://example.com{}", url), i as u32))
                .unwrap();
        }

        let mut a = repo.get("scan-1", "https://example.com/a").unwrap().unwrap();
        a.advance_lifecycle(PageLifecycle::Fetched);
        a.advance_lifecycle(PageLifecycle::Extracted);
        repo.update(&a).unwrap();

        let mut b = repo.get("scan-1", "https://example.com/b").unwrap().unwrap();
        b.advance_lifecycle(PageLifecycle::Skipped);
        repo.update(&b).unwrap();

        let counts = repo.counts("scan-1").unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.terminal(), 2);
        assert!(!counts.all_terminal());

        let mut c = repo.get("scan-1", "https://example.com/c").unwrap().unwrap();
        c.advance_lifecycle(PageLifecycle::Failed);
        repo.update(&c).unwrap();
        assert!(repo.counts("scan-1").unwrap().all_terminal());
    }
}
