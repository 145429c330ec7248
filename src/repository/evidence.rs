//! Evidence persistence: write-once audit rows.

use std::path::{Path, PathBuf};

use rusqlite::{params, Row};

use super::{connect, parse_datetime, Result};
use crate::evidence::RedactionCounts;
use crate::models::{Confidence, Evidence, EvidenceContent, EvidenceKind};

/// SQLite-backed repository for evidence rows.
pub struct EvidenceRepository {
    db_path: PathBuf,
}

impl EvidenceRepository {
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
            CREATE TABLE IF NOT EXISTS evidence (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scan_id TEXT NOT NULL,
                page_url TEXT NOT NULL,
                kind TEXT NOT NULL,
                success INTEGER NOT NULL,
                confidence TEXT NOT NULL,
                excerpt TEXT,
                content_hash TEXT,
                content_len INTEGER NOT NULL DEFAULT 0,
                redactions TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_evidence_scan_page
                ON evidence(scan_id, page_url);
        "#,
        )?;
        Ok(())
    }

    /// Append one evidence row. Rows are never updated or deleted.
    pub fn insert(&self, evidence: &Evidence) -> Result<()> {
        let (excerpt, content_hash, content_len) = match &evidence.content {
            EvidenceContent::Full { excerpt } => {
                (Some(excerpt.as_str()), None, excerpt.len() as i64)
            }
            EvidenceContent::ExtractOnly { sha256, length } => {
                (None, Some(sha256.as_str()), *length as i64)
            }
        };

        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO evidence (
                scan_id, page_url, kind, success, confidence,
                excerpt, content_hash, content_len, redactions, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                evidence.scan_id,
                evidence.page_url,
                evidence.kind.as_str(),
                evidence.success as i64,
                evidence.confidence.as_str(),
                excerpt,
                content_hash,
                content_len,
                serde_json::to_string(&evidence.redactions)?,
                evidence.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Evidence rows for one page, oldest first.
    pub fn for_page(&self, scan_id: &str, page_url: &str) -> Result<Vec<Evidence>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM evidence
            WHERE scan_id = ? AND page_url = ?
            ORDER BY id ASC
            "#,
        )?;
        let rows = stmt
            .query_map(params![scan_id, page_url], row_to_evidence)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total evidence rows recorded for a scan.
    pub fn count_for_scan(&self, scan_id: &str) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM evidence WHERE scan_id = ?",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_evidence(row: &Row) -> rusqlite::Result<Evidence> {
    let kind: String = row.get("kind")?;
    let confidence: String = row.get("confidence")?;
    let excerpt: Option<String> = row.get("excerpt")?;
    let content_hash: Option<String> = row.get("content_hash")?;
    let content_len = row.get::<_, i64>("content_len")? as u32;
    let redactions: String = row.get("redactions")?;

    let content = match (excerpt, content_hash) {
        (Some(excerpt), _) => EvidenceContent::Full { excerpt },
        (None, Some(sha256)) => EvidenceContent::ExtractOnly {
            sha256,
            length: content_len,
        },
        (None, None) => EvidenceContent::Full {
            excerpt: String::new(),
        },
    };

    Ok(Evidence {
        scan_id: row.get("scan_id")?,
        page_url: row.get("page_url")?,
        kind: EvidenceKind::from_str(&kind).unwrap_or(EvidenceKind::FetchHeaders),
        success: row.get::<_, i64>("success")? != 0,
        confidence: Confidence::from_str(&confidence).unwrap_or(Confidence::Low),
        content,
        redactions: serde_json::from_str::<RedactionCounts>(&redactions).unwrap_or_default(),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn insert_and_read_back() {
        let dir = TempDir::new().unwrap();
        let repo = EvidenceRepository::new(&dir.path().join("aeoscan.db")).unwrap();

        let evidence = Evidence {
            scan_id: "scan-1".to_string(),
            page_url: "https://example.com/".to_string(),
            kind: EvidenceKind::RobotsVerdict,
            success: true,
            confidence: Confidence::High,
            content: EvidenceContent::Full {
                excerpt: "allow: matched rule Allow /".to_string(),
            },
            redactions: RedactionCounts::default(),
            created_at: Utc::now(),
        };
        repo.insert(&evidence).unwrap();

        let rows = repo.for_page("scan-1", "https://example.com/").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, EvidenceKind::RobotsVerdict);
        assert_eq!(rows[0].confidence, Confidence::High);
        assert_eq!(repo.count_for_scan("scan-1").unwrap(), 1);
    }
}
