//! Cluster persistence: rebuilt atomically per scan.

use std::path::{Path, PathBuf};

use rusqlite::{params, Row};

use super::{connect, Result};
use crate::models::{Cluster, ClusterPage, RepresentativeRole};

/// SQLite-backed repository for clusters and their page mappings.
pub struct ClusterRepository {
    db_path: PathBuf,
}

impl ClusterRepository {
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
            CREATE TABLE IF NOT EXISTS clusters (
                key TEXT NOT NULL,
                scan_id TEXT NOT NULL,
                name TEXT NOT NULL,
                pattern TEXT NOT NULL,
                dom_fingerprint TEXT NOT NULL,
                profile_key TEXT NOT NULL,
                member_count INTEGER NOT NULL DEFAULT 0,

                PRIMARY KEY (scan_id, key)
            );

            CREATE TABLE IF NOT EXISTS cluster_pages (
                cluster_key TEXT NOT NULL,
                scan_id TEXT NOT NULL,
                page_url TEXT NOT NULL,
                url_signature TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'member',

                PRIMARY KEY (scan_id, cluster_key, page_url)
            );

            CREATE INDEX IF NOT EXISTS idx_cluster_pages_scan
                ON cluster_pages(scan_id, page_url);
        "#,
        )?;
        Ok(())
    }

    /// Replace a scan's clusters and mappings in one transaction, so a
    /// rebuild over the same page set is observably idempotent.
    pub fn replace_for_scan(
        &self,
        scan_id: &str,
        clusters: &[Cluster],
        pages: &[ClusterPage],
    ) -> Result<()> {
        let conn = self.connect()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<()> = (|| {
            conn.execute("DELETE FROM clusters WHERE scan_id = ?", params![scan_id])?;
            conn.execute(
                "DELETE FROM cluster_pages WHERE scan_id = ?",
                params![scan_id],
            )?;

            for cluster in clusters {
                conn.execute(
                    r#"
                    INSERT INTO clusters (
                        key, scan_id, name, pattern, dom_fingerprint,
                        profile_key, member_count
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        cluster.key,
                        cluster.scan_id,
                        cluster.name,
                        cluster.pattern,
                        cluster.dom_fingerprint,
                        cluster.profile_key,
                        cluster.member_count,
                    ],
                )?;
            }

            for page in pages {
                conn.execute(
                    r#"
                    INSERT INTO cluster_pages (
                        cluster_key, scan_id, page_url, url_signature, role
                    ) VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![
                        page.cluster_key,
                        page.scan_id,
                        page.page_url,
                        page.url_signature,
                        page.role.as_str(),
                    ],
                )?;
            }
            Ok(())
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Clusters for a scan, largest first.
    pub fn list_for_scan(&self, scan_id: &str) -> Result<Vec<Cluster>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM clusters
            WHERE scan_id = ?
            ORDER BY member_count DESC, key ASC
            "#,
        )?;
        let clusters = stmt
            .query_map(params![scan_id], row_to_cluster)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(clusters)
    }

    /// Page mappings for one cluster.
    pub fn pages_for_cluster(&self, scan_id: &str, key: &str) -> Result<Vec<ClusterPage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM cluster_pages
            WHERE scan_id = ? AND cluster_key = ?
            ORDER BY page_url ASC
            "#,
        )?;
        let pages = stmt
            .query_map(params![scan_id, key], row_to_cluster_page)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }
}

fn row_to_cluster(row: &Row) -> rusqlite::Result<Cluster> {
    Ok(Cluster {
        key: row.get("key")?,
        scan_id: row.get("scan_id")?,
        name: row.get("name")?,
        pattern: row.get("pattern")?,
        dom_fingerprint: row.get("dom_fingerprint")?,
        profile_key: row.get("profile_key")?,
        member_count: row.get::<_, i64>("member_count")? as u32,
    })
}

fn row_to_cluster_page(row: &Row) -> rusqlite::Result<ClusterPage> {
    let role: String = row.get("role")?;
    Ok(ClusterPage {
        cluster_key: row.get("cluster_key")?,
        scan_id: row.get("scan_id")?,
        page_url: row.get("page_url")?,
        url_signature: row.get("url_signature")?,
        role: RepresentativeRole::from_str(&role).unwrap_or(RepresentativeRole::Member),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replace_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let repo = ClusterRepository::new(&dir.path().join("aeoscan.db")).unwrap();

        let cluster = Cluster {
            key: "abc123".to_string(),
            scan_id: "scan-1".to_string(),
            name: "Blog posts".to_string(),
            pattern: "example.com/blog/{slug}".to_string(),
            dom_fingerprint: "article|1:3:0|Article".to_string(),
            profile_key: "medium:medium:no_faq".to_string(),
            member_count: 2,
        };
        let pages = vec![
            ClusterPage {
                cluster_key: "abc123".to_string(),
                scan_id: "scan-1".to_string(),
                page_url: "https://example.com/blog/a".to_string(),
                url_signature: "example.com/blog/a".to_string(),
                role: RepresentativeRole::Best,
            },
            ClusterPage {
                cluster_key: "abc123".to_string(),
                scan_id: "scan-1".to_string(),
                page_url: "https://example.com/blog/b".to_string(),
                url_signature: "example.com/blog/b".to_string(),
                role: RepresentativeRole::Worst,
            },
        ];

        repo.replace_for_scan("scan-1", &[cluster.clone()], &pages)
            .unwrap();
        repo.replace_for_scan("scan-1", &[cluster], &pages).unwrap();

        let clusters = repo.list_for_scan("scan-1").unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_count, 2);
        assert_eq!(
            repo.pages_for_cluster("scan-1", "abc123").unwrap().len(),
            2
        );
    }
}
