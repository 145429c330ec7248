//! Page model: one discovered URL within a scan.
//!
//! Pages move forward through `discovered -> fetched -> extracted` (or the
//! terminal `skipped`/`failed`); the lifecycle marker never regresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a page's URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Sitemap,
    Crawl,
    Seed,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Crawl => "crawl",
            Self::Seed => "seed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sitemap" => Some(Self::Sitemap),
            "crawl" => Some(Self::Crawl),
            "seed" => Some(Self::Seed),
            _ => None,
        }
    }
}

/// Pipeline position of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLifecycle {
    Discovered,
    Fetched,
    Extracted,
    /// Policy-blocked or not-modified: fetch terminal, extraction skipped.
    Skipped,
    /// Fetch failed after exhausting retries.
    Failed,
}

impl PageLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Fetched => "fetched",
            Self::Extracted => "extracted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovered" => Some(Self::Discovered),
            "fetched" => Some(Self::Fetched),
            "extracted" => Some(Self::Extracted),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Discovered => 0,
            Self::Fetched => 1,
            // All three are terminal for stage-trigger accounting.
            Self::Extracted | Self::Skipped | Self::Failed => 2,
        }
    }

    /// Whether no further pipeline stage will touch this page.
    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

/// Structured extraction output. A typed record, not a free-form bag, so
/// downstream stages get compile-time guarantees on the fields they read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageExtract {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub h1: Vec<String>,
    pub h2: Vec<String>,
    pub h3: Vec<String>,
    /// Sorted, deduplicated JSON-LD `@type` values.
    pub schema_types: Vec<String>,
    /// JSON-LD blocks seen / blocks that failed to parse.
    pub schema_blocks: u32,
    pub schema_invalid: u32,
    pub word_count: u32,
    pub visible_text_len: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub has_faq: bool,
}

impl PageExtract {
    pub fn heading_count(&self) -> u32 {
        (self.h1.len() + self.h2.len() + self.h3.len()) as u32
    }
}

/// One discovered URL within a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub scan_id: String,
    pub url: String,
    /// URL after following the redirect chain.
    pub final_url: Option<String>,
    pub http_status: Option<u16>,
    pub load_time_ms: Option<u64>,
    pub lifecycle: PageLifecycle,
    pub discovery_method: DiscoveryMethod,
    pub depth: u32,
    /// Discovery order within the scan; ties in cluster ranking resolve by
    /// this, keeping representative selection stable.
    pub discovery_order: u32,
    /// Whether the headless renderer produced the HTML that was extracted.
    pub rendered: bool,
    /// Fetched (or rendered) HTML, persisted so extraction survives a
    /// restart between stages.
    pub html: Option<String>,
    pub extract: Option<PageExtract>,
    pub discovered_at: DateTime<Utc>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Page {
    pub fn new(
        scan_id: String,
        url: String,
        discovery_method: DiscoveryMethod,
        depth: u32,
        discovery_order: u32,
    ) -> Self {
        Self {
            scan_id,
            url,
            final_url: None,
            http_status: None,
            load_time_ms: None,
            lifecycle: PageLifecycle::Discovered,
            discovery_method,
            depth,
            discovery_order,
            rendered: false,
            html: None,
            extract: None,
            discovered_at: Utc::now(),
            fetched_at: None,
        }
    }

    /// Advance the lifecycle marker. Backward moves are ignored; the marker
    /// never regresses within a scan.
    pub fn advance_lifecycle(&mut self, next: PageLifecycle) -> bool {
        if next.rank() > self.lifecycle.rank() {
            self.lifecycle = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_never_regresses() {
        let mut page = Page::new(
            "scan-1".to_string(),
            "https://example.com/".to_string(),
            DiscoveryMethod::Sitemap,
            0,
            0,
        );

        assert!(page.advance_lifecycle(PageLifecycle::Fetched));
        assert!(page.advance_lifecycle(PageLifecycle::Extracted));
        // Attempting to move back is a no-op.
        assert!(!page.advance_lifecycle(PageLifecycle::Fetched));
        assert!(!page.advance_lifecycle(PageLifecycle::Discovered));
        assert_eq!(page.lifecycle, PageLifecycle::Extracted);
    }

    #[test]
    fn skipped_is_terminal() {
        let mut page = Page::new(
            "scan-1".to_string(),
            "https://example.com/admin".to_string(),
            DiscoveryMethod::Crawl,
            1,
            3,
        );
        assert!(page.advance_lifecycle(PageLifecycle::Skipped));
        assert!(page.lifecycle.is_terminal());
        assert!(!page.advance_lifecycle(PageLifecycle::Fetched));
    }

    #[test]
    fn extract_heading_count_sums_levels() {
        let extract = PageExtract {
            h1: vec!["a".into()],
            h2: vec!["b".into(), "c".into()],
            h3: vec!["d".into()],
            ..Default::default()
        };
        assert_eq!(extract.heading_count(), 4);
    }
}
