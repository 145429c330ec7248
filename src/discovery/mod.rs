//! URL discovery: sitemap traversal with a bounded BFS fallback.
//!
//! State machine: try sitemaps; when they fail or recover too few URLs,
//! fall back to crawling outward from the homepage. Output in both paths
//! is robots-filtered, skip-filtered, deduplicated by normalized URL, and
//! capped.

mod crawl;
mod sitemap;

pub use crawl::{BfsCrawler, CrawledUrl};
pub use sitemap::SitemapSource;

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::ScanSettings;
use crate::models::DiscoveryMethod;
use crate::politeness::{skip_reason, PolitenessGate, RobotsTxt};

/// Errors from the discovery stage.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("no URLs discovered for {0}")]
    Empty(String),
}

/// One URL admitted to the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPage {
    pub url: String,
    pub method: DiscoveryMethod,
    pub depth: u32,
}

/// Result of the discovery stage for a scan.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub pages: Vec<DiscoveredPage>,
    /// Whether the BFS fallback ran.
    pub used_fallback: bool,
    /// URLs dropped by robots rules (recorded as evidence upstream).
    pub robots_blocked: usize,
}

/// Normalize a URL to scheme+host+path, dropping query and fragment, for
/// visited-set and dedup keys.
pub fn normalize_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path().trim_end_matches('/');
    Some(format!("{}://{}{}", parsed.scheme(), host, path))
}

/// Discovery engine: resolves a domain's URL set.
pub struct DiscoveryEngine {
    client: reqwest::Client,
    settings: ScanSettings,
}

impl DiscoveryEngine {
    pub fn new(settings: ScanSettings) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.discovery.sitemap_timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, settings }
    }

    /// Resolve the URL set for a domain: sitemap first, BFS fallback when
    /// the sitemap path recovers fewer than the sufficiency threshold.
    pub async fn discover(
        &self,
        domain: &str,
        robots: &RobotsTxt,
        politeness: &PolitenessGate,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let base_url = base_url_for(domain);

        let sitemap = SitemapSource::new(
            self.client.clone(),
            Duration::from_secs(self.settings.discovery.sitemap_timeout_secs),
            self.settings.discovery.sitemap_depth,
        );
        let sitemap_urls = match sitemap.collect(&base_url, &robots.sitemaps, politeness).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Sitemap discovery failed for {}: {}", domain, e);
                Vec::new()
            }
        };

        // "Insufficient" triggers fallback regardless of the success flag.
        let sufficient = sitemap_urls.len() >= self.settings.discovery.sitemap_min_urls;
        let (raw, method, used_fallback) = if sufficient {
            info!(
                "Sitemap discovery found {} URLs for {}",
                sitemap_urls.len(),
                domain
            );
            let pages = sitemap_urls
                .into_iter()
                .map(|url| (url, 0u32))
                .collect::<Vec<_>>();
            (pages, DiscoveryMethod::Sitemap, false)
        } else {
            info!(
                "Sitemap recovered only {} URLs for {}; falling back to crawl",
                sitemap_urls.len(),
                domain
            );
            let crawler = BfsCrawler::new(
                self.client.clone(),
                self.settings.fetch_timeout(),
                self.settings.discovery.crawl_max_depth,
                self.settings.discovery.crawl_max_pages,
                self.settings.user_agent.clone(),
            );
            let crawled = crawler.crawl(&base_url, robots, politeness).await;
            let pages = crawled
                .into_iter()
                .map(|c| (c.url, c.depth))
                .collect::<Vec<_>>();
            (pages, DiscoveryMethod::Crawl, true)
        };

        let (pages, robots_blocked) = finalize_urls(
            raw,
            method,
            domain,
            robots,
            &self.settings.user_agent,
            self.settings.discovery.max_urls,
        );

        if pages.is_empty() {
            return Err(DiscoveryError::Empty(domain.to_string()));
        }

        Ok(DiscoveryResult {
            pages,
            used_fallback,
            robots_blocked,
        })
    }
}

/// Build the https base URL for a bare domain.
pub fn base_url_for(domain: &str) -> String {
    if domain.starts_with("http://") || domain.starts_with("https://") {
        domain.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", domain.trim_end_matches('/'))
    }
}

/// Shared output shaping for both discovery paths: same-host filter, skip
/// patterns, robots rules, dedup by normalized URL, cap.
pub(crate) fn finalize_urls(
    raw: Vec<(String, u32)>,
    method: DiscoveryMethod,
    domain: &str,
    robots: &RobotsTxt,
    user_agent: &str,
    max_urls: usize,
) -> (Vec<DiscoveredPage>, usize) {
    let domain_host = PolitenessGate::host_of(&base_url_for(domain)).unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    let mut pages = Vec::new();
    let mut robots_blocked = 0usize;

    for (url, depth) in raw {
        if pages.len() >= max_urls {
            break;
        }
        let Ok(parsed) = Url::parse(&url) else {
            continue;
        };
        let same_host = parsed
            .host_str()
            .map(|h| h.eq_ignore_ascii_case(&domain_host))
            .unwrap_or(false);
        if !same_host {
            continue;
        }
        if skip_reason(&url).is_some() {
            continue;
        }
        if !robots.is_allowed(user_agent, parsed.path()).allowed {
            robots_blocked += 1;
            continue;
        }
        let Some(normalized) = normalize_url(&url) else {
            continue;
        };
        if !seen.insert(normalized) {
            continue;
        }
        pages.push(DiscoveredPage { url, method, depth });
    }

    (pages, robots_blocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(raw: &[&str]) -> Vec<(String, u32)> {
        raw.iter().map(|u| (u.to_string(), 0)).collect()
    }

    #[test]
    fn finalize_deduplicates_by_normalized_url() {
        let raw = urls(&[
            "https://example.com/a",
            "https://example.com/a/",
            "https://example.com/a?utm=x",
            "https://example.com/b",
        ]);
        let (pages, _) = finalize_urls(
            raw,
            DiscoveryMethod::Sitemap,
            "example.com",
            &RobotsTxt::not_found(),
            "aeoscan",
            100,
        );
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn finalize_applies_robots_and_counts_blocked() {
        let robots = RobotsTxt::parse("User-agent: *\nDisallow: /private\n");
        let raw = urls(&[
            "https://example.com/public",
            "https://example.com/private/a",
            "https://example.com/private/b",
        ]);
        let (pages, blocked) = finalize_urls(
            raw,
            DiscoveryMethod::Sitemap,
            "example.com",
            &robots,
            "aeoscan",
            100,
        );
        assert_eq!(pages.len(), 1);
        assert_eq!(blocked, 2);
    }

    #[test]
    fn finalize_drops_foreign_hosts_and_assets() {
        let raw = urls(&[
            "https://example.com/page",
            "https://cdn.example.net/lib.js",
            "https://example.com/style.css",
            "https://example.com/wp-admin/",
        ]);
        let (pages, _) = finalize_urls(
            raw,
            DiscoveryMethod::Sitemap,
            "example.com",
            &RobotsTxt::not_found(),
            "aeoscan",
            100,
        );
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url, "https://example.com/page");
    }

    #[test]
    fn finalize_caps_output() {
        let raw: Vec<(String, u32)> = (0..50)
            .map(|i| (format!("https://example.com/p{}", i), 0))
            .collect();
        let (pages, _) = finalize_urls(
            raw,
            DiscoveryMethod::Sitemap,
            "example.com",
            &RobotsTxt::not_found(),
            "aeoscan",
            10,
        );
        assert_eq!(pages.len(), 10);
    }

    #[test]
    fn sitemap_of_fifty_urls_survives_intact() {
        // Scenario: a valid sitemap of 50 URLs yields exactly those 50,
        // deduplicated and robots-filtered.
        let raw: Vec<(String, u32)> = (0..50)
            .map(|i| (format!("https://example.com/page-{}", i), 0))
            .collect();
        let (pages, blocked) = finalize_urls(
            raw,
            DiscoveryMethod::Sitemap,
            "example.com",
            &RobotsTxt::not_found(),
            "aeoscan",
            500,
        );
        assert_eq!(pages.len(), 50);
        assert_eq!(blocked, 0);
        assert!(pages.iter().all(|p| p.method == DiscoveryMethod::Sitemap));
    }

    #[test]
    fn normalize_url_strips_query_fragment_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://Example.com/Path/?q=1#frag"),
            Some("https://example.com/Path".to_string())
        );
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn base_url_for_bare_domain() {
        assert_eq!(base_url_for("example.com"), "https://example.com");
        assert_eq!(
            base_url_for("http://example.com/"),
            "http://example.com"
        );
    }
}
