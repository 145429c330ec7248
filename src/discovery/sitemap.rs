//! Sitemap traversal: robots-declared URLs first, then common locations.
//!
//! Sitemap indexes are walked with a work queue rather than recursion,
//! bounded by a depth ceiling and a processed-set.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::politeness::PolitenessGate;

use super::DiscoveryError;

/// Standard sitemap locations to probe when robots.txt declares none.
const SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap/sitemap.xml",
    "/sitemaps/sitemap.xml",
    "/sitemap/index.xml",
];

/// Sitemap fetcher and parser.
pub struct SitemapSource {
    client: reqwest::Client,
    timeout: Duration,
    max_depth: usize,
}

impl SitemapSource {
    pub fn new(client: reqwest::Client, timeout: Duration, max_depth: usize) -> Self {
        Self {
            client,
            timeout,
            max_depth,
        }
    }

    /// Collect page URLs from the given sitemap roots. When `declared` is
    /// empty, the common locations are probed and the first that yields
    /// URLs wins. Every sitemap fetch goes through the politeness gate.
    pub async fn collect(
        &self,
        base_url: &str,
        declared: &[String],
        politeness: &PolitenessGate,
    ) -> Result<Vec<String>, DiscoveryError> {
        if !declared.is_empty() {
            let mut all_urls = Vec::new();
            for sitemap_url in declared {
                all_urls.extend(self.walk(sitemap_url, politeness).await);
            }
            return Ok(all_urls);
        }

        for path in SITEMAP_PATHS {
            let sitemap_url = format!("{}{}", base_url.trim_end_matches('/'), path);
            let urls = self.walk(&sitemap_url, politeness).await;
            if !urls.is_empty() {
                return Ok(urls);
            }
        }

        Ok(Vec::new())
    }

    /// Walk one sitemap tree breadth-first, recursing into child sitemaps
    /// of an index up to the depth ceiling.
    async fn walk(&self, root: &str, politeness: &PolitenessGate) -> Vec<String> {
        let mut all_urls = Vec::new();
        let mut pending: Vec<(String, usize)> = vec![(root.to_string(), 0)];
        let mut processed: HashSet<String> = HashSet::new();

        while let Some((sitemap_url, depth)) = pending.pop() {
            if depth > self.max_depth || !processed.insert(sitemap_url.clone()) {
                continue;
            }

            debug!("Fetching sitemap: {} (depth {})", sitemap_url, depth);
            let _permit = match politeness.acquire(&sitemap_url).await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("Politeness denied sitemap fetch {}: {}", sitemap_url, e);
                    continue;
                }
            };
            let response = match self
                .client
                .get(&sitemap_url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    debug!("Sitemap {} returned {}", sitemap_url, r.status());
                    continue;
                }
                Err(e) => {
                    warn!("Failed to fetch sitemap {}: {}", sitemap_url, e);
                    continue;
                }
            };

            let text = match response.text().await {
                Ok(t) => t,
                Err(e) => {
                    warn!("Failed to read sitemap {}: {}", sitemap_url, e);
                    continue;
                }
            };

            if text.contains("<sitemapindex") {
                for loc in extract_locs(&text) {
                    if !processed.contains(&loc) {
                        pending.push((loc, depth + 1));
                    }
                }
            } else {
                all_urls.extend(extract_locs(&text));
            }
        }

        all_urls
    }
}

/// Extract `<loc>` values from sitemap XML.
///
/// Sitemaps lean on XML namespaces that full parsers handle awkwardly, so
/// locs are pulled with plain string scanning plus entity unescaping.
pub(crate) fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<loc>") {
        let after = &rest[start + 5..];
        let Some(end) = after.find("</loc>") else {
            break;
        };
        let value = after[..end].trim();
        if !value.is_empty() {
            locs.push(unescape_xml(value));
        }
        rest = &after[end + 6..];
    }
    locs
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_locs_from_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url>
    <loc>https://example.com/</loc>
  </url>
  <url>
    <loc>https://example.com/services/seo</loc>
  </url>
</urlset>"#;

        let locs = extract_locs(xml);
        assert_eq!(locs.len(), 2);
        assert!(locs.contains(&"https://example.com/services/seo".to_string()));
    }

    #[test]
    fn extract_locs_unescapes_entities() {
        let xml = "<urlset>\n<url><loc>https://example.com/search?q=a&amp;page=1</loc></url>\n</urlset>";
        let locs = extract_locs(xml);
        assert_eq!(locs, vec!["https://example.com/search?q=a&page=1"]);
    }

    #[test]
    fn extract_locs_ignores_empty_tags() {
        let xml = "<urlset>\n<url><loc></loc></url>\n</urlset>";
        assert!(extract_locs(xml).is_empty());
    }
}
