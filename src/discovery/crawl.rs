//! Bounded breadth-first crawl, the fallback when sitemaps come up short.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::politeness::{skip_reason, PolitenessGate, RobotsTxt};

use super::normalize_url;

/// A URL found by the BFS crawl, with the depth it was found at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawledUrl {
    pub url: String,
    pub depth: u32,
}

/// Breadth-first crawler bounded by depth and page count.
pub struct BfsCrawler {
    client: reqwest::Client,
    timeout: Duration,
    max_depth: u32,
    max_pages: usize,
    user_agent: String,
}

impl BfsCrawler {
    pub fn new(
        client: reqwest::Client,
        timeout: Duration,
        max_depth: u32,
        max_pages: usize,
        user_agent: String,
    ) -> Self {
        Self {
            client,
            timeout,
            max_depth,
            max_pages,
            user_agent,
        }
    }

    /// Crawl outward from the homepage, collecting same-host page URLs.
    /// Every fetch goes through the politeness gate and robots filter.
    pub async fn crawl(
        &self,
        base_url: &str,
        robots: &RobotsTxt,
        politeness: &PolitenessGate,
    ) -> Vec<CrawledUrl> {
        let seed = format!("{}/", base_url.trim_end_matches('/'));
        let base_host = match PolitenessGate::host_of(&seed) {
            Some(host) => host,
            None => return Vec::new(),
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut found: Vec<CrawledUrl> = Vec::new();
        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();

        if let Some(normalized) = normalize_url(&seed) {
            visited.insert(normalized);
        }
        frontier.push_back((seed, 0));

        let mut pages_crawled = 0usize;

        while let Some((current_url, depth)) = frontier.pop_front() {
            if pages_crawled >= self.max_pages {
                break;
            }

            let path = Url::parse(&current_url)
                .map(|u| u.path().to_string())
                .unwrap_or_else(|_| "/".to_string());
            if !robots.is_allowed(&self.user_agent, &path).allowed {
                debug!("BFS skipping robots-disallowed {}", current_url);
                continue;
            }

            let html = match self.fetch_page(&current_url, politeness).await {
                Some(html) => html,
                None => continue,
            };
            pages_crawled += 1;
            found.push(CrawledUrl {
                url: current_url.clone(),
                depth,
            });

            if depth >= self.max_depth {
                continue;
            }

            for link in extract_links(&html, &current_url, &base_host) {
                let Some(normalized) = normalize_url(&link) else {
                    continue;
                };
                if skip_reason(&link).is_some() || !visited.insert(normalized) {
                    continue;
                }
                frontier.push_back((link, depth + 1));
            }
        }

        info!(
            "BFS crawl of {} finished: {} pages, frontier exhausted or bounded",
            base_host,
            found.len()
        );
        found
    }

    async fn fetch_page(&self, url: &str, politeness: &PolitenessGate) -> Option<String> {
        let _permit = match politeness.acquire(url).await {
            Ok(p) => p,
            Err(e) => {
                debug!("BFS politeness denied {}: {}", url, e);
                return None;
            }
        };

        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("BFS fetch {} returned {}", url, r.status());
                return None;
            }
            Err(e) => {
                debug!("BFS fetch failed for {}: {}", url, e);
                return None;
            }
        };

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html") || v.contains("application/xhtml"))
            .unwrap_or(true);
        if !is_html {
            return None;
        }

        response.text().await.ok()
    }
}

/// Extract same-host page links from anchor tags.
pub(crate) fn extract_links(html: &str, current_url: &str, base_host: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let current = match Url::parse(current_url) {
        Ok(u) => u,
        Err(_) => return Vec::new(),
    };

    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }

        let Ok(resolved) = current.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let same_host = resolved
            .host_str()
            .map(|h| h.eq_ignore_ascii_case(base_host))
            .unwrap_or(false);
        if !same_host {
            continue;
        }

        links.push(resolved.to_string());
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_resolves_and_filters() {
        let html = r##"
            <html><body>
                <a href="/about">About</a>
                <a href="blog/post-1">Post</a>
                <a href="https://example.com/contact">Contact</a>
                <a href="https://other.example/away">Away</a>
                <a href="mailto:hi@example.com">Mail</a>
                <a href="#section">Anchor</a>
                <a href="javascript:void(0)">JS</a>
            </body></html>
        "##;
        let links = extract_links(html, "https://example.com/", "example.com");
        assert_eq!(
            links,
            vec![
                "https://example.com/about",
                "https://example.com/blog/post-1",
                "https://example.com/contact",
            ]
        );
    }

    #[test]
    fn extract_links_ignores_other_hosts() {
        let html = r#"<a href="https://cdn.example.net/x">x</a>"#;
        assert!(extract_links(html, "https://example.com/", "example.com").is_empty());
    }
}
