//! Page fetcher with manual redirect-chain tracking.
//!
//! The HTTP client never auto-follows redirects: each hop is recorded up
//! to a cap, and exceeding the cap is its own failure mode rather than a
//! generic error. Retryable statuses (429 and 5xx) re-run the whole
//! chain with exponential backoff. Crawl politeness is consulted before
//! every hop, including retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{redirect, Client};
use tracing::{debug, warn};
use url::Url;

use crate::config::FetchSettings;
use crate::politeness::PolitenessGate;

/// Reason a fetch ended without a usable response.
pub const REASON_TOO_MANY_REDIRECTS: &str = "too many redirects";

/// One hop of a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectHop {
    pub url: String,
    pub status: u16,
    pub location: Option<String>,
}

/// Outcome of fetching one URL, success or not. Evidence capture needs
/// the chain and headers either way, so failures are data, not errors.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub success: bool,
    pub url: String,
    /// URL of the last response in the chain.
    pub final_url: String,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub content_type: Option<String>,
    /// Response headers of the final hop.
    pub headers: HashMap<String, String>,
    /// Every hop taken, bounded at the redirect cap.
    pub chain: Vec<RedirectHop>,
    pub load_time_ms: u64,
    pub attempts: u32,
    /// Failure reason when `success` is false.
    pub error: Option<String>,
}

impl FetchResult {
    fn failure(url: &str, reason: String, chain: Vec<RedirectHop>, elapsed: Duration) -> Self {
        Self {
            success: false,
            url: url.to_string(),
            final_url: chain
                .last()
                .map(|h| h.url.clone())
                .unwrap_or_else(|| url.to_string()),
            status: chain.last().map(|h| h.status),
            body: None,
            content_type: None,
            headers: HashMap::new(),
            chain,
            load_time_ms: elapsed.as_millis() as u64,
            attempts: 1,
            error: Some(reason),
        }
    }

    /// Whether the final status calls for a retry of the whole chain:
    /// 429 or any 5xx.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, Some(status) if status == 429 || (500..600).contains(&status))
    }

    /// Render the chain for evidence, one hop per line.
    pub fn chain_summary(&self) -> String {
        self.chain
            .iter()
            .map(|hop| match &hop.location {
                Some(loc) => format!("{} {} -> {}", hop.status, hop.url, loc),
                None => format!("{} {}", hop.status, hop.url),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the final-hop headers for evidence.
    pub fn headers_summary(&self) -> String {
        let mut keys: Vec<_> = self.headers.keys().collect();
        keys.sort();
        keys.iter()
            .map(|k| format!("{}: {}", k, self.headers[k.as_str()]))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// HTTP fetcher shared by all fetch workers.
pub struct Fetcher {
    client: Client,
    politeness: Arc<PolitenessGate>,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(user_agent: &str, settings: FetchSettings, politeness: Arc<PolitenessGate>) -> Self {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(redirect::Policy::none())
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            politeness,
            settings,
        }
    }

    /// Fetch a URL, retrying retryable statuses with exponential backoff.
    /// Each retry re-runs the entire redirect chain.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let max_attempts = self.settings.retry_attempts.max(1);

        let mut attempt = 1;
        loop {
            let mut result = self.fetch_chain(url).await;
            result.attempts = attempt;

            if result.is_retryable() && attempt < max_attempts {
                let delay = Duration::from_millis(
                    self.settings.retry_base_ms * 2u64.saturating_pow(attempt - 1),
                );
                debug!(
                    "Retryable status {:?} for {} (attempt {}/{}), backing off {:?}",
                    result.status, url, attempt, max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return result;
        }
    }

    /// Follow one redirect chain manually, recording every hop.
    async fn fetch_chain(&self, url: &str) -> FetchResult {
        let start = Instant::now();
        let mut chain: Vec<RedirectHop> = Vec::new();
        let mut current = url.to_string();

        loop {
            if chain.len() >= self.settings.max_redirects {
                warn!("Redirect cap hit for {} after {} hops", url, chain.len());
                return FetchResult::failure(
                    url,
                    REASON_TOO_MANY_REDIRECTS.to_string(),
                    chain,
                    start.elapsed(),
                );
            }

            // Politeness gates every hop, not just the first request.
            let _permit = match self.politeness.acquire(&current).await {
                Ok(permit) => permit,
                Err(e) => {
                    // Covers the slot-wait timeout: the fetch is abandoned,
                    // not retried immediately.
                    return FetchResult::failure(url, e.to_string(), chain, start.elapsed());
                }
            };

            let response = match self.client.get(&current).send().await {
                Ok(r) => r,
                Err(e) => {
                    return FetchResult::failure(url, e.to_string(), chain, start.elapsed());
                }
            };

            let status = response.status();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            if status.is_redirection() {
                let Some(location) = location else {
                    // A 3xx without Location terminates the chain here.
                    return self
                        .finish(url, response, chain, start.elapsed())
                        .await;
                };
                let next = resolve_location(&current, &location);
                chain.push(RedirectHop {
                    url: current.clone(),
                    status: status.as_u16(),
                    location: Some(next.clone()),
                });
                debug!("Redirect {} -> {}", current, next);
                current = next;
                continue;
            }

            return self.finish(url, response, chain, start.elapsed()).await;
        }
    }

    async fn finish(
        &self,
        url: &str,
        response: reqwest::Response,
        mut chain: Vec<RedirectHop>,
        elapsed: Duration,
    ) -> FetchResult {
        let status = response.status();
        let final_url = response.url().to_string();
        chain.push(RedirectHop {
            url: final_url.clone(),
            status: status.as_u16(),
            location: None,
        });

        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        let content_type = headers.get("content-type").cloned();

        let body = if status.is_success() {
            response.text().await.ok()
        } else {
            None
        };

        FetchResult {
            success: status.is_success() && body.is_some(),
            url: url.to_string(),
            final_url,
            status: Some(status.as_u16()),
            body,
            content_type,
            headers,
            chain,
            load_time_ms: elapsed.as_millis() as u64,
            attempts: 1,
            error: if status.is_success() {
                None
            } else {
                Some(format!("HTTP {}", status.as_u16()))
            },
        }
    }
}

/// Resolve a Location header value against the current URL.
fn resolve_location(current: &str, location: &str) -> String {
    match Url::parse(current).and_then(|base| base.join(location)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => location.to_string(),
    }
}

/// Whether a status code is retryable: 429 or [500, 600).
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses_are_429_and_5xx() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(is_retryable_status(599));
        assert!(!is_retryable_status(200));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(301));
        assert!(!is_retryable_status(600));
    }

    #[test]
    fn resolve_location_handles_relative_paths() {
        assert_eq!(
            resolve_location("https://example.com/a/b", "/c"),
            "https://example.com/c"
        );
        assert_eq!(
            resolve_location("https://example.com/a/", "next"),
            "https://example.com/a/next"
        );
        assert_eq!(
            resolve_location("https://example.com/", "https://other.example/x"),
            "https://other.example/x"
        );
    }

    #[test]
    fn failure_result_carries_bounded_chain() {
        let chain: Vec<RedirectHop> = (0..10)
            .map(|i| RedirectHop {
                url: format!("https://example.com/{}", i),
                status: 301,
                location: Some(format!("https://example.com/{}", i + 1)),
            })
            .collect();
        let result = FetchResult::failure(
            "https://example.com/0",
            REASON_TOO_MANY_REDIRECTS.to_string(),
            chain,
            Duration::from_millis(5),
        );
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(REASON_TOO_MANY_REDIRECTS));
        assert_eq!(result.chain.len(), 10);
        assert_eq!(result.final_url, "https://example.com/9");
    }

    #[test]
    fn chain_summary_lists_hops() {
        let result = FetchResult::failure(
            "https://example.com/a",
            "HTTP 404".to_string(),
            vec![
                RedirectHop {
                    url: "https://example.com/a".to_string(),
                    status: 301,
                    location: Some("https://example.com/b".to_string()),
                },
                RedirectHop {
                    url: "https://example.com/b".to_string(),
                    status: 404,
                    location: None,
                },
            ],
            Duration::from_millis(12),
        );
        let summary = result.chain_summary();
        assert!(summary.contains("301 https://example.com/a -> https://example.com/b"));
        assert!(summary.contains("404 https://example.com/b"));
    }
}
