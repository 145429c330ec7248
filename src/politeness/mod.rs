//! Crawl politeness: per-host concurrency slots, inter-request delay,
//! and robots.txt compliance.
//!
//! Every outbound fetch acquires a host permit first. The permit bounds
//! in-flight requests per hostname and enforces the minimum spacing
//! between consecutive requests, derived from robots `Crawl-delay` when
//! one was declared.

mod robots;
mod skip;

pub use robots::{fetch_robots, RobotsOrigin, RobotsTxt, RobotsVerdict};
pub use skip::skip_reason;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::debug;
use url::Url;

use crate::config::PolitenessSettings;

/// Errors raised by the politeness gate.
#[derive(Debug, Error)]
pub enum PolitenessError {
    /// No host slot freed up within the wait timeout. Retryable-transient;
    /// the caller abandons this attempt rather than retrying immediately.
    #[error("timed out waiting for a request slot on {host}")]
    SlotTimeout { host: String },

    #[error("URL has no host: {0}")]
    InvalidUrl(String),
}

/// Timing state for one host.
struct HostTiming {
    last_request: Option<Instant>,
    delay: Duration,
}

/// Slots and timing for one host.
struct HostState {
    slots: Arc<Semaphore>,
    timing: Mutex<HostTiming>,
}

/// Held for the duration of one request; releases the host slot on drop.
pub struct HostPermit {
    _permit: OwnedSemaphorePermit,
    pub host: String,
}

/// Per-host politeness gate shared by all workers.
pub struct PolitenessGate {
    config: PolitenessSettings,
    hosts: RwLock<HashMap<String, Arc<HostState>>>,
}

impl PolitenessGate {
    pub fn new(config: PolitenessSettings) -> Self {
        Self {
            config,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Extract the hostname from a URL.
    pub fn host_of(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
    }

    async fn state_for(&self, host: &str) -> Arc<HostState> {
        if let Some(state) = self.hosts.read().await.get(host) {
            return state.clone();
        }
        let mut hosts = self.hosts.write().await;
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostState {
                    slots: Arc::new(Semaphore::new(self.config.per_host_concurrency.max(1))),
                    timing: Mutex::new(HostTiming {
                        last_request: None,
                        delay: Duration::from_millis(self.config.default_delay_ms),
                    }),
                })
            })
            .clone()
    }

    /// Override a host's inter-request delay (robots `Crawl-delay`).
    pub async fn set_crawl_delay(&self, host: &str, delay: Duration) {
        let state = self.state_for(host).await;
        let mut timing = state.timing.lock().await;
        timing.delay = delay;
        debug!("Crawl delay for {} set to {:?}", host, delay);
    }

    /// Acquire a request slot for a URL's host, waiting out both the slot
    /// and the inter-request delay. The permit must be held for the whole
    /// request.
    pub async fn acquire(&self, url: &str) -> Result<HostPermit, PolitenessError> {
        let host = Self::host_of(url)
            .ok_or_else(|| PolitenessError::InvalidUrl(url.to_string()))?;
        let state = self.state_for(&host).await;

        let permit = tokio::time::timeout(
            Duration::from_secs(self.config.slot_timeout_secs),
            state.slots.clone().acquire_owned(),
        )
        .await
        .map_err(|_| PolitenessError::SlotTimeout { host: host.clone() })?
        .expect("host semaphore closed");

        // Enforce minimum spacing, then stamp the request start while
        // still holding the timing lock so concurrent holders serialize.
        loop {
            let wait = {
                let mut timing = state.timing.lock().await;
                let wait = match timing.last_request {
                    Some(last) => {
                        let elapsed = last.elapsed();
                        if elapsed >= timing.delay {
                            Duration::ZERO
                        } else {
                            timing.delay - elapsed
                        }
                    }
                    None => Duration::ZERO,
                };
                if wait == Duration::ZERO {
                    timing.last_request = Some(Instant::now());
                }
                wait
            };

            if wait == Duration::ZERO {
                break;
            }
            debug!("Politeness delay for {}: {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }

        Ok(HostPermit {
            _permit: permit,
            host,
        })
    }
}
