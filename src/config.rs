//! Scan configuration: defaults, TOML file, environment overrides.
//!
//! Settings resolve in three layers: compiled defaults, then an optional
//! `aeoscan.toml`, then `AEOSCAN_*` environment variables. Every tunable
//! the pipeline consults lives here so workers receive one immutable
//! settings value instead of reading the environment ad hoc.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User agent sent on every request, including the robots.txt fetch.
pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; aeoscan/0.3; +https://aeoscan.dev/bot)";

/// How evidence content is retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    /// Store a redacted, length-capped excerpt.
    #[default]
    Full,
    /// Store only a content hash, length, and redaction counts.
    ExtractOnly,
}

impl EvidenceMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(Self::Full),
            "extract_only" | "extract-only" => Some(Self::ExtractOnly),
            _ => None,
        }
    }
}

/// Discovery stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Hard cap on URLs admitted to a scan.
    pub max_urls: usize,
    /// Sitemap index recursion ceiling.
    pub sitemap_depth: usize,
    /// Fewer recovered URLs than this triggers the BFS fallback.
    pub sitemap_min_urls: usize,
    /// Per-sitemap fetch timeout.
    pub sitemap_timeout_secs: u64,
    /// robots.txt fetch timeout.
    pub robots_timeout_secs: u64,
    /// BFS fallback depth bound.
    pub crawl_max_depth: u32,
    /// BFS fallback page bound.
    pub crawl_max_pages: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_urls: 500,
            sitemap_depth: 5,
            sitemap_min_urls: 10,
            sitemap_timeout_secs: 15,
            robots_timeout_secs: 5,
            crawl_max_depth: 2,
            crawl_max_pages: 200,
        }
    }
}

/// Fetch stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Redirect-chain hop ceiling.
    pub max_redirects: usize,
    /// Retry ceiling for retryable statuses (429/5xx).
    pub retry_attempts: u32,
    /// Exponential backoff base.
    pub retry_base_ms: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 10,
            retry_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

/// Render fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Whether the headless renderer may be used at all.
    pub enabled: bool,
    /// Hard navigation timeout.
    pub timeout_secs: u64,
    /// Extra settle delay after load, milliseconds.
    pub settle_delay_ms: u64,
    /// Fixed viewport width.
    pub viewport_width: u32,
    /// Fixed viewport height.
    pub viewport_height: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 15,
            settle_delay_ms: 500,
            viewport_width: 1366,
            viewport_height: 900,
        }
    }
}

/// Crawl politeness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolitenessSettings {
    /// In-flight request ceiling per hostname.
    pub per_host_concurrency: usize,
    /// Minimum spacing between requests to one host when robots.txt
    /// declares no Crawl-delay.
    pub default_delay_ms: u64,
    /// How long a requester waits for a free host slot.
    pub slot_timeout_secs: u64,
}

impl Default for PolitenessSettings {
    fn default() -> Self {
        Self {
            per_host_concurrency: 2,
            default_delay_ms: 500,
            slot_timeout_secs: 10,
        }
    }
}

/// Per-scan budget ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    pub max_pages: u64,
    pub max_renders: u64,
    pub max_llm_calls: u64,
    /// Token ceiling per LLM call; consumption is clamped, not rejected.
    pub max_tokens_per_call: u64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_renders: 20,
            max_llm_calls: 30,
            max_tokens_per_call: 4000,
        }
    }
}

/// Profile-band thresholds for the cluster engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Word-count band edges: low/medium, medium/high, high/very_high.
    pub word_bands: [u32; 3],
    /// Heading-count band edges.
    pub heading_bands: [u32; 3],
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            word_bands: [300, 1000, 3000],
            heading_bands: [3, 8, 15],
        }
    }
}

/// Evidence retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceSettings {
    pub mode: EvidenceMode,
    /// Excerpt cap in `full` mode, characters.
    pub excerpt_cap: usize,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            mode: EvidenceMode::Full,
            excerpt_cap: 2000,
        }
    }
}

/// Worker-pool concurrency per stage group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub fetch_concurrency: usize,
    pub discovery_concurrency: usize,
    /// Low by design: headless rendering is memory/CPU heavy.
    pub render_concurrency: usize,
    /// Singleton stages (cluster build, check runner) operate scan-wide.
    pub singleton_concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: 20,
            discovery_concurrency: 4,
            render_concurrency: 2,
            singleton_concurrency: 1,
        }
    }
}

/// Optional per-stage retry overrides, keyed by stage name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    /// "fixed" or "exponential".
    pub backoff: Option<String>,
    pub base_ms: Option<u64>,
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Directory holding aeoscan.db.
    pub data_dir: PathBuf,
    pub user_agent: String,
    pub discovery: DiscoverySettings,
    pub fetch: FetchSettings,
    pub render: RenderSettings,
    pub politeness: PolitenessSettings,
    pub budget: BudgetSettings,
    pub cluster: ClusterSettings,
    pub evidence: EvidenceSettings,
    pub workers: WorkerSettings,
    /// Stage-name keyed retry overrides (e.g. `[retry.fetch]`).
    pub retry: std::collections::HashMap<String, RetryOverride>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            user_agent: USER_AGENT.to_string(),
            discovery: DiscoverySettings::default(),
            fetch: FetchSettings::default(),
            render: RenderSettings::default(),
            politeness: PolitenessSettings::default(),
            budget: BudgetSettings::default(),
            cluster: ClusterSettings::default(),
            evidence: EvidenceSettings::default(),
            workers: WorkerSettings::default(),
            retry: std::collections::HashMap::new(),
        }
    }
}

impl ScanSettings {
    /// Load settings: defaults, then an optional TOML file, then env vars.
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new("aeoscan.toml");
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env();
        Ok(settings)
    }

    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings = toml::from_str(&raw)?;
        Ok(settings)
    }

    /// Apply `AEOSCAN_*` environment overrides for the recognized options.
    fn apply_env(&mut self) {
        fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Some(v) = std::env::var("AEOSCAN_DATA_DIR").ok() {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_URLS") {
            self.discovery.max_urls = v;
        }
        if let Some(v) = env_parse("AEOSCAN_CRAWL_MAX_DEPTH") {
            self.discovery.crawl_max_depth = v;
        }
        if let Some(v) = env_parse("AEOSCAN_CRAWL_MAX_PAGES") {
            self.discovery.crawl_max_pages = v;
        }
        if let Some(v) = env_parse("AEOSCAN_FETCH_TIMEOUT_SECS") {
            self.fetch.timeout_secs = v;
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_REDIRECTS") {
            self.fetch.max_redirects = v;
        }
        if let Some(v) = env_parse("AEOSCAN_RENDER_TIMEOUT_SECS") {
            self.render.timeout_secs = v;
        }
        if let Some(v) = env_parse("AEOSCAN_RENDER_ENABLED") {
            self.render.enabled = v;
        }
        if let Some(v) = env_parse("AEOSCAN_PER_HOST_CONCURRENCY") {
            self.politeness.per_host_concurrency = v;
        }
        if let Some(v) = env_parse("AEOSCAN_CRAWL_DELAY_MS") {
            self.politeness.default_delay_ms = v;
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_PAGES") {
            self.budget.max_pages = v;
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_RENDERS") {
            self.budget.max_renders = v;
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_LLM_CALLS") {
            self.budget.max_llm_calls = v;
        }
        if let Some(v) = env_parse("AEOSCAN_MAX_TOKENS_PER_CALL") {
            self.budget.max_tokens_per_call = v;
        }
        if let Some(v) = std::env::var("AEOSCAN_EVIDENCE_MODE").ok() {
            if let Some(mode) = EvidenceMode::from_str(&v) {
                self.evidence.mode = mode;
            }
        }
    }

    /// Path of the SQLite store.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("aeoscan.db")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render.timeout_secs)
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_secs(self.politeness.slot_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = ScanSettings::default();
        assert_eq!(s.fetch.max_redirects, 10);
        assert_eq!(s.discovery.sitemap_depth, 5);
        assert_eq!(s.discovery.crawl_max_depth, 2);
        assert_eq!(s.discovery.crawl_max_pages, 200);
        assert_eq!(s.render.timeout_secs, 15);
        assert_eq!(s.politeness.slot_timeout_secs, 10);
        assert_eq!(s.cluster.word_bands, [300, 1000, 3000]);
        assert_eq!(s.cluster.heading_bands, [3, 8, 15]);
    }

    #[test]
    fn toml_round_trip() {
        let s = ScanSettings::default();
        let raw = toml::to_string(&s).unwrap();
        let parsed: ScanSettings = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.budget.max_pages, s.budget.max_pages);
        assert_eq!(parsed.evidence.mode, EvidenceMode::Full);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let parsed: ScanSettings = toml::from_str(
            r#"
            [budget]
            max_pages = 10
        "#,
        )
        .unwrap();
        assert_eq!(parsed.budget.max_pages, 10);
        assert_eq!(parsed.budget.max_renders, 20);
        assert_eq!(parsed.fetch.timeout_secs, 30);
    }

    #[test]
    fn evidence_mode_parses_both_spellings() {
        assert_eq!(
            EvidenceMode::from_str("extract-only"),
            Some(EvidenceMode::ExtractOnly)
        );
        assert_eq!(
            EvidenceMode::from_str("extract_only"),
            Some(EvidenceMode::ExtractOnly)
        );
        assert_eq!(EvidenceMode::from_str("full"), Some(EvidenceMode::Full));
        assert_eq!(EvidenceMode::from_str("bogus"), None);
    }
}
