//! Admission control: hard per-scan budget ceilings.
//!
//! Every expensive operation asks here first. Page and render admissions
//! are boolean; token consumption is clamped to the remaining budget so a
//! partially-affordable call still makes progress. If the counter store is
//! unreachable, page/render admission fails open and the caller records a
//! low-confidence signal.

use std::sync::Arc;

use tracing::warn;

use crate::config::BudgetSettings;
use crate::models::BudgetResource;
use crate::repository::ScanRepository;

/// Marker appended to every truncated text.
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Conservative characters-per-token heuristic.
const CHARS_PER_TOKEN: usize = 4;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Granted because the counter store was unreachable (fail-open);
    /// treat as a low-confidence signal in evidence.
    GrantedDegraded,
    Denied,
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted | Self::GrantedDegraded)
    }
}

/// Token grant for one LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenGrant {
    /// Tokens actually granted, possibly fewer than requested.
    pub granted: u64,
    pub clamped: bool,
}

/// Per-scan budget tracker over the shared scan store.
pub struct BudgetTracker {
    scans: Arc<ScanRepository>,
    settings: BudgetSettings,
}

impl BudgetTracker {
    pub fn new(scans: Arc<ScanRepository>, settings: BudgetSettings) -> Self {
        Self { scans, settings }
    }

    fn ceiling(&self, resource: BudgetResource) -> u64 {
        match resource {
            BudgetResource::PagesFetched => self.settings.max_pages,
            BudgetResource::PagesRendered => self.settings.max_renders,
            BudgetResource::LlmCalls => self.settings.max_llm_calls,
            BudgetResource::Tokens => self.settings.max_tokens_per_call,
        }
    }

    /// Check-and-increment before an expensive operation. On denial the
    /// scan's limit-hit flag is set, steering it toward
    /// `completed_with_limits` instead of `failed`.
    pub fn try_consume(&self, scan_id: &str, resource: BudgetResource, amount: u64) -> Admission {
        let ceiling = self.ceiling(resource);
        match self.scans.increment_within(scan_id, resource, amount, ceiling) {
            Ok(true) => Admission::Granted,
            Ok(false) => {
                let _ = self.scans.set_limit_hit(scan_id, resource);
                Admission::Denied
            }
            Err(e) => {
                warn!(
                    "Budget store unreachable for {} ({}): {}",
                    scan_id,
                    resource.as_str(),
                    e
                );
                match resource {
                    // Fail open for pages and renders; the scan keeps
                    // partial progress and evidence records the doubt.
                    BudgetResource::PagesFetched | BudgetResource::PagesRendered => {
                        Admission::GrantedDegraded
                    }
                    BudgetResource::LlmCalls | BudgetResource::Tokens => Admission::Denied,
                }
            }
        }
    }

    /// Consume tokens for one call, clamped rather than rejected: first to
    /// the per-call ceiling, then to what remains of the scan-wide token
    /// budget (per-call ceiling times the LLM-call ceiling).
    pub fn consume_tokens(&self, scan_id: &str, requested: u64) -> TokenGrant {
        let per_call = requested.min(self.settings.max_tokens_per_call);
        let scan_ceiling = self
            .settings
            .max_tokens_per_call
            .saturating_mul(self.settings.max_llm_calls.max(1));
        match self.scans.add_tokens_clamped(scan_id, per_call, scan_ceiling) {
            Ok(granted) => {
                let clamped = granted < requested;
                if clamped {
                    let _ = self
                        .scans
                        .set_limit_hit(scan_id, BudgetResource::Tokens);
                }
                TokenGrant { granted, clamped }
            }
            Err(e) => {
                warn!("Token store unreachable for {}: {}", scan_id, e);
                TokenGrant {
                    granted: 0,
                    clamped: true,
                }
            }
        }
    }

    /// Remaining-budget view for external collaborators (the LLM caller).
    pub fn remaining(&self, scan_id: &str) -> Option<RemainingBudget> {
        let scan = self.scans.get(scan_id).ok().flatten()?;
        Some(RemainingBudget {
            pages: self.settings.max_pages.saturating_sub(scan.pages_fetched),
            renders: self.settings.max_renders.saturating_sub(scan.pages_rendered),
            llm_calls: self.settings.max_llm_calls.saturating_sub(scan.llm_calls),
            tokens_per_call: self.settings.max_tokens_per_call,
        })
    }
}

/// Snapshot of what a scan may still spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingBudget {
    pub pages: u64,
    pub renders: u64,
    pub llm_calls: u64,
    pub tokens_per_call: u64,
}

/// Truncate `text` to the character-equivalent of `max_tokens`, breaking
/// at the nearest preceding whitespace when that loses less than 10% of
/// the target, and appending the truncation marker. The result, marker
/// included, never exceeds `max_tokens * 4` characters.
pub fn truncate_for_tokens(text: &str, max_tokens: u64) -> (String, bool) {
    let cap = max_tokens as usize * CHARS_PER_TOKEN;
    if text.len() <= cap {
        return (text.to_string(), false);
    }
    if cap <= TRUNCATION_MARKER.len() {
        return (TRUNCATION_MARKER[..cap].to_string(), true);
    }

    let target = cap - TRUNCATION_MARKER.len();
    let mut end = target;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }

    // Prefer a whitespace break if one sits within 90% of the target.
    if let Some(ws) = text[..end].rfind(char::is_whitespace) {
        if ws >= target * 9 / 10 {
            end = ws;
        }
    }

    let mut out = text[..end].to_string();
    out.push_str(TRUNCATION_MARKER);
    (out, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scan;
    use tempfile::TempDir;

    fn tracker(settings: BudgetSettings) -> (BudgetTracker, Arc<ScanRepository>, Scan, TempDir) {
        let dir = TempDir::new().unwrap();
        let scans = Arc::new(ScanRepository::new(&dir.path().join("aeoscan.db")).unwrap());
        let scan = Scan::new("example.com".to_string());
        scans.create(&scan).unwrap();
        let tracker = BudgetTracker::new(scans.clone(), settings);
        (tracker, scans, scan, dir)
    }

    #[test]
    fn denies_past_page_ceiling_and_flags_the_scan() {
        let (tracker, scans, scan, _dir) = tracker(BudgetSettings {
            max_pages: 10,
            ..Default::default()
        });

        // Scenario: 15 URLs discovered against a ceiling of 10.
        let admitted = (0..15)
            .filter(|_| {
                tracker
                    .try_consume(&scan.id, BudgetResource::PagesFetched, 1)
                    .is_granted()
            })
            .count();
        assert_eq!(admitted, 10);

        let loaded = scans.get(&scan.id).unwrap().unwrap();
        assert!(loaded.limits_hit.pages);
        assert_eq!(loaded.pages_fetched, 10);
    }

    #[test]
    fn token_clamp_grants_partial_budget() {
        let (tracker, _scans, scan, _dir) = tracker(BudgetSettings {
            max_tokens_per_call: 100,
            ..Default::default()
        });

        let grant = tracker.consume_tokens(&scan.id, 250);
        assert_eq!(grant.granted, 100);
        assert!(grant.clamped);

        let grant = tracker.consume_tokens(&scan.id, 50);
        assert_eq!(grant.granted, 50);
        assert!(!grant.clamped);
    }

    #[test]
    fn truncation_respects_cap_and_marker() {
        // 25 tokens -> 100 chars including the marker.
        let text = "word ".repeat(100);
        let (out, truncated) = truncate_for_tokens(&text, 25);
        assert!(truncated);
        assert!(out.len() <= 100);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_prefers_whitespace_break() {
        let text = format!("{} {}", "a".repeat(80), "b".repeat(300));
        let (out, _) = truncate_for_tokens(&text, 25);
        // The whitespace at index 80 sits within 90% of the 88-char
        // target, so the cut lands there instead of mid-run.
        let body = out.trim_end_matches(TRUNCATION_MARKER);
        assert_eq!(body, "a".repeat(80));
    }

    #[test]
    fn short_text_is_untouched() {
        let (out, truncated) = truncate_for_tokens("short", 25);
        assert_eq!(out, "short");
        assert!(!truncated);
    }
}
