//! Scan model: the root unit of work.
//!
//! A scan owns every page, evidence row, and cluster produced during one
//! run. Budget counters live here and only ever grow within a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    CompletedWithLimits,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithLimits => "completed_with_limits",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "completed_with_limits" => Some(Self::CompletedWithLimits),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states admit no further work.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CompletedWithLimits | Self::Failed
        )
    }
}

/// Budgeted resources, one counter + ceiling + limit flag each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetResource {
    PagesFetched,
    PagesRendered,
    LlmCalls,
    Tokens,
}

impl BudgetResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PagesFetched => "pages",
            Self::PagesRendered => "renders",
            Self::LlmCalls => "llm_calls",
            Self::Tokens => "tokens",
        }
    }
}

/// Which budget ceilings were hit during the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsHit {
    pub pages: bool,
    pub renders: bool,
    pub llm_calls: bool,
    pub tokens: bool,
}

impl LimitsHit {
    pub fn any(&self) -> bool {
        self.pages || self.renders || self.llm_calls || self.tokens
    }
}

/// A single scan of a target domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Target domain, e.g. "example.com".
    pub domain: String,
    pub status: ScanStatus,

    // Budget counters, monotonically non-decreasing within a run.
    pub pages_fetched: u64,
    pub pages_rendered: u64,
    pub llm_calls: u64,
    pub tokens_used: u64,

    pub limits_hit: LimitsHit,

    /// Error text retained when the scan fails.
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Scan {
    /// Create a new pending scan for a domain.
    pub fn new(domain: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain,
            status: ScanStatus::Pending,
            pages_fetched: 0,
            pages_rendered: 0,
            llm_calls: 0,
            tokens_used: 0,
            limits_hit: LimitsHit::default(),
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// The terminal status a finished scan should reach given its flags.
    pub fn terminal_status(&self) -> ScanStatus {
        if self.limits_hit.any() {
            ScanStatus::CompletedWithLimits
        } else {
            ScanStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::CompletedWithLimits,
            ScanStatus::Failed,
        ] {
            assert_eq!(ScanStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn terminal_status_reflects_limit_flags() {
        let mut scan = Scan::new("example.com".to_string());
        assert_eq!(scan.terminal_status(), ScanStatus::Completed);

        scan.limits_hit.pages = true;
        assert_eq!(scan.terminal_status(), ScanStatus::CompletedWithLimits);
    }
}
