//! Evidence model: immutable, redacted snippets explaining decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evidence::RedactionCounts;

/// What kind of decision an evidence row documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    RobotsVerdict,
    FetchHeaders,
    RedirectChain,
    RenderOutcome,
    DiscoveryOutcome,
    BudgetDegraded,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RobotsVerdict => "robots_verdict",
            Self::FetchHeaders => "fetch_headers",
            Self::RedirectChain => "redirect_chain",
            Self::RenderOutcome => "render_outcome",
            Self::DiscoveryOutcome => "discovery_outcome",
            Self::BudgetDegraded => "budget_degraded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "robots_verdict" => Some(Self::RobotsVerdict),
            "fetch_headers" => Some(Self::FetchHeaders),
            "redirect_chain" => Some(Self::RedirectChain),
            "render_outcome" => Some(Self::RenderOutcome),
            "discovery_outcome" => Some(Self::DiscoveryOutcome),
            "budget_degraded" => Some(Self::BudgetDegraded),
            _ => None,
        }
    }
}

/// Confidence attached to a recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// An explicit rule or observed response backs the decision.
    High,
    /// No policy was found; the default applied.
    Medium,
    /// A fetch/parse error forced a default.
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Mode-dependent stored content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EvidenceContent {
    /// Redacted, length-capped excerpt.
    Full { excerpt: String },
    /// Hash-only retention; the excerpt itself is never stored.
    ExtractOnly { sha256: String, length: u32 },
}

/// One write-once audit snippet, owned by a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub scan_id: String,
    pub page_url: String,
    pub kind: EvidenceKind,
    pub success: bool,
    pub confidence: Confidence,
    pub content: EvidenceContent,
    pub redactions: RedactionCounts,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [
            EvidenceKind::RobotsVerdict,
            EvidenceKind::FetchHeaders,
            EvidenceKind::RedirectChain,
            EvidenceKind::RenderOutcome,
            EvidenceKind::DiscoveryOutcome,
            EvidenceKind::BudgetDegraded,
        ] {
            assert_eq!(EvidenceKind::from_str(kind.as_str()), Some(kind));
        }
    }
}
