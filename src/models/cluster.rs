//! Cluster models: template groups of structurally-similar pages.

use serde::{Deserialize, Serialize};

/// Role a page plays inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativeRole {
    /// Highest-ranked member (internal links, falling back to word count).
    Best,
    /// Median-ranked member.
    Typical,
    /// Lowest-ranked member.
    Worst,
    Member,
}

impl RepresentativeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Typical => "typical",
            Self::Worst => "worst",
            Self::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "best" => Some(Self::Best),
            "typical" => Some(Self::Typical),
            "worst" => Some(Self::Worst),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// A group of pages sharing one composite fingerprint.
///
/// The key is a pure function of the members' structural signals, so
/// rebuilding clusters over an unchanged page set is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Stable content-derived key: sha256 of
    /// `patternSignature|domFingerprint|profileKey`.
    pub key: String,
    pub scan_id: String,
    /// Display name from the first matching predicate.
    pub name: String,
    /// Pattern signature shared by the members, e.g. `example.com/blog/{slug}`.
    pub pattern: String,
    pub dom_fingerprint: String,
    pub profile_key: String,
    pub member_count: u32,
}

/// Join row mapping a page into a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterPage {
    pub cluster_key: String,
    pub scan_id: String,
    pub page_url: String,
    /// The page's exact URL signature (host + normalized path).
    pub url_signature: String,
    pub role: RepresentativeRole,
}
