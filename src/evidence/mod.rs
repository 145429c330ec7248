//! Evidence capture: redaction plus mode-dependent storage.
//!
//! Evidence writes are best-effort by contract: recording returns a
//! `Result` and callers deliberately discard the error, because an audit
//! snippet must never fail the pipeline.

mod redact;

pub use redact::{redact, RedactionCounts};

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::config::{EvidenceMode, EvidenceSettings};
use crate::models::{Confidence, Evidence, EvidenceContent, EvidenceKind};
use crate::repository::{EvidenceRepository, RepositoryError};

/// Records decision evidence for pages, applying redaction and the
/// configured retention mode.
pub struct EvidenceRecorder {
    repo: Arc<EvidenceRepository>,
    settings: EvidenceSettings,
}

impl EvidenceRecorder {
    pub fn new(repo: Arc<EvidenceRepository>, settings: EvidenceSettings) -> Self {
        Self { repo, settings }
    }

    /// Redact and store one evidence row.
    pub fn record(
        &self,
        scan_id: &str,
        page_url: &str,
        kind: EvidenceKind,
        success: bool,
        confidence: Confidence,
        content: &str,
    ) -> Result<(), RepositoryError> {
        let (redacted, redactions) = redact(content);

        let content = match self.settings.mode {
            EvidenceMode::Full => EvidenceContent::Full {
                excerpt: truncate_chars(&redacted, self.settings.excerpt_cap),
            },
            EvidenceMode::ExtractOnly => {
                let mut hasher = Sha256::new();
                hasher.update(redacted.as_bytes());
                EvidenceContent::ExtractOnly {
                    sha256: hex::encode(hasher.finalize()),
                    length: redacted.len() as u32,
                }
            }
        };

        let evidence = Evidence {
            scan_id: scan_id.to_string(),
            page_url: page_url.to_string(),
            kind,
            success,
            confidence,
            content,
            redactions,
            created_at: Utc::now(),
        };

        self.repo.insert(&evidence)
    }
}

/// Truncate to at most `cap` bytes on a UTF-8 boundary.
fn truncate_chars(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
