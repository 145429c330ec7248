//! Profile bands: discretized word and heading counts.

use crate::config::ClusterSettings;
use crate::models::PageExtract;

/// A discretized bucket for a continuous metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Bucket a value against three ascending thresholds.
pub fn band_for(value: u32, thresholds: [u32; 3]) -> Band {
    if value < thresholds[0] {
        Band::Low
    } else if value < thresholds[1] {
        Band::Medium
    } else if value < thresholds[2] {
        Band::High
    } else {
        Band::VeryHigh
    }
}

/// Profile key: word band, heading band, and the binary FAQ band.
pub fn profile_key(extract: &PageExtract, settings: &ClusterSettings) -> String {
    let words = band_for(extract.word_count, settings.word_bands);
    let headings = band_for(extract.heading_count(), settings.heading_bands);
    let faq = if extract.has_faq { "faq" } else { "no_faq" };
    format!("{}:{}:{}", words.as_str(), headings.as_str(), faq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_word_bands() {
        let t = ClusterSettings::default().word_bands;
        assert_eq!(band_for(0, t), Band::Low);
        assert_eq!(band_for(299, t), Band::Low);
        assert_eq!(band_for(300, t), Band::Medium);
        assert_eq!(band_for(999, t), Band::Medium);
        assert_eq!(band_for(1000, t), Band::High);
        assert_eq!(band_for(2999, t), Band::High);
        assert_eq!(band_for(3000, t), Band::VeryHigh);
    }

    #[test]
    fn profile_key_concatenates_bands() {
        let settings = ClusterSettings::default();
        let extract = PageExtract {
            word_count: 1200,
            h1: vec!["a".into()],
            h2: vec!["b".into(), "c".into(), "d".into()],
            has_faq: true,
            ..Default::default()
        };
        assert_eq!(profile_key(&extract, &settings), "high:medium:faq");
    }
}
