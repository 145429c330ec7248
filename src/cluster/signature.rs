//! URL signatures, pattern classification, and page predicates.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::models::PageExtract;

/// Exact URL signature: lowercase host with `www.` stripped, plus the
/// normalized path (collapsed slashes, no trailing slash, empty segments
/// dropped). The homepage signature is the bare host.
pub fn url_signature(url: &str) -> Option<String> {
    let (host, segments) = host_and_segments(url)?;
    if segments.is_empty() {
        Some(host)
    } else {
        Some(format!("{}/{}", host, segments.join("/")))
    }
}

/// Pattern signature: same shape, with each segment replaced by its
/// class. Pages sharing a template share this.
pub fn pattern_signature(url: &str) -> Option<String> {
    let (host, segments) = host_and_segments(url)?;
    if segments.is_empty() {
        return Some(host);
    }
    let classified: Vec<&str> = segments.iter().map(|s| classify_segment(s)).collect();
    Some(format!("{}/{}", host, classified.join("/")))
}

/// Normalized path segments of a URL.
pub fn path_segments(url: &str) -> Vec<String> {
    host_and_segments(url).map(|(_, s)| s).unwrap_or_default()
}

fn host_and_segments(url: &str) -> Option<(String, Vec<String>)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed
        .host_str()?
        .to_ascii_lowercase()
        .trim_start_matches("www.")
        .to_string();
    let segments: Vec<String> = parsed
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect();
    Some((host, segments))
}

fn uuid_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
        )
        .unwrap()
    })
}

/// Classify one path segment into its template class.
pub fn classify_segment(segment: &str) -> &'static str {
    if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
        "{id}"
    } else if uuid_pattern().is_match(segment) {
        "{uuid}"
    } else {
        // Alphanumeric/hyphen slugs and everything else fold together.
        "{slug}"
    }
}

/// Boolean predicates derived from the normalized path, structured-data
/// hints, and heading text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagePredicates {
    pub homepage: bool,
    pub service: bool,
    pub location: bool,
    pub blog: bool,
    pub policy: bool,
    pub has_faq: bool,
}

const SERVICE_KEYWORDS: &[&str] = &["service", "services", "solutions", "offerings", "what-we-do"];
const LOCATION_KEYWORDS: &[&str] = &[
    "location",
    "locations",
    "areas",
    "service-areas",
    "branches",
    "cities",
    "near-me",
];
const BLOG_KEYWORDS: &[&str] = &["blog", "news", "articles", "insights", "posts", "resources"];
const POLICY_KEYWORDS: &[&str] = &[
    "privacy",
    "terms",
    "policy",
    "policies",
    "legal",
    "cookies",
    "disclaimer",
    "accessibility",
];

/// Derive predicates for one page.
pub fn derive_predicates(url: &str, extract: &PageExtract) -> PagePredicates {
    let segments = path_segments(url);
    let has = |keywords: &[&str]| segments.iter().any(|s| keywords.contains(&s.as_str()));
    let schema = |name: &str| extract.schema_types.iter().any(|t| t == name);

    PagePredicates {
        homepage: segments.is_empty(),
        service: has(SERVICE_KEYWORDS) || schema("Service"),
        location: has(LOCATION_KEYWORDS) || schema("LocalBusiness"),
        blog: has(BLOG_KEYWORDS)
            || schema("Article")
            || schema("BlogPosting")
            || schema("NewsArticle"),
        policy: has(POLICY_KEYWORDS),
        has_faq: extract.has_faq,
    }
}

/// Cluster display name from the first matching predicate, in priority
/// order; falls back to the URL pattern.
pub fn cluster_name(predicates: &PagePredicates, pattern: &str) -> String {
    if predicates.homepage {
        "Homepage".to_string()
    } else if predicates.service {
        "Service pages".to_string()
    } else if predicates.location {
        "Location pages".to_string()
    } else if predicates.blog {
        "Blog posts".to_string()
    } else if predicates.policy {
        "Policy pages".to_string()
    } else {
        match pattern.split_once('/') {
            Some((_, path)) => format!("/{}", path),
            None => pattern.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_normalizes_host_and_path() {
        assert_eq!(
            url_signature("https://WWW.Example.com//Blog//my-post/"),
            Some("example.com/blog/my-post".to_string())
        );
        assert_eq!(
            url_signature("https://example.com/"),
            Some("example.com".to_string())
        );
    }

    #[test]
    fn segment_classification() {
        assert_eq!(classify_segment("12345"), "{id}");
        assert_eq!(
            classify_segment("550e8400-e29b-41d4-a716-446655440000"),
            "{uuid}"
        );
        assert_eq!(classify_segment("my-blog-post"), "{slug}");
        assert_eq!(classify_segment("mixed_99%"), "{slug}");
    }

    #[test]
    fn pattern_signature_groups_templates() {
        let a = pattern_signature("https://example.com/blog/first-post").unwrap();
        let b = pattern_signature("https://www.example.com/blog/second-post").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "example.com/{slug}/{slug}");

        let c = pattern_signature("https://example.com/order/98765").unwrap();
        assert_eq!(c, "example.com/{slug}/{id}");
    }

    #[test]
    fn predicates_from_path_keywords() {
        let extract = PageExtract::default();
        let p = derive_predicates("https://example.com/services/plumbing", &extract);
        assert!(p.service);
        assert!(!p.blog);

        let p = derive_predicates("https://example.com/privacy", &extract);
        assert!(p.policy);

        let p = derive_predicates("https://example.com/", &extract);
        assert!(p.homepage);
    }

    #[test]
    fn predicates_from_schema_hints() {
        let extract = PageExtract {
            schema_types: vec!["BlogPosting".to_string()],
            ..Default::default()
        };
        let p = derive_predicates("https://example.com/2024/my-title", &extract);
        assert!(p.blog);

        let extract = PageExtract {
            schema_types: vec!["LocalBusiness".to_string()],
            ..Default::default()
        };
        let p = derive_predicates("https://example.com/denver", &extract);
        assert!(p.location);
    }

    #[test]
    fn name_follows_priority_order() {
        let pattern = "example.com/{slug}";
        let mut p = PagePredicates {
            homepage: true,
            service: true,
            blog: true,
            ..Default::default()
        };
        assert_eq!(cluster_name(&p, pattern), "Homepage");

        p.homepage = false;
        assert_eq!(cluster_name(&p, pattern), "Service pages");

        p.service = false;
        assert_eq!(cluster_name(&p, pattern), "Blog posts");

        let fallback = PagePredicates::default();
        assert_eq!(cluster_name(&fallback, pattern), "/{slug}");
    }
}
