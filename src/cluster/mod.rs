//! Cluster engine: groups structurally-similar pages by composite
//! fingerprint.
//!
//! No semantic analysis; only cheap structural signals. The cluster key
//! is a pure function of the members' signals, so rebuilding over an
//! unchanged page set yields identical clusters, names, and
//! representative assignments.

mod bands;
mod fingerprint;
mod signature;

pub use bands::{band_for, profile_key, Band};
pub use fingerprint::{dom_fingerprint, main_tag_pattern};
pub use signature::{
    classify_segment, cluster_name, derive_predicates, pattern_signature, url_signature,
    PagePredicates,
};

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::ClusterSettings;
use crate::models::{Cluster, ClusterPage, Page, RepresentativeRole};

/// Stable content-derived cluster key.
pub fn cluster_key(pattern: &str, fingerprint: &str, profile: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pattern.as_bytes());
    hasher.update(b"|");
    hasher.update(fingerprint.as_bytes());
    hasher.update(b"|");
    hasher.update(profile.as_bytes());
    hex::encode(hasher.finalize())
}

/// Groups extracted pages into template clusters.
pub struct ClusterEngine {
    settings: ClusterSettings,
}

struct Member<'a> {
    page: &'a Page,
    signature: String,
}

impl ClusterEngine {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    /// Build clusters over a scan's extracted pages. Pages without an
    /// extract are ignored; the caller passes pages in discovery order,
    /// which anchors every tie-break.
    pub fn build(&self, scan_id: &str, pages: &[Page]) -> (Vec<Cluster>, Vec<ClusterPage>) {
        // BTreeMap keyed by cluster key keeps output ordering stable.
        let mut groups: BTreeMap<String, (String, String, String, Vec<Member>)> = BTreeMap::new();

        for page in pages {
            let Some(extract) = &page.extract else {
                continue;
            };
            let grouping_url = page.final_url.as_deref().unwrap_or(&page.url);
            let Some(pattern) = pattern_signature(grouping_url) else {
                continue;
            };
            let Some(signature) = url_signature(grouping_url) else {
                continue;
            };

            let fp = dom_fingerprint(extract);
            let profile = profile_key(extract, &self.settings);
            let key = cluster_key(&pattern, &fp, &profile);

            groups
                .entry(key)
                .or_insert_with(|| (pattern, fp, profile, Vec::new()))
                .3
                .push(Member { page, signature });
        }

        let mut clusters = Vec::new();
        let mut mappings = Vec::new();

        for (key, (pattern, fp, profile, mut members)) in groups {
            // Rank by internal links, falling back to word count; the
            // stable sort keeps discovery order for exact ties.
            members.sort_by(|a, b| {
                let score =
                    |m: &Member| -> (u32, u32) {
                        let e = m.page.extract.as_ref().expect("members carry extracts");
                        (e.internal_links, e.word_count)
                    };
                score(b).cmp(&score(a))
            });

            let count = members.len();
            let best = 0;
            let worst = count - 1;
            let typical = count / 2;

            // Name from the highest-priority predicate of the top member.
            let top = &members[best];
            let predicates = derive_predicates(
                top.page.final_url.as_deref().unwrap_or(&top.page.url),
                top.page.extract.as_ref().expect("members carry extracts"),
            );
            let name = cluster_name(&predicates, &pattern);

            for (idx, member) in members.iter().enumerate() {
                let role = if idx == best {
                    RepresentativeRole::Best
                } else if idx == worst {
                    RepresentativeRole::Worst
                } else if idx == typical {
                    RepresentativeRole::Typical
                } else {
                    RepresentativeRole::Member
                };
                mappings.push(ClusterPage {
                    cluster_key: key.clone(),
                    scan_id: scan_id.to_string(),
                    page_url: member.page.url.clone(),
                    url_signature: member.signature.clone(),
                    role,
                });
            }

            clusters.push(Cluster {
                key,
                scan_id: scan_id.to_string(),
                name,
                pattern,
                dom_fingerprint: fp,
                profile_key: profile,
                member_count: count as u32,
            });
        }

        info!(
            "Clustered {} pages into {} clusters for scan {}",
            mappings.len(),
            clusters.len(),
            scan_id
        );
        (clusters, mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiscoveryMethod, PageExtract, PageLifecycle};

    fn page(url: &str, order: u32, extract: PageExtract) -> Page {
        let mut page = Page::new(
            "scan-1".to_string(),
            url.to_string(),
            DiscoveryMethod::Sitemap,
            0,
            order,
        );
        page.advance_lifecycle(PageLifecycle::Fetched);
        page.advance_lifecycle(PageLifecycle::Extracted);
        page.extract = Some(extract);
        page
    }

    fn blog_extract(words: u32, links: u32) -> PageExtract {
        PageExtract {
            title: Some("Post".to_string()),
            h1: vec!["Post".to_string()],
            h2: vec!["Section".to_string()],
            schema_types: vec!["BlogPosting".to_string()],
            word_count: words,
            internal_links: links,
            ..Default::default()
        }
    }

    fn sample_pages() -> Vec<Page> {
        vec![
            page("https://example.com/blog/alpha", 0, blog_extract(800, 4)),
            page("https://example.com/blog/beta", 1, blog_extract(700, 9)),
            page("https://example.com/blog/gamma", 2, blog_extract(600, 1)),
            page(
                "https://example.com/",
                3,
                PageExtract {
                    title: Some("Home".to_string()),
                    h1: vec!["Welcome".to_string()],
                    word_count: 450,
                    internal_links: 20,
                    ..Default::default()
                },
            ),
        ]
    }

    #[test]
    fn groups_by_template_and_names_clusters() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        let pages = sample_pages();
        let (clusters, mappings) = engine.build("scan-1", &pages);

        assert_eq!(clusters.len(), 2);
        let blog = clusters.iter().find(|c| c.member_count == 3).unwrap();
        assert_eq!(blog.name, "Blog posts");
        assert_eq!(blog.pattern, "example.com/{slug}/{slug}");

        let home = clusters.iter().find(|c| c.member_count == 1).unwrap();
        assert_eq!(home.name, "Homepage");

        assert_eq!(mappings.len(), 4);
    }

    #[test]
    fn representatives_rank_by_internal_links() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        let pages = sample_pages();
        let (clusters, mappings) = engine.build("scan-1", &pages);

        let blog_key = &clusters.iter().find(|c| c.member_count == 3).unwrap().key;
        let role_of = |url: &str| {
            mappings
                .iter()
                .find(|m| &m.cluster_key == blog_key && m.page_url == url)
                .map(|m| m.role)
                .unwrap()
        };

        // beta has 9 internal links, alpha 4, gamma 1.
        assert_eq!(role_of("https://example.com/blog/beta"), RepresentativeRole::Best);
        assert_eq!(
            role_of("https://example.com/blog/alpha"),
            RepresentativeRole::Typical
        );
        assert_eq!(
            role_of("https://example.com/blog/gamma"),
            RepresentativeRole::Worst
        );
    }

    #[test]
    fn single_member_cluster_is_its_own_best() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        let pages = vec![page(
            "https://example.com/about",
            0,
            PageExtract {
                h1: vec!["About".to_string()],
                word_count: 900,
                ..Default::default()
            },
        )];
        let (clusters, mappings) = engine.build("scan-1", &pages);
        assert_eq!(clusters.len(), 1);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].role, RepresentativeRole::Best);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        let pages = sample_pages();

        let (clusters_a, mappings_a) = engine.build("scan-1", &pages);
        let (clusters_b, mappings_b) = engine.build("scan-1", &pages);

        let keys_a: Vec<_> = clusters_a.iter().map(|c| (&c.key, &c.name)).collect();
        let keys_b: Vec<_> = clusters_b.iter().map(|c| (&c.key, &c.name)).collect();
        assert_eq!(keys_a, keys_b);

        let roles_a: Vec<_> = mappings_a
            .iter()
            .map(|m| (&m.page_url, m.role, &m.url_signature))
            .collect();
        let roles_b: Vec<_> = mappings_b
            .iter()
            .map(|m| (&m.page_url, m.role, &m.url_signature))
            .collect();
        assert_eq!(roles_a, roles_b);
    }

    #[test]
    fn ties_resolve_by_discovery_order() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        // Identical scores: stable sort keeps discovery order.
        let pages = vec![
            page("https://example.com/blog/one", 0, blog_extract(500, 2)),
            page("https://example.com/blog/two", 1, blog_extract(500, 2)),
        ];
        let (_, mappings) = engine.build("scan-1", &pages);
        let first = mappings
            .iter()
            .find(|m| m.page_url.ends_with("one"))
            .unwrap();
        assert_eq!(first.role, RepresentativeRole::Best);
    }

    #[test]
    fn word_count_breaks_zero_link_ties() {
        let engine = ClusterEngine::new(ClusterSettings::default());
        let pages = vec![
            page("https://example.com/blog/small", 0, blog_extract(400, 0)),
            page("https://example.com/blog/large", 1, blog_extract(900, 0)),
        ];
        let (_, mappings) = engine.build("scan-1", &pages);
        let large = mappings
            .iter()
            .find(|m| m.page_url.ends_with("large"))
            .unwrap();
        assert_eq!(large.role, RepresentativeRole::Best);
    }
}
