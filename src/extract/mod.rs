//! HTML extraction: metadata, headings, JSON-LD, text metrics.
//!
//! Produces the typed `PageExtract` consumed by the render heuristic, the
//! cluster engine, and downstream scoring, plus the sanitized extract
//! handed to the LLM evaluation seam (structured fields only, never raw
//! HTML).

use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::models::PageExtract;

/// FAQ markers matched against heading text.
const FAQ_HEADING_MARKERS: &[&str] = &["faq", "frequently asked", "questions"];

/// Extract structured signals from a page's HTML.
pub fn extract_page(html: &str, page_url: &str) -> PageExtract {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title");
    let meta_description = select_attr(&document, r#"meta[name="description"]"#, "content");

    let h1 = select_all_text(&document, "h1");
    let h2 = select_all_text(&document, "h2");
    let h3 = select_all_text(&document, "h3");

    let (schema_types, schema_blocks, schema_invalid) = extract_schema_types(&document);

    let text = visible_text(&document);
    let visible_text_len = text.trim().chars().count() as u32;
    let word_count = text.split_whitespace().count() as u32;

    let (internal_links, external_links) = count_links(&document, page_url);

    let heading_faq = h1
        .iter()
        .chain(h2.iter())
        .chain(h3.iter())
        .any(|h| {
            let lower = h.to_lowercase();
            FAQ_HEADING_MARKERS.iter().any(|m| lower.contains(m))
        });
    let has_faq = heading_faq || schema_types.iter().any(|t| t == "FAQPage");

    PageExtract {
        title,
        meta_description,
        h1,
        h2,
        h3,
        schema_types,
        schema_blocks,
        schema_invalid,
        word_count,
        visible_text_len,
        internal_links,
        external_links,
        has_faq,
    }
}

/// Visible text of a document: all text nodes outside script/style/head.
pub(crate) fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    collect_text(document.tree.root(), &mut out);
    out
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Element(element) => {
            if matches!(
                element.name(),
                "script" | "style" | "noscript" | "template" | "head"
            ) {
                return;
            }
            for child in node.children() {
                collect_text(child, out);
            }
        }
        Node::Text(text) => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(trimmed);
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn select_first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_all_text(document: &Html, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse JSON-LD blocks, returning (sorted deduped @type values, blocks
/// seen, blocks that failed to parse). Malformed JSON degrades to an
/// empty contribution rather than failing the extraction.
fn extract_schema_types(document: &Html) -> (Vec<String>, u32, u32) {
    let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
        return (Vec::new(), 0, 0);
    };

    let mut types = Vec::new();
    let mut blocks = 0u32;
    let mut invalid = 0u32;

    for element in document.select(&selector) {
        blocks += 1;
        let raw: String = element.text().collect();
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(value) => collect_types(&value, &mut types),
            Err(_) => invalid += 1,
        }
    }

    types.sort();
    types.dedup();
    (types, blocks, invalid)
}

fn collect_types(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            match map.get("@type") {
                Some(serde_json::Value::String(t)) => out.push(t.clone()),
                Some(serde_json::Value::Array(items)) => {
                    for item in items {
                        if let serde_json::Value::String(t) = item {
                            out.push(t.clone());
                        }
                    }
                }
                _ => {}
            }
            if let Some(graph) = map.get("@graph") {
                collect_types(graph, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_types(item, out);
            }
        }
        _ => {}
    }
}

/// Count anchors pointing at the page's own host vs. elsewhere.
fn count_links(document: &Html, page_url: &str) -> (u32, u32) {
    let Ok(selector) = Selector::parse("a[href]") else {
        return (0, 0);
    };
    let Ok(base) = Url::parse(page_url) else {
        return (0, 0);
    };
    let own_host = base.host_str().unwrap_or_default().to_ascii_lowercase();

    let mut internal = 0u32;
    let mut external = 0u32;
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            continue;
        }
        let Ok(resolved) = base.join(href) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let same = resolved
            .host_str()
            .map(|h| h.eq_ignore_ascii_case(&own_host))
            .unwrap_or(false);
        if same {
            internal += 1;
        } else {
            external += 1;
        }
    }
    (internal, external)
}

/// The structured view handed to the LLM evaluation collaborator.
/// Explicitly never contains raw HTML or page text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedExtract {
    pub url: String,
    pub title: Option<String>,
    pub headings: Vec<String>,
    pub word_count: u32,
    pub schema_types: Vec<String>,
    pub schema_blocks: u32,
    pub schema_invalid: u32,
    pub has_faq: bool,
}

impl SanitizedExtract {
    pub fn from_extract(url: &str, extract: &PageExtract) -> Self {
        Self {
            url: url.to_string(),
            title: extract.title.clone(),
            headings: extract
                .h1
                .iter()
                .chain(extract.h2.iter())
                .cloned()
                .collect(),
            word_count: extract.word_count,
            schema_types: extract.schema_types.clone(),
            schema_blocks: extract.schema_blocks,
            schema_invalid: extract.schema_invalid,
            has_faq: extract.has_faq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html>
<head>
  <title>Plumbing Services | Acme</title>
  <meta name="description" content="Licensed plumbers, 24/7 call-out.">
  <script type="application/ld+json">
    {"@context":"https://schema.org","@type":"LocalBusiness","name":"Acme"}
  </script>
  <script type="application/ld+json">
    {"@graph":[{"@type":"FAQPage"},{"@type":["Service","Offer"]}]}
  </script>
  <script type="application/ld+json">not json at all</script>
</head>
<body>
  <h1>Plumbing Services</h1>
  <h2>Emergency call-out</h2>
  <h2>Frequently asked questions</h2>
  <h3>How fast can you arrive?</h3>
  <p>We cover the whole metro area with licensed plumbers.</p>
  <script>console.log("invisible")</script>
  <style>p { color: red }</style>
  <a href="/contact">Contact</a>
  <a href="/services/drains">Drains</a>
  <a href="https://maps.example.net/acme">Map</a>
</body>
</html>"#;

    #[test]
    fn extracts_metadata_and_headings() {
        let extract = extract_page(PAGE, "https://acme.example/services/plumbing");
        assert_eq!(extract.title.as_deref(), Some("Plumbing Services | Acme"));
        assert_eq!(
            extract.meta_description.as_deref(),
            Some("Licensed plumbers, 24/7 call-out.")
        );
        assert_eq!(extract.h1, vec!["Plumbing Services"]);
        assert_eq!(extract.h2.len(), 2);
        assert_eq!(extract.h3.len(), 1);
    }

    #[test]
    fn schema_types_are_sorted_and_deduped_with_invalid_count() {
        let extract = extract_page(PAGE, "https://acme.example/");
        assert_eq!(
            extract.schema_types,
            vec!["FAQPage", "LocalBusiness", "Offer", "Service"]
        );
        assert_eq!(extract.schema_blocks, 3);
        assert_eq!(extract.schema_invalid, 1);
    }

    #[test]
    fn script_and_style_text_is_invisible() {
        let extract = extract_page(PAGE, "https://acme.example/");
        assert!(extract.word_count > 0);
        let document = Html::parse_document(PAGE);
        let text = visible_text(&document);
        assert!(!text.contains("invisible"));
        assert!(!text.contains("color: red"));
        assert!(text.contains("licensed plumbers"));
    }

    #[test]
    fn links_split_internal_external() {
        let extract = extract_page(PAGE, "https://acme.example/services/plumbing");
        assert_eq!(extract.internal_links, 2);
        assert_eq!(extract.external_links, 1);
    }

    #[test]
    fn faq_detected_from_heading_and_schema() {
        let extract = extract_page(PAGE, "https://acme.example/");
        assert!(extract.has_faq);

        let plain = "<html><body><h1>Hi</h1><p>text</p></body></html>";
        let extract = extract_page(plain, "https://acme.example/");
        assert!(!extract.has_faq);
    }

    #[test]
    fn sanitized_extract_has_no_raw_content() {
        let extract = extract_page(PAGE, "https://acme.example/");
        let sanitized =
            SanitizedExtract::from_extract("https://acme.example/services/plumbing", &extract);
        let json = serde_json::to_string(&sanitized).unwrap();
        // Body copy never leaks into the sanitized view.
        assert!(!json.contains("whole metro area"));
        assert!(json.contains("Plumbing Services"));
        assert_eq!(sanitized.headings.len(), 3);
    }
}
