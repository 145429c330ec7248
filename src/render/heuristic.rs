//! Render-needed heuristic, evaluated before the expensive headless pass.

use scraper::{Html, Selector};

use crate::extract::visible_text;

/// Visible text below this always triggers a render.
const MIN_VISIBLE_TEXT: u32 = 500;
/// Script-heavy shell detection: at least this many script tags with
/// visible text still under the shell threshold.
const SPA_SCRIPT_COUNT: u32 = 10;
const SPA_SHELL_TEXT: u32 = 1000;
/// Bare-page rule: all key metadata absent and text under this.
const BARE_PAGE_TEXT: u32 = 200;

/// Markers that identify client-side app shells.
const APP_ROOT_MARKERS: &[&str] = &[
    "id=\"root\"",
    "id=\"app\"",
    "id=\"__next\"",
    "id=\"___gatsby\"",
    "data-reactroot",
    "data-v-app",
    "ng-version",
    "__next_data__",
    "window.__nuxt__",
];

/// Cheap signals read from raw HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSignals {
    pub visible_text_len: u32,
    pub script_count: u32,
    pub has_title: bool,
    pub has_meta_description: bool,
    pub has_headings: bool,
    pub has_json_ld: bool,
    pub has_app_root: bool,
}

impl RenderSignals {
    /// Read signals from raw HTML.
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let lower = html.to_ascii_lowercase();

        let text = visible_text(&document);
        let visible_text_len = text.chars().count() as u32;

        let count = |sel: &str| {
            Selector::parse(sel)
                .map(|s| document.select(&s).count() as u32)
                .unwrap_or(0)
        };
        let non_empty = |sel: &str| {
            Selector::parse(sel)
                .ok()
                .and_then(|s| document.select(&s).next())
                .map(|el| !el.text().collect::<String>().trim().is_empty())
                .unwrap_or(false)
        };

        let has_meta_description = Selector::parse(r#"meta[name="description"]"#)
            .ok()
            .and_then(|s| document.select(&s).next())
            .and_then(|el| el.value().attr("content"))
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);

        Self {
            visible_text_len,
            script_count: count("script"),
            has_title: non_empty("title"),
            has_meta_description,
            has_headings: count("h1") + count("h2") + count("h3") > 0,
            has_json_ld: count(r#"script[type="application/ld+json"]"#) > 0,
            has_app_root: APP_ROOT_MARKERS.iter().any(|m| lower.contains(m)),
        }
    }

    /// Key metadata fields missing: title, meta description, headings,
    /// JSON-LD.
    fn missing_metadata_fields(&self) -> u32 {
        [
            self.has_title,
            self.has_meta_description,
            self.has_headings,
            self.has_json_ld,
        ]
        .iter()
        .filter(|present| !**present)
        .count() as u32
    }
}

/// Decide whether the raw HTML is sufficient or the page needs a headless
/// render. Any one rule triggers.
pub fn render_needed(signals: &RenderSignals) -> bool {
    // Rule 1: hardly any visible text once scripts/styles are stripped.
    if signals.visible_text_len < MIN_VISIBLE_TEXT {
        return true;
    }

    // Rule 2: an app-shell signature co-occurring with missing metadata.
    let spa_shell = (signals.script_count >= SPA_SCRIPT_COUNT
        && signals.visible_text_len < SPA_SHELL_TEXT)
        || signals.has_app_root;
    if spa_shell && signals.missing_metadata_fields() >= 2 {
        return true;
    }

    // Rule 3: a bare page with no metadata at all.
    if !signals.has_title
        && !signals.has_meta_description
        && !signals.has_headings
        && signals.visible_text_len < BARE_PAGE_TEXT
    {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with_text(words: usize) -> String {
        let body = "content ".repeat(words);
        format!(
            "<html><head><title>T</title><meta name=\"description\" content=\"d\"></head>\
             <body><h1>H</h1><p>{}</p></body></html>",
            body
        )
    }

    #[test]
    fn rich_page_does_not_render() {
        // Scenario: ~600 visible characters plus title and description.
        let html = page_with_text(80);
        let signals = RenderSignals::from_html(&html);
        assert!(signals.visible_text_len >= 600);
        assert!(!render_needed(&signals));
    }

    #[test]
    fn thin_text_triggers_render() {
        let html = page_with_text(10);
        let signals = RenderSignals::from_html(&html);
        assert!(signals.visible_text_len < 500);
        assert!(render_needed(&signals));
    }

    #[test]
    fn app_shell_with_missing_metadata_triggers_render() {
        let body = "loading ".repeat(80);
        let html = format!(
            "<html><head><title>App</title></head>\
             <body><div id=\"root\"></div><p>{}</p>\
             <script src=\"/app.js\"></script></body></html>",
            body
        );
        let signals = RenderSignals::from_html(&html);
        assert!(signals.has_app_root);
        // Missing description, headings, JSON-LD: three missing fields.
        assert!(signals.missing_metadata_fields() >= 2);
        assert!(render_needed(&signals));
    }

    #[test]
    fn app_root_with_complete_metadata_does_not_render() {
        let body = "product detail ".repeat(60);
        let html = format!(
            "<html><head><title>Shop</title>\
             <meta name=\"description\" content=\"catalog\">\
             <script type=\"application/ld+json\">{{\"@type\":\"Product\"}}</script></head>\
             <body><div id=\"root\"><h1>Catalog</h1><p>{}</p></div></body></html>",
            body
        );
        let signals = RenderSignals::from_html(&html);
        assert!(signals.has_app_root);
        assert!(signals.missing_metadata_fields() < 2);
        assert!(!render_needed(&signals));
    }

    #[test]
    fn script_heavy_thin_shell_triggers_render() {
        let scripts = "<script>var x=1;</script>".repeat(12);
        let body = "teaser ".repeat(90);
        let html = format!(
            "<html><head></head><body><p>{}</p>{}</body></html>",
            body, scripts
        );
        let signals = RenderSignals::from_html(&html);
        assert!(signals.script_count >= 10);
        assert!(signals.visible_text_len < 1000);
        assert!(render_needed(&signals));
    }
}
