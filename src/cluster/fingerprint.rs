//! Coarse DOM fingerprints from heading structure and schema types.

use crate::models::PageExtract;

/// Inferred main tag pattern, checked in order.
pub fn main_tag_pattern(h1: usize, h2: usize, h3: usize) -> &'static str {
    if h1 == 1 && h2 >= 1 {
        "article"
    } else if h1 == 1 && h2 == 0 && h3 == 0 {
        "landing"
    } else if h1 > 1 {
        "multi-h1"
    } else if h2 >= 4 && h3 >= 1 {
        "structured"
    } else {
        "default"
    }
}

/// Composite DOM fingerprint:
/// `mainTagPattern|h1count:h2count:h3count|sortedSchemaTypes`.
pub fn dom_fingerprint(extract: &PageExtract) -> String {
    let h1 = extract.h1.len();
    let h2 = extract.h2.len();
    let h3 = extract.h3.len();

    // schema_types is already sorted and deduplicated by extraction.
    format!(
        "{}|{}:{}:{}|{}",
        main_tag_pattern(h1, h2, h3),
        h1,
        h2,
        h3,
        extract.schema_types.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_pattern_rules_in_order() {
        assert_eq!(main_tag_pattern(1, 3, 2), "article");
        assert_eq!(main_tag_pattern(1, 0, 0), "landing");
        assert_eq!(main_tag_pattern(3, 0, 0), "multi-h1");
        assert_eq!(main_tag_pattern(0, 5, 2), "structured");
        assert_eq!(main_tag_pattern(0, 2, 0), "default");
        // One H1 with only H3s is neither article nor landing.
        assert_eq!(main_tag_pattern(1, 0, 2), "default");
    }

    #[test]
    fn fingerprint_combines_all_three_signals() {
        let extract = PageExtract {
            h1: vec!["a".into()],
            h2: vec!["b".into(), "c".into()],
            h3: vec![],
            schema_types: vec!["Article".into(), "WebPage".into()],
            ..Default::default()
        };
        assert_eq!(dom_fingerprint(&extract), "article|1:2:0|Article,WebPage");
    }

    #[test]
    fn same_structure_same_fingerprint() {
        let a = PageExtract {
            h1: vec!["First post".into()],
            h2: vec!["Intro".into(), "Body".into()],
            schema_types: vec!["BlogPosting".into()],
            word_count: 900,
            ..Default::default()
        };
        let b = PageExtract {
            h1: vec!["Second post".into()],
            h2: vec!["Setup".into(), "Details".into()],
            schema_types: vec!["BlogPosting".into()],
            word_count: 1800,
            ..Default::default()
        };
        // Different content, identical structure.
        assert_eq!(dom_fingerprint(&a), dom_fingerprint(&b));
    }
}
