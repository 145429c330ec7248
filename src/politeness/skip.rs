//! URL skip patterns, applied before any network call.
//!
//! These are independent of robots.txt and take precedence over it:
//! admin/api paths and asset files are never worth a fetch slot.

/// Path prefixes/fragments that mark non-content URLs.
const SKIP_PATH_PATTERNS: &[&str] = &[
    "/admin",
    "/wp-admin",
    "/wp-json",
    "/api/",
    "/cgi-bin",
    "/login",
    "/logout",
    "/signin",
    "/signup",
    "/cart",
    "/checkout",
    "/account",
    "/xmlrpc.php",
];

/// Asset extensions with no auditable page content.
const SKIP_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".mjs", ".json", ".xml", ".txt", ".png", ".jpg", ".jpeg", ".gif", ".svg",
    ".webp", ".avif", ".ico", ".woff", ".woff2", ".ttf", ".otf", ".eot", ".mp3", ".mp4", ".webm",
    ".avi", ".mov", ".pdf", ".zip", ".gz", ".tar", ".doc", ".docx", ".xls", ".xlsx", ".ppt",
    ".pptx",
];

/// Check whether a URL should be skipped, returning the matched pattern.
pub fn skip_reason(url: &str) -> Option<&'static str> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };

    for pattern in SKIP_PATH_PATTERNS {
        if path.contains(pattern) {
            return Some(pattern);
        }
    }
    for ext in SKIP_EXTENSIONS {
        if path.ends_with(ext) {
            return Some(ext);
        }
    }
    None
}
