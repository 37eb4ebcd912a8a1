//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Hosting endpoints take the API key as a query parameter and uploads
//! live under per-job directories, so neither URLs nor paths go into spans
//! unredacted.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks userinfo and drops the query string and fragment of a URL.
///
/// - `https://api.imgbb.com/1/upload?key=abc` → `https://api.imgbb.com/1/upload`
/// - `https://user:pw@models.local/v1` → `https://****@models.local/v1`
pub fn redact_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);

    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &without_query[..scheme_end + 3];
            return format!("{}****@{}", scheme, &after_scheme[at_pos + 1..]);
        }
    }

    without_query.to_string()
}
