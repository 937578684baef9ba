use url::Url;

use crate::error::{ForgeError, Result};

/// Resolve `href` against `base`; values that do not resolve pass through unchanged.
pub fn resolve_url(href: &str, base: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Canonical form of a page URL used to dedupe feeds.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ForgeError::Input(format!(
            "Only HTTP and HTTPS URLs are supported, got {}",
            url.scheme()
        )));
    }

    // Url::parse lowercases scheme and host and drops default ports.
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let mut normalized = url.to_string();
    if url.path() != "/" && normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}
