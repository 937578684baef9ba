pub mod change_detector;

use chrono::{DateTime, Utc};
use url::Url;

use crate::parser::preview;
use crate::parser::schema::{ChangeDetectionResult, FeedItem, SnapshotRecord};

pub use crate::parser::schema::SnapshotConfig;
pub use change_detector::{extract_content_text, hash_content, normalize_text, ChangeDetector};

/// Character cap of snapshot item descriptions.
pub const DESCRIPTION_PREVIEW_CHARS: usize = 500;

impl SnapshotConfig {
    /// Monitoring config for `page_url`, titled after the host when no title is given.
    pub fn for_page(page_url: &str, content_selector: &str, suggested_title: Option<&str>) -> Self {
        let feed_title = suggested_title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match Url::parse(page_url).ok().and_then(|u| u.host_str().map(str::to_string)) {
                Some(host) => format!("Changes to {}", host),
                None => "Page Changes".to_string(),
            });
        Self {
            content_selector: content_selector.to_string(),
            feed_title,
        }
    }
}

/// Feed item announcing the first snapshot of a page.
pub fn initial_item(record: &SnapshotRecord, page_url: &str) -> FeedItem {
    FeedItem {
        title: format!("Initial snapshot \u{2014} {}", short_date(&record.captured_at)),
        link: page_url.to_string(),
        description: Some(preview(&record.normalized_text, DESCRIPTION_PREVIEW_CHARS))
            .filter(|d| !d.is_empty()),
        pub_date: Some(record.captured_at.to_rfc3339()),
        author: None,
        category: None,
        image: None,
    }
}

/// Feed item for a detected change, or `None` when nothing changed.
pub fn update_item(
    result: &ChangeDetectionResult,
    page_url: &str,
    observed_at: DateTime<Utc>,
) -> Option<FeedItem> {
    if !result.changed {
        return None;
    }
    let description = result
        .summary
        .as_deref()
        .map(|s| preview(s, DESCRIPTION_PREVIEW_CHARS));
    Some(FeedItem {
        title: format!("Update \u{2014} {}", short_date(&observed_at)),
        link: page_url.to_string(),
        description,
        pub_date: Some(observed_at.to_rfc3339()),
        author: None,
        category: None,
        image: None,
    })
}

fn short_date(at: &DateTime<Utc>) -> String {
    at.format("%b %-d, %Y").to_string()
}
