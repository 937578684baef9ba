use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use url::Url;

use crate::parser::schema::{DiscoveredFeed, DiscoveredFeedType};

static ALTERNATE_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"link[rel="alternate"]"#).expect("static selector is valid")
});

fn feed_type(mime: &str) -> Option<DiscoveredFeedType> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "application/rss+xml" => Some(DiscoveredFeedType::Rss),
        "application/atom+xml" => Some(DiscoveredFeedType::Atom),
        "application/feed+json" => Some(DiscoveredFeedType::Json),
        _ => None,
    }
}

/// Feeds the page already advertises. Must run on raw markup, the trimmer drops `<link>` noise.
pub fn detect_existing_feeds(html: &str, source_url: &str) -> Vec<DiscoveredFeed> {
    let document = Html::parse_document(html);
    let base = Url::parse(source_url).ok();

    document
        .select(&ALTERNATE_LINK)
        .filter_map(|link| {
            let element = link.value();
            let feed_type = feed_type(element.attr("type")?)?;
            let href = element.attr("href")?;
            let url = base.as_ref()?.join(href).ok()?;
            let title = element
                .attr("title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);

            Some(DiscoveredFeed {
                url: url.to_string(),
                title,
                feed_type,
            })
        })
        .collect()
}
