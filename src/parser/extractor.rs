use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::parser::schema::{
    ExtractedFeed, ExtractionConfig, ExtractionMode, FeedItem, FeedValue, FieldSelector,
};
use crate::parser::urls::resolve_url;
use crate::selector::parse_selector;

pub const DEFAULT_FEED_TITLE: &str = "Atom Feed";

/// Result of replaying a config, with the raw item match count kept for diagnostics.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub feed: ExtractedFeed,
    /// Elements matched by `itemSelector`, before dropping items without title/link.
    pub matched: usize,
}

/// A field selector with its CSS compiled once per extraction.
struct CompiledField<'a> {
    field: &'a FieldSelector,
    selector: Option<Selector>,
}

impl<'a> CompiledField<'a> {
    fn compile(path: &str, field: &'a FieldSelector) -> Result<Self> {
        let selector = if field.selector.is_empty() {
            None
        } else {
            Some(
                parse_selector(&field.selector)
                    .map_err(|e| ForgeError::Input(format!("{} is not valid CSS: {}", path, e)))?,
            )
        };
        Ok(Self { field, selector })
    }

    fn read(&self, context: ElementRef<'_>) -> Option<String> {
        let target = match &self.selector {
            Some(selector) => context.select(selector).next()?,
            None => context,
        };
        read_value(target, self.field)
    }

    /// Feed-level read: the selector runs from the document node, so `html` itself can match.
    fn read_document(&self, document: &Html) -> Option<String> {
        let target = match &self.selector {
            Some(selector) => document.select(selector).next()?,
            None => document.root_element(),
        };
        read_value(target, self.field)
    }
}

/// Read a value from `target` according to the field's extraction mode, trimmed.
/// Empty results count as missing.
pub fn read_value(target: ElementRef<'_>, field: &FieldSelector) -> Option<String> {
    let value = match field.mode() {
        ExtractionMode::Attribute(name) => target.value().attr(name)?.trim().to_string(),
        ExtractionMode::Markup => target.inner_html().trim().to_string(),
        ExtractionMode::Text => target.text().collect::<String>().trim().to_string(),
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Apply an accepted config to markup. Pure: same inputs give the same feed.
pub fn extract(markup: &str, config: &ExtractionConfig, source_url: &str) -> Result<ExtractedFeed> {
    extract_with_report(markup, config, source_url).map(|report| report.feed)
}

pub fn extract_with_report(
    markup: &str,
    config: &ExtractionConfig,
    source_url: &str,
) -> Result<ExtractionReport> {
    let item_selector = parse_selector(&config.item_selector)
        .map_err(|e| ForgeError::Input(format!("itemSelector is not valid CSS: {}", e)))?;

    let title = CompiledField::compile("fields.title", &config.fields.title)?;
    let link = CompiledField::compile("fields.link", &config.fields.link)?;
    let optional = OptionalFields {
        description: compile_optional("fields.description", config.fields.description.as_ref())?,
        pub_date: compile_optional("fields.pubDate", config.fields.pub_date.as_ref())?,
        author: compile_optional("fields.author", config.fields.author.as_ref())?,
        category: compile_optional("fields.category", config.fields.category.as_ref())?,
        image: compile_optional("fields.image", config.fields.image.as_ref())?,
    };

    let document = Html::parse_document(markup);

    let feed_title = resolve_feed_value(&document, Some(&config.feed.title), DEFAULT_FEED_TITLE)?;
    let feed_description = resolve_feed_value(&document, config.feed.description.as_ref(), "")?;
    let feed_link = resolve_feed_value(&document, config.feed.link.as_ref(), source_url)?;

    let mut items = Vec::new();
    let mut matched = 0;

    for element in document.select(&item_selector) {
        matched += 1;

        // Items missing a required field are dropped silently.
        let (Some(item_title), Some(item_link)) = (title.read(element), link.read(element)) else {
            continue;
        };

        items.push(FeedItem {
            title: item_title,
            link: resolve_url(&item_link, source_url),
            description: optional.description.as_ref().and_then(|f| f.read(element)),
            pub_date: optional.pub_date.as_ref().and_then(|f| f.read(element)),
            author: optional.author.as_ref().and_then(|f| f.read(element)),
            category: optional.category.as_ref().and_then(|f| f.read(element)),
            image: optional
                .image
                .as_ref()
                .and_then(|f| f.read(element))
                .map(|src| resolve_url(&src, source_url)),
        });
    }

    debug!(
        matched,
        extracted = items.len(),
        item_selector = %config.item_selector,
        "Extracted feed items"
    );

    Ok(ExtractionReport {
        feed: ExtractedFeed {
            title: feed_title,
            description: feed_description,
            link: feed_link,
            items,
        },
        matched,
    })
}

struct OptionalFields<'a> {
    description: Option<CompiledField<'a>>,
    pub_date: Option<CompiledField<'a>>,
    author: Option<CompiledField<'a>>,
    category: Option<CompiledField<'a>>,
    image: Option<CompiledField<'a>>,
}

fn compile_optional<'a>(path: &str, field: Option<&'a FieldSelector>) -> Result<Option<CompiledField<'a>>> {
    field.map(|f| CompiledField::compile(path, f)).transpose()
}

fn resolve_feed_value(document: &Html, value: Option<&FeedValue>, fallback: &str) -> Result<String> {
    match value {
        None => Ok(fallback.to_string()),
        Some(FeedValue::Literal(text)) => Ok(text.clone()),
        Some(FeedValue::Field(field)) => {
            let compiled = CompiledField::compile("feed", field)?;
            Ok(compiled.read_document(document).unwrap_or_else(|| fallback.to_string()))
        }
    }
}

/// Count of elements matched by `item_selector` in `markup`; invalid CSS counts as zero.
pub fn count_matches(markup: &str, item_selector: &str) -> usize {
    match parse_selector(item_selector) {
        Ok(selector) => Html::parse_document(markup).select(&selector).count(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::schema::{FeedMeta, ItemFields};

    const LISTING_HTML: &str = r#"
    <html>
      <head><title>Example News</title></head>
      <body>
        <h1 class="site-title">  Example News  </h1>
        <div class="item">
          <h2> First post </h2>
          <a href="/posts/1">Read</a>
          <time datetime="2024-01-02">Jan 2</time>
          <img src="/img/1.png">
          <p class="summary">Summary <b>one</b></p>
        </div>
        <div class="item">
          <h2>Second post</h2>
          <a href="https://other.org/2">Read</a>
          <p class="summary">   </p>
        </div>
        <div class="item">
          <h2>No link here</h2>
        </div>
      </body>
    </html>
    "#;

    fn scenario_config() -> ExtractionConfig {
        ExtractionConfig {
            feed: FeedMeta {
                title: FeedValue::Literal("Example".to_string()),
                description: None,
                link: None,
            },
            item_selector: ".item".to_string(),
            fields: ItemFields::new(FieldSelector::text("h2"), FieldSelector::attr("a", "href")),
        }
    }

    #[test]
    fn test_extracts_items_with_required_fields() {
        let feed = extract(LISTING_HTML, &scenario_config(), "https://example.com/news").unwrap();

        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].title, "First post");
        assert_eq!(feed.items[0].link, "https://example.com/posts/1");
        assert_eq!(feed.items[1].link, "https://other.org/2");
        assert!(feed.items.iter().all(|item| item.is_valid()));
    }

    #[test]
    fn test_drops_items_missing_required_fields() {
        let report =
            extract_with_report(LISTING_HTML, &scenario_config(), "https://example.com/").unwrap();
        assert_eq!(report.matched, 3);
        assert_eq!(report.feed.items.len(), 2);
        assert!(report.feed.items.iter().all(|i| i.title != "No link here"));
    }

    #[test]
    fn test_optional_fields_omitted_when_empty() {
        let mut config = scenario_config();
        config.fields.description = Some(FieldSelector::text(".summary"));
        config.fields.pub_date = Some(FieldSelector::attr("time", "datetime"));
        config.fields.image = Some(FieldSelector::attr("img", "src"));

        let feed = extract(LISTING_HTML, &config, "https://example.com/").unwrap();

        assert_eq!(feed.items[0].description.as_deref(), Some("Summary one"));
        assert_eq!(feed.items[0].pub_date.as_deref(), Some("2024-01-02"));
        assert_eq!(feed.items[0].image.as_deref(), Some("https://example.com/img/1.png"));
        assert_eq!(feed.items[1].description, None);
        assert_eq!(feed.items[1].pub_date, None);
        assert_eq!(feed.items[1].author, None);

        let json = serde_json::to_value(&feed.items[1]).unwrap();
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_markup_mode_reads_inner_html() {
        let mut config = scenario_config();
        config.fields.description = Some(FieldSelector::inner_html(".summary"));
        let feed = extract(LISTING_HTML, &config, "https://example.com/").unwrap();
        assert_eq!(feed.items[0].description.as_deref(), Some("Summary <b>one</b>"));
    }

    #[test]
    fn test_empty_selector_uses_item_element() {
        let html = r#"<ul><li><a class="entry" href="/a">Alpha</a></li><li><a class="entry" href="/b">Beta</a></li></ul>"#;
        let config = ExtractionConfig {
            feed: FeedMeta {
                title: FeedValue::Literal("Links".to_string()),
                description: None,
                link: None,
            },
            item_selector: "a.entry".to_string(),
            fields: ItemFields::new(FieldSelector::text(""), FieldSelector::attr("", "href")),
        };

        let feed = extract(html, &config, "https://example.com/").unwrap();
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[1].title, "Beta");
        assert_eq!(feed.items[1].link, "https://example.com/b");
    }

    #[test]
    fn test_feed_level_values_and_fallbacks() {
        let mut config = scenario_config();
        config.feed.title = FeedValue::Field(FieldSelector::text("h1.site-title"));
        config.feed.description = Some(FeedValue::Field(FieldSelector::text(".missing")));
        let feed = extract(LISTING_HTML, &config, "https://example.com/news").unwrap();

        assert_eq!(feed.title, "Example News");
        assert_eq!(feed.description, "");
        assert_eq!(feed.link, "https://example.com/news");

        config.feed.title = FeedValue::Field(FieldSelector::text(".missing"));
        let feed = extract(LISTING_HTML, &config, "https://example.com/news").unwrap();
        assert_eq!(feed.title, DEFAULT_FEED_TITLE);
    }

    #[test]
    fn test_feed_selector_can_match_html_element() {
        let html = r#"<html lang="de"><body><div class="item"><h2>T</h2><a href="/x">x</a></div></body></html>"#;
        let mut config = scenario_config();
        config.feed.title = FeedValue::Field(FieldSelector::attr("html", "lang"));

        let feed = extract(html, &config, "https://example.com/").unwrap();
        assert_eq!(feed.title, "de");
    }

    #[test]
    fn test_text_mode_round_trips_trimmed_text() {
        let html = "<div class=\"item\"><h2>\n   Exact  title text \t</h2><a href=\"/x\">x</a></div>";
        let feed = extract(html, &scenario_config(), "https://example.com/").unwrap();
        assert_eq!(feed.items[0].title, "Exact  title text");
    }

    #[test]
    fn test_unresolvable_link_passes_through() {
        let html = r#"<div class="item"><h2>T</h2><a href="/relative">x</a></div>"#;
        let feed = extract(html, &scenario_config(), "not-a-url").unwrap();
        assert_eq!(feed.items[0].link, "/relative");
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let config = scenario_config();
        let first = extract(LISTING_HTML, &config, "https://example.com/").unwrap();
        let second = extract(LISTING_HTML, &config, "https://example.com/").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_selector_is_input_error() {
        let mut config = scenario_config();
        config.item_selector = "div[".to_string();
        let err = extract(LISTING_HTML, &config, "https://example.com/").unwrap_err();
        assert!(matches!(err, ForgeError::Input(_)));
    }

    #[test]
    fn test_count_matches() {
        assert_eq!(count_matches(LISTING_HTML, ".item"), 3);
        assert_eq!(count_matches(LISTING_HTML, ".nope"), 0);
        assert_eq!(count_matches(LISTING_HTML, "div["), 0);
    }
}
