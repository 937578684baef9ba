use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Names of the per-item fields an extraction config may carry, in output order.
pub const REQUIRED_FIELDS: [&str; 2] = ["title", "link"];
pub const OPTIONAL_FIELDS: [&str; 5] = ["description", "pubDate", "author", "category", "image"];

/// How to read one value out of an item (or the document root).
///
/// An empty `selector` targets the context element itself. `attr` wins over
/// `html`, and `html` wins over plain text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSelector {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<bool>,
}

impl FieldSelector {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: None,
            html: None,
        }
    }

    pub fn attr(selector: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: Some(attr.into()),
            html: None,
        }
    }

    pub fn inner_html(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: None,
            html: Some(true),
        }
    }

    pub fn mode(&self) -> ExtractionMode<'_> {
        match (&self.attr, self.html) {
            (Some(attr), _) => ExtractionMode::Attribute(attr),
            (None, Some(true)) => ExtractionMode::Markup,
            _ => ExtractionMode::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode<'a> {
    Attribute(&'a str),
    Markup,
    Text,
}

/// Feed-level metadata value: either used verbatim or read from the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FeedValue {
    Literal(String),
    Field(FieldSelector),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedMeta {
    pub title: FeedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<FeedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<FeedValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemFields {
    pub title: FieldSelector,
    pub link: FieldSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<FieldSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<FieldSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<FieldSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FieldSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<FieldSelector>,
}

impl ItemFields {
    pub fn new(title: FieldSelector, link: FieldSelector) -> Self {
        Self {
            title,
            link,
            description: None,
            pub_date: None,
            author: None,
            category: None,
            image: None,
        }
    }

    /// Every configured field with its wire name, required fields first.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldSelector)> {
        [
            ("title", Some(&self.title)),
            ("link", Some(&self.link)),
            ("description", self.description.as_ref()),
            ("pubDate", self.pub_date.as_ref()),
            ("author", self.author.as_ref()),
            ("category", self.category.as_ref()),
            ("image", self.image.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, field)| field.map(|f| (name, f)))
    }
}

/// A replayable extraction recipe for one site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionConfig {
    pub feed: FeedMeta,
    pub item_selector: String,
    pub fields: ItemFields,
}

impl ExtractionConfig {
    /// Every CSS selector in the config paired with its path, e.g. `fields.title.selector`.
    pub fn selectors(&self) -> Vec<(String, &str)> {
        selector_paths(&self.item_selector, &self.feed, self.fields.iter())
    }
}

/// Selectors of a recipe's parts paired with their paths. Empty field
/// selectors are skipped since they target the context element.
pub fn selector_paths<'a, N: std::fmt::Display>(
    item_selector: &'a str,
    feed: &'a FeedMeta,
    fields: impl IntoIterator<Item = (N, &'a FieldSelector)>,
) -> Vec<(String, &'a str)> {
    let mut out = vec![("itemSelector".to_string(), item_selector)];

    let feed_values = [
        ("title", Some(&feed.title)),
        ("description", feed.description.as_ref()),
        ("link", feed.link.as_ref()),
    ];
    for (name, value) in feed_values {
        if let Some(FeedValue::Field(field)) = value {
            if !field.selector.is_empty() {
                out.push((format!("feed.{}.selector", name), field.selector.as_str()));
            }
        }
    }

    for (name, field) in fields {
        if !field.selector.is_empty() {
            out.push((format!("fields.{}.selector", name), field.selector.as_str()));
        }
    }
    out
}

/// One extracted entry. `title` and `link` are never empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl FeedItem {
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.link.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedFeed {
    pub title: String,
    pub description: String,
    pub link: String,
    pub items: Vec<FeedItem>,
}

/// Secondary assessment for pages without a repeating structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorHint {
    pub snapshot_suitable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_title: Option<String>,
}

/// Terminal outcome of a synthesis run that did not fail technically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SynthesisResult {
    Suitable {
        config: ExtractionConfig,
        preview: ExtractedFeed,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        monitor: Option<MonitorHint>,
    },
    Unsuitable {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        monitor: Option<MonitorHint>,
    },
}

impl SynthesisResult {
    pub fn is_suitable(&self) -> bool {
        matches!(self, SynthesisResult::Suitable { .. })
    }

    pub fn monitor_hint(&self) -> Option<&MonitorHint> {
        match self {
            SynthesisResult::Suitable { monitor, .. } | SynthesisResult::Unsuitable { monitor, .. } => {
                monitor.as_ref()
            }
        }
    }
}

/// Configuration for change-detection monitoring of a page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    pub content_selector: String,
    pub feed_title: String,
}

/// Stored normalized text plus digest for a monitored page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub content_hash: String,
    pub normalized_text: String,
    pub captured_at: DateTime<Utc>,
}

impl SnapshotRecord {
    pub fn capture(normalized_text: String, content_hash: String) -> Self {
        Self {
            content_hash,
            normalized_text,
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetectionResult {
    pub changed: bool,
    pub current_text: String,
    pub current_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ChangeDetectionResult {
    /// The record a collaborator should store after this observation.
    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord::capture(self.current_text.clone(), self.current_hash.clone())
    }
}

/// A feed advertised by the page itself via `<link rel="alternate">`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFeed {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub feed_type: DiscoveredFeedType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveredFeedType {
    Rss,
    Atom,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_precedence() {
        let mut field = FieldSelector::attr("a", "href");
        field.html = Some(true);
        assert_eq!(field.mode(), ExtractionMode::Attribute("href"));
        assert_eq!(FieldSelector::inner_html("p").mode(), ExtractionMode::Markup);
        assert_eq!(FieldSelector::text("h2").mode(), ExtractionMode::Text);
    }

    #[test]
    fn test_config_deserializes_wire_names() {
        let config: ExtractionConfig = serde_json::from_value(json!({
            "feed": { "title": "My Feed", "link": { "selector": "link[rel=canonical]", "attr": "href" } },
            "itemSelector": ".item",
            "fields": {
                "title": { "selector": "h2" },
                "link": { "selector": "a", "attr": "href" },
                "pubDate": { "selector": "time", "attr": "datetime" }
            }
        }))
        .unwrap();

        assert_eq!(config.item_selector, ".item");
        assert_eq!(config.feed.title, FeedValue::Literal("My Feed".to_string()));
        assert!(matches!(config.feed.link, Some(FeedValue::Field(_))));
        assert_eq!(config.fields.pub_date, Some(FieldSelector::attr("time", "datetime")));
    }

    #[test]
    fn test_selectors_lists_paths() {
        let mut fields = ItemFields::new(FieldSelector::text("h2"), FieldSelector::attr("", "href"));
        fields.image = Some(FieldSelector::attr("img", "src"));
        let config = ExtractionConfig {
            feed: FeedMeta {
                title: FeedValue::Field(FieldSelector::text("h1")),
                description: None,
                link: None,
            },
            item_selector: "article".to_string(),
            fields,
        };

        let paths: Vec<String> = config.selectors().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec![
                "itemSelector",
                "feed.title.selector",
                "fields.title.selector",
                "fields.image.selector"
            ]
        );
    }

    #[test]
    fn test_synthesis_result_is_tagged() {
        let result = SynthesisResult::Unsuitable {
            reason: "single article".to_string(),
            monitor: Some(MonitorHint {
                snapshot_suitable: true,
                content_selector: Some("main".to_string()),
                suggested_title: None,
            }),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "unsuitable");
        assert_eq!(value["monitor"]["snapshotSuitable"], true);
        assert!(!result.is_suitable());
    }
}
