use scraper::Html;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::parser::schema::{
    selector_paths, ExtractionConfig, FeedMeta, FeedValue, FieldSelector, ItemFields, OPTIONAL_FIELDS,
    REQUIRED_FIELDS,
};
use crate::selector::fragile::{FragilePredicate, HashedClassPattern};
use crate::selector::parse_selector;

/// A selector the fragile heuristic objected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedSelector {
    pub path: String,
    pub selector: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A structurally valid config, possibly carrying fragile-selector warnings.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedConfig {
    Clean(ExtractionConfig),
    Fragile {
        config: ExtractionConfig,
        flagged: Vec<FlaggedSelector>,
    },
}

impl ValidatedConfig {
    pub fn config(&self) -> &ExtractionConfig {
        match self {
            ValidatedConfig::Clean(config) | ValidatedConfig::Fragile { config, .. } => config,
        }
    }

    pub fn into_config(self) -> ExtractionConfig {
        match self {
            ValidatedConfig::Clean(config) | ValidatedConfig::Fragile { config, .. } => config,
        }
    }
}

/// Checks a proposed config: shape, CSS syntax, required fields, then fragility.
pub struct ConfigValidator {
    fragile: Box<dyn FragilePredicate>,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new(Box::new(HashedClassPattern))
    }
}

impl ConfigValidator {
    pub fn new(fragile: Box<dyn FragilePredicate>) -> Self {
        Self { fragile }
    }

    /// Validate a candidate. Suitability keys and anything unknown are dropped
    /// from the returned config.
    pub fn validate(&self, candidate: &Value) -> Result<ValidatedConfig> {
        let shaped = check_shape(candidate)?;

        for (path, css) in shaped.selectors() {
            check_css(&path, css)?;
        }

        let config = shaped.into_config()?;

        let flagged = self.flag_fragile(&config);
        if flagged.is_empty() {
            Ok(ValidatedConfig::Clean(config))
        } else {
            debug!(count = flagged.len(), "Config uses fragile selectors");
            Ok(ValidatedConfig::Fragile { config, flagged })
        }
    }

    pub fn flag_fragile(&self, config: &ExtractionConfig) -> Vec<FlaggedSelector> {
        config
            .selectors()
            .into_iter()
            .flat_map(|(path, selector)| {
                self.fragile
                    .inspect(selector)
                    .into_iter()
                    .map(move |class| FlaggedSelector {
                        path: path.clone(),
                        selector: selector.to_string(),
                        class_name: class.class_name,
                        suggestion: class.suggestion,
                    })
            })
            .collect()
    }
}

/// Candidate after the shape check, before required fields are enforced.
struct ShapedConfig {
    item_selector: String,
    feed: FeedMeta,
    fields: Vec<(&'static str, FieldSelector)>,
}

impl ShapedConfig {
    fn selectors(&self) -> Vec<(String, &str)> {
        selector_paths(
            &self.item_selector,
            &self.feed,
            self.fields.iter().map(|(name, field)| (*name, field)),
        )
    }

    fn into_config(mut self) -> Result<ExtractionConfig> {
        let mut take = |name: &str| {
            self.fields
                .iter()
                .position(|(n, _)| *n == name)
                .map(|idx| self.fields.remove(idx).1)
        };

        let title = take("title")
            .ok_or_else(|| ForgeError::validation("fields.title", "required field is missing"))?;
        let link = take("link")
            .ok_or_else(|| ForgeError::validation("fields.link", "required field is missing"))?;

        let mut fields = ItemFields::new(title, link);
        fields.description = take("description");
        fields.pub_date = take("pubDate");
        fields.author = take("author");
        fields.category = take("category");
        fields.image = take("image");

        Ok(ExtractionConfig {
            feed: self.feed,
            item_selector: self.item_selector,
            fields,
        })
    }
}

fn check_shape(candidate: &Value) -> Result<ShapedConfig> {
    let root = candidate
        .as_object()
        .ok_or_else(|| ForgeError::validation("$", "config must be a JSON object"))?;

    let item_selector = match root.get("itemSelector") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            return Err(ForgeError::validation(
                "itemSelector",
                "missing or not a non-empty string",
            ))
        }
    };

    let feed = root
        .get("feed")
        .and_then(Value::as_object)
        .ok_or_else(|| ForgeError::validation("feed", "missing feed metadata object"))?;
    let title = match present(feed, "title") {
        Some(value) => feed_value(value, "feed.title")?,
        None => return Err(ForgeError::validation("feed.title", "missing feed title")),
    };
    let description = present(feed, "description")
        .map(|v| feed_value(v, "feed.description"))
        .transpose()?;
    let link = present(feed, "link")
        .map(|v| feed_value(v, "feed.link"))
        .transpose()?;

    let fields_obj = root
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| ForgeError::validation("fields", "missing fields object"))?;

    let mut fields = Vec::new();
    for name in REQUIRED_FIELDS.iter().chain(OPTIONAL_FIELDS.iter()) {
        if let Some(value) = present(fields_obj, name) {
            fields.push((*name, field_selector(value, &format!("fields.{}", name))?));
        }
    }

    Ok(ShapedConfig {
        item_selector,
        feed: FeedMeta {
            title,
            description,
            link,
        },
        fields,
    })
}

/// A key counts as absent when missing or null.
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn feed_value(value: &Value, path: &str) -> Result<FeedValue> {
    match value {
        Value::String(s) => Ok(FeedValue::Literal(s.clone())),
        Value::Object(_) => Ok(FeedValue::Field(field_selector(value, path)?)),
        _ => Err(ForgeError::validation(path, "must be a string or a field selector object")),
    }
}

fn field_selector(value: &Value, path: &str) -> Result<FieldSelector> {
    let obj = value
        .as_object()
        .ok_or_else(|| ForgeError::validation(path, "must be a field selector object"))?;

    let selector = match obj.get("selector") {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => {
            return Err(ForgeError::validation(
                format!("{}.selector", path),
                "must be a string",
            ))
        }
    };
    let attr = match present(obj, "attr") {
        None => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            return Err(ForgeError::validation(
                format!("{}.attr", path),
                "must be a string if present",
            ))
        }
    };
    let html = match present(obj, "html") {
        None => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            return Err(ForgeError::validation(
                format!("{}.html", path),
                "must be a boolean if present",
            ))
        }
    };

    Ok(FieldSelector {
        selector,
        attr,
        html,
    })
}

/// Parse the selector and run it against a throwaway document.
fn check_css(path: &str, css: &str) -> Result<()> {
    let selector = parse_selector(css)
        .map_err(|e| ForgeError::validation(path, format!("invalid CSS selector \"{}\": {}", css, e)))?;
    let scratch = Html::parse_fragment("<div></div>");
    let _ = scratch.select(&selector).count();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::fragile::NoFragileCheck;
    use serde_json::json;

    fn valid_candidate() -> Value {
        json!({
            "itemSelector": ".item",
            "feed": { "title": "Feed" },
            "fields": {
                "title": { "selector": "h2" },
                "link": { "selector": "a", "attr": "href" }
            }
        })
    }

    fn path_of(err: ForgeError) -> String {
        match err {
            ForgeError::Validation { path, .. } => path,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_valid_config() {
        let validated = ConfigValidator::default().validate(&valid_candidate()).unwrap();
        let config = validated.config();
        assert_eq!(config.item_selector, ".item");
        assert_eq!(config.fields.link, FieldSelector::attr("a", "href"));
        assert!(matches!(validated, ValidatedConfig::Clean(_)));
    }

    #[test]
    fn test_strips_suitability_metadata() {
        let mut candidate = valid_candidate();
        candidate["unsuitable"] = json!(false);
        candidate["unsuitableReason"] = json!("");
        candidate["snapshotSuitable"] = json!(true);
        candidate["fields"]["summary"] = json!({ "selector": "p" });

        let config = ConfigValidator::default().validate(&candidate).unwrap().into_config();
        let round_trip = serde_json::to_value(&config).unwrap();
        assert!(round_trip.get("unsuitable").is_none());
        assert!(round_trip.get("snapshotSuitable").is_none());
        assert!(round_trip["fields"].get("summary").is_none());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let validator = ConfigValidator::default();
        assert_eq!(path_of(validator.validate(&json!("nope")).unwrap_err()), "$");

        let mut c = valid_candidate();
        c["itemSelector"] = json!("");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "itemSelector");

        let mut c = valid_candidate();
        c.as_object_mut().unwrap().remove("feed");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "feed");

        let mut c = valid_candidate();
        c["feed"]["title"] = json!(42);
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "feed.title");

        let mut c = valid_candidate();
        c["fields"]["title"] = json!("h2");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "fields.title");

        let mut c = valid_candidate();
        c["fields"]["link"]["attr"] = json!(1);
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "fields.link.attr");

        let mut c = valid_candidate();
        c["fields"]["title"]["html"] = json!("yes");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "fields.title.html");
    }

    #[test]
    fn test_reports_invalid_css_with_exact_path() {
        let validator = ConfigValidator::default();

        let mut c = valid_candidate();
        c["fields"]["title"]["selector"] = json!("h2[");
        let err = validator.validate(&c).unwrap_err();
        assert!(err.to_string().contains("h2["));
        assert_eq!(path_of(err), "fields.title.selector");

        let mut c = valid_candidate();
        c["itemSelector"] = json!(".item >>> p");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "itemSelector");

        let mut c = valid_candidate();
        c["feed"]["link"] = json!({ "selector": "link[rel=", "attr": "href" });
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "feed.link.selector");
    }

    #[test]
    fn test_requires_title_and_link_fields() {
        let validator = ConfigValidator::default();

        let mut c = valid_candidate();
        c["fields"].as_object_mut().unwrap().remove("link");
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "fields.link");

        let mut c = valid_candidate();
        c["fields"]["title"] = Value::Null;
        assert_eq!(path_of(validator.validate(&c).unwrap_err()), "fields.title");
    }

    #[test]
    fn test_null_optional_values_are_absent() {
        let mut c = valid_candidate();
        c["fields"]["author"] = Value::Null;
        c["fields"]["link"]["html"] = Value::Null;
        c["feed"]["description"] = Value::Null;
        let config = ConfigValidator::default().validate(&c).unwrap().into_config();
        assert_eq!(config.fields.author, None);
        assert_eq!(config.feed.description, None);
    }

    #[test]
    fn test_flags_fragile_selectors_separately() {
        let mut c = valid_candidate();
        c["itemSelector"] = json!(".Foo-module__abc123__bar");
        let validated = ConfigValidator::default().validate(&c).unwrap();

        match validated {
            ValidatedConfig::Fragile { config, flagged } => {
                assert_eq!(config.item_selector, ".Foo-module__abc123__bar");
                assert_eq!(flagged.len(), 1);
                assert_eq!(flagged[0].path, "itemSelector");
                assert_eq!(flagged[0].suggestion.as_deref(), Some("[class*='Foo-module__']"));
            }
            other => panic!("expected fragile, got {:?}", other),
        }

        let relaxed = ConfigValidator::new(Box::new(NoFragileCheck));
        assert!(matches!(relaxed.validate(&c).unwrap(), ValidatedConfig::Clean(_)));
    }
}
