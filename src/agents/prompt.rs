use serde_json::Value;

use crate::error::{ForgeError, Result};
use crate::parser::schema::MonitorHint;
use crate::selector::tester::TOOL_NAME;
use crate::selector::FlaggedSelector;

const DEFAULT_UNSUITABLE_REASON: &str = "The page has no repeating list of items.";

/// Build the opening instruction turn.
pub fn initial_prompt(trimmed_html: &str, url: &str) -> String {
    format!(
        r#"You are an expert web scraper. Given the HTML of a web page, produce a JSON configuration that describes how to extract an RSS-like feed of items from the page.

The page URL is: {url}

Analyze the HTML below and identify the repeating pattern of content items (articles, posts, links, products, etc.). Use the `{tool}` tool to check your selectors against the real page before answering. The HTML below is trimmed; the tool sees the full page.

Reply with a JSON object of this shape:

{{
  "feed": {{ "title": FieldSelector | string, "description"?: FieldSelector | string, "link"?: FieldSelector | string }},
  "itemSelector": string,
  "fields": {{
    "title": FieldSelector,
    "link": FieldSelector,
    "description"?: FieldSelector,
    "pubDate"?: FieldSelector,
    "author"?: FieldSelector,
    "category"?: FieldSelector,
    "image"?: FieldSelector
  }},
  "snapshotSuitable"?: boolean,
  "contentSelector"?: string,
  "suggestedTitle"?: string
}}

where FieldSelector is {{ "selector": string, "attr"?: string, "html"?: boolean }}. An empty selector means the item element itself.

Rules:
1. itemSelector MUST match multiple elements on the page (the repeating items).
2. All selectors in fields are RELATIVE to each matched item element.
3. For links, always use {{ "selector": "a", "attr": "href" }} or similar to get the href attribute.
4. For images, use {{ "selector": "img", "attr": "src" }} or similar.
5. For dates, look for <time> elements with datetime attributes: {{ "selector": "time", "attr": "datetime" }}.
6. If a field is not available on the page, omit it from fields.
7. Prefer specific selectors (classes, data attributes) over generic tag selectors.
8. Never rely on generated class names such as "Card-module__x7Yz2__title" or "sc-1xcs6mc-0". Use a partial attribute match like [class*='Card-module__'] instead.
9. feed.title can be a literal string if there's no good selector.
10. If the page has no repeating items (a single article, a login wall, an empty page), reply with {{ "unsuitable": true, "unsuitableReason": string }} instead.
11. Independently, set "snapshotSuitable" to true when the page's main content would be worth monitoring for changes, with "contentSelector" naming that content and "suggestedTitle" a short feed title.
12. Return ONLY the JSON object. No markdown fences, no explanation.

HTML:
{html}"#,
        url = url,
        tool = TOOL_NAME,
        html = trimmed_html
    )
}

/// Appended before the last iteration when the agent was still exploring.
pub fn final_answer_request() -> String {
    "You have no tool calls left. Reply now with ONLY the final JSON configuration.".to_string()
}

pub fn validation_feedback(error: &ForgeError) -> String {
    match error {
        ForgeError::Validation { path, message } if path == "$" => format!(
            "Your reply could not be used: {}. Reply with ONLY the JSON object.",
            message
        ),
        ForgeError::Validation { path, message } => format!(
            "Your configuration failed validation at `{}`: {}. Fix it and reply with the complete corrected JSON.",
            path, message
        ),
        other => format!(
            "Your configuration could not be used: {}. Reply with the complete corrected JSON.",
            other
        ),
    }
}

pub fn fragile_feedback(flagged: &[FlaggedSelector]) -> String {
    let mut lines = vec![
        "These selectors depend on generated class names that change whenever the site is redeployed:"
            .to_string(),
    ];
    for item in flagged {
        let hint = match &item.suggestion {
            Some(suggestion) => format!(" (use {} instead)", suggestion),
            None => String::new(),
        };
        lines.push(format!(
            "- `{}` = \"{}\" uses class \"{}\"{}",
            item.path, item.selector, item.class_name, hint
        ));
    }
    lines.push(
        "Rewrite them with partial attribute matches such as [class*='Name-module__'] or with stable \
         tags and attributes, then reply with the complete corrected JSON."
            .to_string(),
    );
    lines.join("\n")
}

pub fn empty_extraction_feedback(item_selector: &str, matched: usize) -> String {
    if matched == 0 {
        format!(
            "itemSelector \"{}\" matched 0 elements on the real page. Test a different selector and \
             reply with the complete corrected JSON.",
            item_selector
        )
    } else {
        format!(
            "itemSelector \"{}\" matched {} elements but none of them produced both a title and a \
             link. Check fields.title and fields.link relative to each item and reply with the \
             complete corrected JSON.",
            item_selector, matched
        )
    }
}

/// A terminal answer from the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAnswer {
    Unsuitable {
        reason: String,
        monitor: Option<MonitorHint>,
    },
    Proposal {
        candidate: Value,
        monitor: Option<MonitorHint>,
    },
}

/// Parse the agent's final text. Empty text and text that is not a JSON
/// object are protocol errors.
pub fn parse_answer(text: Option<&str>) -> Result<AgentAnswer> {
    let text = text
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ForgeError::AgentProtocol("Empty response from model".to_string()))?;

    let json_text = extract_json(text);
    let value: Value = serde_json::from_str(json_text).map_err(|e| {
        ForgeError::AgentProtocol(format!(
            "Reply is not valid JSON ({}): {}",
            e,
            preview_text(text)
        ))
    })?;
    if !value.is_object() {
        return Err(ForgeError::AgentProtocol(
            "Reply must be a JSON object".to_string(),
        ));
    }

    let monitor = monitor_hint(&value);
    if value.get("unsuitable").and_then(Value::as_bool).unwrap_or(false) {
        let reason = value
            .get("unsuitableReason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_UNSUITABLE_REASON)
            .to_string();
        return Ok(AgentAnswer::Unsuitable { reason, monitor });
    }

    Ok(AgentAnswer::Proposal {
        candidate: value,
        monitor,
    })
}

fn monitor_hint(value: &Value) -> Option<MonitorHint> {
    let snapshot_suitable = value.get("snapshotSuitable").and_then(Value::as_bool)?;
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Some(MonitorHint {
        snapshot_suitable,
        content_selector: text("contentSelector"),
        suggested_title: text("suggestedTitle"),
    })
}

/// Strip markdown fences, or fall back to the outermost braces.
fn extract_json(text: &str) -> &str {
    let stripped = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if stripped.starts_with('{') {
        return stripped;
    }
    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => stripped,
    }
}

fn preview_text(text: &str) -> String {
    crate::parser::preview(text, 200)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_carries_url_and_markup() {
        let prompt = initial_prompt("<ul><li>x</li></ul>", "https://example.com/news");
        assert!(prompt.contains("The page URL is: https://example.com/news"));
        assert!(prompt.ends_with("<ul><li>x</li></ul>"));
        assert!(prompt.contains("\"unsuitable\": true"));
        assert!(prompt.contains("test_selector"));
    }

    #[test]
    fn test_parse_fenced_proposal() {
        let text = "```json\n{\"itemSelector\": \".item\", \"snapshotSuitable\": false}\n```";
        match parse_answer(Some(text)).unwrap() {
            AgentAnswer::Proposal { candidate, monitor } => {
                assert_eq!(candidate["itemSelector"], ".item");
                assert!(!monitor.unwrap().snapshot_suitable);
            }
            other => panic!("expected proposal, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_inside_prose() {
        let text = "Here you go: {\"itemSelector\": \"li\"} hope it helps";
        assert!(matches!(
            parse_answer(Some(text)).unwrap(),
            AgentAnswer::Proposal { .. }
        ));
    }

    #[test]
    fn test_parse_unsuitable_with_hint() {
        let text = json!({
            "unsuitable": true,
            "unsuitableReason": "Single article",
            "snapshotSuitable": true,
            "contentSelector": "main article",
            "suggestedTitle": "Changelog"
        })
        .to_string();
        assert_eq!(
            parse_answer(Some(&text)).unwrap(),
            AgentAnswer::Unsuitable {
                reason: "Single article".into(),
                monitor: Some(MonitorHint {
                    snapshot_suitable: true,
                    content_selector: Some("main article".into()),
                    suggested_title: Some("Changelog".into()),
                }),
            }
        );

        match parse_answer(Some("{\"unsuitable\": true}")).unwrap() {
            AgentAnswer::Unsuitable { reason, monitor } => {
                assert_eq!(reason, DEFAULT_UNSUITABLE_REASON);
                assert!(monitor.is_none());
            }
            other => panic!("expected unsuitable, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_answer_is_protocol_error() {
        assert!(matches!(parse_answer(None), Err(ForgeError::AgentProtocol(_))));
        assert!(matches!(parse_answer(Some("  ")), Err(ForgeError::AgentProtocol(_))));
    }

    #[test]
    fn test_non_json_answer_is_protocol_error() {
        let err = parse_answer(Some("I could not find anything")).unwrap_err();
        assert!(matches!(err, ForgeError::AgentProtocol(ref m) if m.contains("not valid JSON")));
        assert!(!err.is_retryable());
        let err = parse_answer(Some("[1, 2]")).unwrap_err();
        assert!(matches!(err, ForgeError::AgentProtocol(_)));
    }

    #[test]
    fn test_feedback_messages() {
        let msg = empty_extraction_feedback(".post", 0);
        assert!(msg.contains("\".post\""));
        assert!(msg.contains("0 elements"));
        assert!(empty_extraction_feedback(".post", 4).contains("matched 4 elements"));

        let msg = validation_feedback(&ForgeError::validation("fields.title.selector", "invalid CSS"));
        assert!(msg.contains("`fields.title.selector`"));

        let msg = fragile_feedback(&[FlaggedSelector {
            path: "itemSelector".into(),
            selector: ".Foo-module__abc123__bar".into(),
            class_name: "Foo-module__abc123__bar".into(),
            suggestion: Some("[class*='Foo-module__']".into()),
        }]);
        assert!(msg.contains("[class*='Foo-module__']"));
        assert!(msg.contains(".Foo-module__abc123__bar"));
    }
}
