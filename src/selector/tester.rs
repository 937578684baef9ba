use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::agents::model::ToolDefinition;
use crate::parser::preview;
use crate::selector::parse_selector;

pub const TOOL_NAME: &str = "test_selector";

/// Sample placeholder for a context where the field yielded nothing.
pub const NOT_FOUND: &str = "(not found)";

pub const DEFAULT_SAMPLE_LIMIT: usize = 3;
pub const DEFAULT_SAMPLE_CHARS: usize = 300;

/// Arguments of one `test_selector` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorProbe {
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

impl SelectorProbe {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            context_selector: None,
            attr: None,
        }
    }

    pub fn within(mut self, context_selector: impl Into<String>) -> Self {
        self.context_selector = Some(context_selector.into());
        self
    }

    pub fn attr(mut self, attr: impl Into<String>) -> Self {
        self.attr = Some(attr.into());
        self
    }
}

/// What a probe found. Invalid CSS is reported as `Error`, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestOutcome {
    Matches {
        #[serde(rename = "matchCount")]
        match_count: usize,
        samples: Vec<String>,
    },
    Context {
        #[serde(rename = "contextMatches")]
        context_matches: usize,
        #[serde(rename = "fieldFound")]
        field_found: String,
        samples: Vec<String>,
    },
    Error {
        error: String,
    },
}

impl TestOutcome {
    /// Element count the probe matched: document matches or context matches.
    pub fn match_count(&self) -> usize {
        match self {
            TestOutcome::Matches { match_count, .. } => *match_count,
            TestOutcome::Context { context_matches, .. } => *context_matches,
            TestOutcome::Error { .. } => 0,
        }
    }

    pub fn samples(&self) -> &[String] {
        match self {
            TestOutcome::Matches { samples, .. } | TestOutcome::Context { samples, .. } => samples,
            TestOutcome::Error { .. } => &[],
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| json!({ "error": e.to_string() }).to_string())
    }
}

/// Runs candidate selectors against page markup. Holds no document, so it is
/// cheap to share and never keeps a parsed page alive across awaits.
#[derive(Debug, Clone)]
pub struct SelectorTester {
    sample_limit: usize,
    sample_chars: usize,
}

impl Default for SelectorTester {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_LIMIT, DEFAULT_SAMPLE_CHARS)
    }
}

impl SelectorTester {
    pub fn new(sample_limit: usize, sample_chars: usize) -> Self {
        Self {
            sample_limit: sample_limit.max(1),
            sample_chars: sample_chars.max(16),
        }
    }

    pub fn test(&self, markup: &str, probe: &SelectorProbe) -> TestOutcome {
        match probe.context_selector.as_deref() {
            Some(context) => self.test_in_context(markup, context, probe),
            None => self.test_document(markup, probe),
        }
    }

    fn test_document(&self, markup: &str, probe: &SelectorProbe) -> TestOutcome {
        let selector = match parse_selector(&probe.selector) {
            Ok(selector) => selector,
            Err(e) => return invalid(&probe.selector, e),
        };

        let document = Html::parse_document(markup);
        let mut match_count = 0;
        let mut samples = Vec::new();
        for element in document.select(&selector) {
            if samples.len() < self.sample_limit {
                samples.push(preview(&element.html(), self.sample_chars));
            }
            match_count += 1;
        }

        debug!(selector = %probe.selector, match_count, "Tested selector");
        TestOutcome::Matches {
            match_count,
            samples,
        }
    }

    fn test_in_context(&self, markup: &str, context: &str, probe: &SelectorProbe) -> TestOutcome {
        let context_selector = match parse_selector(context) {
            Ok(selector) => selector,
            Err(e) => return invalid(context, e),
        };
        // empty selector reads the context element itself
        let field_selector = if probe.selector.is_empty() {
            None
        } else {
            match parse_selector(&probe.selector) {
                Ok(selector) => Some(selector),
                Err(e) => return invalid(&probe.selector, e),
            }
        };

        let document = Html::parse_document(markup);
        let contexts: Vec<ElementRef<'_>> = document.select(&context_selector).collect();
        let sampled = contexts.len().min(self.sample_limit);

        let mut found = 0;
        let mut samples = Vec::with_capacity(sampled);
        for context_element in contexts.iter().take(sampled) {
            let target = match &field_selector {
                Some(selector) => context_element.select(selector).next(),
                None => Some(*context_element),
            };
            let value = target.and_then(|element| read_probe_value(element, probe.attr.as_deref()));

            match value {
                Some(value) => {
                    found += 1;
                    samples.push(preview(&value, self.sample_chars));
                }
                None => samples.push(NOT_FOUND.to_string()),
            }
        }

        debug!(
            selector = %probe.selector,
            context = %context,
            context_matches = contexts.len(),
            found,
            "Tested selector in context"
        );
        TestOutcome::Context {
            context_matches: contexts.len(),
            field_found: format!("{}/{}", found, sampled),
            samples,
        }
    }

    /// Tool definition offered to the proposing agent.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: format!(
                "Test a CSS selector against the real page. Without context_selector, returns the \
                 number of matches and up to {} sample elements. With context_selector, evaluates \
                 selector inside up to {} context matches (first match each, empty selector means \
                 the context element itself) and reports the trimmed text or attr value found.",
                self.sample_limit, self.sample_limit
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "selector": {
                        "type": "string",
                        "description": "CSS selector to test"
                    },
                    "context_selector": {
                        "type": "string",
                        "description": "Optional item selector; selector is then evaluated relative to each match"
                    },
                    "attr": {
                        "type": "string",
                        "description": "Optional attribute to read instead of text (e.g. href, src, datetime)"
                    }
                },
                "required": ["selector"],
                "additionalProperties": false
            }),
        }
    }
}

fn read_probe_value(element: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    let value = match attr {
        Some(name) => element.value().attr(name)?.trim().to_string(),
        None => element.text().collect::<String>().trim().to_string(),
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn invalid(selector: &str, reason: String) -> TestOutcome {
    debug!(selector = %selector, reason = %reason, "Probe used invalid CSS");
    TestOutcome::Error {
        error: format!("Invalid CSS selector \"{}\": {}", selector, reason),
    }
}
