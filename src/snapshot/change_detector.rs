use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ForgeError, Result};
use crate::parser::preview;
use crate::parser::schema::{ChangeDetectionResult, SnapshotConfig, SnapshotRecord};
use crate::selector::parse_selector;

pub const FALLBACK_SUMMARY: &str = "Page content was updated.";
pub const MAX_SUMMARY_UNITS: usize = 3;
pub const MAX_SUMMARY_CHARS: usize = 500;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

// a run of non-terminators followed by its terminators
static SENTENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^.!?]+[.!?]*").expect("sentence regex"));

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector"));

/// Compares a monitored page's text against its last snapshot.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    max_units: usize,
    max_chars: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            max_units: MAX_SUMMARY_UNITS,
            max_chars: MAX_SUMMARY_CHARS,
        }
    }
}

impl ChangeDetector {
    pub fn new(max_units: usize, max_chars: usize) -> Self {
        Self {
            max_units: max_units.max(1),
            max_chars: max_chars.max(16),
        }
    }

    /// Observe `markup` and compare with the previous snapshot, if any.
    /// The first observation is a baseline and never reports a change.
    pub fn detect(
        &self,
        markup: &str,
        config: &SnapshotConfig,
        previous_text: Option<&str>,
        previous_hash: Option<&str>,
    ) -> Result<ChangeDetectionResult> {
        let current_text = extract_content_text(markup, &config.content_selector)?;
        let current_hash = hash_content(&current_text);

        let previous_hash = match previous_hash.filter(|h| !h.is_empty()) {
            Some(hash) => hash,
            None => {
                debug!(hash = %current_hash, "No previous snapshot, recording baseline");
                return Ok(ChangeDetectionResult {
                    changed: false,
                    current_text,
                    current_hash,
                    summary: None,
                });
            }
        };

        if current_hash == previous_hash {
            debug!(hash = %current_hash, "Content unchanged");
            return Ok(ChangeDetectionResult {
                changed: false,
                current_text,
                current_hash,
                summary: None,
            });
        }

        let summary = self.summarize(previous_text.unwrap_or(""), &current_text);
        debug!(
            previous = %previous_hash,
            current = %current_hash,
            "Content changed"
        );
        Ok(ChangeDetectionResult {
            changed: true,
            current_text,
            current_hash,
            summary: Some(summary),
        })
    }

    /// First snapshot of a page.
    pub fn baseline(&self, markup: &str, config: &SnapshotConfig) -> Result<SnapshotRecord> {
        Ok(self.detect(markup, config, None, None)?.to_record())
    }

    /// Sentences present in `current` but not in `previous`, or a generic notice.
    pub fn summarize(&self, previous: &str, current: &str) -> String {
        let mut seen: HashSet<&str> = sentences(previous).map(sentence_key).collect();

        // `insert` is false for units already in the previous text or already emitted
        let added: Vec<&str> = sentences(current)
            .filter(|&unit| seen.insert(sentence_key(unit)))
            .take(self.max_units)
            .collect();

        if added.is_empty() {
            return FALLBACK_SUMMARY.to_string();
        }
        preview(&added.join(" "), self.max_chars)
    }
}

/// Text under `content_selector`, or the whole body when nothing matches,
/// with whitespace runs collapsed.
pub fn extract_content_text(markup: &str, content_selector: &str) -> Result<String> {
    let selector = parse_selector(content_selector).map_err(|e| {
        ForgeError::Input(format!(
            "Invalid content selector \"{}\": {}",
            content_selector, e
        ))
    })?;

    let document = Html::parse_document(markup);
    let matched: Vec<String> = document
        .select(&selector)
        .map(|el| el.text().collect::<String>())
        .collect();

    let raw = if matched.is_empty() {
        debug!(selector = %content_selector, "Content selector matched nothing, using full page");
        match document.select(&BODY).next() {
            Some(body) => body.text().collect::<String>(),
            None => document.root_element().text().collect::<String>(),
        }
    } else {
        matched.join(" ")
    };

    Ok(normalize_text(&raw))
}

pub fn normalize_text(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Lowercase hex SHA-256 of `text`.
pub fn hash_content(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|unit| !sentence_key(unit).is_empty())
}

fn sentence_key(unit: &str) -> &str {
    unit.trim_end_matches(['.', '!', '?']).trim()
}
