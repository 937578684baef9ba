use once_cell::sync::Lazy;
use regex::Regex;

/// A class name inside a selector that looks machine-generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragileClass {
    pub class_name: String,
    /// Partial attribute match on the stable part of the name, when one exists.
    pub suggestion: Option<String>,
}

/// Decides whether a selector leans on generated class names.
pub trait FragilePredicate: Send + Sync {
    fn inspect(&self, selector: &str) -> Vec<FragileClass>;
}

/// Never flags anything.
pub struct NoFragileCheck;

impl FragilePredicate for NoFragileCheck {
    fn inspect(&self, _selector: &str) -> Vec<FragileClass> {
        Vec::new()
    }
}

static CLASS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").expect("class token regex"));

// `Foo-module__abc123__bar` (CSS modules)
static CSS_MODULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*?-module__)[A-Za-z0-9_-]+$").expect("css module regex"));

// `card_title__x7Yz2` (Next.js CSS modules, 5 char hash)
static SHORT_HASH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*__)([A-Za-z0-9]{5})$").expect("hash suffix regex"));

// `Layout-sc-1xcs6mc-0` and `sc-bdVaJa` (styled-components)
static STYLED_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9]*-sc-)[a-z0-9]{5,}-\d+$").expect("styled regex"));
static STYLED_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sc-[A-Za-z]{5,}$").expect("styled bare regex"));

// `css-1q2w3e4` (emotion)
static EMOTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^css-([a-z0-9]{5,})(-[A-Za-z0-9_-]+)?$").expect("emotion regex"));

/// Flags class names produced by CSS modules, styled-components and emotion.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedClassPattern;

impl HashedClassPattern {
    pub fn classify(class_name: &str) -> Option<FragileClass> {
        let flagged = |stable: Option<&str>| FragileClass {
            class_name: class_name.to_string(),
            suggestion: stable.map(|s| format!("[class*='{}']", s)),
        };

        if let Some(caps) = CSS_MODULE.captures(class_name) {
            return Some(flagged(caps.get(1).map(|m| m.as_str())));
        }
        if let Some(caps) = STYLED_COMPONENT.captures(class_name) {
            return Some(flagged(caps.get(1).map(|m| m.as_str())));
        }
        if STYLED_BARE.is_match(class_name) {
            return Some(flagged(None));
        }
        if let Some(caps) = EMOTION.captures(class_name) {
            if has_digit(&caps[1]) {
                return Some(flagged(None));
            }
        }
        if let Some(caps) = SHORT_HASH_SUFFIX.captures(class_name) {
            if has_digit(&caps[2]) && caps[2].chars().any(|c| c.is_ascii_alphabetic()) {
                return Some(flagged(caps.get(1).map(|m| m.as_str())));
            }
        }
        None
    }
}

impl FragilePredicate for HashedClassPattern {
    fn inspect(&self, selector: &str) -> Vec<FragileClass> {
        CLASS_TOKEN
            .captures_iter(selector)
            .filter_map(|caps| Self::classify(&caps[1]))
            .collect()
    }
}

fn has_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
}
