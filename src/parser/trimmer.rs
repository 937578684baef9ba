use ego_tree::NodeRef;
use scraper::{Html, Node};

const REMOVE_ELEMENTS: [&str; 6] = ["script", "style", "svg", "noscript", "iframe", "meta"];

const REMOVE_ATTRS: [&str; 8] = [
    "style",
    "onclick",
    "onload",
    "onerror",
    "onmouseover",
    "onmouseout",
    "onfocus",
    "onblur",
];

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const MAX_TEXT_LENGTH: usize = 200;
const TRUNCATED_TEXT_LENGTH: usize = 80;
pub const DEFAULT_MAX_OUTPUT_LENGTH: usize = 30_000;

/// Strip markup down to a structural skeleton for the proposing agent.
/// Removes scripts, styles and noisy attributes, shortens long text, caps the size.
pub fn trim_html(raw_html: &str, max_output: usize) -> String {
    let document = Html::parse_document(raw_html);
    let mut out = String::with_capacity(raw_html.len().min(max_output * 2));

    for child in document.tree.root().children() {
        write_node(child, &mut out);
    }

    truncate_chars(&out, max_output)
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Doctype(doctype) => {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype.name());
            out.push('>');
        }
        Node::Text(text) => {
            let trimmed = text.trim();
            if trimmed.chars().count() > MAX_TEXT_LENGTH {
                let short: String = trimmed.chars().take(TRUNCATED_TEXT_LENGTH).collect();
                out.push_str(&html_escape::encode_text(&short));
                out.push_str("...");
            } else {
                out.push_str(&html_escape::encode_text(&**text));
            }
        }
        Node::Element(element) => {
            let name = element.name();
            if is_removed(name, element.attr("rel")) {
                return;
            }

            out.push('<');
            out.push_str(name);
            for (key, value) in element.attrs() {
                if is_noisy_attr(key) {
                    continue;
                }
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&html_escape::encode_double_quoted_attribute(value));
                out.push('"');
            }
            out.push('>');

            if VOID_ELEMENTS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::Document | Node::Fragment => {
            for child in node.children() {
                write_node(child, out);
            }
        }
        // comments and processing instructions carry no structure
        _ => {}
    }
}

fn is_removed(name: &str, rel: Option<&str>) -> bool {
    if REMOVE_ELEMENTS.contains(&name) {
        return true;
    }
    name == "link"
        && rel
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
            .unwrap_or(false)
}

fn is_noisy_attr(key: &str) -> bool {
    REMOVE_ATTRS.contains(&key) || (key.starts_with("data-") && key != "data-testid")
}

/// Cut `s` to at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Like `truncate_chars` but marks the cut with `...`, staying within `max_chars`.
pub fn preview(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = truncate_chars(s, max_chars.saturating_sub(3));
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trim(html: &str) -> String {
        trim_html(html, DEFAULT_MAX_OUTPUT_LENGTH)
    }

    #[test]
    fn test_removes_noisy_elements() {
        let result = trim(
            r#"<html><head><meta charset="utf-8"><link rel="stylesheet" href="x.css"><style>.x{color:red}</style></head>
            <body><script>alert(1)</script><svg><circle r="10"/></svg><noscript>Enable JS</noscript>
            <iframe src="x"></iframe><p>Hello</p></body></html>"#,
        );
        for needle in ["<script", "<style", "<svg", "<noscript", "<iframe", "<meta", "stylesheet"] {
            assert!(!result.contains(needle), "{} should be removed: {}", needle, result);
        }
        assert!(result.contains("<p>Hello</p>"));
    }

    #[test]
    fn test_keeps_canonical_links() {
        let result = trim(r#"<html><head><link rel="canonical" href="/a"></head><body></body></html>"#);
        assert!(result.contains(r#"rel="canonical""#));
        assert!(result.contains(r#"href="/a""#));
        assert!(!result.contains("</link>"));
    }

    #[test]
    fn test_strips_noisy_attributes() {
        let result = trim(
            r#"<div onclick="foo()" style="color:red" data-track="x" data-testid="card" class="card">Hi</div>"#,
        );
        assert!(!result.contains("onclick"));
        assert!(!result.contains("style="));
        assert!(!result.contains("data-track"));
        assert!(result.contains(r#"data-testid="card""#));
        assert!(result.contains(r#"class="card""#));
    }

    #[test]
    fn test_truncates_long_text() {
        let long = "word ".repeat(100);
        let result = trim(&format!("<p>{}</p>", long));
        assert!(result.contains("..."));
        assert!(!result.contains(long.trim()));
    }

    #[test]
    fn test_preview_marks_cut() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("abcdefghij", 8), "abcde...");
        assert_eq!(preview("héllo wörld", 8).chars().count(), 8);
    }

    #[test]
    fn test_caps_total_output() {
        let body: String = (0..5000).map(|i| format!("<li>item {}</li>", i)).collect();
        let result = trim_html(&format!("<ul>{}</ul>", body), 1000);
        assert_eq!(result.chars().count(), 1000);
    }
}
