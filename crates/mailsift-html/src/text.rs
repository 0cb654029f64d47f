//! Plain-text previews of HTML bodies.

use scraper::{Html, Node, Selector};

/// Elements whose text never shows up in a rendered body.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "head", "title", "template"];

/// Renders the visible text of `html` as a single line of at most
/// `max_chars` characters, followed by `...` when it was cut.
#[must_use]
pub fn html_to_preview(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);

    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    for node in root.descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            text.push_str(chunk);
            text.push(' ');
        }
    }

    truncate(&compact_whitespace(&text), max_chars)
}

fn compact_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_compacts_whitespace() {
        let html = "<p>Hello\n\n   <b>world</b></p><div>again</div>";
        assert_eq!(html_to_preview(html, 100), "Hello world again");
    }

    #[test]
    fn test_preview_skips_hidden_elements() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><script>var x;</script><p>Visible</p></body></html>";
        assert_eq!(html_to_preview(html, 100), "Visible");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(html_to_preview("<p>abcdef ghij</p>", 7), "abcdef...");
        assert_eq!(html_to_preview("<p>abc</p>", 3), "abc");
    }

    #[test]
    fn test_preview_includes_table_text() {
        let html = "<table><tr><td>a</td><td>b</td></tr></table>";
        assert_eq!(html_to_preview(html, 100), "a b");
    }
}
