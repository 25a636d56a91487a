//! Turns a rendered page into the text that gets indexed.

use lazy_static::lazy_static;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::warn;

const STOP: &str = "<!-- indexer::stop -->";
const CONTINUE: &str = "<!-- indexer::continue -->";

lazy_static! {
    static ref META: Selector = Selector::parse("meta[name]").expect("valid selector");
    static ref TITLE: Selector = Selector::parse("title").expect("valid selector");
    static ref LABELLED: Selector = Selector::parse("[title], [alt]").expect("valid selector");
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    /// Contents of the `<title>` element.
    pub title: String,
    pub description: String,
    /// Meta keywords followed by the page's `title`/`alt` attribute values.
    pub keywords: String,
    pub body: String,
    /// Raw page size in KiB, two decimals.
    pub filesize: f64,
    /// The page asked robots not to index it.
    pub noindex: bool,
}

impl ExtractedContent {
    /// Title, description, body and keywords as one whitespace-collapsed string.
    pub fn indexed_text(&self, title: &str) -> String {
        collapse(&format!("{} {} {} {}", title, self.description, self.body, self.keywords))
    }
}

pub fn extract(html: &str) -> ExtractedContent {
    let filesize = (html.len() as f64 / 1024.0 * 100.0).round() / 100.0;

    let mut content = strip_indexer_regions(html);
    for tag in ["script", "style"] {
        content = strip_blocks(&content, tag);
    }

    let (head, body) = match content.to_ascii_lowercase().find("</head>") {
        Some(pos) => (&content[..pos], &content[pos + "</head>".len()..]),
        None => ("", content.as_str()),
    };

    let mut extracted = ExtractedContent { filesize, ..Default::default() };
    let head_doc = Html::parse_document(head);
    if let Some(title) = head_doc.select(&TITLE).next() {
        extracted.title = collapse(&title.text().collect::<String>());
    }
    for meta in head_doc.select(&META) {
        let el = meta.value();
        let value = collapse(el.attr("content").unwrap_or(""));
        match el.attr("name").map(str::to_ascii_lowercase).as_deref() {
            Some("description") => extracted.description = value,
            Some("keywords") => extracted.keywords = value,
            Some("robots") => extracted.noindex = value.to_ascii_lowercase().contains("noindex"),
            _ => {}
        }
    }

    let body_doc = Html::parse_fragment(body);
    let mut seen = HashSet::new();
    let labels: Vec<String> = body_doc
        .select(&LABELLED)
        .flat_map(|el| [el.value().attr("title"), el.value().attr("alt")])
        .flatten()
        .map(collapse)
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect();
    if !labels.is_empty() {
        extracted.keywords = collapse(&format!("{} {}", extracted.keywords, labels.join(", ")));
    }

    extracted.body = collapse(&body_doc.root_element().text().collect::<Vec<_>>().join(" "));
    extracted
}

/// Remove `indexer::stop` .. `indexer::continue` regions. A stop marker that opens inside a
/// region extends it to the next continue marker, so nested pairs go as one span. A stop
/// marker without a matching continue ends the stripping.
pub fn strip_indexer_regions(content: &str) -> String {
    let mut out = content.to_string();
    while let Some(start) = out.find(STOP) {
        let Some(mut end) = find_from(&out, CONTINUE, start) else {
            warn!("indexer::stop without indexer::continue, keeping the rest of the page");
            break;
        };
        let mut current = start;
        while let Some(nested) = find_from(&out, STOP, current + STOP.len()) {
            if nested >= end {
                break;
            }
            match find_from(&out, CONTINUE, end + CONTINUE.len()) {
                Some(next) => {
                    end = next;
                    current = nested;
                }
                None => break,
            }
        }
        out.replace_range(start..end + CONTINUE.len(), "");
    }
    out
}

/// Remove `<tag ...>...</tag>` blocks, case-insensitively. An unclosed block stops the
/// stripping for that tag and leaves the content untouched from there on.
fn strip_blocks(content: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = content.to_string();
    loop {
        let lower = out.to_ascii_lowercase();
        let Some(start) = lower.find(&open) else { break };
        let Some(end) = find_from(&lower, &close, start) else {
            warn!(tag, "unclosed block, skipping the rest");
            break;
        };
        out.replace_range(start..end + close.len(), "");
    }
    out
}

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack.get(from..)?.find(needle).map(|i| from + i)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_regions_go_as_one_span() {
        let html = "<!-- indexer::stop -->A<!-- indexer::stop -->B<!-- indexer::continue -->C<!-- indexer::continue -->D";
        assert_eq!(strip_indexer_regions(html), "D");
        assert_eq!(extract(html).body, "D");
    }

    #[test]
    fn sibling_regions_are_removed_separately() {
        let html = "1<!-- indexer::stop -->x<!-- indexer::continue -->2<!-- indexer::stop -->y<!-- indexer::continue -->3";
        assert_eq!(strip_indexer_regions(html), "123");
    }

    #[test]
    fn unterminated_stop_is_left_alone() {
        let html = "keep<!-- indexer::stop -->tail";
        assert_eq!(strip_indexer_regions(html), html);
    }

    #[test]
    fn scripts_and_styles_are_removed() {
        let html = "<p>a</p><SCRIPT>var x = 1;</SCRIPT><style>p{}</style><p>b</p>";
        assert_eq!(extract(html).body, "a b");
    }

    #[test]
    fn unclosed_script_does_not_eat_the_page() {
        let cleaned = strip_blocks("<p>a</p><script>broken", "script");
        assert_eq!(cleaned, "<p>a</p><script>broken");
        let cleaned = strip_blocks("<script>x</script><p>a</p><script>broken", "script");
        assert_eq!(cleaned, "<p>a</p><script>broken");
    }

    #[test]
    fn reads_head_metadata_and_labels() {
        let html = r#"<html><head><title>Home  page</title>
            <meta name="description" content="All about &amp; around">
            <meta name="keywords" content="alpha, beta">
            </head><body><img src="x.png" alt="Logo"><a href="/" title="Start">Go</a>
            <img src="y.png" alt="Logo"><p>Text &lt;here&gt;</p></body></html>"#;
        let page = extract(html);
        assert_eq!(page.title, "Home page");
        assert_eq!(page.description, "All about & around");
        assert_eq!(page.keywords, "alpha, beta Logo, Start");
        assert_eq!(page.body, "Go Text <here>");
        assert!(!page.noindex);
        assert_eq!(page.indexed_text("Home"), "Home All about & around Go Text <here> alpha, beta Logo, Start");
    }

    #[test]
    fn robots_noindex_is_reported() {
        let html = r#"<head><meta name="robots" content="NOINDEX,follow"></head><body>x</body>"#;
        assert!(extract(html).noindex);
    }

    #[test]
    fn filesize_is_in_kib() {
        let html = "a".repeat(2048);
        assert_eq!(extract(&html).filesize, 2.0);
    }
}
