use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static SCRIPT: LazyLock<Selector> = LazyLock::new(|| Selector::parse("script").unwrap());
static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

const HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "br", "caption", "dd", "div", "dl", "dt",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "head", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "title", "tr", "ul",
];

/// A fetched document plus the derived haystacks the strategies search.
pub struct Page {
    pub url: String,
    doc: Html,
    text: String,
    scripts: String,
    json_ld: Vec<Value>,
}

impl Page {
    pub fn parse(url: &str, body: &str) -> Self {
        let doc = Html::parse_document(body);
        let text = visible_text(&doc);
        let scripts = doc
            .select(&SCRIPT)
            .map(|s| s.text().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n");
        let json_ld = doc
            .select(&JSON_LD)
            .filter_map(|s| serde_json::from_str(&s.text().collect::<String>()).ok())
            .collect();

        Page {
            url: url.to_string(),
            doc,
            text,
            scripts,
            json_ld,
        }
    }

    /// Visible text, one line per block element.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Concatenated inline script payloads.
    pub fn scripts(&self) -> &str {
        &self.scripts
    }

    pub fn json_ld(&self) -> &[Value] {
        &self.json_ld
    }

    pub fn select<'a>(&'a self, selector: &'a Selector) -> impl Iterator<Item = ElementRef<'a>> + 'a {
        self.doc.select(selector)
    }

    /// Text content of every element matching `selector`.
    pub fn texts(&self, selector: &Selector) -> Vec<String> {
        self.doc.select(selector).map(|el| element_text(&el)).collect()
    }

    pub fn attrs(&self, selector: &Selector, attr: &str) -> Vec<String> {
        self.doc
            .select(selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect()
    }

    /// Resolve `href` against the page URL.
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        match Url::parse(&self.url) {
            Ok(base) => base.join(href).ok().map(String::from),
            Err(_) => Some(href.to_string()),
        }
    }

    pub fn has_body(&self) -> bool {
        self.doc.select(&BODY).next().is_some() && !self.text.trim().is_empty()
    }
}

/// Text nodes of an element joined by spaces.
pub fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    push_text(doc.root_element(), &mut out);
    end_line(&mut out);
    out
}

/// Text inside inline markup flows on one line; block elements end it.
fn push_text(el: ElementRef, out: &mut String) {
    for child in el.children() {
        if let Some(text) = child.value().as_text() {
            out.extend(text.chars().map(|c| if c.is_whitespace() { ' ' } else { c }));
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if HIDDEN_TAGS.contains(&name) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block {
                end_line(out);
            }
            push_text(child, out);
            if block {
                end_line(out);
            }
        }
    }
}

fn end_line(out: &mut String) {
    let kept = out.trim_end_matches(' ').len();
    out.truncate(kept);
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><head>
        <script>var x = "hidden";</script>
        <script type="application/ld+json">{"@type":"Restaurant","telephone":"+33 1 23"}</script>
        </head><body><h1>Titre</h1><p>Un <b>texte</b></p><style>.a{}</style></body></html>"#;

    #[test]
    fn visible_text_skips_scripts_and_styles() {
        let page = Page::parse("https://example.com/a/b", HTML);
        assert!(page.text().contains("Titre"));
        assert!(page.text().contains("texte"));
        assert!(!page.text().contains("hidden"));
        assert!(!page.text().contains(".a{}"));
        assert!(page.scripts().contains("hidden"));
    }

    #[test]
    fn inline_markup_stays_on_its_line() {
        let page = Page::parse(
            "https://example.com/",
            "<html><body><p>Décalage horaire : <strong>aucun</strong> avec\n la France.</p>\
             <p>Durée de vol : environ <b>2h30</b> depuis Paris.</p></body></html>",
        );
        let lines: Vec<&str> = page.text().lines().collect();
        assert_eq!(
            lines,
            vec![
                "Décalage horaire : aucun avec  la France.",
                "Durée de vol : environ 2h30 depuis Paris.",
            ]
        );
    }

    #[test]
    fn parses_json_ld_payloads() {
        let page = Page::parse("https://example.com/", HTML);
        assert_eq!(page.json_ld().len(), 1);
        assert_eq!(page.json_ld()[0]["telephone"], "+33 1 23");
    }

    #[test]
    fn resolves_relative_links() {
        let page = Page::parse("https://example.com/a/b", HTML);
        assert_eq!(page.resolve("/c").as_deref(), Some("https://example.com/c"));
        assert_eq!(page.resolve("d").as_deref(), Some("https://example.com/a/d"));
        assert_eq!(page.resolve("  "), None);
    }
}
