use std::sync::LazyLock;

use regex::Regex;

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\u{00A0}\u{2007}\u{202F}]+").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^<>]*>").unwrap());
static CONTROL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0E-\x1F\x7F\u{200B}\u{FEFF}]").unwrap());

/// UTF-8 text that was decoded as Latin-1 somewhere upstream.
const MOJIBAKE: &[(&str, &str)] = &[
    ("Ã©", "é"),
    ("Ã¨", "è"),
    ("Ãª", "ê"),
    ("Ã«", "ë"),
    ("Ã ", "à"),
    ("Ã¢", "â"),
    ("Ã§", "ç"),
    ("Ã®", "î"),
    ("Ã¯", "ï"),
    ("Ã´", "ô"),
    ("Ã»", "û"),
    ("Ã¹", "ù"),
    ("Ã‰", "É"),
    ("â€™", "’"),
    ("â€œ", "“"),
    ("â€“", "–"),
    ("â€”", "—"),
    ("Â°", "°"),
    ("â‚¬", "€"),
];

/// Canonicalize one blob of text, markup, or escaped-JSON string content.
///
/// Whitespace runs (NBSP included) become one space, the ends are trimmed,
/// tags are dropped and entities decoded. The passes repeat until nothing
/// changes, so `clean_text(&clean_text(x)) == clean_text(x)`. Escaped
/// markup is therefore decoded and then stripped as a tag: `"a &lt; b &gt; c"`
/// becomes `"a c"`. That loss is accepted; scraped fields never carry
/// literal angle-bracket pairs worth keeping.
pub fn clean_text(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = clean_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Join fragments with a single space, then clean.
pub fn clean_fragments<S: AsRef<str>>(fragments: &[S]) -> String {
    let joined = fragments
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" ");
    clean_text(&joined)
}

fn clean_pass(text: &str) -> String {
    let repaired = repair_mojibake(text);
    let visible = CONTROL_RE.replace_all(&repaired, "");
    let collapsed = WHITESPACE_RE.replace_all(&visible, " ");
    let stripped = TAG_RE.replace_all(collapsed.trim(), "");
    html_escape::decode_html_entities(&stripped).into_owned()
}

fn repair_mojibake(text: &str) -> String {
    // Every marker starts with Ã, â or Â.
    if !text.contains(['Ã', 'â', 'Â']) {
        return text.to_string();
    }
    MOJIBAKE
        .iter()
        .fold(text.to_string(), |acc, (bad, good)| acc.replace(bad, good))
}
