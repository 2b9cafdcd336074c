use std::collections::HashSet;

use regex::Regex;
use scraper::Selector;
use serde_json::Value;
use tracing::debug;

use super::normalize::{clean_fragments, clean_text};
use super::page::{element_text, Page};
use crate::record::MonthTable;

/// Parse a list of CSS paths. Paths are static literals, so a bad one is a bug.
pub fn css(paths: &[&str]) -> Vec<Selector> {
    paths
        .iter()
        .map(|p| Selector::parse(p).unwrap_or_else(|e| panic!("bad selector {p:?}: {e:?}")))
        .collect()
}

pub fn patterns(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("bad pattern {p:?}: {e}")))
        .collect()
}

/// Where a pattern strategy searches.
pub enum Haystack {
    /// Visible text of the whole page.
    Text,
    /// Inline `<script>` payloads (embedded JSON, JS state).
    Scripts,
    /// Text of the first element matching the selector.
    Within(Selector),
}

/// One way of pulling raw fragments for a field out of a page.
pub enum Strategy {
    /// Equivalent selector paths, most specific first. The first path with
    /// any match wins and every matched element contributes one fragment.
    Select(Vec<Selector>),
    /// Like `Select`, but only the first matched element counts.
    SelectFirst(Vec<Selector>),
    /// Attribute values of matched elements, first path with a match wins.
    Attr(Vec<Selector>, &'static str),
    /// Labeled-value patterns, tried in order. Capture group 1 when the
    /// pattern has one, else the whole match.
    Pattern(Vec<Regex>, Haystack),
    /// Closed vocabulary hits in the lower-cased page text, in vocabulary order.
    Keywords(&'static [&'static str]),
    /// The first `n` elements matching a generic selector.
    Positional(Selector, usize),
    /// First string (or list of strings) stored under a key inside a JSON-LD
    /// entity whose `@type` is one of the given types. Other entities
    /// (breadcrumbs, the publishing site) are never searched.
    JsonLd(&'static [&'static str], &'static str),
    /// Page-specific logic that does not fit the kinds above.
    Custom(fn(&Page) -> Vec<String>),
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Select(_) => "select",
            Strategy::SelectFirst(_) => "select-first",
            Strategy::Attr(..) => "attr",
            Strategy::Pattern(..) => "pattern",
            Strategy::Keywords(_) => "keywords",
            Strategy::Positional(..) => "positional",
            Strategy::JsonLd(..) => "json-ld",
            Strategy::Custom(_) => "custom",
        }
    }

    /// Raw, un-normalized fragments. Empty means "no match".
    pub fn fragments(&self, page: &Page) -> Vec<String> {
        match self {
            Strategy::Select(paths) => paths
                .iter()
                .map(|sel| page.texts(sel))
                .find(|hits| !hits.is_empty())
                .unwrap_or_default(),
            Strategy::SelectFirst(paths) => paths
                .iter()
                .find_map(|sel| page.select(sel).next().map(|el| vec![element_text(&el)]))
                .unwrap_or_default(),
            Strategy::Attr(paths, attr) => paths
                .iter()
                .map(|sel| page.attrs(sel, attr))
                .find(|hits| !hits.is_empty())
                .unwrap_or_default(),
            Strategy::Pattern(regexes, haystack) => {
                let owned;
                let text = match haystack {
                    Haystack::Text => page.text(),
                    Haystack::Scripts => page.scripts(),
                    Haystack::Within(sel) => {
                        owned = page.select(sel).next().map(|el| element_text(&el));
                        match &owned {
                            Some(t) => t.as_str(),
                            None => return Vec::new(),
                        }
                    }
                };
                first_capture(regexes, text).into_iter().collect()
            }
            Strategy::Keywords(vocabulary) => keyword_hits(vocabulary, page.text()),
            Strategy::Positional(sel, n) => page.select(sel).take(*n).map(|el| element_text(&el)).collect(),
            Strategy::JsonLd(types, key) => {
                let mut entities = Vec::new();
                for payload in page.json_ld() {
                    typed_entities(payload, types, &mut entities);
                }
                entities
                    .into_iter()
                    .find_map(|entity| json_lookup(entity, key))
                    .unwrap_or_default()
            }
            Strategy::Custom(f) => f(page),
        }
    }
}

/// First pattern that matches wins.
pub fn first_capture(regexes: &[Regex], text: &str) -> Option<String> {
    regexes.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        Some(m.as_str().to_string())
    })
}

/// Vocabulary hits, deduplicated, in vocabulary order, capitalized.
pub fn keyword_hits(vocabulary: &[&str], text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    vocabulary
        .iter()
        .filter(|word| contains_word(&lower, word))
        .map(|word| capitalize(word))
        .collect()
}

/// Whole-word containment, so "mai" does not hit "maison".
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(at, _)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Objects whose `@type` (a string or a list) names one of `types`. A
/// matching object is not searched for nested entities.
fn typed_entities<'v>(value: &'v Value, types: &[&str], out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => {
            let matches = match map.get("@type") {
                Some(Value::String(t)) => types.contains(&t.as_str()),
                Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).any(|t| types.contains(&t)),
                _ => false,
            };
            if matches {
                out.push(value);
            } else {
                map.values().for_each(|v| typed_entities(v, types, out));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| typed_entities(v, types, out)),
        _ => {}
    }
}

fn json_lookup(value: &Value, key: &str) -> Option<Vec<String>> {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key).and_then(json_strings) {
                return Some(found);
            }
            map.values().find_map(|v| json_lookup(v, key))
        }
        Value::Array(items) => items.iter().find_map(|v| json_lookup(v, key)),
        _ => None,
    }
}

fn json_strings(value: &Value) -> Option<Vec<String>> {
    let out: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => return None,
    };
    (!out.is_empty()).then_some(out)
}

/// Run `chain` in declared order; the first strategy yielding any non-empty
/// normalized fragment short-circuits the rest, even if a later one would
/// have matched better.
pub fn first_match(field: &str, chain: &[Strategy], page: &Page) -> Option<Vec<String>> {
    for (i, strategy) in chain.iter().enumerate() {
        let cleaned: Vec<String> = strategy
            .fragments(page)
            .iter()
            .map(|f| clean_text(f))
            .filter(|f| !f.is_empty())
            .collect();
        if !cleaned.is_empty() {
            debug!(field, strategy = strategy.label(), index = i, "field matched");
            return Some(cleaned);
        }
    }
    debug!(field, "no strategy matched, using default");
    None
}

// ── Field declarations ──

/// Scalar text field with a declared default.
pub struct TextField {
    pub name: &'static str,
    pub separator: &'static str,
    pub default: &'static str,
    pub chain: Vec<Strategy>,
}

impl TextField {
    pub fn new(name: &'static str, default: &'static str, chain: Vec<Strategy>) -> Self {
        TextField {
            name,
            separator: " ",
            default,
            chain,
        }
    }

    pub fn joined_by(mut self, separator: &'static str) -> Self {
        self.separator = separator;
        self
    }

    pub fn extract(&self, page: &Page) -> String {
        self.extract_opt(page).unwrap_or_else(|| self.default.to_string())
    }

    /// `None` instead of the default, for callers that chain further fallbacks.
    pub fn extract_opt(&self, page: &Page) -> Option<String> {
        let fragments = first_match(self.name, &self.chain, page)?;
        let text = if self.separator == " " {
            clean_fragments(&fragments)
        } else {
            clean_text(&fragments.join(self.separator))
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Ordered, deduplicated list field. Defaults to empty.
pub struct ListField {
    pub name: &'static str,
    pub cap: Option<usize>,
    pub chain: Vec<Strategy>,
}

impl ListField {
    pub fn new(name: &'static str, chain: Vec<Strategy>) -> Self {
        ListField { name, cap: None, chain }
    }

    pub fn capped(mut self, cap: usize) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn extract(&self, page: &Page) -> Vec<String> {
        let items = first_match(self.name, &self.chain, page).unwrap_or_default();
        let mut out = dedup_preserving_order(items);
        if let Some(cap) = self.cap {
            out.truncate(cap);
        }
        out
    }
}

/// URL field: resolved against the page, `None` when nothing matched.
pub struct UrlField {
    pub name: &'static str,
    pub chain: Vec<Strategy>,
}

impl UrlField {
    pub fn new(name: &'static str, chain: Vec<Strategy>) -> Self {
        UrlField { name, chain }
    }

    pub fn extract(&self, page: &Page) -> Option<String> {
        first_match(self.name, &self.chain, page)?
            .first()
            .and_then(|href| page.resolve(href))
    }
}

pub fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Rows of every candidate table: first cell is the label, the rest are
/// readings. Rows without a label or without any reading are skipped.
pub fn extract_table(candidates: &[Selector], cell: &Selector, page: &Page) -> MonthTable {
    let mut table = MonthTable::new();
    for rows in candidates {
        for row in page.select(rows) {
            let mut cells = row.select(cell).map(|c| clean_text(&element_text(&c)));
            let label = cells.next().unwrap_or_default();
            let readings: Vec<String> = cells.filter(|c| !c.is_empty()).collect();
            if label.is_empty() || readings.is_empty() {
                continue;
            }
            table.insert(label, readings);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><body>
        <div class="intro"><p>Intro courte.</p></div>
        <article><p>Premier paragraphe.</p><p>Second.</p></article>
        <p>Décalage horaire : aucun avec la France. Autre phrase.</p>
        <p>On y va en juillet, parfois en mars, surtout en juillet.</p>
        <table class="meteo">
          <tr><th>Janvier</th><td>5°C</td><td>8°C</td></tr>
          <tr><td></td></tr>
          <tr><th>Février</th></tr>
        </table>
        <script type="application/ld+json">{"@type":"BreadcrumbList","itemListElement":[{"@type":"ListItem","name":"Accueil"}]}</script>
        <script type="application/ld+json">{"@graph":[{"@type":["Restaurant","LocalBusiness"],"name":"Chez X","address":{"streetAddress":"1 rue X"}}]}</script>
        </body></html>"#;

    fn page() -> Page {
        Page::parse("https://example.com/guide", HTML)
    }

    #[test]
    fn earlier_strategy_wins_even_when_later_matches() {
        let chain = vec![
            Strategy::Select(css(&[".intro p"])),
            Strategy::Select(css(&["article p"])),
        ];
        let got = first_match("description", &chain, &page()).unwrap();
        assert_eq!(got, vec!["Intro courte."]);
    }

    #[test]
    fn first_selector_path_with_a_match_wins() {
        let chain = vec![Strategy::Select(css(&[".missing p", "article p", ".intro p"]))];
        let got = first_match("description", &chain, &page()).unwrap();
        assert_eq!(got, vec!["Premier paragraphe.", "Second."]);
    }

    #[test]
    fn empty_fragments_do_not_count_as_a_match() {
        let chain = vec![
            Strategy::Select(css(&["table.meteo td:empty"])),
            Strategy::Select(css(&[".intro p"])),
        ];
        assert_eq!(first_match("x", &chain, &page()).unwrap(), vec!["Intro courte."]);
    }

    #[test]
    fn pattern_returns_labeled_value() {
        let chain = vec![Strategy::Pattern(
            patterns(&[r"(?i)décalage\s+horaire[^.:]*[:.]\s*([^.\n]+)"]),
            Haystack::Text,
        )];
        let got = first_match("decalage", &chain, &page()).unwrap();
        assert_eq!(got, vec!["aucun avec la France"]);
    }

    #[test]
    fn keywords_follow_vocabulary_order() {
        let hits = keyword_hits(&["janvier", "mars", "juillet"], "JUILLET puis mars puis juillet");
        assert_eq!(hits, vec!["Mars", "Juillet"]);
        assert!(keyword_hits(&["mai"], "une maison").is_empty());
    }

    #[test]
    fn positional_takes_first_n() {
        let chain = vec![Strategy::Positional(css(&["p"]).remove(0), 2)];
        let got = first_match("p", &chain, &page()).unwrap();
        assert_eq!(got, vec!["Intro courte.", "Premier paragraphe."]);
    }

    #[test]
    fn json_ld_lookup_descends_into_graph() {
        let chain = vec![Strategy::JsonLd(&["Restaurant"], "streetAddress")];
        assert_eq!(first_match("adresse", &chain, &page()).unwrap(), vec!["1 rue X"]);
    }

    #[test]
    fn json_ld_lookup_skips_other_entity_types() {
        let chain = vec![Strategy::JsonLd(&["Restaurant"], "name")];
        assert_eq!(first_match("nom", &chain, &page()).unwrap(), vec!["Chez X"]);
        let chain = vec![Strategy::JsonLd(&["City"], "name")];
        assert_eq!(first_match("nom", &chain, &page()), None);
    }

    #[test]
    fn text_field_falls_back_to_declared_default() {
        let field = TextField::new("x", "Non spécifié", vec![Strategy::Select(css(&[".nothing"]))]);
        assert_eq!(field.extract(&page()), "Non spécifié");
    }

    #[test]
    fn table_skips_rows_without_label_or_readings() {
        let table = extract_table(&css(&["table.meteo tr"]), &css(&["th, td"]).remove(0), &page());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Janvier"), Some(&["5°C".to_string(), "8°C".to_string()][..]));
    }

    #[test]
    fn list_field_dedups_and_caps() {
        let field = ListField::new("p", vec![Strategy::Custom(|_| {
            vec!["a".into(), "b".into(), "a".into(), "c".into()]
        })])
        .capped(2);
        assert_eq!(field.extract(&page()), vec!["a", "b"]);
    }
}
