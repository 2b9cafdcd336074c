use std::sync::LazyLock;

use regex::Regex;
use scraper::Selector;

use super::normalize::clean_text;
use super::page::Page;
use super::strategy::{
    css, extract_table, patterns, Haystack, ListField, Strategy, TextField, UrlField,
};
use crate::record::{MonthTable, PracticalInfo, NO_DESCRIPTION, UNSPECIFIED};

pub const MONTHS: &[&str] = &[
    "janvier", "février", "mars", "avril", "mai", "juin",
    "juillet", "août", "septembre", "octobre", "novembre", "décembre",
];

/// Schema.org types a city guide page describes the destination with.
const PLACE_TYPES: &[&str] = &["City", "Place", "TouristDestination", "AdministrativeArea"];

/// Every city field as extracted, defaults already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CityFields {
    pub country: String,
    pub description: String,
    pub about: String,
    pub best_season: String,
    pub when_to_go: String,
    pub utc_offset: String,
    pub flight_duration: String,
    pub temperatures: MonthTable,
    pub map_url: Option<String>,
    pub practical_info: PracticalInfo,
    pub attractions: Vec<String>,
}

static COUNTRY: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "pays",
        UNSPECIFIED,
        vec![
            Strategy::Custom(country_from_breadcrumb),
            Strategy::Custom(country_from_title),
        ],
    )
});

static DESCRIPTION: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "description",
        NO_DESCRIPTION,
        vec![
            Strategy::Select(css(&[
                ".description p",
                ".intro-text p",
                ".chapo",
                r#"div[itemprop="description"]"#,
                ".content-intro p",
                "article p:first-of-type",
            ])),
            Strategy::JsonLd(PLACE_TYPES, "description"),
            Strategy::Attr(css(&[r#"meta[name="description"]"#]), "content"),
            Strategy::Positional(css(&["p"]).remove(0), 3),
        ],
    )
});

static ABOUT: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "a_propos",
        UNSPECIFIED,
        vec![Strategy::Select(css(&[
            "#a-propos",
            ".about-section",
            r#"section[class*="about"]"#,
        ]))],
    )
});

static BEST_SEASON: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "meilleure_saison",
        UNSPECIFIED,
        vec![
            Strategy::Pattern(
                patterns(&[
                    r"(?i)meilleure(?:\s+période|\s+saison)[^.:]*[:.]\s*([^.\n–—]+)",
                    r"(?i)quand\s+partir[^.:]*[:.]\s*([^.\n–—]+)",
                    r"(?i)période\s+idéale[^.:]*[:.]\s*([^.\n–—]+)",
                ]),
                Haystack::Text,
            ),
            Strategy::Keywords(MONTHS),
        ],
    )
    .joined_by(", ")
});

static WHEN_TO_GO: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "quand_partir",
        UNSPECIFIED,
        vec![Strategy::Select(css(&[
            "#quand-partir",
            ".when-to-go",
            r#"section[class*="quand"]"#,
        ]))],
    )
});

static UTC_OFFSET: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "decalage_horaire",
        UNSPECIFIED,
        vec![
            Strategy::Pattern(
                patterns(&[
                    r"(?i)décalage\s+horaire[^.:]*[:.]\s*([^.\n–—]+)",
                    r"(?i)fuseau\s+horaire[^.:]*[:.]\s*([^.\n–—]+)",
                    r"(?i)GMT\s*[+-]\s*\d+",
                    r"(?i)UTC\s*[+-]\s*\d+",
                ]),
                Haystack::Text,
            ),
            Strategy::Pattern(
                patterns(&[r#""(?:timezone|utcOffset)"\s*:\s*"([^"]+)""#]),
                Haystack::Scripts,
            ),
        ],
    )
});

static FLIGHT_DURATION: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "duree_vol",
        UNSPECIFIED,
        vec![Strategy::Pattern(
            patterns(&[
                r"(?i)durée\s+(?:de\s+)?vol[^.:]*[:.]\s*([^.\n–—]+)",
                r"(?i)temps\s+de\s+vol[^.:]*[:.]\s*([^.\n–—]+)",
                r"(?i)(\d+\s*h\s*\d*)\s*(?:de\s+vol|en\s+avion)",
            ]),
            Haystack::Text,
        )],
    )
});

static MAP_URL: LazyLock<UrlField> = LazyLock::new(|| {
    UrlField::new(
        "carte",
        vec![
            // Brittle: first entry of the guide navigation menu.
            Strategy::Attr(
                css(&["#rtd-guide-pa-nav > ul > li:nth-child(1) > a"]),
                "data-modified-href",
            ),
            Strategy::Attr(
                css(&[
                    r#"img[alt*="carte"]"#,
                    r#"img[alt*="map"]"#,
                    ".map img",
                    "#map img",
                ]),
                "src",
            ),
            Strategy::Attr(css(&[r#"iframe[src*="google.com/maps"]"#]), "src"),
        ],
    )
});

static ATTRACTIONS: LazyLock<ListField> = LazyLock::new(|| {
    ListField::new(
        "que_voir",
        vec![
            Strategy::Select(css(&[
                "#que-voir li",
                ".attractions li",
                ".top-sites li",
                r#"section[class*="voir"] li"#,
            ])),
            Strategy::Positional(css(&["article h3, article h4"]).remove(0), 10),
        ],
    )
});

static TEMPERATURE_ROWS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| css(&["table.meteo tr", "table.climat tr", ".weather-table tr"]));
static TEMPERATURE_CELLS: LazyLock<Selector> = LazyLock::new(|| css(&["th, td"]).remove(0));

// ── Practical info ──

static PRACTICAL_ITEMS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| css(&[".infos-pratiques li", ".practical-info li"]));

/// (key, labeled-value pattern) per practical-info slot, in slot order.
static PRACTICAL_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("monnaie", r"(?i)monnaie[^.:]*[:.]\s*([^.\n–—]+)"),
        ("langue", r"(?i)langues?[^.:]*[:.]\s*([^.\n–—]+)"),
        ("visa", r"(?i)visa[^.:]*[:.]\s*([^.\n–—]+)"),
        ("electricite", r"(?i)électricité[^.:]*[:.]\s*([^.\n–—]+)"),
        ("telephone", r"(?i)indicatif[^.:]*[:.]\s*([^.\n–—]+)"),
    ]
    .into_iter()
    .map(|(key, re)| (key, patterns(&[re]).remove(0)))
    .collect()
});

pub fn extract(page: &Page) -> CityFields {
    CityFields {
        country: COUNTRY.extract(page),
        description: DESCRIPTION.extract(page),
        about: ABOUT.extract(page),
        best_season: BEST_SEASON.extract(page),
        when_to_go: WHEN_TO_GO.extract(page),
        utc_offset: UTC_OFFSET.extract(page),
        flight_duration: FLIGHT_DURATION.extract(page),
        temperatures: extract_table(&TEMPERATURE_ROWS, &TEMPERATURE_CELLS, page),
        map_url: MAP_URL.extract(page),
        practical_info: extract_practical_info(page),
        attractions: ATTRACTIONS.extract(page),
    }
}

fn country_from_breadcrumb(page: &Page) -> Vec<String> {
    static CRUMBS: LazyLock<Selector> = LazyLock::new(|| css(&[".breadcrumb a"]).remove(0));
    let crumbs = page.texts(&CRUMBS);
    if crumbs.len() >= 2 {
        vec![crumbs[crumbs.len() - 2].clone()]
    } else {
        Vec::new()
    }
}

fn country_from_title(page: &Page) -> Vec<String> {
    static H1: LazyLock<Selector> = LazyLock::new(|| css(&["h1"]).remove(0));
    page.texts(&H1)
        .into_iter()
        .next()
        .and_then(|title| title.rsplit_once(',').map(|(_, country)| country.to_string()))
        .into_iter()
        .collect()
}

/// Structured "Key: value" list items first, then labeled patterns over the
/// page text for the slots still empty.
fn extract_practical_info(page: &Page) -> PracticalInfo {
    let mut info = PracticalInfo::default();

    if let Some(items) = PRACTICAL_ITEMS
        .iter()
        .map(|sel| page.texts(sel))
        .find(|items| !items.is_empty())
    {
        for item in items {
            let Some((key, value)) = item.split_once(':') else {
                continue;
            };
            let key = clean_text(key).to_lowercase();
            let value = clean_text(value);
            if value.is_empty() {
                continue;
            }
            if let Some(slot) = info.slot_mut(&key) {
                slot.get_or_insert(value);
            }
        }
    }

    for (key, re) in PRACTICAL_PATTERNS.iter() {
        let Some(slot) = info.slot_mut(key) else {
            continue;
        };
        if slot.is_some() {
            continue;
        }
        if let Some(value) = re
            .captures(page.text())
            .and_then(|c| c.get(1))
            .map(|m| clean_text(m.as_str()))
            .filter(|v| !v.is_empty())
        {
            *slot = Some(value);
        }
    }

    info
}
