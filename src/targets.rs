use tracing::info;

use crate::db::{Meta, PageKind};

/// City guide pages, keyed by capital name as stored.
pub const CAPITALS: &[(&str, &str)] = &[
    ("Dublin", "https://www.routard.com/fr/guide/europe/irlande/dublin"),
    ("Paris", "https://www.routard.com/fr/guide/europe/france/paris"),
    ("Londres", "https://www.routard.com/fr/guide/europe/royaume-uni/londres"),
    ("Berlin", "https://www.routard.com/fr/guide/europe/allemagne/berlin"),
    ("Madrid", "https://www.routard.com/fr/guide/europe/espagne/madrid"),
    ("Rome", "https://www.routard.com/fr/guide/europe/italie/rome"),
    ("Lisbonne", "https://www.routard.com/fr/guide/europe/portugal/lisbonne"),
    ("Amsterdam", "https://www.routard.com/fr/guide/europe/pays-bas/amsterdam"),
    ("Bruxelles", "https://www.routard.com/fr/guide/europe/belgique/bruxelles"),
    ("Vienne", "https://www.routard.com/fr/guide/europe/autriche/vienne"),
    ("Prague", "https://www.routard.com/fr/guide/europe/republique-tcheque/prague"),
    ("Budapest", "https://www.routard.com/fr/guide/europe/hongrie/budapest"),
    ("Varsovie", "https://www.routard.com/fr/guide/europe/pologne/varsovie"),
    ("Copenhague", "https://www.routard.com/fr/guide/europe/danemark/copenhague"),
    ("Stockholm", "https://www.routard.com/fr/guide/europe/suede/stockholm"),
    ("Helsinki", "https://www.routard.com/fr/guide/europe/finlande/helsinki"),
    ("Oslo", "https://www.routard.com/fr/guide/europe/norvege/oslo"),
    ("Athènes", "https://www.routard.com/fr/guide/europe/grece/athenes"),
    ("Bucarest", "https://www.routard.com/fr/guide/europe/roumanie/bucarest"),
    ("Sofia", "https://www.routard.com/fr/guide/europe/bulgarie/sofia"),
];

pub const RESTAURANT_LISTINGS: &[&str] = &[
    "https://guide.michelin.com/fr/fr/ile-de-france/paris/restaurants",
    "https://guide.michelin.com/fr/fr/comunidad-de-madrid/madrid/restaurants",
    "https://guide.michelin.com/fr/fr/lazio/roma/restaurants",
    "https://guide.michelin.com/fr/fr/lisboa-region/lisboa/restaurants",
    "https://guide.michelin.com/fr/fr/berlin-region/berlin/restaurants",
    "https://guide.michelin.com/fr/fr/noord-holland/amsterdam/restaurants",
    "https://guide.michelin.com/fr/fr/vienna/restaurants",
    "https://guide.michelin.com/fr/fr/bruxelles-capitale/bruxelles/restaurants",
    "https://guide.michelin.com/fr/fr/prague/restaurants",
    "https://guide.michelin.com/fr/fr/dublin/dublin/restaurants",
];

/// Listing URL fragment → capital name.
const LISTING_CITIES: &[(&str, &str)] = &[
    ("paris", "Paris"),
    ("madrid", "Madrid"),
    ("roma", "Rome"),
    ("lisboa", "Lisbonne"),
    ("berlin", "Berlin"),
    ("amsterdam", "Amsterdam"),
    ("vienna", "Vienne"),
    ("bruxelles", "Bruxelles"),
    ("prague", "Prague"),
    ("dublin", "Dublin"),
];

/// A queue entry to seed: url, kind, crawl meta.
pub type Seed = (String, PageKind, Meta);

/// The capital a restaurant listing belongs to, by URL fragment.
pub fn city_for_listing(url: &str) -> Option<&'static str> {
    let lower = url.to_lowercase();
    LISTING_CITIES
        .iter()
        .find(|(fragment, _)| lower.contains(fragment))
        .map(|(_, city)| *city)
}

/// Every catalogue URL as a queue seed. City pages carry their capital name,
/// listings carry the capital resolved from the URL (absent when unknown).
pub fn seeds() -> Vec<Seed> {
    let mut seeds: Vec<Seed> = CAPITALS
        .iter()
        .map(|(name, url)| {
            let mut meta = Meta::new();
            meta.insert("name".into(), (*name).into());
            (url.to_string(), PageKind::City, meta)
        })
        .collect();

    seeds.extend(RESTAURANT_LISTINGS.iter().map(|url| {
        let mut meta = Meta::new();
        if let Some(city) = city_for_listing(url) {
            meta.insert("city".into(), city.into());
        }
        (url.to_string(), PageKind::Listing, meta)
    }));

    info!(
        "Catalogue: {} capitals, {} restaurant listings",
        CAPITALS.len(),
        RESTAURANT_LISTINGS.len()
    );
    seeds
}
