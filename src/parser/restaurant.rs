use std::sync::LazyLock;

use scraper::Selector;

use super::normalize::clean_text;
use super::page::{element_text, Page};
use super::strategy::{css, dedup_preserving_order, patterns, Haystack, ListField, Strategy, TextField, UrlField};
use crate::record::{PriceTier, MAX_IMAGES, UNSPECIFIED};

/// One restaurant card on a city listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingCard {
    pub name: String,
    pub detail_url: Option<String>,
    pub price_text: String,
    pub price_tier: PriceTier,
}

/// Schema.org types a restaurant detail page describes itself with.
const RESTAURANT_TYPES: &[&str] = &["Restaurant", "FoodEstablishment", "LocalBusiness"];

/// Detail-page fields, defaults applied except for the name. The page title
/// comes first, then the listing card name from the crawl meta, then the
/// JSON-LD name.
#[derive(Debug, Clone, PartialEq)]
pub struct RestaurantFields {
    pub name: Option<String>,
    pub structured_name: Option<String>,
    pub address: String,
    pub cuisine: String,
    pub description: String,
    pub price_tier: PriceTier,
    pub phone: String,
    pub website: Option<String>,
    pub images: Vec<String>,
}

static CARD: LazyLock<Selector> = LazyLock::new(|| css(&["div.card__menu"]).remove(0));
static CARD_TITLE_LINK: LazyLock<Selector> =
    LazyLock::new(|| css(&["h3.card__menu-content--title a"]).remove(0));
static CARD_TITLE: LazyLock<Selector> =
    LazyLock::new(|| css(&["h3.card__menu-content--title"]).remove(0));
static CARD_PRICE: LazyLock<Selector> =
    LazyLock::new(|| css(&["div.card__menu-footer--price"]).remove(0));

static NAME: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new("nom", "", vec![Strategy::SelectFirst(css(&["h1.data-sheet__title"]))])
});

static STRUCTURED_NAME: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new("nom", "", vec![Strategy::JsonLd(RESTAURANT_TYPES, "name")])
});

static ADDRESS: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "adresse",
        UNSPECIFIED,
        vec![
            Strategy::SelectFirst(css(&["div.data-sheet__block--text"])),
            Strategy::Select(css(&["ul.restaurant-details__heading--list li"])),
            Strategy::JsonLd(RESTAURANT_TYPES, "streetAddress"),
        ],
    )
    .joined_by(", ")
});

static CUISINE: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "type_cuisine",
        UNSPECIFIED,
        vec![
            Strategy::Select(css(&["div.data-sheet__classification--list span"])),
            Strategy::SelectFirst(css(&["div.restaurant-details__classification-item"])),
            Strategy::Pattern(
                patterns(&[r"([Cc]uisine\s+\w+)"]),
                Haystack::Within(css(&["div.data-sheet__description"]).remove(0)),
            ),
            Strategy::JsonLd(RESTAURANT_TYPES, "servesCuisine"),
        ],
    )
    .joined_by(", ")
});

static DESCRIPTION: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "description",
        UNSPECIFIED,
        vec![
            Strategy::Select(css(&["div.data-sheet__description"])),
            Strategy::SelectFirst(css(&["div.restaurant-details__description p"])),
            Strategy::Attr(css(&[r#"meta[name="description"]"#]), "content"),
            Strategy::JsonLd(RESTAURANT_TYPES, "description"),
        ],
    )
});

static PHONE: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "telephone",
        UNSPECIFIED,
        vec![
            Strategy::SelectFirst(css(&[
                r#"a[href^="tel:"]"#,
                r#"div.data-sheet__block--text a[data-dtm*="phone"]"#,
            ])),
            Strategy::JsonLd(RESTAURANT_TYPES, "telephone"),
        ],
    )
});

static PRICE: LazyLock<TextField> = LazyLock::new(|| {
    TextField::new(
        "prix",
        "",
        vec![
            Strategy::Custom(price_labels),
            Strategy::JsonLd(RESTAURANT_TYPES, "priceRange"),
        ],
    )
});

static WEBSITE: LazyLock<UrlField> = LazyLock::new(|| {
    UrlField::new(
        "site_web",
        vec![Strategy::Attr(
            css(&[
                r#"a.data-sheet__block--text[href^="http"]"#,
                r#"a[data-event*="CTA_website"]"#,
            ]),
            "href",
        )],
    )
});

static IMAGES: LazyLock<ListField> = LazyLock::new(|| {
    ListField::new(
        "images",
        vec![
            Strategy::Custom(gallery_images),
            Strategy::Attr(css(&["img.restaurant-details__image"]), "src"),
            Strategy::JsonLd(RESTAURANT_TYPES, "image"),
        ],
    )
    .capped(MAX_IMAGES)
});

/// Cards in page order. Cards without any name are dropped.
pub fn extract_listing(page: &Page) -> Vec<ListingCard> {
    page.select(&CARD)
        .filter_map(|card| {
            let name = card
                .select(&CARD_TITLE_LINK)
                .next()
                .or_else(|| card.select(&CARD_TITLE).next())
                .map(|el| clean_text(&element_text(&el)))
                .filter(|n| !n.is_empty())?;
            let detail_url = card
                .select(&CARD_TITLE_LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| page.resolve(href));
            let price_text = card
                .select(&CARD_PRICE)
                .next()
                .map(|el| clean_text(&element_text(&el)))
                .unwrap_or_default();
            let price_tier = PriceTier::from_price_text(Some(&price_text));
            Some(ListingCard {
                name,
                detail_url,
                price_text,
                price_tier,
            })
        })
        .collect()
}

/// The `limit` cheapest cards, unspecified prices last. Ties keep page order.
pub fn cheapest(mut cards: Vec<ListingCard>, limit: usize) -> Vec<ListingCard> {
    cards.sort_by_key(|c| c.price_tier);
    cards.truncate(limit);
    cards
}

pub fn extract_detail(page: &Page) -> RestaurantFields {
    RestaurantFields {
        name: NAME.extract_opt(page),
        structured_name: STRUCTURED_NAME.extract_opt(page),
        address: ADDRESS.extract(page),
        cuisine: CUISINE.extract(page),
        description: DESCRIPTION.extract(page),
        price_tier: PriceTier::from_price_text(PRICE.extract_opt(page).as_deref()),
        phone: PHONE.extract(page),
        website: WEBSITE.extract(page),
        images: IMAGES
            .extract(page)
            .into_iter()
            .filter_map(|src| page.resolve(&src))
            .collect(),
    }
}

/// The first data-sheet block carrying a euro sign, e.g. "€€ · Cuisine moderne".
fn price_labels(page: &Page) -> Vec<String> {
    static BLOCK: LazyLock<Selector> = LazyLock::new(|| css(&["div.data-sheet__block--text"]).remove(0));
    page.texts(&BLOCK).into_iter().find(|t| t.contains('€')).into_iter().collect()
}

/// Carousel, gallery attribute and lazy-loaded backgrounds, accumulated.
fn gallery_images(page: &Page) -> Vec<String> {
    static CAROUSEL: LazyLock<Selector> =
        LazyLock::new(|| css(&["div.gallery-mosaic__carousel img"]).remove(0));
    static GALLERY: LazyLock<Selector> = LazyLock::new(|| css(&["div.icon-box img"]).remove(0));
    static LAZY: LazyLock<Selector> = LazyLock::new(|| css(&["img[ci-bg-url]"]).remove(0));

    let mut images = page.attrs(&CAROUSEL, "data-src");
    if images.is_empty() {
        images = page.attrs(&CAROUSEL, "src");
    }
    if let Some(gallery) = page.attrs(&GALLERY, "data-gallery-image").first() {
        images.extend(gallery.split(',').map(|s| s.trim().to_string()));
    }
    images.extend(page.attrs(&LAZY, "ci-bg-url"));

    dedup_preserving_order(images.into_iter().filter(|i| !i.trim().is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Page {
        Page::parse(
            "https://guide.michelin.com/fr/fr/ile-de-france/paris/restaurants",
            include_str!("../../tests/fixtures/listing_paris.html"),
        )
    }

    fn detail() -> Page {
        Page::parse(
            "https://guide.michelin.com/fr/fr/ile-de-france/paris/restaurant/le-petit-zinc",
            include_str!("../../tests/fixtures/restaurant_detail.html"),
        )
    }

    #[test]
    fn listing_cards_with_resolved_urls() {
        let cards = extract_listing(&listing());
        assert_eq!(cards.len(), 4);
        assert_eq!(cards[0].name, "Le Grand Salon");
        assert_eq!(cards[0].price_tier, PriceTier::Tier(4));
        assert_eq!(
            cards[1].detail_url.as_deref(),
            Some("https://guide.michelin.com/fr/fr/ile-de-france/paris/restaurant/le-petit-zinc")
        );
        assert_eq!(cards[3].name, "Sans Lien");
        assert_eq!(cards[3].detail_url, None);
        assert_eq!(cards[3].price_tier, PriceTier::Unspecified);
    }

    #[test]
    fn cheapest_sorts_unspecified_last() {
        let names: Vec<String> = cheapest(extract_listing(&listing()), 3)
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Le Petit Zinc", "Chez Marcel", "Le Grand Salon"]);
    }

    #[test]
    fn detail_fields() {
        let f = extract_detail(&detail());
        assert_eq!(f.name.as_deref(), Some("Le Petit Zinc"));
        assert_eq!(f.structured_name.as_deref(), Some("Le Petit Zinc"));
        assert_eq!(f.address, "11 rue Saint-Benoît, 75006 Paris");
        assert_eq!(f.cuisine, "Cuisine traditionnelle, Bistrot");
        assert_eq!(f.description, "Un bistrot Art nouveau au cœur de Saint-Germain.");
        assert_eq!(f.phone, "+33 1 42 86 61 00");
        assert_eq!(f.website.as_deref(), Some("https://www.petitzinc.com/"));
        assert_eq!(f.price_tier, PriceTier::Tier(1));
    }

    #[test]
    fn detail_images_accumulate_and_dedup() {
        let f = extract_detail(&detail());
        assert_eq!(
            f.images,
            vec![
                "https://axwwgrkdco.cloudimg.io/v7/zinc-1.jpg",
                "https://axwwgrkdco.cloudimg.io/v7/zinc-2.jpg",
                "https://axwwgrkdco.cloudimg.io/v7/zinc-3.jpg",
                "https://guide.michelin.com/assets/zinc-4.jpg",
            ]
        );
    }

    #[test]
    fn bare_detail_page_defaults() {
        let page = Page::parse("https://example.com/r", "<html><body></body></html>");
        let f = extract_detail(&page);
        assert_eq!(f.name, None);
        assert_eq!(f.structured_name, None);
        assert_eq!(f.address, UNSPECIFIED);
        assert_eq!(f.cuisine, UNSPECIFIED);
        assert_eq!(f.description, UNSPECIFIED);
        assert_eq!(f.phone, UNSPECIFIED);
        assert_eq!(f.price_tier, PriceTier::Unspecified);
        assert_eq!(f.website, None);
        assert!(f.images.is_empty());
    }

    #[test]
    fn cuisine_pattern_inside_description() {
        let page = Page::parse(
            "https://example.com/r",
            r#"<html><body><div class="data-sheet__description">Une cuisine créative et de saison.</div></body></html>"#,
        );
        assert_eq!(extract_detail(&page).cuisine, "cuisine créative");
    }
}
