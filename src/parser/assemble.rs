use chrono::{DateTime, Utc};

use super::city::CityFields;
use super::normalize::clean_text;
use super::restaurant::RestaurantFields;
use crate::record::{CityRecord, PriceTier, Provenance, RestaurantRecord, CITY_SOURCE, RESTAURANT_SOURCE};

/// Crawl context a restaurant detail page inherits from its listing card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestaurantContext {
    pub city: String,
    pub listing_name: Option<String>,
    pub listing_tier: PriceTier,
}

/// Every field is set; missing extractions already carry their defaults.
pub fn city_record(name: &str, url: &str, fields: CityFields, fetched_at: DateTime<Utc>) -> CityRecord {
    CityRecord {
        name: clean_text(name),
        country: fields.country,
        url: url.to_string(),
        description: fields.description,
        about: fields.about,
        best_season: fields.best_season,
        when_to_go: fields.when_to_go,
        utc_offset: fields.utc_offset,
        flight_duration: fields.flight_duration,
        temperatures: fields.temperatures,
        map_url: fields.map_url,
        practical_info: fields.practical_info,
        attractions: fields.attractions,
        provenance: Provenance {
            fetched_at,
            source: CITY_SOURCE.to_string(),
        },
    }
}

/// The detail title wins over the listing name, which wins over the JSON-LD
/// name. The listing price wins over the detail page, which often omits it.
pub fn restaurant_record(
    ctx: &RestaurantContext,
    url: &str,
    fields: RestaurantFields,
    fetched_at: DateTime<Utc>,
) -> RestaurantRecord {
    let name = fields
        .name
        .or_else(|| ctx.listing_name.clone())
        .or(fields.structured_name)
        .unwrap_or_default();
    let price_tier = match ctx.listing_tier {
        PriceTier::Unspecified => fields.price_tier,
        tier => tier,
    };

    RestaurantRecord {
        name: clean_text(&name),
        city: clean_text(&ctx.city),
        address: fields.address,
        cuisine: fields.cuisine,
        description: fields.description,
        price_tier,
        phone: fields.phone,
        website: fields.website,
        images: fields.images,
        url: url.to_string(),
        provenance: Provenance {
            fetched_at,
            source: RESTAURANT_SOURCE.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::page::Page;
    use crate::parser::{city, restaurant};
    use crate::record::{NO_DESCRIPTION, UNSPECIFIED};

    fn bare() -> Page {
        Page::parse("https://example.com/x", "<html><body></body></html>")
    }

    #[test]
    fn bare_city_page_still_has_every_field() {
        let now = Utc::now();
        let rec = city_record(" Oslo ", "https://example.com/x", city::extract(&bare()), now);
        assert_eq!(rec.name, "Oslo");
        assert_eq!(rec.description, NO_DESCRIPTION);
        assert_eq!(rec.country, UNSPECIFIED);
        assert_eq!(rec.best_season, UNSPECIFIED);
        assert!(rec.temperatures.is_empty());
        assert!(rec.practical_info.is_empty());
        assert!(rec.attractions.is_empty());
        assert_eq!(rec.provenance.source, CITY_SOURCE);
        assert_eq!(rec.provenance.fetched_at, now);

        let json = serde_json::to_value(&rec).unwrap();
        for key in [
            "capitale", "pays", "url", "description", "a_propos", "meilleure_saison",
            "quand_partir", "decalage_horaire", "duree_vol", "temperatures", "carte",
            "infos_pratiques", "que_voir", "date_scraping", "source",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn restaurant_falls_back_to_listing_context() {
        let ctx = RestaurantContext {
            city: "Paris".into(),
            listing_name: Some("Chez Marcel".into()),
            listing_tier: PriceTier::Tier(2),
        };
        let rec = restaurant_record(&ctx, "https://example.com/x", restaurant::extract_detail(&bare()), Utc::now());
        assert_eq!(rec.name, "Chez Marcel");
        assert_eq!(rec.city, "Paris");
        assert_eq!(rec.price_tier, PriceTier::Tier(2));
        assert_eq!(rec.address, UNSPECIFIED);
        assert_eq!(rec.website, None);
        assert_eq!(rec.provenance.source, RESTAURANT_SOURCE);

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["prix_niveau"], 2);
        assert!(json["site_web"].is_null());
    }

    #[test]
    fn detail_title_beats_listing_name() {
        let page = Page::parse(
            "https://example.com/x",
            r#"<html><body><h1 class="data-sheet__title">Le Vrai Nom</h1></body></html>"#,
        );
        let ctx = RestaurantContext {
            city: "Rome".into(),
            listing_name: Some("Ancien Nom".into()),
            listing_tier: PriceTier::Unspecified,
        };
        let rec = restaurant_record(&ctx, "https://example.com/x", restaurant::extract_detail(&page), Utc::now());
        assert_eq!(rec.name, "Le Vrai Nom");
        assert_eq!(rec.price_tier, PriceTier::Unspecified);
    }

    #[test]
    fn breadcrumb_json_ld_never_names_a_restaurant() {
        let page = Page::parse(
            "https://example.com/x",
            r#"<html><head>
            <script type="application/ld+json">{"@type":"BreadcrumbList","itemListElement":[{"@type":"ListItem","position":1,"name":"Guide MICHELIN"}]}</script>
            <script type="application/ld+json">{"@type":"Restaurant","name":"Le Petit Zinc (JSON)"}</script>
            </head><body></body></html>"#,
        );
        let mut ctx = RestaurantContext {
            city: "Paris".into(),
            listing_name: Some("Le Petit Zinc".into()),
            listing_tier: PriceTier::Tier(1),
        };
        let rec = restaurant_record(&ctx, "https://example.com/x", restaurant::extract_detail(&page), Utc::now());
        assert_eq!(rec.name, "Le Petit Zinc");

        ctx.listing_name = None;
        let rec = restaurant_record(&ctx, "https://example.com/x", restaurant::extract_detail(&page), Utc::now());
        assert_eq!(rec.name, "Le Petit Zinc (JSON)");
    }
}
