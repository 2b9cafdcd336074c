pub mod assemble;
pub mod city;
pub mod normalize;
pub mod page;
pub mod restaurant;
pub mod strategy;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::db::{Meta, PageKind};
use crate::record::{CityRecord, PriceTier, RestaurantRecord};
use assemble::RestaurantContext;
use page::Page;
use restaurant::ListingCard;

pub enum Parsed {
    City(CityRecord),
    Listing(Vec<ListingCard>),
    Restaurant(RestaurantRecord),
}

/// Body → record (or listing cards). Pure apart from the provided timestamp.
pub fn process_page(url: &str, kind: PageKind, meta: &Meta, body: &str, fetched_at: DateTime<Utc>) -> Parsed {
    let page = Page::parse(url, body);
    if !page.has_body() {
        warn!(url, kind = kind.as_str(), "page has no text, fields fall back to defaults");
    }
    match kind {
        PageKind::City => {
            let name = meta_str(meta, "name").unwrap_or_default();
            Parsed::City(assemble::city_record(name, url, city::extract(&page), fetched_at))
        }
        PageKind::Listing => Parsed::Listing(restaurant::extract_listing(&page)),
        PageKind::Restaurant => {
            let ctx = restaurant_context(meta);
            Parsed::Restaurant(assemble::restaurant_record(
                &ctx,
                url,
                restaurant::extract_detail(&page),
                fetched_at,
            ))
        }
    }
}

/// Detail pages to queue for a listing: the `limit` cheapest cards with a
/// link, each carrying its city, name and listing price.
pub fn follow_ups(listing_meta: &Meta, cards: Vec<ListingCard>, limit: usize) -> Vec<(String, Meta)> {
    let city = meta_str(listing_meta, "city").unwrap_or_default();
    restaurant::cheapest(cards.into_iter().filter(|c| c.detail_url.is_some()).collect(), limit)
        .into_iter()
        .filter_map(|card| {
            let url = card.detail_url?;
            let mut meta = Meta::new();
            meta.insert("city".into(), city.into());
            meta.insert("name".into(), card.name.into());
            meta.insert("price_tier".into(), card.price_tier.code().into());
            meta.insert("price".into(), card.price_text.into());
            Some((url, meta))
        })
        .collect()
}

fn restaurant_context(meta: &Meta) -> RestaurantContext {
    RestaurantContext {
        city: meta_str(meta, "city").unwrap_or_default().to_string(),
        listing_name: meta_str(meta, "name").map(str::to_string),
        listing_tier: meta
            .get("price_tier")
            .and_then(Value::as_i64)
            .map(PriceTier::from_code)
            .unwrap_or_default(),
    }
}

fn meta_str<'m>(meta: &'m Meta, key: &str) -> Option<&'m str> {
    meta.get(key).and_then(Value::as_str)
}
