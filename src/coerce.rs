//! Loosely typed JSON records (feed exports, hand-edited files) into typed
//! records. Missing or falsy fields take the same defaults extraction uses.

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::parser::normalize::clean_text;
use crate::record::{
    CityRecord, Kind, MonthTable, PracticalInfo, PriceTier, Provenance, Record, RestaurantRecord,
    CITY_SOURCE, NO_DESCRIPTION, PRICE_TIER_UNSPECIFIED, RESTAURANT_SOURCE, UNSPECIFIED,
};

/// A JSON array of objects, or a single object.
pub fn records(kind: Kind, value: Value) -> Result<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => bail!("expected a JSON array or object, got {}", json_type(&other)),
    };

    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match item {
            Value::Object(obj) => Some(match kind {
                Kind::City => Record::City(city(&obj)),
                Kind::Restaurant => Record::Restaurant(restaurant(&obj)),
            }),
            other => {
                warn!(index = i, "skipping non-object item ({})", json_type(&other));
                None
            }
        })
        .collect())
}

pub fn city(obj: &Map<String, Value>) -> CityRecord {
    CityRecord {
        name: text(obj, &["capitale", "nom"]).unwrap_or_default(),
        country: text_or(obj, &["pays"], UNSPECIFIED),
        url: text(obj, &["url"]).unwrap_or_default(),
        description: text_or(obj, &["description"], NO_DESCRIPTION),
        about: text_or(obj, &["a_propos"], UNSPECIFIED),
        best_season: text_or(obj, &["meilleure_saison"], UNSPECIFIED),
        when_to_go: text_or(obj, &["quand_partir"], UNSPECIFIED),
        utc_offset: text_or(obj, &["decalage_horaire", "decalage"], UNSPECIFIED),
        flight_duration: text_or(obj, &["duree_vol"], UNSPECIFIED),
        temperatures: month_table(obj.get("temperatures")),
        map_url: text(obj, &["carte"]),
        practical_info: practical_info(obj.get("infos_pratiques")),
        attractions: list(obj.get("que_voir")),
        provenance: provenance(obj, CITY_SOURCE),
    }
}

pub fn restaurant(obj: &Map<String, Value>) -> RestaurantRecord {
    RestaurantRecord {
        name: text(obj, &["nom"]).unwrap_or_default(),
        city: text(obj, &["capitale", "ville"]).unwrap_or_default(),
        address: text_or(obj, &["adresse"], UNSPECIFIED),
        cuisine: text_or(obj, &["type_cuisine"], UNSPECIFIED),
        description: text_or(obj, &["description"], UNSPECIFIED),
        price_tier: price_tier(obj.get("prix_niveau").or_else(|| obj.get("prix"))),
        phone: text_or(obj, &["telephone"], UNSPECIFIED),
        website: text(obj, &["site_web"]),
        images: list(obj.get("images")),
        url: text(obj, &["url"]).unwrap_or_default(),
        provenance: provenance(obj, RESTAURANT_SOURCE),
    }
}

/// `"€€"` counts symbols; integers are taken as the tier; anything else is
/// unspecified.
pub fn price_tier(value: Option<&Value>) -> PriceTier {
    match value {
        Some(Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(n) => tier_from_int(n),
            Err(_) => PriceTier::from_price_text(Some(s)),
        },
        Some(Value::Number(n)) => n.as_i64().map(tier_from_int).unwrap_or_default(),
        _ => PriceTier::Unspecified,
    }
}

fn tier_from_int(n: i64) -> PriceTier {
    if n <= 0 || n == PRICE_TIER_UNSPECIFIED as i64 {
        PriceTier::Unspecified
    } else {
        PriceTier::from_count(n as usize)
    }
}

/// First present, non-falsy key, cleaned. Lists are joined with ", ".
fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(scalar)
        .filter(|s| s.as_str() != "null")
}

fn text_or(obj: &Map<String, Value>, keys: &[&str], default: &str) -> String {
    text(obj, keys).unwrap_or_else(|| default.to_string())
}

fn scalar(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().filter_map(scalar).collect::<Vec<_>>().join(", "),
        Value::Null | Value::Object(_) => return None,
    };
    let cleaned = clean_text(&raw);
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Lists stay lists, a lone scalar is wrapped, falsy becomes empty.
fn list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar).collect(),
        Some(v) => scalar(v).into_iter().collect(),
        None => Vec::new(),
    }
}

fn month_table(value: Option<&Value>) -> MonthTable {
    let mut table = MonthTable::new();
    if let Some(Value::Object(rows)) = value {
        for (month, readings) in rows {
            let month = clean_text(month);
            let readings = list(Some(readings));
            if !month.is_empty() && !readings.is_empty() {
                table.insert(month, readings);
            }
        }
    }
    table
}

fn practical_info(value: Option<&Value>) -> PracticalInfo {
    let mut info = PracticalInfo::default();
    if let Some(Value::Object(entries)) = value {
        for (key, v) in entries {
            if let Some(slot) = info.slot_mut(&clean_text(key).to_lowercase()) {
                *slot = scalar(v);
            }
        }
    }
    info
}

fn provenance(obj: &Map<String, Value>, default_source: &str) -> Provenance {
    Provenance {
        fetched_at: obj
            .get("date_scraping")
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now),
        source: text(obj, &["source"]).unwrap_or_else(|| default_source.to_string()),
    }
}

/// RFC 3339, naive ISO 8601 (taken as UTC), or `dd/mm/yyyy`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    use super::*;

    #[test]
    fn restaurant_shapes_are_coerced() {
        let v = json!({
            "nom": "  Le Petit  Zinc ",
            "capitale": "Paris",
            "type_cuisine": null,
            "prix_niveau": "€€€",
            "images": "https://img.example/1.jpg",
            "site_web": "",
            "date_scraping": "2024-03-01T12:30:00.123456"
        });
        let r = restaurant(v.as_object().unwrap());
        assert_eq!(r.name, "Le Petit Zinc");
        assert_eq!(r.cuisine, UNSPECIFIED);
        assert_eq!(r.price_tier, PriceTier::Tier(3));
        assert_eq!(r.images, vec!["https://img.example/1.jpg"]);
        assert_eq!(r.website, None);
        assert_eq!(r.provenance.fetched_at.hour(), 12);
        assert_eq!(r.provenance.source, RESTAURANT_SOURCE);
    }

    #[test]
    fn price_tier_inputs() {
        assert_eq!(price_tier(Some(&json!(2))), PriceTier::Tier(2));
        assert_eq!(price_tier(Some(&json!(999))), PriceTier::Unspecified);
        assert_eq!(price_tier(Some(&json!(0))), PriceTier::Unspecified);
        assert_eq!(price_tier(Some(&json!("€"))), PriceTier::Tier(1));
        assert_eq!(price_tier(Some(&json!("3"))), PriceTier::Tier(3));
        assert_eq!(price_tier(Some(&json!("null"))), PriceTier::Unspecified);
        assert_eq!(price_tier(Some(&Value::Null)), PriceTier::Unspecified);
        assert_eq!(price_tier(None), PriceTier::Unspecified);
    }

    #[test]
    fn city_mappings_and_lists() {
        let v = json!({
            "capitale": "Dublin",
            "decalage": "-1h",
            "temperatures": {"Janvier": ["5°C", "8°C"], "Février": "6°C", "": ["1"]},
            "infos_pratiques": {"Monnaie": "euro", "Fête": "17 mars"},
            "que_voir": "Temple Bar",
            "date_scraping": "14/02/2024"
        });
        let c = city(v.as_object().unwrap());
        assert_eq!(c.utc_offset, "-1h");
        assert_eq!(c.description, NO_DESCRIPTION);
        assert_eq!(c.temperatures.len(), 2);
        assert_eq!(c.temperatures.get("Février"), Some(&["6°C".to_string()][..]));
        assert_eq!(c.practical_info.currency.as_deref(), Some("euro"));
        assert_eq!(c.attractions, vec!["Temple Bar"]);
        assert_eq!(c.map_url, None);
        assert_eq!(c.provenance.fetched_at.day(), 14);
    }

    #[test]
    fn falsy_mappings_become_empty() {
        let v = json!({"capitale": "Oslo", "temperatures": null, "infos_pratiques": "", "que_voir": []});
        let c = city(v.as_object().unwrap());
        assert!(c.temperatures.is_empty());
        assert!(c.practical_info.is_empty());
        assert!(c.attractions.is_empty());
    }

    #[test]
    fn accepts_single_object_and_skips_scalars() {
        let one = records(Kind::City, json!({"capitale": "Rome"})).unwrap();
        assert_eq!(one.len(), 1);
        let many = records(Kind::Restaurant, json!([{"nom": "A", "capitale": "Rome"}, 3, "x"])).unwrap();
        assert_eq!(many.len(), 1);
        assert!(records(Kind::City, json!(42)).is_err());
    }
}
