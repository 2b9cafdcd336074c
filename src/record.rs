use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Placeholder for a scalar text field whose extraction found nothing.
pub const UNSPECIFIED: &str = "Non spécifié";
pub const NO_DESCRIPTION: &str = "Description non disponible";

pub const CITY_SOURCE: &str = "Guide du Routard";
pub const RESTAURANT_SOURCE: &str = "Guide Michelin";

/// Stored value of an unspecified price tier.
pub const PRICE_TIER_UNSPECIFIED: u16 = 999;
pub const MAX_PRICE_TIER: u8 = 4;
pub const MAX_IMAGES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    City,
    Restaurant,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::City => "city",
            Kind::Restaurant => "restaurant",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and when a record's data was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(rename = "date_scraping")]
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

// ── Price tier ──

/// Ordinal 1–4, or the unspecified sentinel. Never null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PriceTier {
    Tier(u8),
    #[default]
    Unspecified,
}

impl PriceTier {
    /// Count `€` symbols in a price label ("€€€" → 3). Empty or absent → unspecified.
    pub fn from_price_text(text: Option<&str>) -> Self {
        let count = text.map(|t| t.matches('€').count()).unwrap_or(0);
        Self::from_count(count)
    }

    pub fn from_count(count: usize) -> Self {
        match count {
            0 => PriceTier::Unspecified,
            n => PriceTier::Tier(n.min(MAX_PRICE_TIER as usize) as u8),
        }
    }

    /// Inverse of [`PriceTier::code`]. Unknown codes map to unspecified.
    pub fn from_code(code: i64) -> Self {
        match code {
            1..=4 => PriceTier::Tier(code as u8),
            _ => PriceTier::Unspecified,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            PriceTier::Tier(n) => n as u16,
            PriceTier::Unspecified => PRICE_TIER_UNSPECIFIED,
        }
    }

    /// Clamp out-of-range ordinals back into 1–4 (0 means unspecified).
    pub fn coerced(self) -> Self {
        match self {
            PriceTier::Tier(n) => Self::from_count(n as usize),
            PriceTier::Unspecified => PriceTier::Unspecified,
        }
    }
}

impl Serialize for PriceTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.code())
    }
}

impl<'de> Deserialize<'de> for PriceTier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Ok(PriceTier::from_code(code))
    }
}

// ── Month table ──

/// Month label → ordered readings, in page order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonthTable(Vec<(String, Vec<String>)>);

impl MonthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repeated label replaces the earlier row in place.
    pub fn insert(&mut self, month: String, readings: Vec<String>) {
        match self.0.iter_mut().find(|(m, _)| *m == month) {
            Some(row) => row.1 = readings,
            None => self.0.push((month, readings)),
        }
    }

    #[cfg(test)]
    pub fn get(&self, month: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(m, _)| m == month)
            .map(|(_, r)| r.as_slice())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(m, r)| (m.as_str(), r.as_slice()))
    }
}

impl Serialize for MonthTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(m, r)| (m, r)))
    }
}

impl<'de> Deserialize<'de> for MonthTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = MonthTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of month label to readings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<MonthTable, A::Error> {
                let mut table = MonthTable::new();
                while let Some((month, readings)) = access.next_entry::<String, Vec<String>>()? {
                    table.insert(month, readings);
                }
                Ok(table)
            }

            fn visit_unit<E>(self) -> Result<MonthTable, E> {
                Ok(MonthTable::new())
            }
        }

        deserializer.deserialize_any(TableVisitor)
    }
}

// ── Practical info ──

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticalInfo {
    #[serde(rename = "monnaie", skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(rename = "langue", skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visa: Option<String>,
    #[serde(rename = "electricite", skip_serializing_if = "Option::is_none")]
    pub electricity: Option<String>,
    #[serde(rename = "telephone", skip_serializing_if = "Option::is_none")]
    pub phone_code: Option<String>,
}

impl PracticalInfo {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.currency.is_none()
            && self.language.is_none()
            && self.visa.is_none()
            && self.electricity.is_none()
            && self.phone_code.is_none()
    }

    /// Mutable slot for a normalized key (`monnaie`, `currency`, ...).
    pub fn slot_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "monnaie" | "currency" => Some(&mut self.currency),
            "langue" | "langues" | "language" => Some(&mut self.language),
            "visa" | "formalités" | "formalites" => Some(&mut self.visa),
            "électricité" | "electricite" | "electricity" => Some(&mut self.electricity),
            "telephone" | "téléphone" | "indicatif" | "phone_code" => Some(&mut self.phone_code),
            _ => None,
        }
    }
}

// ── Records ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    #[serde(rename = "capitale")]
    pub name: String,
    #[serde(rename = "pays")]
    pub country: String,
    pub url: String,
    pub description: String,
    #[serde(rename = "a_propos")]
    pub about: String,
    #[serde(rename = "meilleure_saison")]
    pub best_season: String,
    #[serde(rename = "quand_partir")]
    pub when_to_go: String,
    #[serde(rename = "decalage_horaire")]
    pub utc_offset: String,
    #[serde(rename = "duree_vol")]
    pub flight_duration: String,
    pub temperatures: MonthTable,
    #[serde(rename = "carte")]
    pub map_url: Option<String>,
    #[serde(rename = "infos_pratiques")]
    pub practical_info: PracticalInfo,
    #[serde(rename = "que_voir")]
    pub attractions: Vec<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl CityRecord {
    /// Fill fields the incoming record left absent from `stored`.
    pub fn merged_over(&self, stored: &CityRecord) -> CityRecord {
        let mut merged = self.clone();
        if merged.map_url.is_none() {
            merged.map_url = stored.map_url.clone();
        }
        merged
    }

    /// Field-wise equality ignoring provenance.
    pub fn same_content(&self, other: &CityRecord) -> bool {
        self.name == other.name
            && self.country == other.country
            && self.url == other.url
            && self.description == other.description
            && self.about == other.about
            && self.best_season == other.best_season
            && self.when_to_go == other.when_to_go
            && self.utc_offset == other.utc_offset
            && self.flight_duration == other.flight_duration
            && self.temperatures == other.temperatures
            && self.map_url == other.map_url
            && self.practical_info == other.practical_info
            && self.attractions == other.attractions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantRecord {
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "capitale")]
    pub city: String,
    #[serde(rename = "adresse")]
    pub address: String,
    #[serde(rename = "type_cuisine")]
    pub cuisine: String,
    pub description: String,
    #[serde(rename = "prix_niveau")]
    pub price_tier: PriceTier,
    #[serde(rename = "telephone")]
    pub phone: String,
    #[serde(rename = "site_web")]
    pub website: Option<String>,
    pub images: Vec<String>,
    pub url: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl RestaurantRecord {
    pub fn merged_over(&self, stored: &RestaurantRecord) -> RestaurantRecord {
        let mut merged = self.clone();
        if merged.website.is_none() {
            merged.website = stored.website.clone();
        }
        merged
    }

    pub fn same_content(&self, other: &RestaurantRecord) -> bool {
        self.name == other.name
            && self.city == other.city
            && self.address == other.address
            && self.cuisine == other.cuisine
            && self.description == other.description
            && self.price_tier == other.price_tier
            && self.phone == other.phone
            && self.website == other.website
            && self.images == other.images
            && self.url == other.url
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    City(CityRecord),
    Restaurant(RestaurantRecord),
}

impl Record {
    pub fn kind(&self) -> Kind {
        match self {
            Record::City(_) => Kind::City,
            Record::Restaurant(_) => Kind::Restaurant,
        }
    }

    /// Human-readable natural key, for logs.
    pub fn key_label(&self) -> String {
        match self {
            Record::City(c) => c.name.clone(),
            Record::Restaurant(r) => format!("{} ({})", r.name, r.city),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_tier_counts_euro_signs() {
        assert_eq!(PriceTier::from_price_text(Some("€€€")), PriceTier::Tier(3));
        assert_eq!(PriceTier::from_price_text(Some("€")), PriceTier::Tier(1));
        assert_eq!(PriceTier::from_price_text(Some("")), PriceTier::Unspecified);
        assert_eq!(PriceTier::from_price_text(None), PriceTier::Unspecified);
        assert_eq!(PriceTier::from_price_text(Some("€€€€€€")), PriceTier::Tier(4));
    }

    #[test]
    fn price_tier_serializes_sentinel() {
        assert_eq!(serde_json::to_string(&PriceTier::Unspecified).unwrap(), "999");
        assert_eq!(serde_json::to_string(&PriceTier::Tier(2)).unwrap(), "2");
        let back: PriceTier = serde_json::from_str("999").unwrap();
        assert_eq!(back, PriceTier::Unspecified);
    }

    #[test]
    fn month_table_keeps_page_order() {
        let mut t = MonthTable::new();
        t.insert("Mars".into(), vec!["9°C".into()]);
        t.insert("Janvier".into(), vec!["5°C".into()]);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"Mars":["9°C"],"Janvier":["5°C"]}"#);

        let back: MonthTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.iter().next().map(|(m, _)| m), Some("Mars"));
    }

    #[test]
    fn practical_info_skips_missing_keys() {
        let info = PracticalInfo {
            currency: Some("euro".into()),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&info).unwrap(), r#"{"monnaie":"euro"}"#);
        assert_eq!(serde_json::to_string(&PracticalInfo::default()).unwrap(), "{}");
    }
}

#[cfg(test)]
pub mod samples {
    use chrono::Utc;

    use super::*;

    pub fn restaurant(name: &str, city: &str) -> RestaurantRecord {
        RestaurantRecord {
            name: name.into(),
            city: city.into(),
            address: "1 rue X".into(),
            cuisine: "Bistrot".into(),
            description: "Bon".into(),
            price_tier: PriceTier::Tier(2),
            phone: "+33".into(),
            website: Some("https://resto.example/".into()),
            images: vec![],
            url: "https://guide.example/r".into(),
            provenance: Provenance {
                fetched_at: Utc::now(),
                source: "test".into(),
            },
        }
    }

    pub fn city(name: &str) -> CityRecord {
        CityRecord {
            name: name.into(),
            country: "Irlande".into(),
            url: "https://guide.example/dublin".into(),
            description: "d".into(),
            about: "a".into(),
            best_season: "été".into(),
            when_to_go: "w".into(),
            utc_offset: "-1h".into(),
            flight_duration: "2h".into(),
            temperatures: MonthTable::new(),
            map_url: None,
            practical_info: PracticalInfo::default(),
            attractions: vec![],
            provenance: Provenance {
                fetched_at: Utc::now(),
                source: "test".into(),
            },
        }
    }
}
