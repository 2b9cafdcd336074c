use std::collections::HashSet;

use tracing::{debug, warn};

use crate::parser::normalize::clean_text;
use crate::parser::strategy::dedup_preserving_order;
use crate::record::{CityRecord, Kind, MonthTable, Record, RestaurantRecord, MAX_IMAGES};

/// Why a record never reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    MissingName,
    MissingCity,
    FetchFailed,
    StoreError,
}

impl Rejection {
    /// Stable counter key.
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::MissingName => "missing_name",
            Rejection::MissingCity => "missing_city",
            Rejection::FetchFailed => "fetch_failed",
            Rejection::StoreError => "store_error",
        }
    }
}

pub fn is_valid_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Per-run validation state: the natural keys seen so far.
#[derive(Default)]
pub struct Validator {
    seen_cities: HashSet<String>,
    seen_restaurants: HashSet<(String, String)>,
}

/// A record that passed validation, and whether its key was already seen
/// this run.
pub struct Validated {
    pub record: Record,
    pub duplicate: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Required key, URLs, shape, then in-run dedup. Duplicates are flagged
    /// and still returned.
    pub fn validate(&mut self, record: Record) -> Result<Validated, Rejection> {
        match record {
            Record::City(city) => {
                let city = validate_city(city)?;
                let duplicate = !self.seen_cities.insert(city.name.clone());
                if duplicate {
                    warn!(city = %city.name, "duplicate city in this run");
                }
                Ok(Validated {
                    record: Record::City(city),
                    duplicate,
                })
            }
            Record::Restaurant(resto) => {
                let resto = validate_restaurant(resto)?;
                let duplicate = !self
                    .seen_restaurants
                    .insert((resto.name.clone(), resto.city.clone()));
                if duplicate {
                    warn!(restaurant = %resto.name, city = %resto.city, "duplicate restaurant in this run");
                }
                Ok(Validated {
                    record: Record::Restaurant(resto),
                    duplicate,
                })
            }
        }
    }
}

fn validate_city(mut city: CityRecord) -> Result<CityRecord, Rejection> {
    city.name = clean_text(&city.name);
    if city.name.is_empty() {
        return Err(Rejection::MissingName);
    }

    check_source_url(Kind::City, &city.name, &city.url);
    city.map_url = city.map_url.filter(|u| keep_url("carte", u));

    let mut temperatures = MonthTable::new();
    for (month, readings) in city.temperatures.iter() {
        let month = clean_text(month);
        let readings: Vec<String> = readings
            .iter()
            .map(|r| clean_text(r))
            .filter(|r| !r.is_empty())
            .collect();
        if !month.is_empty() && !readings.is_empty() {
            temperatures.insert(month, readings);
        }
    }
    city.temperatures = temperatures;

    city.attractions = dedup_preserving_order(
        city.attractions
            .into_iter()
            .map(|a| clean_text(&a))
            .filter(|a| !a.is_empty())
            .collect(),
    );
    Ok(city)
}

fn validate_restaurant(mut resto: RestaurantRecord) -> Result<RestaurantRecord, Rejection> {
    resto.name = clean_text(&resto.name);
    resto.city = clean_text(&resto.city);
    if resto.name.is_empty() {
        return Err(Rejection::MissingName);
    }
    if resto.city.is_empty() {
        return Err(Rejection::MissingCity);
    }

    check_source_url(Kind::Restaurant, &resto.name, &resto.url);
    resto.website = resto.website.filter(|u| keep_url("site_web", u));

    let images = resto
        .images
        .into_iter()
        .filter(|u| keep_url("images", u))
        .collect();
    resto.images = dedup_preserving_order(images);
    resto.images.truncate(MAX_IMAGES);

    resto.price_tier = resto.price_tier.coerced();
    Ok(resto)
}

fn check_source_url(kind: Kind, key: &str, url: &str) {
    if !is_valid_url(url) {
        warn!(%kind, key, url, "source URL has no http(s) scheme");
    }
}

fn keep_url(field: &str, url: &str) -> bool {
    let ok = is_valid_url(url);
    if !ok {
        debug!(field, url, "dropping invalid URL");
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::samples::{city, restaurant};
    use crate::record::PriceTier;

    #[test]
    fn rejects_missing_keys() {
        let mut v = Validator::new();
        assert_eq!(
            v.validate(Record::City(city("  \u{00A0} "))).err(),
            Some(Rejection::MissingName)
        );
        assert_eq!(
            v.validate(Record::Restaurant(restaurant("", "Paris"))).err(),
            Some(Rejection::MissingName)
        );
        assert_eq!(
            v.validate(Record::Restaurant(restaurant("Zinc", ""))).err(),
            Some(Rejection::MissingCity)
        );
    }

    #[test]
    fn duplicates_are_flagged_and_forwarded() {
        let mut v = Validator::new();
        assert!(!v.validate(Record::Restaurant(restaurant("Zinc", "Paris"))).unwrap().duplicate);
        assert!(v.validate(Record::Restaurant(restaurant("Zinc", "Paris"))).unwrap().duplicate);
        assert!(!v.validate(Record::Restaurant(restaurant("Zinc", "Rome"))).unwrap().duplicate);
        assert!(!v.validate(Record::City(city("Dublin"))).unwrap().duplicate);
        assert!(v.validate(Record::City(city(" Dublin "))).unwrap().duplicate);
    }

    #[test]
    fn invalid_urls_dropped_not_rejected() {
        let mut r = restaurant("Zinc", "Paris");
        r.url = "guide.example/r".into();
        r.website = Some("javascript:void(0)".into());
        r.images = vec![
            "https://img.example/1.jpg".into(),
            "data:image/gif;base64,R0lGOD".into(),
            "https://img.example/1.jpg".into(),
            "//img.example/2.jpg".into(),
            "http://img.example/3.jpg".into(),
        ];
        let Record::Restaurant(out) = Validator::new().validate(Record::Restaurant(r)).unwrap().record else {
            panic!("expected restaurant");
        };
        assert_eq!(out.url, "guide.example/r");
        assert_eq!(out.website, None);
        assert_eq!(out.images, vec!["https://img.example/1.jpg", "http://img.example/3.jpg"]);
    }

    #[test]
    fn coerces_shapes() {
        let mut r = restaurant("Zinc", "Paris");
        r.price_tier = PriceTier::Tier(7);
        r.images = (0..8).map(|i| format!("https://img.example/{i}.jpg")).collect();
        let Record::Restaurant(out) = Validator::new().validate(Record::Restaurant(r)).unwrap().record else {
            panic!("expected restaurant");
        };
        assert_eq!(out.price_tier, PriceTier::Tier(4));
        assert_eq!(out.images.len(), MAX_IMAGES);

        let mut c = city("Dublin");
        c.attractions = vec!["Temple Bar".into(), " Temple  Bar".into(), "".into()];
        c.map_url = Some("carte.html".into());
        let Record::City(out) = Validator::new().validate(Record::City(c)).unwrap().record else {
            panic!("expected city");
        };
        assert_eq!(out.attractions, vec!["Temple Bar"]);
        assert_eq!(out.map_url, None);
    }

    #[test]
    fn blank_temperature_rows_dropped() {
        let mut c = city("Dublin");
        c.temperatures.insert("Janvier".into(), vec!["5°C".into(), " 8°C ".into()]);
        c.temperatures.insert(" ".into(), vec!["1°C".into()]);
        c.temperatures.insert("Février".into(), vec!["".into()]);
        let Record::City(out) = Validator::new().validate(Record::City(c)).unwrap().record else {
            panic!("expected city");
        };
        assert_eq!(out.temperatures.len(), 1);
        assert_eq!(out.temperatures.get("Janvier"), Some(&["5°C".to_string(), "8°C".to_string()][..]));
    }
}
