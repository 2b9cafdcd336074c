use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use crate::pipeline::{Rejection, Validator};
use crate::record::{CityRecord, Kind, PriceTier, Provenance, Record, RestaurantRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct KindCounters {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub duplicates: usize,
}

/// End-of-run aggregate counters.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunCounters {
    pub cities: KindCounters,
    pub restaurants: KindCounters,
    /// Rejection reason → count, across kinds.
    pub reasons: BTreeMap<&'static str, usize>,
}

impl RunCounters {
    pub fn kind(&self, kind: Kind) -> &KindCounters {
        match kind {
            Kind::City => &self.cities,
            Kind::Restaurant => &self.restaurants,
        }
    }

    fn kind_mut(&mut self, kind: Kind) -> &mut KindCounters {
        match kind {
            Kind::City => &mut self.cities,
            Kind::Restaurant => &mut self.restaurants,
        }
    }

    pub fn record_upsert(&mut self, kind: Kind, outcome: Upsert) {
        let c = self.kind_mut(kind);
        match outcome {
            Upsert::Inserted => c.inserted += 1,
            Upsert::Updated => c.updated += 1,
            Upsert::Unchanged => c.unchanged += 1,
        }
    }

    /// Failures that never produced a record (a listing fetch) have no kind.
    pub fn record_rejection(&mut self, kind: Option<Kind>, rejection: Rejection) {
        if let Some(kind) = kind {
            self.kind_mut(kind).rejected += 1;
        }
        *self.reasons.entry(rejection.reason()).or_insert(0) += 1;
    }

    pub fn print(&self) {
        println!(
            "{:<12} | {:>8} | {:>7} | {:>9} | {:>8} | {:>10}",
            "Kind", "Inserted", "Updated", "Unchanged", "Rejected", "Duplicates"
        );
        println!("{}", "-".repeat(70));
        for kind in [Kind::City, Kind::Restaurant] {
            let c = self.kind(kind);
            println!(
                "{:<12} | {:>8} | {:>7} | {:>9} | {:>8} | {:>10}",
                kind, c.inserted, c.updated, c.unchanged, c.rejected, c.duplicates
            );
        }
        if !self.reasons.is_empty() {
            println!("\n--- Rejections ---");
            for (reason, n) in &self.reasons {
                println!("  {}: {}", reason, n);
            }
        }
    }
}

/// Validation, dedup and upsert against one connection, with counters.
pub struct StoreWriter<'c> {
    conn: &'c Connection,
    validator: Validator,
    counters: RunCounters,
}

impl<'c> StoreWriter<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        StoreWriter {
            conn,
            validator: Validator::new(),
            counters: RunCounters::default(),
        }
    }

    /// Validate then upsert. Rejections and store errors are counted, never
    /// returned.
    pub fn ingest(&mut self, record: Record) -> Option<Upsert> {
        let kind = record.kind();
        let validated = match self.validator.validate(record) {
            Ok(v) => v,
            Err(rejection) => {
                debug!(%kind, reason = rejection.reason(), "record rejected");
                self.counters.record_rejection(Some(kind), rejection);
                return None;
            }
        };
        if validated.duplicate {
            self.counters.kind_mut(kind).duplicates += 1;
        }

        match upsert(self.conn, &validated.record) {
            Ok(outcome) => {
                debug!(%kind, key = %validated.record.key_label(), ?outcome, "upserted");
                self.counters.record_upsert(kind, outcome);
                Some(outcome)
            }
            Err(e) => {
                error!(%kind, key = %validated.record.key_label(), "store write failed: {:#}", e);
                self.counters.record_rejection(Some(kind), Rejection::StoreError);
                None
            }
        }
    }

    pub fn reject(&mut self, kind: Option<Kind>, rejection: Rejection) {
        self.counters.record_rejection(kind, rejection);
    }

    pub fn finish(self) -> RunCounters {
        let c = &self.counters;
        info!(
            cities_inserted = c.cities.inserted,
            cities_updated = c.cities.updated,
            restaurants_inserted = c.restaurants.inserted,
            restaurants_updated = c.restaurants.updated,
            rejected = c.reasons.values().sum::<usize>(),
            "ingestion finished"
        );
        self.counters
    }
}

pub fn upsert(conn: &Connection, record: &Record) -> Result<Upsert> {
    match record {
        Record::City(c) => upsert_city(conn, c),
        Record::Restaurant(r) => upsert_restaurant(conn, r),
    }
}

// ── Cities ──

pub fn upsert_city(conn: &Connection, city: &CityRecord) -> Result<Upsert> {
    let stored = load_city(conn, &city.name)?;
    write_city(conn, city, stored)
}

/// `stored` is what the lookup saw. The key may have been inserted since.
fn write_city(conn: &Connection, city: &CityRecord, stored: Option<CityRecord>) -> Result<Upsert> {
    let stored = match stored {
        Some(stored) => stored,
        None => {
            if insert_city(conn, city)? == 1 {
                return Ok(Upsert::Inserted);
            }
            // Another writer inserted the key between lookup and insert.
            load_city(conn, &city.name)?
                .with_context(|| format!("city {:?} missing after insert conflict", city.name))?
        }
    };

    let merged = city.merged_over(&stored);
    if merged.same_content(&stored) {
        return Ok(Upsert::Unchanged);
    }
    update_city(conn, &merged)?;
    Ok(Upsert::Updated)
}

const CITY_COLUMNS: &str = "name, country, url, description, about, best_season, when_to_go,
     utc_offset, flight_duration, temperatures, map_url, practical_info, attractions,
     source, fetched_at";

/// Returns the number of rows written: 0 when the key already exists.
fn insert_city(conn: &Connection, c: &CityRecord) -> Result<usize> {
    let n = conn
        .prepare_cached(&format!(
            "INSERT INTO cities ({CITY_COLUMNS}, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, datetime('now'))
             ON CONFLICT(name) DO NOTHING"
        ))?
        .execute(params![
            c.name,
            c.country,
            c.url,
            c.description,
            c.about,
            c.best_season,
            c.when_to_go,
            c.utc_offset,
            c.flight_duration,
            serde_json::to_string(&c.temperatures)?,
            c.map_url,
            serde_json::to_string(&c.practical_info)?,
            serde_json::to_string(&c.attractions)?,
            c.provenance.source,
            c.provenance.fetched_at.to_rfc3339(),
        ])?;
    Ok(n)
}

fn update_city(conn: &Connection, c: &CityRecord) -> Result<()> {
    conn.prepare_cached(
        "UPDATE cities SET
            country = ?2, url = ?3, description = ?4, about = ?5, best_season = ?6,
            when_to_go = ?7, utc_offset = ?8, flight_duration = ?9, temperatures = ?10,
            map_url = ?11, practical_info = ?12, attractions = ?13, source = ?14,
            fetched_at = ?15, last_updated = datetime('now')
         WHERE name = ?1",
    )?
    .execute(params![
        c.name,
        c.country,
        c.url,
        c.description,
        c.about,
        c.best_season,
        c.when_to_go,
        c.utc_offset,
        c.flight_duration,
        serde_json::to_string(&c.temperatures)?,
        c.map_url,
        serde_json::to_string(&c.practical_info)?,
        serde_json::to_string(&c.attractions)?,
        c.provenance.source,
        c.provenance.fetched_at.to_rfc3339(),
    ])?;
    Ok(())
}

pub fn load_city(conn: &Connection, name: &str) -> Result<Option<CityRecord>> {
    let city = conn
        .prepare_cached(&format!("SELECT {CITY_COLUMNS} FROM cities WHERE name = ?1"))?
        .query_row(params![name], city_from_row)
        .optional()?;
    Ok(city)
}

pub fn all_cities(conn: &Connection) -> Result<Vec<CityRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {CITY_COLUMNS} FROM cities ORDER BY name"))?;
    let rows = stmt
        .query_map([], city_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn city_from_row(row: &Row) -> rusqlite::Result<CityRecord> {
    Ok(CityRecord {
        name: row.get(0)?,
        country: row.get(1)?,
        url: row.get(2)?,
        description: row.get(3)?,
        about: row.get(4)?,
        best_season: row.get(5)?,
        when_to_go: row.get(6)?,
        utc_offset: row.get(7)?,
        flight_duration: row.get(8)?,
        temperatures: json_column(row, 9)?,
        map_url: row.get(10)?,
        practical_info: json_column(row, 11)?,
        attractions: json_column(row, 12)?,
        provenance: Provenance {
            source: row.get(13)?,
            fetched_at: time_column(row, 14)?,
        },
    })
}

// ── Restaurants ──

pub fn upsert_restaurant(conn: &Connection, resto: &RestaurantRecord) -> Result<Upsert> {
    let stored = load_restaurant(conn, &resto.name, &resto.city)?;
    write_restaurant(conn, resto, stored)
}

fn write_restaurant(
    conn: &Connection,
    resto: &RestaurantRecord,
    stored: Option<RestaurantRecord>,
) -> Result<Upsert> {
    let stored = match stored {
        Some(stored) => stored,
        None => {
            if insert_restaurant(conn, resto)? == 1 {
                return Ok(Upsert::Inserted);
            }
            load_restaurant(conn, &resto.name, &resto.city)?.with_context(|| {
                format!("restaurant {:?} ({}) missing after insert conflict", resto.name, resto.city)
            })?
        }
    };

    let merged = resto.merged_over(&stored);
    if merged.same_content(&stored) {
        return Ok(Upsert::Unchanged);
    }
    update_restaurant(conn, &merged)?;
    Ok(Upsert::Updated)
}

const RESTAURANT_COLUMNS: &str = "name, city, address, cuisine, description, price_tier, phone,
     website, images, url, source, fetched_at";

fn insert_restaurant(conn: &Connection, r: &RestaurantRecord) -> Result<usize> {
    let n = conn
        .prepare_cached(&format!(
            "INSERT INTO restaurants ({RESTAURANT_COLUMNS}, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now'))
             ON CONFLICT(name, city) DO NOTHING"
        ))?
        .execute(params![
            r.name,
            r.city,
            r.address,
            r.cuisine,
            r.description,
            r.price_tier.code(),
            r.phone,
            r.website,
            serde_json::to_string(&r.images)?,
            r.url,
            r.provenance.source,
            r.provenance.fetched_at.to_rfc3339(),
        ])?;
    Ok(n)
}

fn update_restaurant(conn: &Connection, r: &RestaurantRecord) -> Result<()> {
    conn.prepare_cached(
        "UPDATE restaurants SET
            address = ?3, cuisine = ?4, description = ?5, price_tier = ?6, phone = ?7,
            website = ?8, images = ?9, url = ?10, source = ?11, fetched_at = ?12,
            last_updated = datetime('now')
         WHERE name = ?1 AND city = ?2",
    )?
    .execute(params![
        r.name,
        r.city,
        r.address,
        r.cuisine,
        r.description,
        r.price_tier.code(),
        r.phone,
        r.website,
        serde_json::to_string(&r.images)?,
        r.url,
        r.provenance.source,
        r.provenance.fetched_at.to_rfc3339(),
    ])?;
    Ok(())
}

pub fn load_restaurant(conn: &Connection, name: &str, city: &str) -> Result<Option<RestaurantRecord>> {
    let resto = conn
        .prepare_cached(&format!(
            "SELECT {RESTAURANT_COLUMNS} FROM restaurants WHERE name = ?1 AND city = ?2"
        ))?
        .query_row(params![name, city], restaurant_from_row)
        .optional()?;
    Ok(resto)
}

pub fn all_restaurants(conn: &Connection) -> Result<Vec<RestaurantRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RESTAURANT_COLUMNS} FROM restaurants ORDER BY city, price_tier, name"
    ))?;
    let rows = stmt
        .query_map([], restaurant_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn restaurant_from_row(row: &Row) -> rusqlite::Result<RestaurantRecord> {
    Ok(RestaurantRecord {
        name: row.get(0)?,
        city: row.get(1)?,
        address: row.get(2)?,
        cuisine: row.get(3)?,
        description: row.get(4)?,
        price_tier: PriceTier::from_code(row.get(5)?),
        phone: row.get(6)?,
        website: row.get(7)?,
        images: json_column(row, 8)?,
        url: row.get(9)?,
        provenance: Provenance {
            source: row.get(10)?,
            fetched_at: time_column(row, 11)?,
        },
    })
}

// ── Column helpers ──

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
