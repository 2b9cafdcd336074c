use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::record::Kind;

/// Crawl-assigned context carried from request to fetch result unchanged.
pub type Meta = serde_json::Map<String, serde_json::Value>;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            kind       TEXT NOT NULL CHECK(kind IN ('city','listing','restaurant')),
            meta       TEXT NOT NULL DEFAULT '{}',
            visited    BOOLEAN NOT NULL DEFAULT 0,
            visited_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id         INTEGER PRIMARY KEY,
            page_id    INTEGER NOT NULL REFERENCES pages(id),
            url        TEXT NOT NULL,
            final_url  TEXT,
            status     INTEGER,
            body       TEXT,
            error      TEXT,
            latency_ms INTEGER,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_page ON page_data(page_id);

        CREATE TABLE IF NOT EXISTS cities (
            name            TEXT PRIMARY KEY,
            country         TEXT NOT NULL,
            url             TEXT NOT NULL,
            description     TEXT NOT NULL,
            about           TEXT NOT NULL,
            best_season     TEXT NOT NULL,
            when_to_go      TEXT NOT NULL,
            utc_offset      TEXT NOT NULL,
            flight_duration TEXT NOT NULL,
            temperatures    TEXT NOT NULL DEFAULT '{}',
            map_url         TEXT,
            practical_info  TEXT NOT NULL DEFAULT '{}',
            attractions     TEXT NOT NULL DEFAULT '[]',
            source          TEXT NOT NULL,
            fetched_at      TEXT NOT NULL,
            last_updated    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS restaurants (
            id           INTEGER PRIMARY KEY,
            name         TEXT NOT NULL,
            city         TEXT NOT NULL,
            address      TEXT NOT NULL,
            cuisine      TEXT NOT NULL,
            description  TEXT NOT NULL,
            price_tier   INTEGER NOT NULL,
            phone        TEXT NOT NULL,
            website      TEXT,
            images       TEXT NOT NULL DEFAULT '[]',
            url          TEXT NOT NULL,
            source       TEXT NOT NULL,
            fetched_at   TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            UNIQUE(name, city)
        );
        CREATE INDEX IF NOT EXISTS idx_restaurants_city ON restaurants(city);
        CREATE INDEX IF NOT EXISTS idx_restaurants_price ON restaurants(price_tier);
        ",
    )?;
    Ok(())
}

// ── Page queue ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    City,
    Listing,
    Restaurant,
}

impl PageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::City => "city",
            PageKind::Listing => "listing",
            PageKind::Restaurant => "restaurant",
        }
    }

    /// The record kind this page yields, if any.
    pub fn record_kind(self) -> Option<Kind> {
        match self {
            PageKind::City => Some(Kind::City),
            PageKind::Restaurant => Some(Kind::Restaurant),
            PageKind::Listing => None,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "city" => Ok(PageKind::City),
            "listing" => Ok(PageKind::Listing),
            "restaurant" => Ok(PageKind::Restaurant),
            other => bail!("unknown page kind {:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedPage {
    pub id: i64,
    pub url: String,
    pub kind: PageKind,
    pub meta: Meta,
}

pub fn insert_pages(conn: &Connection, pages: &[(String, PageKind, Meta)]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url, kind, meta) VALUES (?1, ?2, ?3)")?;
        for (url, kind, meta) in pages {
            count += stmt.execute(params![url, kind.as_str(), serde_json::to_string(meta)?])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Queue a page discovered mid-crawl. Returns its id when it still needs a
/// fetch: newly inserted, or known but not yet visited (meta refreshed).
pub fn enqueue_page(conn: &Connection, url: &str, kind: PageKind, meta: &Meta) -> Result<Option<i64>> {
    let id = conn
        .prepare_cached(
            "INSERT INTO pages (url, kind, meta) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET kind = excluded.kind, meta = excluded.meta
             WHERE pages.visited = 0
             RETURNING id",
        )?
        .query_row(params![url, kind.as_str(), serde_json::to_string(meta)?], |r| r.get(0))
        .optional()?;
    Ok(id)
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<QueuedPage>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT id, url, kind, meta FROM pages WHERE visited = 0 ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT id, url, kind, meta FROM pages WHERE visited = 0 ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, url, kind, meta)| {
            Ok(QueuedPage {
                id,
                url,
                kind: PageKind::parse(&kind)?,
                meta: parse_meta(&meta),
            })
        })
        .collect()
}

/// Mark every page unvisited so the next crawl fetches it again.
pub fn reset_visited(conn: &Connection) -> Result<usize> {
    Ok(conn.execute("UPDATE pages SET visited = 0, visited_at = NULL WHERE visited = 1", [])?)
}

fn parse_meta(raw: &str) -> Meta {
    serde_json::from_str(raw).unwrap_or_default()
}

// ── Fetch archive ──

/// One fetch outcome, success or failure.
#[derive(Debug, Clone)]
pub struct FetchRow {
    pub page_id: i64,
    pub url: String,
    pub final_url: Option<String>,
    pub status: Option<u16>,
    pub body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

/// Archive a fetch and mark its page visited.
pub fn save_fetch(conn: &Connection, row: &FetchRow) -> Result<()> {
    conn.prepare_cached(
        "INSERT INTO page_data (page_id, url, final_url, status, body, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        row.page_id, row.url, row.final_url, row.status, row.body, row.error, row.latency_ms,
    ])?;
    conn.prepare_cached("UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1")?
        .execute(params![row.page_id])?;
    Ok(())
}

/// Latest successfully fetched body of a page, for re-extraction.
pub struct ArchivedPage {
    pub url: String,
    pub kind: PageKind,
    pub meta: Meta,
    pub body: String,
}

pub fn fetch_archived(conn: &Connection, kind: Option<PageKind>, limit: Option<usize>) -> Result<Vec<ArchivedPage>> {
    let sql = format!(
        "SELECT COALESCE(pd.final_url, pd.url), p.kind, p.meta, pd.body
         FROM page_data pd
         JOIN pages p ON p.id = pd.page_id
         WHERE pd.body IS NOT NULL
           AND pd.id = (SELECT MAX(id) FROM page_data WHERE page_id = p.id AND body IS NOT NULL)
           AND (?1 IS NULL OR p.kind = ?1)
         ORDER BY pd.id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![kind.map(PageKind::as_str)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(url, kind, meta, body)| {
            Ok(ArchivedPage {
                url,
                kind: PageKind::parse(&kind)?,
                meta: parse_meta(&meta),
                body,
            })
        })
        .collect()
}

// ── Overview ──

pub struct OverviewRow {
    pub name: String,
    pub country: String,
    pub best_season: String,
    pub restaurants: usize,
    pub cheapest_tier: Option<u16>,
}

pub fn fetch_overview(conn: &Connection, country: Option<&str>, limit: usize) -> Result<Vec<OverviewRow>> {
    let sql = format!(
        "SELECT c.name, c.country, c.best_season,
                COUNT(r.id), MIN(r.price_tier)
         FROM cities c
         LEFT JOIN restaurants r ON r.city = c.name
         WHERE (?1 IS NULL OR c.country = ?1)
         GROUP BY c.name
         ORDER BY COUNT(r.id) DESC, c.name
         LIMIT {}",
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![country], |row| {
            Ok(OverviewRow {
                name: row.get(0)?,
                country: row.get(1)?,
                best_season: row.get(2)?,
                restaurants: row.get(3)?,
                cheapest_tier: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub fetched: usize,
    pub errors: usize,
    pub cities: usize,
    pub restaurants: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let fetched: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let cities: usize = conn.query_row("SELECT COUNT(*) FROM cities", [], |r| r.get(0))?;
    let restaurants: usize = conn.query_row("SELECT COUNT(*) FROM restaurants", [], |r| r.get(0))?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        fetched,
        errors,
        cities,
        restaurants,
    })
}
