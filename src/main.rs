mod coerce;
mod config;
mod crawler;
mod db;
mod parser;
mod pipeline;
mod record;
mod store;
mod targets;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use tracing::{error, info};

use config::CrawlConfig;
use crawler::{FetchRequest, FetchResult};
use db::PageKind;
use parser::Parsed;
use pipeline::Rejection;
use record::{Kind, Record};
use store::{RunCounters, StoreWriter};

#[derive(Parser)]
#[command(name = "guide_scraper", about = "Travel guide scraper: European capitals and their restaurants")]
struct Cli {
    /// SQLite database path
    #[arg(long, global = true, env = "GUIDE_DB", default_value = config::DEFAULT_DB_PATH)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and queue the catalogue of city and listing pages
    Init,
    /// Fetch unvisited pages into the archive (listings queue their restaurants)
    Scrape {
        /// Max queued pages to start from (default: all unvisited)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Re-extract archived pages and ingest the records
    Process {
        /// Max archived pages to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Only this page kind
        #[arg(short, long)]
        kind: Option<PageKindArg>,
        /// Cheapest restaurants queued per re-extracted listing
        #[arg(long, default_value_t = config::RESTAURANTS_PER_CITY)]
        per_city: usize,
    },
    /// Fetch + extract + ingest in one pipeline (each page ingested as it arrives)
    Run {
        /// Max queued pages to start from
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Mark every page unvisited first, re-fetching the whole catalogue
        #[arg(long)]
        recrawl: bool,
        #[command(flatten)]
        crawl: CrawlArgs,
    },
    /// Ingest records from a JSON export
    Import {
        kind: KindArg,
        file: PathBuf,
    },
    /// Print stored records as JSON
    Export { kind: KindArg },
    /// Show queue and store statistics
    Stats,
    /// Cities overview table
    Overview {
        /// Filter by country (e.g. "Irlande")
        #[arg(short, long)]
        country: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Args)]
struct CrawlArgs {
    /// Simultaneous fetches across the run
    #[arg(long, default_value_t = config::CONCURRENCY)]
    concurrency: usize,
    /// Simultaneous fetches per host
    #[arg(long, default_value_t = config::PER_HOST_CONCURRENCY)]
    per_host: usize,
    /// Delay between request starts on one host
    #[arg(long, default_value_t = config::DELAY_MS)]
    delay_ms: u64,
    /// Retries for transient failures
    #[arg(long, default_value_t = config::MAX_RETRIES)]
    retries: u32,
    /// Request timeout
    #[arg(long, default_value_t = config::TIMEOUT_SECS)]
    timeout_secs: u64,
    /// Cheapest restaurants followed per city listing
    #[arg(long, default_value_t = config::RESTAURANTS_PER_CITY)]
    per_city: usize,
}

impl CrawlArgs {
    fn config(&self) -> CrawlConfig {
        CrawlConfig {
            concurrency: self.concurrency,
            per_host: self.per_host,
            delay: Duration::from_millis(self.delay_ms),
            max_retries: self.retries,
            timeout: Duration::from_secs(self.timeout_secs),
            restaurants_per_city: self.per_city,
            ..CrawlConfig::default()
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    City,
    Restaurant,
}

impl From<KindArg> for Kind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::City => Kind::City,
            KindArg::Restaurant => Kind::Restaurant,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PageKindArg {
    City,
    Listing,
    Restaurant,
}

impl From<PageKindArg> for PageKind {
    fn from(k: PageKindArg) -> Self {
        match k {
            PageKindArg::City => PageKind::City,
            PageKindArg::Listing => PageKind::Listing,
            PageKindArg::Restaurant => PageKind::Restaurant,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let conn = db::connect(&cli.db)?;
    db::init_schema(&conn)?;

    match cli.command {
        Commands::Init => {
            let seeds = targets::seeds();
            let inserted = db::insert_pages(&conn, &seeds)?;
            println!("Queued {} new pages ({} in catalogue)", inserted, seeds.len());
        }
        Commands::Scrape { limit, crawl } => {
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first or all pages are fetched.");
                return Ok(());
            }
            let config = crawl.config();
            println!("Fetching {} pages (streaming to DB)...", pages.len());
            let stats = crawler::crawl(&config, requests(pages), |result| {
                handle_fetch(&conn, None, &config, result)
            })
            .await?;
            println!(
                "Done: {} fetched ({} ok, {} errors, {} discovered, {} unhandled).",
                stats.total, stats.ok, stats.errors, stats.discovered, stats.handler_errors
            );
        }
        Commands::Process { limit, kind, per_city } => {
            let pages = db::fetch_archived(&conn, kind.map(PageKind::from), limit)?;
            if pages.is_empty() {
                println!("No archived pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let counters = process_pages(&conn, &pages, per_city)?;
            counters.print();
        }
        Commands::Run { limit, recrawl, crawl } => {
            if recrawl {
                let reset = db::reset_visited(&conn)?;
                info!("Marked {} pages for re-fetch", reset);
            }
            let pages = db::fetch_unvisited(&conn, limit)?;
            if pages.is_empty() {
                println!("No unvisited pages. Run 'init' first, or pass --recrawl.");
                return Ok(());
            }

            let config = crawl.config();
            let t_run = Instant::now();
            println!("Pipeline: {} pages (fetch, extract, ingest)...", pages.len());
            let mut writer = StoreWriter::new(&conn);
            let stats = crawler::crawl(&config, requests(pages), |result| {
                handle_fetch(&conn, Some(&mut writer), &config, result)
            })
            .await?;
            println!(
                "Fetched {} pages ({} ok, {} errors, {} discovered) in {:.1}s\n",
                stats.total,
                stats.ok,
                stats.errors,
                stats.discovered,
                t_run.elapsed().as_secs_f64()
            );
            writer.finish().print();
        }
        Commands::Import { kind, file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid JSON in {}", file.display()))?;
            let records = coerce::records(kind.into(), value)?;
            println!("Importing {} records from {}...", records.len(), file.display());

            let mut writer = StoreWriter::new(&conn);
            for record in records {
                writer.ingest(record);
            }
            writer.finish().print();
        }
        Commands::Export { kind } => {
            let json = match Kind::from(kind) {
                Kind::City => serde_json::to_string_pretty(&store::all_cities(&conn)?)?,
                Kind::Restaurant => serde_json::to_string_pretty(&store::all_restaurants(&conn)?)?,
            };
            println!("{}", json);
            return Ok(());
        }
        Commands::Overview { country, limit } => {
            let rows = db::fetch_overview(&conn, country.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No cities found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<16} | {:<16} | {:<28} | {:>11} | {:>5}",
                "#", "City", "Country", "Best season", "Restaurants", "Min €"
            );
            println!("{}", "-".repeat(94));
            for (i, r) in rows.iter().enumerate() {
                let cheapest = match r.cheapest_tier {
                    Some(t) if t <= record::MAX_PRICE_TIER as u16 => "€".repeat(t as usize),
                    _ => "-".into(),
                };
                println!(
                    "{:>3} | {:<16} | {:<16} | {:<28} | {:>11} | {:>5}",
                    i + 1,
                    truncate(&r.name, 16),
                    truncate(&r.country, 16),
                    truncate(&r.best_season, 28),
                    r.restaurants,
                    cheapest
                );
            }
            println!("\n{} cities", rows.len());
        }
        Commands::Stats => {
            let s = db::get_stats(&conn)?;
            println!("Pages:       {}", s.total);
            println!("Visited:     {}", s.visited);
            println!("Unvisited:   {}", s.unvisited);
            println!("Fetched:     {}", s.fetched);
            println!("Errors:      {}", s.errors);
            println!("Cities:      {}", s.cities);
            println!("Restaurants: {}", s.restaurants);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn requests(pages: Vec<db::QueuedPage>) -> Vec<FetchRequest> {
    pages
        .into_iter()
        .map(|p| FetchRequest {
            page_id: p.id,
            url: p.url,
            kind: p.kind,
            meta: p.meta,
        })
        .collect()
}

/// Archive one fetch, queue a listing's restaurants, and ingest the record
/// when a writer is given. Returns the pages to fetch next. Per-page store
/// failures are logged and counted, never returned.
fn handle_fetch(
    conn: &Connection,
    mut writer: Option<&mut StoreWriter>,
    config: &CrawlConfig,
    result: FetchResult,
) -> anyhow::Result<Vec<FetchRequest>> {
    if let Err(e) = db::save_fetch(conn, &result.row) {
        error!(url = %result.row.url, "archiving fetch failed: {:#}", e);
        if let Some(writer) = writer.as_mut() {
            writer.reject(result.kind.record_kind(), Rejection::StoreError);
        }
    }

    let Some(body) = result.row.body.as_deref().filter(|_| result.is_ok()) else {
        if let Some(writer) = writer {
            writer.reject(result.kind.record_kind(), Rejection::FetchFailed);
        }
        return Ok(Vec::new());
    };
    if writer.is_none() && result.kind != PageKind::Listing {
        return Ok(Vec::new());
    }

    let url = result.row.final_url.as_deref().unwrap_or(&result.row.url);
    match parser::process_page(url, result.kind, &result.meta, body, Utc::now()) {
        Parsed::Listing(cards) => Ok(queue_follow_ups(
            conn,
            writer,
            &result.meta,
            cards,
            config.restaurants_per_city,
        )),
        Parsed::City(city) => {
            if let Some(writer) = writer {
                writer.ingest(Record::City(city));
            }
            Ok(Vec::new())
        }
        Parsed::Restaurant(resto) => {
            if let Some(writer) = writer {
                writer.ingest(Record::Restaurant(resto));
            }
            Ok(Vec::new())
        }
    }
}

fn queue_follow_ups(
    conn: &Connection,
    mut writer: Option<&mut StoreWriter>,
    listing_meta: &db::Meta,
    cards: Vec<parser::restaurant::ListingCard>,
    limit: usize,
) -> Vec<FetchRequest> {
    let found = cards.len();
    let mut next = Vec::new();
    for (url, meta) in parser::follow_ups(listing_meta, cards, limit) {
        match db::enqueue_page(conn, &url, PageKind::Restaurant, &meta) {
            Ok(Some(page_id)) => next.push(FetchRequest {
                page_id,
                url,
                kind: PageKind::Restaurant,
                meta,
            }),
            Ok(None) => {}
            Err(e) => {
                error!(%url, "queueing restaurant page failed: {:#}", e);
                if let Some(writer) = writer.as_mut() {
                    writer.reject(Some(Kind::Restaurant), Rejection::StoreError);
                }
            }
        }
    }
    info!(
        city = listing_meta.get("city").and_then(|c| c.as_str()).unwrap_or("?"),
        "Listing: {} restaurants found, {} queued",
        found,
        next.len()
    );
    next
}

fn process_pages(conn: &Connection, pages: &[db::ArchivedPage], per_city: usize) -> anyhow::Result<RunCounters> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );

    let mut writer = StoreWriter::new(conn);
    let mut queued = 0usize;
    for chunk in pages.chunks(500) {
        let now = Utc::now();
        let results: Vec<_> = chunk
            .par_iter()
            .map(|p| parser::process_page(&p.url, p.kind, &p.meta, &p.body, now))
            .collect();

        for (page, parsed) in chunk.iter().zip(results) {
            match parsed {
                Parsed::City(city) => {
                    writer.ingest(Record::City(city));
                }
                Parsed::Restaurant(resto) => {
                    writer.ingest(Record::Restaurant(resto));
                }
                Parsed::Listing(cards) => {
                    queued += queue_follow_ups(conn, Some(&mut writer), &page.meta, cards, per_city).len();
                }
            }
        }
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    if queued > 0 {
        println!("Queued {} restaurant pages from listings; run 'scrape' to fetch them.", queued);
    }
    Ok(writer.finish())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
