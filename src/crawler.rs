use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::CrawlConfig;
use crate::db::{FetchRow, Meta, PageKind};

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub page_id: i64,
    pub url: String,
    pub kind: PageKind,
    pub meta: Meta,
}

/// A fetch outcome with the request's kind and meta passed through unchanged.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub row: FetchRow,
    pub kind: PageKind,
    pub meta: Meta,
}

impl FetchResult {
    pub fn is_ok(&self) -> bool {
        self.row.error.is_none() && self.row.body.is_some()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

impl FetchError {
    pub fn is_retryable(&self, statuses: &[u16]) -> bool {
        match self {
            FetchError::Status(code) => statuses.contains(code),
            FetchError::Request(e) => !e.is_builder() && !e.is_redirect() && !e.is_decode(),
        }
    }
}

/// Crawl stats returned after completion.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub discovered: usize,
    /// Results whose handler failed. The crawl carries on past them.
    pub handler_errors: usize,
}

// ── Per-host politeness ──

/// Delay bookkeeping for one host.
#[derive(Debug)]
struct Pace {
    next_start: Instant,
    delay: Duration,
}

impl Pace {
    fn new(delay: Duration) -> Self {
        Pace {
            next_start: Instant::now(),
            delay,
        }
    }

    /// Book the next start slot and return how long to wait for it.
    fn reserve(&mut self, now: Instant) -> Duration {
        let start = self.next_start.max(now);
        self.next_start = start + self.delay;
        start - now
    }

    /// Slow responses double the delay up to `max`, fast ones halve it back
    /// down to `base`.
    fn observe(&mut self, latency: Duration, threshold: Duration, base: Duration, max: Duration) {
        let before = self.delay;
        self.delay = if latency > threshold {
            (self.delay * 2).min(max)
        } else {
            (self.delay / 2).max(base)
        };
        if self.delay != before {
            debug!(
                "Autothrottle: {}ms -> {}ms (latency {}ms)",
                before.as_millis(),
                self.delay.as_millis(),
                latency.as_millis()
            );
        }
    }
}

struct HostSlot {
    permits: Semaphore,
    pace: Mutex<Pace>,
}

pub struct Crawler {
    client: reqwest::Client,
    config: CrawlConfig,
    global: Semaphore,
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl Crawler {
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language).context("Invalid Accept-Language value")?,
        );
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Crawler {
            client,
            config: config.clone(),
            global: Semaphore::new(config.concurrency.max(1)),
            hosts: Mutex::new(HashMap::new()),
        })
    }

    fn host_slot(&self, url: &str) -> Arc<HostSlot> {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(hosts.entry(host).or_insert_with(|| {
            Arc::new(HostSlot {
                permits: Semaphore::new(self.config.per_host.max(1)),
                pace: Mutex::new(Pace::new(self.config.delay)),
            })
        }))
    }

    /// Fetch with politeness and retry. Never fails: errors land in the row.
    pub async fn fetch(&self, req: &FetchRequest) -> FetchRow {
        let mut row = FetchRow {
            page_id: req.page_id,
            url: req.url.clone(),
            final_url: None,
            status: None,
            body: None,
            error: None,
            latency_ms: None,
        };

        let slot = self.host_slot(&req.url);
        // Host first, so a task queued behind a busy host holds no global slot.
        let (Ok(_host), Ok(_global)) = (slot.permits.acquire().await, self.global.acquire().await) else {
            row.error = Some("crawler shut down".into());
            return row;
        };

        for attempt in 0..=self.config.max_retries {
            let wait = slot
                .pace
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .reserve(Instant::now());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            let start = Instant::now();
            let outcome = self.fetch_once(&req.url).await;
            let latency = start.elapsed();
            row.latency_ms = Some(latency.as_millis() as i64);
            slot.pace.lock().unwrap_or_else(|e| e.into_inner()).observe(
                latency,
                self.config.autothrottle_threshold,
                self.config.delay,
                self.config.max_delay(),
            );

            match outcome {
                Ok((status, final_url, body)) => {
                    row.status = Some(status);
                    row.final_url = Some(final_url);
                    row.body = Some(body);
                    row.error = None;
                    return row;
                }
                Err(e) => {
                    if let FetchError::Status(code) = &e {
                        row.status = Some(*code);
                    }
                    row.error = Some(e.to_string());

                    if !e.is_retryable(&self.config.retry_statuses) || attempt == self.config.max_retries {
                        warn!("Fetch failed for {}: {}", req.url, e);
                        return row;
                    }
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        e,
                        req.url,
                        attempt + 1,
                        self.config.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        row
    }

    async fn fetch_once(&self, url: &str) -> Result<(u16, String, String), FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok((status.as_u16(), final_url, body))
    }
}

/// Fetch `seeds` concurrently and hand each result to `on_result` as it
/// arrives. Requests it returns are fetched in the same run; page ids already
/// scheduled are skipped.
pub async fn crawl<F>(config: &CrawlConfig, seeds: Vec<FetchRequest>, mut on_result: F) -> Result<CrawlStats>
where
    F: FnMut(FetchResult) -> Result<Vec<FetchRequest>>,
{
    let crawler = Arc::new(Crawler::new(config)?);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchResult>(config.concurrency.max(1) * 2);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let mut scheduled = HashSet::new();
    let mut pending = 0usize;
    let mut stats = CrawlStats::default();

    let spawn = |req: FetchRequest, scheduled: &mut HashSet<i64>| -> bool {
        if !scheduled.insert(req.page_id) {
            return false;
        }
        let crawler = Arc::clone(&crawler);
        let tx = tx.clone();
        tokio::spawn(async move {
            let row = crawler.fetch(&req).await;
            let _ = tx
                .send(FetchResult {
                    row,
                    kind: req.kind,
                    meta: req.meta,
                })
                .await;
        });
        true
    };

    for req in seeds {
        if spawn(req, &mut scheduled) {
            pending += 1;
        }
    }
    pb.set_length(pending as u64);

    while pending > 0 {
        let Some(result) = rx.recv().await else {
            break;
        };
        pending -= 1;
        stats.total += 1;
        if result.is_ok() {
            stats.ok += 1;
        } else {
            stats.errors += 1;
        }

        let url = result.row.url.clone();
        let follow_ups = match on_result(result) {
            Ok(reqs) => reqs,
            Err(e) => {
                error!("Handling {} failed: {:#}", url, e);
                stats.handler_errors += 1;
                Vec::new()
            }
        };
        for req in follow_ups {
            if spawn(req, &mut scheduled) {
                pending += 1;
                stats.discovered += 1;
                pb.inc_length(1);
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Fetched {} pages ({} ok, {} errors, {} discovered, {} handler errors)",
        stats.total, stats.ok, stats.errors, stats.discovered, stats.handler_errors
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn retryable_statuses_follow_config() {
        let statuses = CrawlConfig::default().retry_statuses;
        assert!(FetchError::Status(503).is_retryable(&statuses));
        assert!(FetchError::Status(429).is_retryable(&statuses));
        assert!(!FetchError::Status(404).is_retryable(&statuses));
        assert!(!FetchError::Status(403).is_retryable(&statuses));
    }

    #[test]
    fn pace_spaces_request_starts() {
        let base = Duration::from_millis(100);
        let mut pace = Pace::new(base);
        let now = Instant::now();
        assert_eq!(pace.reserve(now), Duration::ZERO);
        assert_eq!(pace.reserve(now), base);
        assert_eq!(pace.reserve(now), base * 2);
    }

    #[test]
    fn autothrottle_doubles_then_recovers() {
        let base = Duration::from_millis(100);
        let max = base * 8;
        let threshold = Duration::from_millis(50);
        let mut pace = Pace::new(base);

        for _ in 0..5 {
            pace.observe(Duration::from_millis(80), threshold, base, max);
        }
        assert_eq!(pace.delay, max);

        pace.observe(Duration::from_millis(10), threshold, base, max);
        assert_eq!(pace.delay, base * 4);
        for _ in 0..5 {
            pace.observe(Duration::from_millis(10), threshold, base, max);
        }
        assert_eq!(pace.delay, base);
    }

    /// Minimal HTTP/1.1 server: `/missing` is a 404, anything else echoes
    /// its path as the body.
    async fn serve() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = if path == "/missing" {
                        ("404 Not Found", String::new())
                    } else {
                        ("200 OK", format!("<html><body>{path}</body></html>"))
                    };
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn fast_config() -> CrawlConfig {
        CrawlConfig {
            delay: Duration::ZERO,
            base_backoff: Duration::from_millis(1),
            max_retries: 1,
            timeout: Duration::from_secs(5),
            ..CrawlConfig::default()
        }
    }

    #[tokio::test]
    async fn crawl_follows_discovered_pages_and_reports_failures() {
        let base = serve().await;
        let seeds = vec![
            FetchRequest {
                page_id: 1,
                url: format!("{base}/listing"),
                kind: PageKind::Listing,
                meta: Meta::new(),
            },
            FetchRequest {
                page_id: 2,
                url: format!("{base}/missing"),
                kind: PageKind::City,
                meta: Meta::new(),
            },
        ];

        let mut seen = Vec::new();
        let stats = crawl(&fast_config(), seeds, |result| {
            seen.push((result.row.page_id, result.row.status, result.is_ok()));
            if result.kind == PageKind::Listing {
                let mut meta = Meta::new();
                meta.insert("city".into(), "Paris".into());
                // Page 1 again is ignored: already scheduled.
                return Ok(vec![
                    FetchRequest {
                        page_id: 3,
                        url: format!("{base}/detail"),
                        kind: PageKind::Restaurant,
                        meta,
                    },
                    FetchRequest {
                        page_id: 1,
                        url: format!("{base}/listing"),
                        kind: PageKind::Listing,
                        meta: Meta::new(),
                    },
                ]);
            }
            if result.kind == PageKind::Restaurant {
                assert_eq!(result.meta["city"], "Paris");
                assert!(result.row.body.as_deref().unwrap_or_default().contains("/detail"));
            }
            Ok(Vec::new())
        })
        .await
        .unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.ok, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.discovered, 1);
        seen.sort();
        assert_eq!(seen[1], (2, Some(404), false));
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_crawl() {
        let base = serve().await;
        let seeds = (1..=3)
            .map(|id| FetchRequest {
                page_id: id,
                url: format!("{base}/page-{id}"),
                kind: PageKind::City,
                meta: Meta::new(),
            })
            .collect();

        let mut handled = 0;
        let stats = crawl(&fast_config(), seeds, |result| {
            handled += 1;
            if result.row.page_id == 2 {
                anyhow::bail!("database is locked");
            }
            Ok(Vec::new())
        })
        .await
        .unwrap();

        assert_eq!(handled, 3);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.ok, 3);
        assert_eq!(stats.handler_errors, 1);
    }
}
