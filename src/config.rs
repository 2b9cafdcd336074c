use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/guide.sqlite";

pub const CONCURRENCY: usize = 2;
pub const PER_HOST_CONCURRENCY: usize = 2;
pub const DELAY_MS: u64 = 3000;
pub const MAX_RETRIES: u32 = 5;
pub const BASE_BACKOFF_MS: u64 = 2000;
pub const RETRY_STATUSES: &[u16] = &[500, 502, 503, 504, 408, 429];
pub const TIMEOUT_SECS: u64 = 30;
pub const AUTOTHROTTLE_THRESHOLD_MS: u64 = 5000;
/// Autothrottle never pushes a host's delay past this multiple of the base.
pub const AUTOTHROTTLE_MAX_FACTOR: u32 = 8;
pub const RESTAURANTS_PER_CITY: usize = 10;

pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en;q=0.8";

/// Crawl politeness and retry policy. Built once per run.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub concurrency: usize,
    pub per_host: usize,
    pub delay: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub retry_statuses: Vec<u16>,
    pub timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
    pub autothrottle_threshold: Duration,
    pub restaurants_per_city: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            concurrency: CONCURRENCY,
            per_host: PER_HOST_CONCURRENCY,
            delay: Duration::from_millis(DELAY_MS),
            max_retries: MAX_RETRIES,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
            retry_statuses: RETRY_STATUSES.to_vec(),
            timeout: Duration::from_secs(TIMEOUT_SECS),
            user_agent: USER_AGENT.to_string(),
            accept_language: ACCEPT_LANGUAGE.to_string(),
            autothrottle_threshold: Duration::from_millis(AUTOTHROTTLE_THRESHOLD_MS),
            restaurants_per_city: RESTAURANTS_PER_CITY,
        }
    }
}

impl CrawlConfig {
    /// Exponential backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.min(16))
    }

    pub fn max_delay(&self) -> Duration {
        self.delay * AUTOTHROTTLE_MAX_FACTOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.backoff(0), Duration::from_millis(2000));
        assert_eq!(cfg.backoff(1), Duration::from_millis(4000));
        assert_eq!(cfg.backoff(3), Duration::from_millis(16000));
    }

    #[test]
    fn defaults_match_politeness_policy() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.delay, Duration::from_secs(3));
        assert_eq!(cfg.max_delay(), Duration::from_secs(24));
        assert!(cfg.retry_statuses.contains(&429));
        assert!(!cfg.retry_statuses.contains(&404));
    }
}
