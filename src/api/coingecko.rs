use crate::config::CoinGeckoConfig;
use crate::models::{PricePoint, PriceSeries};
use anyhow::Context;
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use tokio::time::Instant;

// Type alias for the rate limiter to simplify signatures
type CoinGeckoRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Why a single market-chart request did not produce a series
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("rate limited by CoinGecko (429)")]
    Throttled,
    #[error("CoinGecko API error ({0})")]
    Status(StatusCode),
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed market chart: {0}")]
    Parse(String),
    #[error("market chart contained no prices")]
    Empty,
}

/// Response from /market_chart endpoint
#[derive(Debug, Deserialize)]
pub struct MarketChartData {
    pub prices: Vec<[f64; 2]>, // [timestamp_ms, price]
}

impl MarketChartData {
    /// Convert the raw pairs into a sorted series; empty input is a parse failure
    pub fn into_series(self) -> Result<PriceSeries, FeedError> {
        if self.prices.is_empty() {
            return Err(FeedError::Empty);
        }

        let mut points = Vec::with_capacity(self.prices.len());
        for [timestamp_ms, price] in self.prices {
            if !timestamp_ms.is_finite() || !price.is_finite() {
                return Err(FeedError::Parse(format!(
                    "non-finite entry [{}, {}]",
                    timestamp_ms, price
                )));
            }
            let point = PricePoint::from_millis(timestamp_ms as i64, price).ok_or_else(|| {
                FeedError::Parse(format!("timestamp out of range: {}", timestamp_ms))
            })?;
            points.push(point);
        }

        Ok(PriceSeries::from_unsorted(points))
    }
}

/// Last good series, replaced wholesale on every successful fetch
#[derive(Debug, Clone)]
struct CacheEntry {
    series: PriceSeries,
    fetched_at: Instant,
}

/// Market-data client with caching, retries and a throttling cooldown
///
/// `fetch` never fails: on any upstream problem it degrades to the last good
/// series, which is empty until the first successful fetch.
pub struct CoinGeckoClient {
    client: Client,
    config: CoinGeckoConfig,
    cache: Option<CacheEntry>,
    last_throttle_hit: Option<Instant>,
    rate_limiter: CoinGeckoRateLimiter,
}

impl CoinGeckoClient {
    pub fn new(config: CoinGeckoConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute)
            .context("coingecko.requests_per_minute must be positive")?;
        let rate_limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Ok(Self {
            client,
            config,
            cache: None,
            last_throttle_hit: None,
            rate_limiter,
        })
    }

    /// Fetch the price series for the last `lookback_hours`
    pub async fn fetch(&mut self, lookback_hours: u64) -> PriceSeries {
        // 1. Cooldown after a recent 429: no network call
        if let Some(hit) = self.last_throttle_hit {
            let cooldown = self.config.rate_limit_cooldown();
            if hit.elapsed() < cooldown {
                tracing::info!(
                    remaining_secs = cooldown.saturating_sub(hit.elapsed()).as_secs(),
                    "CoinGecko cooldown active, serving cached prices"
                );
                return self.cached_series();
            }
        }

        // 2. Fresh cache
        if let Some(entry) = &self.cache {
            if entry.fetched_at.elapsed() < self.config.cache_ttl() {
                tracing::debug!(points = entry.series.len(), "CoinGecko cache hit");
                return entry.series.clone();
            }
        }

        // 3. Attempts with the configured backoff schedule
        let attempts = self.config.retry.attempts();
        for attempt in 0..attempts {
            tracing::debug!(attempt = attempt + 1, attempts, "Calling CoinGecko");

            match self.request_series(lookback_hours).await {
                Ok(series) => {
                    let series = series.trim_to_hours(lookback_hours);
                    tracing::info!(points = series.len(), "Fetched prices from CoinGecko");
                    // A success always wins over an earlier throttle
                    self.last_throttle_hit = None;
                    self.cache = Some(CacheEntry {
                        series: series.clone(),
                        fetched_at: Instant::now(),
                    });
                    return series;
                }
                Err(FeedError::Throttled) => {
                    // Throttling is backed off via the cooldown, never retried inline
                    self.last_throttle_hit = Some(Instant::now());
                    tracing::warn!(
                        attempt = attempt + 1,
                        cooldown_secs = self.config.rate_limit_cooldown_secs,
                        "Rate limited by CoinGecko (429), entering cooldown"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        attempts,
                        error = %e,
                        "CoinGecko request failed"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        // 4. Degrade to the last good series
        let cached = self.cached_series();
        tracing::warn!(points = cached.len(), "Serving cached prices as fallback");
        cached
    }

    /// Make one rate-paced request and parse the body
    async fn request_series(&self, lookback_hours: u64) -> Result<PriceSeries, FeedError> {
        self.rate_limiter.until_ready().await;

        let url = format!(
            "{}/coins/{}/market_chart",
            self.config.api_url.trim_end_matches('/'),
            self.config.coin_id
        );
        let days = lookback_days(lookback_hours).to_string();

        let mut request = self
            .client
            .get(&url)
            .query(&[("vs_currency", self.config.vs_currency.as_str()), ("days", days.as_str())]);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FeedError::Throttled);
        }
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }

        let body = response.bytes().await?;
        let data: MarketChartData =
            serde_json::from_slice(&body).map_err(|e| FeedError::Parse(e.to_string()))?;

        data.into_series()
    }

    fn cached_series(&self) -> PriceSeries {
        self.cache
            .as_ref()
            .map(|entry| entry.series.clone())
            .unwrap_or_default()
    }

    /// Whether a throttling cooldown currently suppresses network calls
    pub fn in_cooldown(&self) -> bool {
        self.last_throttle_hit
            .map(|hit| hit.elapsed() < self.config.rate_limit_cooldown())
            .unwrap_or(false)
    }
}

/// The endpoint takes whole days; round the lookback up
fn lookback_days(lookback_hours: u64) -> u64 {
    lookback_hours.div_ceil(24).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedRetryConfig;
    use mockito::{Matcher, Server, ServerGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const CHART_PATH: &str = "/coins/bitcoin/market_chart";

    fn test_config(server: &ServerGuard) -> CoinGeckoConfig {
        CoinGeckoConfig {
            api_url: server.url(),
            cache_ttl_secs: 0,
            rate_limit_cooldown_secs: 60,
            requests_per_minute: 1_000,
            timeout_ms: 2_000,
            retry: FeedRetryConfig {
                max_attempts: 3,
                delays_ms: vec![1, 1, 1],
            },
            ..CoinGeckoConfig::default()
        }
    }

    fn chart_body(prices: &[(i64, f64)]) -> String {
        let pairs: Vec<String> = prices
            .iter()
            .map(|(ts, p)| format!("[{},{}]", ts, p))
            .collect();
        format!("{{\"prices\":[{}]}}", pairs.join(","))
    }

    fn hourly(n: usize) -> Vec<(i64, f64)> {
        (0..n)
            .map(|i| (1_700_000_000_000 + i as i64 * 3_600_000, 50_000.0 + i as f64 * 10.0))
            .collect()
    }

    #[test]
    fn test_lookback_days() {
        assert_eq!(lookback_days(0), 1);
        assert_eq!(lookback_days(24), 1);
        assert_eq!(lookback_days(25), 2);
        assert_eq!(lookback_days(48), 2);
    }

    #[test]
    fn test_empty_prices_is_parse_failure() {
        let data: MarketChartData = serde_json::from_str("{\"prices\":[]}").unwrap();
        assert!(matches!(data.into_series(), Err(FeedError::Empty)));
    }

    #[tokio::test]
    async fn test_successful_fetch_sorts_and_caches() {
        let mut server = Server::new_async().await;
        let mut points = hourly(5);
        points.reverse();

        let mock = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("vs_currency".into(), "usd".into()),
                Matcher::UrlEncoded("days".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(chart_body(&points))
            .expect(1)
            .create_async()
            .await;

        let mut client = CoinGeckoClient::new(test_config(&server)).unwrap();
        let series = client.fetch(48).await;

        mock.assert_async().await;
        assert_eq!(series.len(), 5);
        assert_eq!(series.prices()[0], 50_000.0);
        assert_eq!(series.latest().unwrap().price, 50_040.0);
    }

    #[tokio::test]
    async fn test_two_fetches_within_ttl_issue_one_call() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(chart_body(&hourly(3)))
            .expect(1)
            .create_async()
            .await;

        let mut config = test_config(&server);
        config.cache_ttl_secs = 600;
        let mut client = CoinGeckoClient::new(config).unwrap();

        let first = client.fetch(48).await;
        let second = client.fetch(48).await;

        mock.assert_async().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_throttle_halts_attempts_and_keeps_cache() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(chart_body(&hourly(4)))
            .expect(1)
            .create_async()
            .await;

        let mut client = CoinGeckoClient::new(test_config(&server)).unwrap();
        let good = client.fetch(48).await;
        ok.assert_async().await;
        ok.remove_async().await;

        // Second fetch: 500 then 429 then (never reached) anything
        let failing = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let throttled = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;

        let after_throttle = client.fetch(48).await;

        failing.assert_async().await;
        throttled.assert_async().await;
        assert_eq!(after_throttle, good);
        assert!(client.in_cooldown());

        // During cooldown there is no network call at all
        let during_cooldown = client.fetch(48).await;
        throttled.assert_async().await;
        assert_eq!(during_cooldown, good);
    }

    #[tokio::test]
    async fn test_first_success_wins_after_throttle() {
        let mut server = Server::new_async().await;

        // 429 ends the first fetch; the next one succeeds and clears the throttle
        let throttled = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(chart_body(&hourly(3)))
            .expect(1)
            .create_async()
            .await;

        let mut config = test_config(&server);
        config.rate_limit_cooldown_secs = 0;
        let mut client = CoinGeckoClient::new(config).unwrap();

        let first = client.fetch(48).await;
        assert!(first.is_empty());
        throttled.assert_async().await;

        let second = client.fetch(48).await;
        ok.assert_async().await;
        assert_eq!(second.len(), 3);
        assert!(client.last_throttle_hit.is_none());
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_succeed() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;
        let ok = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(chart_body(&hourly(6)))
            .expect(1)
            .create_async()
            .await;

        let mut client = CoinGeckoClient::new(test_config(&server)).unwrap();
        let series = client.fetch(48).await;

        failing.assert_async().await;
        ok.assert_async().await;
        assert_eq!(series.len(), 6);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_bodies_degrade_to_cache() {
        let mut server = Server::new_async().await;
        let empty = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("{\"prices\":[]}")
            .expect(1)
            .create_async()
            .await;
        let garbage = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>oops</html>")
            .expect(2)
            .create_async()
            .await;

        let mut client = CoinGeckoClient::new(test_config(&server)).unwrap();
        let series = client.fetch(48).await;

        empty.assert_async().await;
        garbage.assert_async().await;
        assert!(series.is_empty());
        assert!(!client.in_cooldown());
    }

    #[tokio::test]
    async fn test_lookback_trims_old_points() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(chart_body(&hourly(72)))
            .create_async()
            .await;

        let mut client = CoinGeckoClient::new(test_config(&server)).unwrap();
        let series = client.fetch(24).await;

        // newest point plus the 24 hours before it
        assert_eq!(series.len(), 25);
    }

    #[tokio::test]
    async fn test_sends_demo_api_key_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", CHART_PATH)
            .match_query(Matcher::Any)
            .match_header("x-cg-demo-api-key", "demo-key")
            .with_status(200)
            .with_body(chart_body(&hourly(2)))
            .expect(1)
            .create_async()
            .await;

        let mut config = test_config(&server);
        config.api_key = Some("demo-key".to_string());
        let mut client = CoinGeckoClient::new(config).unwrap();
        client.fetch(48).await;

        mock.assert_async().await;
    }

    /// Accepts connections and never answers them
    async fn silent_upstream() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        (url, accepted)
    }

    #[tokio::test]
    async fn test_timeout_retries_like_failed_response() {
        let (url, accepted) = silent_upstream().await;
        let server = Server::new_async().await;
        let config = CoinGeckoConfig {
            api_url: url,
            timeout_ms: 200,
            retry: FeedRetryConfig {
                max_attempts: 2,
                delays_ms: vec![1, 1],
            },
            ..test_config(&server)
        };

        let mut client = CoinGeckoClient::new(config).unwrap();
        let started = std::time::Instant::now();
        let series = client.fetch(48).await;

        assert!(series.is_empty());
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_millis(400));
        // A timeout is not throttling
        assert!(!client.in_cooldown());
    }
}
