// Runtime configuration
// Defaults mirror the production deployment; every field can be overridden
// from config/btcbot.toml or BTCBOT__SECTION__KEY environment variables.

use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "BTCBOT";
pub const DEFAULT_CONFIG_PATH: &str = "config/btcbot";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub coingecko: CoinGeckoConfig,
    pub indicator: IndicatorConfig,
    pub signal: SignalConfig,
    pub gateway: GatewayConfig,
    pub scheduler: SchedulerConfig,
    pub templates: TemplateConfig,
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinGeckoConfig {
    pub api_url: String,
    pub coin_id: String,
    pub vs_currency: String,
    /// Demo API key, sent as `x-cg-demo-api-key` when present
    pub api_key: Option<String>,
    pub lookback_hours: u64,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub rate_limit_cooldown_secs: u64,
    pub requests_per_minute: u32,
    pub retry: FeedRetryConfig,
}

impl Default for CoinGeckoConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.coingecko.com/api/v3".to_string(),
            coin_id: "bitcoin".to_string(),
            vs_currency: "usd".to_string(),
            api_key: None,
            lookback_hours: 48,
            timeout_ms: 10_000,
            cache_ttl_secs: 600,
            rate_limit_cooldown_secs: 120,
            requests_per_minute: 30, // Demo API: 30 requests per minute
            retry: FeedRetryConfig::default(),
        }
    }
}

impl CoinGeckoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

/// Fixed per-attempt backoff schedule for the market-data API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedRetryConfig {
    pub max_attempts: u32,
    pub delays_ms: Vec<u64>,
}

impl Default for FeedRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays_ms: vec![2_000, 5_000, 10_000],
        }
    }
}

impl FeedRetryConfig {
    /// Attempts are capped by the length of the delay schedule
    pub fn attempts(&self) -> usize {
        (self.max_attempts as usize).min(self.delays_ms.len())
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.delays_ms.get(attempt).copied().unwrap_or(0))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub period: usize,
    /// Warm-up window W
    pub min_data_points: usize,
    /// Ring buffer capacity
    pub recent_prices_limit: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            period: 14,
            min_data_points: 15,
            recent_prices_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub oversold_level: f64,
    pub overbought_level: f64,
    pub price_change_threshold_pct: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            oversold_level: 30.0,
            overbought_level: 70.0,
            price_change_threshold_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub instance_id: String,
    pub api_key: String,
    pub recipient: String,
    pub timeout_ms: u64,
    pub max_per_window: u32,
    pub window_secs: u64,
    pub cooldown_ms: u64,
    pub throttle_cooldown_ms: u64,
    pub max_queue_len: usize,
    pub max_message_age_secs: u64,
    pub retry: GatewayRetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080".to_string(),
            instance_id: "btcbot".to_string(),
            api_key: String::new(),
            recipient: String::new(),
            timeout_ms: 10_000,
            max_per_window: 50,
            window_secs: 3_600,
            cooldown_ms: 60_000,
            throttle_cooldown_ms: 120_000,
            max_queue_len: 100,
            max_message_age_secs: 3_600,
            retry: GatewayRetryConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }

    pub fn max_message_age(&self) -> Duration {
        Duration::from_secs(self.max_message_age_secs)
    }
}

/// Exponential backoff for the messaging gateway
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for GatewayRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl GatewayRetryConfig {
    /// `min(initial * 2^attempt, max)`, attempt counted from 0
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Local socket the running service accepts manual notifications on
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub bind_addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub cooldown_minutes: u64,
    pub max_cooldown_multiplier: u32,
    pub max_jitter_secs: u64,
    pub skip_first_run: bool,
    pub reset_failures_after_hours: u64,
    pub report_failures: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1_800,
            health_check_interval_secs: 3_600,
            cooldown_minutes: 15,
            max_cooldown_multiplier: 4,
            max_jitter_secs: 60,
            skip_first_run: true,
            reset_failures_after_hours: 2,
            report_failures: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn base_cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_minutes * 60)
    }

    pub fn reset_failures_after(&self) -> Duration {
        Duration::from_secs(self.reset_failures_after_hours * 3_600)
    }
}

/// Alert templates; `{price}`, `{rsi}`, `{change}`, `{signal}` and `{error}` are substituted
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub send_periodic: bool,
    pub periodic: String,
    pub price_change: String,
    pub rsi_cross_down: String,
    pub rsi_cross_up: String,
    pub classic_signal: String,
    pub cycle_failure: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            send_periodic: true,
            periodic: "** BTC update **\n\nPrice: ${price}\nRSI: {rsi}".to_string(),
            price_change: "** BTC move **\n\nChange: {change}%\nPrice: ${price}".to_string(),
            rsi_cross_down: "** RSI back below overbought **\n\nPrice: ${price}\nRSI: {rsi}"
                .to_string(),
            rsi_cross_up: "** RSI back above oversold **\n\nPrice: ${price}\nRSI: {rsi}"
                .to_string(),
            classic_signal: "** BTC SIGNAL **\n\n{signal}\n\nPrice: ${price}\nRSI: {rsi}"
                .to_string(),
            cycle_failure: "** btcbot cycle failed **\n\n{error}".to_string(),
        }
    }
}

impl BotConfig {
    /// Load `.env`, then the optional config file, then `BTCBOT__*` environment overrides
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("coingecko.retry.delays_ms"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        let config: BotConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }

    /// Fail fast on settings the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.api_key"));
        }
        if self.gateway.recipient.trim().is_empty() {
            return Err(ConfigError::Missing("gateway.recipient"));
        }

        let ind = &self.indicator;
        if ind.period == 0 {
            return Err(ConfigError::Invalid {
                field: "indicator.period",
                reason: "must be positive".to_string(),
            });
        }
        if ind.min_data_points < ind.period + 1 {
            return Err(ConfigError::Invalid {
                field: "indicator.min_data_points",
                reason: format!("must be at least period + 1 ({})", ind.period + 1),
            });
        }
        if ind.recent_prices_limit < ind.min_data_points {
            return Err(ConfigError::Invalid {
                field: "indicator.recent_prices_limit",
                reason: format!("must be at least min_data_points ({})", ind.min_data_points),
            });
        }

        if self.signal.oversold_level >= self.signal.overbought_level {
            return Err(ConfigError::Invalid {
                field: "signal.oversold_level",
                reason: "must be below signal.overbought_level".to_string(),
            });
        }

        if self.coingecko.retry.attempts() == 0 {
            return Err(ConfigError::Invalid {
                field: "coingecko.retry",
                reason: "needs at least one attempt and one delay entry".to_string(),
            });
        }
        if self.coingecko.requests_per_minute == 0 {
            return Err(ConfigError::Invalid {
                field: "coingecko.requests_per_minute",
                reason: "must be positive".to_string(),
            });
        }
        if self.gateway.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.retry.max_attempts",
                reason: "must be positive".to_string(),
            });
        }
        if self.gateway.window_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "gateway.window_secs",
                reason: "must be positive".to_string(),
            });
        }
        if self.scheduler.interval_secs == 0 || self.scheduler.health_check_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "scheduler.interval_secs",
                reason: "intervals must be positive".to_string(),
            });
        }

        Ok(())
    }
}
