//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials and the webhook URL.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::indicators::VolatilityBounds;
use crate::strategy::StrategyParams;
use crate::types::{Ticker, Timeframe};
use crate::upbit::MAX_CANDLES_PER_REQUEST;

pub const ENV_ACCESS_KEY: &str = "UPBIT_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "UPBIT_SECRET_KEY";
pub const ENV_WEBHOOK_URL: &str = "DISCORD_WEBHOOK_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingMode {
    /// Simulated fills against live prices
    Paper,
    /// Real orders on the exchange
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TradingMode::Paper => "PAPER",
            TradingMode::Live => "LIVE",
        })
    }
}

/// Startup validation failures. All of them are fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no tickers configured")]
    NoTickers,

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("live trading needs API credentials (UPBIT_ACCESS_KEY / UPBIT_SECRET_KEY)")]
    MissingCredentials,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub atr: AtrConfig,
    pub schedule: ScheduleConfig,
    pub notification: NotificationConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from JSON file, then overlay environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay credentials and webhook URL from `lookup` (normally the
    /// process environment). Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(access_key) = get(ENV_ACCESS_KEY) {
            self.exchange.api_key = Some(access_key);
        }
        if let Some(secret_key) = get(ENV_SECRET_KEY) {
            self.exchange.api_secret = Some(secret_key);
        }
        if let Some(url) = get(ENV_WEBHOOK_URL) {
            self.notification.webhook_url = Some(url);
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Check every value the trading loop relies on
    pub fn validate(&self, mode: TradingMode) -> Result<(), ConfigError> {
        if self.tickers().is_empty() {
            return Err(ConfigError::NoTickers);
        }

        let t = &self.trading;
        if !(t.buy_amount.is_finite() && t.buy_amount > 0.0) {
            return Err(invalid("trading.buy_amount", "must be positive"));
        }
        if !(t.target_profit_multiple.is_finite() && t.target_profit_multiple > 1.0) {
            return Err(invalid("trading.target_profit_multiple", "must be greater than 1"));
        }
        if !(t.base_drop_ratio > 0.0 && t.base_drop_ratio <= 1.0) {
            return Err(invalid("trading.base_drop_ratio", "must be in (0, 1]"));
        }

        let a = &self.atr;
        if a.period == 0 {
            return Err(invalid("atr.period", "must be at least 1"));
        }
        if a.period + 1 > MAX_CANDLES_PER_REQUEST {
            return Err(invalid(
                "atr.period",
                format!(
                    "needs {} candles, the exchange returns at most {}",
                    a.period + 1,
                    MAX_CANDLES_PER_REQUEST
                ),
            ));
        }
        if a.bounds.min_atr_percent.partial_cmp(&a.bounds.max_atr_percent) != Some(Ordering::Less) {
            return Err(invalid(
                "atr.bounds",
                "min_atr_percent must be below max_atr_percent",
            ));
        }
        for (field, scale) in [
            ("atr.bounds.min_scale", a.bounds.min_scale),
            ("atr.bounds.max_scale", a.bounds.max_scale),
        ] {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(invalid(field, "must be in (0, 1]"));
            }
        }

        let s = &self.schedule;
        if s.cycle_interval_secs == 0 {
            return Err(invalid("schedule.cycle_interval_secs", "must be at least 1"));
        }
        if s.settle_poll_secs == 0 {
            return Err(invalid("schedule.settle_poll_secs", "must be at least 1"));
        }

        if mode == TradingMode::Paper {
            let e = &self.exchange;
            if !(e.paper_cash.is_finite() && e.paper_cash >= 0.0) {
                return Err(invalid("exchange.paper_cash", "must be non-negative"));
            }
            if !(e.paper_fee_rate >= 0.0 && e.paper_fee_rate < 1.0) {
                return Err(invalid("exchange.paper_fee_rate", "must be in [0, 1)"));
            }
        }

        if mode == TradingMode::Live && !self.exchange.has_credentials() {
            return Err(ConfigError::MissingCredentials);
        }

        Ok(())
    }

    /// Configured tickers: trimmed, upper-cased, de-duplicated, in order
    pub fn tickers(&self) -> Vec<Ticker> {
        let mut seen = Vec::new();
        for raw in &self.trading.tickers {
            if raw.trim().is_empty() {
                continue;
            }
            let ticker = Ticker::new(raw);
            if !seen.contains(&ticker) {
                seen.push(ticker);
            }
        }
        seen
    }

    pub fn strategy_params(&self) -> StrategyParams {
        StrategyParams {
            target_profit_multiple: self.trading.target_profit_multiple,
            base_drop_ratio: self.trading.base_drop_ratio,
            bounds: self.atr.bounds,
        }
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// Starting cash for `--paper` runs
    pub paper_cash: f64,
    /// Taker fee applied to simulated fills
    pub paper_fee_rate: f64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            api_key: None,
            api_secret: None,
            max_retries: 3,
            timeout_secs: 10,
            paper_cash: 1_000_000.0,
            paper_fee_rate: 0.0005, // 0.05%
        }
    }
}

impl ExchangeConfig {
    pub fn has_credentials(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.api_key) && set(&self.api_secret)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Exchange market codes, e.g. "KRW-BTC"
    pub tickers: Vec<String>,
    /// Quote currency spent per buy order
    pub buy_amount: f64,
    /// Take profit at `avg_cost * target_profit_multiple`
    pub target_profit_multiple: f64,
    /// Baseline add-on trigger before volatility scaling
    pub base_drop_ratio: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            tickers: vec![
                "KRW-BTC".to_string(),
                "KRW-ETH".to_string(),
                "KRW-XRP".to_string(),
            ],
            buy_amount: 5_000.0,
            target_profit_multiple: 1.01,
            base_drop_ratio: 0.99,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtrConfig {
    pub timeframe: Timeframe,
    pub period: usize,
    pub bounds: VolatilityBounds,
}

impl Default for AtrConfig {
    fn default() -> Self {
        AtrConfig {
            timeframe: Timeframe::Minutes(5),
            period: 100,
            bounds: VolatilityBounds::default(),
        }
    }
}

/// Loop cadence, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Pause between full sweeps of the ticker set
    pub cycle_interval_secs: u64,
    /// Pause after any order once it has settled (or timed out)
    pub post_order_delay_secs: u64,
    /// Pause after a cycle-level failure
    pub error_backoff_secs: u64,
    pub settle_poll_secs: u64,
    pub settle_timeout_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            cycle_interval_secs: 5,
            post_order_delay_secs: 10,
            error_backoff_secs: 5,
            settle_poll_secs: 1,
            settle_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Reference prices (ticker -> last buy price)
    pub state_file: PathBuf,
    /// Reference prices for `--paper` runs, kept apart from live ones
    pub paper_reference_file: PathBuf,
    /// Simulated balances for `--paper` runs
    pub paper_state_file: PathBuf,
    /// ATR audit CSV; omit to disable
    pub atr_log_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            state_file: PathBuf::from("state/last_buy_prices.json"),
            paper_reference_file: PathBuf::from("state/paper_last_buy_prices.json"),
            paper_state_file: PathBuf::from("state/paper_book.json"),
            atr_log_file: Some(PathBuf::from("logs/atr_log.csv")),
        }
    }
}

impl StorageConfig {
    pub fn reference_file(&self, mode: TradingMode) -> &Path {
        match mode {
            TradingMode::Live => &self.state_file,
            TradingMode::Paper => &self.paper_reference_file,
        }
    }
}
