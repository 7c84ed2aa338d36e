//! Runtime configuration loaded from the environment

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Flat settings read from environment variables (`PORT`, `OPENAI_API_KEY`, ...)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Symbol used when a caller does not name one
    #[serde(default = "default_symbol", rename = "trading_symbol")]
    pub default_symbol: String,

    // Reasoning provider
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Exchange
    #[serde(default)]
    pub aster_api_key: Option<String>,
    #[serde(default)]
    pub aster_api_secret: Option<String>,
    #[serde(default = "default_aster_base_url")]
    pub aster_base_url: String,
    #[serde(default = "default_aster_timeout_ms")]
    pub aster_timeout_ms: u64,
    #[serde(default = "default_price_cache_ttl_ms")]
    pub price_cache_ttl_ms: u64,

    // Market snapshot
    #[serde(default = "default_candle_interval")]
    pub candle_interval: String,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,

    // Sizing rails
    #[serde(default = "default_risk_fallback_max_usd")]
    pub risk_fallback_max_usd: Decimal,
    #[serde(default = "default_portfolio_balance_cap")]
    pub portfolio_balance_cap: Decimal,
    #[serde(default = "default_fallback_order_usd")]
    pub fallback_order_usd: Decimal,
    #[serde(default = "default_fallback_leverage")]
    pub fallback_leverage: u32,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_quantity_precision")]
    pub quantity_precision: u32,

    // Bookkeeping
    #[serde(default)]
    pub audit_dir: Option<PathBuf>,
    #[serde(default = "default_max_retained_runs")]
    pub max_retained_runs: usize,
}

impl Settings {
    /// Load settings from the process environment (after `.env`, if present)
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    /// Load settings from an arbitrary `config` source
    pub fn from_source<S>(source: S) -> anyhow::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Reasoning is available only when an API key is configured
    pub fn reasoning_key(&self) -> Option<&str> {
        non_empty(self.openai_api_key.as_deref())
    }

    /// Exchange key pair, if both halves are configured
    pub fn exchange_credentials(&self) -> Option<(String, String)> {
        match (
            non_empty(self.aster_api_key.as_deref()),
            non_empty(self.aster_api_secret.as_deref()),
        ) {
            (Some(key), Some(secret)) => Some((key.to_string(), secret.to_string())),
            _ => None,
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.aster_timeout_ms)
    }

    pub fn price_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.price_cache_ttl_ms)
    }

    /// Sizing and snapshot parameters handed to the pipeline stages
    pub fn limits(&self) -> TradingLimits {
        TradingLimits {
            risk_fallback_max_usd: self.risk_fallback_max_usd,
            portfolio_balance_cap: self.portfolio_balance_cap,
            fallback_order_usd: self.fallback_order_usd,
            fallback_leverage: self.fallback_leverage.max(1),
            max_leverage: self.max_leverage.max(1),
            quantity_precision: self.quantity_precision,
            candle_interval: self.candle_interval.clone(),
            candle_limit: self.candle_limit,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            default_symbol: default_symbol(),
            openai_api_key: None,
            llm_model: default_llm_model(),
            llm_base_url: default_llm_base_url(),
            llm_timeout_secs: default_llm_timeout_secs(),
            aster_api_key: None,
            aster_api_secret: None,
            aster_base_url: default_aster_base_url(),
            aster_timeout_ms: default_aster_timeout_ms(),
            price_cache_ttl_ms: default_price_cache_ttl_ms(),
            candle_interval: default_candle_interval(),
            candle_limit: default_candle_limit(),
            risk_fallback_max_usd: default_risk_fallback_max_usd(),
            portfolio_balance_cap: default_portfolio_balance_cap(),
            fallback_order_usd: default_fallback_order_usd(),
            fallback_leverage: default_fallback_leverage(),
            max_leverage: default_max_leverage(),
            quantity_precision: default_quantity_precision(),
            audit_dir: None,
            max_retained_runs: default_max_retained_runs(),
        }
    }
}

/// Hard sizing rails and snapshot parameters used by the stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingLimits {
    /// Risk cap used when the reasoning capability is absent or fails
    pub risk_fallback_max_usd: Decimal,
    /// Fraction of available balance a single plan may allocate
    pub portfolio_balance_cap: Decimal,
    /// Order size used by the portfolio stage without reasoning
    pub fallback_order_usd: Decimal,
    pub fallback_leverage: u32,
    pub max_leverage: u32,
    /// Decimal places kept on order quantities
    pub quantity_precision: u32,
    pub candle_interval: String,
    pub candle_limit: u32,
}

impl Default for TradingLimits {
    fn default() -> Self {
        Settings::default().limits()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn default_port() -> u16 { 3001 }
fn default_log_level() -> String { "info".to_string() }
fn default_symbol() -> String { "BTCUSDT".to_string() }
fn default_llm_model() -> String { "gpt-4".to_string() }
fn default_llm_base_url() -> String { "https://api.openai.com/v1".to_string() }
fn default_llm_timeout_secs() -> u64 { 30 }
fn default_aster_base_url() -> String { "https://fapi.asterdex.com".to_string() }
fn default_aster_timeout_ms() -> u64 { 5000 }
fn default_price_cache_ttl_ms() -> u64 { 2000 }
fn default_candle_interval() -> String { "1h".to_string() }
fn default_candle_limit() -> u32 { 200 }
fn default_risk_fallback_max_usd() -> Decimal { Decimal::from(1000) }
fn default_portfolio_balance_cap() -> Decimal { Decimal::new(5, 1) }
fn default_fallback_order_usd() -> Decimal { Decimal::from(100) }
fn default_fallback_leverage() -> u32 { 2 }
fn default_max_leverage() -> u32 { 5 }
fn default_quantity_precision() -> u32 { 3 }
fn default_max_retained_runs() -> usize { 500 }
