//! Market Gateway - account, price and order operations against the venue

pub mod aster;
pub mod cache;
pub mod snapshot;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;
use crate::types::OrderSide;

pub use aster::AsterClient;
pub use cache::PriceCache;
pub use snapshot::{MarketSnapshot, MarketSnapshotProvider};

/// Account equity and balance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub available_balance: Decimal,
    pub margin_used: Decimal,
    pub positions: Vec<PositionInfo>,
}

impl AccountSnapshot {
    /// Initial margin as a percentage of equity
    pub fn margin_ratio_pct(&self) -> Decimal {
        if self.equity > Decimal::ZERO {
            (self.margin_used / self.equity * Decimal::from(100)).round_dp(2)
        } else {
            Decimal::ZERO
        }
    }

    /// Positions with a non-zero amount
    pub fn active_positions(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| !p.amount.is_zero())
            .count()
    }
}

/// One open position on the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed position amount (negative for shorts)
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Mark/index price and funding for a perpetual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPrice {
    pub symbol: String,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
}

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Venue acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Venue-facing operations consumed by the pipeline stages
#[async_trait::async_trait]
pub trait MarketGateway: Send + Sync {
    /// Current account equity, balance and positions
    async fn account_snapshot(&self) -> GatewayResult<AccountSnapshot>;

    /// Live mark price (implementations cache briefly)
    async fn mark_price(&self, symbol: &str) -> GatewayResult<MarkPrice>;

    /// Recent candles, oldest first
    async fn candles(&self, symbol: &str, interval: &str, limit: u32) -> GatewayResult<Vec<Candle>>;

    /// Submit a market order.
    ///
    /// Not idempotent: callers must not retry automatically.
    async fn place_market_order(&self, order: &MarketOrder) -> GatewayResult<OrderAck>;

    /// Whether credentials for order placement are configured
    fn has_trading_credentials(&self) -> bool;
}
