//! Market Snapshot Provider - candles and mark price folded into one
//! fixed-shape analysis record

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::{Candle, MarketGateway};
use crate::error::{GatewayError, GatewayResult};

/// Candles used for "recent" high/low (support/resistance)
const RECENT_WINDOW: usize = 20;
/// Candles used for change, volume and volatility windows
const DAY_WINDOW: usize = 24;

/// Trend classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
            Trend::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Volume relative to the recent average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for VolumeTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeTrend::Increasing => write!(f, "INCREASING"),
            VolumeTrend::Decreasing => write!(f, "DECREASING"),
            VolumeTrend::Stable => write!(f, "STABLE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub rsi: f64,
    pub ema20: f64,
    pub ema50: f64,
    pub macd: Macd,
}

/// Fixed-shape market analysis for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub symbol: String,
    /// Last close
    pub price: f64,
    /// Change over the last 24 candles (24h at the default 1h interval)
    pub change_24h_pct: f64,
    pub recent_high: f64,
    pub recent_low: f64,
    pub support: f64,
    pub resistance: f64,
    pub indicators: Indicators,
    pub trend: Trend,
    /// Standard deviation of close-to-close returns, percent
    pub volatility_pct: f64,
    pub volume_trend: VolumeTrend,
    pub current_volume: f64,
    pub average_volume: f64,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
}

impl MarketSnapshot {
    /// Build the analysis from candles (oldest first) and the live mark price
    pub fn from_candles(
        symbol: &str,
        candles: &[Candle],
        mark_price: Decimal,
        index_price: Decimal,
        funding_rate: Decimal,
    ) -> GatewayResult<Self> {
        let last = candles
            .last()
            .ok_or_else(|| GatewayError::NoData(symbol.to_string()))?;

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let price = last.close;
        let reference = closes[closes.len().saturating_sub(DAY_WINDOW + 1)];
        let change_24h_pct = if reference > 0.0 {
            (price - reference) / reference * 100.0
        } else {
            0.0
        };

        let recent = &candles[candles.len().saturating_sub(RECENT_WINDOW)..];
        let recent_high = recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let recent_low = recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);

        let day_volumes = &volumes[volumes.len().saturating_sub(DAY_WINDOW)..];
        let average_volume = day_volumes.iter().sum::<f64>() / day_volumes.len() as f64;
        let current_volume = last.volume;
        let volume_trend = if current_volume > average_volume * 1.2 {
            VolumeTrend::Increasing
        } else if current_volume < average_volume * 0.8 {
            VolumeTrend::Decreasing
        } else {
            VolumeTrend::Stable
        };

        let ema20 = ema(&closes, 20).unwrap_or(0.0);
        let ema50 = ema(&closes, 50).unwrap_or(0.0);
        let trend = if ema20 > ema50 {
            Trend::Bullish
        } else if ema20 < ema50 {
            Trend::Bearish
        } else {
            Trend::Neutral
        };

        let indicators = Indicators {
            rsi: rsi(&closes, 14).unwrap_or(0.0),
            ema20,
            ema50,
            macd: macd(&closes, 12, 26, 9).unwrap_or(Macd {
                macd: 0.0,
                signal: 0.0,
                histogram: 0.0,
            }),
        };

        Ok(Self {
            symbol: symbol.to_string(),
            price,
            change_24h_pct,
            recent_high,
            recent_low,
            support: recent_low,
            resistance: recent_high,
            indicators,
            trend,
            volatility_pct: volatility_pct(&closes, DAY_WINDOW),
            volume_trend,
            current_volume,
            average_volume,
            mark_price,
            index_price,
            funding_rate,
        })
    }

    /// Short report used when no reasoning capability is configured
    pub fn basic_report(&self) -> String {
        format!(
            "Market Analysis for {}:\n\
             - Current Price: ${:.2}\n\
             - Trend: {}\n\
             - RSI: {:.2}\n\
             - EMA20: ${:.2}\n\
             - EMA50: ${:.2}",
            self.symbol,
            self.price,
            self.trend,
            self.indicators.rsi,
            self.indicators.ema20,
            self.indicators.ema50
        )
    }

    /// Full market data block handed to the reasoning capability
    pub fn render(&self) -> String {
        let funding_pct = self.funding_rate.to_f64().unwrap_or(0.0) * 100.0;
        format!(
            "COMPREHENSIVE MARKET ANALYSIS FOR {symbol}:\n\n\
             Price Data:\n\
             - Current Price: ${price:.2}\n\
             - 24h Change: {change:.2}%\n\
             - Recent High: ${high:.2}\n\
             - Recent Low: ${low:.2}\n\
             - Support Level: ${support:.2}\n\
             - Resistance Level: ${resistance:.2}\n\n\
             Technical Indicators:\n\
             - RSI (14): {rsi:.2}\n\
             - EMA20: ${ema20:.2}\n\
             - EMA50: ${ema50:.2}\n\
             - MACD: {macd:.4}\n\
             - MACD Signal: {signal:.4}\n\
             - MACD Histogram: {hist:.4}\n\n\
             Market Context:\n\
             - Trend: {trend}\n\
             - Volatility: {vol:.2}%\n\
             - Volume Trend: {vtrend}\n\
             - Current Volume: {cvol:.2}\n\
             - Average Volume (24h): {avol:.2}\n\n\
             Futures Data:\n\
             - Funding Rate: {funding:.4}%\n\
             - Mark Price: ${mark:.2}\n\
             - Index Price: ${index:.2}",
            symbol = self.symbol,
            price = self.price,
            change = self.change_24h_pct,
            high = self.recent_high,
            low = self.recent_low,
            support = self.support,
            resistance = self.resistance,
            rsi = self.indicators.rsi,
            ema20 = self.indicators.ema20,
            ema50 = self.indicators.ema50,
            macd = self.indicators.macd.macd,
            signal = self.indicators.macd.signal,
            hist = self.indicators.macd.histogram,
            trend = self.trend,
            vol = self.volatility_pct,
            vtrend = self.volume_trend,
            cvol = self.current_volume,
            avol = self.average_volume,
            funding = funding_pct,
            mark = self.mark_price,
            index = self.index_price,
        )
    }
}

/// Pulls candles and mark price from the market gateway
#[derive(Clone)]
pub struct MarketSnapshotProvider {
    market: Arc<dyn MarketGateway>,
    interval: String,
    limit: u32,
}

impl MarketSnapshotProvider {
    pub fn new(market: Arc<dyn MarketGateway>, interval: &str, limit: u32) -> Self {
        Self {
            market,
            interval: interval.to_string(),
            limit,
        }
    }

    pub async fn snapshot(&self, symbol: &str) -> GatewayResult<MarketSnapshot> {
        let (candles, mark) = tokio::try_join!(
            self.market.candles(symbol, &self.interval, self.limit),
            self.market.mark_price(symbol),
        )?;

        debug!(
            "Building snapshot for {} from {} candles (mark {})",
            symbol,
            candles.len(),
            mark.mark_price
        );

        MarketSnapshot::from_candles(
            symbol,
            &candles,
            mark.mark_price,
            mark.index_price,
            mark.funding_rate,
        )
    }
}

// --- Indicator math ---

/// Exponential moving average series, seeded with the SMA of the first `period` values
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);

    for value in &values[period..] {
        let prev = *series.last().unwrap_or(&seed);
        series.push(value * k + prev * (1.0 - k));
    }
    series
}

/// Last EMA value
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// Wilder RSI
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() <= period {
        return None;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period]
        .iter()
        .filter(|c| **c < 0.0)
        .map(|c| -c)
        .sum::<f64>()
        / period as f64;

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line and histogram
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Align both series on the slow EMA's first value
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_value)| fast_series[i + offset] - slow_value)
        .collect();

    let signal_value = ema(&macd_line, signal)?;
    let macd_value = *macd_line.last()?;

    Some(Macd {
        macd: macd_value,
        signal: signal_value,
        histogram: macd_value - signal_value,
    })
}

/// Standard deviation of percentage returns over the last `window` returns
pub fn volatility_pct(values: &[f64], window: usize) -> f64 {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0] * 100.0)
        .collect();
    let recent = &returns[returns.len().saturating_sub(window)..];
    if recent.len() < 2 {
        return 0.0;
    }

    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let variance = recent.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (recent.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn candles_from(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::hours(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                open_time: start + Duration::hours(i as i64),
                open: *close,
                high: close + 1.0,
                low: close - 1.0,
                close: *close,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn test_ema_of_constant_series() {
        let values = vec![10.0; 60];
        assert!((ema(&values, 20).unwrap() - 10.0).abs() < 1e-9);
        assert!(ema(&values[..10], 20).is_none());
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        assert_eq!(rsi(&rising, 14).unwrap(), 100.0);

        let falling: Vec<f64> = (1..=30).rev().map(|v| v as f64).collect();
        assert!(rsi(&falling, 14).unwrap() < 1e-9);
    }

    #[test]
    fn test_macd_positive_in_uptrend() {
        let rising: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let m = macd(&rising, 12, 26, 9).unwrap();
        assert!(m.macd > 0.0);
        assert!(macd(&rising[..20], 12, 26, 9).is_none());
    }

    #[test]
    fn test_snapshot_trend_and_levels() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64).collect();
        let snapshot = MarketSnapshot::from_candles(
            "BTCUSDT",
            &candles_from(&closes),
            Decimal::from(300),
            Decimal::from(300),
            Decimal::new(1, 4),
        )
        .unwrap();

        assert_eq!(snapshot.trend, Trend::Bullish);
        assert_eq!(snapshot.price, 299.0);
        assert_eq!(snapshot.resistance, 300.0);
        assert_eq!(snapshot.support, 279.0);
        assert_eq!(snapshot.volume_trend, VolumeTrend::Stable);
        assert!(snapshot.change_24h_pct > 0.0);
        assert!(snapshot.render().contains("Funding Rate: 0.0100%"));
        assert!(snapshot.basic_report().contains("Trend: BULLISH"));
    }

    #[test]
    fn test_snapshot_requires_candles() {
        let err = MarketSnapshot::from_candles(
            "BTCUSDT",
            &[],
            Decimal::ONE,
            Decimal::ONE,
            Decimal::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::NoData(_)));
    }

    #[test]
    fn test_volatility_of_flat_series_is_zero() {
        assert_eq!(volatility_pct(&[5.0; 30], 24), 0.0);
    }
}
