//! Aster futures REST client
//!
//! Binance-style API: signed endpoints carry `timestamp`, `recvWindow` and an
//! HMAC-SHA256 `signature` over the query string in insertion order.

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

use super::{
    AccountSnapshot, Candle, MarkPrice, MarketGateway, MarketOrder, OrderAck, PositionInfo,
    PriceCache,
};
use crate::error::{GatewayError, GatewayResult};

/// Receive window for signed requests (ms)
const RECV_WINDOW_MS: u64 = 5000;

/// Aster futures client with a short-lived mark price cache
pub struct AsterClient {
    http_client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
    price_cache: PriceCache,
}

impl AsterClient {
    /// Create a new client.
    ///
    /// `credentials` is the (api key, api secret) pair; without it only
    /// public market data endpoints work.
    pub fn new(
        base_url: &str,
        credentials: Option<(String, String)>,
        timeout: Duration,
        price_ttl: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        info!(
            "Aster client initialized: url={}, signed={}, price_ttl={:?}",
            base_url,
            credentials.is_some(),
            price_ttl
        );

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            price_cache: PriceCache::new(price_ttl),
        })
    }

    /// Issue a request and decode the JSON body
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        mut params: Vec<(&'static str, String)>,
        signed: bool,
    ) -> GatewayResult<T> {
        if signed {
            let (_, api_secret) = self
                .credentials
                .as_ref()
                .ok_or(GatewayError::CredentialsMissing)?;

            params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
            params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
            let signature = sign(api_secret, &encode_query(&params));
            params.push(("signature", signature));
        }

        let url = if params.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, encode_query(&params))
        };
        let mut request_builder = self.http_client.request(method.clone(), &url);

        if let Some((api_key, _)) = &self.credentials {
            request_builder = request_builder.header("X-MBX-APIKEY", api_key);
        }

        let response = request_builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Aster API error [{} {}]: {} {}", method, endpoint, status, body);
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("{} {}: {}", method, endpoint, e)))
    }
}

#[async_trait::async_trait]
impl MarketGateway for AsterClient {
    async fn account_snapshot(&self) -> GatewayResult<AccountSnapshot> {
        let account: AccountResponse = self
            .request(Method::GET, "/fapi/v2/account", Vec::new(), true)
            .await?;

        let equity = if account.total_wallet_balance.is_zero() {
            account.total_equity.unwrap_or_default()
        } else {
            account.total_wallet_balance
        };

        Ok(AccountSnapshot {
            equity,
            available_balance: account.available_balance,
            margin_used: account.total_initial_margin,
            positions: account
                .positions
                .into_iter()
                .map(|p| PositionInfo {
                    symbol: p.symbol,
                    amount: p.position_amt,
                    entry_price: p.entry_price,
                    unrealized_pnl: p.unrealized_profit,
                })
                .collect(),
        })
    }

    async fn mark_price(&self, symbol: &str) -> GatewayResult<MarkPrice> {
        if let Some(cached) = self.price_cache.get(symbol).await {
            return Ok(cached);
        }

        let premium: PremiumIndexResponse = self
            .request(
                Method::GET,
                "/fapi/v1/premiumIndex",
                vec![("symbol", symbol.to_string())],
                false,
            )
            .await?;

        let price = MarkPrice {
            symbol: premium.symbol,
            mark_price: premium.mark_price,
            index_price: premium.index_price,
            funding_rate: premium.last_funding_rate,
        };
        self.price_cache.put(symbol, price.clone()).await;

        Ok(price)
    }

    async fn candles(&self, symbol: &str, interval: &str, limit: u32) -> GatewayResult<Vec<Candle>> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .request(
                Method::GET,
                "/fapi/v1/klines",
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ],
                false,
            )
            .await?;

        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<GatewayResult<Vec<_>>>()?;

        debug!("Fetched {} {} candles for {}", candles.len(), interval, symbol);
        Ok(candles)
    }

    async fn place_market_order(&self, order: &MarketOrder) -> GatewayResult<OrderAck> {
        let response: OrderResponse = self
            .request(
                Method::POST,
                "/fapi/v1/order",
                vec![
                    ("symbol", order.symbol.clone()),
                    ("side", order.side.to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", order.quantity.normalize().to_string()),
                ],
                true,
            )
            .await?;

        let order_id = response
            .order_id
            .map(|id| match id {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .or_else(|| response.client_order_id.clone())
            .ok_or_else(|| GatewayError::InvalidResponse("order response has no id".to_string()))?;

        info!(
            "Order accepted: {} {} {} -> {}",
            order.side, order.quantity, order.symbol, order_id
        );

        Ok(OrderAck {
            order_id,
            client_order_id: response.client_order_id,
            status: response.status,
        })
    }

    fn has_trading_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Hex-encoded HMAC-SHA256 of the query string
fn sign(secret: &str, query: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_kline(row: &[serde_json::Value]) -> GatewayResult<Candle> {
    if row.len() < 6 {
        return Err(GatewayError::InvalidResponse(format!(
            "kline row has {} fields",
            row.len()
        )));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| GatewayError::InvalidResponse("kline open time".to_string()))?;
    let open_time = Utc
        .timestamp_millis_opt(open_time_ms)
        .single()
        .ok_or_else(|| GatewayError::InvalidResponse(format!("kline time {}", open_time_ms)))?;

    Ok(Candle {
        open_time,
        open: number_field(&row[1])?,
        high: number_field(&row[2])?,
        low: number_field(&row[3])?,
        close: number_field(&row[4])?,
        volume: number_field(&row[5])?,
    })
}

fn number_field(value: &serde_json::Value) -> GatewayResult<f64> {
    match value {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| GatewayError::InvalidResponse(format!("number {:?}: {}", s, e))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("number {}", n))),
        other => Err(GatewayError::InvalidResponse(format!("expected number, got {}", other))),
    }
}

fn decimal_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Decimal::from_str(&s).unwrap_or_default(),
        Some(serde_json::Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    })
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    #[serde(default, deserialize_with = "decimal_or_zero")]
    total_wallet_balance: Decimal,
    #[serde(default)]
    total_equity: Option<Decimal>,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    available_balance: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    total_initial_margin: Decimal,
    #[serde(default)]
    positions: Vec<PositionResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionResponse {
    symbol: String,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    position_amt: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    entry_price: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexResponse {
    symbol: String,
    #[serde(deserialize_with = "decimal_or_zero")]
    mark_price: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    index_price: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    last_funding_rate: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(default)]
    order_id: Option<serde_json::Value>,
    #[serde(default)]
    client_order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}
