//! Mock gateways and audit sink for exercising the pipeline without network

#![allow(dead_code)]

use agent_runner::market::{Candle, MarketOrder, OrderAck, PositionInfo};
use agent_runner::{
    AccountSnapshot, AgentRole, AuditSink, GatewayError, MarkPrice, MarketGateway, Pipeline,
    ReasoningError, ReasoningGateway, StageContext, StopFlag, TradingLimits,
};
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock venue with call counters and scripted failures
pub struct MockMarket {
    pub equity: Decimal,
    pub available: Decimal,
    pub default_price: Decimal,
    pub prices: HashMap<String, Decimal>,
    pub credentials: bool,
    pub fail_account: bool,
    pub fail_candles: bool,
    pub fail_order: bool,
    /// Mark price calls succeed this many times, then fail
    pub price_failures_after: Option<usize>,
    pub candle_delay: Option<Duration>,
    /// Raised while an order is being placed
    pub stop_on_order: Option<StopFlag>,

    pub account_calls: AtomicUsize,
    pub price_calls: AtomicUsize,
    pub candle_calls: AtomicUsize,
    pub orders: Mutex<Vec<MarketOrder>>,
}

impl Default for MockMarket {
    fn default() -> Self {
        Self {
            equity: Decimal::from(10_000),
            available: Decimal::from(9_500),
            default_price: Decimal::from(65_000),
            prices: HashMap::new(),
            credentials: true,
            fail_account: false,
            fail_candles: false,
            fail_order: false,
            price_failures_after: None,
            candle_delay: None,
            stop_on_order: None,
            account_calls: AtomicUsize::new(0),
            price_calls: AtomicUsize::new(0),
            candle_calls: AtomicUsize::new(0),
            orders: Mutex::new(Vec::new()),
        }
    }
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, available: i64) -> Self {
        self.available = Decimal::from(available);
        self
    }

    pub fn with_price(mut self, symbol: &str, price: Decimal) -> Self {
        self.prices.insert(symbol.to_string(), price);
        self
    }

    pub fn without_credentials(mut self) -> Self {
        self.credentials = false;
        self
    }

    pub fn failing_account(mut self) -> Self {
        self.fail_account = true;
        self
    }

    pub fn failing_candles(mut self) -> Self {
        self.fail_candles = true;
        self
    }

    pub fn failing_orders(mut self) -> Self {
        self.fail_order = true;
        self
    }

    pub fn price_fails_after(mut self, successes: usize) -> Self {
        self.price_failures_after = Some(successes);
        self
    }

    pub fn slow_candles(mut self, delay: Duration) -> Self {
        self.candle_delay = Some(delay);
        self
    }

    pub fn stopping_on_order(mut self, flag: StopFlag) -> Self {
        self.stop_on_order = Some(flag);
        self
    }

    pub fn price_of(&self, symbol: &str) -> Decimal {
        self.prices.get(symbol).copied().unwrap_or(self.default_price)
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    pub fn placed_orders(&self) -> Vec<MarketOrder> {
        self.orders.lock().unwrap().clone()
    }
}

fn unavailable(what: &str) -> GatewayError {
    GatewayError::Api {
        status: 503,
        body: format!("{} unavailable", what),
    }
}

#[async_trait::async_trait]
impl MarketGateway for MockMarket {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, GatewayError> {
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_account {
            return Err(unavailable("account"));
        }
        Ok(AccountSnapshot {
            equity: self.equity,
            available_balance: self.available,
            margin_used: self.equity - self.available,
            positions: vec![PositionInfo {
                symbol: "BTCUSDT".to_string(),
                amount: Decimal::ZERO,
                entry_price: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
            }],
        })
    }

    async fn mark_price(&self, symbol: &str) -> Result<MarkPrice, GatewayError> {
        let call = self.price_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(successes) = self.price_failures_after {
            if call >= successes {
                return Err(unavailable("mark price"));
            }
        }
        let price = self.price_of(symbol);
        Ok(MarkPrice {
            symbol: symbol.to_string(),
            mark_price: price,
            index_price: price,
            funding_rate: Decimal::new(1, 4),
        })
    }

    async fn candles(&self, symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Candle>, GatewayError> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.candle_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_candles {
            return Err(unavailable("candles"));
        }

        let last: f64 = self.price_of(symbol).to_string().parse().unwrap_or(65_000.0);
        let count = limit.min(200) as usize;
        let start = Utc::now() - ChronoDuration::hours(count as i64);
        Ok((0..count)
            .map(|i| {
                // Gentle uptrend ending at the mark price
                let close = last * (1.0 - 0.0005 * (count - 1 - i) as f64);
                Candle {
                    open_time: start + ChronoDuration::hours(i as i64),
                    open: close,
                    high: close * 1.001,
                    low: close * 0.999,
                    close,
                    volume: 1_000.0,
                }
            })
            .collect())
    }

    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderAck, GatewayError> {
        if let Some(flag) = &self.stop_on_order {
            flag.stop();
        }
        if self.fail_order {
            return Err(GatewayError::Api {
                status: 400,
                body: "{\"code\":-2019,\"msg\":\"Margin is insufficient.\"}".to_string(),
            });
        }
        let mut orders = self.orders.lock().unwrap();
        orders.push(order.clone());
        Ok(OrderAck {
            order_id: format!("order-{}", orders.len()),
            client_order_id: None,
            status: Some("NEW".to_string()),
        })
    }

    fn has_trading_credentials(&self) -> bool {
        self.credentials
    }
}

/// Reasoning gateway answering from a per-role script
#[derive(Default)]
pub struct ScriptedReasoning {
    responses: HashMap<AgentRole, String>,
    failing: HashSet<AgentRole>,
    pub calls: AtomicUsize,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, role: AgentRole, response: &str) -> Self {
        self.responses.insert(role, response.to_string());
        self
    }

    pub fn fail(mut self, role: AgentRole) -> Self {
        self.failing.insert(role);
        self
    }

    fn role_for(system_prompt: &str) -> AgentRole {
        if system_prompt.contains("Technical Research Agent") {
            AgentRole::Research
        } else if system_prompt.contains("Risk Manager") {
            AgentRole::Risk
        } else if system_prompt.contains("Portfolio Manager") {
            AgentRole::Portfolio
        } else if system_prompt.contains("Summarizer Agent") {
            AgentRole::Summarizer
        } else {
            AgentRole::System
        }
    }
}

#[async_trait::async_trait]
impl ReasoningGateway for ScriptedReasoning {
    async fn complete(&self, system_prompt: &str, _user_prompt: &str) -> Result<String, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let role = Self::role_for(system_prompt);
        if self.failing.contains(&role) {
            return Err(ReasoningError::Request(format!("{} provider timed out", role)));
        }
        self.responses
            .get(&role)
            .cloned()
            .ok_or_else(|| ReasoningError::Request(format!("no script for {}", role)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Audit sink that keeps everything in memory
#[derive(Default)]
pub struct MemoryAuditSink {
    pub records: Mutex<Vec<(String, AgentRole, String)>>,
    pub fail: bool,
}

impl MemoryAuditSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        self.records.lock().unwrap().iter().map(|(_, role, _)| *role).collect()
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(
        &self,
        symbol: &str,
        role: AgentRole,
        chat: &str,
        _payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("journal disk full");
        }
        self.records
            .lock()
            .unwrap()
            .push((symbol.to_string(), role, chat.to_string()));
        Ok(())
    }
}

pub fn context(market: Arc<MockMarket>, reasoning: Option<Arc<ScriptedReasoning>>) -> StageContext {
    StageContext::new(
        market,
        reasoning.map(|r| r as Arc<dyn ReasoningGateway>),
        TradingLimits::default(),
    )
}

pub fn pipeline(
    market: Arc<MockMarket>,
    reasoning: Option<Arc<ScriptedReasoning>>,
    audit: Arc<MemoryAuditSink>,
) -> Pipeline {
    Pipeline::new(context(market, reasoning), audit)
}
