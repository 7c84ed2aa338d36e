//! Trader stage - converts the plan into a sized market order

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{error, info, warn};

use super::{PipelineState, Stage, StageContext, StateUpdate};
use crate::error::StageError;
use crate::market::MarketOrder;
use crate::types::{AgentRole, Message, TradeDecision};

pub struct TraderStage {
    ctx: StageContext,
}

impl TraderStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

/// Quantity for a USD notional at `price`, truncated to `precision` places
pub fn order_quantity(size: Decimal, price: Decimal, precision: u32) -> Option<Decimal> {
    size.checked_div(price)
        .map(|q| q.round_dp_with_strategy(precision, RoundingStrategy::ToZero))
}

fn outcome(decision: TradeDecision, summary: String) -> StateUpdate {
    let message = Message::new(AgentRole::Trader, format!("[STEP 4/5] {}", summary))
        .with_payload(serde_json::to_value(&decision).unwrap_or(serde_json::Value::Null));
    StateUpdate {
        trade_decision: Some(decision),
        execution_summary: Some(summary),
        ..Default::default()
    }
    .narrate(message)
}

#[async_trait::async_trait]
impl Stage for TraderStage {
    fn role(&self) -> AgentRole {
        AgentRole::Trader
    }

    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError> {
        let symbol = &state.symbol;

        let Some(plan) = state.portfolio_plan.as_ref() else {
            return Ok(outcome(
                TradeDecision::skipped("nothing to execute"),
                "No portfolio plan available, nothing to execute.".to_string(),
            ));
        };

        if plan.action.is_passive() {
            info!("{} plan for {}, no order sent", plan.action, symbol);
            return Ok(outcome(
                TradeDecision::skipped(plan.action.to_string()),
                format!("Portfolio plan is {}; no order sent.", plan.action),
            ));
        }

        if !self.ctx.market.has_trading_credentials() {
            warn!("Exchange credentials missing, cannot execute {} for {}", plan.action, symbol);
            return Ok(outcome(
                TradeDecision::failed("credentials missing"),
                format!(
                    "Would {} ${:.2} of {}, but exchange credentials are missing.",
                    plan.action, plan.size, symbol
                ),
            ));
        }

        let mark = self.ctx.market.mark_price(symbol).await?;
        let price = mark.mark_price;
        if price <= Decimal::ZERO {
            return Err(StageError::InvalidPrice {
                symbol: symbol.clone(),
                price,
            });
        }

        let quantity = order_quantity(plan.size, price, self.ctx.limits.quantity_precision)
            .unwrap_or(Decimal::ZERO);
        if quantity <= Decimal::ZERO {
            return Err(StageError::InvalidQuantity {
                quantity,
                size: plan.size,
                price,
            });
        }

        let side = plan.action.order_side();
        let order = MarketOrder {
            symbol: symbol.clone(),
            side,
            quantity,
        };

        let mut update = StateUpdate::default().narrate(
            Message::new(
                AgentRole::Trader,
                format!(
                    "[STEP 4/5] Placing {} order\n\nSymbol: {}\nSize: ${:.2}\nQuantity: {}\nPrice: ${:.2}\nLeverage: {}x",
                    side, symbol, plan.size, quantity, price, plan.leverage
                ),
            )
            .with_payload(serde_json::json!({
                "status": "placing_order",
                "details": { "size": plan.size, "quantity": quantity, "price": price, "side": side },
            })),
        );

        // Single attempt: a retried market order could fill twice
        match self.ctx.market.place_market_order(&order).await {
            Ok(ack) => {
                info!(
                    "Order {} placed: {} {} {} at ~{}",
                    ack.order_id, side, quantity, symbol, price
                );
                let summary = format!(
                    "Executed {} {} {} at ~${:.2} (order {}).",
                    side, quantity, symbol, price, ack.order_id
                );
                update.transcript.push(
                    Message::new(
                        AgentRole::Trader,
                        format!("[STEP 4/5] Order executed\n\n{}", summary),
                    )
                    .with_payload(serde_json::json!({ "status": "executed", "orderResult": ack })),
                );
                update.trade_decision = Some(TradeDecision {
                    executed: true,
                    order_id: Some(ack.order_id),
                    price: Some(price),
                    quantity: Some(quantity),
                    side: Some(side),
                    ..Default::default()
                });
                update.execution_summary = Some(summary);
                Ok(update)
            }
            Err(e) => {
                error!("Order for {} failed: {}", symbol, e);
                let message = e.to_string();
                update.transcript.push(
                    Message::new(
                        AgentRole::Trader,
                        format!("[STEP 4/5] Order failed\n\n{}", message),
                    )
                    .with_payload(serde_json::json!({ "status": "error", "error": message })),
                );
                update.trade_decision = Some(TradeDecision {
                    price: Some(price),
                    quantity: Some(quantity),
                    side: Some(side),
                    ..TradeDecision::failed(message.clone())
                });
                update.execution_summary = Some(format!("Order submission failed: {}", message));
                Ok(update.failed(AgentRole::Trader))
            }
        }
    }

    fn recover(&self, state: &PipelineState, error: &StageError) -> StateUpdate {
        let message = error.to_string();
        let (price, quantity) = match error {
            StageError::InvalidQuantity { quantity, price, .. } => (Some(*price), Some(*quantity)),
            StageError::InvalidPrice { price, .. } => (Some(*price), None),
            _ => (None, None),
        };
        let plan = state.portfolio_plan.as_ref();
        let decision = TradeDecision {
            price,
            quantity,
            side: plan.map(|p| p.action.order_side()),
            ..TradeDecision::failed(message.clone())
        };

        let chat = format!("[STEP 4/5] Execution failed\n\n{}", message);
        let payload = serde_json::json!({
            "status": "error",
            "error": message,
            "details": {
                "size": plan.map(|p| p.size),
                "quantity": decision.quantity,
                "price": decision.price,
                "side": decision.side,
            },
        });
        StateUpdate {
            trade_decision: Some(decision),
            execution_summary: Some(format!("Execution failed: {}", message)),
            ..Default::default()
        }
        .narrate(Message::new(AgentRole::Trader, chat).with_payload(payload))
    }
}
