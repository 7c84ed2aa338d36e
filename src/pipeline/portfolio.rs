//! Portfolio stage - turns research and risk output into a bounded plan
//!
//! Every number coming back from the reasoning capability is re-clamped here:
//! the size ceiling, the approval rule, leverage bounds and the
//! stop-loss / take-profit sanity check all run unconditionally.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PipelineState, Stage, StageContext, StateUpdate};
use crate::config::TradingLimits;
use crate::error::{ReasoningError, StageError};
use crate::market::AccountSnapshot;
use crate::reasoning::decide;
use crate::types::{AgentRole, Message, PortfolioPlan, TradeAction};

/// Below this absolute level a stop/target may be a USD amount, not a price
const LEVEL_AMOUNT_CEILING: i64 = 1000;

/// Hard ceilings applied to a draft plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanBounds {
    pub approved: bool,
    pub effective_max_size: Decimal,
    pub price: Decimal,
}

/// Plan before enforcement
#[derive(Debug, Clone, PartialEq)]
pub struct DraftPlan {
    pub action: TradeAction,
    pub size: Decimal,
    pub leverage: Option<f64>,
    pub reasoning: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub raw_plan: String,
}

impl DraftPlan {
    fn hold(reasoning: &str, raw_plan: String) -> Self {
        Self {
            action: TradeAction::Hold,
            size: Decimal::ZERO,
            leverage: Some(1.0),
            reasoning: reasoning.to_string(),
            stop_loss: None,
            take_profit: None,
            raw_plan,
        }
    }
}

/// Tightest of the risk cap, the balance share cap and the balance itself
pub fn effective_max_size(risk_max: Decimal, available: Decimal, balance_cap: Decimal) -> Decimal {
    let available = available.max(Decimal::ZERO);
    risk_max
        .min(available * balance_cap)
        .min(available)
        .max(Decimal::ZERO)
}

/// Apply every hard rule to a draft plan
pub fn enforce(draft: DraftPlan, bounds: &PlanBounds, limits: &TradingLimits) -> PortfolioPlan {
    let mut action = draft.action;
    if !bounds.approved && !matches!(action, TradeAction::Hold | TradeAction::Reduce) {
        warn!("Risk not approved, overriding {} with HOLD", action);
        action = TradeAction::Hold;
    }

    let mut size = draft.size;
    if size > bounds.effective_max_size {
        warn!(
            "Planned size {} exceeds max {}, capping",
            size, bounds.effective_max_size
        );
        size = bounds.effective_max_size;
    }
    if size < Decimal::ZERO {
        size = Decimal::ZERO;
    }
    // Truncate so rounding can never push the size over the cap
    let size = size.round_dp_with_strategy(2, RoundingStrategy::ToZero);

    let max_leverage = limits.max_leverage.max(1);
    let leverage = draft
        .leverage
        .filter(|l| l.is_finite())
        .map(|l| l.round().clamp(1.0, max_leverage as f64) as u32)
        .unwrap_or(1);

    let stop_loss = draft
        .stop_loss
        .filter(|l| *l > Decimal::ZERO)
        .map(|l| sanitize_level(l, bounds.price, Decimal::new(95, 2)));
    let take_profit = draft
        .take_profit
        .filter(|l| *l > Decimal::ZERO)
        .map(|l| sanitize_level(l, bounds.price, Decimal::new(110, 2)));

    PortfolioPlan {
        action,
        size,
        leverage,
        reasoning: draft.reasoning,
        stop_loss,
        take_profit,
        raw_plan: draft.raw_plan,
    }
}

/// Replace a level that looks like a USD amount with a band around price
fn sanitize_level(level: Decimal, price: Decimal, band: Decimal) -> Decimal {
    let looks_like_amount =
        level < price * Decimal::new(1, 1) && level < Decimal::from(LEVEL_AMOUNT_CEILING);
    let level = if looks_like_amount && price > Decimal::ZERO {
        warn!("Level {} looks like a USD amount at price {}, deriving from price", level, price);
        price * band
    } else {
        level
    };
    level.round_dp(2)
}

const SYSTEM_PROMPT: &str = r#"You are the Portfolio Manager AI.
Your task is to synthesize the Technical Research Report and Risk Assessment to create a PORTFOLIO PLAN.

You must output a JSON object with the following structure:
{
    "action": "BUY" | "SELL" | "HOLD" | "EXIT" | "REDUCE",
    "size": number (in USD),
    "leverage": number,
    "reasoning": string,
    "stopLoss": number (optional, in USD price),
    "takeProfit": number (optional, in USD price),
    "plainLanguageSummary": string (2-3 sentences explaining the decision for a non-technical user)
}"#;

/// Plan as returned by the reasoning capability (untrusted)
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanDecision {
    action: String,
    #[serde(default)]
    size: Decimal,
    #[serde(default)]
    leverage: Option<f64>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    stop_loss: Option<Decimal>,
    #[serde(default)]
    take_profit: Option<Decimal>,
    #[serde(default)]
    plain_language_summary: Option<String>,
}

pub struct PortfolioStage {
    ctx: StageContext,
}

impl PortfolioStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    fn constraints(&self, bounds: &PlanBounds, available: Decimal) -> String {
        format!(
            "CRITICAL CONSTRAINTS:\n\
             - size MUST NOT exceed {max:.2} USD (this is the maximum allowed)\n\
             - size MUST NOT exceed available balance: {available:.2} USD\n\
             - If Risk Assessment approved is false, you MUST HOLD or REDUCE\n\
             - If Risk Assessment says \"Risk Level: CRITICAL\", you MUST reduce or exit\n\
             - leverage MUST be between 1 and {leverage}\n\
             - stopLoss and takeProfit should be realistic price levels (not USD amounts)\n\
             - Current market price: ${price:.2}",
            max = bounds.effective_max_size,
            available = available,
            leverage = self.ctx.limits.max_leverage,
            price = bounds.price,
        )
    }

    /// Ask the reasoning capability for a draft; never fails
    async fn draft_with_reasoning(
        &self,
        state: &PipelineState,
        account: &AccountSnapshot,
        bounds: &PlanBounds,
    ) -> (DraftPlan, String) {
        let Some(reasoning) = self.ctx.reasoning.as_deref() else {
            let size = self.ctx.limits.fallback_order_usd.min(bounds.effective_max_size);
            let draft = DraftPlan {
                action: TradeAction::Buy,
                size,
                leverage: Some(self.ctx.limits.fallback_leverage as f64),
                reasoning: "Reasoning unavailable; default allocation applied.".to_string(),
                stop_loss: None,
                take_profit: None,
                raw_plan: String::new(),
            };
            let summary = format!("Default plan: BUY up to ${:.2}.", size);
            return (draft, summary);
        };

        let system_prompt = format!(
            "{}\n\n{}",
            SYSTEM_PROMPT,
            self.constraints(bounds, account.available_balance)
        );
        let risk = state.risk_assessment.as_ref();
        let user_prompt = format!(
            "Account Status:\n\
             Equity: {equity:.2} USD\n\
             Available: {available:.2} USD\n\n\
             Technical Report:\n{report}\n\n\
             Risk Assessment:\n{risk_summary}\n\n\
             Risk Manager Constraints:\n\
             - Approved: {approved}\n\
             - Risk Level: {level}\n\
             - Max Size Allowed: {max:.2} USD\n\
             - Available Balance: {available:.2} USD\n\n\
             Current Symbol: {symbol}\n\
             Current Market Price: ${price:.2}",
            equity = account.equity,
            available = account.available_balance,
            report = state.technical_report.as_deref().unwrap_or("N/A"),
            risk_summary = state.risk_summary.as_deref().unwrap_or("N/A"),
            approved = bounds.approved,
            level = risk.map(|r| r.risk_level.to_string()).unwrap_or_else(|| "N/A".to_string()),
            max = bounds.effective_max_size,
            symbol = state.symbol,
            price = bounds.price,
        );

        match decide::<PlanDecision>(reasoning, &system_prompt, &user_prompt).await {
            Ok(decision) => {
                let plan = decision.value;
                let action = plan.action.parse().unwrap_or_else(|e| {
                    warn!("{}, holding instead", e);
                    TradeAction::Hold
                });
                let summary = plan
                    .plain_language_summary
                    .clone()
                    .unwrap_or_else(|| plan.reasoning.clone());
                let draft = DraftPlan {
                    action,
                    size: plan.size,
                    leverage: plan.leverage,
                    reasoning: plan.reasoning,
                    stop_loss: plan.stop_loss,
                    take_profit: plan.take_profit,
                    raw_plan: decision.raw,
                };
                (draft, summary)
            }
            Err(ReasoningError::Parse(e)) => {
                warn!("Portfolio output unparsable for {}: {}", state.symbol, e);
                (
                    DraftPlan::hold("Failed to parse decision", String::new()),
                    "I am holding my position because I could not generate a clear plan.".to_string(),
                )
            }
            Err(e) => {
                warn!("Portfolio reasoning failed for {}: {}", state.symbol, e);
                (
                    DraftPlan::hold("Error in processing", String::new()),
                    "Taking no action due to an internal error.".to_string(),
                )
            }
        }
    }
}

fn narrate(plan: &PortfolioPlan, summary: &str) -> Message {
    let mut chat = format!(
        "[STEP 3/5] Portfolio Plan Generated\n\nAction: {}\nPosition Size: ${:.2}\nLeverage: {}x",
        plan.action, plan.size, plan.leverage
    );
    if let Some(stop_loss) = plan.stop_loss {
        chat.push_str(&format!("\nStop Loss: ${:.2}", stop_loss));
    }
    if let Some(take_profit) = plan.take_profit {
        chat.push_str(&format!("\nTake Profit: ${:.2}", take_profit));
    }
    chat.push_str(&format!("\n\n{}", summary));

    let payload = serde_json::to_value(plan).unwrap_or(serde_json::Value::Null);
    Message::new(AgentRole::Portfolio, chat).with_payload(payload)
}

#[async_trait::async_trait]
impl Stage for PortfolioStage {
    fn role(&self) -> AgentRole {
        AgentRole::Portfolio
    }

    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError> {
        let market = &self.ctx.market;
        let (account, mark) =
            tokio::try_join!(market.account_snapshot(), market.mark_price(&state.symbol))?;

        // A missing assessment allows nothing
        let (approved, risk_max) = state
            .risk_assessment
            .as_ref()
            .map(|r| (r.approved, r.max_size))
            .unwrap_or((false, Decimal::ZERO));

        let bounds = PlanBounds {
            approved,
            effective_max_size: effective_max_size(
                risk_max,
                account.available_balance,
                self.ctx.limits.portfolio_balance_cap,
            ),
            price: mark.mark_price,
        };

        let (draft, mut summary) = self.draft_with_reasoning(state, &account, &bounds).await;
        let requested = draft.action;
        let plan = enforce(draft, &bounds, &self.ctx.limits);
        if plan.action != requested {
            summary = format!(
                "Holding instead of {} because the risk manager did not approve new exposure. {}",
                requested, summary
            );
        }

        info!(
            "Portfolio plan for {}: {} ${} at {}x (max allowed ${})",
            state.symbol, plan.action, plan.size, plan.leverage, bounds.effective_max_size
        );

        let message = narrate(&plan, &summary);
        Ok(StateUpdate {
            portfolio_plan: Some(plan),
            portfolio_summary: Some(summary),
            ..Default::default()
        }
        .narrate(message))
    }

    fn recover(&self, _state: &PipelineState, error: &StageError) -> StateUpdate {
        let plan = PortfolioPlan {
            action: TradeAction::Hold,
            size: Decimal::ZERO,
            leverage: 1,
            reasoning: format!("Error in processing: {}", error),
            stop_loss: None,
            take_profit: None,
            raw_plan: String::new(),
        };
        let summary = "Taking no action due to an internal error.".to_string();
        let message = narrate(&plan, &summary);

        StateUpdate {
            portfolio_plan: Some(plan),
            portfolio_summary: Some(summary),
            ..Default::default()
        }
        .narrate(message)
    }
}
