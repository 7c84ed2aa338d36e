//! Risk stage - account health check and the maximum notional for this run

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use super::{PipelineState, Stage, StageContext, StateUpdate};
use crate::error::StageError;
use crate::market::AccountSnapshot;
use crate::reasoning::decide;
use crate::types::{AgentRole, Message, RiskAssessment, RiskLevel};

const SYSTEM_PROMPT: &str = r#"You are the Risk Manager AI.
Your task is to assess the account health and market conditions to provide a RISK ASSESSMENT.

You must output a JSON object:
{
    "approved": boolean,
    "maxSize": number,
    "riskLevel": "LOW" | "MEDIUM" | "HIGH" | "CRITICAL",
    "reason": string,
    "plainLanguageSummary": string
}

Constraints:
- Max leverage is 5x.
- If risk is CRITICAL, approved must be false.
- maxSize should NEVER exceed available balance.
- maxSize should be realistic based on account equity (typically 10-50% of equity for conservative risk)."#;

/// Risk verdict as returned by the reasoning capability (untrusted)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RiskDecision {
    #[serde(default)]
    approved: Option<bool>,
    #[serde(default)]
    max_size: Option<Decimal>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    plain_language_summary: Option<String>,
}

pub struct RiskStage {
    ctx: StageContext,
}

impl RiskStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Conservative default when reasoning is absent or unusable
    fn fallback(&self, available: Decimal, why: &str) -> RiskAssessment {
        RiskAssessment {
            approved: true,
            max_size: self.ctx.limits.risk_fallback_max_usd.min(available).max(Decimal::ZERO),
            risk_level: RiskLevel::Low,
            reason: format!("{}; applying conservative default limits.", why),
            raw_report: why.to_string(),
        }
    }
}

/// Account block handed to the reasoning capability
fn account_context(account: &AccountSnapshot) -> String {
    format!(
        "Equity: {:.2} USD\n\
         Available: {:.2} USD\n\
         Active Positions: {}\n\
         Margin Ratio: {:.2}%\n\
         Total Margin Used: {:.2} USD",
        account.equity,
        account.available_balance,
        account.active_positions(),
        account.margin_ratio_pct(),
        account.margin_used
    )
}

/// Re-derive the hard rules regardless of what the reasoning returned.
///
/// A missing `approved` is a rejection. A missing `maxSize` is 0 unless the
/// verdict is an approval, which then gets `default_max`.
fn enforce(
    decision: RiskDecision,
    available: Decimal,
    default_max: Decimal,
    raw: String,
) -> RiskAssessment {
    let risk_level = match decision.risk_level.as_deref() {
        Some(level) => level.parse().unwrap_or_else(|e| {
            warn!("{}, treating as MEDIUM", e);
            RiskLevel::Medium
        }),
        None => RiskLevel::Medium,
    };

    let requested = decision.approved.unwrap_or(false);
    let mut max_size = match decision.max_size {
        Some(size) => size,
        None if requested => default_max,
        None => Decimal::ZERO,
    };
    if max_size > available {
        warn!("Risk maxSize {} exceeds available {}, capping", max_size, available);
        max_size = available;
    }
    if max_size < Decimal::ZERO {
        max_size = Decimal::ZERO;
    }

    let approved = requested && risk_level != RiskLevel::Critical;
    if requested && !approved {
        warn!("CRITICAL risk level reported with approval, forcing rejection");
    }

    RiskAssessment {
        approved,
        max_size,
        risk_level,
        reason: decision.reason,
        raw_report: raw,
    }
}

fn narrate(assessment: &RiskAssessment, summary: &str) -> Message {
    let verdict = if assessment.approved { "APPROVED" } else { "REJECTED" };
    let chat = format!(
        "[STEP 2/5] Risk Assessment Complete\n\nStatus: {}\nRisk Level: {}\nMax Position Size: ${:.2}\n\n{}",
        verdict, assessment.risk_level, assessment.max_size, summary
    );
    Message::new(AgentRole::Risk, chat).with_payload(serde_json::json!({
        "approved": assessment.approved,
        "maxSize": assessment.max_size,
        "riskLevel": assessment.risk_level,
        "reason": assessment.reason,
    }))
}

#[async_trait::async_trait]
impl Stage for RiskStage {
    fn role(&self) -> AgentRole {
        AgentRole::Risk
    }

    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError> {
        let account = self.ctx.market.account_snapshot().await?;
        let available = account.available_balance.max(Decimal::ZERO);

        let (assessment, summary) = match self.ctx.reasoning.as_deref() {
            None => {
                let assessment = self.fallback(available, "Reasoning unavailable");
                let summary = format!(
                    "Risk check passed with default limits: up to ${:.2}.",
                    assessment.max_size
                );
                (assessment, summary)
            }
            Some(reasoning) => {
                let user_prompt = format!(
                    "Account Status:\n{}\n\nTechnical Report:\n{}",
                    account_context(&account),
                    state.technical_report.as_deref().unwrap_or("N/A")
                );
                match decide::<RiskDecision>(reasoning, SYSTEM_PROMPT, &user_prompt).await {
                    Ok(decision) => {
                        let summary = decision
                            .value
                            .plain_language_summary
                            .clone()
                            .unwrap_or_else(|| decision.value.reason.clone());
                        (
                            enforce(
                                decision.value,
                                available,
                                self.ctx.limits.risk_fallback_max_usd,
                                decision.raw,
                            ),
                            summary,
                        )
                    }
                    Err(e) => {
                        warn!("Risk reasoning unusable for {}: {}", state.symbol, e);
                        let assessment = self.fallback(available, "Risk decision unavailable");
                        let summary = "Risk assessment parsing failed, proceeding with conservative limits."
                            .to_string();
                        (assessment, summary)
                    }
                }
            }
        };

        info!(
            "Risk for {}: approved={}, maxSize={}, level={}",
            state.symbol, assessment.approved, assessment.max_size, assessment.risk_level
        );

        let message = narrate(&assessment, &summary);
        Ok(StateUpdate {
            risk_assessment: Some(assessment),
            risk_summary: Some(summary),
            ..Default::default()
        }
        .narrate(message))
    }

    fn recover(&self, _state: &PipelineState, error: &StageError) -> StateUpdate {
        let assessment = RiskAssessment {
            approved: false,
            max_size: Decimal::ZERO,
            risk_level: RiskLevel::High,
            reason: format!("Account data unavailable: {}", error),
            raw_report: String::new(),
        };
        let summary = "Risk assessment failed; no new exposure allowed.".to_string();
        let message = narrate(&assessment, &summary);

        StateUpdate {
            risk_assessment: Some(assessment),
            risk_summary: Some(summary),
            ..Default::default()
        }
        .narrate(message)
    }
}
