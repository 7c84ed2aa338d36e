//! Research stage - market snapshot plus an optional reasoned technical read

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PipelineState, Stage, StageContext, StateUpdate};
use crate::error::{ReasoningError, StageError};
use crate::market::MarketSnapshot;
use crate::reasoning::decide;
use crate::types::{AgentRole, Message};

const SYSTEM_PROMPT: &str = r#"You are the Technical Research Agent.
Your task is to analyze market data and provide a comprehensive technical research report.

Analyze the provided market data and output a JSON object:
{
    "trend": "BULLISH" | "BEARISH" | "NEUTRAL",
    "strength": "STRONG" | "MODERATE" | "WEAK",
    "keyLevels": { "support": number, "resistance": number },
    "indicators": {
        "rsiSignal": "OVERSOLD" | "NEUTRAL" | "OVERBOUGHT",
        "macdSignal": "BULLISH" | "BEARISH" | "NEUTRAL",
        "trendSignal": "BULLISH" | "BEARISH" | "NEUTRAL"
    },
    "riskFactors": string[],
    "opportunities": string[],
    "summary": string (2-3 sentences plain language summary)
}"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyLevels {
    support: Option<f64>,
    resistance: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndicatorSignals {
    rsi_signal: Option<String>,
    macd_signal: Option<String>,
    trend_signal: Option<String>,
}

/// Technical read returned by the reasoning capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TechnicalAnalysis {
    trend: String,
    #[serde(default = "default_strength")]
    strength: String,
    #[serde(default)]
    key_levels: KeyLevels,
    #[serde(default)]
    indicators: IndicatorSignals,
    #[serde(default)]
    risk_factors: Vec<String>,
    #[serde(default)]
    opportunities: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

fn default_strength() -> String { "MODERATE".to_string() }

impl TechnicalAnalysis {
    /// Neutral read used when the reasoning output cannot be parsed
    fn neutral() -> Self {
        Self {
            trend: "NEUTRAL".to_string(),
            strength: default_strength(),
            key_levels: KeyLevels::default(),
            indicators: IndicatorSignals::default(),
            risk_factors: Vec::new(),
            opportunities: Vec::new(),
            summary: Some("Technical analysis completed. Market conditions appear neutral.".to_string()),
        }
    }

    fn render(&self, symbol: &str, market_data: &str) -> String {
        format!(
            "TECHNICAL RESEARCH REPORT FOR {symbol}:\n\n\
             Trend Analysis: {trend} ({strength})\n\
             Support: {support}\n\
             Resistance: {resistance}\n\n\
             Indicator Signals:\n\
             - RSI: {rsi}\n\
             - MACD: {macd}\n\
             - Trend: {trend_signal}\n\n\
             Risk Factors: {risks}\n\
             Opportunities: {opportunities}\n\n\
             {market_data}",
            symbol = symbol,
            trend = self.trend,
            strength = self.strength,
            support = format_level(self.key_levels.support),
            resistance = format_level(self.key_levels.resistance),
            rsi = self.indicators.rsi_signal.as_deref().unwrap_or("NEUTRAL"),
            macd = self.indicators.macd_signal.as_deref().unwrap_or("NEUTRAL"),
            trend_signal = self.indicators.trend_signal.as_deref().unwrap_or("NEUTRAL"),
            risks = join_or_none(&self.risk_factors),
            opportunities = join_or_none(&self.opportunities),
            market_data = market_data,
        )
    }
}

fn format_level(level: Option<f64>) -> String {
    level
        .map(|v| format!("${:.2}", v))
        .unwrap_or_else(|| "N/A".to_string())
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None identified".to_string()
    } else {
        items.join(", ")
    }
}

pub struct ResearchStage {
    ctx: StageContext,
}

impl ResearchStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait::async_trait]
impl Stage for ResearchStage {
    fn role(&self) -> AgentRole {
        AgentRole::Research
    }

    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError> {
        let symbol = &state.symbol;
        let snapshot = self.ctx.snapshots.snapshot(symbol).await?;

        let Some(reasoning) = self.ctx.reasoning.as_deref() else {
            info!("No reasoning configured, using basic analysis for {}", symbol);
            return Ok(basic_update(snapshot));
        };

        let market_data = snapshot.render();
        let user_prompt = format!("Market Data:\n{}\n\nSymbol: {}", market_data, symbol);

        let (report, summary, analysis) =
            match decide::<TechnicalAnalysis>(reasoning, SYSTEM_PROMPT, &user_prompt).await {
                Ok(decision) => {
                    let analysis = decision.value;
                    let summary = analysis
                        .summary
                        .clone()
                        .unwrap_or_else(|| "Technical analysis completed.".to_string());
                    (analysis.render(symbol, &market_data), summary, Some(analysis))
                }
                Err(ReasoningError::Parse(e)) => {
                    warn!("Research output unparsable for {}, assuming neutral: {}", symbol, e);
                    let analysis = TechnicalAnalysis::neutral();
                    let summary = analysis.summary.clone().unwrap_or_default();
                    (analysis.render(symbol, &market_data), summary, Some(analysis))
                }
                Err(e) => {
                    warn!("Research reasoning failed for {}: {}", symbol, e);
                    (
                        market_data.clone(),
                        "Technical analysis failed due to system error.".to_string(),
                        None,
                    )
                }
            };

        let chat = match &analysis {
            Some(a) => format!(
                "[STEP 1/5] Technical Research Complete\n\nTrend: {} ({})\nSupport: {}\nResistance: {}\n\n{}",
                a.trend,
                a.strength,
                format_level(a.key_levels.support),
                format_level(a.key_levels.resistance),
                summary
            ),
            None => format!("[STEP 1/5] Technical Research Complete\n\n{}", summary),
        };
        let payload = analysis
            .as_ref()
            .and_then(|a| serde_json::to_value(a).ok())
            .unwrap_or(serde_json::Value::Null);

        Ok(StateUpdate {
            market: Some(snapshot),
            technical_report: Some(report),
            technical_summary: Some(summary),
            ..Default::default()
        }
        .narrate(Message::new(AgentRole::Research, chat).with_payload(payload)))
    }

    fn recover(&self, state: &PipelineState, error: &StageError) -> StateUpdate {
        StateUpdate {
            technical_report: Some(format!(
                "Market analysis unavailable for {}: {}",
                state.symbol, error
            )),
            technical_summary: Some("Market data unavailable.".to_string()),
            ..Default::default()
        }
        .narrate(
            Message::new(
                AgentRole::Research,
                format!("[STEP 1/5] Technical Research failed\n\n{}", error),
            )
            .with_payload(serde_json::json!({ "status": "error", "error": error.to_string() })),
        )
    }
}

/// Degraded but valid output when no reasoning capability is configured
fn basic_update(snapshot: MarketSnapshot) -> StateUpdate {
    let summary = format!("Basic market analysis: {} trend detected.", snapshot.trend);
    let chat = format!(
        "[STEP 1/5] Technical Research Complete\n\nPrice: ${:.2}\nTrend: {}\nRSI: {:.2}\n\n{}",
        snapshot.price, snapshot.trend, snapshot.indicators.rsi, summary
    );

    StateUpdate {
        technical_report: Some(snapshot.basic_report()),
        technical_summary: Some(summary),
        market: Some(snapshot),
        ..Default::default()
    }
    .narrate(Message::new(AgentRole::Research, chat))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::extract_json;

    #[test]
    fn test_analysis_parses_partial_output() {
        let analysis: TechnicalAnalysis =
            extract_json(r#"{"trend": "BULLISH", "keyLevels": {"support": 61000.5}}"#).unwrap();
        assert_eq!(analysis.strength, "MODERATE");

        let report = analysis.render("BTCUSDT", "DATA");
        assert!(report.contains("Trend Analysis: BULLISH (MODERATE)"));
        assert!(report.contains("Support: $61000.50"));
        assert!(report.contains("Resistance: N/A"));
        assert!(report.contains("Risk Factors: None identified"));
        assert!(report.ends_with("DATA"));
    }

    #[test]
    fn test_neutral_fallback() {
        let analysis = TechnicalAnalysis::neutral();
        assert_eq!(analysis.trend, "NEUTRAL");
        assert_eq!(analysis.strength, "MODERATE");
    }
}
