//! Summarizer stage - final status and narrative for the run

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PipelineState, Stage, StageContext, StateUpdate};
use crate::error::StageError;
use crate::reasoning::decide;
use crate::types::{AgentRole, Message, WorkflowStatus};

const FALLBACK_REPORT: &str = "Performance summary: Trading workflow completed.";

const SYSTEM_PROMPT: &str = r#"You are the Summarizer Agent.
Your task is to create a concise performance report summarizing the entire trading workflow.

Output a JSON object:
{
    "workflowStatus": "COMPLETED" | "PARTIAL" | "FAILED",
    "keyDecisions": string[],
    "executedActions": string[],
    "performanceMetrics": {
        "riskLevel": string,
        "positionSize": number,
        "leverage": number
    },
    "summary": string (3-4 sentences summarizing the entire workflow)
}"#;

/// Deterministic classification of a finished (or stopped) run
pub fn classify(state: &PipelineState) -> WorkflowStatus {
    let upstream = [AgentRole::Research, AgentRole::Risk, AgentRole::Portfolio];
    if upstream.iter().all(|role| state.stage_failed(*role)) {
        return WorkflowStatus::Failed;
    }

    let trade_error = state
        .trade_decision
        .as_ref()
        .map(|d| d.error.is_some())
        .unwrap_or(false);

    if !state.failed_stages.is_empty() || state.cancelled || trade_error {
        WorkflowStatus::Partial
    } else {
        WorkflowStatus::Completed
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PerformanceMetrics {
    risk_level: Option<String>,
    position_size: Option<f64>,
    leverage: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryReport {
    #[serde(default)]
    workflow_status: Option<String>,
    #[serde(default)]
    key_decisions: Vec<String>,
    #[serde(default)]
    executed_actions: Vec<String>,
    #[serde(default)]
    performance_metrics: PerformanceMetrics,
    #[serde(default)]
    summary: Option<String>,
}

fn join_or_na(items: &[String]) -> String {
    if items.is_empty() {
        "N/A".to_string()
    } else {
        items.join(", ")
    }
}

impl SummaryReport {
    fn render(&self, symbol: &str, status: WorkflowStatus) -> String {
        let metrics = &self.performance_metrics;
        format!(
            "PERFORMANCE REPORT - {symbol}\n\n\
             Workflow Status: {status}\n\
             Key Decisions: {decisions}\n\
             Executed Actions: {actions}\n\n\
             Performance Metrics:\n\
             - Risk Level: {risk}\n\
             - Position Size: ${size:.2}\n\
             - Leverage: {leverage}x\n\n\
             Summary:\n{summary}",
            symbol = symbol,
            status = status,
            decisions = join_or_na(&self.key_decisions),
            actions = join_or_na(&self.executed_actions),
            risk = metrics.risk_level.as_deref().unwrap_or("N/A"),
            size = metrics.position_size.unwrap_or(0.0),
            leverage = metrics
                .leverage
                .map(|l| l.to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            summary = self.summary.as_deref().unwrap_or("Workflow completed."),
        )
    }
}

pub struct SummarizerStage {
    ctx: StageContext,
}

impl SummarizerStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

/// Fixed report used without reasoning or when it fails
fn fallback(state: &PipelineState) -> StateUpdate {
    let status = classify(state);
    info!("Workflow status for {}: {}", state.symbol, status);
    StateUpdate {
        performance_report: Some(FALLBACK_REPORT.to_string()),
        workflow_status: Some(status),
        ..Default::default()
    }
    .narrate(
        Message::new(
            AgentRole::Summarizer,
            format!(
                "[STEP 5/5] Performance Report Generated\n\nWorkflow Status: {}\n\n{}",
                status, FALLBACK_REPORT
            ),
        )
        .with_payload(serde_json::json!({ "workflowStatus": status })),
    )
}

#[async_trait::async_trait]
impl Stage for SummarizerStage {
    fn role(&self) -> AgentRole {
        AgentRole::Summarizer
    }

    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError> {
        let Some(reasoning) = self.ctx.reasoning.as_deref() else {
            return Ok(fallback(state));
        };

        let user_prompt = format!(
            "Technical Research: {}\n\
             Risk Assessment: {}\n\
             Portfolio Plan: {}\n\
             Trade Execution: {}\n\
             Failed Stages: {:?}\n\
             Stopped Early: {}\n\n\
             Symbol: {}",
            state
                .technical_summary
                .as_deref()
                .or(state.technical_report.as_deref())
                .unwrap_or("N/A"),
            state.risk_summary.as_deref().unwrap_or("N/A"),
            state.portfolio_summary.as_deref().unwrap_or("N/A"),
            state.execution_summary.as_deref().unwrap_or("N/A"),
            state.failed_stages,
            state.cancelled,
            state.symbol,
        );

        let report = match decide::<SummaryReport>(reasoning, SYSTEM_PROMPT, &user_prompt).await {
            Ok(decision) => decision.value,
            Err(e) => {
                warn!("Summarizer reasoning unusable for {}: {}", state.symbol, e);
                return Ok(fallback(state));
            }
        };

        let status = report
            .workflow_status
            .as_deref()
            .and_then(|s| s.parse::<WorkflowStatus>().ok())
            .unwrap_or_else(|| classify(state));
        info!("Workflow status for {}: {}", state.symbol, status);

        let chat = format!(
            "[STEP 5/5] Performance Report Generated\n\nWorkflow Status: {}\nKey Decisions: {}\nExecuted Actions: {}\n\n{}",
            status,
            join_or_na(&report.key_decisions),
            join_or_na(&report.executed_actions),
            report.summary.as_deref().unwrap_or("Trading workflow completed.")
        );
        let payload = serde_json::to_value(&report).unwrap_or(serde_json::Value::Null);

        Ok(StateUpdate {
            performance_report: Some(report.render(&state.symbol, status)),
            workflow_status: Some(status),
            ..Default::default()
        }
        .narrate(Message::new(AgentRole::Summarizer, chat).with_payload(payload)))
    }

    fn recover(&self, state: &PipelineState, _error: &StageError) -> StateUpdate {
        fallback(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeDecision;

    #[test]
    fn test_clean_run_is_completed() {
        let mut state = PipelineState::new("BTCUSDT");
        state.apply(StateUpdate {
            trade_decision: Some(TradeDecision::skipped("HOLD")),
            ..Default::default()
        });
        assert_eq!(classify(&state), WorkflowStatus::Completed);
    }

    #[test]
    fn test_trade_error_is_partial() {
        let mut state = PipelineState::new("BTCUSDT");
        state.apply(StateUpdate {
            trade_decision: Some(TradeDecision::failed("credentials missing")),
            ..Default::default()
        });
        assert_eq!(classify(&state), WorkflowStatus::Partial);
    }

    #[test]
    fn test_stopped_run_is_partial() {
        let mut state = PipelineState::new("BTCUSDT");
        state.cancelled = true;
        assert_eq!(classify(&state), WorkflowStatus::Partial);
    }

    #[test]
    fn test_all_upstream_failed_is_failed() {
        let mut state = PipelineState::new("BTCUSDT");
        state.apply(
            StateUpdate::default()
                .failed(AgentRole::Research)
                .failed(AgentRole::Risk)
                .failed(AgentRole::Portfolio),
        );
        assert_eq!(classify(&state), WorkflowStatus::Failed);
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let mut state = PipelineState::new("BTCUSDT");
        state.apply(StateUpdate::default().failed(AgentRole::Risk));
        let first = fallback(&state);
        let second = fallback(&state);
        assert_eq!(first.workflow_status, second.workflow_status);
        assert_eq!(first.workflow_status, Some(WorkflowStatus::Partial));
        assert_eq!(first.performance_report.as_deref(), Some(FALLBACK_REPORT));
    }

    #[test]
    fn test_report_render_defaults() {
        let report: SummaryReport = serde_json::from_str(r#"{"summary": "Done."}"#).unwrap();
        let text = report.render("BTCUSDT", WorkflowStatus::Completed);
        assert!(text.contains("Workflow Status: COMPLETED"));
        assert!(text.contains("Position Size: $0.00"));
        assert!(text.ends_with("Done."));
    }
}
