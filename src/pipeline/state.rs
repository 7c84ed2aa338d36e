//! Pipeline state and the per-field merge rules applied between stages

use serde::{Deserialize, Serialize};

use crate::market::MarketSnapshot;
use crate::types::{
    AgentRole, Message, PortfolioPlan, RiskAssessment, TradeDecision, WorkflowStatus,
};

/// Shared record accumulated across the stages of one run.
///
/// Stages never mutate it directly: they return a [`StateUpdate`] that the
/// orchestrator merges with [`PipelineState::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<MarketSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_assessment: Option<RiskAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_plan: Option<PortfolioPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_decision: Option<TradeDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_status: Option<WorkflowStatus>,
    /// Stages whose success path failed, in execution order
    #[serde(default)]
    pub failed_stages: Vec<AgentRole>,
    /// Set when the run was stopped before all stages ran
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub transcript: Vec<Message>,
}

impl PipelineState {
    /// Initial state with the workflow start narration
    pub fn new(symbol: &str) -> Self {
        let start = Message::new(
            AgentRole::System,
            format!(
                "Starting multi-agent trading workflow for {}\n\n\
                 Workflow Steps:\n\
                 1. Technical Research Agent - Analyze market data\n\
                 2. Risk Manager - Assess account health and limits\n\
                 3. Portfolio Manager - Create trading plan\n\
                 4. Trader Agent - Execute trades\n\
                 5. Summarizer Agent - Generate performance report",
                symbol
            ),
        )
        .with_payload(serde_json::json!({ "status": "started", "symbol": symbol }));

        Self {
            symbol: symbol.to_string(),
            market: None,
            technical_report: None,
            technical_summary: None,
            risk_assessment: None,
            risk_summary: None,
            portfolio_plan: None,
            portfolio_summary: None,
            trade_decision: None,
            execution_summary: None,
            performance_report: None,
            workflow_status: None,
            failed_stages: Vec::new(),
            cancelled: false,
            transcript: vec![start],
        }
    }

    /// Merge a stage delta: present fields replace, lists append
    pub fn apply(&mut self, update: StateUpdate) {
        replace(&mut self.market, update.market);
        replace(&mut self.technical_report, update.technical_report);
        replace(&mut self.technical_summary, update.technical_summary);
        replace(&mut self.risk_assessment, update.risk_assessment);
        replace(&mut self.risk_summary, update.risk_summary);
        replace(&mut self.portfolio_plan, update.portfolio_plan);
        replace(&mut self.portfolio_summary, update.portfolio_summary);
        replace(&mut self.trade_decision, update.trade_decision);
        replace(&mut self.execution_summary, update.execution_summary);
        replace(&mut self.performance_report, update.performance_report);
        replace(&mut self.workflow_status, update.workflow_status);

        self.failed_stages.extend(update.failed_stages);
        self.transcript.extend(update.transcript);
    }

    /// Whether the named stage's success path failed
    pub fn stage_failed(&self, role: AgentRole) -> bool {
        self.failed_stages.contains(&role)
    }
}

fn replace<T>(slot: &mut Option<T>, value: Option<T>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

/// Partial update returned by a stage.
///
/// `None` means "leave as is"; the symbol has no counterpart here because it
/// is fixed when the state is created.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub market: Option<MarketSnapshot>,
    pub technical_report: Option<String>,
    pub technical_summary: Option<String>,
    pub risk_assessment: Option<RiskAssessment>,
    pub risk_summary: Option<String>,
    pub portfolio_plan: Option<PortfolioPlan>,
    pub portfolio_summary: Option<String>,
    pub trade_decision: Option<TradeDecision>,
    pub execution_summary: Option<String>,
    pub performance_report: Option<String>,
    pub workflow_status: Option<WorkflowStatus>,
    pub failed_stages: Vec<AgentRole>,
    pub transcript: Vec<Message>,
}

impl StateUpdate {
    /// Append a transcript entry
    pub fn narrate(mut self, message: Message) -> Self {
        self.transcript.push(message);
        self
    }

    /// Mark a stage as failed in the ledger
    pub fn failed(mut self, role: AgentRole) -> Self {
        self.failed_stages.push(role);
        self
    }
}
