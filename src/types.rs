//! Core types shared by the pipeline, the lifecycle manager and the API
//!
//! These types define what each stage publishes into the pipeline state and
//! what callers see when they inspect a run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::pipeline::PipelineState;

/// Who produced a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    System,
    Research,
    Risk,
    Portfolio,
    Trader,
    Summarizer,
}

impl AgentRole {
    /// Display name used in the audit trail
    pub fn title(&self) -> &'static str {
        match self {
            AgentRole::System => "System",
            AgentRole::Research => "Technical Research Agent",
            AgentRole::Risk => "Risk Manager",
            AgentRole::Portfolio => "Portfolio Manager",
            AgentRole::Trader => "Trader Agent",
            AgentRole::Summarizer => "Summarizer Agent",
        }
    }

    /// Position in the five-step pipeline (0 for System)
    pub fn step(&self) -> u8 {
        match self {
            AgentRole::System => 0,
            AgentRole::Research => 1,
            AgentRole::Risk => 2,
            AgentRole::Portfolio => 3,
            AgentRole::Trader => 4,
            AgentRole::Summarizer => 5,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// One entry of the append-only run transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: AgentRole,
    pub content: String,
    /// Structured payload forwarded to the audit sink
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Risk level reported by the risk stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            "CRITICAL" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Output of the risk stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub approved: bool,
    /// Maximum USD notional the portfolio stage may allocate (>= 0)
    pub max_size: Decimal,
    pub risk_level: RiskLevel,
    pub reason: String,
    /// Raw reasoning output, or a description of the fallback used
    pub raw_report: String,
}

/// Portfolio action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
    Exit,
    Reduce,
}

impl TradeAction {
    /// Actions that never reach the market gateway
    pub fn is_passive(&self) -> bool {
        matches!(self, TradeAction::Hold | TradeAction::Exit)
    }

    /// Order side for actions that do trade: BUY buys, everything else sells
    pub fn order_side(&self) -> OrderSide {
        match self {
            TradeAction::Buy => OrderSide::Buy,
            _ => OrderSide::Sell,
        }
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            "HOLD" => Ok(TradeAction::Hold),
            "EXIT" => Ok(TradeAction::Exit),
            "REDUCE" => Ok(TradeAction::Reduce),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "BUY"),
            TradeAction::Sell => write!(f, "SELL"),
            TradeAction::Hold => write!(f, "HOLD"),
            TradeAction::Exit => write!(f, "EXIT"),
            TradeAction::Reduce => write!(f, "REDUCE"),
        }
    }
}

/// Order side sent to the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Output of the portfolio stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPlan {
    pub action: TradeAction,
    /// USD notional, clamped and rounded to cents
    pub size: Decimal,
    pub leverage: u32,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Decimal>,
    pub raw_plan: String,
}

/// Output of the trader stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TradeDecision {
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<OrderSide>,
    /// Why nothing was sent (e.g. HOLD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TradeDecision {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Final classification produced by the summarizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Completed,
    Partial,
    Failed,
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            "PARTIAL" => Ok(WorkflowStatus::Partial),
            "FAILED" => Ok(WorkflowStatus::Failed),
            other => Err(format!("unknown workflow status: {}", other)),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Completed => write!(f, "COMPLETED"),
            WorkflowStatus::Partial => write!(f, "PARTIAL"),
            WorkflowStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle record for one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRun {
    pub id: String,
    pub symbol: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing_is_case_insensitive() {
        assert_eq!("buy".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!(" Reduce ".parse::<TradeAction>().unwrap(), TradeAction::Reduce);
        assert!("open_long".parse::<TradeAction>().is_err());
    }

    #[test]
    fn test_order_side_mapping() {
        assert_eq!(TradeAction::Buy.order_side(), OrderSide::Buy);
        assert_eq!(TradeAction::Sell.order_side(), OrderSide::Sell);
        assert_eq!(TradeAction::Reduce.order_side(), OrderSide::Sell);
        assert!(TradeAction::Hold.is_passive());
        assert!(TradeAction::Exit.is_passive());
        assert!(!TradeAction::Reduce.is_passive());
    }

    #[test]
    fn test_trade_decision_serializes_compactly() {
        let decision = TradeDecision::skipped("HOLD");
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json, serde_json::json!({"executed": false, "reason": "HOLD"}));
    }
}
