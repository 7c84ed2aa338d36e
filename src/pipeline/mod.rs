//! Decision Pipeline - five stages threaded over one shared state
//!
//! Research -> Risk -> Portfolio -> Trader -> Summarizer, strictly in order.
//! A stage that fails is replaced by its fallback output; the Summarizer
//! always runs.

pub mod portfolio;
pub mod research;
pub mod risk;
pub mod state;
pub mod summarizer;
pub mod trader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::AuditSink;
use crate::config::TradingLimits;
use crate::error::StageError;
use crate::market::{MarketGateway, MarketSnapshotProvider};
use crate::reasoning::ReasoningGateway;
use crate::types::{AgentRole, Message};

pub use portfolio::PortfolioStage;
pub use research::ResearchStage;
pub use risk::RiskStage;
pub use state::{PipelineState, StateUpdate};
pub use summarizer::SummarizerStage;
pub use trader::TraderStage;

/// One transformation step of the pipeline
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    fn role(&self) -> AgentRole;

    /// Success path: read the accumulated state, return a delta
    async fn run(&self, state: &PipelineState) -> Result<StateUpdate, StageError>;

    /// Fallback output used when `run` fails
    fn recover(&self, state: &PipelineState, error: &StageError) -> StateUpdate;
}

/// Gateways and limits shared by every stage
#[derive(Clone)]
pub struct StageContext {
    pub market: Arc<dyn MarketGateway>,
    pub snapshots: MarketSnapshotProvider,
    /// `None` when no reasoning credentials are configured
    pub reasoning: Option<Arc<dyn ReasoningGateway>>,
    pub limits: TradingLimits,
}

impl StageContext {
    pub fn new(
        market: Arc<dyn MarketGateway>,
        reasoning: Option<Arc<dyn ReasoningGateway>>,
        limits: TradingLimits,
    ) -> Self {
        let snapshots =
            MarketSnapshotProvider::new(market.clone(), &limits.candle_interval, limits.candle_limit);
        Self {
            market,
            snapshots,
            reasoning,
            limits,
        }
    }
}

/// Cooperative stop signal, checked between stages
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Orchestrator composing the stages into a linear graph
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    summarizer: Box<dyn Stage>,
    audit: Arc<dyn AuditSink>,
}

impl Pipeline {
    /// Standard five-stage pipeline
    pub fn new(ctx: StageContext, audit: Arc<dyn AuditSink>) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ResearchStage::new(ctx.clone())),
            Box::new(RiskStage::new(ctx.clone())),
            Box::new(PortfolioStage::new(ctx.clone())),
            Box::new(TraderStage::new(ctx.clone())),
        ];
        Self {
            stages,
            summarizer: Box::new(SummarizerStage::new(ctx)),
            audit,
        }
    }

    /// Run every stage for `symbol` and return the final state
    pub async fn run(&self, symbol: &str) -> PipelineState {
        self.run_with_cancel(symbol, &StopFlag::new()).await
    }

    /// Run with a stop flag; once set, remaining stages before the
    /// Summarizer are skipped
    pub async fn run_with_cancel(&self, symbol: &str, stop: &StopFlag) -> PipelineState {
        info!("Starting trading workflow for {}", symbol);
        let mut state = PipelineState::new(symbol);
        self.forward(&state.symbol, &state.transcript).await;

        for stage in &self.stages {
            if stop.is_stopped() {
                warn!("Run for {} stopped before {}", symbol, stage.role());
                state.cancelled = true;
                let from = state.transcript.len();
                state.apply(StateUpdate::default().narrate(Message::new(
                    AgentRole::System,
                    format!("Run stopped before {}. Remaining stages skipped.", stage.role()),
                )));
                self.forward(&state.symbol, &state.transcript[from..]).await;
                break;
            }
            self.step(stage.as_ref(), &mut state).await;
        }

        // A stop that landed during the last stage
        if stop.is_stopped() && !state.cancelled {
            info!("Run for {} stopped after the final trading stage", symbol);
            state.cancelled = true;
        }

        self.step(self.summarizer.as_ref(), &mut state).await;

        info!(
            "Workflow for {} finished: status={}, failed stages={:?}",
            symbol,
            state
                .workflow_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            state.failed_stages
        );
        state
    }

    async fn step(&self, stage: &dyn Stage, state: &mut PipelineState) {
        let role = stage.role();
        info!("[{}] Step {}/5: {}", state.symbol, role.step(), role);

        let update = match stage.run(state).await {
            Ok(update) => update,
            Err(e) => {
                warn!("[{}] {} failed, using fallback: {}", state.symbol, role, e);
                stage.recover(state, &e).failed(role)
            }
        };

        let from = state.transcript.len();
        state.apply(update);
        self.forward(&state.symbol, &state.transcript[from..]).await;
    }

    /// Hand new transcript entries to the audit sink; failures never abort
    async fn forward(&self, symbol: &str, messages: &[Message]) {
        for message in messages {
            if let Err(e) = self
                .audit
                .record(symbol, message.role, &message.content, &message.payload)
                .await
            {
                warn!("Failed to persist {} narration: {}", message.role, e);
            }
        }
        debug!("Forwarded {} transcript entries for {}", messages.len(), symbol);
    }
}

/// Canonical venue symbol: `btc/usdt ` -> `BTCUSDT`; empty -> `default`
pub fn normalize_symbol(raw: Option<&str>, default: &str) -> String {
    let cleaned: String = raw
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| *c != '/' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if cleaned.is_empty() {
        default.to_string()
    } else {
        cleaned
    }
}
