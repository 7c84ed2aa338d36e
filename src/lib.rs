//! Agent Runner Library
//!
//! Multi-stage trading decision pipeline for a single perpetual futures
//! symbol:
//! 1. Research - market snapshot and technical read
//! 2. Risk - account health and maximum notional
//! 3. Portfolio - bounded plan (action, size, leverage, stops)
//! 4. Trader - sized market order against the venue
//! 5. Summarizer - final status and narrative
//!
//! The lifecycle manager runs several pipelines concurrently and tracks them.

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod manager;
pub mod market;
pub mod pipeline;
pub mod reasoning;
pub mod types;

use std::sync::Arc;
use tracing::{info, warn};

// Re-export main types for convenience
pub use audit::{AuditSink, JournalSink, LogSink};
pub use config::{Settings, TradingLimits};
pub use error::{GatewayError, ReasoningError, StageError};
pub use manager::AgentManager;
pub use market::{AccountSnapshot, AsterClient, MarketGateway, MarkPrice};
pub use pipeline::{Pipeline, PipelineState, StageContext, StopFlag};
pub use reasoning::{OpenAiClient, ReasoningGateway};
pub use types::{
    AgentRole, AgentRun, Message, OrderSide, PortfolioPlan, RiskAssessment, RiskLevel, RunStatus,
    TradeAction, TradeDecision, WorkflowStatus,
};

/// Wire gateways, audit sink and pipeline from settings
pub async fn build_manager(settings: &Settings) -> anyhow::Result<AgentManager> {
    let market: Arc<dyn MarketGateway> = Arc::new(AsterClient::new(
        &settings.aster_base_url,
        settings.exchange_credentials(),
        settings.exchange_timeout(),
        settings.price_cache_ttl(),
    )?);
    if !market.has_trading_credentials() {
        warn!("Exchange credentials not configured: orders will not be placed");
    }

    let reasoning: Option<Arc<dyn ReasoningGateway>> = match settings.reasoning_key() {
        Some(key) => Some(Arc::new(OpenAiClient::new(
            &settings.llm_base_url,
            key,
            &settings.llm_model,
            settings.llm_timeout(),
        )?)),
        None => {
            warn!("No reasoning API key configured: stages use deterministic fallbacks");
            None
        }
    };

    let audit: Arc<dyn AuditSink> = match &settings.audit_dir {
        Some(dir) => {
            let journal = JournalSink::new(dir);
            journal.init().await?;
            info!("Journaling decisions under {}", dir.display());
            Arc::new(journal)
        }
        None => Arc::new(LogSink),
    };

    let ctx = StageContext::new(market, reasoning, settings.limits());
    let pipeline = Arc::new(Pipeline::new(ctx, audit));
    Ok(AgentManager::new(
        pipeline,
        &settings.default_symbol,
        settings.max_retained_runs,
    ))
}
