//! Lifecycle manager and HTTP surface tests

mod common;

use agent_runner::api::{self, AppState};
use agent_runner::{AgentManager, RunStatus, TradeAction};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{pipeline, MemoryAuditSink, MockMarket};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn manager_with(market: MockMarket, max_retained: usize) -> (AgentManager, Arc<MockMarket>) {
    let market = Arc::new(market);
    let pipeline = Arc::new(pipeline(market.clone(), None, Arc::new(MemoryAuditSink::default())));
    (AgentManager::new(pipeline, "BTCUSDT", max_retained), market)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_start_registers_then_completes() {
    let (manager, market) = manager_with(MockMarket::new(), 100);

    let run = manager.start(Some("btc/usdt")).await;
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.symbol, "BTCUSDT");
    assert!(run.id.starts_with("agent-"));
    assert!(run.result.is_none());

    let finished = manager.wait(&run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.completed_at.is_some());
    let result = finished.result.unwrap();
    assert_eq!(result.symbol, "BTCUSDT");
    assert!(result.trade_decision.unwrap().executed);
    assert_eq!(market.order_count(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let market = MockMarket::new()
        .with_price("BTCUSDT", Decimal::from(65_000))
        .with_price("ETHUSDT", Decimal::from(2_500));
    let (manager, market) = manager_with(market, 100);

    let btc = manager.start(Some("BTCUSDT")).await;
    let eth = manager.start(Some("ETHUSDT")).await;
    assert_ne!(btc.id, eth.id);

    let btc = manager.wait(&btc.id).await.unwrap().result.unwrap();
    let eth = manager.wait(&eth.id).await.unwrap().result.unwrap();

    assert_eq!(btc.symbol, "BTCUSDT");
    assert_eq!(eth.symbol, "ETHUSDT");
    assert_eq!(btc.trade_decision.as_ref().unwrap().price, Some(Decimal::from(65_000)));
    assert_eq!(eth.trade_decision.as_ref().unwrap().price, Some(Decimal::from(2_500)));
    // 100 USD at each price
    assert_eq!(btc.trade_decision.as_ref().unwrap().quantity, Some(Decimal::new(1, 3)));
    assert_eq!(eth.trade_decision.as_ref().unwrap().quantity, Some(Decimal::new(4, 2)));
    assert!(btc.transcript.iter().all(|m| !m.content.contains("ETHUSDT")));
    assert!(eth.transcript.iter().all(|m| !m.content.contains("BTCUSDT")));

    let mut symbols: Vec<String> = market.placed_orders().into_iter().map(|o| o.symbol).collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
}

#[tokio::test]
async fn test_stop_is_cooperative() {
    let (manager, market) =
        manager_with(MockMarket::new().slow_candles(Duration::from_millis(200)), 100);

    let run = manager.start(None).await;
    assert_eq!(manager.list_running().await.len(), 1);

    assert!(manager.stop(&run.id).await);
    assert!(!manager.stop(&run.id).await);
    assert_eq!(manager.get(&run.id).await.unwrap().status, RunStatus::Stopped);
    assert!(manager.list_running().await.is_empty());

    let finished = manager.wait(&run.id).await.unwrap();
    assert_eq!(finished.status, RunStatus::Stopped);
    let result = finished.result.unwrap();
    assert!(result.cancelled);
    assert!(result.trade_decision.is_none());
    assert!(result.performance_report.is_some());
    assert_eq!(market.order_count(), 0);
}

#[tokio::test]
async fn test_stop_unknown_or_finished_run() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    assert!(!manager.stop("agent-missing").await);

    let run = manager.start(None).await;
    manager.wait(&run.id).await.unwrap();
    assert!(!manager.stop(&run.id).await);
    assert_eq!(manager.get(&run.id).await.unwrap().status, RunStatus::Completed);
}

#[tokio::test]
async fn test_registry_evicts_oldest_finished() {
    let (manager, _) = manager_with(MockMarket::new(), 1);

    let first = manager.start(None).await;
    manager.wait(&first.id).await.unwrap();
    let second = manager.start(None).await;
    manager.wait(&second.id).await.unwrap();

    let runs = manager.list().await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, second.id);
    assert!(manager.get(&first.id).await.is_none());
}

#[tokio::test]
async fn test_stopped_run_survives_eviction_while_task_runs() {
    let (manager, _) =
        manager_with(MockMarket::new().slow_candles(Duration::from_millis(200)), 1);

    let first = manager.start(None).await;
    assert!(manager.stop(&first.id).await);
    let second = manager.start(None).await;

    let kept = manager.get(&first.id).await.unwrap();
    assert_eq!(kept.status, RunStatus::Stopped);
    assert!(manager.get(&second.id).await.is_some());

    manager.wait(&second.id).await.unwrap();
}

#[tokio::test]
async fn test_run_once_uses_default_symbol() {
    let (manager, _) = manager_with(MockMarket::new().without_credentials(), 100);
    let state = manager.run_once(Some("  ")).await;
    assert_eq!(state.symbol, "BTCUSDT");
    assert_eq!(state.portfolio_plan.unwrap().action, TradeAction::Buy);
    assert!(manager.list().await.is_empty());
}

// --- HTTP surface ---

fn app(manager: AgentManager) -> axum::Router {
    api::router(Arc::new(AppState { manager }))
}

#[tokio::test]
async fn test_health() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    let response = app(manager)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_api_start_get_and_list() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    let app = app(manager.clone());

    let response = app
        .clone()
        .oneshot(
            Request::post("/api/agents/start")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"symbol": "eth/usdt"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let started = body_json(response).await;
    assert_eq!(started["symbol"], "ETHUSDT");
    assert_eq!(started["status"], "running");
    let id = started["id"].as_str().unwrap().to_string();

    manager.wait(&id).await.unwrap();

    let response = app
        .clone()
        .oneshot(Request::get(format!("/api/agents/{}", id)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["success"], true);
    assert_eq!(fetched["data"]["status"], "completed");
    assert_eq!(fetched["data"]["result"]["workflowStatus"], "COMPLETED");

    let response = app
        .clone()
        .oneshot(Request::get("/api/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let listed = body_json(response).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let response = app
        .oneshot(Request::get("/api/agents/running").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let running = body_json(response).await;
    assert!(running["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_api_start_without_body_uses_default() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    let response = app(manager)
        .oneshot(Request::post("/api/agents/start").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["symbol"], "BTCUSDT");
}

#[tokio::test]
async fn test_api_unknown_run_is_404() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    let app = app(manager);

    let response = app
        .clone()
        .oneshot(Request::get("/api/agents/agent-nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "Agent not found");

    let response = app
        .oneshot(Request::post("/api/agents/agent-nope/stop").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn test_api_stop_running_run() {
    let (manager, _) =
        manager_with(MockMarket::new().slow_candles(Duration::from_millis(200)), 100);
    let run = manager.start(None).await;

    let response = app(manager.clone())
        .oneshot(
            Request::post(format!("/api/agents/{}/stop", run.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
    assert_eq!(manager.wait(&run.id).await.unwrap().status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_api_synchronous_run() {
    let (manager, _) = manager_with(MockMarket::new(), 100);
    let response = app(manager)
        .oneshot(
            Request::post("/api/agent/run")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"symbol": "BTCUSDT"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["symbol"], "BTCUSDT");
    assert_eq!(body["data"]["tradeDecision"]["executed"], true);
    assert!(body["data"]["performanceReport"].is_string());
}
