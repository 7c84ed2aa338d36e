//! Agent Runner entry point
//!
//! `agent-runner [serve]` starts the HTTP API; `agent-runner run [SYMBOL]`
//! runs one pipeline and prints the final state.

use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, Level};

use agent_runner::api::{self, AppState};
use agent_runner::{build_manager, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    // Initialize logging
    let level = Level::from_str(&settings.log_level).unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut args = std::env::args().skip(1);
    let command = args.next();

    match command.as_deref() {
        Some("run") => {
            let symbol = args.next();
            let manager = build_manager(&settings).await?;
            let state = manager.run_once(symbol.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        None | Some("serve") => serve(&settings).await,
        Some(other) => anyhow::bail!("unknown command `{}` (expected `serve` or `run [SYMBOL]`)", other),
    }
}

async fn serve(settings: &Settings) -> anyhow::Result<()> {
    info!("Starting Agent Runner...");
    let manager = build_manager(settings).await?;
    let app = api::router(Arc::new(AppState { manager }));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.port)).await?;
    info!("Agent Runner listening on port {}", settings.port);

    axum::serve(listener, app).await?;
    Ok(())
}
