//! Audit sinks - append-only record of every stage narration

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::AgentRole;

/// Destination for stage narration.
///
/// Callers treat failures as non-fatal: they log and continue.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(
        &self,
        symbol: &str,
        role: AgentRole,
        chat: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Writes narration to the tracing log only
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait::async_trait]
impl AuditSink for LogSink {
    async fn record(
        &self,
        symbol: &str,
        role: AgentRole,
        chat: &str,
        _payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        info!("[{}] {}: {}", symbol, role, chat.lines().next().unwrap_or_default());
        debug!("[{}] {} full narration:\n{}", symbol, role, chat);
        Ok(())
    }
}

/// One line of the decision journal
#[derive(Debug, Serialize)]
struct JournalLine<'a> {
    timestamp: String,
    symbol: &'a str,
    role: AgentRole,
    trader: &'static str,
    chat: &'a str,
    payload: &'a serde_json::Value,
}

/// Appends JSON lines to `<dir>/journal/<date>.jsonl`
pub struct JournalSink {
    journal_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JournalSink {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            journal_dir: base_dir.as_ref().join("journal"),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.journal_dir).await?;
        Ok(())
    }

    /// Path of today's journal file
    pub fn current_path(&self) -> PathBuf {
        self.journal_dir
            .join(format!("{}.jsonl", Utc::now().format("%Y-%m-%d")))
    }
}

#[async_trait::async_trait]
impl AuditSink for JournalSink {
    async fn record(
        &self,
        symbol: &str,
        role: AgentRole,
        chat: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let line = JournalLine {
            timestamp: Utc::now().to_rfc3339(),
            symbol,
            role,
            trader: role.title(),
            chat,
            payload,
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');

        // Serialize appends so concurrent runs never interleave partial lines
        let _guard = self.write_lock.lock().await;
        let path = self.current_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;

        debug!("Journaled {} entry to {}", role, path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_journal_appends_lines() {
        let dir = tempdir().unwrap();
        let sink = JournalSink::new(dir.path());
        sink.init().await.unwrap();

        sink.record("BTCUSDT", AgentRole::Risk, "Approved", &serde_json::json!({"maxSize": "100"}))
            .await
            .unwrap();
        sink.record("BTCUSDT", AgentRole::Trader, "Holding", &serde_json::Value::Null)
            .await
            .unwrap();

        let content = std::fs::read_to_string(sink.current_path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["trader"], "Risk Manager");
        assert_eq!(lines[0]["payload"]["maxSize"], "100");
        assert_eq!(lines[1]["role"], "trader");
    }

    #[tokio::test]
    async fn test_journal_without_init_reports_error() {
        let dir = tempdir().unwrap();
        let sink = JournalSink::new(dir.path().join("missing"));
        let result = sink
            .record("BTCUSDT", AgentRole::System, "start", &serde_json::Value::Null)
            .await;
        assert!(result.is_err());
    }
}
