//! Agent Lifecycle Manager - concurrent runs, status tracking, stop
//!
//! Each run owns its own pipeline state and executes on its own task. The
//! registry is the only shared structure and sits behind one lock.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::pipeline::{normalize_symbol, Pipeline, PipelineState, StopFlag};
use crate::types::{AgentRun, RunStatus};

/// Registry of runs keyed by id
#[derive(Default)]
struct RunRegistry {
    runs: HashMap<String, AgentRun>,
    /// Ids in start order
    order: VecDeque<String>,
    flags: HashMap<String, StopFlag>,
    done: HashMap<String, watch::Receiver<bool>>,
}

impl RunRegistry {
    fn finish(&mut self, id: &str, outcome: Result<PipelineState, JoinError>) {
        self.flags.remove(id);
        let Some(run) = self.runs.get_mut(id) else {
            warn!("Finished run {} is no longer registered", id);
            return;
        };

        if run.completed_at.is_none() {
            run.completed_at = Some(Utc::now());
        }

        match outcome {
            Ok(state) => {
                if run.status == RunStatus::Running {
                    run.status = RunStatus::Completed;
                }
                info!(
                    "Run {} for {} finished as {} ({:?})",
                    id, run.symbol, run.status, state.workflow_status
                );
                run.result = Some(state);
            }
            Err(e) => {
                error!("Run {} for {} aborted: {}", id, run.symbol, e);
                if run.status == RunStatus::Running {
                    run.status = RunStatus::Failed;
                }
                run.error = Some(format!("pipeline task aborted: {}", e));
            }
        }
    }

    /// Drop the oldest finished runs beyond `max`. A run whose task is still
    /// going (including a stopped one) holds a flag and stays.
    fn evict(&mut self, max: usize) {
        if self.runs.len() <= max {
            return;
        }

        let mut excess = self.runs.len() - max;
        let runs = &self.runs;
        let flags = &self.flags;
        let mut evicted = Vec::new();
        self.order.retain(|id| {
            let finished = !flags.contains_key(id)
                && runs.get(id).map(|r| r.status.is_finished()).unwrap_or(true);
            if excess > 0 && finished {
                excess -= 1;
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &evicted {
            self.runs.remove(id);
            self.done.remove(id);
        }
        if !evicted.is_empty() {
            info!("Evicted {} finished runs from registry", evicted.len());
        }
    }
}

/// Starts, tracks and stops pipeline runs
#[derive(Clone)]
pub struct AgentManager {
    pipeline: Arc<Pipeline>,
    registry: Arc<RwLock<RunRegistry>>,
    default_symbol: String,
    max_retained: usize,
}

impl AgentManager {
    pub fn new(pipeline: Arc<Pipeline>, default_symbol: &str, max_retained: usize) -> Self {
        Self {
            pipeline,
            registry: Arc::new(RwLock::new(RunRegistry::default())),
            default_symbol: default_symbol.to_string(),
            max_retained,
        }
    }

    /// Canonical symbol for a caller-supplied one
    pub fn symbol_for(&self, raw: Option<&str>) -> String {
        normalize_symbol(raw, &self.default_symbol)
    }

    /// Register a run and execute it in the background.
    ///
    /// Returns as soon as the run is registered.
    pub async fn start(&self, symbol: Option<&str>) -> AgentRun {
        let symbol = self.symbol_for(symbol);
        let id = format!("agent-{}", Uuid::new_v4());
        let run = AgentRun {
            id: id.clone(),
            symbol: symbol.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };

        let flag = StopFlag::new();
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut registry = self.registry.write().await;
            registry.runs.insert(id.clone(), run.clone());
            registry.order.push_back(id.clone());
            registry.flags.insert(id.clone(), flag.clone());
            registry.done.insert(id.clone(), done_rx);
            registry.evict(self.max_retained);
        }
        info!("Started run {} for {}", id, symbol);

        let pipeline = self.pipeline.clone();
        let registry = self.registry.clone();
        let max_retained = self.max_retained;
        tokio::spawn(async move {
            // Inner task so a panicking stage surfaces as a JoinError
            let task = tokio::spawn(async move { pipeline.run_with_cancel(&symbol, &flag).await });
            let outcome = task.await;

            {
                let mut registry = registry.write().await;
                registry.finish(&id, outcome);
                registry.evict(max_retained);
            }
            let _ = done_tx.send(true);
        });

        run
    }

    /// Run the pipeline inline and return its final state
    pub async fn run_once(&self, symbol: Option<&str>) -> PipelineState {
        let symbol = self.symbol_for(symbol);
        self.pipeline.run(&symbol).await
    }

    pub async fn get(&self, id: &str) -> Option<AgentRun> {
        self.registry.read().await.runs.get(id).cloned()
    }

    /// All retained runs, oldest first
    pub async fn list(&self) -> Vec<AgentRun> {
        let registry = self.registry.read().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.runs.get(id).cloned())
            .collect()
    }

    pub async fn list_running(&self) -> Vec<AgentRun> {
        self.list()
            .await
            .into_iter()
            .filter(|run| run.status == RunStatus::Running)
            .collect()
    }

    /// Mark a running run as stopped.
    ///
    /// Cooperative: a stage already in flight finishes; remaining stages
    /// other than the Summarizer are skipped.
    pub async fn stop(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        let flag = registry.flags.get(id).cloned();
        let Some(run) = registry.runs.get_mut(id) else {
            return false;
        };
        if run.status != RunStatus::Running {
            return false;
        }

        run.status = RunStatus::Stopped;
        run.completed_at = Some(Utc::now());
        if let Some(flag) = flag {
            flag.stop();
        }
        info!("Stopped run {} for {}", id, run.symbol);
        true
    }

    /// Wait until the run's task has finished; `None` for unknown ids
    pub async fn wait(&self, id: &str) -> Option<AgentRun> {
        let mut done = self.registry.read().await.done.get(id).cloned()?;
        while !*done.borrow() {
            if done.changed().await.is_err() {
                break;
            }
        }
        self.get(id).await
    }
}
