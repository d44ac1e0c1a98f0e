//! Buffered telemetry logger.
//!
//! Events accumulate in memory and flush to the store when the buffer
//! reaches the batch size or the flush interval has elapsed. Persistence
//! failures are swallowed and the batch re-queued; telemetry never fails a
//! run.

use crate::config::TelemetryConfig;
use crate::engine::Decision;
use crate::telemetry::events::{RunSummary, TelemetryEvent};
use crate::telemetry::store::TelemetryStore;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;
use tracing::warn;

#[derive(Debug)]
struct RunAccumulator {
    started_at: DateTime<Utc>,
    passed: u64,
    failed: u64,
    strategy_usage: HashMap<String, u64>,
    total_step_duration_ms: u64,
    steps: u64,
    domains: HashSet<String>,
}

impl RunAccumulator {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            passed: 0,
            failed: 0,
            strategy_usage: HashMap::new(),
            total_step_duration_ms: 0,
            steps: 0,
            domains: HashSet::new(),
        }
    }
}

/// The buffered event sink shared by decision engine and playback.
pub struct TelemetryLogger {
    store: Arc<TelemetryStore>,
    config: TelemetryConfig,
    buffer: Mutex<Vec<TelemetryEvent>>,
    runs: Mutex<HashMap<String, RunAccumulator>>,
    last_flush: Mutex<Instant>,
}

impl TelemetryLogger {
    pub fn new(store: Arc<TelemetryStore>, config: TelemetryConfig) -> Self {
        Self {
            store,
            config,
            buffer: Mutex::new(Vec::new()),
            runs: Mutex::new(HashMap::new()),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    /// Begin a run, returning its id.
    pub async fn start_run(&self) -> String {
        let run_id = Uuid::new_v4().to_string();
        self.runs
            .lock()
            .await
            .insert(run_id.clone(), RunAccumulator::new());
        run_id
    }

    /// Record one step decision as a telemetry event.
    pub async fn record_step(
        &self,
        run_id: &str,
        step_index: usize,
        action: &str,
        domain: &str,
        decision: &Decision,
    ) {
        let mut event = TelemetryEvent::new(run_id, step_index, action);
        event.evaluations = decision.evaluations.clone();
        event.used_strategy = decision.used_strategy;
        event.effective_confidence = decision.effective_confidence;
        event.success = decision.success;
        event.duration_ms = decision.duration_ms;
        event.domain = domain.to_string();

        {
            let mut runs = self.runs.lock().await;
            if let Some(accumulator) = runs.get_mut(run_id) {
                if decision.success {
                    accumulator.passed += 1;
                } else {
                    accumulator.failed += 1;
                }
                if let Some(used) = decision.used_strategy {
                    *accumulator
                        .strategy_usage
                        .entry(used.name().to_string())
                        .or_insert(0) += 1;
                }
                accumulator.total_step_duration_ms += decision.duration_ms;
                accumulator.steps += 1;
                if !domain.is_empty() {
                    accumulator.domains.insert(domain.to_string());
                }
            }
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(event);
            buffer.len() >= self.config.batch_size || self.flush_interval_elapsed().await
        };

        if should_flush {
            self.flush().await;
        }
    }

    async fn flush_interval_elapsed(&self) -> bool {
        let last = *self.last_flush.lock().await;
        last.elapsed().as_millis() as u64 >= self.config.flush_interval_ms
    }

    /// Flush the buffer to the store. Persistence errors re-queue the batch.
    pub async fn flush(&self) {
        let batch: Vec<TelemetryEvent> = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return;
        }

        if let Err(err) = self.store.insert_events(&batch) {
            warn!(%err, "telemetry flush failed, re-queueing {} events", batch.len());
            let mut buffer = self.buffer.lock().await;
            let mut requeued = batch;
            requeued.extend(buffer.drain(..));
            *buffer = requeued;
            return;
        }

        *self.last_flush.lock().await = Instant::now();
    }

    /// End a run: flush, derive the summary, persist it.
    pub async fn end_run(&self, run_id: &str) -> Option<RunSummary> {
        self.flush().await;

        let accumulator = self.runs.lock().await.remove(run_id)?;
        let summary = RunSummary {
            run_id: run_id.to_string(),
            started_at: accumulator.started_at,
            ended_at: Utc::now(),
            passed: accumulator.passed,
            failed: accumulator.failed,
            strategy_usage: accumulator.strategy_usage,
            avg_step_duration_ms: if accumulator.steps > 0 {
                accumulator.total_step_duration_ms as f64 / accumulator.steps as f64
            } else {
                0.0
            },
            domains: {
                let mut domains: Vec<String> = accumulator.domains.into_iter().collect();
                domains.sort();
                domains
            },
        };

        if let Err(err) = self.store.insert_run(&summary) {
            warn!(%err, "failed to persist run summary");
        }
        Some(summary)
    }

    /// Purge events beyond the retention window.
    pub async fn run_maintenance(&self) -> usize {
        self.flush().await;
        match self.store.purge_older_than(self.config.retention_days) {
            Ok(removed) => removed,
            Err(err) => {
                warn!(%err, "telemetry purge failed");
                0
            }
        }
    }

    /// Number of events waiting in the buffer.
    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.len()
    }
}
