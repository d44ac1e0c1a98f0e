//! Telemetry event and aggregate types.

use crate::engine::StrategyEvaluationRecord;
use crate::model::chain::StrategyType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One step decision as persisted telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: String,
    pub run_id: String,
    pub step_index: usize,
    /// Action kind label, e.g. `click`
    pub action: String,
    pub timestamp: DateTime<Utc>,
    /// Per-strategy evaluation trace in the order it was produced
    pub evaluations: Vec<StrategyEvaluationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_strategy: Option<StrategyType>,
    /// Weighted confidence of the winning strategy
    pub effective_confidence: f64,
    pub success: bool,
    pub duration_ms: u64,
    /// Domain of the page the step ran against
    pub domain: String,
}

impl TelemetryEvent {
    pub fn new(run_id: impl Into<String>, step_index: usize, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            step_index,
            action: action.into(),
            timestamp: Utc::now(),
            evaluations: Vec::new(),
            used_strategy: None,
            effective_confidence: 0.0,
            success: false,
            duration_ms: 0,
            domain: String::new(),
        }
    }
}

/// Aggregate written once when a run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub passed: u64,
    pub failed: u64,
    /// Winning-strategy histogram
    pub strategy_usage: HashMap<String, u64>,
    pub avg_step_duration_ms: f64,
    pub domains: Vec<String>,
}

/// Filter for event queries; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    pub run_id: Option<String>,
    pub strategy_type: Option<StrategyType>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Per-strategy aggregate over a time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub strategy_type: StrategyType,
    pub total_evaluations: u64,
    pub times_found: u64,
    /// How often this strategy won the selection
    pub times_used: u64,
    /// How often the step succeeded when this strategy was used
    pub times_succeeded: u64,
    pub avg_confidence: f64,
    pub avg_duration_ms: f64,
    /// `times_succeeded / times_used` when used at all
    pub success_rate: f64,
    /// `times_found / total_evaluations` when evaluated at all
    pub find_rate: f64,
}

impl StrategyMetrics {
    /// Composite health score: weighted success and find rates.
    pub fn health(&self) -> f64 {
        0.6 * self.success_rate + 0.4 * self.find_rate
    }
}

/// Telemetry export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryExport {
    pub exported_at: DateTime<Utc>,
    pub event_count: usize,
    pub events: Vec<TelemetryEvent>,
    pub runs: Vec<RunSummary>,
}
