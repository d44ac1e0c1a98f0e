//! SQLite-backed telemetry store.

use crate::error::{Error, Result};
use crate::model::chain::StrategyType;
use crate::telemetry::events::{
    EventFilter, RunSummary, StrategyMetrics, TelemetryEvent, TelemetryExport,
};
use crate::telemetry::schema::{initialize_schema, is_initialized};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Days covered by the strategy health window.
const HEALTH_WINDOW_DAYS: i64 = 7;

fn strategy_type_from_str(s: &str) -> Option<StrategyType> {
    match s {
        "semantic" => Some(StrategyType::Semantic),
        "power" => Some(StrategyType::Power),
        "dom_css" => Some(StrategyType::DomCss),
        "css_path" => Some(StrategyType::CssPath),
        "vision_ocr" => Some(StrategyType::VisionOcr),
        "evidence_scoring" => Some(StrategyType::EvidenceScoring),
        "coordinates" => Some(StrategyType::Coordinates),
        _ => None,
    }
}

/// Telemetry event and run-summary persistence.
pub struct TelemetryStore {
    conn: Arc<Mutex<Connection>>,
}

impl TelemetryStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::TelemetryStorage(e.to_string()))?;

        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::TelemetryStorage(e.to_string()))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::TelemetryStorage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::TelemetryStorage(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::TelemetryStorage(e.to_string()))
    }

    // ==================== Writes ====================

    /// Insert a batch of events with their per-strategy evaluations.
    pub fn insert_events(&self, events: &[TelemetryEvent]) -> Result<()> {
        self.with_conn(|conn| {
            for event in events {
                let evaluations_json =
                    serde_json::to_string(&event.evaluations).unwrap_or_else(|_| "[]".to_string());

                conn.execute(
                    "INSERT OR REPLACE INTO events (
                        id, run_id, step_index, action, timestamp, used_strategy,
                        effective_confidence, success, duration_ms, domain, evaluations
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        event.id,
                        event.run_id,
                        event.step_index as i64,
                        event.action,
                        event.timestamp.to_rfc3339(),
                        event.used_strategy.map(|s| s.name()),
                        event.effective_confidence,
                        event.success as i64,
                        event.duration_ms as i64,
                        event.domain,
                        evaluations_json,
                    ],
                )?;

                conn.execute(
                    "DELETE FROM evaluations WHERE event_id = ?1",
                    params![event.id],
                )?;
                for evaluation in &event.evaluations {
                    let used = event.used_strategy == Some(evaluation.strategy_type);
                    conn.execute(
                        "INSERT INTO evaluations (
                            event_id, run_id, strategy_type, found, confidence,
                            duration_ms, used, step_success, timestamp, error
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            event.id,
                            event.run_id,
                            evaluation.strategy_type.name(),
                            evaluation.found as i64,
                            evaluation.confidence,
                            evaluation.duration_ms as i64,
                            used as i64,
                            event.success as i64,
                            event.timestamp.to_rfc3339(),
                            evaluation.error,
                        ],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Insert a run summary; written once per run.
    pub fn insert_run(&self, run: &RunSummary) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO runs (
                    run_id, started_at, ended_at, passed, failed,
                    strategy_usage, avg_step_duration_ms, domains
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.run_id,
                    run.started_at.to_rfc3339(),
                    run.ended_at.to_rfc3339(),
                    run.passed as i64,
                    run.failed as i64,
                    serde_json::to_string(&run.strategy_usage)
                        .unwrap_or_else(|_| "{}".to_string()),
                    run.avg_step_duration_ms,
                    serde_json::to_string(&run.domains).unwrap_or_else(|_| "[]".to_string()),
                ],
            )?;
            Ok(())
        })
    }

    // ==================== Queries ====================

    /// List events matching a filter, newest first.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<TelemetryEvent>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, run_id, step_index, action, timestamp, used_strategy,
                        effective_confidence, success, duration_ms, domain, evaluations
                 FROM events WHERE 1=1",
            );
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(run_id) = &filter.run_id {
                sql.push_str(" AND run_id = ?");
                params_vec.push(Box::new(run_id.clone()));
            }
            if let Some(strategy_type) = filter.strategy_type {
                sql.push_str(" AND used_strategy = ?");
                params_vec.push(Box::new(strategy_type.name().to_string()));
            }
            if let Some(success) = filter.success {
                sql.push_str(" AND success = ?");
                params_vec.push(Box::new(success as i64));
            }
            if let Some(from) = filter.from {
                sql.push_str(" AND timestamp >= ?");
                params_vec.push(Box::new(from.to_rfc3339()));
            }
            if let Some(to) = filter.to {
                sql.push_str(" AND timestamp <= ?");
                params_vec.push(Box::new(to.to_rfc3339()));
            }

            sql.push_str(" ORDER BY timestamp DESC");

            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {}", offset));
            }

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let events = stmt
                .query_map(params_refs.as_slice(), |row| Self::row_to_event(row))?
                .filter_map(|r| r.ok())
                .collect();

            Ok(events)
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<TelemetryEvent> {
        let evaluations: Vec<crate::engine::StrategyEvaluationRecord> = row
            .get::<_, String>(10)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(TelemetryEvent {
            id: row.get(0)?,
            run_id: row.get(1)?,
            step_index: row.get::<_, i64>(2)? as usize,
            action: row.get(3)?,
            timestamp: parse_datetime(row.get::<_, String>(4)?),
            used_strategy: row
                .get::<_, Option<String>>(5)?
                .as_deref()
                .and_then(strategy_type_from_str),
            effective_confidence: row.get(6)?,
            success: row.get::<_, i64>(7)? != 0,
            duration_ms: row.get::<_, i64>(8)? as u64,
            domain: row.get(9)?,
            evaluations,
        })
    }

    /// List stored run summaries, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, started_at, ended_at, passed, failed,
                        strategy_usage, avg_step_duration_ms, domains
                 FROM runs ORDER BY started_at DESC",
            )?;
            let runs = stmt
                .query_map([], |row| {
                    Ok(RunSummary {
                        run_id: row.get(0)?,
                        started_at: parse_datetime(row.get::<_, String>(1)?),
                        ended_at: parse_datetime(row.get::<_, String>(2)?),
                        passed: row.get::<_, i64>(3)? as u64,
                        failed: row.get::<_, i64>(4)? as u64,
                        strategy_usage: row
                            .get::<_, String>(5)
                            .ok()
                            .and_then(|s| serde_json::from_str(&s).ok())
                            .unwrap_or_default(),
                        avg_step_duration_ms: row.get(6)?,
                        domains: row
                            .get::<_, String>(7)
                            .ok()
                            .and_then(|s| serde_json::from_str(&s).ok())
                            .unwrap_or_default(),
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(runs)
        })
    }

    /// Per-strategy aggregates over a time range.
    pub fn strategy_metrics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StrategyMetrics>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT strategy_type,
                        COUNT(*),
                        SUM(found),
                        SUM(used),
                        SUM(CASE WHEN used = 1 AND step_success = 1 THEN 1 ELSE 0 END),
                        AVG(confidence),
                        AVG(duration_ms)
                 FROM evaluations
                 WHERE timestamp >= ?1 AND timestamp <= ?2
                 GROUP BY strategy_type",
            )?;

            let metrics = stmt
                .query_map(params![from.to_rfc3339(), to.to_rfc3339()], |row| {
                    let type_str: String = row.get(0)?;
                    let total: i64 = row.get(1)?;
                    let found: i64 = row.get(2)?;
                    let used: i64 = row.get(3)?;
                    let succeeded: i64 = row.get(4)?;
                    Ok((
                        type_str,
                        total as u64,
                        found as u64,
                        used as u64,
                        succeeded as u64,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                    ))
                })?
                .filter_map(|r| r.ok())
                .filter_map(
                    |(type_str, total, found, used, succeeded, avg_conf, avg_dur)| {
                        let strategy_type = strategy_type_from_str(&type_str)?;
                        Some(StrategyMetrics {
                            strategy_type,
                            total_evaluations: total,
                            times_found: found,
                            times_used: used,
                            times_succeeded: succeeded,
                            avg_confidence: avg_conf,
                            avg_duration_ms: avg_dur,
                            success_rate: if used > 0 {
                                succeeded as f64 / used as f64
                            } else {
                                0.0
                            },
                            find_rate: if total > 0 {
                                found as f64 / total as f64
                            } else {
                                0.0
                            },
                        })
                    },
                )
                .collect();

            Ok(metrics)
        })
    }

    /// Health score for one strategy over the last seven days.
    pub fn strategy_health(&self, strategy_type: StrategyType) -> Result<f64> {
        let to = Utc::now();
        let from = to - Duration::days(HEALTH_WINDOW_DAYS);
        let metrics = self.strategy_metrics(from, to)?;
        Ok(metrics
            .into_iter()
            .find(|m| m.strategy_type == strategy_type)
            .map(|m| m.health())
            .unwrap_or(0.0))
    }

    /// Health ranking across all strategies seen in the last seven days.
    pub fn strategy_health_ranking(&self) -> Result<Vec<(StrategyType, f64)>> {
        let to = Utc::now();
        let from = to - Duration::days(HEALTH_WINDOW_DAYS);
        let mut ranking: Vec<(StrategyType, f64)> = self
            .strategy_metrics(from, to)?
            .into_iter()
            .map(|m| (m.strategy_type, m.health()))
            .collect();
        ranking.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranking)
    }

    // ==================== Maintenance ====================

    /// Delete events older than the retention window. Returns how many
    /// events were removed.
    pub fn purge_older_than(&self, retention_days: u32) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(retention_days as i64)).to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM evaluations WHERE timestamp < ?1",
                params![cutoff],
            )?;
            let removed = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?;
            Ok(removed)
        })
    }

    /// Export every event and run summary as a JSON document.
    pub fn export(&self) -> Result<TelemetryExport> {
        let events = self.query_events(&EventFilter::default())?;
        let runs = self.list_runs()?;
        Ok(TelemetryExport {
            exported_at: Utc::now(),
            event_count: events.len(),
            events,
            runs,
        })
    }
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
