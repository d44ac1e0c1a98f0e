//! Decision engine: the playback heart.
//!
//! For each step it races every strategy of the fallback chain against a
//! per-strategy timeout, filters survivors by confidence, selects the best
//! weighted match (ties broken by chain order), gates the action through
//! auto-waiting, executes, and retries the whole evaluation when the
//! executor fails. The chain itself is never mutated.

use crate::browser::types::TabHandle;
use crate::config::DecisionConfig;
use crate::executor::{ActionExecutor, ActionKind, ActionRequest, ExecutionResult};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::{FallbackChain, StrategyType};
use crate::waiting::{AutoWaiter, WaitOutcome, WaitRequirements};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One strategy's evaluation, as recorded in the step trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEvaluationRecord {
    pub strategy_type: StrategyType,
    pub found: bool,
    /// Evaluator confidence in [0,1]
    pub confidence: f64,
    /// `base_weight(variant) x confidence`, comparable across variants
    pub weighted_confidence: f64,
    pub match_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyEvaluationRecord {
    fn from_evaluation(
        strategy_type: StrategyType,
        evaluation: &Evaluation,
        duration_ms: u64,
    ) -> Self {
        Self {
            strategy_type,
            found: evaluation.found,
            confidence: evaluation.confidence,
            weighted_confidence: strategy_type.base_weight() * evaluation.confidence,
            match_count: evaluation.match_count,
            duration_ms,
            error: evaluation.error.clone(),
        }
    }
}

/// Outcome of one step decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_strategy: Option<StrategyType>,
    /// Weighted confidence of the selected strategy
    pub effective_confidence: f64,
    /// Full per-strategy trace in chain order, one entry per attempt round
    pub evaluations: Vec<StrategyEvaluationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_outcome: Option<WaitOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    /// Evaluation rounds performed (1 + retries used)
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Pick the best survivor: highest weighted confidence, first in chain order
/// on ties. Returns an index into `records`.
pub fn select_best(records: &[StrategyEvaluationRecord], min_confidence: f64) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, record) in records.iter().enumerate() {
        if !record.found || record.confidence < min_confidence {
            continue;
        }
        match best {
            None => best = Some(index),
            Some(current) => {
                // Strict comparison keeps the earlier entry on ties
                if record.weighted_confidence > records[current].weighted_confidence {
                    best = Some(index);
                }
            }
        }
    }
    best
}

/// The engine and its collaborators.
pub struct DecisionEngine {
    strategies: Arc<StrategySet>,
    waiter: Arc<AutoWaiter>,
    executor: Arc<ActionExecutor>,
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(
        strategies: Arc<StrategySet>,
        waiter: Arc<AutoWaiter>,
        executor: Arc<ActionExecutor>,
        config: DecisionConfig,
    ) -> Self {
        Self {
            strategies,
            waiter,
            executor,
            config,
        }
    }

    /// Locate the step's target through its chain and perform the action.
    pub async fn run_step(
        &self,
        tab: &TabHandle,
        chain: &FallbackChain,
        action: ActionKind,
    ) -> Decision {
        let started = Instant::now();
        let mut all_evaluations = Vec::new();
        let max_attempts = 1 + self.config.max_retries;

        for attempt in 1..=max_attempts {
            let records = self.evaluate_chain(tab, chain).await;
            let selected = select_best(&records, self.config.min_confidence);
            all_evaluations.extend(records.iter().cloned());

            let Some(index) = selected else {
                debug!("no strategy above threshold");
                return Decision {
                    success: false,
                    used_strategy: None,
                    effective_confidence: 0.0,
                    evaluations: all_evaluations,
                    wait_outcome: None,
                    execution: None,
                    attempts: attempt,
                    duration_ms: started.elapsed().as_millis() as u64,
                    failure_reason: Some("no_strategy_above_threshold".to_string()),
                };
            };

            let record = &records[index];
            let evaluation = self
                .re_evaluate_selected(tab, chain, index)
                .await
                .unwrap_or_default();

            // Soft actionability gate: a waiting failure is logged and the
            // executor still runs, unless strict gating is on.
            let wait_outcome = match evaluation.backend_node_id {
                Some(node) => {
                    let _ = self.waiter.scroll_into_view_if_needed(tab, node).await;
                    let requirements = match &action {
                        ActionKind::Type { .. } => WaitRequirements::editable(),
                        _ => WaitRequirements::default(),
                    };
                    Some(
                        self.waiter
                            .wait_for_actionable(
                                tab,
                                node,
                                requirements,
                                Some(self.config.wait_budget_ms),
                            )
                            .await,
                    )
                }
                None => None,
            };

            if let Some(outcome) = &wait_outcome {
                if !outcome.success {
                    warn!(reason = ?outcome.failure_reason, "actionability gate failed");
                    if self.config.strict_gating {
                        return Decision {
                            success: false,
                            used_strategy: Some(record.strategy_type),
                            effective_confidence: record.weighted_confidence,
                            evaluations: all_evaluations,
                            wait_outcome,
                            execution: None,
                            attempts: attempt,
                            duration_ms: started.elapsed().as_millis() as u64,
                            failure_reason: Some("not_actionable".to_string()),
                        };
                    }
                }
            }

            let request = ActionRequest {
                kind: action.clone(),
                node: evaluation.backend_node_id,
                point: evaluation.click_point,
            };
            let execution = self.executor.execute(tab, &request).await;

            if execution.success {
                return Decision {
                    success: true,
                    used_strategy: Some(record.strategy_type),
                    effective_confidence: record.weighted_confidence,
                    evaluations: all_evaluations,
                    wait_outcome,
                    execution: Some(execution),
                    attempts: attempt,
                    duration_ms: started.elapsed().as_millis() as u64,
                    failure_reason: None,
                };
            }

            if attempt < max_attempts {
                debug!(attempt, "executor failed, re-evaluating chain");
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                continue;
            }

            return Decision {
                success: false,
                used_strategy: Some(record.strategy_type),
                effective_confidence: record.weighted_confidence,
                evaluations: all_evaluations,
                wait_outcome,
                execution: Some(execution),
                attempts: attempt,
                duration_ms: started.elapsed().as_millis() as u64,
                failure_reason: Some("executor_failed".to_string()),
            };
        }

        unreachable!("retry loop always returns")
    }

    /// Evaluate every chain strategy (capped at seven), in parallel by
    /// default or sequentially in debug mode.
    async fn evaluate_chain(
        &self,
        tab: &TabHandle,
        chain: &FallbackChain,
    ) -> Vec<StrategyEvaluationRecord> {
        let timeout = Duration::from_millis(self.config.strategy_timeout_ms);
        let strategies = chain
            .strategies
            .iter()
            .take(FallbackChain::MAX_STRATEGIES);

        if self.config.sequential {
            let mut records = Vec::new();
            for strategy in strategies {
                records.push(self.evaluate_one(tab, strategy, timeout).await);
            }
            records
        } else {
            let futures = strategies
                .map(|strategy| self.evaluate_one(tab, strategy, timeout))
                .collect::<Vec<_>>();
            futures::future::join_all(futures).await
        }
    }

    async fn evaluate_one(
        &self,
        tab: &TabHandle,
        strategy: &crate::model::chain::LocatorStrategy,
        timeout: Duration,
    ) -> StrategyEvaluationRecord {
        let started = Instant::now();
        let evaluation = match tokio::time::timeout(
            timeout,
            self.strategies.evaluate(tab, strategy),
        )
        .await
        {
            Ok(evaluation) => evaluation,
            Err(_) => Evaluation::failed(format!(
                "strategy timed out after {}ms",
                timeout.as_millis()
            )),
        };
        StrategyEvaluationRecord::from_evaluation(
            strategy.strategy_type,
            &evaluation,
            started.elapsed().as_millis() as u64,
        )
    }

    /// Re-run the winning strategy to obtain its node handle and click
    /// point; records only carry the trace.
    async fn re_evaluate_selected(
        &self,
        tab: &TabHandle,
        chain: &FallbackChain,
        index: usize,
    ) -> Option<Evaluation> {
        let strategy = chain.strategies.get(index)?;
        Some(self.strategies.evaluate(tab, strategy).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::AccessibilityService;
    use crate::browser::fake::FakeBrowser;
    use crate::config::{AutoWaitConfig, ExecutorConfig, OcrConfig};
    use crate::model::chain::{LocatorStrategy, StrategyMetadata};
    use crate::model::geometry::{BoundingRect, Point};
    use crate::vision::ocr::fake::FakeOcrEngine;
    use crate::vision::OcrService;

    fn record(
        strategy_type: StrategyType,
        found: bool,
        confidence: f64,
    ) -> StrategyEvaluationRecord {
        StrategyEvaluationRecord {
            strategy_type,
            found,
            confidence,
            weighted_confidence: strategy_type.base_weight() * confidence,
            match_count: usize::from(found),
            duration_ms: 1,
            error: None,
        }
    }

    #[test]
    fn test_selection_prefers_weighted_confidence() {
        // Semantic missed; dom_css at 0.8 beats coordinates at 1.0
        let records = vec![
            record(StrategyType::Semantic, false, 0.0),
            record(StrategyType::DomCss, true, 0.8),
            record(StrategyType::Coordinates, true, 1.0),
        ];

        let selected = select_best(&records, 0.5).unwrap();
        assert_eq!(records[selected].strategy_type, StrategyType::DomCss);
        assert!((records[selected].weighted_confidence - 0.68).abs() < 1e-9);
        assert!((records[2].weighted_confidence - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_selection_ties_break_by_chain_order() {
        // Identical weighted scores: the earlier chain entry wins
        let mut first = record(StrategyType::DomCss, true, 0.8);
        let mut second = record(StrategyType::DomCss, true, 0.8);
        first.weighted_confidence = 0.68;
        second.weighted_confidence = 0.68;

        let records = vec![first, second];
        assert_eq!(select_best(&records, 0.5), Some(0));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let records = vec![
            record(StrategyType::Power, true, 0.85),
            record(StrategyType::DomCss, true, 0.75),
            record(StrategyType::VisionOcr, true, 0.80),
            record(StrategyType::Coordinates, true, 1.0),
        ];
        let first = select_best(&records, 0.5);
        for _ in 0..10 {
            assert_eq!(select_best(&records, 0.5), first);
        }
    }

    #[test]
    fn test_selection_respects_confidence_floor() {
        let records = vec![record(StrategyType::DomCss, true, 0.4)];
        assert_eq!(select_best(&records, 0.5), None);
    }

    fn engine_over(browser: Arc<FakeBrowser>, config: DecisionConfig) -> DecisionEngine {
        let accessibility = Arc::new(AccessibilityService::new(browser.clone()));
        let ocr = Arc::new(OcrService::new(
            Arc::new(FakeOcrEngine::new()),
            OcrConfig::default(),
        ));
        let strategies = Arc::new(StrategySet::new(
            browser.clone(),
            accessibility,
            ocr,
        ));
        let waiter = Arc::new(AutoWaiter::new(
            browser.clone(),
            AutoWaitConfig {
                timeout_ms: 200,
                polling_interval_ms: 50,
                stability_threshold_ms: 50,
            },
        ));
        let executor = Arc::new(ActionExecutor::new(
            browser,
            ExecutorConfig {
                mouse_move_steps: 1,
                mouse_move_step_delay_ms: 0,
                keystroke_delay_ms: 0,
                clear_before_type: false,
                simulate_mouse_movement: false,
            },
        ));
        DecisionEngine::new(strategies, waiter, executor, config)
    }

    fn chain_with_css_and_coordinates() -> FallbackChain {
        let css = LocatorStrategy::new(StrategyType::DomCss, 0.9).with_selector("#target");
        let mut coordinates = LocatorStrategy::new(StrategyType::Coordinates, 0.6);
        coordinates.metadata = StrategyMetadata {
            endpoint: Some(Point::new(60.0, 60.0)),
            ..Default::default()
        };
        FallbackChain::new(vec![css, coordinates], StrategyType::DomCss)
    }

    fn fast_config() -> DecisionConfig {
        DecisionConfig {
            strategy_timeout_ms: 1_000,
            min_confidence: 0.5,
            sequential: false,
            max_retries: 1,
            retry_delay_ms: 1,
            wait_budget_ms: 200,
            strict_gating: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_succeeds_through_css_strategy() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(5, "button");
        browser.set_box(5, BoundingRect::new(40.0, 40.0, 40.0, 40.0));
        browser.set_selector("#target", vec![5]);
        browser.set_hit(60.0, 60.0, 5);
        let engine = engine_over(browser.clone(), fast_config());

        let decision = engine
            .run_step(
                &TabHandle::new("tab-1"),
                &chain_with_css_and_coordinates(),
                ActionKind::Click,
            )
            .await;

        assert!(decision.success);
        assert_eq!(decision.used_strategy, Some(StrategyType::DomCss));
        assert_eq!(decision.attempts, 1);
        assert!(decision.wait_outcome.unwrap().success);
        assert!(browser
            .events()
            .iter()
            .any(|e| e.starts_with("mousePressed@(60,60)")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_coordinates_when_css_misses() {
        let browser = Arc::new(FakeBrowser::new());
        let engine = engine_over(browser.clone(), fast_config());

        let decision = engine
            .run_step(
                &TabHandle::new("tab-1"),
                &chain_with_css_and_coordinates(),
                ActionKind::Click,
            )
            .await;

        assert!(decision.success);
        assert_eq!(decision.used_strategy, Some(StrategyType::Coordinates));
        // Coordinate strategy carries no node handle, so no waiting happened
        assert!(decision.wait_outcome.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_survivor_reports_threshold_failure_with_trace() {
        let browser = Arc::new(FakeBrowser::new());
        let engine = engine_over(browser, fast_config());

        // Chain without coordinates: css only, and it misses
        let css = LocatorStrategy::new(StrategyType::DomCss, 0.9).with_selector("#gone");
        let chain = FallbackChain::new(vec![css], StrategyType::DomCss);

        let decision = engine
            .run_step(&TabHandle::new("tab-1"), &chain, ActionKind::Click)
            .await;

        assert!(!decision.success);
        assert_eq!(
            decision.failure_reason.as_deref(),
            Some("no_strategy_above_threshold")
        );
        assert_eq!(decision.evaluations.len(), 1);
        assert!(!decision.evaluations[0].found);
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_failure_retries_then_succeeds() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(5, "button");
        browser.set_box(5, BoundingRect::new(40.0, 40.0, 40.0, 40.0));
        browser.set_selector("#target", vec![5]);
        browser.set_hit(60.0, 60.0, 5);
        // First press fails, the retry succeeds
        browser.fail_command("dispatchMouseEvent", 1);
        let engine = engine_over(browser, fast_config());

        let decision = engine
            .run_step(
                &TabHandle::new("tab-1"),
                &chain_with_css_and_coordinates(),
                ActionKind::Click,
            )
            .await;

        assert!(decision.success);
        assert_eq!(decision.attempts, 2);
        // Both rounds contribute to the trace
        assert!(decision.evaluations.len() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_semantic_miss_falls_through_to_coordinates() {
        let browser = Arc::new(FakeBrowser::new());
        let engine = engine_over(browser, fast_config());

        let semantic = LocatorStrategy::new(StrategyType::Semantic, 0.9).with_metadata(
            StrategyMetadata {
                role: Some("button".to_string()),
                name: Some("Missing".to_string()),
                ..Default::default()
            },
        );
        let mut coordinates = LocatorStrategy::new(StrategyType::Coordinates, 0.6);
        coordinates.metadata.endpoint = Some(Point::new(10.0, 10.0));
        let chain = FallbackChain::new(vec![semantic, coordinates], StrategyType::Semantic);

        let decision = engine
            .run_step(&TabHandle::new("tab-1"), &chain, ActionKind::Click)
            .await;

        assert!(decision.success);
        assert_eq!(decision.used_strategy, Some(StrategyType::Coordinates));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_gating_aborts_on_wait_failure() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(5, "button");
        browser.set_box(5, BoundingRect::new(40.0, 40.0, 40.0, 40.0));
        browser.set_selector("#target", vec![5]);
        browser.set_attr(5, "disabled", "");
        browser.set_hit(60.0, 60.0, 5);
        let mut config = fast_config();
        config.strict_gating = true;
        let engine = engine_over(browser, config);

        let decision = engine
            .run_step(
                &TabHandle::new("tab-1"),
                &chain_with_css_and_coordinates(),
                ActionKind::Click,
            )
            .await;

        assert!(!decision.success);
        assert_eq!(decision.failure_reason.as_deref(), Some("not_actionable"));
    }
}
