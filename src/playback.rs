//! Playback controller: drives a recording against a live tab, once or per
//! CSV row.
//!
//! Row 0 runs every step; later rows start at the recording's loop start
//! index. Steps run strictly in order with their configured pre-step delay.
//! The controller exposes pause/resume/stop; stop completes the current step
//! and then ends the run.

use crate::browser::types::TabHandle;
use crate::browser::BrowserControl;
use crate::conditional::{ConditionalClickRunner, ConditionalOutcome};
use crate::csv::CsvMapper;
use crate::engine::{Decision, DecisionEngine};
use crate::error::{Error, Result};
use crate::executor::ActionKind;
use crate::model::chain::{FallbackChain, LocatorStrategy, StrategyType};
use crate::model::recording::{CsvData, Recording, Step, StepEvent};
use crate::telemetry::TelemetryLogger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Running,
    Paused,
    Stopping,
}

/// Progress events emitted while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackEvent {
    RunStarted { run_id: String },
    RowStarted { row: usize },
    StepStarted { row: usize, step_index: usize, label: String },
    StepFinished { row: usize, step_index: usize, success: bool, duration_ms: u64 },
    RunFinished { run_id: String, passed: u64, failed: u64 },
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub step_index: usize,
    pub row: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional: Option<ConditionalOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    pub passed: u64,
    pub failed: u64,
    pub rows_played: usize,
    pub step_results: Vec<StepResult>,
    /// True when the run ended through a stop request
    pub stopped: bool,
}

/// Per-run options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackOptions {
    /// Abort the run on the first failed step
    pub stop_on_error: bool,
}

/// Drives recordings through the decision engine.
pub struct PlaybackController {
    browser: Arc<dyn BrowserControl>,
    engine: Arc<DecisionEngine>,
    conditional: Arc<ConditionalClickRunner>,
    mapper: CsvMapper,
    telemetry: Option<Arc<TelemetryLogger>>,
    state_tx: watch::Sender<PlaybackState>,
    state_rx: watch::Receiver<PlaybackState>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    events_tx: mpsc::UnboundedSender<PlaybackEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PlaybackEvent>>>,
}

impl PlaybackController {
    pub fn new(
        browser: Arc<dyn BrowserControl>,
        engine: Arc<DecisionEngine>,
        conditional: Arc<ConditionalClickRunner>,
        mapper: CsvMapper,
        telemetry: Option<Arc<TelemetryLogger>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PlaybackState::Idle);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            browser,
            engine,
            conditional,
            mapper,
            telemetry,
            state_tx,
            state_rx,
            cancel_tx,
            cancel_rx,
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Take the progress event receiver; available once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlaybackEvent>> {
        self.events_rx.lock().ok()?.take()
    }

    pub fn state(&self) -> PlaybackState {
        *self.state_rx.borrow()
    }

    /// Pause after the current step.
    pub fn pause(&self) {
        if self.state() == PlaybackState::Running {
            let _ = self.state_tx.send(PlaybackState::Paused);
        }
    }

    /// Resume a paused run.
    pub fn resume(&self) {
        if self.state() == PlaybackState::Paused {
            let _ = self.state_tx.send(PlaybackState::Running);
        }
    }

    /// Request a stop; the current step completes first.
    pub fn stop(&self) {
        let _ = self.state_tx.send(PlaybackState::Stopping);
        let _ = self.cancel_tx.send(true);
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Run a recording, optionally once per CSV row.
    pub async fn run(
        &self,
        tab: &TabHandle,
        recording: &Recording,
        csv: Option<&CsvData>,
        options: PlaybackOptions,
    ) -> Result<RunResult> {
        let problems = recording.validate();
        if !problems.is_empty() {
            return Err(Error::InvalidRecording(problems.join("; ")));
        }
        if self.state() != PlaybackState::Idle {
            return Err(Error::PlaybackState(format!(
                "cannot start run while {:?}",
                self.state()
            )));
        }

        let _ = self.cancel_tx.send(false);
        let _ = self.state_tx.send(PlaybackState::Running);

        let run_id = match &self.telemetry {
            Some(logger) => logger.start_run().await,
            None => Uuid::new_v4().to_string(),
        };
        info!(run_id = %run_id, recording = %recording.id, "playback run started");
        self.emit(PlaybackEvent::RunStarted {
            run_id: run_id.clone(),
        });

        let domain = domain_of(&recording.url);
        let rows = match csv {
            Some(csv) if !csv.rows.is_empty() => csv.rows.len(),
            Some(_) => {
                warn!("CSV attached but empty, running once without substitution");
                1
            }
            None => 1,
        };

        let mut step_results: Vec<StepResult> = Vec::new();
        let mut stopped = false;

        'rows: for row in 0..rows {
            self.emit(PlaybackEvent::RowStarted { row });
            let first_step = if row == 0 {
                0
            } else {
                recording.loop_start_index
            };

            for (step_index, step) in recording.steps.iter().enumerate().skip(first_step) {
                if !self.wait_while_paused().await {
                    stopped = true;
                    break 'rows;
                }

                self.emit(PlaybackEvent::StepStarted {
                    row,
                    step_index,
                    label: step.label.clone(),
                });

                let effective_step = match csv {
                    Some(csv) if !csv.rows.is_empty() => {
                        self.mapper.substitute_step(step, csv, row)?.0
                    }
                    _ => step.clone(),
                };

                self.pre_step_delay(recording, &effective_step).await;

                let result = self
                    .run_step(tab, &run_id, &domain, row, step_index, &effective_step)
                    .await;

                self.emit(PlaybackEvent::StepFinished {
                    row,
                    step_index,
                    success: result.success,
                    duration_ms: result.duration_ms,
                });

                let failed = !result.success;
                step_results.push(result);

                if failed && options.stop_on_error {
                    warn!(step_index, "stopping run on step failure");
                    break 'rows;
                }
                if self.state() == PlaybackState::Stopping {
                    stopped = true;
                    break 'rows;
                }
            }
        }

        let passed = step_results.iter().filter(|r| r.success).count() as u64;
        let failed = step_results.len() as u64 - passed;

        if let Some(logger) = &self.telemetry {
            logger.end_run(&run_id).await;
        }
        self.emit(PlaybackEvent::RunFinished {
            run_id: run_id.clone(),
            passed,
            failed,
        });
        let _ = self.state_tx.send(PlaybackState::Idle);

        Ok(RunResult {
            run_id,
            success: failed == 0 && !stopped,
            passed,
            failed,
            rows_played: rows,
            step_results,
            stopped,
        })
    }

    /// Block while paused. Returns false when a stop arrived instead.
    async fn wait_while_paused(&self) -> bool {
        let mut state_rx = self.state_rx.clone();
        loop {
            let state = *state_rx.borrow();
            match state {
                PlaybackState::Running => return true,
                PlaybackState::Stopping | PlaybackState::Idle => return false,
                PlaybackState::Paused => {
                    if state_rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn pre_step_delay(&self, recording: &Recording, step: &Step) {
        let delay_ms = match step.delay_seconds {
            Some(seconds) => (seconds * 1_000.0) as u64,
            None => recording.global_delay_ms,
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn run_step(
        &self,
        tab: &TabHandle,
        run_id: &str,
        domain: &str,
        row: usize,
        step_index: usize,
        step: &Step,
    ) -> StepResult {
        let started = Instant::now();
        debug!(step = %step.id, event = %step.event, "running step");

        let mut result = StepResult {
            step_id: step.id.clone(),
            step_index,
            row,
            success: false,
            decision: None,
            conditional: None,
            error: None,
            duration_ms: 0,
        };

        match step.event {
            StepEvent::Open => {
                let Some(url) = step.url.as_deref().or(step.value.as_deref()) else {
                    result.error = Some("open step without url".to_string());
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                };
                match self.browser.navigate(tab, url).await {
                    Ok(()) => result.success = true,
                    Err(err) => result.error = Some(err.to_string()),
                }
            }
            StepEvent::ConditionalClick => {
                let Some(config) = step.conditional_config.as_ref().filter(|c| c.enabled) else {
                    // A disabled conditional step is a no-op, not a failure
                    result.success = true;
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                };
                let outcome = self
                    .conditional
                    .run(tab, config, self.cancel_rx.clone())
                    .await;
                result.success = outcome.success;
                result.error = outcome.error_message.clone();
                result.conditional = Some(outcome);
            }
            StepEvent::Click | StepEvent::Input | StepEvent::Dropdown => {
                let action = match step.event {
                    StepEvent::Input => ActionKind::Type {
                        text: step.value.clone().unwrap_or_default(),
                    },
                    StepEvent::Dropdown => ActionKind::Select {
                        value: step
                            .option_text
                            .clone()
                            .or(step.value.clone())
                            .unwrap_or_default(),
                    },
                    _ => ActionKind::Click,
                };

                let chain = match &step.fallback_chain {
                    Some(chain) => chain.clone(),
                    None => synthesize_chain(step),
                };

                let decision = self.engine.run_step(tab, &chain, action).await;
                result.success = decision.success;
                result.error = decision.failure_reason.clone();

                if let Some(logger) = &self.telemetry {
                    logger
                        .record_step(
                            run_id,
                            step_index,
                            &step.event.to_string(),
                            domain,
                            &decision,
                        )
                        .await;
                }
                result.decision = Some(decision);
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        result
    }
}

/// Build a minimal chain for steps recorded before fallback chains existed.
fn synthesize_chain(step: &Step) -> FallbackChain {
    let mut strategies = Vec::new();

    if let Some(selector) = step.selector.as_deref().filter(|s| !s.is_empty()) {
        strategies.push(LocatorStrategy::new(StrategyType::DomCss, 0.75).with_selector(selector));
    }
    if let Some(xpath) = step.xpath.as_deref().filter(|s| !s.is_empty()) {
        strategies.push(LocatorStrategy::new(StrategyType::CssPath, 0.65).with_selector(xpath));
    }
    if let Some(target) = step
        .vision_target
        .as_deref()
        .or(step.ocr_text.as_deref())
        .filter(|t| !t.trim().is_empty())
    {
        let mut vision = LocatorStrategy::new(StrategyType::VisionOcr, 0.70);
        vision.metadata.target_text = Some(target.to_string());
        strategies.push(vision);
    }
    if let Some(rect) = &step.bounding_rect {
        let mut coordinates = LocatorStrategy::new(StrategyType::Coordinates, 0.60);
        coordinates.metadata.endpoint = Some(rect.center());
        strategies.push(coordinates);
    }

    let primary_type = strategies
        .first()
        .map(|s| s.strategy_type)
        .unwrap_or(StrategyType::Coordinates);
    FallbackChain::new(strategies, primary_type)
}

/// Host portion of a URL, for telemetry grouping.
fn domain_of(url: &str) -> String {
    let stripped = url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    stripped
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::AccessibilityService;
    use crate::browser::fake::FakeBrowser;
    use crate::config::{
        AutoWaitConfig, CsvConfig, DecisionConfig, ExecutorConfig, OcrConfig, TelemetryConfig,
    };
    use crate::executor::ActionExecutor;
    use crate::locate::StrategySet;
    use crate::model::geometry::BoundingRect;
    use crate::telemetry::TelemetryStore;
    use crate::vision::ocr::fake::FakeOcrEngine;
    use crate::vision::OcrService;
    use crate::waiting::AutoWaiter;

    fn controller(browser: Arc<FakeBrowser>) -> PlaybackController {
        let engine_ocr = Arc::new(OcrService::new(
            Arc::new(FakeOcrEngine::new()),
            OcrConfig::default(),
        ));
        let accessibility = Arc::new(AccessibilityService::new(browser.clone()));
        let strategies = Arc::new(StrategySet::new(
            browser.clone(),
            accessibility.clone(),
            engine_ocr.clone(),
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
            browser.clone(),
            ExecutorConfig {
                mouse_move_steps: 1,
                mouse_move_step_delay_ms: 0,
                keystroke_delay_ms: 0,
                clear_before_type: false,
                simulate_mouse_movement: false,
            },
        ));
        let engine = Arc::new(DecisionEngine::new(
            strategies,
            waiter,
            executor.clone(),
            DecisionConfig {
                strategy_timeout_ms: 1_000,
                min_confidence: 0.5,
                sequential: false,
                max_retries: 0,
                retry_delay_ms: 1,
                wait_budget_ms: 200,
                strict_gating: false,
            },
        ));
        let conditional = Arc::new(ConditionalClickRunner::new(
            browser.clone(),
            engine_ocr,
            accessibility,
            executor,
        ));
        let telemetry = Arc::new(TelemetryLogger::new(
            Arc::new(TelemetryStore::in_memory().unwrap()),
            TelemetryConfig::default(),
        ));
        PlaybackController::new(
            browser,
            engine,
            conditional,
            CsvMapper::new(CsvConfig::default()),
            Some(telemetry),
        )
    }

    fn clickable_recording() -> Recording {
        let mut recording = Recording::new("r1", "Test", "https://example.com/app");
        let mut open = Step::new("s0", StepEvent::Open);
        open.url = Some("https://example.com/app".to_string());
        recording.steps.push(open);

        let mut click = Step::new("s1", StepEvent::Click);
        click.selector = Some("#go".to_string());
        click.bounding_rect = Some(BoundingRect::new(10.0, 10.0, 20.0, 20.0));
        recording.steps.push(click);
        recording
    }

    fn prime_click_target(browser: &FakeBrowser) {
        browser.add_node(5, "button");
        browser.set_box(5, BoundingRect::new(10.0, 10.0, 20.0, 20.0));
        browser.set_selector("#go", vec![5]);
        browser.set_hit(20.0, 20.0, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_executes_all_steps_once() {
        let browser = Arc::new(FakeBrowser::new());
        prime_click_target(&browser);
        let controller = controller(browser.clone());

        let result = controller
            .run(
                &TabHandle::new("tab-1"),
                &clickable_recording(),
                None,
                PlaybackOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.passed, 2);
        assert_eq!(result.failed, 0);
        assert_eq!(result.rows_played, 1);
        assert!(browser
            .events()
            .contains(&"navigate:https://example.com/app".to_string()));
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_rows_replay_from_loop_start() {
        let browser = Arc::new(FakeBrowser::new());
        prime_click_target(&browser);
        let mut recording = clickable_recording();
        recording.loop_start_index = 1;

        let csv = CsvData {
            headers: vec!["name".to_string()],
            rows: vec![vec!["a".to_string()], vec!["b".to_string()]],
        };

        let controller = controller(browser.clone());
        let result = controller
            .run(
                &TabHandle::new("tab-1"),
                &recording,
                Some(&csv),
                PlaybackOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.rows_played, 2);
        // Row 0 runs both steps, row 1 skips the open step
        assert_eq!(result.step_results.len(), 3);
        let navigations = browser
            .events()
            .iter()
            .filter(|e| e.starts_with("navigate:"))
            .count();
        assert_eq!(navigations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_substitution_reaches_typed_value() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(7, "input");
        browser.set_box(7, BoundingRect::new(10.0, 10.0, 100.0, 20.0));
        browser.set_selector("#email", vec![7]);
        browser.set_hit(60.0, 20.0, 7);

        let mut recording = Recording::new("r1", "Form", "https://example.com");
        let mut input = Step::new("s1", StepEvent::Input);
        input.selector = Some("#email".to_string());
        input.value = Some("{{email}}".to_string());
        recording.steps.push(input);

        let csv = CsvData {
            headers: vec!["email".to_string()],
            rows: vec![vec!["jane@x.io".to_string()]],
        };

        let controller = controller(browser.clone());
        let result = controller
            .run(
                &TabHandle::new("tab-1"),
                &recording,
                Some(&csv),
                PlaybackOptions::default(),
            )
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.step_results);
        let events = browser.events();
        // The substituted value was typed character by character
        assert!(events.contains(&"char:j mods=0".to_string()));
        assert!(events.contains(&"char:@ mods=0".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_error_aborts_run() {
        let browser = Arc::new(FakeBrowser::new());
        // No target: the click step has no chain entries that can act
        let mut recording = Recording::new("r1", "Broken", "https://example.com");
        let mut click = Step::new("s1", StepEvent::Click);
        click.selector = Some("#missing".to_string());
        recording.steps.push(click);
        let mut second = Step::new("s2", StepEvent::Open);
        second.url = Some("https://example.com/next".to_string());
        recording.steps.push(second);

        let controller = controller(browser.clone());
        let result = controller
            .run(
                &TabHandle::new("tab-1"),
                &recording,
                None,
                PlaybackOptions { stop_on_error: true },
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.step_results.len(), 1);
        assert!(!browser.events().iter().any(|e| e.starts_with("navigate:")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_step_delay_overrides_global() {
        let browser = Arc::new(FakeBrowser::new());
        prime_click_target(&browser);
        let mut recording = clickable_recording();
        recording.global_delay_ms = 10_000;
        recording.steps[0].delay_seconds = Some(1.0);
        recording.steps[1].delay_seconds = Some(2.0);

        let controller = controller(browser);
        let started = Instant::now();
        controller
            .run(
                &TabHandle::new("tab-1"),
                &recording,
                None,
                PlaybackOptions::default(),
            )
            .await
            .unwrap();

        // 1s + 2s of step delays, not 20s of global delays
        let elapsed = started.elapsed().as_millis();
        assert!(elapsed >= 3_000, "elapsed {}", elapsed);
        assert!(elapsed < 10_000, "elapsed {}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_emitted() {
        let browser = Arc::new(FakeBrowser::new());
        prime_click_target(&browser);
        let controller = controller(browser);
        let mut events = controller.take_events().unwrap();

        controller
            .run(
                &TabHandle::new("tab-1"),
                &clickable_recording(),
                None,
                PlaybackOptions::default(),
            )
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }

        assert!(matches!(kinds.first(), Some(PlaybackEvent::RunStarted { .. })));
        assert!(matches!(kinds.last(), Some(PlaybackEvent::RunFinished { .. })));
        assert!(kinds
            .iter()
            .any(|e| matches!(e, PlaybackEvent::StepFinished { success: true, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recording_rejected() {
        let browser = Arc::new(FakeBrowser::new());
        let controller = controller(browser);
        let recording = Recording::new("r1", "Empty", "https://example.com");

        let err = controller
            .run(
                &TabHandle::new("tab-1"),
                &recording,
                None,
                PlaybackOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(domain_of("https://shop.example.com/cart?x=1"), "shop.example.com");
        assert_eq!(domain_of("http://localhost:8080/app"), "localhost:8080");
        assert_eq!(domain_of("about:blank"), "about:blank");
    }

    #[test]
    fn test_synthesized_chain_prefers_selector() {
        let mut step = Step::new("s1", StepEvent::Click);
        step.selector = Some("#a".to_string());
        step.xpath = Some("/html/body/div".to_string());
        step.bounding_rect = Some(BoundingRect::new(0.0, 0.0, 10.0, 10.0));

        let chain = synthesize_chain(&step);
        assert_eq!(chain.primary_type, StrategyType::DomCss);
        assert_eq!(chain.strategies.len(), 3);
        assert!(chain
            .strategies
            .iter()
            .any(|s| s.strategy_type == StrategyType::Coordinates));
    }
}
