//! Conditional-click loop: repeatedly scan the page for target text and act
//! on every appearance until an inactivity window passes.
//!
//! The timeout measures quiet time since the last click (or since start when
//! nothing was ever clicked), not total runtime. Completing with zero
//! matches is still a successful outcome.

use crate::accessibility::AccessibilityService;
use crate::browser::types::{ScreenshotFormat, TabHandle};
use crate::browser::BrowserControl;
use crate::executor::{ActionExecutor, ActionKind, ActionRequest};
use crate::model::recording::{ConditionalConfig, ConditionalInteraction};
use crate::vision::OcrService;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionalOutcomeReason {
    /// The inactivity window elapsed; normal completion
    Timeout,
    /// External cancel signal
    Cancelled,
    /// An exception ended the loop
    Error,
    /// Reserved for finite known-match sets; not currently produced
    Completed,
}

/// Final tally of one conditional-click loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOutcome {
    pub success: bool,
    pub reason: ConditionalOutcomeReason,
    pub click_count: u64,
    pub elapsed_ms: u64,
    /// Distinct search terms that matched, sorted
    pub matches_found: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Runs conditional-click loops against a tab.
pub struct ConditionalClickRunner {
    browser: Arc<dyn BrowserControl>,
    ocr: Arc<OcrService>,
    accessibility: Arc<AccessibilityService>,
    executor: Arc<ActionExecutor>,
}

impl ConditionalClickRunner {
    pub fn new(
        browser: Arc<dyn BrowserControl>,
        ocr: Arc<OcrService>,
        accessibility: Arc<AccessibilityService>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            browser,
            ocr,
            accessibility,
            executor,
        }
    }

    /// Run one loop to completion.
    pub async fn run(
        &self,
        tab: &TabHandle,
        config: &ConditionalConfig,
        cancel: watch::Receiver<bool>,
    ) -> ConditionalOutcome {
        let started = Instant::now();
        let mut last_activity = started;
        let mut click_count = 0u64;
        let mut matches_found: BTreeSet<String> = BTreeSet::new();

        let poll = Duration::from_millis(config.poll_interval_ms);
        let inactivity_window = Duration::from_secs(config.timeout_seconds);

        loop {
            if *cancel.borrow() {
                return ConditionalOutcome {
                    success: false,
                    reason: ConditionalOutcomeReason::Cancelled,
                    click_count,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    matches_found: matches_found.into_iter().collect(),
                    error_message: None,
                };
            }

            if last_activity.elapsed() >= inactivity_window {
                return ConditionalOutcome {
                    success: true,
                    reason: ConditionalOutcomeReason::Timeout,
                    click_count,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    matches_found: matches_found.into_iter().collect(),
                    error_message: None,
                };
            }

            tokio::time::sleep(poll).await;

            // Fresh view of the page on every poll
            self.ocr.invalidate(&tab.0).await;
            self.accessibility.clear_cache(tab).await;

            match self.poll_once(tab, config).await {
                Ok(Some(term)) => {
                    debug!(term = %term, "conditional-click matched");
                    matches_found.insert(term);
                    click_count += 1;
                    // Each click re-opens the inactivity window
                    last_activity = Instant::now();
                }
                Ok(None) => {}
                Err(message) => {
                    return ConditionalOutcome {
                        success: false,
                        reason: ConditionalOutcomeReason::Error,
                        click_count,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        matches_found: matches_found.into_iter().collect(),
                        error_message: Some(message),
                    };
                }
            }
        }
    }

    /// One scan-and-interact cycle. Returns the matched term, if any.
    async fn poll_once(
        &self,
        tab: &TabHandle,
        config: &ConditionalConfig,
    ) -> std::result::Result<Option<String>, String> {
        let screenshot = self
            .browser
            .capture_screenshot(tab, ScreenshotFormat::Png)
            .await
            .map_err(|e| e.to_string())?;
        let metrics = self
            .browser
            .get_layout_metrics(tab)
            .await
            .map_err(|e| e.to_string())?;
        let lines = self
            .ocr
            .recognize(&tab.0, &screenshot.data, metrics.scale)
            .await
            .map_err(|e| e.to_string())?;

        let Some((term, found)) = self.ocr.find_any_text(&lines, &config.search_terms) else {
            return Ok(None);
        };

        let node = self
            .browser
            .get_node_for_location(tab, found.click_point.x, found.click_point.y)
            .await
            .unwrap_or(None);

        match config.interaction_type {
            ConditionalInteraction::Click => {
                let result = self
                    .executor
                    .execute(
                        tab,
                        &ActionRequest {
                            kind: ActionKind::Click,
                            node,
                            point: Some(found.click_point),
                        },
                    )
                    .await;
                if !result.success {
                    return Err(result
                        .error
                        .unwrap_or_else(|| "click dispatch failed".to_string()));
                }
            }
            ConditionalInteraction::Type => {
                let click = self
                    .executor
                    .execute(
                        tab,
                        &ActionRequest {
                            kind: ActionKind::Click,
                            node,
                            point: Some(found.click_point),
                        },
                    )
                    .await;
                if !click.success {
                    return Err(click
                        .error
                        .unwrap_or_else(|| "click dispatch failed".to_string()));
                }
                let Some(text) = config.type_text.as_deref() else {
                    return Err("type interaction without typeText".to_string());
                };
                let Some(node) = node else {
                    warn!("no node under matched text, skipping type");
                    return Ok(Some(term));
                };
                let typed = self
                    .executor
                    .execute(
                        tab,
                        &ActionRequest {
                            kind: ActionKind::Type {
                                text: text.to_string(),
                            },
                            node: Some(node),
                            point: Some(found.click_point),
                        },
                    )
                    .await;
                if !typed.success {
                    return Err(typed
                        .error
                        .unwrap_or_else(|| "type dispatch failed".to_string()));
                }
            }
            ConditionalInteraction::Scroll => {
                let result = self
                    .executor
                    .execute(
                        tab,
                        &ActionRequest {
                            kind: ActionKind::Scroll { delta_y: 240.0 },
                            node,
                            point: Some(found.click_point),
                        },
                    )
                    .await;
                if !result.success {
                    return Err(result
                        .error
                        .unwrap_or_else(|| "scroll dispatch failed".to_string()));
                }
            }
        }

        Ok(Some(term))
    }
}
