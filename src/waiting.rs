//! Auto-waiting: the actionability gate run before every action.
//!
//! Polls a node until it is attached, visible, enabled and stable (plus
//! optional editable / receives-pointer-events / in-viewport checks) or the
//! timeout elapses. Position stability uses a bounded per-node history of
//! recent samples; any movement resets the stability clock.

use crate::browser::types::{BackendNodeId, TabHandle};
use crate::browser::BrowserControl;
use crate::config::AutoWaitConfig;
use crate::error::Error;
use crate::model::geometry::Point;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Why the gate gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitFailureReason {
    Timeout,
    Detached,
    Hidden,
    Disabled,
    Unstable,
    NotEditable,
    Covered,
    OutsideViewport,
    NodeNotFound,
}

/// Which conditions the caller requires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaitRequirements {
    pub visible: bool,
    pub enabled: bool,
    pub stable: bool,
    pub editable: bool,
    pub receives_pointer_events: bool,
    pub in_viewport: bool,
}

impl Default for WaitRequirements {
    fn default() -> Self {
        Self {
            visible: true,
            enabled: true,
            stable: true,
            editable: false,
            receives_pointer_events: true,
            in_viewport: false,
        }
    }
}

impl WaitRequirements {
    /// Requirements for typing targets.
    pub fn editable() -> Self {
        Self {
            editable: true,
            ..Self::default()
        }
    }
}

/// Snapshot of the probes at one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionabilityState {
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub stable: bool,
    pub editable: bool,
    pub receives_pointer_events: bool,
    pub in_viewport: bool,
    /// Top-left of the bounding box at this poll
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
}

/// Result of one gate invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitOutcome {
    pub success: bool,
    pub state: ActionabilityState,
    pub waited_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<WaitFailureReason>,
}

/// Bounded per-node position history for stability detection.
#[derive(Debug, Default)]
pub struct StabilityTracker {
    histories: HashMap<u64, NodeHistory>,
}

#[derive(Debug)]
struct NodeHistory {
    /// Position held since `held_since`; movement resets it
    position: Point,
    held_since: Instant,
    /// Recent samples, newest last
    samples: Vec<(Instant, Point)>,
}

const MAX_SAMPLES: usize = 10;

impl StabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; returns how long the current position has held.
    fn record(&mut self, node: BackendNodeId, position: Point, now: Instant) -> Duration {
        let entry = self.histories.entry(node.0).or_insert_with(|| NodeHistory {
            position,
            held_since: now,
            samples: Vec::new(),
        });

        if (entry.position.x - position.x).abs() > f64::EPSILON
            || (entry.position.y - position.y).abs() > f64::EPSILON
        {
            entry.position = position;
            entry.held_since = now;
        }

        entry.samples.push((now, position));
        if entry.samples.len() > MAX_SAMPLES {
            entry.samples.remove(0);
        }

        now - entry.held_since
    }

    /// Forget a node, e.g. when it detaches.
    fn clear(&mut self, node: BackendNodeId) {
        self.histories.remove(&node.0);
    }
}

/// The actionability gate.
pub struct AutoWaiter {
    browser: Arc<dyn BrowserControl>,
    config: AutoWaitConfig,
    tracker: Mutex<StabilityTracker>,
}

impl AutoWaiter {
    pub fn new(browser: Arc<dyn BrowserControl>, config: AutoWaitConfig) -> Self {
        Self {
            browser,
            config,
            tracker: Mutex::new(StabilityTracker::new()),
        }
    }

    /// Poll until every required condition holds or the timeout elapses.
    ///
    /// `timeout_ms` overrides the configured timeout when set.
    pub async fn wait_for_actionable(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
        requirements: WaitRequirements,
        timeout_ms: Option<u64>,
    ) -> WaitOutcome {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.config.timeout_ms));
        let poll = Duration::from_millis(self.config.polling_interval_ms);
        let started = Instant::now();

        loop {
            let (state, reason) = self.probe(tab, node, &requirements).await;

            if reason.is_none() {
                return WaitOutcome {
                    success: true,
                    state,
                    waited_ms: started.elapsed().as_millis() as u64,
                    failure_reason: None,
                };
            }

            if started.elapsed() + poll > timeout {
                debug!(node = %node, ?reason, "actionability wait failed");
                return WaitOutcome {
                    success: false,
                    state,
                    waited_ms: started.elapsed().as_millis() as u64,
                    failure_reason: reason.or(Some(WaitFailureReason::Timeout)),
                };
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// One round of probes; returns the snapshot and the first failing
    /// condition.
    async fn probe(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
        requirements: &WaitRequirements,
    ) -> (ActionabilityState, Option<WaitFailureReason>) {
        let mut state = ActionabilityState::default();

        // Attached
        let description = match self.browser.describe_node(tab, node).await {
            Ok(description) => description,
            Err(Error::NodeNotFound(_)) => {
                self.tracker.lock().await.clear(node);
                return (state, Some(WaitFailureReason::NodeNotFound));
            }
            Err(_) => return (state, Some(WaitFailureReason::NodeNotFound)),
        };
        if !description.attached {
            self.tracker.lock().await.clear(node);
            return (state, Some(WaitFailureReason::Detached));
        }
        state.attached = true;

        // Visible: non-empty box and not styled away
        let model = self.browser.get_box_model(tab, node).await.ok().flatten();
        let rect = match model {
            Some(model) if model.content.is_visible_size() => model.content,
            _ => {
                return (
                    state,
                    requirements.visible.then_some(WaitFailureReason::Hidden),
                )
            }
        };
        state.position = Some(Point::new(rect.x, rect.y));

        let style = self
            .browser
            .get_computed_style(tab, node)
            .await
            .unwrap_or_default();
        let styled_away = style.get("display").map(String::as_str) == Some("none")
            || style.get("visibility").map(String::as_str) == Some("hidden")
            || style
                .get("opacity")
                .and_then(|o| o.parse::<f64>().ok())
                .is_some_and(|o| o <= 0.0);
        state.visible = !styled_away;
        if requirements.visible && !state.visible {
            return (state, Some(WaitFailureReason::Hidden));
        }

        // Enabled
        let aria_disabled = description.attribute("aria-disabled") == Some("true");
        state.enabled = !description.has_attribute("disabled") && !aria_disabled;
        if requirements.enabled && !state.enabled {
            return (state, Some(WaitFailureReason::Disabled));
        }

        // In viewport
        if requirements.in_viewport {
            let metrics = self.browser.get_layout_metrics(tab).await.ok();
            state.in_viewport = metrics.is_some_and(|m| {
                rect.within_viewport(m.viewport_width, m.viewport_height)
            });
            if !state.in_viewport {
                return (state, Some(WaitFailureReason::OutsideViewport));
            }
        }

        // Editable
        if requirements.editable {
            let editable_control = matches!(
                description.tag.as_str(),
                "input" | "textarea" | "select"
            ) && !description.has_attribute("readonly")
                && state.enabled;
            let content_editable = matches!(
                description.attribute("contenteditable"),
                Some("") | Some("true")
            );
            state.editable = editable_control || content_editable;
            if !state.editable {
                return (state, Some(WaitFailureReason::NotEditable));
            }
        }

        // Receives pointer events: topmost node at the center is the target
        if requirements.receives_pointer_events {
            let center = rect.center();
            let top = self
                .browser
                .get_node_for_location(tab, center.x, center.y)
                .await
                .unwrap_or(None);
            state.receives_pointer_events = top == Some(node);
            if !state.receives_pointer_events {
                return (state, Some(WaitFailureReason::Covered));
            }
        }

        // Stable: position unchanged for the threshold
        if requirements.stable {
            let held = self
                .tracker
                .lock()
                .await
                .record(node, Point::new(rect.x, rect.y), Instant::now());
            state.stable = held >= Duration::from_millis(self.config.stability_threshold_ms);
            if !state.stable {
                return (state, Some(WaitFailureReason::Unstable));
            }
        }

        (state, None)
    }

    /// Scroll the node into the viewport when it is not already there.
    pub async fn scroll_into_view_if_needed(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
    ) -> crate::error::Result<()> {
        let metrics = self.browser.get_layout_metrics(tab).await?;
        if let Some(model) = self.browser.get_box_model(tab, node).await? {
            if model
                .content
                .within_viewport(metrics.viewport_width, metrics.viewport_height)
            {
                return Ok(());
            }
        }
        self.browser.scroll_into_view(tab, node).await
    }
}
