//! The abstract browser control channel.
//!
//! Any provider that can answer these primitives suffices; the engine never
//! assumes a particular debugging protocol. Command dispatch is serialized
//! per tab by the provider; this layer adds command-level retry for
//! transient failures.

use crate::browser::types::{
    AxNode, BackendNodeId, BoxModel, KeyEventParams, LayoutMetrics, MouseEventParams,
    NodeDescription, Screenshot, ScreenshotFormat, TabHandle,
};
use crate::config::CommandConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Browser-control primitives required by the engine.
#[async_trait]
pub trait BrowserControl: Send + Sync {
    /// Attach to a tab, opening a debugging session.
    async fn attach(&self, tab: &TabHandle) -> Result<()>;

    /// Detach from a tab, releasing the session.
    async fn detach(&self, tab: &TabHandle) -> Result<()>;

    /// Run a CSS selector query, returning the first match.
    async fn query_selector(&self, tab: &TabHandle, css: &str) -> Result<Option<BackendNodeId>>;

    /// Run a CSS selector query, returning every match.
    async fn query_selector_all(&self, tab: &TabHandle, css: &str) -> Result<Vec<BackendNodeId>>;

    /// Describe a node's tag, attributes and text.
    async fn describe_node(&self, tab: &TabHandle, node: BackendNodeId)
        -> Result<NodeDescription>;

    /// Fetch the node's box model; `None` when it has no layout box.
    async fn get_box_model(&self, tab: &TabHandle, node: BackendNodeId)
        -> Result<Option<BoxModel>>;

    /// Fetch computed style properties for a node.
    async fn get_computed_style(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
    ) -> Result<HashMap<String, String>>;

    /// Fetch the full accessibility tree for a tab.
    async fn get_accessibility_tree(&self, tab: &TabHandle) -> Result<AxNode>;

    /// Fetch the accessibility subtree rooted at a node.
    async fn get_partial_accessibility_tree(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
    ) -> Result<AxNode>;

    /// Hit-test viewport coordinates to the topmost node.
    async fn get_node_for_location(
        &self,
        tab: &TabHandle,
        x: f64,
        y: f64,
    ) -> Result<Option<BackendNodeId>>;

    /// Dispatch a low-level mouse event.
    async fn dispatch_mouse_event(&self, tab: &TabHandle, params: MouseEventParams) -> Result<()>;

    /// Dispatch a low-level key event.
    async fn dispatch_key_event(&self, tab: &TabHandle, params: KeyEventParams) -> Result<()>;

    /// Insert text at the current focus without key events.
    async fn insert_text(&self, tab: &TabHandle, text: &str) -> Result<()>;

    /// Focus a node.
    async fn focus(&self, tab: &TabHandle, node: BackendNodeId) -> Result<()>;

    /// Scroll a node into the viewport.
    async fn scroll_into_view(&self, tab: &TabHandle, node: BackendNodeId) -> Result<()>;

    /// Run a script function against a node, returning its JSON result.
    async fn evaluate_on_node(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
        function: &str,
    ) -> Result<serde_json::Value>;

    /// Navigate the tab to a URL.
    async fn navigate(&self, tab: &TabHandle, url: &str) -> Result<()>;

    /// Capture a viewport screenshot.
    async fn capture_screenshot(
        &self,
        tab: &TabHandle,
        format: ScreenshotFormat,
    ) -> Result<Screenshot>;

    /// Read visual viewport metrics.
    async fn get_layout_metrics(&self, tab: &TabHandle) -> Result<LayoutMetrics>;
}

/// Error fragments that mark a command failure as permanent.
const NON_RETRYABLE_FRAGMENTS: &[&str] = &["not attached", "No node with given id"];

/// Whether a provider error message indicates a non-retryable failure.
pub fn is_non_retryable_message(message: &str) -> bool {
    NON_RETRYABLE_FRAGMENTS
        .iter()
        .any(|fragment| message.contains(fragment))
}

/// Run a browser command with transient-failure retry.
///
/// Retries up to `config.max_attempts` total attempts with a fixed delay.
/// Errors classified non-retryable surface immediately.
pub async fn dispatch_with_retry<T, F, Fut>(
    config: &CommandConfig,
    command: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let permanent = match &err {
                    Error::BrowserCommand {
                        retryable, message, ..
                    } => !retryable || is_non_retryable_message(message),
                    Error::TabDetached(_) | Error::NodeNotFound(_) => true,
                    _ => false,
                };
                if permanent {
                    debug!(command, %err, "command failed permanently");
                    return Err(err);
                }
                if attempt < config.max_attempts {
                    warn!(command, attempt, %err, "command failed, retrying");
                    tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        Error::Internal(format!("command {} failed without an error", command))
    }))
}
