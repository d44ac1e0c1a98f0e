//! Scripted in-memory browser for unit tests.

use crate::browser::types::{
    AxNode, BackendNodeId, BoxModel, KeyEventKind, KeyEventParams, LayoutMetrics, MouseEventKind,
    MouseEventParams, NodeDescription, Screenshot, ScreenshotFormat, TabHandle,
};
use crate::browser::BrowserControl;
use crate::error::{Error, Result};
use crate::model::geometry::BoundingRect;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct FakeNode {
    description: NodeDescription,
    /// Successive box-model reads; the last entry repeats forever.
    boxes: VecDeque<Option<BoxModel>>,
    computed_style: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct FakeState {
    nodes: HashMap<u64, FakeNode>,
    selectors: HashMap<String, Vec<u64>>,
    ax_root: AxNode,
    hit_map: HashMap<(i64, i64), u64>,
    screenshot: Vec<u8>,
    metrics: Option<LayoutMetrics>,
    events: Vec<String>,
    /// Remaining scripted failures per command name.
    failures: HashMap<String, u32>,
    eval_results: HashMap<String, serde_json::Value>,
}

/// A deterministic `BrowserControl` backed by scripted state.
#[derive(Debug, Default)]
pub(crate) struct FakeBrowser {
    state: Mutex<FakeState>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, id: u64, tag: &str) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(
            id,
            FakeNode {
                description: NodeDescription {
                    backend_node_id: BackendNodeId(id),
                    tag: tag.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
    }

    pub fn set_selector(&self, css: &str, ids: Vec<u64>) {
        self.state
            .lock()
            .unwrap()
            .selectors
            .insert(css.to_string(), ids);
    }

    pub fn set_attr(&self, id: u64, name: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.description
                .attributes
                .insert(name.to_string(), value.to_string());
        }
    }

    pub fn set_text(&self, id: u64, text: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.description.text = text.to_string();
        }
    }

    pub fn set_attached(&self, id: u64, attached: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.description.attached = attached;
        }
    }

    pub fn set_box(&self, id: u64, rect: BoundingRect) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.boxes.clear();
            node.boxes.push_back(Some(BoxModel { content: rect }));
        }
    }

    /// Queue a sequence of box-model reads, for moving elements.
    pub fn push_box(&self, id: u64, rect: Option<BoundingRect>) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.boxes.push_back(rect.map(|content| BoxModel { content }));
        }
    }

    pub fn set_style(&self, id: u64, property: &str, value: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(&id) {
            node.computed_style
                .insert(property.to_string(), value.to_string());
        }
    }

    pub fn set_ax_tree(&self, root: AxNode) {
        self.state.lock().unwrap().ax_root = root;
    }

    pub fn set_hit(&self, x: f64, y: f64, id: u64) {
        self.state
            .lock()
            .unwrap()
            .hit_map
            .insert((x.round() as i64, y.round() as i64), id);
    }

    pub fn set_screenshot(&self, data: Vec<u8>) {
        self.state.lock().unwrap().screenshot = data;
    }

    pub fn set_metrics(&self, metrics: LayoutMetrics) {
        self.state.lock().unwrap().metrics = Some(metrics);
    }

    pub fn set_eval_result(&self, function: &str, value: serde_json::Value) {
        self.state
            .lock()
            .unwrap()
            .eval_results
            .insert(function.to_string(), value);
    }

    /// Make the next `times` invocations of `command` fail transiently.
    pub fn fail_command(&self, command: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(command.to_string(), times);
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn log(&self, entry: String) {
        self.state.lock().unwrap().events.push(entry);
    }

    fn maybe_fail(&self, command: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.failures.get_mut(command) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::browser_command(command, "scripted failure", true));
            }
        }
        Ok(())
    }

    fn current_box(&self, id: u64) -> Option<BoxModel> {
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(&id)?;
        if node.boxes.len() > 1 {
            node.boxes.pop_front().flatten()
        } else {
            node.boxes.front().cloned().flatten()
        }
    }
}

#[async_trait]
impl BrowserControl for FakeBrowser {
    async fn attach(&self, tab: &TabHandle) -> Result<()> {
        self.log(format!("attach:{}", tab));
        Ok(())
    }

    async fn detach(&self, tab: &TabHandle) -> Result<()> {
        self.log(format!("detach:{}", tab));
        Ok(())
    }

    async fn query_selector(&self, _tab: &TabHandle, css: &str) -> Result<Option<BackendNodeId>> {
        self.maybe_fail("querySelector")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .selectors
            .get(css)
            .and_then(|ids| ids.first())
            .map(|id| BackendNodeId(*id)))
    }

    async fn query_selector_all(&self, _tab: &TabHandle, css: &str) -> Result<Vec<BackendNodeId>> {
        self.maybe_fail("querySelectorAll")?;
        let state = self.state.lock().unwrap();
        Ok(state
            .selectors
            .get(css)
            .map(|ids| ids.iter().map(|id| BackendNodeId(*id)).collect())
            .unwrap_or_default())
    }

    async fn describe_node(
        &self,
        _tab: &TabHandle,
        node: BackendNodeId,
    ) -> Result<NodeDescription> {
        self.maybe_fail("describeNode")?;
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(&node.0)
            .map(|n| n.description.clone())
            .ok_or_else(|| Error::NodeNotFound(format!("No node with given id: {}", node)))
    }

    async fn get_box_model(
        &self,
        _tab: &TabHandle,
        node: BackendNodeId,
    ) -> Result<Option<BoxModel>> {
        self.maybe_fail("getBoxModel")?;
        Ok(self.current_box(node.0))
    }

    async fn get_computed_style(
        &self,
        _tab: &TabHandle,
        node: BackendNodeId,
    ) -> Result<HashMap<String, String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .get(&node.0)
            .map(|n| n.computed_style.clone())
            .unwrap_or_default())
    }

    async fn get_accessibility_tree(&self, _tab: &TabHandle) -> Result<AxNode> {
        self.maybe_fail("getFullAXTree")?;
        Ok(self.state.lock().unwrap().ax_root.clone())
    }

    async fn get_partial_accessibility_tree(
        &self,
        tab: &TabHandle,
        _node: BackendNodeId,
    ) -> Result<AxNode> {
        self.get_accessibility_tree(tab).await
    }

    async fn get_node_for_location(
        &self,
        _tab: &TabHandle,
        x: f64,
        y: f64,
    ) -> Result<Option<BackendNodeId>> {
        self.maybe_fail("getNodeForLocation")?;
        let state = self.state.lock().unwrap();
        if let Some(id) = state.hit_map.get(&(x.round() as i64, y.round() as i64)) {
            return Ok(Some(BackendNodeId(*id)));
        }
        drop(state);
        // Fall back to the first node whose current box contains the point
        let state = self.state.lock().unwrap();
        for (id, node) in &state.nodes {
            if let Some(Some(model)) = node.boxes.front() {
                if model.content.contains(&crate::model::geometry::Point::new(x, y)) {
                    return Ok(Some(BackendNodeId(*id)));
                }
            }
        }
        Ok(None)
    }

    async fn dispatch_mouse_event(&self, _tab: &TabHandle, params: MouseEventParams) -> Result<()> {
        self.maybe_fail("dispatchMouseEvent")?;
        let kind = match params.kind {
            MouseEventKind::MousePressed => "mousePressed",
            MouseEventKind::MouseReleased => "mouseReleased",
            MouseEventKind::MouseMoved => "mouseMoved",
            MouseEventKind::MouseWheel => "mouseWheel",
        };
        self.log(format!(
            "{}@({},{}) count={} dy={}",
            kind, params.point.x, params.point.y, params.click_count, params.delta_y
        ));
        Ok(())
    }

    async fn dispatch_key_event(&self, _tab: &TabHandle, params: KeyEventParams) -> Result<()> {
        self.maybe_fail("dispatchKeyEvent")?;
        let kind = match params.kind {
            KeyEventKind::KeyDown => "keyDown",
            KeyEventKind::KeyUp => "keyUp",
            KeyEventKind::Char => "char",
        };
        self.log(format!("{}:{} mods={}", kind, params.key, params.modifiers.0));
        Ok(())
    }

    async fn insert_text(&self, _tab: &TabHandle, text: &str) -> Result<()> {
        self.log(format!("insertText:{}", text));
        Ok(())
    }

    async fn focus(&self, _tab: &TabHandle, node: BackendNodeId) -> Result<()> {
        self.maybe_fail("focus")?;
        self.log(format!("focus:{}", node));
        Ok(())
    }

    async fn scroll_into_view(&self, _tab: &TabHandle, node: BackendNodeId) -> Result<()> {
        self.log(format!("scrollIntoView:{}", node));
        Ok(())
    }

    async fn evaluate_on_node(
        &self,
        _tab: &TabHandle,
        node: BackendNodeId,
        function: &str,
    ) -> Result<serde_json::Value> {
        self.log(format!("evaluate:{}:{}", node, function));
        let state = self.state.lock().unwrap();
        Ok(state
            .eval_results
            .get(function)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn navigate(&self, _tab: &TabHandle, url: &str) -> Result<()> {
        self.log(format!("navigate:{}", url));
        Ok(())
    }

    async fn capture_screenshot(
        &self,
        _tab: &TabHandle,
        format: ScreenshotFormat,
    ) -> Result<Screenshot> {
        self.maybe_fail("captureScreenshot")?;
        Ok(Screenshot {
            data: self.state.lock().unwrap().screenshot.clone(),
            format,
            captured_at: Utc::now(),
        })
    }

    async fn get_layout_metrics(&self, _tab: &TabHandle) -> Result<LayoutMetrics> {
        Ok(self.state.lock().unwrap().metrics.unwrap_or(LayoutMetrics {
            viewport_width: 1280.0,
            viewport_height: 720.0,
            scale: 1.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_selector_and_describe() {
        let browser = FakeBrowser::new();
        browser.add_node(5, "button");
        browser.set_text(5, "Submit");
        browser.set_selector("#submit", vec![5]);

        let tab = TabHandle::new("tab-1");
        let id = browser.query_selector(&tab, "#submit").await.unwrap();
        assert_eq!(id, Some(BackendNodeId(5)));

        let desc = browser.describe_node(&tab, BackendNodeId(5)).await.unwrap();
        assert_eq!(desc.tag, "button");
        assert_eq!(desc.text, "Submit");
    }

    #[tokio::test]
    async fn test_box_sequence_pops_until_last() {
        let browser = FakeBrowser::new();
        browser.add_node(1, "div");
        browser.push_box(1, Some(BoundingRect::new(0.0, 0.0, 10.0, 10.0)));
        browser.push_box(1, Some(BoundingRect::new(5.0, 0.0, 10.0, 10.0)));

        let tab = TabHandle::new("tab-1");
        let first = browser.get_box_model(&tab, BackendNodeId(1)).await.unwrap();
        assert_eq!(first.unwrap().content.x, 0.0);
        let second = browser.get_box_model(&tab, BackendNodeId(1)).await.unwrap();
        assert_eq!(second.unwrap().content.x, 5.0);
        // Last entry repeats
        let third = browser.get_box_model(&tab, BackendNodeId(1)).await.unwrap();
        assert_eq!(third.unwrap().content.x, 5.0);
    }

    #[tokio::test]
    async fn test_scripted_failure_consumed() {
        let browser = FakeBrowser::new();
        browser.set_selector("#x", vec![1]);
        browser.fail_command("querySelector", 1);

        let tab = TabHandle::new("tab-1");
        assert!(browser.query_selector(&tab, "#x").await.is_err());
        assert!(browser.query_selector(&tab, "#x").await.is_ok());
    }
}
