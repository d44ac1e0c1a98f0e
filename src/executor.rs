//! Action executor: low-level input dispatch.
//!
//! Assumes the target already passed the actionability gate. The executor
//! never retries; the decision engine owns retry policy.

use crate::browser::types::{
    BackendNodeId, KeyEventKind, KeyEventParams, Modifiers, MouseButton, MouseEventParams,
    TabHandle,
};
use crate::browser::BrowserControl;
use crate::config::ExecutorConfig;
use crate::error::{Error, Result};
use crate::model::geometry::Point;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// What to perform on the located element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    Type { text: String },
    Select { value: String },
    Hover,
    Scroll { delta_y: f64 },
    KeyDown { key: String, modifiers: Modifiers },
}

/// One executable action with its resolved target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    /// Node handle when a strategy resolved one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<BackendNodeId>,
    /// Click point when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
}

/// Executor outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dispatches input events over the browser control channel.
pub struct ActionExecutor {
    browser: Arc<dyn BrowserControl>,
    config: ExecutorConfig,
    /// Last known cursor position, for motion simulation
    cursor: Mutex<Point>,
}

impl ActionExecutor {
    pub fn new(browser: Arc<dyn BrowserControl>, config: ExecutorConfig) -> Self {
        Self {
            browser,
            config,
            cursor: Mutex::new(Point::new(0.0, 0.0)),
        }
    }

    /// Execute one action, reporting success and elapsed time.
    pub async fn execute(&self, tab: &TabHandle, request: &ActionRequest) -> ExecutionResult {
        let started = Instant::now();
        let outcome = self.run(tab, request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => ExecutionResult {
                success: true,
                duration_ms,
                error: None,
            },
            Err(err) => {
                debug!(%err, "action execution failed");
                ExecutionResult {
                    success: false,
                    duration_ms,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn run(&self, tab: &TabHandle, request: &ActionRequest) -> Result<()> {
        match &request.kind {
            ActionKind::Click => {
                let point = self.require_point(request)?;
                self.click(tab, point, MouseButton::Left, 1).await
            }
            ActionKind::DoubleClick => {
                let point = self.require_point(request)?;
                self.click(tab, point, MouseButton::Left, 1).await?;
                self.click_without_motion(tab, point, MouseButton::Left, 2)
                    .await
            }
            ActionKind::RightClick => {
                let point = self.require_point(request)?;
                self.click(tab, point, MouseButton::Right, 1).await
            }
            ActionKind::Type { text } => {
                let node = self.require_node(request)?;
                self.type_text(tab, node, text).await
            }
            ActionKind::Select { value } => {
                let node = self.require_node(request)?;
                self.select_option(tab, node, value).await
            }
            ActionKind::Hover => {
                let point = self.require_point(request)?;
                self.move_cursor(tab, point).await
            }
            ActionKind::Scroll { delta_y } => {
                let point = request.point.unwrap_or(*self.cursor.lock().await);
                self.browser
                    .dispatch_mouse_event(tab, MouseEventParams::wheel(point, 0.0, *delta_y))
                    .await
            }
            ActionKind::KeyDown { key, modifiers } => self.key_press(tab, key, *modifiers).await,
        }
    }

    fn require_point(&self, request: &ActionRequest) -> Result<Point> {
        request
            .point
            .ok_or_else(|| Error::ActionExecution("action requires a click point".to_string()))
    }

    fn require_node(&self, request: &ActionRequest) -> Result<BackendNodeId> {
        request
            .node
            .ok_or_else(|| Error::ActionExecution("action requires a node handle".to_string()))
    }

    async fn click(
        &self,
        tab: &TabHandle,
        point: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<()> {
        if self.config.simulate_mouse_movement {
            self.move_cursor(tab, point).await?;
        }
        self.click_without_motion(tab, point, button, click_count)
            .await
    }

    async fn click_without_motion(
        &self,
        tab: &TabHandle,
        point: Point,
        button: MouseButton,
        click_count: u32,
    ) -> Result<()> {
        self.browser
            .dispatch_mouse_event(tab, MouseEventParams::pressed(point, button, click_count))
            .await?;
        self.browser
            .dispatch_mouse_event(tab, MouseEventParams::released(point, button, click_count))
            .await?;
        *self.cursor.lock().await = point;
        Ok(())
    }

    /// Interpolated motion from the last cursor position to the target.
    async fn move_cursor(&self, tab: &TabHandle, target: Point) -> Result<()> {
        let from = *self.cursor.lock().await;
        let steps = self.config.mouse_move_steps.max(1);

        for step in 1..=steps {
            let t = step as f64 / steps as f64;
            let point = Point::new(
                from.x + (target.x - from.x) * t,
                from.y + (target.y - from.y) * t,
            );
            self.browser
                .dispatch_mouse_event(tab, MouseEventParams::moved(point))
                .await?;
            if self.config.mouse_move_step_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.mouse_move_step_delay_ms))
                    .await;
            }
        }

        *self.cursor.lock().await = target;
        Ok(())
    }

    async fn type_text(&self, tab: &TabHandle, node: BackendNodeId, text: &str) -> Result<()> {
        self.browser.focus(tab, node).await?;

        if self.config.clear_before_type {
            self.key_press(tab, "a", Modifiers::CTRL).await?;
            self.key_press(tab, "Backspace", Modifiers::NONE).await?;
        }

        for ch in text.chars() {
            let key = ch.to_string();
            let code = code_for_key(&key);
            self.browser
                .dispatch_key_event(
                    tab,
                    KeyEventParams {
                        kind: KeyEventKind::KeyDown,
                        key: key.clone(),
                        code: code.clone(),
                        text: None,
                        modifiers: Modifiers::NONE,
                    },
                )
                .await?;
            self.browser
                .dispatch_key_event(
                    tab,
                    KeyEventParams {
                        kind: KeyEventKind::Char,
                        key: key.clone(),
                        code: code.clone(),
                        text: Some(key.clone()),
                        modifiers: Modifiers::NONE,
                    },
                )
                .await?;
            self.browser
                .dispatch_key_event(
                    tab,
                    KeyEventParams {
                        kind: KeyEventKind::KeyUp,
                        key,
                        code,
                        text: None,
                        modifiers: Modifiers::NONE,
                    },
                )
                .await?;
            if self.config.keystroke_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.keystroke_delay_ms)).await;
            }
        }

        Ok(())
    }

    async fn select_option(&self, tab: &TabHandle, node: BackendNodeId, value: &str) -> Result<()> {
        self.browser.focus(tab, node).await?;
        let function = format!(
            "function() {{ this.value = {}; this.dispatchEvent(new Event('change', {{ bubbles: true }})); }}",
            serde_json::to_string(value)?
        );
        self.browser.evaluate_on_node(tab, node, &function).await?;
        Ok(())
    }

    async fn key_press(&self, tab: &TabHandle, key: &str, modifiers: Modifiers) -> Result<()> {
        let code = code_for_key(key);
        self.browser
            .dispatch_key_event(
                tab,
                KeyEventParams {
                    kind: KeyEventKind::KeyDown,
                    key: key.to_string(),
                    code: code.clone(),
                    text: None,
                    modifiers,
                },
            )
            .await?;
        self.browser
            .dispatch_key_event(
                tab,
                KeyEventParams {
                    kind: KeyEventKind::KeyUp,
                    key: key.to_string(),
                    code,
                    text: None,
                    modifiers,
                },
            )
            .await
    }
}

/// Translate a logical key to its physical code name.
pub fn code_for_key(key: &str) -> String {
    let mut chars = key.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return format!("Key{}", c.to_ascii_uppercase());
        }
        if c.is_ascii_digit() {
            return format!("Digit{}", c);
        }
        if c == ' ' {
            return "Space".to_string();
        }
    }
    // Named keys (Enter, Tab, Escape, Backspace, ArrowDown, ...) are their
    // own code
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            mouse_move_steps: 2,
            mouse_move_step_delay_ms: 0,
            keystroke_delay_ms: 0,
            clear_before_type: true,
            simulate_mouse_movement: true,
        }
    }

    fn executor(browser: Arc<FakeBrowser>) -> ActionExecutor {
        ActionExecutor::new(browser, fast_config())
    }

    #[test]
    fn test_code_translation() {
        assert_eq!(code_for_key("a"), "KeyA");
        assert_eq!(code_for_key("Z"), "KeyZ");
        assert_eq!(code_for_key("5"), "Digit5");
        assert_eq!(code_for_key(" "), "Space");
        assert_eq!(code_for_key("Enter"), "Enter");
        assert_eq!(code_for_key("ArrowDown"), "ArrowDown");
    }

    #[tokio::test]
    async fn test_click_moves_then_presses_and_releases() {
        let browser = Arc::new(FakeBrowser::new());
        let executor = executor(browser.clone());

        let result = executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::Click,
                    node: None,
                    point: Some(Point::new(100.0, 50.0)),
                },
            )
            .await;

        assert!(result.success);
        let events = browser.events();
        assert!(events.iter().any(|e| e.starts_with("mouseMoved")));
        assert!(events.contains(&"mousePressed@(100,50) count=1 dy=0".to_string()));
        assert!(events.contains(&"mouseReleased@(100,50) count=1 dy=0".to_string()));
        // Motion precedes the press
        let moved = events.iter().position(|e| e.starts_with("mouseMoved")).unwrap();
        let pressed = events.iter().position(|e| e.starts_with("mousePressed")).unwrap();
        assert!(moved < pressed);
    }

    #[tokio::test]
    async fn test_double_click_increments_click_count() {
        let browser = Arc::new(FakeBrowser::new());
        let executor = executor(browser.clone());

        executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::DoubleClick,
                    node: None,
                    point: Some(Point::new(10.0, 10.0)),
                },
            )
            .await;

        let events = browser.events();
        assert!(events.contains(&"mousePressed@(10,10) count=1 dy=0".to_string()));
        assert!(events.contains(&"mousePressed@(10,10) count=2 dy=0".to_string()));
    }

    #[tokio::test]
    async fn test_type_clears_then_types_each_char() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(3, "input");
        let executor = executor(browser.clone());

        let result = executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::Type {
                        text: "hi".to_string(),
                    },
                    node: Some(BackendNodeId(3)),
                    point: None,
                },
            )
            .await;

        assert!(result.success);
        let events = browser.events();
        assert_eq!(events[0], "focus:3");
        // Select-all with ctrl, then backspace
        assert_eq!(events[1], "keyDown:a mods=2");
        assert_eq!(events[2], "keyUp:a mods=2");
        assert_eq!(events[3], "keyDown:Backspace mods=0");
        assert_eq!(events[4], "keyUp:Backspace mods=0");
        // Per-char keyDown, char, keyUp
        assert_eq!(events[5], "keyDown:h mods=0");
        assert_eq!(events[6], "char:h mods=0");
        assert_eq!(events[7], "keyUp:h mods=0");
        assert_eq!(events[8], "keyDown:i mods=0");
    }

    #[tokio::test]
    async fn test_select_sets_value_and_fires_change() {
        let browser = Arc::new(FakeBrowser::new());
        browser.add_node(4, "select");
        let executor = executor(browser.clone());

        let result = executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::Select {
                        value: "US".to_string(),
                    },
                    node: Some(BackendNodeId(4)),
                    point: None,
                },
            )
            .await;

        assert!(result.success);
        let events = browser.events();
        assert_eq!(events[0], "focus:4");
        assert!(events[1].contains("this.value = \"US\""));
        assert!(events[1].contains("change"));
    }

    #[tokio::test]
    async fn test_scroll_dispatches_wheel() {
        let browser = Arc::new(FakeBrowser::new());
        let executor = executor(browser.clone());

        executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::Scroll { delta_y: -240.0 },
                    node: None,
                    point: Some(Point::new(400.0, 300.0)),
                },
            )
            .await;

        assert!(browser
            .events()
            .contains(&"mouseWheel@(400,300) count=0 dy=-240".to_string()));
    }

    #[tokio::test]
    async fn test_keydown_with_modifiers() {
        let browser = Arc::new(FakeBrowser::new());
        let executor = executor(browser.clone());

        executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::KeyDown {
                        key: "Enter".to_string(),
                        modifiers: Modifiers::SHIFT,
                    },
                    node: None,
                    point: None,
                },
            )
            .await;

        let events = browser.events();
        assert_eq!(events[0], "keyDown:Enter mods=8");
        assert_eq!(events[1], "keyUp:Enter mods=8");
    }

    #[tokio::test]
    async fn test_missing_point_is_failure_not_panic() {
        let browser = Arc::new(FakeBrowser::new());
        let executor = executor(browser);

        let result = executor
            .execute(
                &TabHandle::new("tab-1"),
                &ActionRequest {
                    kind: ActionKind::Click,
                    node: None,
                    point: None,
                },
            )
            .await;

        assert!(!result.success);
        assert!(result.error.unwrap().contains("click point"));
    }
}
