//! Wire-level types for the browser control channel.

use crate::model::geometry::{BoundingRect, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque handle to an attached tab session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabHandle(pub String);

impl TabHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TabHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier for a DOM node within one attached session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendNodeId(pub u64);

impl std::fmt::Display for BackendNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of a DOM node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub backend_node_id: BackendNodeId,
    /// Lowercase tag name
    pub tag: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Trimmed text content, empty when none
    #[serde(default)]
    pub text: String,
    /// Whether the node is still attached to the document
    #[serde(default = "default_true")]
    pub attached: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NodeDescription {
    fn default() -> Self {
        Self {
            backend_node_id: BackendNodeId(0),
            tag: String::new(),
            attributes: HashMap::new(),
            text: String::new(),
            attached: true,
        }
    }
}

impl NodeDescription {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }
}

/// Box model for a node: the content box in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxModel {
    pub content: BoundingRect,
}

impl BoxModel {
    pub fn center(&self) -> Point {
        self.content.center()
    }
}

/// Mouse button for input dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    None,
}

/// Kind of mouse event to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MouseEventKind {
    MousePressed,
    MouseReleased,
    MouseMoved,
    MouseWheel,
}

/// Keyboard modifier bitmask: alt=1, ctrl=2, meta=4, shift=8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers(pub u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const ALT: Modifiers = Modifiers(1);
    pub const CTRL: Modifiers = Modifiers(2);
    pub const META: Modifiers = Modifiers(4);
    pub const SHIFT: Modifiers = Modifiers(8);

    pub fn union(self, other: Modifiers) -> Modifiers {
        Modifiers(self.0 | other.0)
    }

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Parameters for a dispatched mouse event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MouseEventParams {
    pub kind: MouseEventKind,
    pub point: Point,
    pub button: MouseButton,
    #[serde(default)]
    pub click_count: u32,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Wheel deltas, only meaningful for `MouseWheel`
    #[serde(default)]
    pub delta_x: f64,
    #[serde(default)]
    pub delta_y: f64,
}

impl MouseEventParams {
    pub fn pressed(point: Point, button: MouseButton, click_count: u32) -> Self {
        Self {
            kind: MouseEventKind::MousePressed,
            point,
            button,
            click_count,
            modifiers: Modifiers::NONE,
            delta_x: 0.0,
            delta_y: 0.0,
        }
    }

    pub fn released(point: Point, button: MouseButton, click_count: u32) -> Self {
        Self {
            kind: MouseEventKind::MouseReleased,
            point,
            button,
            click_count,
            modifiers: Modifiers::NONE,
            delta_x: 0.0,
            delta_y: 0.0,
        }
    }

    pub fn moved(point: Point) -> Self {
        Self {
            kind: MouseEventKind::MouseMoved,
            point,
            button: MouseButton::None,
            click_count: 0,
            modifiers: Modifiers::NONE,
            delta_x: 0.0,
            delta_y: 0.0,
        }
    }

    pub fn wheel(point: Point, delta_x: f64, delta_y: f64) -> Self {
        Self {
            kind: MouseEventKind::MouseWheel,
            point,
            button: MouseButton::None,
            click_count: 0,
            modifiers: Modifiers::NONE,
            delta_x,
            delta_y,
        }
    }
}

/// Kind of key event to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyEventKind {
    KeyDown,
    KeyUp,
    Char,
}

/// Parameters for a dispatched key event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEventParams {
    pub kind: KeyEventKind,
    /// Logical key, e.g. `Enter`, `a`
    pub key: String,
    /// Physical code name, e.g. `Enter`, `KeyA`
    pub code: String,
    /// Inserted text for `Char` events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub modifiers: Modifiers,
}

/// Screenshot encoding requested from the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Png,
    Jpeg,
}

/// Captured viewport screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    pub data: Vec<u8>,
    pub format: ScreenshotFormat,
    pub captured_at: DateTime<Utc>,
}

/// Layout metrics of the visual viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutMetrics {
    pub viewport_width: f64,
    pub viewport_height: f64,
    /// Device pixel ratio / page scale
    pub scale: f64,
}

/// Tri-state checked value on accessibility nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxCheckedState {
    True,
    False,
    Mixed,
}

/// One node of the accessibility tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AxNode {
    /// Identifier within the fetched tree
    pub ax_node_id: String,
    /// Role, e.g. `button`; empty for generic containers
    #[serde(default)]
    pub role: String,
    /// Computed accessible name
    #[serde(default)]
    pub name: String,
    /// Node is pruned from assistive output
    #[serde(default)]
    pub ignored: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<BackendNodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<AxCheckedState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    /// Heading level when role is `heading`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default)]
    pub children: Vec<AxNode>,
}

impl AxNode {
    /// Depth-first walk over the subtree including `self`.
    pub fn walk(&self, visit: &mut impl FnMut(&AxNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Total node count in this subtree.
    pub fn size(&self) -> usize {
        let mut count = 0;
        self.walk(&mut |_| count += 1);
        count
    }
}
