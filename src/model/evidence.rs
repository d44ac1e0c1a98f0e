//! Evidence bundle types captured for each recorded action.
//!
//! The recorder gathers several independent views of the target element:
//! - DOM capture: attributes, accessibility role/name, computed paths
//! - Vision capture: OCR text with confidence and bounding box
//! - Mouse capture: the pointer trail leading to the action
//! - Network capture: requests observed around the action

use crate::model::geometry::{BoundingRect, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// DOM-side view of the target element at record time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomCapture {
    /// Lowercase tag name, e.g. `button`
    pub tag: String,
    /// `id` attribute if present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Class list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// Remaining attributes by name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    /// Trimmed visible text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Accessible name computed from the accessibility tree
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessible_name: Option<String>,
    /// Accessibility role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// `placeholder` attribute for inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Associated `<label>` text for form elements
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// `data-testid` or equivalent test hook
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    /// Computed unique CSS path from the document root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    /// Computed XPath
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    /// Viewport-relative bounding rect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_rect: Option<BoundingRect>,
    /// Shadow-DOM host chain selectors, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shadow_path: Vec<String>,
}

impl DomCapture {
    /// Whether the element is a form control that accepts user input.
    pub fn is_form_interactive(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
            || matches!(
                self.role.as_deref(),
                Some("textbox") | Some("checkbox") | Some("radio") | Some("combobox")
                    | Some("listbox") | Some("spinbutton") | Some("slider")
            )
    }

    /// Whether the element lives inside a shadow root.
    pub fn in_shadow_dom(&self) -> bool {
        !self.shadow_path.is_empty()
    }
}

/// Vision-side view: OCR result for the element region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionCapture {
    /// Text recognized over the element
    pub ocr_text: String,
    /// OCR engine confidence in [0,100]
    pub ocr_confidence: f64,
    /// Bounding box of the recognized text
    pub bbox: BoundingRect,
    /// Opaque handle to the screenshot the OCR ran on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_ref: Option<String>,
}

/// Shape of the pointer trail leading into the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailPattern {
    /// Straight approach to the target
    Direct,
    /// Slowed or wandering approach
    Hesitant,
    /// Overshot then corrected
    Corrective,
}

/// Mouse-side view of the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouseCapture {
    /// Sampled pointer positions, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<Point>,
    /// Final pointer position at the moment of the action
    pub endpoint: Point,
    /// Classified trail shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<TrailPattern>,
}

/// Network request observed near the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCapture {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// The complete evidence bundle for one recorded action.
///
/// Transient: consumed by the fallback chain generator and discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceBundle {
    pub dom: DomCapture,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionCapture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mouse: Option<MouseCapture>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<NetworkCapture>,
}

impl EvidenceBundle {
    /// Validate invariants: bounding rect inside viewport, OCR confidence range.
    pub fn validate(&self, viewport_width: f64, viewport_height: f64) -> Vec<String> {
        let mut problems = Vec::new();

        if let Some(rect) = &self.dom.bounding_rect {
            if !rect.within_viewport(viewport_width, viewport_height) {
                problems.push(format!(
                    "bounding rect {:?} extends outside the {}x{} viewport",
                    rect, viewport_width, viewport_height
                ));
            }
        }

        if let Some(vision) = &self.vision {
            if !(0.0..=100.0).contains(&vision.ocr_confidence) {
                problems.push(format!(
                    "OCR confidence {} outside [0,100]",
                    vision.ocr_confidence
                ));
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_interactive_by_tag_and_role() {
        let input = DomCapture {
            tag: "input".to_string(),
            ..Default::default()
        };
        assert!(input.is_form_interactive());

        let combo = DomCapture {
            tag: "div".to_string(),
            role: Some("combobox".to_string()),
            ..Default::default()
        };
        assert!(combo.is_form_interactive());

        let div = DomCapture {
            tag: "div".to_string(),
            ..Default::default()
        };
        assert!(!div.is_form_interactive());
    }

    #[test]
    fn test_validate_flags_out_of_range_confidence() {
        let bundle = EvidenceBundle {
            vision: Some(VisionCapture {
                ocr_text: "Submit".to_string(),
                ocr_confidence: 150.0,
                bbox: BoundingRect::new(0.0, 0.0, 10.0, 10.0),
                screenshot_ref: None,
            }),
            ..Default::default()
        };
        let problems = bundle.validate(1280.0, 720.0);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("OCR confidence"));
    }

    #[test]
    fn test_validate_flags_offscreen_rect() {
        let bundle = EvidenceBundle {
            dom: DomCapture {
                tag: "button".to_string(),
                bounding_rect: Some(BoundingRect::new(2000.0, 10.0, 50.0, 20.0)),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(bundle.validate(1280.0, 720.0).len(), 1);
    }
}
