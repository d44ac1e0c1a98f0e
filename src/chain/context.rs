//! Element context analysis and dynamic-value detection.
//!
//! Record-time classification of the target element: which locator inputs it
//! offers and whether its identifiers look framework-generated. An id is
//! "stable" iff no dynamic pattern matches it.

use crate::model::evidence::DomCapture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// Framework-generated identifier patterns, case-insensitive where noted.
static EMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ember\d+").expect("invalid regex"));

static REACT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^react-|:r[a-z0-9]{2,}:)").expect("invalid regex"));

static ANGULAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^ng-|ngcontent)").expect("invalid regex"));

static VUE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^v-|data-v-[a-f0-9]+)").expect("invalid regex"));

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("invalid regex")
});

static LONG_HEX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[0-9a-f]{16,}").expect("invalid regex"));

static TIMESTAMP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{10,13}").expect("invalid regex"));

static CSS_MODULES_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__[A-Za-z0-9_-]{5,}$").expect("invalid regex"));

static SHORT_SUFFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_][a-z0-9]{4,8}$").expect("invalid regex"));

/// Whether a value looks framework-generated or otherwise unstable.
pub fn is_dynamic_value(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if EMBER_PATTERN.is_match(value)
        || REACT_PATTERN.is_match(value)
        || ANGULAR_PATTERN.is_match(value)
        || VUE_PATTERN.is_match(value)
        || UUID_PATTERN.is_match(value)
        || LONG_HEX_PATTERN.is_match(value)
        || TIMESTAMP_PATTERN.is_match(value)
        || CSS_MODULES_PATTERN.is_match(value)
    {
        return true;
    }
    // A short trailing suffix only counts as random when it mixes in digits;
    // plain words like "login-submit" must not trip this.
    if let Some(matched) = SHORT_SUFFIX_PATTERN.find(value) {
        let suffix = &value[matched.start() + 1..];
        if suffix.chars().any(|c| c.is_ascii_digit()) {
            return true;
        }
    }
    false
}

/// Whether a selector string references any dynamic-looking token.
pub fn selector_has_dynamic_token(selector: &str) -> bool {
    is_dynamic_value(selector)
}

/// Record-time classification of the target element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementContext {
    /// Element has an id that matches no dynamic pattern
    pub has_stable_id: bool,
    /// Element has an id at all
    pub has_id: bool,
    pub has_test_id: bool,
    pub has_accessible_name: bool,
    pub is_form_interactive: bool,
    pub in_shadow_dom: bool,
    /// Length of the element's visible text
    pub text_length: usize,
}

impl ElementContext {
    /// Classify an element from its DOM capture.
    pub fn analyze(dom: &DomCapture) -> Self {
        let has_id = dom.id.as_deref().is_some_and(|id| !id.is_empty());
        let has_stable_id = dom
            .id
            .as_deref()
            .is_some_and(|id| !id.is_empty() && !is_dynamic_value(id));

        Self {
            has_stable_id,
            has_id,
            has_test_id: dom.test_id.as_deref().is_some_and(|t| !t.is_empty()),
            has_accessible_name: dom
                .accessible_name
                .as_deref()
                .is_some_and(|n| !n.trim().is_empty()),
            is_form_interactive: dom.is_form_interactive(),
            in_shadow_dom: dom.in_shadow_dom(),
            text_length: dom.text.as_deref().map(|t| t.trim().len()).unwrap_or(0),
        }
    }
}
