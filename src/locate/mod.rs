//! Playback-time locator strategies.
//!
//! Each variant maps a recorded `LocatorStrategy` to a concrete element on
//! the live page: `{found, node, click point, confidence, match count}`.
//! Dispatch is a match over the variant tag; strategy errors never escape as
//! panics, they become failed evaluations.

pub mod coordinates;
pub mod dom;
pub mod evidence;
pub mod power;
pub mod semantic;
pub mod vision;

use crate::accessibility::AccessibilityService;
use crate::browser::types::{BackendNodeId, TabHandle};
use crate::browser::BrowserControl;
use crate::model::chain::{LocatorStrategy, StrategyType};
use crate::model::geometry::Point;
use crate::vision::OcrService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Outcome of evaluating one strategy against a live tab.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<BackendNodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_point: Option<Point>,
    /// Evaluation confidence in [0,1]
    pub confidence: f64,
    /// How many page elements matched
    pub match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Evaluation {
    /// A miss without an error.
    pub fn not_found() -> Self {
        Self::default()
    }

    /// A miss caused by a strategy failure.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn hit(
        node: Option<BackendNodeId>,
        click_point: Option<Point>,
        confidence: f64,
        match_count: usize,
    ) -> Self {
        Self {
            found: true,
            backend_node_id: node,
            click_point,
            confidence: confidence.clamp(0.0, 1.0),
            match_count,
            error: None,
        }
    }
}

/// The seven evaluators plus their shared services.
pub struct StrategySet {
    pub(crate) browser: Arc<dyn BrowserControl>,
    pub(crate) accessibility: Arc<AccessibilityService>,
    pub(crate) ocr: Arc<OcrService>,
}

impl StrategySet {
    pub fn new(
        browser: Arc<dyn BrowserControl>,
        accessibility: Arc<AccessibilityService>,
        ocr: Arc<OcrService>,
    ) -> Self {
        Self {
            browser,
            accessibility,
            ocr,
        }
    }

    /// Evaluate one strategy. Errors are converted into failed evaluations;
    /// peers of a failing strategy are unaffected.
    pub async fn evaluate(&self, tab: &TabHandle, strategy: &LocatorStrategy) -> Evaluation {
        let result = match strategy.strategy_type {
            StrategyType::Semantic => semantic::evaluate(self, tab, strategy).await,
            StrategyType::Power => power::evaluate(self, tab, strategy).await,
            StrategyType::DomCss => dom::evaluate_css(self, tab, strategy).await,
            StrategyType::CssPath => dom::evaluate_path(self, tab, strategy).await,
            StrategyType::VisionOcr => vision::evaluate(self, tab, strategy).await,
            StrategyType::EvidenceScoring => evidence::evaluate(self, tab, strategy).await,
            StrategyType::Coordinates => coordinates::evaluate(strategy),
        };

        match result {
            Ok(evaluation) => evaluation,
            Err(err) => {
                debug!(strategy = %strategy.strategy_type, %err, "strategy evaluation failed");
                Evaluation::failed(err.to_string())
            }
        }
    }

    /// Resolve a click point for a node from its box model.
    pub(crate) async fn click_point_for(
        &self,
        tab: &TabHandle,
        node: BackendNodeId,
    ) -> Option<Point> {
        match self.browser.get_box_model(tab, node).await {
            Ok(Some(model)) => Some(model.center()),
            _ => None,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::model::chain::StrategyMetadata;
    use crate::vision::ocr::fake::FakeOcrEngine;

    #[tokio::test]
    async fn test_error_becomes_failed_evaluation() {
        let browser = Arc::new(FakeBrowser::new());
        browser.fail_command("querySelector", 10);
        let set = testing::strategy_set(browser, Arc::new(FakeOcrEngine::new()));

        let strategy = LocatorStrategy::new(StrategyType::DomCss, 0.75).with_selector("#x");
        let evaluation = set.evaluate(&TabHandle::new("tab-1"), &strategy).await;

        assert!(!evaluation.found);
        assert!(evaluation.error.is_some());
    }

    #[tokio::test]
    async fn test_missing_required_metadata_is_failure_not_panic() {
        let browser = Arc::new(FakeBrowser::new());
        let set = testing::strategy_set(browser, Arc::new(FakeOcrEngine::new()));

        // Semantic strategy without a role
        let strategy = LocatorStrategy::new(StrategyType::Semantic, 0.95)
            .with_metadata(StrategyMetadata::default());
        let evaluation = set.evaluate(&TabHandle::new("tab-1"), &strategy).await;

        assert!(!evaluation.found);
        assert!(evaluation.error.is_some());
    }
}
