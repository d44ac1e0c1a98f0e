//! Vision strategy: OCR text matching over a viewport screenshot.

use crate::browser::types::{ScreenshotFormat, TabHandle};
use crate::error::{Error, Result};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::LocatorStrategy;

pub(crate) async fn evaluate(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    let target = strategy
        .metadata
        .target_text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::strategy("vision_ocr", "missing target text"))?;

    let screenshot = set
        .browser
        .capture_screenshot(tab, ScreenshotFormat::Png)
        .await?;
    let metrics = set.browser.get_layout_metrics(tab).await?;
    let lines = set
        .ocr
        .recognize(&tab.0, &screenshot.data, metrics.scale)
        .await?;

    let Some(found) = set.ocr.best_match(&lines, target, strategy.metadata.exact) else {
        return Ok(Evaluation::not_found());
    };

    let match_count = lines
        .iter()
        .filter(|line| {
            line.text
                .to_lowercase()
                .contains(&target.to_lowercase())
        })
        .count();

    // Resolve the node under the text so auto-waiting has a handle; a failed
    // hit-test still leaves a usable click point.
    let backend_node_id = set
        .browser
        .get_node_for_location(tab, found.click_point.x, found.click_point.y)
        .await
        .unwrap_or(None);

    let confidence = (found.line.confidence / 100.0) * 0.90;
    Ok(Evaluation::hit(
        backend_node_id,
        Some(found.click_point),
        confidence,
        match_count,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakeBrowser;
    use crate::browser::types::BackendNodeId;
    use crate::locate::testing::strategy_set;
    use crate::model::chain::{StrategyMetadata, StrategyType};
    use crate::model::geometry::BoundingRect;
    use crate::vision::ocr::fake::FakeOcrEngine;
    use crate::vision::OcrLine;
    use std::sync::Arc;

    fn vision_strategy(target: &str) -> LocatorStrategy {
        LocatorStrategy::new(StrategyType::VisionOcr, 0.70).with_metadata(StrategyMetadata {
            target_text: Some(target.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_match_returns_bbox_center() {
        let browser = Arc::new(FakeBrowser::new());
        browser.set_screenshot(vec![1, 2, 3]);
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![OcrLine::new(
            "Accept cookies",
            84.0,
            BoundingRect::new(100.0, 400.0, 120.0, 24.0),
        )]);
        let set = strategy_set(browser, engine);

        let evaluation = set
            .evaluate(&TabHandle::new("tab-1"), &vision_strategy("Accept"))
            .await;

        assert!(evaluation.found);
        let point = evaluation.click_point.unwrap();
        assert_eq!(point.x, 160.0);
        assert_eq!(point.y, 412.0);
        assert!((evaluation.confidence - 0.756).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_confidence_lines_ignored() {
        let browser = Arc::new(FakeBrowser::new());
        browser.set_screenshot(vec![1]);
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![OcrLine::new(
            "Accept",
            30.0,
            BoundingRect::new(0.0, 0.0, 50.0, 20.0),
        )]);
        let set = strategy_set(browser, engine);

        let evaluation = set
            .evaluate(&TabHandle::new("tab-1"), &vision_strategy("Accept"))
            .await;
        assert!(!evaluation.found);
    }

    #[tokio::test]
    async fn test_hit_test_resolves_node_handle() {
        let browser = Arc::new(FakeBrowser::new());
        browser.set_screenshot(vec![1]);
        browser.set_hit(160.0, 412.0, 55);
        let engine = Arc::new(FakeOcrEngine::new());
        engine.push_result(vec![OcrLine::new(
            "Accept",
            84.0,
            BoundingRect::new(100.0, 400.0, 120.0, 24.0),
        )]);
        let set = strategy_set(browser, engine);

        let evaluation = set
            .evaluate(&TabHandle::new("tab-1"), &vision_strategy("Accept"))
            .await;
        assert_eq!(evaluation.backend_node_id, Some(BackendNodeId(55)));
    }

    #[tokio::test]
    async fn test_ocr_failure_is_contained() {
        let browser = Arc::new(FakeBrowser::new());
        browser.fail_command("captureScreenshot", 10);
        let set = strategy_set(browser, Arc::new(FakeOcrEngine::new()));

        let evaluation = set
            .evaluate(&TabHandle::new("tab-1"), &vision_strategy("Accept"))
            .await;
        assert!(!evaluation.found);
        assert!(evaluation.error.is_some());
    }
}
