//! DOM selector strategies: the recorded short CSS selector and the
//! computed long-form CSS path / XPath.

use crate::browser::types::TabHandle;
use crate::error::{Error, Result};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::LocatorStrategy;

const CONFIDENCE_DOM_CSS: f64 = 0.75;
const CONFIDENCE_CSS_PATH: f64 = 0.65;

pub(crate) async fn evaluate_css(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    run_selector(set, tab, strategy, CONFIDENCE_DOM_CSS).await
}

pub(crate) async fn evaluate_path(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    run_selector(set, tab, strategy, CONFIDENCE_CSS_PATH).await
}

async fn run_selector(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
    confidence: f64,
) -> Result<Evaluation> {
    let selector = strategy
        .selector
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::strategy(strategy.strategy_type.name(), "missing selector"))?;

    let matches = set.browser.query_selector_all(tab, selector).await?;
    let Some(&node) = matches.first() else {
        return Ok(Evaluation::not_found());
    };

    let click_point = set.click_point_for(tab, node).await;
    Ok(Evaluation::hit(
        Some(node),
        click_point,
        confidence,
        matches.len(),
    ))
}
