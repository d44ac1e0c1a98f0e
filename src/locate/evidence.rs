//! Evidence-scoring strategy: hit-test the recorded endpoint.

use crate::browser::types::TabHandle;
use crate::error::{Error, Result};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::LocatorStrategy;

/// Score when the recorded endpoint still resolves to a node.
const CONFIDENCE_ENDPOINT_HIT: f64 = 0.80;

pub(crate) async fn evaluate(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    let endpoint = strategy
        .metadata
        .endpoint
        .ok_or_else(|| Error::strategy("evidence_scoring", "missing endpoint"))?;

    let Some(node) = set
        .browser
        .get_node_for_location(tab, endpoint.x, endpoint.y)
        .await?
    else {
        return Ok(Evaluation::not_found());
    };

    // Prefer the element's own center over the raw endpoint when layout is known
    let click_point = set
        .click_point_for(tab, node)
        .await
        .unwrap_or(endpoint);

    Ok(Evaluation::hit(
        Some(node),
        Some(click_point),
        CONFIDENCE_ENDPOINT_HIT,
        1,
    ))
}
