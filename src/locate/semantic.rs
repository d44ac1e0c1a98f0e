//! Semantic strategy: accessibility-tree role + name matching.

use crate::accessibility::{AxQuery, AxStateFilter};
use crate::browser::types::TabHandle;
use crate::error::{Error, Result};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::LocatorStrategy;

/// Confidence when a name pattern was specified and matched.
const CONFIDENCE_WITH_NAME: f64 = 0.95;
/// Confidence for a role-only match.
const CONFIDENCE_ROLE_ONLY: f64 = 0.85;

pub(crate) async fn evaluate(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    let role = strategy
        .metadata
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| Error::strategy("semantic", "missing role"))?;

    let mut query = AxQuery::role(role);
    if let Some(name) = strategy.metadata.name.as_deref().filter(|n| !n.is_empty()) {
        query = query.with_name(name);
        if strategy.metadata.exact {
            query = query.exact();
        }
    }
    query.state = state_filter_from_metadata(strategy);

    let matches = set.accessibility.find_all(tab, &query).await?;
    let match_count = matches.len();

    for node in &matches {
        let Some(backend_id) = node.backend_node_id else {
            continue;
        };
        let click_point = set.click_point_for(tab, backend_id).await;
        let confidence = if query.name.is_some() {
            CONFIDENCE_WITH_NAME
        } else {
            CONFIDENCE_ROLE_ONLY
        };
        return Ok(Evaluation::hit(
            Some(backend_id),
            click_point,
            confidence,
            match_count,
        ));
    }

    Ok(Evaluation::not_found())
}

fn state_filter_from_metadata(strategy: &LocatorStrategy) -> AxStateFilter {
    let extra = &strategy.metadata.extra;
    AxStateFilter {
        expanded: extra.get("expanded").and_then(|v| v.as_bool()),
        pressed: extra.get("pressed").and_then(|v| v.as_bool()),
        checked: extra.get("checked").and_then(|v| v.as_str()).and_then(|s| {
            match s {
                "true" => Some(crate::browser::types::AxCheckedState::True),
                "false" => Some(crate::browser::types::AxCheckedState::False),
                "mixed" => Some(crate::browser::types::AxCheckedState::Mixed),
                _ => None,
            }
        }),
        disabled: extra.get("disabled").and_then(|v| v.as_bool()),
        selected: extra.get("selected").and_then(|v| v.as_bool()),
        level: extra
            .get("level")
            .and_then(|v| v.as_u64())
            .map(|l| l as u32),
    }
}
