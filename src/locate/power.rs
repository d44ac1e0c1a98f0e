//! Power strategy: composite text / label / placeholder / test-id match.
//!
//! Tries its recorded inputs in a fixed order and returns the first
//! non-empty match: accessible-name text, form-control label, then a single
//! CSS attribute query for placeholder or test hook.

use crate::accessibility::AxQuery;
use crate::browser::types::TabHandle;
use crate::error::{Error, Result};
use crate::locate::{Evaluation, StrategySet};
use crate::model::chain::LocatorStrategy;

const CONFIDENCE_TEXT_EXACT: f64 = 0.90;
const CONFIDENCE_TEXT_SUBSTRING: f64 = 0.80;
const CONFIDENCE_LABEL: f64 = 0.85;
const CONFIDENCE_ATTRIBUTE: f64 = 0.85;

/// Roles a label lookup is restricted to.
const FORM_ROLES: &[&str] = &[
    "textbox",
    "checkbox",
    "radio",
    "combobox",
    "listbox",
    "spinbutton",
    "slider",
];

pub(crate) async fn evaluate(
    set: &StrategySet,
    tab: &TabHandle,
    strategy: &LocatorStrategy,
) -> Result<Evaluation> {
    if let Some(text) = strategy.metadata.text.as_deref().filter(|t| !t.is_empty()) {
        let evaluation = match_by_text(set, tab, text).await?;
        if evaluation.found {
            return Ok(evaluation);
        }
    }

    if let Some(label) = strategy.metadata.label.as_deref().filter(|l| !l.is_empty()) {
        let evaluation = match_by_label(set, tab, label).await?;
        if evaluation.found {
            return Ok(evaluation);
        }
    }

    if let Some(placeholder) = strategy
        .metadata
        .placeholder
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        let selector = format!(r#"[placeholder="{}"]"#, placeholder);
        let evaluation = match_by_attribute(set, tab, &selector).await?;
        if evaluation.found {
            return Ok(evaluation);
        }
    }

    if let Some(test_id) = strategy
        .metadata
        .test_id
        .as_deref()
        .filter(|t| !t.is_empty())
    {
        let selector = format!(r#"[data-testid="{}"]"#, test_id);
        let evaluation = match_by_attribute(set, tab, &selector).await?;
        if evaluation.found {
            return Ok(evaluation);
        }
    }

    // Alt and title arrive through the open metadata bag
    for attribute in ["alt", "title"] {
        if let Some(value) = strategy
            .metadata
            .extra
            .get(attribute)
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
        {
            let selector = format!(r#"[{}="{}"]"#, attribute, value);
            let evaluation = match_by_attribute(set, tab, &selector).await?;
            if evaluation.found {
                return Ok(evaluation);
            }
        }
    }

    if strategy.metadata.text.is_none()
        && strategy.metadata.label.is_none()
        && strategy.metadata.placeholder.is_none()
        && strategy.metadata.test_id.is_none()
        && !strategy.metadata.extra.contains_key("alt")
        && !strategy.metadata.extra.contains_key("title")
    {
        return Err(Error::strategy("power", "no text, label, placeholder or test id"));
    }

    Ok(Evaluation::not_found())
}

/// Accessible-name match over the whole tree: exact beats substring.
async fn match_by_text(set: &StrategySet, tab: &TabHandle, text: &str) -> Result<Evaluation> {
    let root = set.accessibility.tree(tab).await?;
    let target = text.to_lowercase();

    let mut exact: Option<crate::browser::types::AxNode> = None;
    let mut substring: Option<crate::browser::types::AxNode> = None;
    let mut match_count = 0usize;

    root.walk(&mut |node| {
        if node.ignored || node.backend_node_id.is_none() {
            return;
        }
        let name = node.name.to_lowercase();
        if name.trim() == target.trim() {
            match_count += 1;
            if exact.is_none() {
                exact = Some(node.clone());
            }
        } else if name.contains(&target) {
            match_count += 1;
            if substring.is_none() {
                substring = Some(node.clone());
            }
        }
    });

    let (node, confidence) = match (exact, substring) {
        (Some(node), _) => (node, CONFIDENCE_TEXT_EXACT),
        (None, Some(node)) => (node, CONFIDENCE_TEXT_SUBSTRING),
        (None, None) => return Ok(Evaluation::not_found()),
    };

    let backend_id = node.backend_node_id;
    let click_point = match backend_id {
        Some(id) => set.click_point_for(tab, id).await,
        None => None,
    };
    Ok(Evaluation::hit(backend_id, click_point, confidence, match_count))
}

/// Label match restricted to form-control roles.
async fn match_by_label(set: &StrategySet, tab: &TabHandle, label: &str) -> Result<Evaluation> {
    for role in FORM_ROLES {
        let query = AxQuery::role(*role).with_name(label);
        let matches = set.accessibility.find_all(tab, &query).await?;
        for node in &matches {
            if let Some(backend_id) = node.backend_node_id {
                let click_point = set.click_point_for(tab, backend_id).await;
                return Ok(Evaluation::hit(
                    Some(backend_id),
                    click_point,
                    CONFIDENCE_LABEL,
                    matches.len(),
                ));
            }
        }
    }
    Ok(Evaluation::not_found())
}

/// Single CSS attribute query.
async fn match_by_attribute(
    set: &StrategySet,
    tab: &TabHandle,
    selector: &str,
) -> Result<Evaluation> {
    let matches = set.browser.query_selector_all(tab, selector).await?;
    let Some(&node) = matches.first() else {
        return Ok(Evaluation::not_found());
    };
    let click_point = set.click_point_for(tab, node).await;
    Ok(Evaluation::hit(
        Some(node),
        click_point,
        CONFIDENCE_ATTRIBUTE,
        matches.len(),
    ))
}
