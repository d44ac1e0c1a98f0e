//! Confidence scoring for locator candidates.
//!
//! `score = base_weight(variant) x selector_quality x context_factor`, then
//! additive bonuses and penalties, clamped to [0,1]. Every adjustment is
//! recorded so callers can explain a score.

use crate::chain::context::{selector_has_dynamic_token, ElementContext};
use crate::model::chain::{LocatorStrategy, StrategyType};
use serde::{Deserialize, Serialize};

/// Words too generic for text matching to be trusted on their own.
const GENERIC_WORDS: &[&str] = &[
    "ok", "submit", "next", "cancel", "close", "yes", "no", "continue", "back", "save", "delete",
    "edit", "add", "go", "search",
];

/// Roles that indicate an interactive control.
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "checkbox", "radio", "textbox", "combobox", "menuitem",
];

/// Structural analysis of a selector string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorAnalysis {
    /// 1.0 when no dynamic pattern matches, else 0.7
    pub stability: f64,
    /// Weighted combinator/pseudo/attribute/class count, clamped to 10
    pub complexity: f64,
    /// Selector uses nth-child/nth-of-type/first-child/last-child
    pub has_positional: bool,
    /// Estimated probability the selector matches exactly one element
    pub uniqueness: f64,
}

impl SelectorAnalysis {
    pub fn analyze(selector: &str) -> Self {
        let stability = if selector_has_dynamic_token(selector) {
            0.7
        } else {
            1.0
        };

        let mut segments = 0u32;
        let mut child_combinators = 0u32;
        for token in selector.split_whitespace() {
            if token == ">" {
                child_combinators += 1;
            } else {
                segments += 1;
            }
        }
        let descendant_combinators = segments.saturating_sub(1 + child_combinators);

        let pseudo_colons = selector.matches(':').count() as f64;
        let attribute_brackets = selector.matches('[').count() as f64;
        let class_dots = selector.matches('.').count() as f64;

        let complexity = (descendant_combinators as f64
            + child_combinators as f64
            + pseudo_colons
            + attribute_brackets
            + class_dots * 0.5)
            .min(10.0);

        let has_positional = ["nth-child", "nth-of-type", "first-child", "last-child"]
            .iter()
            .any(|p| selector.contains(p));

        let trimmed = selector.trim();
        let is_pure_id = trimmed.starts_with('#')
            && segments == 1
            && !trimmed[1..].contains(['.', '[', ':', ' '])
            && stability == 1.0;
        let is_test_id_attr = trimmed.starts_with("[data-testid")
            || trimmed.starts_with("[data-test-id")
            || trimmed.starts_with("[data-test=");
        let is_bare_tag = segments == 1
            && trimmed.chars().all(|c| c.is_ascii_alphanumeric())
            && !trimmed.is_empty();

        let mut uniqueness: f64 = if is_pure_id || is_test_id_attr {
            0.95
        } else if is_bare_tag {
            0.20
        } else {
            0.50
        };
        if segments >= 3 {
            uniqueness += 0.10;
        }
        let uniqueness = uniqueness.clamp(0.0, 1.0);

        Self {
            stability,
            complexity,
            has_positional,
            uniqueness,
        }
    }
}

/// How an adjustment moved the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustmentKind {
    Bonus,
    Penalty,
    Factor,
}

/// One recorded score adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub label: String,
    pub kind: AdjustmentKind,
    pub amount: f64,
}

impl ScoreAdjustment {
    fn bonus(label: &str, amount: f64) -> Self {
        Self {
            label: label.to_string(),
            kind: AdjustmentKind::Bonus,
            amount,
        }
    }

    fn penalty(label: &str, amount: f64) -> Self {
        Self {
            label: label.to_string(),
            kind: AdjustmentKind::Penalty,
            amount,
        }
    }

    fn factor(label: &str, amount: f64) -> Self {
        Self {
            label: label.to_string(),
            kind: AdjustmentKind::Factor,
            amount,
        }
    }
}

/// A candidate with its final confidence and scoring trace.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub strategy: LocatorStrategy,
    /// Confidence the generator assigned before scoring
    pub raw_confidence: f64,
    pub adjustments: Vec<ScoreAdjustment>,
    pub analysis: Option<SelectorAnalysis>,
}

impl ScoredCandidate {
    pub fn has_penalties(&self) -> bool {
        self.adjustments
            .iter()
            .any(|a| a.kind == AdjustmentKind::Penalty)
    }
}

/// Scores candidates against their element context.
#[derive(Debug, Clone, Default)]
pub struct StrategyScorer;

impl StrategyScorer {
    pub fn new() -> Self {
        Self
    }

    /// Compute the final confidence for one candidate.
    pub fn score(&self, candidate: LocatorStrategy, context: &ElementContext) -> ScoredCandidate {
        match candidate.strategy_type {
            StrategyType::VisionOcr => self.score_vision(candidate),
            StrategyType::Coordinates => self.score_coordinates(candidate),
            _ => self.score_selector_based(candidate, context),
        }
    }

    fn score_vision(&self, mut candidate: LocatorStrategy) -> ScoredCandidate {
        let raw = candidate.confidence;
        let mut adjustments = Vec::new();

        // OCR confidence in [0,100] maps linearly into [0,0.90]; a synthetic
        // candidate without a measured confidence keeps its assigned value.
        let mut score = match candidate
            .metadata
            .extra
            .get("ocr_confidence")
            .and_then(|v| v.as_f64())
        {
            Some(ocr) => {
                let mapped = (ocr.clamp(0.0, 100.0) / 100.0) * 0.90;
                adjustments.push(ScoreAdjustment::factor("ocr_confidence", mapped));
                mapped
            }
            None => raw,
        };

        if let Some(target) = &candidate.metadata.target_text {
            let len = target.trim().len();
            if (10..=30).contains(&len) {
                score += 0.05;
                adjustments.push(ScoreAdjustment::bonus("distinctive_text_length", 0.05));
            }
        }

        candidate.confidence = score.clamp(0.0, 1.0);
        ScoredCandidate {
            strategy: candidate,
            raw_confidence: raw,
            adjustments,
            analysis: None,
        }
    }

    fn score_coordinates(&self, mut candidate: LocatorStrategy) -> ScoredCandidate {
        let raw = candidate.confidence;
        let mut adjustments = Vec::new();
        let mut score = StrategyType::Coordinates.base_weight();

        if let Some(area) = candidate
            .metadata
            .extra
            .get("target_area")
            .and_then(|v| v.as_f64())
        {
            if area >= 10_000.0 {
                score += 0.05;
                adjustments.push(ScoreAdjustment::bonus("large_target", 0.05));
            } else if area < 500.0 {
                score *= 0.80;
                adjustments.push(ScoreAdjustment::factor("small_target", 0.80));
            }
        }

        candidate.confidence = score.clamp(0.0, 1.0);
        ScoredCandidate {
            strategy: candidate,
            raw_confidence: raw,
            adjustments,
            analysis: None,
        }
    }

    fn score_selector_based(
        &self,
        mut candidate: LocatorStrategy,
        context: &ElementContext,
    ) -> ScoredCandidate {
        let raw = candidate.confidence;
        let variant = candidate.strategy_type;
        let mut adjustments = Vec::new();

        let analysis = candidate.selector.as_deref().map(SelectorAnalysis::analyze);

        let selector_quality = match &analysis {
            Some(a) => a.stability * (0.8 + 0.2 * a.uniqueness),
            None => 1.0,
        };

        let context_factor = if context.in_shadow_dom {
            adjustments.push(ScoreAdjustment::factor("shadow_dom", 0.95));
            0.95
        } else {
            1.0
        };

        let mut score = variant.base_weight() * selector_quality * context_factor;

        // Per-variant multiplicative rules
        match variant {
            StrategyType::Semantic => {
                let has_name = candidate.metadata.name.is_some();
                if !has_name {
                    score *= 0.85;
                    adjustments.push(ScoreAdjustment::factor("role_without_name", 0.85));
                }
                if let Some(role) = &candidate.metadata.role {
                    if INTERACTIVE_ROLES.contains(&role.to_lowercase().as_str()) {
                        score += 0.02;
                        adjustments.push(ScoreAdjustment::bonus("interactive_role", 0.02));
                    }
                }
            }
            StrategyType::Power => {
                let matched_text = candidate
                    .metadata
                    .text
                    .as_deref()
                    .or(candidate.metadata.label.as_deref())
                    .or(candidate.metadata.placeholder.as_deref());
                if let Some(text) = matched_text {
                    let trimmed = text.trim();
                    if GENERIC_WORDS.contains(&trimmed.to_lowercase().as_str()) {
                        score *= 0.85;
                        adjustments.push(ScoreAdjustment::factor("generic_word", 0.85));
                    }
                    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
                        score *= 0.70;
                        adjustments.push(ScoreAdjustment::factor("numeric_text", 0.70));
                    }
                    if trimmed.len() < 3 {
                        score *= 0.80;
                        adjustments.push(ScoreAdjustment::factor("short_text", 0.80));
                    }
                }
            }
            StrategyType::EvidenceScoring => {
                match candidate
                    .metadata
                    .extra
                    .get("trail_pattern")
                    .and_then(|v| v.as_str())
                {
                    Some("direct") => {
                        score += 0.05;
                        adjustments.push(ScoreAdjustment::bonus("direct_trail", 0.05));
                    }
                    Some("hesitant") => {
                        score *= 0.95;
                        adjustments.push(ScoreAdjustment::factor("hesitant_trail", 0.95));
                    }
                    Some("corrective") => {
                        score *= 0.90;
                        adjustments.push(ScoreAdjustment::factor("corrective_trail", 0.90));
                    }
                    _ => {}
                }
                let attribute_count = candidate
                    .metadata
                    .extra
                    .get("attribute_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                if attribute_count >= 3 {
                    score += 0.05;
                    adjustments.push(ScoreAdjustment::bonus("rich_attributes", 0.05));
                }
            }
            _ => {}
        }

        // Context bonuses
        if context.has_test_id {
            score += 0.10;
            adjustments.push(ScoreAdjustment::bonus("test_id", 0.10));
        }
        if context.has_stable_id {
            score += 0.05;
            adjustments.push(ScoreAdjustment::bonus("stable_id", 0.05));
        }
        if context.has_accessible_name
            && matches!(variant, StrategyType::Semantic | StrategyType::Power)
        {
            score += 0.10;
            adjustments.push(ScoreAdjustment::bonus("accessible_name", 0.10));
        }

        // Penalties
        if let Some(a) = &analysis {
            if a.stability < 1.0 {
                score -= 0.30;
                adjustments.push(ScoreAdjustment::penalty("dynamic_pattern", 0.30));
            }
            if a.has_positional {
                score -= 0.15;
                adjustments.push(ScoreAdjustment::penalty("positional_selector", 0.15));
            }
            if a.complexity > 5.0 {
                score -= 0.10;
                adjustments.push(ScoreAdjustment::penalty("complex_selector", 0.10));
            }
        }

        candidate.confidence = score.clamp(0.0, 1.0);
        ScoredCandidate {
            strategy: candidate,
            raw_confidence: raw,
            adjustments,
            analysis,
        }
    }
}
