//! Fallback chains and locator strategies.
//!
//! A `FallbackChain` is the ordered list of location techniques recorded for
//! a step. At playback every entry is evaluated and the best-scoring match
//! wins; the coordinate entry is the guaranteed last resort.

use crate::model::geometry::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The seven locator techniques.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Accessibility-tree role + name match
    Semantic,
    /// Composite text/label/placeholder/test-id match
    Power,
    /// Recorded short CSS selector
    DomCss,
    /// Computed long-form CSS path or XPath
    CssPath,
    /// OCR text match on a screenshot
    VisionOcr,
    /// Hit-test at the recorded endpoint plus captured evidence
    EvidenceScoring,
    /// Raw recorded coordinates
    Coordinates,
}

impl StrategyType {
    /// Fixed base weight used to compare confidences across variants.
    pub fn base_weight(&self) -> f64 {
        match self {
            Self::Semantic => 0.95,
            Self::Power => 0.90,
            Self::DomCss => 0.85,
            Self::EvidenceScoring => 0.80,
            Self::CssPath => 0.75,
            Self::VisionOcr => 0.70,
            Self::Coordinates => 0.60,
        }
    }

    /// Diversity category used by the chain builder.
    pub fn category(&self) -> StrategyCategory {
        match self {
            Self::Semantic | Self::Power => StrategyCategory::Semantic,
            Self::DomCss | Self::CssPath => StrategyCategory::Dom,
            Self::VisionOcr => StrategyCategory::Vision,
            Self::EvidenceScoring => StrategyCategory::Evidence,
            Self::Coordinates => StrategyCategory::Coordinates,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Power => "power",
            Self::DomCss => "dom_css",
            Self::CssPath => "css_path",
            Self::VisionOcr => "vision_ocr",
            Self::EvidenceScoring => "evidence_scoring",
            Self::Coordinates => "coordinates",
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Diversity grouping of strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyCategory {
    Semantic,
    Dom,
    Vision,
    Evidence,
    Coordinates,
}

/// Variant-specific locator inputs carried by a strategy.
///
/// Keys a variant does not use stay `None`; anything else the recorder
/// captured lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetadata {
    /// Accessibility role, e.g. `button`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Accessible name to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Visible text for text-based matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Form label text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Placeholder attribute value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Test hook id (`data-testid` etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    /// Text the vision strategy searches for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_text: Option<String>,
    /// Recorded pointer endpoint for evidence/coordinate strategies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Point>,
    /// Whether name/text matching requires equality rather than substring
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exact: bool,
    /// Anything else the recorder attached
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One locator technique with its recorded inputs and confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorStrategy {
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    /// Selector string for CSS/XPath-backed variants
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Record-time confidence in [0,1]
    pub confidence: f64,
    #[serde(default)]
    pub metadata: StrategyMetadata,
}

impl LocatorStrategy {
    pub fn new(strategy_type: StrategyType, confidence: f64) -> Self {
        Self {
            strategy_type,
            selector: None,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: StrategyMetadata::default(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_metadata(mut self, metadata: StrategyMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Comparable cross-variant score.
    pub fn weighted_confidence(&self) -> f64 {
        self.strategy_type.base_weight() * self.confidence
    }

    /// Check variant-required metadata is present.
    pub fn has_required_metadata(&self) -> bool {
        match self.strategy_type {
            StrategyType::Semantic => self.metadata.role.is_some(),
            StrategyType::Power => {
                self.metadata.text.is_some()
                    || self.metadata.label.is_some()
                    || self.metadata.placeholder.is_some()
                    || self.metadata.test_id.is_some()
            }
            StrategyType::DomCss | StrategyType::CssPath => self.selector.is_some(),
            StrategyType::VisionOcr => self.metadata.target_text.is_some(),
            StrategyType::EvidenceScoring | StrategyType::Coordinates => {
                self.metadata.endpoint.is_some()
            }
        }
    }
}

/// Why the chain builder excluded a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    DuplicateSelector,
    SimilarSelector,
    LowConfidence,
    MaxStrategiesReached,
    TypeAlreadyCovered,
    InvalidCandidate,
}

/// The ordered strategy list recorded for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackChain {
    pub strategies: Vec<LocatorStrategy>,
    /// The variant the recorder considered primary
    pub primary_type: StrategyType,
    /// When the chain was generated
    pub recorded_at: DateTime<Utc>,
}

impl FallbackChain {
    /// Minimum confidence at least one strategy must reach for validity.
    pub const MIN_RELIABLE_CONFIDENCE: f64 = 0.7;

    /// Hard cap on strategies per chain.
    pub const MAX_STRATEGIES: usize = 7;

    pub fn new(strategies: Vec<LocatorStrategy>, primary_type: StrategyType) -> Self {
        Self {
            strategies,
            primary_type,
            recorded_at: Utc::now(),
        }
    }

    /// Validity contract: at least one strategy, one reliable strategy, and a
    /// coordinate fallback.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.strategies.is_empty() {
            problems.push("chain has no strategies".to_string());
        }

        if !self
            .strategies
            .iter()
            .any(|s| s.confidence >= Self::MIN_RELIABLE_CONFIDENCE)
        {
            problems.push(format!(
                "no strategy with confidence >= {}",
                Self::MIN_RELIABLE_CONFIDENCE
            ));
        }

        if !self
            .strategies
            .iter()
            .any(|s| s.strategy_type == StrategyType::Coordinates)
        {
            problems.push("coordinate fallback missing".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if let Some(selector) = &strategy.selector {
                if !seen.insert(selector.clone()) {
                    problems.push(format!("duplicate selector: {}", selector));
                }
            }
        }

        problems
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}
