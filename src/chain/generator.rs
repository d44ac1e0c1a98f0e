//! Fallback chain generation from recorded evidence.
//!
//! Turns one evidence bundle into candidates across five families
//! (structural DOM, semantic, vision, evidence-scoring, coordinates), scores
//! them, and hands them to the builder. A generation failure degrades to a
//! coordinate-only chain rather than failing the recording.

use crate::chain::builder::{BuiltChain, ChainBuilder};
use crate::chain::context::ElementContext;
use crate::chain::scorer::{ScoredCandidate, StrategyScorer};
use crate::model::chain::{LocatorStrategy, StrategyMetadata, StrategyType};
use crate::model::evidence::{EvidenceBundle, TrailPattern};
use crate::model::geometry::Point;
use crate::model::recording::StepEvent;
use serde_json::json;
use tracing::warn;

/// Raw confidences assigned before scoring.
mod raw {
    pub const TEST_ID: f64 = 0.95;
    pub const STABLE_ID: f64 = 0.90;
    pub const CSS_PATH: f64 = 0.75;
    pub const XPATH: f64 = 0.65;
    pub const ROLE_WITH_NAME: f64 = 0.95;
    pub const ROLE_ONLY: f64 = 0.80;
    pub const TEXT: f64 = 0.85;
    pub const LABEL: f64 = 0.85;
    pub const PLACEHOLDER: f64 = 0.80;
    pub const SYNTHETIC_VISION: f64 = 0.70;
    pub const EVIDENCE: f64 = 0.75;
    pub const COORDINATES: f64 = 0.60;
}

/// Longest text content considered for a text-match candidate.
const MAX_TEXT_CANDIDATE_LEN: usize = 50;

/// A generated chain plus its build diagnostics.
#[derive(Debug, Clone)]
pub struct GeneratedChain {
    pub built: BuiltChain,
    pub warnings: Vec<String>,
}

/// Generates fallback chains from evidence bundles.
#[derive(Debug, Clone, Default)]
pub struct ChainGenerator {
    scorer: StrategyScorer,
    builder: ChainBuilder,
}

impl ChainGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a chain for one recorded action.
    pub fn generate(&self, evidence: &EvidenceBundle, action: StepEvent) -> GeneratedChain {
        let mut warnings = Vec::new();
        let context = ElementContext::analyze(&evidence.dom);

        let endpoint = self.resolve_endpoint(evidence, &mut warnings);
        let candidates = self.enumerate(evidence, &context, action, endpoint);

        if candidates.len() == 1 {
            warn!("evidence produced only the coordinate fallback");
            warnings.push("evidence produced only the coordinate fallback".to_string());
        }

        let scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| self.scorer.score(candidate, &context))
            .collect();

        let built = self.builder.build(scored);
        for problem in built.chain.validate() {
            warnings.push(problem);
        }

        GeneratedChain { built, warnings }
    }

    /// Best-available coordinate endpoint for the fallback strategy.
    fn resolve_endpoint(&self, evidence: &EvidenceBundle, warnings: &mut Vec<String>) -> Point {
        if let Some(mouse) = &evidence.mouse {
            return mouse.endpoint;
        }
        if let Some(rect) = &evidence.dom.bounding_rect {
            return rect.center();
        }
        if let Some(vision) = &evidence.vision {
            return vision.bbox.center();
        }
        warnings.push("no recorded endpoint, coordinate fallback uses origin".to_string());
        Point::new(0.0, 0.0)
    }

    fn enumerate(
        &self,
        evidence: &EvidenceBundle,
        context: &ElementContext,
        action: StepEvent,
        endpoint: Point,
    ) -> Vec<LocatorStrategy> {
        let dom = &evidence.dom;
        let mut candidates = Vec::new();

        // Structural DOM family
        if let Some(test_id) = dom.test_id.as_deref().filter(|t| !t.is_empty()) {
            candidates.push(
                LocatorStrategy::new(StrategyType::DomCss, raw::TEST_ID)
                    .with_selector(format!(r#"[data-testid="{}"]"#, test_id))
                    .with_metadata(StrategyMetadata {
                        test_id: Some(test_id.to_string()),
                        ..Default::default()
                    }),
            );
        }
        if context.has_stable_id {
            if let Some(id) = dom.id.as_deref() {
                candidates.push(
                    LocatorStrategy::new(StrategyType::DomCss, raw::STABLE_ID)
                        .with_selector(format!("#{}", id)),
                );
            }
        }
        if let Some(css_path) = dom.css_path.as_deref().filter(|p| !p.is_empty()) {
            candidates.push(
                LocatorStrategy::new(StrategyType::CssPath, raw::CSS_PATH)
                    .with_selector(css_path.to_string()),
            );
        }
        if let Some(xpath) = dom.xpath.as_deref().filter(|p| !p.is_empty()) {
            let mut candidate = LocatorStrategy::new(StrategyType::CssPath, raw::XPATH)
                .with_selector(xpath.to_string());
            candidate
                .metadata
                .extra
                .insert("selector_kind".to_string(), json!("xpath"));
            candidates.push(candidate);
        }

        // Semantic family
        if let Some(role) = dom.role.as_deref().filter(|r| !r.is_empty()) {
            let name = dom
                .accessible_name
                .as_deref()
                .filter(|n| !n.trim().is_empty());
            let confidence = if name.is_some() {
                raw::ROLE_WITH_NAME
            } else {
                raw::ROLE_ONLY
            };
            candidates.push(
                LocatorStrategy::new(StrategyType::Semantic, confidence).with_metadata(
                    StrategyMetadata {
                        role: Some(role.to_string()),
                        name: name.map(String::from),
                        ..Default::default()
                    },
                ),
            );
        }
        // Typing targets rarely carry their own text; label and placeholder
        // candidates cover them instead.
        if action != StepEvent::Input {
            if let Some(text) = dom.text.as_deref().map(str::trim) {
                if !text.is_empty() && text.len() <= MAX_TEXT_CANDIDATE_LEN {
                    candidates.push(
                        LocatorStrategy::new(StrategyType::Power, raw::TEXT).with_metadata(
                            StrategyMetadata {
                                text: Some(text.to_string()),
                                ..Default::default()
                            },
                        ),
                    );
                }
            }
        }
        if context.is_form_interactive {
            if let Some(label) = dom.label.as_deref().filter(|l| !l.trim().is_empty()) {
                candidates.push(
                    LocatorStrategy::new(StrategyType::Power, raw::LABEL).with_metadata(
                        StrategyMetadata {
                            label: Some(label.trim().to_string()),
                            ..Default::default()
                        },
                    ),
                );
            }
        }
        if let Some(placeholder) = dom.placeholder.as_deref().filter(|p| !p.trim().is_empty()) {
            candidates.push(
                LocatorStrategy::new(StrategyType::Power, raw::PLACEHOLDER)
                    .with_selector(format!(r#"[placeholder="{}"]"#, placeholder.trim()))
                    .with_metadata(StrategyMetadata {
                        placeholder: Some(placeholder.trim().to_string()),
                        ..Default::default()
                    }),
            );
        }

        // Vision family
        if let Some(vision) = &evidence.vision {
            if !vision.ocr_text.trim().is_empty() {
                let mut metadata = StrategyMetadata {
                    target_text: Some(vision.ocr_text.trim().to_string()),
                    ..Default::default()
                };
                metadata
                    .extra
                    .insert("ocr_confidence".to_string(), json!(vision.ocr_confidence));
                candidates
                    .push(LocatorStrategy::new(StrategyType::VisionOcr, 0.0).with_metadata(metadata));
            }
        } else if let Some(text) = dom.text.as_deref().map(str::trim) {
            if !text.is_empty() && text.len() <= MAX_TEXT_CANDIDATE_LEN {
                candidates.push(
                    LocatorStrategy::new(StrategyType::VisionOcr, raw::SYNTHETIC_VISION)
                        .with_metadata(StrategyMetadata {
                            target_text: Some(text.to_string()),
                            ..Default::default()
                        }),
                );
            }
        }

        // Evidence-scoring family
        if let Some(mouse) = &evidence.mouse {
            let mut metadata = StrategyMetadata {
                endpoint: Some(mouse.endpoint),
                ..Default::default()
            };
            if let Some(pattern) = mouse.pattern {
                let label = match pattern {
                    TrailPattern::Direct => "direct",
                    TrailPattern::Hesitant => "hesitant",
                    TrailPattern::Corrective => "corrective",
                };
                metadata
                    .extra
                    .insert("trail_pattern".to_string(), json!(label));
            }
            metadata.extra.insert(
                "attribute_count".to_string(),
                json!(dom.attributes.len() + usize::from(dom.id.is_some())),
            );
            if let Some(tail) = mouse.trail.iter().rev().take(5).next_back() {
                metadata
                    .extra
                    .insert("trail_tail".to_string(), json!([tail.x, tail.y]));
            }
            candidates.push(
                LocatorStrategy::new(StrategyType::EvidenceScoring, raw::EVIDENCE)
                    .with_metadata(metadata),
            );
        }

        // Coordinates: always the final backstop
        let mut coordinate_metadata = StrategyMetadata {
            endpoint: Some(endpoint),
            ..Default::default()
        };
        if let Some(rect) = &dom.bounding_rect {
            coordinate_metadata
                .extra
                .insert("target_area".to_string(), json!(rect.area()));
        }
        candidates.push(
            LocatorStrategy::new(StrategyType::Coordinates, raw::COORDINATES)
                .with_metadata(coordinate_metadata),
        );

        candidates
    }
}
