//! Chain assembly from scored candidates.
//!
//! The builder enforces the chain contract: at most seven strategies, a
//! coordinate last resort, no duplicate or near-duplicate selectors, and
//! category diversity while the pool is narrow. Excluded candidates are
//! reported with a reason code so the recorder can surface them.

use crate::chain::scorer::ScoredCandidate;
use crate::model::chain::{
    ExclusionReason, FallbackChain, LocatorStrategy, StrategyCategory, StrategyType,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Candidates below this confidence are dropped (coordinates exempt).
const MIN_CANDIDATE_CONFIDENCE: f64 = 0.2;

/// Jaccard character-set similarity above which selectors are merged.
const SIMILARITY_THRESHOLD: f64 = 0.9;

/// Per-category cap applied while fewer than this many categories are in.
const DIVERSITY_TARGET: usize = 3;
const PER_CATEGORY_CAP: usize = 2;

/// A candidate the builder left out, with why.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedCandidate {
    pub strategy: LocatorStrategy,
    pub reason: ExclusionReason,
}

/// Builder output: the chain plus exclusion diagnostics.
#[derive(Debug, Clone)]
pub struct BuiltChain {
    pub chain: FallbackChain,
    pub excluded: Vec<ExcludedCandidate>,
}

/// Jaccard similarity of the character sets of two strings.
pub fn selector_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<char> = a.chars().collect();
    let set_b: HashSet<char> = b.chars().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// Assembles fallback chains from scored candidates.
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder;

impl ChainBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build a chain, consuming the candidate pool.
    pub fn build(&self, candidates: Vec<ScoredCandidate>) -> BuiltChain {
        self.assemble(candidates, Utc::now())
    }

    /// Re-build an existing chain with additional candidates, keeping the
    /// original record timestamp.
    pub fn rebuild(
        &self,
        original: &FallbackChain,
        additional: Vec<ScoredCandidate>,
    ) -> BuiltChain {
        let mut pool: Vec<ScoredCandidate> = original
            .strategies
            .iter()
            .map(|strategy| ScoredCandidate {
                strategy: strategy.clone(),
                raw_confidence: strategy.confidence,
                adjustments: Vec::new(),
                analysis: None,
            })
            .collect();
        pool.extend(additional);
        self.assemble(pool, original.recorded_at)
    }

    fn assemble(&self, candidates: Vec<ScoredCandidate>, recorded_at: DateTime<Utc>) -> BuiltChain {
        let mut excluded = Vec::new();

        // Validity and confidence floor
        let mut pool: Vec<LocatorStrategy> = Vec::new();
        for scored in candidates {
            let strategy = scored.strategy;
            if !strategy.has_required_metadata() {
                excluded.push(ExcludedCandidate {
                    strategy,
                    reason: ExclusionReason::InvalidCandidate,
                });
                continue;
            }
            if strategy.strategy_type != StrategyType::Coordinates
                && strategy.confidence < MIN_CANDIDATE_CONFIDENCE
            {
                excluded.push(ExcludedCandidate {
                    strategy,
                    reason: ExclusionReason::LowConfidence,
                });
                continue;
            }
            pool.push(strategy);
        }

        // Highest confidence first; stable sort keeps enumeration order on ties
        pool.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Selector dedup: exact, then near-duplicate by character-set overlap
        let mut deduped: Vec<LocatorStrategy> = Vec::new();
        for strategy in pool {
            if let Some(selector) = &strategy.selector {
                if deduped
                    .iter()
                    .any(|kept| kept.selector.as_deref() == Some(selector.as_str()))
                {
                    excluded.push(ExcludedCandidate {
                        strategy,
                        reason: ExclusionReason::DuplicateSelector,
                    });
                    continue;
                }
                let similar = deduped.iter().any(|kept| {
                    kept.selector
                        .as_deref()
                        .is_some_and(|s| selector_similarity(s, selector) >= SIMILARITY_THRESHOLD)
                });
                if similar {
                    excluded.push(ExcludedCandidate {
                        strategy,
                        reason: ExclusionReason::SimilarSelector,
                    });
                    continue;
                }
            }
            deduped.push(strategy);
        }

        // Split out the best coordinate candidate; it takes the reserved slot
        let mut coordinate: Option<LocatorStrategy> = None;
        let mut rest: Vec<LocatorStrategy> = Vec::new();
        for strategy in deduped {
            if strategy.strategy_type == StrategyType::Coordinates {
                if coordinate.is_none() {
                    coordinate = Some(strategy);
                } else {
                    excluded.push(ExcludedCandidate {
                        strategy,
                        reason: ExclusionReason::DuplicateSelector,
                    });
                }
            } else {
                rest.push(strategy);
            }
        }

        let capacity = FallbackChain::MAX_STRATEGIES - usize::from(coordinate.is_some());

        // Diversity pass: cap each category at two until three categories in
        let mut included: Vec<LocatorStrategy> = Vec::new();
        let mut deferred: Vec<LocatorStrategy> = Vec::new();
        let mut per_category: HashMap<StrategyCategory, usize> = HashMap::new();

        for strategy in rest {
            if included.len() >= capacity {
                excluded.push(ExcludedCandidate {
                    strategy,
                    reason: ExclusionReason::MaxStrategiesReached,
                });
                continue;
            }
            let category = strategy.strategy_type.category();
            let count = per_category.get(&category).copied().unwrap_or(0);
            if count >= PER_CATEGORY_CAP && per_category.len() < DIVERSITY_TARGET {
                deferred.push(strategy);
                continue;
            }
            *per_category.entry(category).or_insert(0) += 1;
            included.push(strategy);
        }

        for strategy in deferred {
            if included.len() < capacity {
                included.push(strategy);
            } else {
                excluded.push(ExcludedCandidate {
                    strategy,
                    reason: ExclusionReason::TypeAlreadyCovered,
                });
            }
        }

        if let Some(coordinate) = coordinate {
            included.push(coordinate);
        }

        included.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let primary_type = included
            .first()
            .map(|s| s.strategy_type)
            .unwrap_or(StrategyType::Coordinates);

        BuiltChain {
            chain: FallbackChain {
                strategies: included,
                primary_type,
                recorded_at,
            },
            excluded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chain::StrategyMetadata;
    use crate::model::geometry::Point;

    fn scored(strategy: LocatorStrategy) -> ScoredCandidate {
        ScoredCandidate {
            raw_confidence: strategy.confidence,
            strategy,
            adjustments: Vec::new(),
            analysis: None,
        }
    }

    fn coordinate(confidence: f64) -> ScoredCandidate {
        let mut strategy = LocatorStrategy::new(StrategyType::Coordinates, confidence);
        strategy.metadata.endpoint = Some(Point::new(5.0, 5.0));
        scored(strategy)
    }

    fn semantic(name: &str, confidence: f64) -> ScoredCandidate {
        scored(
            LocatorStrategy::new(StrategyType::Semantic, confidence).with_metadata(
                StrategyMetadata {
                    role: Some("button".to_string()),
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            ),
        )
    }

    fn dom_css(selector: &str, confidence: f64) -> ScoredCandidate {
        scored(LocatorStrategy::new(StrategyType::DomCss, confidence).with_selector(selector))
    }

    #[test]
    fn test_similarity_metric() {
        assert!(selector_similarity("#login-button", "#login-buttons") >= 0.9);
        assert!(selector_similarity("#login", "div.cart > span") < 0.9);
        assert_eq!(selector_similarity("abc", "abc"), 1.0);
    }

    #[test]
    fn test_exact_duplicates_collapsed() {
        let builder = ChainBuilder::new();
        let result = builder.build(vec![
            dom_css("#submit", 0.9),
            dom_css("#submit", 0.7),
            coordinate(0.6),
        ]);

        assert_eq!(result.chain.strategies.len(), 2);
        assert_eq!(result.excluded.len(), 1);
        assert_eq!(
            result.excluded[0].reason,
            ExclusionReason::DuplicateSelector
        );
        // Higher confidence entry survives
        assert_eq!(result.chain.strategies[0].confidence, 0.9);
    }

    #[test]
    fn test_similar_selectors_merged_keeping_higher_confidence() {
        let builder = ChainBuilder::new();
        let result = builder.build(vec![
            dom_css("#login-button", 0.9),
            dom_css("#login-buttons", 0.8),
            coordinate(0.6),
        ]);

        assert_eq!(result.chain.strategies.len(), 2);
        assert_eq!(result.excluded[0].reason, ExclusionReason::SimilarSelector);
        assert_eq!(
            result.chain.strategies[0].selector.as_deref(),
            Some("#login-button")
        );
    }

    #[test]
    fn test_hard_cap_of_seven() {
        let builder = ChainBuilder::new();
        let selectors = [
            "#north", "#south", "#east", "#west", "#delta", "#omega", "#quartz", "#jungle",
            "#velvet", "#marble",
        ];
        let mut candidates: Vec<ScoredCandidate> = selectors
            .iter()
            .enumerate()
            .map(|(i, selector)| dom_css(selector, 0.9 - i as f64 * 0.05))
            .collect();
        candidates.push(coordinate(0.6));

        let result = builder.build(candidates);
        assert!(result.chain.strategies.len() <= FallbackChain::MAX_STRATEGIES);
        assert!(result
            .chain
            .strategies
            .iter()
            .any(|s| s.strategy_type == StrategyType::Coordinates));
        assert_eq!(result.excluded.len(), 4);
        assert!(result.excluded.iter().all(|e| matches!(
            e.reason,
            ExclusionReason::MaxStrategiesReached | ExclusionReason::TypeAlreadyCovered
        )));
    }

    #[test]
    fn test_diversity_defers_third_of_same_category() {
        let builder = ChainBuilder::new();
        let result = builder.build(vec![
            dom_css("#alpha-one", 0.95),
            dom_css("section.intro p.lead", 0.90),
            dom_css("main article.story h1.title", 0.85),
            semantic("Pay now", 0.80),
            coordinate(0.6),
        ]);

        // The third dom candidate is admitted only after the semantic one
        let types: Vec<StrategyType> = result
            .chain
            .strategies
            .iter()
            .map(|s| s.strategy_type)
            .collect();
        assert!(types.contains(&StrategyType::Semantic));
        assert_eq!(result.chain.strategies.len(), 5);
    }

    #[test]
    fn test_low_confidence_excluded() {
        let builder = ChainBuilder::new();
        let result = builder.build(vec![
            dom_css("#main", 0.9),
            dom_css("body section div span", 0.1),
            coordinate(0.6),
        ]);

        assert!(result
            .excluded
            .iter()
            .any(|e| e.reason == ExclusionReason::LowConfidence));
    }

    #[test]
    fn test_invalid_candidate_excluded() {
        let builder = ChainBuilder::new();
        // Semantic without role metadata is invalid
        let invalid = scored(LocatorStrategy::new(StrategyType::Semantic, 0.9));
        let result = builder.build(vec![invalid, dom_css("#x", 0.8), coordinate(0.6)]);

        assert!(result
            .excluded
            .iter()
            .any(|e| e.reason == ExclusionReason::InvalidCandidate));
    }

    #[test]
    fn test_strategies_sorted_non_increasing() {
        let builder = ChainBuilder::new();
        let result = builder.build(vec![
            dom_css("#low-key", 0.5),
            semantic("Pay now", 0.95),
            dom_css("main section.checkout", 0.75),
            coordinate(0.6),
        ]);

        for pair in result.chain.strategies.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(result.chain.primary_type, StrategyType::Semantic);
    }

    #[test]
    fn test_rebuild_preserves_recorded_at() {
        let builder = ChainBuilder::new();
        let original = builder
            .build(vec![dom_css("#x", 0.9), coordinate(0.6)])
            .chain;
        let original_time = original.recorded_at;

        let optimized = builder.rebuild(&original, vec![semantic("Pay now", 0.95)]);
        assert_eq!(optimized.chain.recorded_at, original_time);
        assert!(optimized
            .chain
            .strategies
            .iter()
            .any(|s| s.strategy_type == StrategyType::Semantic));
    }
}
