//! Record-time fallback chain pipeline: context analysis, candidate
//! generation, confidence scoring, and chain assembly.

pub mod builder;
pub mod context;
pub mod generator;
pub mod scorer;

pub use builder::{selector_similarity, BuiltChain, ChainBuilder, ExcludedCandidate};
pub use context::{is_dynamic_value, ElementContext};
pub use generator::{ChainGenerator, GeneratedChain};
pub use scorer::{
    AdjustmentKind, ScoreAdjustment, ScoredCandidate, SelectorAnalysis, StrategyScorer,
};
