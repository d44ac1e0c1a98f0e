//! Core data model shared by recording and playback.

pub mod chain;
pub mod evidence;
pub mod geometry;
pub mod recording;

pub use chain::{
    ExclusionReason, FallbackChain, LocatorStrategy, StrategyCategory, StrategyMetadata,
    StrategyType,
};
pub use evidence::{
    DomCapture, EvidenceBundle, MouseCapture, NetworkCapture, TrailPattern, VisionCapture,
};
pub use geometry::{BoundingRect, Point};
pub use recording::{
    ConditionalConfig, ConditionalDefaults, ConditionalInteraction, CsvData, Recording,
    RecordedVia, Step, StepEvent, MAX_GLOBAL_DELAY_MS, MAX_STEP_DELAY_SECONDS,
    RECORDING_SCHEMA_VERSION,
};
