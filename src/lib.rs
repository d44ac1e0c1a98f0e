//! # replay-core
//!
//! A record-and-replay browser automation core. Recorded user actions carry
//! a fallback chain of element-location strategies; playback evaluates every
//! strategy in parallel against the live page, picks the most confident
//! match, gates the action on element actionability, and records
//! per-strategy telemetry.
//!
//! ## Core Components
//!
//! - **Model**: recordings, steps, fallback chains, evidence bundles
//! - **Chain**: record-time candidate generation, scoring, and assembly
//! - **Locate**: the seven playback-time locator strategies
//! - **Engine**: parallel strategy evaluation and weighted selection
//! - **Playback**: the run loop, CSV-driven rows, conditional-click
//! - **Telemetry**: buffered per-strategy outcome logging over SQLite
//!
//! ## Example
//!
//! ```rust,ignore
//! use replay_core::{load_recording, EngineBuilder, EngineConfig, EngineRequest};
//!
//! let loaded = load_recording(&json)?;
//! let service = EngineBuilder::new(EngineConfig::default(), browser, ocr, store, source)
//!     .build()
//!     .await?;
//! let response = service
//!     .handle(EngineRequest::PlaybackStart {
//!         tab: "tab-1".into(),
//!         recording_id: loaded.recording.id.clone(),
//!         csv: None,
//!         stop_on_error: false,
//!     })
//!     .await;
//! ```

pub mod accessibility;
pub mod browser;
pub mod chain;
pub mod conditional;
pub mod config;
pub mod csv;
pub mod engine;
pub mod error;
pub mod executor;
pub mod locate;
pub mod migration;
pub mod model;
pub mod playback;
pub mod service;
pub mod telemetry;
pub mod vision;
pub mod waiting;

// Re-exports for convenience
pub use accessibility::{AccessibilityService, AxQuery, AxStateFilter};
pub use browser::{
    AxCheckedState, AxNode, BackendNodeId, BoxModel, BrowserControl, KeyEventKind, KeyEventParams,
    LayoutMetrics, Modifiers, MouseButton, MouseEventKind, MouseEventParams, NodeDescription,
    Screenshot, ScreenshotFormat, TabHandle,
};
pub use chain::{
    AdjustmentKind, BuiltChain, ChainBuilder, ChainGenerator, ElementContext, ExcludedCandidate,
    GeneratedChain, ScoreAdjustment, ScoredCandidate, SelectorAnalysis, StrategyScorer,
};
pub use conditional::{ConditionalClickRunner, ConditionalOutcome, ConditionalOutcomeReason};
pub use config::{
    AutoWaitConfig, CommandConfig, CsvConfig, DecisionConfig, EngineConfig, ExecutorConfig,
    OcrConfig, TelemetryConfig,
};
pub use csv::{
    extract_variables, has_variables, parse_csv, CsvMapper, StepSubstitution, SubstitutionResult,
};
pub use engine::{select_best, Decision, DecisionEngine, StrategyEvaluationRecord};
pub use error::{Error, Result};
pub use executor::{ActionExecutor, ActionKind, ActionRequest, ExecutionResult};
pub use locate::{Evaluation, StrategySet};
pub use migration::{
    load_recording, migrate, migrate_value, verify_compatibility, CompatibilityReport,
    LoadedRecording, MigrationReport,
};
pub use model::{
    BoundingRect, ConditionalConfig, ConditionalDefaults, ConditionalInteraction, CsvData,
    DomCapture, EvidenceBundle, ExclusionReason, FallbackChain, LocatorStrategy, MouseCapture,
    NetworkCapture, Point, Recording, RecordedVia, Step, StepEvent, StrategyCategory,
    StrategyMetadata, StrategyType, TrailPattern, VisionCapture,
};
pub use playback::{
    PlaybackController, PlaybackEvent, PlaybackOptions, PlaybackState, RunResult, StepResult,
};
pub use service::{EngineBuilder, EngineRequest, EngineResponse, EngineService, RecordingSource};
pub use telemetry::{
    EventFilter, RunSummary, StrategyMetrics, TelemetryEvent, TelemetryExport, TelemetryLogger,
    TelemetryStore,
};
pub use vision::{OcrEngine, OcrLine, OcrMatch, OcrService};
pub use waiting::{
    ActionabilityState, AutoWaiter, StabilityTracker, WaitFailureReason, WaitOutcome,
    WaitRequirements,
};
