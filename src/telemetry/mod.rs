//! Telemetry: per-strategy outcome recording, buffered persistence, and
//! aggregate queries over an embedded SQLite store.

pub mod events;
pub mod logger;
pub mod schema;
pub mod store;

pub use events::{
    EventFilter, RunSummary, StrategyMetrics, TelemetryEvent, TelemetryExport,
};
pub use logger::TelemetryLogger;
pub use store::TelemetryStore;
