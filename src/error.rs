//! Error types for replay-core.

use thiserror::Error;

/// Result type alias using replay-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during recording and playback operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Browser command failed after exhausting retries
    #[error("Browser command error: {command} - {message}")]
    BrowserCommand {
        command: String,
        message: String,
        /// Commands like `not attached` are never retried
        retryable: bool,
    },

    /// The tab session is no longer attached
    #[error("Tab detached: {0}")]
    TabDetached(String),

    /// Referenced node no longer exists in the page
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// OCR engine initialization or recognition failure
    #[error("OCR error: {0}")]
    Ocr(String),

    /// Strategy evaluation error (contained by the decision engine)
    #[error("Strategy evaluation error: {strategy} - {message}")]
    StrategyEvaluation { strategy: String, message: String },

    /// Element failed actionability checks
    #[error("Element not actionable: {0}")]
    NotActionable(String),

    /// Input dispatch failed
    #[error("Action execution error: {0}")]
    ActionExecution(String),

    /// CSV parsing or substitution error
    #[error("CSV error: {0}")]
    Csv(String),

    /// A `{{variable}}` had no matching CSV column in strict mode
    #[error("Missing CSV variable: {name}")]
    MissingVariable { name: String },

    /// Telemetry storage error
    #[error("Telemetry storage error: {0}")]
    TelemetryStorage(String),

    /// Recording failed schema validation
    #[error("Invalid recording: {0}")]
    InvalidRecording(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error, message lists every offending property
    #[error("Configuration error: {0}")]
    Config(String),

    /// Playback run is in the wrong state for the requested transition
    #[error("Invalid playback state: {0}")]
    PlaybackState(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a browser command error.
    pub fn browser_command(
        command: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::BrowserCommand {
            command: command.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a strategy evaluation error.
    pub fn strategy(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StrategyEvaluation {
            strategy: strategy.into(),
            message: message.into(),
        }
    }

    /// Create a missing-variable error.
    pub fn missing_variable(name: impl Into<String>) -> Self {
        Self::MissingVariable { name: name.into() }
    }

    /// Whether a failed browser command may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BrowserCommand { retryable, .. } => *retryable,
            Self::TabDetached(_) | Self::NodeNotFound(_) => false,
            _ => false,
        }
    }
}
