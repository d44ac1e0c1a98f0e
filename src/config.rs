//! Process-wide configuration for the replay engine.
//!
//! Every knob carries a sensible default; `EngineConfig::validate` rejects
//! with a single error listing every offending property rather than failing
//! on the first.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Decision engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Per-strategy evaluation timeout in milliseconds
    pub strategy_timeout_ms: u64,
    /// Minimum raw confidence for a strategy result to survive filtering
    pub min_confidence: f64,
    /// Evaluate strategies one at a time (debugging aid)
    pub sequential: bool,
    /// Whole-step retries after executor failure
    pub max_retries: u32,
    /// Delay between step retries in milliseconds
    pub retry_delay_ms: u64,
    /// Soft budget for the pre-action actionability wait in milliseconds
    pub wait_budget_ms: u64,
    /// Abort the step when actionability fails instead of proceeding
    pub strict_gating: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_ms: 30_000,
            min_confidence: 0.5,
            sequential: false,
            max_retries: 2,
            retry_delay_ms: 1_000,
            wait_budget_ms: 5_000,
            strict_gating: false,
        }
    }
}

/// Auto-waiting (actionability gate) tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoWaitConfig {
    /// Outer timeout in milliseconds
    pub timeout_ms: u64,
    /// Poll cadence in milliseconds
    pub polling_interval_ms: u64,
    /// How long a position must hold still to count as stable
    pub stability_threshold_ms: u64,
}

impl Default for AutoWaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            polling_interval_ms: 100,
            stability_threshold_ms: 100,
        }
    }
}

/// Action executor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Interpolation steps for simulated mouse motion
    pub mouse_move_steps: u32,
    /// Delay per interpolation step in milliseconds
    pub mouse_move_step_delay_ms: u64,
    /// Delay between typed characters in milliseconds
    pub keystroke_delay_ms: u64,
    /// Select-all + backspace before typing
    pub clear_before_type: bool,
    /// Simulate mouse motion before clicks
    pub simulate_mouse_movement: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mouse_move_steps: 10,
            mouse_move_step_delay_ms: 5,
            keystroke_delay_ms: 50,
            clear_before_type: true,
            simulate_mouse_movement: true,
        }
    }
}

/// OCR runtime tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Language pack identifier, e.g. `eng`
    pub language: String,
    /// Maximum concurrent OCR operations
    pub max_concurrent: usize,
    /// Screenshot OCR cache TTL in milliseconds
    pub cache_ttl_ms: u64,
    /// Minimum per-line OCR confidence for a match
    pub min_line_confidence: f64,
    /// Initialize the engine at startup rather than on first use
    pub prewarm: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            max_concurrent: 2,
            cache_ttl_ms: 2_000,
            min_line_confidence: 60.0,
            prewarm: false,
        }
    }
}

/// Telemetry logger tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Flush when the buffer reaches this many events
    pub batch_size: usize,
    /// Flush at least this often in milliseconds
    pub flush_interval_ms: u64,
    /// Purge events older than this many days
    pub retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval_ms: 5_000,
            retention_days: 30,
        }
    }
}

/// CSV substitution tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvConfig {
    /// Error on missing variables instead of substituting the default
    pub strict: bool,
    /// Replacement for missing variables in non-strict mode
    pub missing_default: String,
    /// Trim substituted values
    pub trim_values: bool,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            strict: false,
            missing_default: String::new(),
            trim_values: true,
        }
    }
}

/// Browser command dispatch tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Attempts per command including the first
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 100,
        }
    }
}

/// Aggregated engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub auto_wait: AutoWaitConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub csv: CsvConfig,
    #[serde(default)]
    pub command: CommandConfig,
}

impl EngineConfig {
    /// Validate every property, collecting all violations into one error.
    pub fn validate(&self) -> Result<()> {
        let mut offenders = Vec::new();

        if self.decision.strategy_timeout_ms == 0 {
            offenders.push("decision.strategy_timeout_ms must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.decision.min_confidence) {
            offenders.push(format!(
                "decision.min_confidence {} outside [0,1]",
                self.decision.min_confidence
            ));
        }
        if self.auto_wait.polling_interval_ms == 0 {
            offenders.push("auto_wait.polling_interval_ms must be positive".to_string());
        }
        if self.auto_wait.timeout_ms < self.auto_wait.polling_interval_ms {
            offenders.push(format!(
                "auto_wait.timeout_ms {} is less than polling_interval_ms {}",
                self.auto_wait.timeout_ms, self.auto_wait.polling_interval_ms
            ));
        }
        if self.auto_wait.stability_threshold_ms == 0 {
            offenders.push("auto_wait.stability_threshold_ms must be positive".to_string());
        }
        if self.executor.mouse_move_steps == 0 {
            offenders.push("executor.mouse_move_steps must be positive".to_string());
        }
        if self.ocr.language.is_empty() {
            offenders.push("ocr.language must not be empty".to_string());
        }
        if self.ocr.max_concurrent == 0 {
            offenders.push("ocr.max_concurrent must be positive".to_string());
        }
        if !(0.0..=100.0).contains(&self.ocr.min_line_confidence) {
            offenders.push(format!(
                "ocr.min_line_confidence {} outside [0,100]",
                self.ocr.min_line_confidence
            ));
        }
        if self.telemetry.batch_size == 0 {
            offenders.push("telemetry.batch_size must be positive".to_string());
        }
        if self.telemetry.flush_interval_ms == 0 {
            offenders.push("telemetry.flush_interval_ms must be positive".to_string());
        }
        if self.telemetry.retention_days == 0 {
            offenders.push("telemetry.retention_days must be positive".to_string());
        }
        if self.command.max_attempts == 0 {
            offenders.push("command.max_attempts must be positive".to_string());
        }

        if offenders.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(offenders.join("; ")))
        }
    }

    pub fn with_decision(mut self, decision: DecisionConfig) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_auto_wait(mut self, auto_wait: AutoWaitConfig) -> Self {
        self.auto_wait = auto_wait;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_ocr(mut self, ocr: OcrConfig) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_csv(mut self, csv: CsvConfig) -> Self {
        self.csv = csv;
        self
    }
}
