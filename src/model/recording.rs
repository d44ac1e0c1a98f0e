//! Persisted recording and step types.
//!
//! A `Recording` owns its ordered `Step`s and their fallback chains. The
//! serialized layout is versioned; unknown fields are preserved through the
//! flattened `extra` maps so migrations never drop data they do not
//! understand.

use crate::model::chain::FallbackChain;
use crate::model::geometry::BoundingRect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current recording schema version.
pub const RECORDING_SCHEMA_VERSION: u32 = 3;

/// Upper bound for the global inter-step delay.
pub const MAX_GLOBAL_DELAY_MS: u64 = 60_000;

/// Upper bound for a per-step delay.
pub const MAX_STEP_DELAY_SECONDS: f64 = 3_600.0;

/// What kind of user action a step replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepEvent {
    /// Navigate to a URL
    Open,
    /// Type into a field
    Input,
    /// Click an element
    Click,
    /// Choose a `<select>` option
    Dropdown,
    /// Repeatedly scan for text and click it until quiet
    ConditionalClick,
}

impl std::fmt::Display for StepEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Input => "input",
            Self::Click => "click",
            Self::Dropdown => "dropdown",
            Self::ConditionalClick => "conditional-click",
        };
        write!(f, "{}", s)
    }
}

/// Which capture path produced the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordedVia {
    Dom,
    Vision,
}

/// How a conditional-click interacts with a matched element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionalInteraction {
    Click,
    Type,
    Scroll,
}

/// Configuration for a conditional-click step.
///
/// Immutable once attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalConfig {
    pub enabled: bool,
    /// 1 to 20 terms, each at most 100 chars
    pub search_terms: Vec<String>,
    /// Inactivity window in [1, 3600] seconds
    pub timeout_seconds: u64,
    /// Poll cadence in [250, 10000] ms
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_interaction")]
    pub interaction_type: ConditionalInteraction,
    /// Required when `interaction_type` is `Type`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dropdown_option: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_interaction() -> ConditionalInteraction {
    ConditionalInteraction::Click
}

impl ConditionalConfig {
    pub const MAX_SEARCH_TERMS: usize = 20;
    pub const MAX_TERM_LEN: usize = 100;
    pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=3_600;
    pub const POLL_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 250..=10_000;

    /// Check all invariants, returning each violation.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.search_terms.is_empty() {
            problems.push("search_terms is empty".to_string());
        }
        if self.search_terms.len() > Self::MAX_SEARCH_TERMS {
            problems.push(format!(
                "search_terms has {} entries, max {}",
                self.search_terms.len(),
                Self::MAX_SEARCH_TERMS
            ));
        }
        for term in &self.search_terms {
            if term.len() > Self::MAX_TERM_LEN {
                problems.push(format!("search term longer than {} chars", Self::MAX_TERM_LEN));
            }
        }
        if !Self::TIMEOUT_RANGE.contains(&self.timeout_seconds) {
            problems.push(format!(
                "timeout_seconds {} outside [1,3600]",
                self.timeout_seconds
            ));
        }
        if !Self::POLL_INTERVAL_RANGE.contains(&self.poll_interval_ms) {
            problems.push(format!(
                "poll_interval_ms {} outside [250,10000]",
                self.poll_interval_ms
            ));
        }
        if self.interaction_type == ConditionalInteraction::Type && self.type_text.is_none() {
            problems.push("interaction_type is type but type_text is missing".to_string());
        }

        problems
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// One recorded user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within the owning recording
    pub id: String,
    /// Human label shown in the editor
    #[serde(default)]
    pub label: String,
    pub event: StepEvent,
    /// Text value for input/dropdown steps; CSV tokens substituted at playback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    /// Target URL for `open` steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_recorded_via")]
    pub recorded_via: RecordedVia,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_rect: Option<BoundingRect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f64>,
    /// Text typed by a conditional-click `type` interaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_text: Option<String>,
    /// Text the vision strategy should search for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_target: Option<String>,
    /// Dropdown option label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option_text: Option<String>,
    /// Pre-step delay overriding the recording's global delay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_config: Option<ConditionalConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_chain: Option<FallbackChain>,
    /// Unknown fields preserved across migrations
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_recorded_via() -> RecordedVia {
    RecordedVia::Dom
}

impl Step {
    pub fn new(id: impl Into<String>, event: StepEvent) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            event,
            value: None,
            selector: None,
            xpath: None,
            url: None,
            recorded_via: RecordedVia::Dom,
            bounding_rect: None,
            ocr_text: None,
            ocr_confidence: None,
            input_text: None,
            vision_target: None,
            option_text: None,
            delay_seconds: None,
            conditional_config: None,
            fallback_chain: None,
            extra: Map::new(),
        }
    }

    /// Check per-step invariants.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.event == StepEvent::ConditionalClick {
            match &self.conditional_config {
                None => problems.push(format!("step {}: conditional-click without config", self.id)),
                Some(config) => {
                    for problem in config.validate() {
                        problems.push(format!("step {}: {}", self.id, problem));
                    }
                }
            }
        }

        match self.recorded_via {
            RecordedVia::Vision => {
                if self.bounding_rect.is_none() {
                    problems.push(format!(
                        "step {}: vision-recorded step without coordinates",
                        self.id
                    ));
                }
            }
            RecordedVia::Dom => {
                if self.event != StepEvent::Open
                    && self.selector.is_none()
                    && self.xpath.is_none()
                {
                    problems.push(format!(
                        "step {}: dom-recorded step without selector or xpath",
                        self.id
                    ));
                }
            }
        }

        if let Some(delay) = self.delay_seconds {
            if delay < 0.0 {
                problems.push(format!("step {}: negative delay", self.id));
            }
        }

        problems
    }
}

/// A complete recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub name: String,
    /// Origin URL the recording starts from
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<Step>,
    /// First step executed for CSV rows after the first
    #[serde(default)]
    pub loop_start_index: usize,
    /// Default inter-step delay when a step has none
    #[serde(default)]
    pub global_delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_defaults: Option<ConditionalDefaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_data: Option<CsvData>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Unknown fields preserved across migrations
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_schema_version() -> u32 {
    1
}

/// Recording-level defaults applied to new conditional-click steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalDefaults {
    #[serde(default)]
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: u64,
}

/// CSV data attached to a recording for data-driven replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvData {
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Cell by row and 0-based column; missing cells read as empty.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        if column >= self.column_count() {
            return None;
        }
        self.rows
            .get(row)
            .map(|cells| cells.get(column).map(String::as_str).unwrap_or(""))
    }
}

impl Recording {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            created_at: Utc::now(),
            steps: Vec::new(),
            loop_start_index: 0,
            global_delay_ms: 0,
            conditional_defaults: None,
            csv_data: None,
            schema_version: RECORDING_SCHEMA_VERSION,
            extra: Map::new(),
        }
    }

    /// Check recording-level invariants plus each step's.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.steps.is_empty() {
            problems.push("recording has no steps".to_string());
        }
        if self.loop_start_index > self.steps.len() {
            problems.push(format!(
                "loop_start_index {} exceeds step count {}",
                self.loop_start_index,
                self.steps.len()
            ));
        }
        if self.global_delay_ms > MAX_GLOBAL_DELAY_MS {
            problems.push(format!(
                "global_delay_ms {} exceeds {}",
                self.global_delay_ms, MAX_GLOBAL_DELAY_MS
            ));
        }

        for step in &self.steps {
            problems.extend(step.validate());
        }

        problems
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Parse a recording from JSON without migrating it.
    pub fn from_json(json: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
