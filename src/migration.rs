//! Recording schema migration and backward-compatibility verification.
//!
//! Migration runs over the raw JSON object so unknown fields pass through
//! untouched, then the repaired document is deserialized. Applying the
//! migration twice yields the same document. Verification compares the
//! original and migrated documents without modifying either.

use crate::error::Result;
use crate::model::recording::{Recording, MAX_GLOBAL_DELAY_MS, RECORDING_SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// What a migration pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Applied defaults and repairs, human readable
    pub changes: Vec<String>,
    /// Values that were invalid and silently repaired
    pub warnings: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty() && self.warnings.is_empty()
    }
}

/// Migrate a raw recording document in place.
pub fn migrate_value(value: &mut Value) -> MigrationReport {
    let mut report = MigrationReport::default();

    let Some(root) = value.as_object_mut() else {
        report.warnings.push("recording is not an object".to_string());
        return report;
    };

    let step_count = root
        .get("steps")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    // loopStartIndex: default 0, clamp into [0, steps.len()]
    match root.get("loopStartIndex") {
        None => {
            root.insert("loopStartIndex".to_string(), json!(0));
            report.changes.push("loopStartIndex defaulted to 0".to_string());
        }
        Some(value) => {
            let current = value.as_i64().unwrap_or(-1);
            if current < 0 {
                root.insert("loopStartIndex".to_string(), json!(0));
                report
                    .warnings
                    .push("negative loopStartIndex reset to 0".to_string());
            } else if current as usize > step_count {
                root.insert("loopStartIndex".to_string(), json!(step_count));
                report.warnings.push(format!(
                    "loopStartIndex clamped to step count {}",
                    step_count
                ));
            }
        }
    }

    // globalDelayMs: default 0, clamp into [0, 60000]
    match root.get("globalDelayMs") {
        None => {
            root.insert("globalDelayMs".to_string(), json!(0));
            report.changes.push("globalDelayMs defaulted to 0".to_string());
        }
        Some(value) => {
            let current = value.as_i64().unwrap_or(-1);
            if current < 0 {
                root.insert("globalDelayMs".to_string(), json!(0));
                report
                    .warnings
                    .push("negative globalDelayMs reset to 0".to_string());
            } else if current as u64 > MAX_GLOBAL_DELAY_MS {
                root.insert("globalDelayMs".to_string(), json!(MAX_GLOBAL_DELAY_MS));
                report.warnings.push(format!(
                    "globalDelayMs clamped to {}",
                    MAX_GLOBAL_DELAY_MS
                ));
            }
        }
    }

    if let Some(steps) = root.get_mut("steps").and_then(Value::as_array_mut) {
        for (index, step) in steps.iter_mut().enumerate() {
            let Some(step) = step.as_object_mut() else {
                report
                    .warnings
                    .push(format!("step {} is not an object", index));
                continue;
            };

            // recordedVia: default dom, invalid left unchanged
            if step.get("recordedVia").is_none() {
                step.insert("recordedVia".to_string(), json!("dom"));
                report
                    .changes
                    .push(format!("step {}: recordedVia defaulted to dom", index));
            }

            // delaySeconds: negative removed, huge clamped
            if let Some(delay) = step.get("delaySeconds") {
                match delay.as_f64() {
                    Some(seconds) if seconds < 0.0 => {
                        step.remove("delaySeconds");
                        report
                            .warnings
                            .push(format!("step {}: negative delaySeconds removed", index));
                    }
                    Some(seconds) if seconds > 3_600.0 => {
                        step.insert("delaySeconds".to_string(), json!(3_600.0));
                        report
                            .warnings
                            .push(format!("step {}: delaySeconds clamped to 3600", index));
                    }
                    _ => {}
                }
            }

            // conditionalConfig: invalid reset to absent
            if let Some(config) = step.get("conditionalConfig") {
                if !conditional_config_is_valid(config) {
                    step.remove("conditionalConfig");
                    report.warnings.push(format!(
                        "step {}: invalid conditionalConfig reset to absent",
                        index
                    ));
                }
            }
        }
    }

    let previous_version = root
        .get("schemaVersion")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if previous_version < RECORDING_SCHEMA_VERSION as u64 {
        root.insert(
            "schemaVersion".to_string(),
            json!(RECORDING_SCHEMA_VERSION),
        );
        report.changes.push(format!(
            "schemaVersion raised from {} to {}",
            previous_version, RECORDING_SCHEMA_VERSION
        ));
    }

    report
}

fn conditional_config_is_valid(config: &Value) -> bool {
    let Some(config) = config.as_object() else {
        return false;
    };
    let terms = config
        .get("searchTerms")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    if terms == 0 || terms > 20 {
        return false;
    }
    let timeout = config
        .get("timeoutSeconds")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if !(1..=3_600).contains(&timeout) {
        return false;
    }
    if config.get("interactionType").and_then(Value::as_str) == Some("type")
        && config.get("typeText").and_then(Value::as_str).is_none()
    {
        return false;
    }
    true
}

/// Migrate a typed recording, returning the upgraded copy and the report.
pub fn migrate(recording: &Recording) -> Result<(Recording, MigrationReport)> {
    let mut value = serde_json::to_value(recording)?;
    let report = migrate_value(&mut value);
    let migrated: Recording = serde_json::from_value(value)?;
    Ok((migrated, report))
}

/// Fields that must survive migration byte-for-byte.
const CRITICAL_ROOT_FIELDS: &[&str] = &["id", "name", "url", "createdAt"];
const CRITICAL_STEP_FIELDS: &[&str] = &["id", "event", "selector", "value", "label"];

/// Outcome of comparing an original document to its migrated form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    /// Critical-field divergences
    pub errors: Vec<String>,
    /// Critical fields confirmed identical
    pub preserved_fields: Vec<String>,
    /// Fields the migration introduced with defaults
    pub new_field_defaults: Vec<String>,
    /// Non-fatal concerns for playback
    pub playability_warnings: Vec<String>,
}

/// Compare original and migrated documents. Never modifies either.
pub fn verify_compatibility(original: &Value, migrated: &Value) -> CompatibilityReport {
    let mut report = CompatibilityReport {
        compatible: true,
        ..Default::default()
    };

    let (Some(original_root), Some(migrated_root)) = (original.as_object(), migrated.as_object())
    else {
        report.compatible = false;
        report.errors.push("documents are not objects".to_string());
        return report;
    };

    for field in CRITICAL_ROOT_FIELDS {
        compare_field(
            original_root.get(*field),
            migrated_root.get(*field),
            field,
            &mut report,
        );
    }

    for field in ["loopStartIndex", "globalDelayMs", "schemaVersion"] {
        if original_root.get(field).is_none() && migrated_root.get(field).is_some() {
            report.new_field_defaults.push(field.to_string());
        }
    }

    let original_steps = original_root
        .get("steps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let migrated_steps = migrated_root
        .get("steps")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if original_steps.len() != migrated_steps.len() {
        report.compatible = false;
        report.errors.push(format!(
            "steps.length changed from {} to {}",
            original_steps.len(),
            migrated_steps.len()
        ));
    } else {
        report.preserved_fields.push("steps.length".to_string());
    }

    for (index, (original_step, migrated_step)) in
        original_steps.iter().zip(migrated_steps.iter()).enumerate()
    {
        for field in CRITICAL_STEP_FIELDS {
            compare_field(
                original_step.get(*field),
                migrated_step.get(*field),
                &format!("steps[{}].{}", index, field),
                &mut report,
            );
        }
        if original_step.get("recordedVia").is_none()
            && migrated_step.get("recordedVia").is_some()
        {
            report
                .new_field_defaults
                .push(format!("steps[{}].recordedVia", index));
        }
        if original_step.get("fallbackChain").is_none() {
            report.playability_warnings.push(format!(
                "steps[{}] has no fallback chain; playback relies on raw selectors",
                index
            ));
        }
    }

    debug!(
        compatible = report.compatible,
        errors = report.errors.len(),
        "compatibility verification complete"
    );
    report
}

fn compare_field(
    original: Option<&Value>,
    migrated: Option<&Value>,
    label: &str,
    report: &mut CompatibilityReport,
) {
    match (original, migrated) {
        (None, None) => {}
        (Some(a), Some(b)) if a == b => report.preserved_fields.push(label.to_string()),
        (None, Some(_)) => report.new_field_defaults.push(label.to_string()),
        _ => {
            report.compatible = false;
            report.errors.push(format!("{} diverged", label));
        }
    }
}

/// A recording loaded from persisted JSON, migrated and verified.
#[derive(Debug, Clone)]
pub struct LoadedRecording {
    pub recording: Recording,
    pub migration: MigrationReport,
    pub compatibility: CompatibilityReport,
}

/// Parse, migrate, and verify a persisted recording.
pub fn load_recording(json: &str) -> Result<LoadedRecording> {
    let original: Value = serde_json::from_str(json)?;
    let mut migrated_value = original.clone();
    let migration = migrate_value(&mut migrated_value);
    let compatibility = verify_compatibility(&original, &migrated_value);
    let recording: Recording = serde_json::from_value(migrated_value)?;

    Ok(LoadedRecording {
        recording,
        migration,
        compatibility,
    })
}
