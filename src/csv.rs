//! CSV parsing and `{{variable}}` substitution for data-driven replay.
//!
//! Templates reference columns by normalized header name (`{{email}}`) or
//! 1-based position (`{{$2}}`). Substitution never mutates the input step;
//! it returns a new one plus a report of what was replaced.

use crate::config::CsvConfig;
use crate::error::{Error, Result};
use crate::model::recording::{CsvData, Step};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("invalid regex"));

/// Normalize a header for case-insensitive lookup: trim, lowercase, spaces to
/// underscores, strip everything else non-alphanumeric.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Parse RFC-4180-style CSV text: comma-separated cells, double-quote
/// wrapping, `""` as a literal quote, newlines allowed inside quotes. The
/// first record is the header row.
pub fn parse_csv(text: &str) -> Result<CsvData> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                record.push(std::mem::take(&mut cell));
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            '\n' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(c),
        }
    }
    if in_quotes {
        return Err(Error::Csv("unterminated quoted field".to_string()));
    }
    // Final record without trailing newline
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }

    // Drop fully-empty records (blank lines)
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));

    let mut iter = records.into_iter();
    let headers = iter
        .next()
        .ok_or_else(|| Error::Csv("empty CSV input".to_string()))?;

    let column_count = headers.len();
    let rows: Vec<Vec<String>> = iter.collect();
    for (index, row) in rows.iter().enumerate() {
        if row.len() > column_count {
            return Err(Error::Csv(format!(
                "row {} has {} cells, header has {}",
                index + 1,
                row.len(),
                column_count
            )));
        }
    }

    Ok(CsvData { headers, rows })
}

/// Variables referenced in a template, in order of appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    TOKEN_PATTERN
        .captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// Whether the template references any variable.
pub fn has_variables(template: &str) -> bool {
    TOKEN_PATTERN.is_match(template)
}

/// Report of one template substitution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubstitutionResult {
    pub value: String,
    /// Variables that resolved to a cell
    pub substituted: Vec<String>,
    /// Variables with no matching column or row cell
    pub missing: Vec<String>,
    /// True when nothing was missing
    pub complete: bool,
}

/// Report of a whole-step substitution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSubstitution {
    pub substituted: Vec<String>,
    pub missing: Vec<String>,
    pub complete: bool,
}

/// Applies CSV rows to step templates.
#[derive(Debug, Clone, Default)]
pub struct CsvMapper {
    config: CsvConfig,
}

impl CsvMapper {
    pub fn new(config: CsvConfig) -> Self {
        Self { config }
    }

    /// Substitute every `{{...}}` token in a template for one row.
    ///
    /// A template without `{{` comes back unchanged. Missing variables read
    /// as the configured default in non-strict mode, or error in strict mode.
    pub fn substitute(
        &self,
        template: &str,
        csv: &CsvData,
        row: usize,
    ) -> Result<SubstitutionResult> {
        if !has_variables(template) {
            return Ok(SubstitutionResult {
                value: template.to_string(),
                complete: true,
                ..Default::default()
            });
        }

        let mut substituted = Vec::new();
        let mut missing = Vec::new();
        let mut output = String::with_capacity(template.len());
        let mut last_end = 0;

        for captures in TOKEN_PATTERN.captures_iter(template) {
            let full = captures.get(0).expect("capture 0 always present");
            let name = captures[1].trim().to_string();
            output.push_str(&template[last_end..full.start()]);
            last_end = full.end();

            match self.lookup(&name, csv, row) {
                Some(value) => {
                    let value = if self.config.trim_values {
                        value.trim().to_string()
                    } else {
                        value
                    };
                    output.push_str(&value);
                    substituted.push(name);
                }
                None => {
                    if self.config.strict {
                        return Err(Error::missing_variable(name));
                    }
                    output.push_str(&self.config.missing_default);
                    missing.push(name);
                }
            }
        }
        output.push_str(&template[last_end..]);

        Ok(SubstitutionResult {
            value: output,
            complete: missing.is_empty(),
            substituted,
            missing,
        })
    }

    fn lookup(&self, name: &str, csv: &CsvData, row: usize) -> Option<String> {
        let column = if let Some(position) = name.strip_prefix('$') {
            let position: usize = position.parse().ok()?;
            if position == 0 {
                return None;
            }
            position - 1
        } else {
            let wanted = normalize_header(name);
            csv.headers
                .iter()
                .position(|header| normalize_header(header) == wanted)?
        };
        csv.cell(row, column).map(String::from)
    }

    /// Substitute a step's templated fields for one row, returning a fresh
    /// step. The original is untouched.
    pub fn substitute_step(
        &self,
        step: &Step,
        csv: &CsvData,
        row: usize,
    ) -> Result<(Step, StepSubstitution)> {
        let mut result = step.clone();
        let mut report = StepSubstitution {
            complete: true,
            ..Default::default()
        };

        for field in [
            &mut result.value,
            &mut result.url,
            &mut result.input_text,
            &mut result.vision_target,
            &mut result.option_text,
        ] {
            if let Some(template) = field.as_deref() {
                let substitution = self.substitute(template, csv, row)?;
                report.substituted.extend(substitution.substituted);
                report.missing.extend(substitution.missing);
                *field = Some(substitution.value);
            }
        }
        report.complete = report.missing.is_empty();

        Ok((result, report))
    }
}
