//! Step telemetry types: measured samples and their execution context.
//!
//! A run is an ordered sequence of [`StepSample`] values produced by the
//! external collection hook. Samples may arrive without a context block;
//! [`StepContext::normalized`] fills defaults so no downstream component has
//! to handle absence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{HeimdallError, Result};

/// Default test file used when a sample carries no context.
pub const DEFAULT_TEST_FILE: &str = "unknown.feature";
/// Default test name used when a sample carries no context.
pub const DEFAULT_TEST_NAME: &str = "Unknown Test";
/// Default suite used when a sample carries no context.
pub const DEFAULT_SUITE: &str = "unknown";
/// Default job id for samples produced outside a CI job.
pub const DEFAULT_JOB_ID: &str = "local";
/// Default worker id for samples produced outside a CI job.
pub const DEFAULT_WORKER_ID: &str = "local";

/// One measured step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSample {
    /// Step text; the identity key for baselines
    pub step_text: String,
    /// Measured duration in milliseconds
    pub duration: f64,
    /// Instant the measurement was taken
    pub timestamp: DateTime<Utc>,
    /// Execution context; normalized on access when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<StepContext>,
}

impl StepSample {
    /// The sample's context with defaults filled and tags normalized.
    pub fn normalized_context(&self) -> StepContext {
        StepContext::normalized(self.context.clone())
    }
}

/// Dimensions used for rule resolution and roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepContext {
    /// Feature file the step ran in
    pub test_file: String,
    /// Scenario or test name
    pub test_name: String,
    /// Suite grouping, derived from the feature directory or set explicitly
    pub suite: String,
    /// Short labels, each beginning `@`; duplicates removed, order kept
    pub tags: Vec<String>,
    /// Parallel CI job that produced the sample
    pub job_id: String,
    /// Worker within the job
    pub worker_id: String,
}

impl Default for StepContext {
    fn default() -> Self {
        Self {
            test_file: DEFAULT_TEST_FILE.to_string(),
            test_name: DEFAULT_TEST_NAME.to_string(),
            suite: DEFAULT_SUITE.to_string(),
            tags: Vec::new(),
            job_id: DEFAULT_JOB_ID.to_string(),
            worker_id: DEFAULT_WORKER_ID.to_string(),
        }
    }
}

impl StepContext {
    /// Fill defaults for a possibly-missing context and normalize its tags.
    ///
    /// Empty fields are treated the same as absent ones. Tags are trimmed,
    /// `@`-prefixed, and deduplicated while preserving first-seen order.
    pub fn normalized(raw: Option<StepContext>) -> Self {
        let mut context = raw.unwrap_or_default();
        if context.test_file.trim().is_empty() {
            context.test_file = DEFAULT_TEST_FILE.to_string();
        }
        if context.test_name.trim().is_empty() {
            context.test_name = DEFAULT_TEST_NAME.to_string();
        }
        if context.suite.trim().is_empty() {
            context.suite = DEFAULT_SUITE.to_string();
        }
        if context.job_id.trim().is_empty() {
            context.job_id = DEFAULT_JOB_ID.to_string();
        }
        if context.worker_id.trim().is_empty() {
            context.worker_id = DEFAULT_WORKER_ID.to_string();
        }
        context.tags = normalize_tags(&context.tags);
        context
    }

    /// Whether any of the given tags is present on this context.
    pub fn has_any_tag(&self, tags: &[&str]) -> bool {
        self.tags.iter().any(|tag| tags.contains(&tag.as_str()))
    }

    /// Union-merge tags from another observation, preserving existing order.
    pub fn absorb_tags(&mut self, other: &[String]) {
        for tag in other {
            if !self.tags.contains(tag) {
                self.tags.push(tag.clone());
            }
        }
    }
}

/// Trim, `@`-prefix, and deduplicate tags while preserving first-seen order.
fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized = Vec::with_capacity(tags.len());
    for raw in tags {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "@" {
            continue;
        }
        let tag = if trimmed.starts_with('@') {
            trimmed.to_string()
        } else {
            format!("@{trimmed}")
        };
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

/// Parse a run file: a JSON sequence of step samples.
///
/// Samples without a context are accepted. A non-sequence document, a sample
/// missing `stepText`, or a negative duration are validation errors fatal to
/// the invocation.
pub fn parse_run(content: &str) -> Result<Vec<StepSample>> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| HeimdallError::validation(format!("run file is not valid JSON: {e}")))?;

    let entries = value
        .as_array()
        .ok_or_else(|| HeimdallError::validation("run file must be a JSON sequence of samples"))?;

    let mut samples = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let sample: StepSample = serde_json::from_value(entry.clone()).map_err(|e| {
            HeimdallError::validation_field(
                format!("sample #{index} is malformed: {e}"),
                format!("[{index}]"),
            )
        })?;
        if sample.step_text.trim().is_empty() {
            return Err(HeimdallError::validation_field(
                format!("sample #{index} has an empty stepText"),
                format!("[{index}].stepText"),
            ));
        }
        if !sample.duration.is_finite() || sample.duration < 0.0 {
            return Err(HeimdallError::validation_field(
                format!("sample #{index} has an invalid duration"),
                format!("[{index}].duration"),
            ));
        }
        samples.push(sample);
    }
    Ok(samples)
}
