//! Report document types produced by one analysis.
//!
//! Reports are emitted per invocation and never persisted by the core; the
//! CLI's reporters render them. Field names follow the camelCase wire
//! convention shared with the persisted documents.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::classify::DriftDetail;
use crate::core::config::{AppliedConfig, ScopedOverride};
use crate::core::telemetry::StepContext;

/// The output of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Steps judged significantly slower than their baseline
    pub regressions: Vec<RegressionRecord>,
    /// Steps observed for the first time
    pub new_steps: Vec<StepRecord>,
    /// Steps within their baseline envelope
    pub ok: Vec<StepRecord>,
    /// Steps with a significant upward trend across their recent window
    pub trends: Vec<DriftRecord>,
    /// Per-suite roll-ups
    pub suites: IndexMap<String, SuiteSummary>,
    /// Suite-level regressions against historical suite averages
    pub suite_regressions: Vec<SuiteRegression>,
    /// Per-tag aggregates across all classified samples
    pub tag_analysis: IndexMap<String, TagStats>,
    /// Issues on critically tagged steps
    pub critical_path: CriticalPath,
    /// Priority-ordered recommendations
    pub recommendations: Vec<Recommendation>,
    /// Run-level metadata
    pub metadata: ReportMetadata,
}

/// One classified step occurrence (ok / new).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Step text
    pub step_text: String,
    /// Measured duration in milliseconds
    pub duration: f64,
    /// Suite the step ran in
    pub suite: String,
    /// Normalized execution context
    pub context: StepContext,
    /// Instant the measurement was taken
    pub timestamp: DateTime<Utc>,
}

/// One regression finding with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionRecord {
    /// Step text
    pub step_text: String,
    /// Measured duration in milliseconds
    pub duration: f64,
    /// Baseline average at evaluation time
    pub baseline_average: f64,
    /// Baseline sample standard deviation at evaluation time
    pub baseline_std_dev: f64,
    /// Absolute slowdown in milliseconds
    pub slowdown: f64,
    /// Slowdown as a percentage of the baseline average
    pub percentage: f64,
    /// Configuration the finding was produced under
    pub applied: AppliedConfig,
    /// Normalized execution context
    pub context: StepContext,
    /// Instant the measurement was taken
    pub timestamp: DateTime<Utc>,
}

/// One drift finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    /// Step text
    pub step_text: String,
    /// Suite the step ran in
    pub suite: String,
    /// Tags on the observing context
    pub tags: Vec<String>,
    /// Measured trend
    #[serde(flatten)]
    pub detail: DriftDetail,
}

/// Per-suite roll-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSummary {
    /// Suite name
    pub suite: String,
    /// Number of samples observed
    pub total_steps: usize,
    /// Sum of durations in milliseconds
    pub total_duration: f64,
    /// Average duration in milliseconds
    pub avg_duration: f64,
    /// Fastest sample
    pub min_duration: f64,
    /// Slowest sample
    pub max_duration: f64,
    /// Regression count
    pub regressions: usize,
    /// New-step count
    pub new_steps: usize,
    /// Ok count
    pub ok_steps: usize,
    /// Samples tagged `@critical`
    pub critical_steps: usize,
    /// Samples tagged `@smoke`
    pub smoke_steps: usize,
    /// Test files contributing samples, sorted
    pub test_files: Vec<String>,
    /// Tags observed in the suite, sorted
    pub tags: Vec<String>,
    /// Health score in `[0, 100]`
    pub health_score: f64,
    /// Category derived from health and regression rate
    pub category: SuiteCategory,
    /// Severity derived from health and regression rate
    pub severity: Severity,
    /// Rule-based suite recommendations
    pub recommendations: Vec<String>,
    /// Suite override in force, when one is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_config: Option<ScopedOverride>,
}

/// Suite category ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuiteCategory {
    /// Healthy suite
    Good,
    /// Minor signals worth watching
    Attention,
    /// Degrading suite
    Warning,
    /// Unhealthy suite
    Critical,
}

/// Severity scale shared by suites and critical-path findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// No findings
    None,
    /// Informational
    Low,
    /// Worth scheduling
    Medium,
    /// Needs attention before release
    High,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::None
    }
}

/// A suite whose current average regressed against its own history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteRegression {
    /// Suite name
    pub suite: String,
    /// Current run's average duration
    pub current_average: f64,
    /// Mean of the historical averages
    pub historical_average: f64,
    /// Absolute increase over the historical mean
    pub delta: f64,
    /// Increase as a percentage of the historical mean
    pub percentage: f64,
    /// Threshold the detection ran under
    pub threshold: f64,
}

/// Per-tag aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagStats {
    /// Number of samples carrying the tag
    pub step_count: usize,
    /// Average duration
    pub avg_duration: f64,
    /// Fastest sample
    pub min: f64,
    /// Slowest sample
    pub max: f64,
    /// Sum of durations
    pub total: f64,
    /// Suites the tag appeared in, sorted
    pub suites: Vec<String>,
    /// Test files the tag appeared in, sorted
    pub test_files: Vec<String>,
}

/// Issues found on critically tagged steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPath {
    /// Total issue count
    pub total_issues: usize,
    /// High-severity issue count
    pub high_severity_issues: usize,
    /// Individual findings
    pub issues: Vec<CriticalPathIssue>,
    /// Highest severity among the findings
    pub overall_severity: Severity,
}

/// One critical-path finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalPathIssue {
    /// Step text
    pub step_text: String,
    /// Finding kind
    pub kind: CriticalIssueKind,
    /// Severity of this finding
    pub severity: Severity,
    /// Suite the step ran in
    pub suite: String,
    /// Critical tags present on the step
    pub tags: Vec<String>,
    /// Human-readable evidence line
    pub detail: String,
}

/// Kinds of critical-path findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriticalIssueKind {
    /// Regressed critically tagged step
    Regression,
    /// Drifting critically tagged step
    Drift,
    /// New critically tagged step
    New,
}

/// Priority scale for recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Informational
    Low,
    /// Worth scheduling
    Medium,
    /// Act before release
    High,
}

/// One run-level recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    /// Priority bucket
    pub priority: Priority,
    /// What the recommendation is about
    pub category: String,
    /// Recommendation text
    pub message: String,
}

/// Run-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    /// Number of samples analyzed
    pub total_steps: usize,
    /// Number of distinct step texts in the run
    pub unique_steps: usize,
    /// Suites observed, sorted
    pub suites: Vec<String>,
    /// Tags observed, sorted
    pub tags: Vec<String>,
    /// Jobs observed, sorted
    pub jobs: Vec<String>,
    /// Analysis instant
    pub timestamp: DateTime<Utc>,
    /// Rounded mean of suite health scores, 100 when no suites
    pub overall_health: f64,
}

impl Default for ReportMetadata {
    fn default() -> Self {
        Self {
            total_steps: 0,
            unique_steps: 0,
            suites: Vec::new(),
            tags: Vec::new(),
            jobs: Vec::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            overall_health: 100.0,
        }
    }
}
