//! Configuration types and management for heimdall-rs.
//!
//! The typed structures here are the validated view the analysis engine and
//! storage layer consume. Loading and layered merging (defaults, user file,
//! environments, profiles, CLI overrides, environment-variable
//! interpolation) live in [`layering`]; per-request effective configuration
//! derived from step/suite/tag context lives in [`effective`].

pub mod effective;
pub mod layering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::{HeimdallError, Result};

// Re-export types from submodules
pub use effective::{AppliedConfig, EffectiveStepConfig, StorageOptions};
pub use layering::{CliOverrides, ConfigLoader, ResolvedConfig};

/// Main configuration for the heimdall analysis engine and storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeimdallConfig {
    /// Project identity
    pub project: ProjectConfig,

    /// Analysis thresholds, rules, and overrides
    pub analysis: AnalysisConfig,

    /// Named environment override fragments, merged when selected
    pub environments: IndexMap<String, serde_yaml::Value>,

    /// Named profile override fragments, merged when selected
    pub profiles: IndexMap<String, serde_yaml::Value>,

    /// Storage backend selection and settings
    pub storage: StorageConfig,

    /// Report emission settings
    pub reporting: ReportingConfig,
}

impl Default for HeimdallConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            analysis: AnalysisConfig::default(),
            environments: IndexMap::new(),
            profiles: IndexMap::new(),
            storage: StorageConfig::default(),
            reporting: ReportingConfig::default(),
        }
    }
}

impl HeimdallConfig {
    /// Validate configuration settings.
    pub fn validate(&self) -> Result<()> {
        if self.analysis.threshold <= 0.0 {
            return Err(HeimdallError::config_field(
                "threshold must be positive",
                "analysis.threshold",
            ));
        }
        if self.analysis.max_history == 0 {
            return Err(HeimdallError::config_field(
                "max_history must be positive",
                "analysis.max_history",
            ));
        }
        if self.analysis.trends.window_size == 0 {
            return Err(HeimdallError::config_field(
                "window_size must be positive",
                "analysis.trends.window_size",
            ));
        }
        if self.analysis.step_types.is_empty() {
            return Err(HeimdallError::config_field(
                "at least one step type is required",
                "analysis.step_types",
            ));
        }
        for (name, step_type) in &self.analysis.step_types {
            if let Some(max) = step_type.max_duration {
                if max <= 0.0 {
                    return Err(HeimdallError::config_field(
                        "max_duration must be positive",
                        format!("analysis.step_types.{name}.max_duration"),
                    ));
                }
            }
        }
        if matches!(self.storage.adapter_type, AdapterTypeChoice::Database)
            && self.storage.database.connection.is_none()
        {
            return Err(HeimdallError::config_field(
                "a connection string is required for the database adapter",
                "storage.database.connection",
            ));
        }
        if self.reporting.default_reporters.is_empty() {
            return Err(HeimdallError::config_field(
                "at least one reporter is required",
                "reporting.default_reporters",
            ));
        }
        Ok(())
    }
}

/// Project identity configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Namespace for all persisted documents
    pub id: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
        }
    }
}

/// Analysis pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Standard-deviation multiplier for the basic regression predicate
    pub threshold: f64,

    /// Bound on retained durations per step baseline
    pub max_history: usize,

    /// Duration-banded step types with per-type rule adjustments
    pub step_types: IndexMap<String, StepTypeConfig>,

    /// Baseline rule set applied before any override
    pub global_rules: RuleSet,

    /// Trend (drift) detection settings
    pub trends: TrendConfig,

    /// Per-step overrides keyed by step text (highest priority)
    pub step_overrides: IndexMap<String, StepOverride>,

    /// Per-suite overrides keyed by suite name
    pub suite_overrides: IndexMap<String, ScopedOverride>,

    /// Per-tag overrides keyed by tag, applied in context tag order
    pub tag_overrides: IndexMap<String, ScopedOverride>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
            max_history: Self::default_max_history(),
            step_types: Self::default_step_types(),
            global_rules: RuleSet::default(),
            trends: TrendConfig::default(),
            step_overrides: IndexMap::new(),
            suite_overrides: IndexMap::new(),
            tag_overrides: IndexMap::new(),
        }
    }
}

impl AnalysisConfig {
    /// Default standard-deviation multiplier.
    const fn default_threshold() -> f64 {
        2.0
    }

    /// Default baseline window size.
    const fn default_max_history() -> usize {
        50
    }

    /// Duration bands used when no explicit step type is assigned.
    fn default_step_types() -> IndexMap<String, StepTypeConfig> {
        let mut step_types = IndexMap::new();
        step_types.insert(
            "very_fast".to_string(),
            StepTypeConfig {
                max_duration: Some(100.0),
                rules: RuleOverrides {
                    min_percentage_change: Some(15.0),
                    min_absolute_slowdown: Some(10.0),
                    ..RuleOverrides::default()
                },
            },
        );
        step_types.insert(
            "fast".to_string(),
            StepTypeConfig {
                max_duration: Some(500.0),
                rules: RuleOverrides::default(),
            },
        );
        step_types.insert(
            "medium".to_string(),
            StepTypeConfig {
                max_duration: Some(2000.0),
                rules: RuleOverrides::default(),
            },
        );
        step_types.insert(
            "slow".to_string(),
            StepTypeConfig {
                max_duration: None,
                rules: RuleOverrides {
                    min_absolute_slowdown: Some(50.0),
                    ..RuleOverrides::default()
                },
            },
        );
        step_types
    }
}

/// One duration band and its rule adjustments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTypeConfig {
    /// Upper duration bound for the band; absent means unbounded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,
    /// Rule adjustments applied when this band is the base type
    pub rules: RuleOverrides,
}

/// The complete rule set the classifier evaluates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// Minimum slowdown as a percentage of the baseline average
    pub min_percentage_change: f64,
    /// Minimum absolute slowdown in milliseconds
    pub min_absolute_slowdown: f64,
    /// Require trend corroboration for modest slowdowns
    pub check_trends: bool,
    /// Slowdown below which an insignificant trend downgrades the finding
    pub trend_sensitivity: f64,
    /// Suppress small regressions on historically stable steps
    pub filter_stable_steps: bool,
    /// Standard deviation below which a step counts as stable
    pub stable_threshold: f64,
    /// Minimum slowdown for a stable step to still regress
    pub stable_min_slowdown: f64,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            min_percentage_change: 10.0,
            min_absolute_slowdown: 20.0,
            check_trends: true,
            trend_sensitivity: 30.0,
            filter_stable_steps: true,
            stable_threshold: 5.0,
            stable_min_slowdown: 25.0,
        }
    }
}

/// Partial rule adjustments; unset fields inherit from the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleOverrides {
    /// Override for [`RuleSet::min_percentage_change`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_percentage_change: Option<f64>,
    /// Override for [`RuleSet::min_absolute_slowdown`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_absolute_slowdown: Option<f64>,
    /// Override for [`RuleSet::check_trends`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_trends: Option<bool>,
    /// Override for [`RuleSet::trend_sensitivity`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_sensitivity: Option<f64>,
    /// Override for [`RuleSet::filter_stable_steps`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_stable_steps: Option<bool>,
    /// Override for [`RuleSet::stable_threshold`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_threshold: Option<f64>,
    /// Override for [`RuleSet::stable_min_slowdown`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_min_slowdown: Option<f64>,
}

impl RuleOverrides {
    /// Apply the set fields onto a concrete rule set.
    pub fn apply(&self, rules: &mut RuleSet) {
        if let Some(value) = self.min_percentage_change {
            rules.min_percentage_change = value;
        }
        if let Some(value) = self.min_absolute_slowdown {
            rules.min_absolute_slowdown = value;
        }
        if let Some(value) = self.check_trends {
            rules.check_trends = value;
        }
        if let Some(value) = self.trend_sensitivity {
            rules.trend_sensitivity = value;
        }
        if let Some(value) = self.filter_stable_steps {
            rules.filter_stable_steps = value;
        }
        if let Some(value) = self.stable_threshold {
            rules.stable_threshold = value;
        }
        if let Some(value) = self.stable_min_slowdown {
            rules.stable_min_slowdown = value;
        }
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Trend (drift) detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Master switch for drift detection
    pub enabled: bool,
    /// Number of samples per comparison window
    pub window_size: usize,
    /// Minimum absolute change for significance
    pub min_significance: f64,
    /// Minimum baseline length before trends are evaluated
    pub min_history_required: usize,
    /// Report only upward (slower) drift
    pub only_upward: bool,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: 3,
            min_significance: 10.0,
            min_history_required: 6,
            only_upward: true,
        }
    }
}

/// Per-step override, the highest-priority configuration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOverride {
    /// Explicit step-type assignment replacing the duration-band selection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    /// Threshold override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Rule adjustments
    pub rules: RuleOverrides,
}

/// Suite- or tag-scoped override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopedOverride {
    /// Threshold override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// Rule adjustments
    pub rules: RuleOverrides,
}

/// Storage backend selection and settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend choice; `auto` infers from the supplied settings
    pub adapter_type: AdapterTypeChoice,
    /// Filesystem adapter settings
    pub filesystem: FilesystemStorageConfig,
    /// Document-database adapter settings
    pub database: DatabaseStorageConfig,
    /// Object-store adapter settings
    pub s3: S3StorageConfig,
    /// Retention windows used by the cleanup engine
    pub retention: RetentionConfig,
}

/// Storage backend choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterTypeChoice {
    /// Infer: database when a connection string is set, else s3 when a
    /// bucket is set, else filesystem
    #[default]
    Auto,
    /// Project-rooted directory tree of JSON files
    Filesystem,
    /// Document database
    Database,
    /// S3-style object store
    S3,
}

/// Filesystem adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemStorageConfig {
    /// Root of the project-keyed directory tree
    pub base_directory: std::path::PathBuf,
}

impl Default for FilesystemStorageConfig {
    fn default() -> Self {
        Self {
            base_directory: std::path::PathBuf::from(".heimdall"),
        }
    }
}

/// Document-database adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseStorageConfig {
    /// Connection string; required when the database adapter is selected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    /// Database name
    pub name: String,
}

impl Default for DatabaseStorageConfig {
    fn default() -> Self {
        Self {
            connection: None,
            name: "heimdall".to_string(),
        }
    }
}

/// Object-store adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3StorageConfig {
    /// Bucket holding all project documents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Bucket region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Key prefix under which all project documents live
    pub prefix: String,
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            bucket_name: None,
            region: None,
            prefix: "heimdall".to_string(),
        }
    }
}

/// Retention windows used by the cleanup engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Maximum age of archived runs, in days
    pub runs_days: u32,
    /// Maximum age of job records, in days
    pub jobs_days: u32,
    /// Maximum age of completed or failed job records, in days
    pub finished_jobs_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            runs_days: 30,
            jobs_days: 7,
            finished_jobs_days: 1,
        }
    }
}

/// Report emission settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingConfig {
    /// Reporters run when the CLI does not override them
    pub default_reporters: Vec<String>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            default_reporters: vec!["console".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        HeimdallConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_non_positive_threshold() {
        let mut config = HeimdallConfig::default();
        config.analysis.threshold = 0.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HeimdallError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_max_history() {
        let mut config = HeimdallConfig::default();
        config.analysis.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_connection_for_database_adapter() {
        let mut config = HeimdallConfig::default();
        config.storage.adapter_type = AdapterTypeChoice::Database;
        assert!(config.validate().is_err());

        config.storage.database.connection = Some("mongodb://localhost:27017".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_reporters() {
        let mut config = HeimdallConfig::default();
        config.reporting.default_reporters.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rule_overrides_apply_partially() {
        let mut rules = RuleSet::default();
        let overrides = RuleOverrides {
            min_percentage_change: Some(1.0),
            min_absolute_slowdown: Some(5.0),
            ..RuleOverrides::default()
        };
        overrides.apply(&mut rules);
        assert_eq!(rules.min_percentage_change, 1.0);
        assert_eq!(rules.min_absolute_slowdown, 5.0);
        assert_eq!(rules.stable_threshold, RuleSet::default().stable_threshold);
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = HeimdallConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: HeimdallConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, restored);
    }
}
