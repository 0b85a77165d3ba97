//! Context-aware effective configuration.
//!
//! The classifier never reads the global configuration directly: for each
//! step it receives an [`EffectiveStepConfig`] layered from the duration-band
//! step type, the suite override, tag overrides in context order, and the
//! step-specific override. Later layers win.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::config::{
    AdapterTypeChoice, HeimdallConfig, RetentionConfig, RuleSet, StepTypeConfig,
};
use crate::core::telemetry::StepContext;

/// The configuration a single classification runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveStepConfig {
    /// Standard-deviation multiplier for the basic regression predicate
    pub threshold: f64,
    /// Fully resolved rule set
    pub rules: RuleSet,
    /// Name of the base step type the resolution started from
    pub step_type: String,
    /// Applied layers, outermost last (`step_type:…`, `suite:…`, `tag:…`, `step`)
    pub provenance: Vec<String>,
}

impl EffectiveStepConfig {
    /// Serializable summary attached to regression records.
    pub fn applied(&self) -> AppliedConfig {
        AppliedConfig {
            step_type: self.step_type.clone(),
            threshold: self.threshold,
            rules: self.rules.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

/// Serializable summary of the configuration a finding was produced under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedConfig {
    /// Base step type name
    pub step_type: String,
    /// Resolved threshold
    pub threshold: f64,
    /// Resolved rule set
    pub rules: RuleSet,
    /// Applied layers, outermost last
    pub provenance: Vec<String>,
}

impl HeimdallConfig {
    /// Resolve the effective configuration for one step under its context.
    ///
    /// Precedence, later wins: base step type selected by the baseline
    /// average (or named by a step override), suite override, tag overrides
    /// in the order the context lists them, then the step-specific override.
    pub fn effective_step_config(
        &self,
        step_text: &str,
        average: f64,
        context: &StepContext,
    ) -> EffectiveStepConfig {
        let analysis = &self.analysis;
        let step_override = analysis.step_overrides.get(step_text);

        let (type_name, step_type) = step_override
            .and_then(|o| o.step_type.as_deref())
            .and_then(|name| analysis.step_types.get(name).map(|t| (name, t)))
            .unwrap_or_else(|| self.base_step_type(average));

        let mut threshold = analysis.threshold;
        let mut rules = analysis.global_rules.clone();
        let mut provenance = vec![format!("step_type:{type_name}")];
        step_type.rules.apply(&mut rules);

        if let Some(suite_override) = analysis.suite_overrides.get(&context.suite) {
            if let Some(value) = suite_override.threshold {
                threshold = value;
            }
            suite_override.rules.apply(&mut rules);
            provenance.push(format!("suite:{}", context.suite));
        }

        for tag in &context.tags {
            if let Some(tag_override) = analysis.tag_overrides.get(tag) {
                if let Some(value) = tag_override.threshold {
                    threshold = value;
                }
                tag_override.rules.apply(&mut rules);
                provenance.push(format!("tag:{tag}"));
            }
        }

        if let Some(step_override) = step_override {
            if let Some(value) = step_override.threshold {
                threshold = value;
            }
            step_override.rules.apply(&mut rules);
            provenance.push("step".to_string());
        }

        EffectiveStepConfig {
            threshold,
            rules,
            step_type: type_name.to_string(),
            provenance,
        }
    }

    /// Select the duration band for a baseline average: the tightest
    /// `max_duration` that still covers it, falling back to the unbounded
    /// band (conventionally `slow`).
    fn base_step_type(&self, average: f64) -> (&str, &StepTypeConfig) {
        let mut banded: Vec<(&str, &StepTypeConfig, f64)> = Vec::new();
        let mut unbounded: Option<(&str, &StepTypeConfig)> = None;
        for (name, step_type) in &self.analysis.step_types {
            match step_type.max_duration {
                Some(max) => banded.push((name.as_str(), step_type, max)),
                None => {
                    if unbounded.is_none() {
                        unbounded = Some((name.as_str(), step_type));
                    }
                }
            }
        }
        banded.sort_by(|a, b| a.2.total_cmp(&b.2));

        banded
            .iter()
            .find(|(_, _, max)| average <= *max)
            .map(|(name, step_type, _)| (*name, *step_type))
            .or(unbounded)
            .unwrap_or(("slow", &DEFAULT_STEP_TYPE))
    }

    /// Flattened storage options used to instantiate an adapter.
    pub fn storage_options(&self) -> StorageOptions {
        StorageOptions {
            adapter: self.storage.adapter_type,
            base_directory: self.storage.filesystem.base_directory.clone(),
            history_file: None,
            connection: self.storage.database.connection.clone(),
            database_name: self.storage.database.name.clone(),
            bucket_name: self.storage.s3.bucket_name.clone(),
            region: self.storage.s3.region.clone(),
            prefix: self.storage.s3.prefix.clone(),
            retention: self.storage.retention.clone(),
        }
    }
}

static DEFAULT_STEP_TYPE: StepTypeConfig = StepTypeConfig {
    max_duration: None,
    rules: crate::core::config::RuleOverrides {
        min_percentage_change: None,
        min_absolute_slowdown: None,
        check_trends: None,
        trend_sensitivity: None,
        filter_stable_steps: None,
        stable_threshold: None,
        stable_min_slowdown: None,
    },
};

/// Flattened view of the storage section used by the storage service.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageOptions {
    /// Raw adapter choice; resolve with [`StorageOptions::resolved_adapter`]
    pub adapter: AdapterTypeChoice,
    /// Filesystem base directory
    pub base_directory: PathBuf,
    /// Explicit single-file history target (legacy surface)
    pub history_file: Option<PathBuf>,
    /// Document-database connection string
    pub connection: Option<String>,
    /// Document-database name
    pub database_name: String,
    /// Object-store bucket
    pub bucket_name: Option<String>,
    /// Object-store region
    pub region: Option<String>,
    /// Object-store key prefix
    pub prefix: String,
    /// Retention windows for the cleanup engine
    pub retention: RetentionConfig,
}

impl StorageOptions {
    /// Attach a legacy history-file target, which pins the filesystem
    /// adapter.
    pub fn with_history_file(mut self, path: Option<PathBuf>) -> Self {
        if path.is_some() {
            self.history_file = path;
            self.adapter = AdapterTypeChoice::Filesystem;
        }
        self
    }

    /// Resolve the adapter decision: an explicit choice wins; otherwise
    /// `database` when a connection string was supplied, `s3` when a bucket
    /// was supplied, `filesystem` as the default.
    pub fn resolved_adapter(&self) -> AdapterTypeChoice {
        match self.adapter {
            AdapterTypeChoice::Auto => {
                if self.connection.is_some() {
                    AdapterTypeChoice::Database
                } else if self.bucket_name.is_some() {
                    AdapterTypeChoice::S3
                } else {
                    AdapterTypeChoice::Filesystem
                }
            }
            explicit => explicit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{RuleOverrides, ScopedOverride, StepOverride};

    fn context_with(suite: &str, tags: &[&str]) -> StepContext {
        StepContext {
            suite: suite.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..StepContext::default()
        }
    }

    #[test]
    fn test_base_step_type_banding() {
        let config = HeimdallConfig::default();
        let context = StepContext::default();
        assert_eq!(
            config.effective_step_config("x", 50.0, &context).step_type,
            "very_fast"
        );
        assert_eq!(
            config.effective_step_config("x", 450.0, &context).step_type,
            "fast"
        );
        assert_eq!(
            config.effective_step_config("x", 1500.0, &context).step_type,
            "medium"
        );
        assert_eq!(
            config.effective_step_config("x", 30_000.0, &context).step_type,
            "slow"
        );
    }

    #[test]
    fn test_precedence_step_over_tag_over_suite() {
        let mut config = HeimdallConfig::default();
        config.analysis.suite_overrides.insert(
            "authentication".to_string(),
            ScopedOverride {
                threshold: Some(3.0),
                rules: RuleOverrides {
                    min_percentage_change: Some(20.0),
                    ..RuleOverrides::default()
                },
            },
        );
        config.analysis.tag_overrides.insert(
            "@critical".to_string(),
            ScopedOverride {
                threshold: Some(1.5),
                rules: RuleOverrides {
                    min_percentage_change: Some(5.0),
                    ..RuleOverrides::default()
                },
            },
        );
        config.analysis.step_overrides.insert(
            "I log in".to_string(),
            StepOverride {
                step_type: None,
                threshold: Some(1.0),
                rules: RuleOverrides {
                    min_percentage_change: Some(1.0),
                    ..RuleOverrides::default()
                },
            },
        );

        let context = context_with("authentication", &["@critical"]);

        // Suite only
        let effective = config.effective_step_config("other step", 600.0, &context_with("authentication", &[]));
        assert_eq!(effective.threshold, 3.0);
        assert_eq!(effective.rules.min_percentage_change, 20.0);

        // Tag beats suite
        let effective = config.effective_step_config("other step", 600.0, &context);
        assert_eq!(effective.threshold, 1.5);
        assert_eq!(effective.rules.min_percentage_change, 5.0);

        // Step override beats everything
        let effective = config.effective_step_config("I log in", 600.0, &context);
        assert_eq!(effective.threshold, 1.0);
        assert_eq!(effective.rules.min_percentage_change, 1.0);
        assert_eq!(
            effective.provenance,
            vec!["step_type:medium", "suite:authentication", "tag:@critical", "step"]
        );
    }

    #[test]
    fn test_later_tags_win_over_earlier() {
        let mut config = HeimdallConfig::default();
        config.analysis.tag_overrides.insert(
            "@smoke".to_string(),
            ScopedOverride {
                threshold: Some(2.5),
                rules: RuleOverrides::default(),
            },
        );
        config.analysis.tag_overrides.insert(
            "@critical".to_string(),
            ScopedOverride {
                threshold: Some(1.5),
                rules: RuleOverrides::default(),
            },
        );

        let effective = config.effective_step_config(
            "x",
            600.0,
            &context_with("unknown", &["@smoke", "@critical"]),
        );
        assert_eq!(effective.threshold, 1.5);

        let effective = config.effective_step_config(
            "x",
            600.0,
            &context_with("unknown", &["@critical", "@smoke"]),
        );
        assert_eq!(effective.threshold, 2.5);
    }

    #[test]
    fn test_step_override_can_rebase_step_type() {
        let mut config = HeimdallConfig::default();
        config.analysis.step_overrides.insert(
            "I wait".to_string(),
            StepOverride {
                step_type: Some("slow".to_string()),
                threshold: None,
                rules: RuleOverrides::default(),
            },
        );

        let effective = config.effective_step_config("I wait", 50.0, &StepContext::default());
        assert_eq!(effective.step_type, "slow");
        // The slow band raises the absolute-slowdown floor.
        assert_eq!(effective.rules.min_absolute_slowdown, 50.0);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut config = HeimdallConfig::default();
        config.analysis.tag_overrides.insert(
            "@critical".to_string(),
            ScopedOverride {
                threshold: Some(1.5),
                rules: RuleOverrides::default(),
            },
        );
        let context = context_with("unknown", &["@critical"]);
        let first = config.effective_step_config("x", 600.0, &context);
        let second = config.effective_step_config("x", 600.0, &context);
        assert_eq!(first, second);
    }

    #[test]
    fn test_adapter_inference() {
        let mut options = HeimdallConfig::default().storage_options();
        assert_eq!(options.resolved_adapter(), AdapterTypeChoice::Filesystem);

        options.bucket_name = Some("perf".to_string());
        assert_eq!(options.resolved_adapter(), AdapterTypeChoice::S3);

        options.connection = Some("mongodb://localhost".to_string());
        assert_eq!(options.resolved_adapter(), AdapterTypeChoice::Database);

        options.adapter = AdapterTypeChoice::Filesystem;
        assert_eq!(options.resolved_adapter(), AdapterTypeChoice::Filesystem);
    }

    #[test]
    fn test_history_file_pins_filesystem() {
        let options = HeimdallConfig::default()
            .storage_options()
            .with_history_file(Some(PathBuf::from("history.json")));
        assert_eq!(options.resolved_adapter(), AdapterTypeChoice::Filesystem);
        assert!(options.history_file.is_some());
    }
}
