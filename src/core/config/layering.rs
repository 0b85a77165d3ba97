//! Layered configuration loading.
//!
//! Resolution order, later layers winning: embedded defaults, user file,
//! selected environment overrides, selected profile overrides, CLI overrides
//! mapped to fixed dotted paths, then `${VAR}` interpolation against the
//! process environment. Merging recurses through mappings; sequences and
//! scalars are replaced, never concatenated. The merged raw document is kept
//! alongside the typed view so unknown keys survive a round-trip.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};

use crate::core::config::HeimdallConfig;
use crate::core::errors::{HeimdallError, Result};

/// CLI overrides mapped onto fixed configuration paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    /// `--threshold` → `analysis.threshold`
    pub threshold: Option<f64>,
    /// `--max-history` → `analysis.max_history`
    pub max_history: Option<usize>,
    /// `--project-id` → `project.id`
    pub project_id: Option<String>,
    /// `--db-connection` → `storage.database.connection`
    pub db_connection: Option<String>,
    /// `--bucket-name` → `storage.s3.bucket_name`
    pub bucket_name: Option<String>,
    /// `--reporter …` → `reporting.default_reporters`
    pub reporters: Vec<String>,
}

impl CliOverrides {
    fn dotted_values(&self) -> Vec<(&'static str, Value)> {
        let mut values = Vec::new();
        if let Some(threshold) = self.threshold {
            values.push(("analysis.threshold", Value::from(threshold)));
        }
        if let Some(max_history) = self.max_history {
            values.push(("analysis.max_history", Value::from(max_history as u64)));
        }
        if let Some(project_id) = &self.project_id {
            values.push(("project.id", Value::from(project_id.clone())));
        }
        if let Some(connection) = &self.db_connection {
            values.push(("storage.database.connection", Value::from(connection.clone())));
        }
        if let Some(bucket) = &self.bucket_name {
            values.push(("storage.s3.bucket_name", Value::from(bucket.clone())));
        }
        if !self.reporters.is_empty() {
            let reporters: Vec<Value> = self.reporters.iter().cloned().map(Value::from).collect();
            values.push(("reporting.default_reporters", Value::Sequence(reporters)));
        }
        values
    }
}

/// The product of layered resolution: the validated typed view plus the
/// merged raw document (unknown keys included) and the legacy history-file
/// target when one was supplied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Validated configuration consumed by the engine and storage layer
    pub config: HeimdallConfig,
    /// Merged raw document, preserved for round-trips
    pub raw: Value,
    /// Explicit single-file history target (legacy surface)
    pub history_file: Option<PathBuf>,
}

/// Builder for layered configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: Option<String>,
    profile: Option<String>,
    overrides: CliOverrides,
    history_file: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a loader with no file, selections, or overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a user configuration file.
    pub fn with_file(mut self, path: Option<PathBuf>) -> Self {
        self.file = path;
        self
    }

    /// Select an environment override set.
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    /// Select a profile override set.
    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    /// Attach CLI overrides.
    pub fn with_overrides(mut self, overrides: CliOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Attach a legacy single-file history target.
    pub fn with_history_file(mut self, path: Option<PathBuf>) -> Self {
        self.history_file = path;
        self
    }

    /// Resolve against the process environment.
    pub fn load(&self) -> Result<ResolvedConfig> {
        self.load_with_lookup(&|name| std::env::var(name).ok())
    }

    /// Resolve with an explicit environment-variable lookup (testable).
    pub fn load_with_lookup(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<ResolvedConfig> {
        let mut raw = serde_yaml::to_value(HeimdallConfig::default())?;

        if let Some(path) = &self.file {
            let overlay = read_yaml_file(path)?;
            deep_merge(&mut raw, &overlay);
        }

        if let Some(environment) = &self.environment {
            let overlay = select_fragment(&raw, "environments", environment).ok_or_else(|| {
                HeimdallError::config_field(
                    format!("unknown environment '{environment}'"),
                    format!("environments.{environment}"),
                )
            })?;
            deep_merge(&mut raw, &overlay);
        }

        if let Some(profile) = &self.profile {
            let overlay = select_fragment(&raw, "profiles", profile)
                .or_else(|| built_in_profiles().swap_remove(profile.as_str()))
                .ok_or_else(|| {
                    HeimdallError::config_field(
                        format!("unknown profile '{profile}'"),
                        format!("profiles.{profile}"),
                    )
                })?;
            deep_merge(&mut raw, &overlay);
        }

        for (path, value) in self.overrides.dotted_values() {
            set_dotted_path(&mut raw, path, value);
        }

        raw = interpolate_env(raw, lookup);

        let config: HeimdallConfig = serde_yaml::from_value(raw.clone())
            .map_err(|e| HeimdallError::config(format!("configuration is malformed: {e}")))?;
        config.validate()?;

        Ok(ResolvedConfig {
            config,
            raw,
            history_file: self.history_file.clone(),
        })
    }
}

/// Render the embedded defaults as a YAML document.
pub fn default_config_yaml() -> Result<String> {
    Ok(serde_yaml::to_string(&HeimdallConfig::default())?)
}

fn read_yaml_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        HeimdallError::io(format!("failed to read config file: {}", path.display()), e)
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        HeimdallError::config(format!("{} is not valid YAML: {e}", path.display()))
    })
}

fn select_fragment(raw: &Value, section: &str, name: &str) -> Option<Value> {
    raw.get(section)?.get(name).cloned()
}

/// Deep-merge `overlay` into `base`: mappings recurse, everything else
/// (sequences included) replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Set a dotted path, creating intermediate mappings as needed.
pub fn set_dotted_path(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        if !matches!(current, Value::Mapping(_)) {
            *current = Value::Mapping(Mapping::new());
        }
        let Value::Mapping(map) = current else {
            unreachable!()
        };
        let key = Value::from(*segment);
        if index == segments.len() - 1 {
            map.insert(key, value);
            return;
        }
        current = map
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
}

/// Interpolate `${VAR}` and `${VAR:-default}` references in every string of
/// the document. A miss without a default leaves the literal intact.
pub fn interpolate_env(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::String(text) => Value::String(interpolate_str(&text, lookup)),
        Value::Sequence(items) => Value::Sequence(
            items
                .into_iter()
                .map(|item| interpolate_env(item, lookup))
                .collect(),
        ),
        Value::Mapping(map) => {
            let mut interpolated = Mapping::with_capacity(map.len());
            for (key, entry) in map {
                interpolated.insert(interpolate_env(key, lookup), interpolate_env(entry, lookup));
            }
            Value::Mapping(interpolated)
        }
        other => other,
    }
}

fn interpolate_str(text: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let reference = &rest[start..];
        match reference.find('}') {
            Some(end) => {
                let body = &reference[2..end];
                let (name, default) = match body.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (body, None),
                };
                match lookup(name).or_else(|| default.map(str::to_string)) {
                    Some(resolved) => output.push_str(&resolved),
                    None => output.push_str(&reference[..=end]),
                }
                rest = &reference[end + 1..];
            }
            None => {
                output.push_str(reference);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

/// Built-in profile override sets.
pub fn built_in_profiles() -> IndexMap<String, Value> {
    const PROFILES: &str = r#"
strict:
  analysis:
    threshold: 1.5
    global_rules:
      min_percentage_change: 5.0
      min_absolute_slowdown: 10.0
lenient:
  analysis:
    threshold: 3.0
    global_rules:
      min_percentage_change: 20.0
      min_absolute_slowdown: 50.0
ci_focused:
  analysis:
    threshold: 2.5
    global_rules:
      filter_stable_steps: true
      stable_min_slowdown: 40.0
    trends:
      enabled: true
      min_history_required: 4
"#;
    serde_yaml::from_str(PROFILES).unwrap_or_default()
}
