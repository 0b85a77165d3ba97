//! Rolling baselines: per-step history entries and the per-project document.
//!
//! The history document is exclusively owned by the storage adapter for a
//! given project; the analysis engine operates on a deep copy and returns
//! the successor. The wire format maps step text directly to entries, with
//! one reserved `suiteHistory` key; unknown top-level keys round-trip
//! untouched.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::core::stats;
use crate::core::telemetry::StepContext;

/// Reserved top-level key for suite-level history.
const SUITE_HISTORY_KEY: &str = "suiteHistory";

/// Number of suite-history entries retained per suite.
pub const SUITE_HISTORY_WINDOW: usize = 20;

/// The rolling baseline for one step within one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Most recent durations, oldest first, bounded by `max_history`
    pub durations: Vec<f64>,
    /// Mean of `durations`
    pub average: f64,
    /// Sample standard deviation of `durations` (zero below two samples)
    pub std_dev: f64,
    /// Last-seen context with tags accumulated across all observations
    pub context: StepContext,
    /// First observation instant
    pub first_seen: DateTime<Utc>,
    /// Most recent observation instant
    pub last_seen: DateTime<Utc>,
    /// Unknown entry fields, preserved through round-trips
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl HistoryEntry {
    /// Create a baseline from a single observed sample.
    pub fn seeded(duration: f64, context: StepContext, now: DateTime<Utc>) -> Self {
        Self {
            durations: vec![duration],
            average: duration,
            std_dev: 0.0,
            context,
            first_seen: now,
            last_seen: now,
            extra: IndexMap::new(),
        }
    }

    /// Rebuild a baseline from raw durations, computing the derived
    /// statistics once. Used when seeding history from archived runs.
    pub fn from_durations(durations: Vec<f64>, now: DateTime<Utc>) -> Self {
        let average = stats::mean(&durations);
        let std_dev = stats::sample_std_dev(&durations, average);
        Self {
            durations,
            average,
            std_dev,
            context: StepContext::default(),
            first_seen: now,
            last_seen: now,
            extra: IndexMap::new(),
        }
    }

    /// Absorb a new observation: append the duration, trim to `max_history`
    /// from the front, recompute the derived statistics, union-merge tags,
    /// and advance `last_seen`.
    pub fn absorb(
        &mut self,
        duration: f64,
        context: &StepContext,
        max_history: usize,
        now: DateTime<Utc>,
    ) {
        self.durations.push(duration);
        if max_history > 0 && self.durations.len() > max_history {
            let excess = self.durations.len() - max_history;
            self.durations.drain(..excess);
        }
        self.recompute();

        let prior_tags = std::mem::take(&mut self.context.tags);
        let mut merged = context.clone();
        merged.tags = prior_tags;
        merged.absorb_tags(&context.tags);
        self.context = merged;
        self.last_seen = now;
    }

    fn recompute(&mut self) {
        self.average = stats::mean(&self.durations);
        self.std_dev = stats::sample_std_dev(&self.durations, self.average);
    }
}

/// Bounded parallel sequences of suite-level statistics across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SuiteHistory {
    /// Average step duration observed per run
    pub avg_duration_history: Vec<f64>,
    /// Total step count observed per run
    pub total_steps_history: Vec<usize>,
    /// Regression rate observed per run
    pub regression_rate_history: Vec<f64>,
    /// Instant of the most recent append
    pub last_updated: DateTime<Utc>,
}

impl Default for SuiteHistory {
    fn default() -> Self {
        Self {
            avg_duration_history: Vec::new(),
            total_steps_history: Vec::new(),
            regression_rate_history: Vec::new(),
            last_updated: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl SuiteHistory {
    /// Append one run's statistics and truncate each parallel sequence to
    /// the retention window.
    pub fn record(
        &mut self,
        avg_duration: f64,
        total_steps: usize,
        regression_rate: f64,
        now: DateTime<Utc>,
    ) {
        self.avg_duration_history.push(avg_duration);
        self.total_steps_history.push(total_steps);
        self.regression_rate_history.push(regression_rate);
        trim_front(&mut self.avg_duration_history, SUITE_HISTORY_WINDOW);
        trim_front(&mut self.total_steps_history, SUITE_HISTORY_WINDOW);
        trim_front(&mut self.regression_rate_history, SUITE_HISTORY_WINDOW);
        self.last_updated = now;
    }
}

fn trim_front<T>(values: &mut Vec<T>, cap: usize) {
    if values.len() > cap {
        let excess = values.len() - cap;
        values.drain(..excess);
    }
}

/// Per-project mapping of step text to baseline, plus suite-level history.
///
/// Serializes as a flat object: one key per step, the reserved
/// `suiteHistory` key, and any unknown keys carried through verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryDocument {
    /// Baselines keyed by step text
    pub steps: IndexMap<String, HistoryEntry>,
    /// Suite-level history keyed by suite name
    pub suite_history: IndexMap<String, SuiteHistory>,
    /// Unknown top-level keys, preserved through round-trips
    pub extra: IndexMap<String, serde_json::Value>,
}

impl HistoryDocument {
    /// Whether the document holds no baselines, suite history, or extras.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.suite_history.is_empty() && self.extra.is_empty()
    }
}

impl Serialize for HistoryDocument {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut entries = self.steps.len() + self.extra.len();
        if !self.suite_history.is_empty() {
            entries += 1;
        }
        let mut map = serializer.serialize_map(Some(entries))?;
        for (step, entry) in &self.steps {
            map.serialize_entry(step, entry)?;
        }
        if !self.suite_history.is_empty() {
            map.serialize_entry(SUITE_HISTORY_KEY, &self.suite_history)?;
        }
        for (key, value) in &self.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HistoryDocument {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = IndexMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut document = HistoryDocument::default();

        for (key, value) in raw {
            if key == SUITE_HISTORY_KEY {
                document.suite_history = serde_json::from_value(value)
                    .map_err(|e| D::Error::custom(format!("invalid suiteHistory: {e}")))?;
                continue;
            }
            match serde_json::from_value::<HistoryEntry>(value.clone()) {
                Ok(entry) => {
                    document.steps.insert(key, entry);
                }
                // Forward compatibility: keys that do not parse as baselines
                // are carried through untouched.
                Err(_) => {
                    document.extra.insert(key, value);
                }
            }
        }
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn entry(durations: &[f64]) -> HistoryEntry {
        HistoryEntry::from_durations(durations.to_vec(), Utc::now())
    }

    #[test]
    fn test_seeded_entry_has_zero_std_dev() {
        let entry = HistoryEntry::seeded(120.0, StepContext::default(), Utc::now());
        assert_eq!(entry.durations, vec![120.0]);
        assert_eq!(entry.average, 120.0);
        assert_eq!(entry.std_dev, 0.0);
    }

    #[test]
    fn test_absorb_appends_and_recomputes() {
        let mut entry = entry(&[150.0, 155.0, 148.0]);
        entry.absorb(152.0, &StepContext::default(), 50, Utc::now());
        assert_eq!(entry.durations, vec![150.0, 155.0, 148.0, 152.0]);
        assert_relative_eq!(entry.average, 151.25, epsilon = 1e-9);
        assert!(entry.std_dev > 0.0);
    }

    #[test]
    fn test_absorb_trims_from_the_front() {
        let mut entry = entry(&[1.0, 2.0, 3.0]);
        entry.absorb(4.0, &StepContext::default(), 3, Utc::now());
        assert_eq!(entry.durations, vec![2.0, 3.0, 4.0]);
        assert_relative_eq!(entry.average, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_absorb_unions_tags_across_observations() {
        let mut entry = HistoryEntry::seeded(
            100.0,
            StepContext {
                tags: vec!["@smoke".to_string()],
                ..StepContext::default()
            },
            Utc::now(),
        );
        entry.absorb(
            110.0,
            &StepContext {
                tags: vec!["@critical".to_string()],
                ..StepContext::default()
            },
            50,
            Utc::now(),
        );
        assert_eq!(entry.context.tags, vec!["@smoke", "@critical"]);
    }

    #[test]
    fn test_suite_history_truncates_to_window() {
        let mut history = SuiteHistory::default();
        for i in 0..25 {
            history.record(i as f64, i, 0.0, Utc::now());
        }
        assert_eq!(history.avg_duration_history.len(), SUITE_HISTORY_WINDOW);
        assert_eq!(history.total_steps_history.len(), SUITE_HISTORY_WINDOW);
        assert_eq!(history.regression_rate_history.len(), SUITE_HISTORY_WINDOW);
        assert_relative_eq!(*history.avg_duration_history.last().unwrap(), 24.0);
        assert_relative_eq!(history.avg_duration_history[0], 5.0);
    }

    #[test]
    fn test_document_round_trip() {
        let mut document = HistoryDocument::default();
        document
            .steps
            .insert("I log in".to_string(), entry(&[540.0, 545.0, 542.0]));
        document
            .suite_history
            .insert("authentication".to_string(), SuiteHistory::default());

        let json = serde_json::to_string(&document).unwrap();
        let restored: HistoryDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(document, restored);
    }

    #[test]
    fn test_document_preserves_unknown_keys() {
        let json = r#"{
            "I log in": {
                "durations": [540.0, 545.0],
                "average": 542.5,
                "stdDev": 3.5355,
                "context": {},
                "firstSeen": "2026-07-01T10:00:00Z",
                "lastSeen": "2026-07-01T10:05:00Z",
                "futureField": {"nested": true}
            },
            "schemaVersion": 3,
            "suiteHistory": {}
        }"#;
        let document: HistoryDocument = serde_json::from_str(json).unwrap();
        assert_eq!(document.steps.len(), 1);
        assert_eq!(
            document.extra.get("schemaVersion"),
            Some(&serde_json::json!(3))
        );
        assert_eq!(
            document.steps["I log in"].extra.get("futureField"),
            Some(&serde_json::json!({"nested": true}))
        );

        let round_tripped = serde_json::to_value(&document).unwrap();
        assert_eq!(round_tripped["schemaVersion"], serde_json::json!(3));
        assert_eq!(
            round_tripped["I log in"]["futureField"],
            serde_json::json!({"nested": true})
        );
    }
}
