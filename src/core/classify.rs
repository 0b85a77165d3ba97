//! Step classification: ok, new, regression, and drift.
//!
//! The classifier evaluates one sample against its baseline under an
//! effective configuration. Drift is measured independently of the
//! regression decision; the two are not mutually exclusive.

use serde::{Deserialize, Serialize};

use crate::core::config::{EffectiveStepConfig, TrendConfig};
use crate::core::history::HistoryEntry;
use crate::core::stats::{self, TrendOptions};

/// The regression decision for one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDisposition {
    /// Within the baseline envelope, or downgraded by a rule filter
    Ok,
    /// First observation of this step
    New,
    /// Significantly slower than the baseline under the effective rules
    Regression(RegressionDetail),
}

/// Details carried by a regression finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionDetail {
    /// Baseline average at evaluation time
    pub baseline_average: f64,
    /// Baseline sample standard deviation at evaluation time
    pub baseline_std_dev: f64,
    /// Absolute slowdown over the baseline average, in milliseconds
    pub slowdown: f64,
    /// Slowdown as a percentage of the baseline average
    pub percentage: f64,
}

/// Details carried by a drift finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftDetail {
    /// Mean shift between the two most recent windows
    pub trend: f64,
    /// Window size the shift was measured over
    pub window: usize,
}

/// Combined classification of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// The regression decision
    pub disposition: StepDisposition,
    /// Independent drift finding, when trends are enabled and significant
    pub drift: Option<DriftDetail>,
}

/// Classify one sample against its baseline.
///
/// A sample with no baseline is `New`. Otherwise the basic predicate
/// `duration > average + threshold · stdDev` opens a regression candidate,
/// which the rule filters may downgrade back to `Ok`: percentage floor,
/// absolute-slowdown floor, trend corroboration for modest slowdowns, and
/// the stable-step filter, in that order. A baseline holding exactly one
/// sample never regresses.
pub fn classify(
    duration: f64,
    entry: Option<&HistoryEntry>,
    effective: &EffectiveStepConfig,
    trends: &TrendConfig,
) -> Classification {
    let Some(entry) = entry else {
        return Classification {
            disposition: StepDisposition::New,
            drift: None,
        };
    };

    let drift = measure_drift(entry, trends);
    let disposition = regression_disposition(duration, entry, effective, trends);

    Classification { disposition, drift }
}

fn regression_disposition(
    duration: f64,
    entry: &HistoryEntry,
    effective: &EffectiveStepConfig,
    trends: &TrendConfig,
) -> StepDisposition {
    // First run after seeding: a single-sample baseline has no spread to
    // judge against.
    if entry.durations.len() < 2 {
        return StepDisposition::Ok;
    }

    let average = entry.average;
    let slowdown = duration - average;
    let percentage = if average > 0.0 {
        slowdown / average * 100.0
    } else {
        0.0
    };

    if duration <= average + effective.threshold * entry.std_dev {
        return StepDisposition::Ok;
    }

    let rules = &effective.rules;
    if percentage < rules.min_percentage_change {
        return StepDisposition::Ok;
    }
    if slowdown < rules.min_absolute_slowdown {
        return StepDisposition::Ok;
    }
    if rules.check_trends && entry.durations.len() >= trends.min_history_required {
        let measure = stats::trend(
            &entry.durations,
            &TrendOptions {
                window: trends.window_size,
                min_significance: trends.min_significance,
            },
        );
        if !measure.significant && slowdown < rules.trend_sensitivity {
            return StepDisposition::Ok;
        }
    }
    if rules.filter_stable_steps
        && entry.std_dev < rules.stable_threshold
        && slowdown < rules.stable_min_slowdown
    {
        return StepDisposition::Ok;
    }

    StepDisposition::Regression(RegressionDetail {
        baseline_average: average,
        baseline_std_dev: entry.std_dev,
        slowdown,
        percentage,
    })
}

/// Measure drift over the baseline durations as they stood before the
/// current sample is absorbed.
fn measure_drift(entry: &HistoryEntry, trends: &TrendConfig) -> Option<DriftDetail> {
    if !trends.enabled || entry.durations.len() < trends.min_history_required {
        return None;
    }
    let measure = stats::trend(
        &entry.durations,
        &TrendOptions {
            window: trends.window_size,
            min_significance: trends.min_significance,
        },
    );
    if !measure.significant {
        return None;
    }
    if trends.only_upward && measure.trend < 0.0 {
        return None;
    }
    Some(DriftDetail {
        trend: measure.trend,
        window: trends.window_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::HeimdallConfig;
    use crate::core::telemetry::StepContext;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn entry(durations: &[f64]) -> HistoryEntry {
        HistoryEntry::from_durations(durations.to_vec(), Utc::now())
    }

    fn effective(average: f64) -> EffectiveStepConfig {
        HeimdallConfig::default().effective_step_config("step", average, &StepContext::default())
    }

    fn trends() -> TrendConfig {
        TrendConfig::default()
    }

    #[test]
    fn test_missing_baseline_is_new() {
        let classification = classify(100.0, None, &effective(100.0), &trends());
        assert_eq!(classification.disposition, StepDisposition::New);
        assert!(classification.drift.is_none());
    }

    #[test]
    fn test_within_envelope_is_ok() {
        let baseline = entry(&[150.0, 155.0, 148.0]);
        let classification = classify(152.0, Some(&baseline), &effective(baseline.average), &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);
    }

    #[test]
    fn test_clear_regression() {
        let baseline = entry(&[540.0, 545.0, 542.0]);
        let classification = classify(680.0, Some(&baseline), &effective(baseline.average), &trends());
        match classification.disposition {
            StepDisposition::Regression(detail) => {
                assert_relative_eq!(detail.slowdown, 680.0 - baseline.average, epsilon = 1e-9);
                assert!(detail.percentage > 25.0 && detail.percentage < 26.0);
            }
            other => panic!("expected regression, got {other:?}"),
        }
    }

    #[test]
    fn test_absolute_slowdown_floor_suppresses() {
        let baseline = entry(&[30.0, 32.0, 31.0, 33.0, 32.0]);
        let mut effective = effective(baseline.average);
        effective.rules.min_absolute_slowdown = 15.0;

        let classification = classify(45.0, Some(&baseline), &effective, &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);
    }

    #[test]
    fn test_percentage_floor_suppresses() {
        let baseline = entry(&[1000.0, 1002.0, 998.0]);
        let mut effective = effective(baseline.average);
        effective.rules.min_percentage_change = 10.0;
        effective.rules.min_absolute_slowdown = 5.0;

        // Roughly 5% slower: beyond the sigma envelope but under the
        // percentage floor.
        let classification = classify(1050.0, Some(&baseline), &effective, &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);
    }

    #[test]
    fn test_seeded_baseline_never_regresses() {
        let baseline = entry(&[100.0]);
        let classification = classify(10_000.0, Some(&baseline), &effective(100.0), &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);
    }

    #[test]
    fn test_drift_detected_without_regression() {
        let baseline = entry(&[100.0, 102.0, 104.0, 118.0, 120.0, 122.0]);
        let classification = classify(115.0, Some(&baseline), &effective(baseline.average), &trends());

        assert_eq!(classification.disposition, StepDisposition::Ok);
        let drift = classification.drift.expect("drift expected");
        assert_relative_eq!(drift.trend, 18.0, epsilon = 1e-9);
        assert_eq!(drift.window, 3);
    }

    #[test]
    fn test_downward_drift_hidden_when_only_upward() {
        let baseline = entry(&[122.0, 120.0, 118.0, 104.0, 102.0, 100.0]);
        let classification = classify(100.0, Some(&baseline), &effective(baseline.average), &trends());
        assert!(classification.drift.is_none());

        let mut both_ways = trends();
        both_ways.only_upward = false;
        let classification = classify(100.0, Some(&baseline), &effective(baseline.average), &both_ways);
        assert!(classification.drift.is_some());
    }

    #[test]
    fn test_drift_requires_minimum_history() {
        let baseline = entry(&[100.0, 120.0, 140.0]);
        let classification = classify(150.0, Some(&baseline), &effective(baseline.average), &trends());
        assert!(classification.drift.is_none());
    }

    #[test]
    fn test_stable_filter_suppresses_small_slowdowns() {
        // Very tight baseline: stddev under the stable threshold.
        let baseline = entry(&[100.0, 100.5, 100.2, 99.8, 100.1]);
        let mut effective = effective(baseline.average);
        effective.rules.min_percentage_change = 5.0;
        effective.rules.min_absolute_slowdown = 5.0;
        effective.rules.check_trends = false;

        // 15 ms over: clears the floors but not the stable-step minimum.
        let classification = classify(115.0, Some(&baseline), &effective, &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);

        // 40 ms over: clears the stable-step minimum too.
        let classification = classify(140.0, Some(&baseline), &effective, &trends());
        assert!(matches!(
            classification.disposition,
            StepDisposition::Regression(_)
        ));
    }

    #[test]
    fn test_tag_override_enables_stricter_detection() {
        use crate::core::config::{RuleOverrides, ScopedOverride};

        // Baseline with moderate spread; 9% slowdown stays under the
        // default floors but the @critical override catches it.
        let baseline = entry(&[200.0, 204.0, 196.0, 202.0, 198.0]);
        let duration = 218.0;

        let config = HeimdallConfig::default();
        let default_effective =
            config.effective_step_config("step", baseline.average, &StepContext::default());
        let classification = classify(duration, Some(&baseline), &default_effective, &trends());
        assert_eq!(classification.disposition, StepDisposition::Ok);

        let mut strict = HeimdallConfig::default();
        strict.analysis.tag_overrides.insert(
            "@critical".to_string(),
            ScopedOverride {
                threshold: None,
                rules: RuleOverrides {
                    min_percentage_change: Some(1.0),
                    min_absolute_slowdown: Some(5.0),
                    stable_min_slowdown: Some(5.0),
                    trend_sensitivity: Some(5.0),
                    ..RuleOverrides::default()
                },
            },
        );
        let context = StepContext {
            suite: "authentication".to_string(),
            tags: vec!["@critical".to_string()],
            ..StepContext::default()
        };
        let strict_effective = strict.effective_step_config("step", baseline.average, &context);
        let classification = classify(duration, Some(&baseline), &strict_effective, &trends());
        assert!(matches!(
            classification.disposition,
            StepDisposition::Regression(_)
        ));
    }
}
