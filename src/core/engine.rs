//! Analysis engine: drives classification across a run and builds the
//! suite, tag, and critical-path roll-ups.
//!
//! The engine is single-threaded and deterministic: given the same run,
//! history, configuration, and injected timestamp it always produces the
//! same report and successor history. History updates follow sample order,
//! so later samples of the same step observe averages already influenced by
//! earlier samples of the same run; that order sensitivity is part of the
//! contract.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::core::classify::{self, StepDisposition};
use crate::core::config::HeimdallConfig;
use crate::core::history::{HistoryDocument, HistoryEntry, SuiteHistory};
use crate::core::report::{
    CriticalIssueKind, CriticalPath, CriticalPathIssue, DriftRecord, Priority, Recommendation,
    RegressionRecord, Report, ReportMetadata, Severity, StepRecord, SuiteCategory, SuiteRegression,
    SuiteSummary,
};
use crate::core::stats::{self, TrendOptions};
use crate::core::telemetry::StepSample;

/// Tags that place a step on the critical path.
pub const CRITICAL_PATH_TAGS: [&str; 4] = ["@critical", "@smoke", "@security", "@performance"];

/// Analysis driver over one run.
pub struct AnalysisEngine<'a> {
    config: &'a HeimdallConfig,
}

/// The report for one run plus the successor history document.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    /// The analysis report
    pub report: Report,
    /// Updated history to be committed by the storage service
    pub history: HistoryDocument,
}

#[derive(Debug, Default)]
struct SuiteAccumulator {
    total_steps: usize,
    total_duration: f64,
    min_duration: f64,
    max_duration: f64,
    regressions: usize,
    new_steps: usize,
    ok_steps: usize,
    critical_steps: usize,
    smoke_steps: usize,
    test_files: BTreeSet<String>,
    tags: BTreeSet<String>,
}

impl SuiteAccumulator {
    fn observe(&mut self, duration: f64) {
        if self.total_steps == 0 {
            self.min_duration = duration;
            self.max_duration = duration;
        } else {
            self.min_duration = self.min_duration.min(duration);
            self.max_duration = self.max_duration.max(duration);
        }
        self.total_steps += 1;
        self.total_duration += duration;
    }
}

#[derive(Debug, Default)]
struct TagAccumulator {
    step_count: usize,
    total: f64,
    min: f64,
    max: f64,
    suites: BTreeSet<String>,
    test_files: BTreeSet<String>,
}

impl<'a> AnalysisEngine<'a> {
    /// Create an engine over a resolved configuration.
    pub fn new(config: &'a HeimdallConfig) -> Self {
        Self { config }
    }

    /// Analyze one run against the project history.
    ///
    /// The input history is not mutated; the successor document is returned
    /// for the storage service to commit.
    pub fn analyze(
        &self,
        run: &[StepSample],
        history: &HistoryDocument,
        now: DateTime<Utc>,
    ) -> AnalysisOutcome {
        let analysis = &self.config.analysis;
        let mut working = history.clone();

        let mut report = Report::default();
        let mut suites: IndexMap<String, SuiteAccumulator> = IndexMap::new();
        let mut tag_stats: IndexMap<String, TagAccumulator> = IndexMap::new();
        let mut unique_steps: BTreeSet<String> = BTreeSet::new();
        let mut seen_jobs: BTreeSet<String> = BTreeSet::new();
        let mut seen_tags: BTreeSet<String> = BTreeSet::new();

        for sample in run {
            let context = sample.normalized_context();
            unique_steps.insert(sample.step_text.clone());
            seen_jobs.insert(context.job_id.clone());
            seen_tags.extend(context.tags.iter().cloned());

            let suite = suites.entry(context.suite.clone()).or_default();
            suite.observe(sample.duration);
            suite.test_files.insert(context.test_file.clone());
            suite.tags.extend(context.tags.iter().cloned());
            if context.tags.iter().any(|t| t == "@critical") {
                suite.critical_steps += 1;
            }
            if context.tags.iter().any(|t| t == "@smoke") {
                suite.smoke_steps += 1;
            }

            for tag in &context.tags {
                let stats = tag_stats.entry(tag.clone()).or_default();
                if stats.step_count == 0 {
                    stats.min = sample.duration;
                    stats.max = sample.duration;
                } else {
                    stats.min = stats.min.min(sample.duration);
                    stats.max = stats.max.max(sample.duration);
                }
                stats.step_count += 1;
                stats.total += sample.duration;
                stats.suites.insert(context.suite.clone());
                stats.test_files.insert(context.test_file.clone());
            }

            match working.steps.entry(sample.step_text.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(HistoryEntry::seeded(
                        sample.duration,
                        context.clone(),
                        sample.timestamp,
                    ));
                    suite.new_steps += 1;
                    report.new_steps.push(StepRecord {
                        step_text: sample.step_text.clone(),
                        duration: sample.duration,
                        suite: context.suite.clone(),
                        context,
                        timestamp: sample.timestamp,
                    });
                }
                Entry::Occupied(mut occupied) => {
                    let entry = occupied.get_mut();
                    let effective = self.config.effective_step_config(
                        &sample.step_text,
                        entry.average,
                        &context,
                    );
                    let classification = classify::classify(
                        sample.duration,
                        Some(&*entry),
                        &effective,
                        &analysis.trends,
                    );

                    if let Some(drift) = classification.drift {
                        report.trends.push(DriftRecord {
                            step_text: sample.step_text.clone(),
                            suite: context.suite.clone(),
                            tags: context.tags.clone(),
                            detail: drift,
                        });
                    }

                    match classification.disposition {
                        StepDisposition::Regression(detail) => {
                            suite.regressions += 1;
                            report.regressions.push(RegressionRecord {
                                step_text: sample.step_text.clone(),
                                duration: sample.duration,
                                baseline_average: detail.baseline_average,
                                baseline_std_dev: detail.baseline_std_dev,
                                slowdown: detail.slowdown,
                                percentage: detail.percentage,
                                applied: effective.applied(),
                                context: context.clone(),
                                timestamp: sample.timestamp,
                            });
                        }
                        StepDisposition::Ok | StepDisposition::New => {
                            suite.ok_steps += 1;
                            report.ok.push(StepRecord {
                                step_text: sample.step_text.clone(),
                                duration: sample.duration,
                                suite: context.suite.clone(),
                                context: context.clone(),
                                timestamp: sample.timestamp,
                            });
                        }
                    }

                    entry.absorb(
                        sample.duration,
                        &context,
                        analysis.max_history,
                        sample.timestamp,
                    );
                }
            }
        }

        // Suite roll-ups, suite-level regressions, and suite history.
        let mut health_sum = 0.0;
        for (suite_name, acc) in &suites {
            let avg_duration = if acc.total_steps > 0 {
                acc.total_duration / acc.total_steps as f64
            } else {
                0.0
            };
            let regression_rate = if acc.total_steps > 0 {
                acc.regressions as f64 / acc.total_steps as f64
            } else {
                0.0
            };

            let suite_override = analysis.suite_overrides.get(suite_name);
            let suite_threshold = suite_override
                .and_then(|o| o.threshold)
                .unwrap_or(analysis.threshold);

            let prior_history = working.suite_history.get(suite_name);
            if let Some(regression) =
                detect_suite_regression(suite_name, avg_duration, prior_history, suite_threshold)
            {
                report.suite_regressions.push(regression);
            }

            let health_score = suite_health_score(acc, avg_duration, regression_rate, prior_history);
            health_sum += health_score;

            let (category, severity) = categorize_suite(health_score, regression_rate);
            let recommendations = suite_recommendations(acc, avg_duration, regression_rate);

            report.suites.insert(
                suite_name.clone(),
                SuiteSummary {
                    suite: suite_name.clone(),
                    total_steps: acc.total_steps,
                    total_duration: acc.total_duration,
                    avg_duration,
                    min_duration: acc.min_duration,
                    max_duration: acc.max_duration,
                    regressions: acc.regressions,
                    new_steps: acc.new_steps,
                    ok_steps: acc.ok_steps,
                    critical_steps: acc.critical_steps,
                    smoke_steps: acc.smoke_steps,
                    test_files: acc.test_files.iter().cloned().collect(),
                    tags: acc.tags.iter().cloned().collect(),
                    health_score,
                    category,
                    severity,
                    recommendations,
                    applied_config: suite_override.cloned(),
                },
            );

            working
                .suite_history
                .entry(suite_name.clone())
                .or_insert_with(SuiteHistory::default)
                .record(avg_duration, acc.total_steps, regression_rate, now);
        }

        let overall_health = if report.suites.is_empty() {
            100.0
        } else {
            (health_sum / report.suites.len() as f64).round()
        };

        // Tag analysis.
        for (tag, acc) in tag_stats {
            report.tag_analysis.insert(
                tag,
                crate::core::report::TagStats {
                    step_count: acc.step_count,
                    avg_duration: if acc.step_count > 0 {
                        acc.total / acc.step_count as f64
                    } else {
                        0.0
                    },
                    min: acc.min,
                    max: acc.max,
                    total: acc.total,
                    suites: acc.suites.iter().cloned().collect(),
                    test_files: acc.test_files.iter().cloned().collect(),
                },
            );
        }

        report.critical_path = build_critical_path(&report);
        report.recommendations = build_recommendations(&report);

        report.metadata = ReportMetadata {
            total_steps: run.len(),
            unique_steps: unique_steps.len(),
            suites: report.suites.keys().cloned().collect(),
            tags: seen_tags.into_iter().collect(),
            jobs: seen_jobs.into_iter().collect(),
            timestamp: now,
            overall_health,
        };

        AnalysisOutcome {
            report,
            history: working,
        }
    }
}

/// Suite-level regression: the current average exceeds the historical mean
/// by `threshold` historical standard deviations.
fn detect_suite_regression(
    suite: &str,
    current_average: f64,
    history: Option<&SuiteHistory>,
    threshold: f64,
) -> Option<SuiteRegression> {
    let averages = &history?.avg_duration_history;
    if averages.len() < 2 {
        return None;
    }
    let historical_average = stats::mean(averages);
    let historical_std_dev = stats::sample_std_dev(averages, historical_average);
    if current_average <= historical_average + threshold * historical_std_dev {
        return None;
    }
    let delta = current_average - historical_average;
    let percentage = if historical_average > 0.0 {
        delta / historical_average * 100.0
    } else {
        0.0
    };
    Some(SuiteRegression {
        suite: suite.to_string(),
        current_average,
        historical_average,
        delta,
        percentage,
        threshold,
    })
}

/// Health score in `[0, 100]`: 100 minus penalties for the regression rate,
/// a significant upward suite trend, baseline instability, and regressions
/// on critically tagged suites.
fn suite_health_score(
    acc: &SuiteAccumulator,
    avg_duration: f64,
    regression_rate: f64,
    history: Option<&SuiteHistory>,
) -> f64 {
    let mut penalty = 0.0;

    penalty += (regression_rate * 100.0).min(30.0);

    if let Some(history) = history {
        let averages = &history.avg_duration_history;
        if averages.len() >= 3 && avg_duration > 0.0 {
            let window = (averages.len() / 2).min(3).max(1);
            let measure = stats::trend(
                averages,
                &TrendOptions {
                    window,
                    min_significance: avg_duration * 0.05,
                },
            );
            if measure.significant && measure.trend > 0.0 {
                penalty += (measure.trend / avg_duration * 100.0).min(25.0);
            }
        }
    }

    if acc.total_steps > 0 {
        let new_rate = acc.new_steps as f64 / acc.total_steps as f64;
        if new_rate > 0.1 {
            penalty += (new_rate * 50.0).min(20.0);
        }
    }

    if (acc.critical_steps > 0 || acc.smoke_steps > 0) && acc.regressions > 0 {
        penalty += (acc.regressions as f64 * 5.0).min(25.0);
    }

    (100.0 - penalty).clamp(0.0, 100.0)
}

fn categorize_suite(health_score: f64, regression_rate: f64) -> (SuiteCategory, Severity) {
    if health_score < 50.0 || regression_rate > 0.3 {
        (SuiteCategory::Critical, Severity::High)
    } else if health_score < 70.0 || regression_rate > 0.15 {
        (SuiteCategory::Warning, Severity::Medium)
    } else if health_score < 85.0 || regression_rate > 0.05 {
        (SuiteCategory::Attention, Severity::Low)
    } else {
        (SuiteCategory::Good, Severity::Low)
    }
}

fn suite_recommendations(
    acc: &SuiteAccumulator,
    avg_duration: f64,
    regression_rate: f64,
) -> Vec<String> {
    let mut recommendations = Vec::new();
    if acc.regressions > 0 {
        recommendations.push(format!(
            "Investigate {} regressed step(s); regression rate {:.0}%",
            acc.regressions,
            regression_rate * 100.0
        ));
    }
    if acc.total_steps > 0 && acc.new_steps as f64 / acc.total_steps as f64 > 0.1 {
        recommendations.push(
            "High proportion of new steps; the baseline is still stabilizing".to_string(),
        );
    }
    if avg_duration > 1000.0 {
        recommendations.push(
            "Average step duration exceeds 1s; profile the slowest steps".to_string(),
        );
    }
    if (acc.critical_steps > 0 || acc.smoke_steps > 0) && acc.regressions > 0 {
        recommendations
            .push("Critically tagged steps regressed; prioritize triage".to_string());
    }
    if acc.test_files.len() > 10 {
        recommendations.push(format!(
            "Suite spans {} test files; consider partitioning",
            acc.test_files.len()
        ));
    }
    recommendations
}

fn critical_tags_of(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter(|tag| CRITICAL_PATH_TAGS.contains(&tag.as_str()))
        .cloned()
        .collect()
}

fn build_critical_path(report: &Report) -> CriticalPath {
    let mut issues = Vec::new();

    for regression in &report.regressions {
        let tags = critical_tags_of(&regression.context.tags);
        if tags.is_empty() {
            continue;
        }
        issues.push(CriticalPathIssue {
            step_text: regression.step_text.clone(),
            kind: CriticalIssueKind::Regression,
            severity: Severity::High,
            suite: regression.context.suite.clone(),
            tags,
            detail: format!(
                "{:.0} ms over a {:.0} ms baseline ({:+.1}%)",
                regression.slowdown, regression.baseline_average, regression.percentage
            ),
        });
    }

    for drift in &report.trends {
        let tags = critical_tags_of(&drift.tags);
        if tags.is_empty() {
            continue;
        }
        issues.push(CriticalPathIssue {
            step_text: drift.step_text.clone(),
            kind: CriticalIssueKind::Drift,
            severity: Severity::Medium,
            suite: drift.suite.clone(),
            tags,
            detail: format!(
                "upward trend of {:.0} ms over the last {} samples",
                drift.detail.trend, drift.detail.window
            ),
        });
    }

    for new_step in &report.new_steps {
        let tags = critical_tags_of(&new_step.context.tags);
        if tags.is_empty() {
            continue;
        }
        issues.push(CriticalPathIssue {
            step_text: new_step.step_text.clone(),
            kind: CriticalIssueKind::New,
            severity: Severity::Low,
            suite: new_step.suite.clone(),
            tags,
            detail: format!("new step at {:.0} ms with no baseline", new_step.duration),
        });
    }

    let overall_severity = issues
        .iter()
        .map(|issue| issue.severity)
        .max()
        .unwrap_or(Severity::None);
    let high_severity_issues = issues
        .iter()
        .filter(|issue| issue.severity == Severity::High)
        .count();

    CriticalPath {
        total_issues: issues.len(),
        high_severity_issues,
        issues,
        overall_severity,
    }
}

fn build_recommendations(report: &Report) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    match report.critical_path.overall_severity {
        Severity::High => recommendations.push(Recommendation {
            priority: Priority::High,
            category: "critical-path".to_string(),
            message: format!(
                "{} high-severity critical-path issue(s); address before release",
                report.critical_path.high_severity_issues
            ),
        }),
        Severity::Medium => recommendations.push(Recommendation {
            priority: Priority::Medium,
            category: "critical-path".to_string(),
            message: "Critically tagged steps are drifting; review their recent trend".to_string(),
        }),
        Severity::Low | Severity::None => {}
    }

    if !report.suite_regressions.is_empty() {
        recommendations.push(Recommendation {
            priority: Priority::High,
            category: "suites".to_string(),
            message: format!(
                "{} suite(s) regressed against their historical average",
                report.suite_regressions.len()
            ),
        });
    }

    let slowest_tag = report
        .tag_analysis
        .iter()
        .max_by(|a, b| a.1.avg_duration.total_cmp(&b.1.avg_duration));
    if let Some((tag, stats)) = slowest_tag {
        if stats.avg_duration > 1000.0 {
            recommendations.push(Recommendation {
                priority: Priority::Medium,
                category: "tags".to_string(),
                message: format!(
                    "Steps tagged {tag} average {:.0} ms across {} suite(s)",
                    stats.avg_duration,
                    stats.suites.len()
                ),
            });
        } else if stats.step_count > 0 {
            recommendations.push(Recommendation {
                priority: Priority::Low,
                category: "tags".to_string(),
                message: format!(
                    "Tag {tag} carries the highest average duration ({:.0} ms)",
                    stats.avg_duration
                ),
            });
        }
    }

    recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::StepContext;
    use chrono::TimeZone;

    fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, seconds).unwrap()
    }

    fn sample(step: &str, duration: f64, suite: &str, tags: &[&str]) -> StepSample {
        StepSample {
            step_text: step.to_string(),
            duration,
            timestamp: ts(0),
            context: Some(StepContext {
                suite: suite.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..StepContext::default()
            }),
        }
    }

    #[test]
    fn test_empty_run_reports_full_health() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);
        let outcome = engine.analyze(&[], &HistoryDocument::default(), ts(0));
        assert_eq!(outcome.report.metadata.overall_health, 100.0);
        assert!(outcome.report.suites.is_empty());
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn test_new_step_creates_single_sample_baseline() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);
        let run = vec![sample("I navigate", 150.0, "nav", &[])];
        let outcome = engine.analyze(&run, &HistoryDocument::default(), ts(1));

        assert_eq!(outcome.report.new_steps.len(), 1);
        assert!(outcome.report.regressions.is_empty());
        let entry = &outcome.history.steps["I navigate"];
        assert_eq!(entry.durations, vec![150.0]);
        assert_eq!(entry.std_dev, 0.0);
    }

    #[test]
    fn test_in_run_order_sensitivity_is_contractual() {
        // The second occurrence of a step sees a baseline already containing
        // the first occurrence from the same run.
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);
        let run = vec![
            sample("I poll", 100.0, "polling", &[]),
            sample("I poll", 104.0, "polling", &[]),
        ];
        let outcome = engine.analyze(&run, &HistoryDocument::default(), ts(2));

        assert_eq!(outcome.report.new_steps.len(), 1);
        assert_eq!(outcome.report.ok.len(), 1);
        assert_eq!(outcome.history.steps["I poll"].durations, vec![100.0, 104.0]);
        assert_eq!(outcome.report.metadata.unique_steps, 1);
        assert_eq!(outcome.report.metadata.total_steps, 2);
    }

    #[test]
    fn test_overall_health_is_rounded_mean_of_suite_scores() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);
        let run = vec![
            sample("a", 100.0, "one", &[]),
            sample("b", 100.0, "two", &[]),
        ];
        let outcome = engine.analyze(&run, &HistoryDocument::default(), ts(3));

        let mean: f64 = outcome
            .report
            .suites
            .values()
            .map(|s| s.health_score)
            .sum::<f64>()
            / outcome.report.suites.len() as f64;
        assert_eq!(outcome.report.metadata.overall_health, mean.round());
        for suite in outcome.report.suites.values() {
            assert!((0.0..=100.0).contains(&suite.health_score));
        }
    }

    #[test]
    fn test_suite_history_is_appended_and_bounded() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);
        let mut history = HistoryDocument::default();
        for i in 0..25 {
            let run = vec![sample("step", 100.0, "suite", &[])];
            history = engine.analyze(&run, &history, ts(i)).history;
        }
        let suite_history = &history.suite_history["suite"];
        assert_eq!(
            suite_history.avg_duration_history.len(),
            crate::core::history::SUITE_HISTORY_WINDOW
        );
    }

    #[test]
    fn test_suite_regression_detected_against_history() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);

        // Build suite history around a 100 ms average.
        let mut history = HistoryDocument::default();
        for i in 0..5 {
            let run = vec![
                sample("s1", 99.0 + i as f64 * 0.5, "checkout", &[]),
                sample("s2", 101.0 - i as f64 * 0.5, "checkout", &[]),
            ];
            history = engine.analyze(&run, &history, ts(i)).history;
        }

        // A run whose suite average leaps far beyond history.
        let run = vec![
            sample("s1", 400.0, "checkout", &[]),
            sample("s2", 420.0, "checkout", &[]),
        ];
        let outcome = engine.analyze(&run, &history, ts(30));
        assert_eq!(outcome.report.suite_regressions.len(), 1);
        let suite_regression = &outcome.report.suite_regressions[0];
        assert_eq!(suite_regression.suite, "checkout");
        assert!(suite_regression.delta > 0.0);
        assert!(suite_regression.percentage > 100.0);
    }

    #[test]
    fn test_critical_path_severity_ladder() {
        let config = HeimdallConfig::default();
        let engine = AnalysisEngine::new(&config);

        // New critically tagged step only: low severity.
        let run = vec![sample("fresh", 100.0, "auth", &["@critical"])];
        let outcome = engine.analyze(&run, &HistoryDocument::default(), ts(0));
        assert_eq!(
            outcome.report.critical_path.overall_severity,
            Severity::Low
        );
        assert_eq!(outcome.report.critical_path.total_issues, 1);

        // Untagged new step: no critical-path findings.
        let run = vec![sample("fresh", 100.0, "auth", &[])];
        let outcome = engine.analyze(&run, &HistoryDocument::default(), ts(0));
        assert_eq!(
            outcome.report.critical_path.overall_severity,
            Severity::None
        );
    }
}
