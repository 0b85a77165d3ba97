//! Retention policies applied through the storage adapters.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::RetentionConfig;
use crate::core::errors::{HeimdallError, Result};

/// Ages beyond which archived documents are removed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Maximum age of archived runs
    pub runs_max_age: Duration,
    /// Maximum age of unfinished job records
    pub jobs_max_age: Duration,
    /// Maximum age of completed or failed job records
    pub finished_jobs_max_age: Duration,
    /// Report what would be removed without deleting
    pub dry_run: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    /// Build a policy from the configured retention windows.
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            runs_max_age: Duration::days(i64::from(config.runs_days)),
            jobs_max_age: Duration::days(i64::from(config.jobs_days)),
            finished_jobs_max_age: Duration::days(i64::from(config.finished_jobs_days)),
            dry_run: false,
        }
    }

    /// Tighten every window to `max_age` when it is shorter.
    pub fn with_older_than(mut self, max_age: Duration) -> Self {
        self.runs_max_age = self.runs_max_age.min(max_age);
        self.jobs_max_age = self.jobs_max_age.min(max_age);
        self.finished_jobs_max_age = self.finished_jobs_max_age.min(max_age);
        self
    }

    /// Switch the policy to report-only mode.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Cutoff instant for archived runs.
    pub fn runs_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.runs_max_age
    }

    /// Cutoff instant for a job record, depending on whether it finished.
    pub fn jobs_cutoff(&self, now: DateTime<Utc>, finished: bool) -> DateTime<Utc> {
        if finished {
            now - self.finished_jobs_max_age
        } else {
            now - self.jobs_max_age
        }
    }
}

/// Counts of items removed (or, under dry-run, that would be removed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// Archived runs removed
    pub runs_removed: usize,
    /// Job records removed
    pub jobs_removed: usize,
    /// Bytes reclaimed, where the backend can measure them
    pub bytes_reclaimed: u64,
    /// Whether the report describes a dry run
    pub dry_run: bool,
}

/// Parse an `--older-than` argument of the form `Nd` (days).
pub fn parse_older_than(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    let days = trimmed
        .strip_suffix('d')
        .and_then(|digits| digits.parse::<i64>().ok())
        .filter(|days| *days > 0)
        .ok_or_else(|| {
            HeimdallError::validation_field(
                format!("expected an age like '30d', got '{input}'"),
                "older-than",
            )
        })?;
    Ok(Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_older_than() {
        assert_eq!(parse_older_than("30d").unwrap(), Duration::days(30));
        assert_eq!(parse_older_than(" 7d ").unwrap(), Duration::days(7));
        assert!(parse_older_than("30").is_err());
        assert!(parse_older_than("0d").is_err());
        assert!(parse_older_than("-3d").is_err());
        assert!(parse_older_than("monthly").is_err());
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.runs_max_age, Duration::days(30));
        assert_eq!(policy.jobs_max_age, Duration::days(7));
        assert_eq!(policy.finished_jobs_max_age, Duration::days(1));
        assert!(!policy.dry_run);
    }

    #[test]
    fn test_older_than_only_tightens() {
        let policy = RetentionPolicy::default().with_older_than(Duration::days(3));
        assert_eq!(policy.runs_max_age, Duration::days(3));
        assert_eq!(policy.jobs_max_age, Duration::days(3));
        assert_eq!(policy.finished_jobs_max_age, Duration::days(1));
    }

    #[test]
    fn test_finished_jobs_cut_earlier() {
        let now = Utc::now();
        let policy = RetentionPolicy::default();
        assert!(policy.jobs_cutoff(now, true) > policy.jobs_cutoff(now, false));
    }
}
