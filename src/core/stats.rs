//! Statistics kernel: mean, sample standard deviation, and windowed trend.
//!
//! These functions are pure and deterministic; every higher-level statistic
//! in the analysis engine is derived from them.

use serde::{Deserialize, Serialize};

/// Arithmetic mean of the values, `0.0` when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation around a precomputed mean.
///
/// Returns `0.0` for fewer than two samples; otherwise
/// `sqrt(Σ(x − mean)² / (n − 1))`.
pub fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Options controlling windowed trend detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendOptions {
    /// Number of samples in each comparison window
    pub window: usize,
    /// Minimum absolute change for a trend to count as significant
    pub min_significance: f64,
}

/// Result of a windowed trend measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMeasure {
    /// Mean of the last window minus mean of the preceding window
    pub trend: f64,
    /// Whether `|trend|` exceeded the significance floor
    pub significant: bool,
}

impl TrendMeasure {
    /// The zero trend, used when there is not enough data to compare windows.
    pub const NONE: Self = Self {
        trend: 0.0,
        significant: false,
    };
}

/// Windowed trend: mean of the last `window` values minus the mean of the
/// `window` values preceding them.
///
/// Requires at least `2 * window` samples; with fewer, the measure is zero
/// and not significant.
pub fn trend(values: &[f64], options: &TrendOptions) -> TrendMeasure {
    let window = options.window;
    if window == 0 || values.len() < 2 * window {
        return TrendMeasure::NONE;
    }

    let recent = &values[values.len() - window..];
    let preceding = &values[values.len() - 2 * window..values.len() - window];
    let delta = mean(recent) - mean(preceding);

    TrendMeasure {
        trend: delta,
        significant: delta.abs() > options.min_significance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_mean_basic() {
        assert_relative_eq!(mean(&[150.0, 155.0, 148.0]), 151.0, epsilon = 1e-9);
        assert_relative_eq!(mean(&[150.0, 155.0, 148.0, 152.0]), 151.25, epsilon = 1e-9);
    }

    #[test]
    fn test_std_dev_below_two_samples_is_zero() {
        assert_eq!(sample_std_dev(&[], 0.0), 0.0);
        assert_eq!(sample_std_dev(&[42.0], 42.0), 0.0);
    }

    #[test]
    fn test_std_dev_sample_formula() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        // Sample (n-1) variance of this classic set is 32/7.
        assert_relative_eq!(sample_std_dev(&values, m), (32.0f64 / 7.0).sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_trend_insufficient_history() {
        let options = TrendOptions {
            window: 3,
            min_significance: 10.0,
        };
        let measure = trend(&[100.0, 102.0, 104.0, 118.0, 120.0], &options);
        assert_eq!(measure, TrendMeasure::NONE);
    }

    #[test]
    fn test_trend_upward_significant() {
        let options = TrendOptions {
            window: 3,
            min_significance: 10.0,
        };
        let measure = trend(&[100.0, 102.0, 104.0, 118.0, 120.0, 122.0], &options);
        assert_relative_eq!(measure.trend, 18.0, epsilon = 1e-9);
        assert!(measure.significant);
    }

    #[test]
    fn test_trend_compares_most_recent_windows() {
        let options = TrendOptions {
            window: 2,
            min_significance: 1.0,
        };
        // Only the last four values participate: (30, 30) vs (10, 10).
        let measure = trend(&[500.0, 500.0, 10.0, 10.0, 30.0, 30.0], &options);
        assert_relative_eq!(measure.trend, 20.0, epsilon = 1e-9);
        assert!(measure.significant);
    }

    #[test]
    fn test_trend_below_significance_floor() {
        let options = TrendOptions {
            window: 2,
            min_significance: 10.0,
        };
        let measure = trend(&[100.0, 100.0, 104.0, 104.0], &options);
        assert_relative_eq!(measure.trend, 4.0, epsilon = 1e-9);
        assert!(!measure.significant);
    }

    #[test]
    fn test_trend_downward_uses_absolute_magnitude() {
        let options = TrendOptions {
            window: 2,
            min_significance: 10.0,
        };
        let measure = trend(&[120.0, 122.0, 90.0, 92.0], &options);
        assert!(measure.trend < 0.0);
        assert!(measure.significant);
    }
}
