//! Scoring past predictions against what actually happened.

use std::collections::BTreeMap;

use chrono::Duration;

use foresight_core::{HistoricalSeries, PredictionPayload, TrendDirection};

use crate::forecasters::{direction_of, split_label};
use crate::stats::{linear_fit, mean};

/// Observations within this distance of a load forecast instant are compared to it.
const LOAD_MATCH_WINDOW_MINUTES: i64 = 30;

/// Accuracy (0–100) of `payload` given the observations that followed it.
///
/// Returns `None` when the observations cannot say anything about the payload
/// (nothing observed, or no overlap in time).
pub fn score(payload: &PredictionPayload, observed: &HistoricalSeries) -> Option<f64> {
    if observed.is_empty() {
        return None;
    }
    let accuracy = match payload {
        PredictionPayload::Load(items) => {
            let window = Duration::minutes(LOAD_MATCH_WINDOW_MINUTES);
            let errors: Vec<f64> = items
                .iter()
                .filter_map(|item| {
                    observed
                        .points
                        .iter()
                        .filter(|p| (p.at - item.at).abs() <= window)
                        .min_by_key(|p| (p.at - item.at).abs())
                        .map(|p| (p.value - item.expected).abs() / p.value.abs().max(1e-9))
                })
                .collect();
            if errors.is_empty() {
                return None;
            }
            100.0 * (1.0 - mean(&errors).min(1.0))
        }
        PredictionPayload::Trend(items) => {
            let item = items.first()?;
            if observed.len() < 2 {
                return None;
            }
            let origin = observed.points[0].at;
            let xs: Vec<f64> = observed
                .points
                .iter()
                .map(|p| (p.at - origin).num_seconds() as f64 / 3600.0)
                .collect();
            let ys: Vec<f64> = observed.values().collect();
            let (slope, _) = linear_fit(&xs, &ys);
            let actual = direction_of(slope, mean(&ys));
            match (item.direction, actual) {
                (a, b) if a == b => 100.0,
                (TrendDirection::Flat, _) | (_, TrendDirection::Flat) => 50.0,
                _ => 0.0,
            }
        }
        PredictionPayload::Failure(items) => {
            // Brier score over predicted components; an observed failure is any
            // positive error count labelled with the component.
            let occurred = |component: &str| {
                observed
                    .points
                    .iter()
                    .any(|p| p.value > 0.0 && p.label.as_deref().unwrap_or(&observed.target) == component)
            };
            if items.is_empty() {
                let any_failure = observed.points.iter().any(|p| p.value > 0.0);
                return Some(if any_failure { 0.0 } else { 100.0 });
            }
            let brier = mean(
                &items
                    .iter()
                    .map(|f| {
                        let y = if occurred(&f.component) { 1.0 } else { 0.0 };
                        (f.probability - y).powi(2)
                    })
                    .collect::<Vec<_>>(),
            );
            100.0 * (1.0 - brier)
        }
        PredictionPayload::Behavior(items) => {
            let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
            let mut counts: BTreeMap<(&str, &str), f64> = BTreeMap::new();
            for label in observed.points.iter().filter_map(|p| p.label.as_deref()) {
                let (segment, action) = split_label(label, &observed.target);
                *totals.entry(segment).or_default() += 1.0;
                *counts.entry((segment, action)).or_default() += 1.0;
            }
            if items.is_empty() || totals.is_empty() {
                return None;
            }
            let gaps: Vec<f64> = items
                .iter()
                .map(|b| {
                    let total = totals.get(b.segment.as_str()).copied().unwrap_or(0.0);
                    let seen = counts
                        .get(&(b.segment.as_str(), b.action.as_str()))
                        .copied()
                        .unwrap_or(0.0);
                    let actual = if total > 0.0 { seen / total } else { 0.0 };
                    (b.likelihood - actual).abs()
                })
                .collect();
            100.0 * (1.0 - mean(&gaps).min(1.0))
        }
    };
    Some(accuracy.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foresight_core::{
        DataSourceKind, FailurePrediction, HistoricalPoint, LoadPrediction, Severity,
        TrendPrediction,
    };

    proptest::proptest! {
        #[test]
        fn load_scores_stay_within_percent_range(
            pairs in proptest::collection::vec((0.0f64..1e6, 0.0f64..1e6), 1..24),
        ) {
            let t0 = Utc::now();
            let at = |i: usize| t0 + Duration::hours(i as i64);
            let payload = PredictionPayload::Load(
                pairs
                    .iter()
                    .enumerate()
                    .map(|(i, (expected, _))| LoadPrediction {
                        at: at(i),
                        expected: *expected,
                        lower: 0.0,
                        upper: *expected,
                    })
                    .collect(),
            );
            let observed = HistoricalSeries::new(
                DataSourceKind::PerformanceMetrics,
                "api",
                pairs
                    .iter()
                    .enumerate()
                    .map(|(i, (_, actual))| HistoricalPoint::new(at(i), *actual))
                    .collect(),
            );
            let accuracy = score(&payload, &observed).unwrap();
            proptest::prop_assert!((0.0..=100.0).contains(&accuracy));
        }
    }

    #[test]
    fn exact_load_forecast_scores_full_marks() {
        let at = Utc::now();
        let payload = PredictionPayload::Load(vec![LoadPrediction {
            at,
            expected: 50.0,
            lower: 40.0,
            upper: 60.0,
        }]);
        let observed = HistoricalSeries::new(
            DataSourceKind::PerformanceMetrics,
            "api",
            vec![HistoricalPoint::new(at + Duration::minutes(5), 50.0)],
        );
        assert_eq!(score(&payload, &observed), Some(100.0));
    }

    #[test]
    fn opposite_trend_scores_zero() {
        let t0 = Utc::now();
        let payload = PredictionPayload::Trend(vec![TrendPrediction {
            metric: "revenue".into(),
            direction: TrendDirection::Rising,
            slope: 1.0,
            projected: 10.0,
        }]);
        let observed = HistoricalSeries::new(
            DataSourceKind::BusinessMetrics,
            "revenue",
            (0..5)
                .map(|i| HistoricalPoint::new(t0 + Duration::hours(i), 100.0 - 10.0 * i as f64))
                .collect(),
        );
        assert_eq!(score(&payload, &observed), Some(0.0));
    }

    #[test]
    fn confident_correct_failure_scores_high() {
        let at = Utc::now();
        let payload = PredictionPayload::Failure(vec![FailurePrediction {
            component: "db".into(),
            probability: 0.9,
            expected_at: at,
            severity: Severity::High,
            indicators: vec![],
        }]);
        let observed = HistoricalSeries::new(
            DataSourceKind::SystemLogs,
            "system",
            vec![HistoricalPoint::labelled(at, 3.0, "db")],
        );
        let acc = score(&payload, &observed).unwrap();
        assert!((acc - 99.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_observed_means_unscored() {
        let payload = PredictionPayload::Load(Vec::new());
        let observed = HistoricalSeries::new(DataSourceKind::PerformanceMetrics, "api", Vec::new());
        assert_eq!(score(&payload, &observed), None);
    }
}
