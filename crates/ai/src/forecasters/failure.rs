use std::collections::BTreeMap;

use chrono::Duration;
use serde_json::json;

use foresight_core::{FailurePrediction, HistoricalPoint, PredictionPayload, Severity};

use crate::job::ForecastRequest;
use crate::result::{ForecastError, ForecastOutput};
use crate::stats::{mean, stddev_sample};

/// Failure forecast from system-log error counts.
///
/// Model:
/// - Group observations by component label (unlabelled points belong to the target).
/// - Compare each component's latest error count against a rolling baseline window.
/// - Flag components whose z-score exceeds `z_threshold`.
pub(crate) fn forecast(
    request: &ForecastRequest,
    window: usize,
    z_threshold: f64,
) -> Result<ForecastOutput, ForecastError> {
    if window < 2 {
        return Err(ForecastError::InvalidInput(
            "window must be >= 2 to compute standard deviation".to_string(),
        ));
    }
    if !(z_threshold.is_finite() && z_threshold > 0.0) {
        return Err(ForecastError::InvalidInput(
            "z_threshold must be a finite positive number".to_string(),
        ));
    }
    let needed = window + 1;
    if request.history.len() < needed {
        return Err(ForecastError::InsufficientData {
            needed,
            got: request.history.len(),
        });
    }

    let mut by_component: BTreeMap<&str, Vec<&HistoricalPoint>> = BTreeMap::new();
    for point in &request.history.points {
        let component = point.label.as_deref().unwrap_or(request.target.as_str());
        by_component.entry(component).or_default().push(point);
    }

    let horizon = request.ptype.time_horizon_hours() as f64;
    let mut failures = Vec::new();
    let mut evaluated = 0usize;

    for (component, points) in &by_component {
        if points.len() < needed {
            continue;
        }
        evaluated += 1;
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        if let Some((ratio, explanation)) = excess_ratio(&values, window, z_threshold) {
            let hours = (horizon / ratio.max(1.0)).round().max(1.0) as i64;
            failures.push(FailurePrediction {
                component: (*component).to_string(),
                probability: ratio / (ratio + 1.0),
                expected_at: request.as_of + Duration::hours(hours),
                severity: severity_for(ratio),
                indicators: vec![explanation],
            });
        }
    }

    failures.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    let coverage = (request.history.len() as f64 / (window * 4) as f64).min(1.0);
    let confidence = 50.0 + 35.0 * coverage;

    Ok(ForecastOutput::new(PredictionPayload::Failure(failures), confidence)
        .with_explanation(format!(
            "evaluated {evaluated} component(s) with rolling z-score (window={window}, threshold={z_threshold})"
        ))
        .with_metadata(json!({
            "method": "rolling_z_score",
            "window": window,
            "z_threshold": z_threshold,
            "components": by_component.len(),
        })))
}

/// How far beyond threshold the newest value sits (>= 1.0 means at threshold).
fn excess_ratio(values: &[f64], window: usize, z_threshold: f64) -> Option<(f64, String)> {
    let last = *values.last()?;
    let end = values.len() - 1;
    let start = end.saturating_sub(window);
    let baseline = &values[start..end];

    let mean = mean(baseline);
    let std = stddev_sample(baseline, mean);

    // Constant baseline: only an increase counts, and we keep it conservative.
    if std <= f64::EPSILON {
        if last > mean {
            return Some((
                1.0,
                format!("error count {last:.0} above constant baseline {mean:.0}"),
            ));
        }
        return None;
    }

    let z = (last - mean) / std;
    if z < z_threshold {
        return None;
    }
    Some((
        z / z_threshold,
        format!("error count {last:.0}; baseline mean={mean:.2}, std={std:.2}, z={z:.2}"),
    ))
}

fn severity_for(ratio: f64) -> Severity {
    if ratio >= 2.5 {
        Severity::Critical
    } else if ratio >= 1.5 {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foresight_core::{DataSourceKind, HistoricalSeries, PredictionType};

    fn request(values: &[(&str, f64)]) -> ForecastRequest {
        let t0 = Utc::now() - Duration::hours(values.len() as i64);
        let points = values
            .iter()
            .enumerate()
            .map(|(i, (label, v))| HistoricalPoint::labelled(t0 + Duration::hours(i as i64), *v, *label))
            .collect();
        ForecastRequest::new(
            PredictionType::Failure,
            "system",
            HistoricalSeries::new(DataSourceKind::SystemLogs, "system", points),
            Utc::now(),
        )
    }

    #[test]
    fn spike_is_flagged_for_its_component_only() {
        let mut values: Vec<(&str, f64)> = Vec::new();
        for i in 0..12 {
            values.push(("db", 2.0 + (i % 3) as f64));
            values.push(("cache", 1.0 + (i % 2) as f64));
        }
        values.push(("db", 40.0));
        values.push(("cache", 1.0));

        let out = forecast(&request(&values), 10, 3.0).unwrap();
        let PredictionPayload::Failure(items) = out.payload else {
            panic!("expected failure payload");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].component, "db");
        assert!(items[0].probability > 0.5);
        assert_eq!(items[0].severity, Severity::Critical);
    }

    #[test]
    fn short_history_is_rejected() {
        let err = forecast(&request(&[("db", 1.0), ("db", 2.0)]), 10, 3.0).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 11, got: 2 });
    }
}
