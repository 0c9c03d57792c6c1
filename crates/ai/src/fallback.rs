//! Cheap in-process heuristic used when the worker pipeline is unavailable.
//!
//! Never fails: thin history yields an empty payload. Confidence is capped at
//! [`FALLBACK_CONFIDENCE`] so consumers can tell it apart from a real forecast.

use std::collections::BTreeMap;

use chrono::Duration;
use serde_json::json;

use foresight_core::{
    BehaviorPrediction, FailurePrediction, LoadPrediction, PredictionPayload, PredictionType,
    Severity, TrendPrediction,
};

use crate::forecasters::{direction_of, split_label};
use crate::job::ForecastRequest;
use crate::result::ForecastOutput;
use crate::stats::mean;

pub const FALLBACK_CONFIDENCE: f64 = 30.0;

pub fn heuristic_forecast(request: &ForecastRequest) -> ForecastOutput {
    let values: Vec<f64> = request.history.values().collect();
    let horizon = request.ptype.time_horizon_hours();

    let payload = match request.ptype {
        PredictionType::Failure => PredictionPayload::Failure(spike(request, &values)),
        PredictionType::Load => {
            // Persistence: the recent level holds, ±25%.
            let tail = &values[values.len().saturating_sub(3)..];
            let level = mean(tail);
            PredictionPayload::Load(if tail.is_empty() {
                Vec::new()
            } else {
                (1..=horizon)
                    .map(|h| LoadPrediction {
                        at: request.as_of + Duration::hours(h as i64),
                        expected: level,
                        lower: level * 0.75,
                        upper: level * 1.25,
                    })
                    .collect()
            })
        }
        PredictionType::Behavior => PredictionPayload::Behavior(most_common(request)),
        PredictionType::Trend => {
            let points = &request.history.points;
            PredictionPayload::Trend(match (points.first(), points.last()) {
                (Some(first), Some(last)) if points.len() >= 2 => {
                    let hours = ((last.at - first.at).num_seconds() as f64 / 3600.0).max(1.0);
                    let slope = (last.value - first.value) / hours;
                    vec![TrendPrediction {
                        metric: request.target.clone(),
                        direction: direction_of(slope, mean(&values)),
                        slope,
                        projected: last.value + slope * horizon as f64,
                    }]
                }
                _ => Vec::new(),
            })
        }
    };

    ForecastOutput::new(payload, FALLBACK_CONFIDENCE)
        .with_explanation("heuristic fallback; forecasting worker unavailable")
        .with_metadata(json!({ "method": "fallback_heuristic", "points": values.len() }))
}

fn spike(request: &ForecastRequest, values: &[f64]) -> Vec<FailurePrediction> {
    let Some((&last, rest)) = values.split_last() else {
        return Vec::new();
    };
    if rest.is_empty() {
        return Vec::new();
    }
    let baseline = mean(rest);
    if last <= baseline * 2.0 || last <= 0.0 {
        return Vec::new();
    }
    let component = request
        .history
        .last()
        .and_then(|p| p.label.clone())
        .unwrap_or_else(|| request.target.clone());
    vec![FailurePrediction {
        component,
        probability: 0.3,
        expected_at: request.as_of + Duration::hours(request.ptype.time_horizon_hours() as i64),
        severity: Severity::Medium,
        indicators: vec![format!("latest {last:.0} is over twice the mean {baseline:.1}")],
    }]
}

fn most_common(request: &ForecastRequest) -> Vec<BehaviorPrediction> {
    let mut counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut total = 0usize;
    for label in request.history.points.iter().filter_map(|p| p.label.as_deref()) {
        *counts.entry(split_label(label, &request.target)).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|((segment, action), n)| BehaviorPrediction {
            segment: segment.to_string(),
            action: action.to_string(),
            likelihood: n as f64 / total as f64,
        })
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foresight_core::{DataSourceKind, HistoricalPoint, HistoricalSeries};

    fn request(ptype: PredictionType, values: &[f64]) -> ForecastRequest {
        let now = Utc::now();
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| HistoricalPoint::new(now - Duration::hours((values.len() - i) as i64), *v))
            .collect();
        ForecastRequest::new(
            ptype,
            "subject",
            HistoricalSeries::new(ptype.data_source(), "subject", points),
            now,
        )
    }

    #[test]
    fn every_type_yields_low_confidence_output() {
        for ptype in PredictionType::ALL {
            let out = heuristic_forecast(&request(ptype, &[1.0, 2.0, 3.0]));
            assert_eq!(out.confidence, FALLBACK_CONFIDENCE);
            assert_eq!(out.payload.prediction_type(), ptype);
        }
    }

    #[test]
    fn empty_history_gives_empty_payload() {
        let req = ForecastRequest::new(
            PredictionType::Load,
            "api",
            HistoricalSeries::new(DataSourceKind::PerformanceMetrics, "api", Vec::new()),
            Utc::now(),
        );
        assert!(heuristic_forecast(&req).payload.is_empty());
    }

    #[test]
    fn failure_spike_is_reported() {
        let out = heuristic_forecast(&request(PredictionType::Failure, &[2.0, 3.0, 2.0, 20.0]));
        assert_eq!(out.payload.len(), 1);
    }
}
