use std::collections::BTreeMap;

use serde_json::json;

use foresight_core::{BehaviorPrediction, PredictionPayload};

use crate::job::ForecastRequest;
use crate::result::{ForecastError, ForecastOutput};

const TOP_ACTIONS: usize = 5;

/// Splits a behaviour label into `(segment, action)`.
///
/// Labels are `segment:action`; a bare `action` belongs to the request target.
pub(crate) fn split_label<'a>(label: &'a str, default_segment: &'a str) -> (&'a str, &'a str) {
    match label.split_once(':') {
        Some((segment, action)) => (segment, action),
        None => (default_segment, label),
    }
}

/// Next-action likelihoods per segment from observed action frequencies.
pub(crate) fn forecast(request: &ForecastRequest) -> Result<ForecastOutput, ForecastError> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    let mut counts: BTreeMap<(&str, &str), f64> = BTreeMap::new();
    let mut observed = 0usize;

    for point in &request.history.points {
        let Some(label) = point.label.as_deref() else {
            continue;
        };
        let weight = if point.value > 0.0 { point.value } else { 1.0 };
        let (segment, action) = split_label(label, &request.target);
        *totals.entry(segment).or_default() += weight;
        *counts.entry((segment, action)).or_default() += weight;
        observed += 1;
    }

    if observed == 0 {
        return Err(ForecastError::InsufficientData { needed: 1, got: 0 });
    }

    let mut items: Vec<BehaviorPrediction> = counts
        .into_iter()
        .map(|((segment, action), count)| BehaviorPrediction {
            segment: segment.to_string(),
            action: action.to_string(),
            likelihood: count / totals[segment],
        })
        .collect();
    items.sort_by(|a, b| b.likelihood.total_cmp(&a.likelihood));
    items.truncate(TOP_ACTIONS);

    let confidence = 50.0 + 40.0 * (observed as f64 / 100.0).min(1.0);

    Ok(ForecastOutput::new(PredictionPayload::Behavior(items), confidence)
        .with_explanation(format!(
            "action frequencies over {observed} event(s) in {} segment(s)",
            totals.len()
        ))
        .with_metadata(json!({ "method": "action_frequency", "events": observed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use foresight_core::{DataSourceKind, HistoricalPoint, HistoricalSeries, PredictionType};

    #[test]
    fn most_frequent_action_ranks_first() {
        let now = Utc::now();
        let labels = ["trial:upgrade", "trial:churn", "trial:upgrade", "browse"];
        let points = labels
            .iter()
            .map(|l| HistoricalPoint::labelled(now, 1.0, *l))
            .collect();
        let req = ForecastRequest::new(
            PredictionType::Behavior,
            "visitors",
            HistoricalSeries::new(DataSourceKind::UserBehavior, "visitors", points),
            now,
        );

        let out = forecast(&req).unwrap();
        let PredictionPayload::Behavior(items) = out.payload else {
            panic!("expected behavior payload");
        };
        let trial: Vec<_> = items.iter().filter(|i| i.segment == "trial").collect();
        assert_eq!(trial[0].action, "upgrade");
        assert!((trial[0].likelihood - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(trial[1].action, "churn");

        // a bare label belongs to the target segment
        let browse = items.iter().find(|i| i.action == "browse").unwrap();
        assert_eq!(browse.segment, "visitors");
        assert_eq!(browse.likelihood, 1.0);
    }
}
