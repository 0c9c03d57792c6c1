use chrono::Duration;
use serde_json::json;

use foresight_core::{LoadPrediction, PredictionPayload};

use crate::job::ForecastRequest;
use crate::result::{ForecastError, ForecastOutput};
use crate::stats::{linear_fit, mean, stddev_sample};

const MIN_POINTS: usize = 3;

/// Hourly load forecast: least-squares trend with a 95% residual band.
pub(crate) fn forecast(request: &ForecastRequest) -> Result<ForecastOutput, ForecastError> {
    let points = &request.history.points;
    if points.len() < MIN_POINTS {
        return Err(ForecastError::InsufficientData {
            needed: MIN_POINTS,
            got: points.len(),
        });
    }

    let origin = points[0].at;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| (p.at - origin).num_seconds() as f64 / 3600.0)
        .collect();
    let ys: Vec<f64> = request.history.values().collect();
    let (slope, intercept) = linear_fit(&xs, &ys);

    let residuals: Vec<f64> = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| y - (intercept + slope * x))
        .collect();
    let resid_std = stddev_sample(&residuals, mean(&residuals));
    let band = 1.96 * resid_std;

    let base_x = (request.as_of - origin).num_seconds() as f64 / 3600.0;
    let horizon = request.ptype.time_horizon_hours();
    let forecast = (1..=horizon)
        .map(|h| {
            let expected = (intercept + slope * (base_x + h as f64)).max(0.0);
            LoadPrediction {
                at: request.as_of + Duration::hours(h as i64),
                expected,
                lower: (expected - band).max(0.0),
                upper: expected + band,
            }
        })
        .collect();

    let level = mean(&ys).abs().max(f64::EPSILON);
    let variation = (resid_std / level).min(0.4);
    let confidence = 90.0 - variation * 100.0;

    Ok(ForecastOutput::new(PredictionPayload::Load(forecast), confidence)
        .with_explanation(format!(
            "linear load trend {slope:+.3}/h over {} samples, band ±{band:.2}",
            points.len()
        ))
        .with_metadata(json!({
            "method": "linear_trend",
            "slope_per_hour": slope,
            "residual_std": resid_std,
        })))
}
