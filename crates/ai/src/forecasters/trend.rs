use serde_json::json;

use foresight_core::{PredictionPayload, TrendDirection, TrendPrediction};

use crate::job::ForecastRequest;
use crate::result::{ForecastError, ForecastOutput};
use crate::stats::{linear_fit, mean};

const MIN_POINTS: usize = 3;

/// Relative hourly change below which a metric counts as flat.
pub(crate) const FLAT_TOLERANCE: f64 = 0.001;

pub(crate) fn direction_of(slope: f64, level: f64) -> TrendDirection {
    let relative = slope / level.abs().max(f64::EPSILON);
    if relative > FLAT_TOLERANCE {
        TrendDirection::Rising
    } else if relative < -FLAT_TOLERANCE {
        TrendDirection::Falling
    } else {
        TrendDirection::Flat
    }
}

/// Business metric trend: least-squares slope, confidence from the fit's r².
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

    let my = mean(&ys);
    let ss_tot: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
    let ss_res: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let r2 = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    };

    let horizon = request.ptype.time_horizon_hours() as f64;
    let now_x = (request.as_of - origin).num_seconds() as f64 / 3600.0;
    let item = TrendPrediction {
        metric: request.target.clone(),
        direction: direction_of(slope, my),
        slope,
        projected: intercept + slope * (now_x + horizon),
    };

    Ok(ForecastOutput::new(PredictionPayload::Trend(vec![item]), 40.0 + 55.0 * r2)
        .with_explanation(format!("slope {slope:+.4}/h, r²={r2:.2}"))
        .with_metadata(json!({ "method": "least_squares", "r2": r2 })))
}
