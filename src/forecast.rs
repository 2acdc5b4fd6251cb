//! Forecasting over aggregated series
//!
//! The statistical model sits behind [`ForecastModel`]. Future timestamps are
//! projected from the last observation in steps of the inferred frequency, so
//! a series without a dominant spacing cannot be forecast at all.

use crate::error::{Error, Result};
use crate::frequency::infer_frequency;
use crate::model::TimeRecord;
use crate::table::micros_to_datetime;
use std::collections::BTreeMap;

/// Point forecast with interval bounds, one entry per future step
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Predictions {
    /// Point estimates
    pub point: Vec<f64>,
    /// Lower interval bounds
    pub lower: Vec<f64>,
    /// Upper interval bounds
    pub upper: Vec<f64>,
}

impl Predictions {
    /// Number of steps
    pub fn len(&self) -> usize {
        self.point.len()
    }

    /// Whether there are no steps
    pub fn is_empty(&self) -> bool {
        self.point.is_empty()
    }
}

/// A fitted-on-demand forecasting model
pub trait ForecastModel: Send + Sync {
    /// Model name reported in responses
    fn name(&self) -> &str;

    /// Model version reported in responses
    fn version(&self) -> &str;

    /// Forecast `horizon` steps past the end of `values`
    fn predict(&self, values: &[f64], horizon: usize) -> Result<Predictions>;
}

/// Random walk with drift
///
/// The point forecast extends the average step between the first and last
/// observation. The interval half-width at step `h` is `z * sigma * sqrt(h)`,
/// where `sigma` is the standard deviation of the first differences.
#[derive(Debug, Clone)]
pub struct DriftForecaster {
    z_score: f64,
}

impl Default for DriftForecaster {
    fn default() -> Self {
        Self { z_score: 1.96 }
    }
}

impl DriftForecaster {
    /// Forecaster with intervals `z_score` standard deviations wide
    pub fn new(z_score: f64) -> Self {
        Self { z_score }
    }
}

impl ForecastModel for DriftForecaster {
    fn name(&self) -> &str {
        "drift"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn predict(&self, values: &[f64], horizon: usize) -> Result<Predictions> {
        let (first, last) = match values {
            [first, .., last] => (*first, *last),
            _ => {
                return Err(Error::Forecast(format!(
                    "need at least 2 observations, got {}",
                    values.len()
                )))
            },
        };

        let steps = (values.len() - 1) as f64;
        let drift = (last - first) / steps;

        let diffs: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
        let sigma = if diffs.len() > 1 {
            let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
            let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>()
                / (diffs.len() - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };

        let mut predictions = Predictions::default();
        for h in 1..=horizon {
            let h = h as f64;
            let point = last + h * drift;
            let half_width = self.z_score * sigma * h.sqrt();
            predictions.point.push(point);
            predictions.lower.push(point - half_width);
            predictions.upper.push(point + half_width);
        }
        Ok(predictions)
    }
}

/// Forecast a series and place each step on the inferred time grid
///
/// Rows with a null timestamp or a null or non-finite value are not fed to
/// the model. Each returned record carries `point`, `lower` and `upper`.
///
/// # Errors
///
/// [`Error::FrequencyIndeterminate`] if the timestamps have no dominant
/// spacing, and [`Error::Forecast`] if the model fails, returns a step count
/// other than `horizon`, or the projected timestamps overflow.
pub fn forecast(
    model: &dyn ForecastModel,
    values: &[Option<f64>],
    timestamps: &[Option<i64>],
    horizon: usize,
) -> Result<Vec<TimeRecord>> {
    let frequency = infer_frequency(timestamps)?;
    let step = frequency
        .num_microseconds()
        .ok_or_else(|| Error::Forecast(format!("frequency {} overflows", frequency)))?;

    let mut observed: Vec<(i64, f64)> = timestamps
        .iter()
        .zip(values)
        .filter_map(|(ts, v)| match (ts, v) {
            (Some(ts), Some(v)) if v.is_finite() => Some((*ts, *v)),
            _ => None,
        })
        .collect();
    observed.sort_by_key(|(ts, _)| *ts);

    let series: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();
    let predictions = model.predict(&series, horizon)?;
    if [&predictions.point, &predictions.lower, &predictions.upper]
        .iter()
        .any(|steps| steps.len() != horizon)
    {
        return Err(Error::Forecast(format!(
            "model {} returned {}/{}/{} point/lower/upper steps for horizon {}",
            model.name(),
            predictions.point.len(),
            predictions.lower.len(),
            predictions.upper.len(),
            horizon
        )));
    }

    let last = timestamps.iter().flatten().copied().max().ok_or_else(|| {
        Error::Forecast("no timestamps to project from".to_string())
    })?;

    (0..predictions.len())
        .map(|i| {
            let timestamp = (i as i64 + 1)
                .checked_mul(step)
                .and_then(|offset| last.checked_add(offset))
                .and_then(micros_to_datetime)
                .ok_or_else(|| Error::Forecast("projected timestamp out of range".to_string()))?;

            let data = BTreeMap::from([
                ("point".to_string(), Some(predictions.point[i])),
                ("lower".to_string(), Some(predictions.lower[i])),
                ("upper".to_string(), Some(predictions.upper[i])),
            ]);
            Ok(TimeRecord { timestamp, data })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400_000_000;

    fn daily(n: i64) -> Vec<Option<i64>> {
        (0..n).map(|i| Some(i * DAY)).collect()
    }

    #[test]
    fn test_drift_on_a_line() {
        let model = DriftForecaster::default();
        let p = model.predict(&[1.0, 2.0, 3.0, 4.0], 3).unwrap();
        assert_eq!(p.point, vec![5.0, 6.0, 7.0]);
        // Constant steps: no spread
        assert_eq!(p.lower, p.point);
        assert_eq!(p.upper, p.point);
    }

    #[test]
    fn test_intervals_widen() {
        let model = DriftForecaster::new(1.96);
        let p = model.predict(&[0.0, 2.0, 1.0, 3.0, 2.0, 4.0], 4).unwrap();
        let widths: Vec<f64> = p.upper.iter().zip(&p.lower).map(|(u, l)| u - l).collect();
        assert!(widths.windows(2).all(|w| w[1] > w[0]));
        for i in 0..4 {
            assert!(p.lower[i] < p.point[i] && p.point[i] < p.upper[i]);
        }
    }

    #[test]
    fn test_too_few_observations() {
        let model = DriftForecaster::default();
        assert!(matches!(model.predict(&[1.0], 3), Err(Error::Forecast(_))));
        assert!(model.predict(&[], 3).is_err());
    }

    #[test]
    fn test_forecast_projects_timestamps() {
        let values: Vec<Option<f64>> = (0..5).map(|i| Some(i as f64)).collect();
        let records = forecast(&DriftForecaster::default(), &values, &daily(5), 2).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp.timestamp_micros(), 5 * DAY);
        assert_eq!(records[1].timestamp.timestamp_micros(), 6 * DAY);
        assert_eq!(records[0].data["point"], Some(5.0));
        assert!(records[1].data.contains_key("lower"));
        assert!(records[1].data.contains_key("upper"));
    }

    #[test]
    fn test_forecast_skips_null_values() {
        let values = vec![Some(0.0), None, Some(2.0), Some(f64::NAN), Some(4.0)];
        let records = forecast(&DriftForecaster::default(), &values, &daily(5), 1).unwrap();
        assert_eq!(records[0].data["point"], Some(6.0));
        assert_eq!(records[0].timestamp.timestamp_micros(), 5 * DAY);
    }

    #[test]
    fn test_forecast_requires_frequency() {
        let values = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)];
        let ts = vec![Some(0), Some(10), Some(25), Some(70)];
        assert!(matches!(
            forecast(&DriftForecaster::default(), &values, &ts, 3),
            Err(Error::FrequencyIndeterminate { .. })
        ));
    }

    #[test]
    fn test_zero_horizon() {
        let values: Vec<Option<f64>> = (0..3).map(|i| Some(i as f64)).collect();
        let records = forecast(&DriftForecaster::default(), &values, &daily(3), 0).unwrap();
        assert!(records.is_empty());
    }

    struct Ragged;

    impl ForecastModel for Ragged {
        fn name(&self) -> &str {
            "ragged"
        }

        fn version(&self) -> &str {
            "0"
        }

        fn predict(&self, _series: &[f64], horizon: usize) -> Result<Predictions> {
            Ok(Predictions {
                point: vec![1.0; horizon],
                lower: vec![],
                upper: vec![],
            })
        }
    }

    #[test]
    fn test_uneven_predictions_are_rejected() {
        let values: Vec<Option<f64>> = (0..5).map(|i| Some(i as f64)).collect();
        assert!(matches!(
            forecast(&Ragged, &values, &daily(5), 3),
            Err(Error::Forecast(_))
        ));
    }
}
