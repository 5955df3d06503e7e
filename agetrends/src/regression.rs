//! Ridge-regularised polynomial trend curves.
//!
//! A curve is fitted independently for each (metric, series) pair, with the day offset as the
//! explanatory variable. Features `x, x², ..., x^d` are centred together with the response, so the
//! intercept is left out of the penalty:
//!
//! ```text
//! (XcᵀXc + αI) w = Xcᵀ yc,    b = ȳ - x̄ᵀw
//! ```
//!
//! The histogram variant fits a single curve per metric over the age bands instead.

use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AgeTrendsError, AgeTrendsResult};
use crate::series::{Metric, Observation, SeriesKey};

pub const MIN_DEGREE: usize = 1;
pub const MAX_DEGREE: usize = 9;
/// Histogram curves are drawn at the middle of each 10-year band.
const AGE_BAND_CENTRE: f64 = 5.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RegressionParams {
    pub degree: usize,
    /// Days extrapolated past the last observation.
    pub forecast: u32,
    /// Fit `Value_by_pop` instead of `Value`.
    pub by_population: bool,
    pub alpha: f64,
    pub points: usize,
}

impl RegressionParams {
    pub fn new(
        degree: usize,
        forecast: u32,
        by_population: bool,
        config: &Config,
    ) -> AgeTrendsResult<Self> {
        let params = Self {
            degree,
            forecast,
            by_population,
            alpha: config.ridge_alpha,
            points: config.curve_points,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> AgeTrendsResult<()> {
        if !(MIN_DEGREE..=MAX_DEGREE).contains(&self.degree) {
            return Err(AgeTrendsError::InvalidParameter(format!(
                "degree must be between {MIN_DEGREE} and {MAX_DEGREE}, got {}",
                self.degree
            )));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(AgeTrendsError::InvalidParameter(format!(
                "ridge alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }
        if self.points < 2 {
            return Err(AgeTrendsError::InvalidParameter(format!(
                "a curve needs at least 2 points, got {}",
                self.points
            )));
        }
        Ok(())
    }

    fn response(&self, observation: &Observation) -> Option<f64> {
        if self.by_population {
            observation.value_per_population
        } else {
            observation.value
        }
    }
}

/// A sampled trend curve. `series_key` is absent for histogram curves, which span every series of
/// the input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RegressionCurve {
    pub metric: Metric,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_key: Option<String>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

fn powers(x: f64, degree: usize) -> impl Iterator<Item = f64> {
    (1..=degree as i32).map(move |p| x.powi(p))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RidgeModel {
    weights: DVector<f64>,
    intercept: f64,
}

impl RidgeModel {
    pub fn fit(x: &[f64], y: &[f64], degree: usize, alpha: f64) -> AgeTrendsResult<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(AgeTrendsError::InvalidParameter(format!(
                "cannot fit {} x values against {} y values",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        let mut design = DMatrix::<f64>::zeros(n, degree);
        for (i, xi) in x.iter().enumerate() {
            for (j, feature) in powers(*xi, degree).enumerate() {
                design[(i, j)] = feature;
            }
        }
        let feature_means = DVector::from_iterator(degree, design.column_iter().map(|c| c.mean()));
        for (j, mean) in feature_means.iter().enumerate() {
            design.column_mut(j).add_scalar_mut(-mean);
        }
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let centred = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let transposed = design.transpose();
        let gram = &transposed * &design + DMatrix::<f64>::identity(degree, degree) * alpha;
        let rhs = &transposed * &centred;
        let weights = match gram.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&rhs),
            None => gram.lu().solve(&rhs).ok_or_else(|| {
                AgeTrendsError::InvalidParameter("singular regression system".to_string())
            })?,
        };
        let intercept = y_mean - feature_means.dot(&weights);
        Ok(Self { weights, intercept })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept
            + powers(x, self.weights.len())
                .zip(self.weights.iter())
                .map(|(feature, weight)| feature * weight)
                .sum::<f64>()
    }
}

/// `points` evenly spaced values from `start` to `end`, both included.
pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points).map(|i| start + step * i as f64).collect()
        }
    }
}

fn curve(
    x: &[f64],
    y: &[f64],
    end: f64,
    params: &RegressionParams,
) -> AgeTrendsResult<(Vec<f64>, Vec<f64>)> {
    let model = RidgeModel::fit(x, y, params.degree, params.alpha)?;
    let start = x.iter().copied().fold(f64::INFINITY, f64::min);
    let xs = linspace(start, end, params.points);
    let ys = xs.iter().map(|x| model.predict(*x)).collect();
    Ok((xs, ys))
}

/// One curve per (metric, series) pair of `observations`, spanning from the first observed day
/// offset to the last one plus the forecast horizon. Undated rows and rows without a response are
/// left out of the fit.
pub fn regression(
    observations: &[Observation],
    params: &RegressionParams,
) -> AgeTrendsResult<Vec<RegressionCurve>> {
    params.validate()?;
    let mut groups: BTreeMap<(Metric, &SeriesKey), (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for observation in observations.iter().filter(|o| o.has_valid_date()) {
        if let Some(y) = params.response(observation) {
            let (xs, ys) = groups
                .entry((observation.metric, observation.key.as_ref()))
                .or_default();
            xs.push(observation.day_offset as f64);
            ys.push(y);
        }
    }
    debug!("Fitting {} regression curves", groups.len());

    groups
        .into_par_iter()
        .map(|((metric, key), (x, y))| {
            let last = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let (x, y) = curve(&x, &y, last + f64::from(params.forecast), params)?;
            Ok(RegressionCurve {
                metric,
                series_key: Some(key.to_string()),
                x,
                y,
            })
        })
        .collect()
}

/// One curve per metric fitted across age bands, typically on a [`histogram_frame`]. The forecast
/// horizon does not apply; x values are shifted to the centre of each band.
///
/// [`histogram_frame`]: crate::select::histogram_frame
pub fn regression_histogram(
    observations: &[Observation],
    params: &RegressionParams,
) -> AgeTrendsResult<Vec<RegressionCurve>> {
    params.validate()?;
    let mut groups: BTreeMap<Metric, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for observation in observations {
        match params.response(observation) {
            Some(y) => {
                let (xs, ys) = groups.entry(observation.metric).or_default();
                xs.push(f64::from(observation.key.age));
                ys.push(y);
            }
            None => warn!(
                "Age band {} of {} has no value to fit",
                observation.key.age, observation.metric
            ),
        }
    }

    groups
        .into_iter()
        .map(|(metric, (x, y))| {
            let last = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let (x, y) = curve(&x, &y, last, params)?;
            Ok(RegressionCurve {
                metric,
                series_key: None,
                x: x.into_iter().map(|x| x + AGE_BAND_CENTRE).collect(),
                y,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::series::{BaseMetric, Sex};

    fn params(degree: usize, forecast: u32) -> RegressionParams {
        RegressionParams {
            degree,
            forecast,
            by_population: false,
            alpha: 1.0,
            points: 1000,
        }
    }

    fn assert_close(a: f64, b: f64, tolerance: f64) {
        assert!((a - b).abs() <= tolerance, "{a} is not within {tolerance} of {b}");
    }

    #[test]
    fn ridge_shrinks_an_exact_line() -> anyhow::Result<()> {
        // y = 2x + 1 on x = 0..=4: Sxx = 10, so the penalised slope is 2 * 10 / 11
        let x: Vec<f64> = (0..5).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|x| 2.0 * x + 1.0).collect();
        let model = RidgeModel::fit(&x, &y, 1, 1.0)?;
        let slope = 20.0 / 11.0;
        assert_close(model.predict(2.0), 5.0, 1e-9);
        assert_close(model.predict(3.0) - model.predict(2.0), slope, 1e-9);

        let unpenalised = RidgeModel::fit(&x, &y, 1, 0.0)?;
        assert_close(unpenalised.predict(10.0), 21.0, 1e-9);
        Ok(())
    }

    #[test]
    fn quadratic_is_recovered_closely() -> anyhow::Result<()> {
        let x: Vec<f64> = (0..50).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|x| 0.5 * x * x - 3.0 * x + 4.0).collect();
        let model = RidgeModel::fit(&x, &y, 2, 1.0)?;
        for xi in [5.0, 25.0, 45.0] {
            assert_close(model.predict(xi), 0.5 * xi * xi - 3.0 * xi + 4.0, 0.5);
        }
        Ok(())
    }

    #[test]
    fn single_point_gives_flat_curve() -> anyhow::Result<()> {
        let model = RidgeModel::fit(&[3.0], &[7.0], 3, 1.0)?;
        assert_close(model.predict(-10.0), 7.0, 1e-12);
        assert_close(model.predict(10.0), 7.0, 1e-12);
        assert!(RidgeModel::fit(&[], &[], 1, 1.0).is_err());
        assert!(RidgeModel::fit(&[1.0, 2.0], &[1.0], 1, 1.0).is_err());
        Ok(())
    }

    #[test]
    fn linspace_includes_both_ends() {
        let xs = linspace(0.0, 10.0, 1000);
        assert_eq!(xs.len(), 1000);
        assert_eq!(xs[0], 0.0);
        assert_close(xs[999], 10.0, 1e-9);
        assert_eq!(linspace(2.0, 5.0, 1), vec![2.0]);
    }

    #[test]
    fn degree_outside_range_is_rejected() {
        let config = Config::default();
        assert!(RegressionParams::new(0, 0, false, &config).is_err());
        assert!(RegressionParams::new(10, 0, false, &config).is_err());
        assert!(RegressionParams::new(9, 0, false, &config).is_ok());
        assert!(regression(&[], &params(12, 0)).is_err());
    }

    #[test]
    fn curves_per_series_extend_by_forecast() -> anyhow::Result<()> {
        let a = Arc::new(SeriesKey::new("France", "All", 80, Sex::Both));
        let b = Arc::new(SeriesKey::new("France", "All", 70, Sex::Both));
        let metric = Metric::raw(BaseMetric::Deaths);
        let mut observations: Vec<Observation> = (10..20)
            .flat_map(|o| {
                [
                    Observation::at_offset(a.clone(), o, metric, Some(o as f64)),
                    Observation::at_offset(b.clone(), o, metric, Some(2.0 * o as f64)),
                ]
            })
            .collect();
        // Rows without a value are not fitted
        observations.push(Observation::at_offset(a.clone(), 40, metric, None));

        let curves = regression(&observations, &params(1, 30))?;
        assert_eq!(curves.len(), 2);
        // Ordered by series key: age 70 sorts before 80
        assert_eq!(curves[0].series_key.as_deref(), Some("France|All|70|b"));
        for curve in &curves {
            assert_eq!(curve.x.len(), 1000);
            assert_eq!(curve.x[0], 10.0);
            assert_close(curve.x[999], 49.0, 1e-9);
        }
        assert!(curves[0].y[999] > curves[1].y[999]);

        let smoothing = regression(&observations, &params(1, 0))?;
        assert_close(smoothing[0].x[999], 19.0, 1e-9);
        Ok(())
    }

    #[test]
    fn histogram_curve_is_centred_on_bands() -> anyhow::Result<()> {
        let metric = Metric::raw(BaseMetric::Deaths);
        let observations: Vec<Observation> = (0..=10)
            .map(|band| {
                let key = Arc::new(SeriesKey::new("France", "All", band * 10, Sex::Both));
                Observation::at_offset(key, 100, metric, Some(f64::from(band)))
            })
            .collect();
        let curves = regression_histogram(&observations, &params(2, 30))?;
        assert_eq!(curves.len(), 1);
        assert_eq!(curves[0].series_key, None);
        assert_eq!(curves[0].x[0], 5.0);
        assert_close(curves[0].x[999], 105.0, 1e-9);

        let json = serde_json::to_value(&curves[0])?;
        assert_eq!(json["metric"], "Deaths");
        assert!(json.get("series_key").is_none());
        Ok(())
    }
}
