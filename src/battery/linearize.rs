//! Least-squares helpers turning test and degradation data into straight lines.

use std::collections::BTreeMap;

use average::{Estimate, Mean};
use itertools::Itertools;
use linfa::{Dataset, traits::Fit};
use linfa_linear::LinearRegression;
use ndarray::{Array1, Array2};
use ordered_float::OrderedFloat;

use crate::battery::{
    Direction,
    ModelError,
    config::{DegradationPoint, TestSample},
};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    pub const fn through_origin(slope: f64) -> Self {
        Self { slope, intercept: 0.0 }
    }

    pub fn at(&self, x: f64) -> f64 {
        self.slope.mul_add(x, self.intercept)
    }
}

/// Measured DC-to-AC conversion factor at the given AC power.
#[derive(Copy, Clone, Debug)]
pub struct EfficiencyPoint {
    pub power: f64,
    pub factor: f64,
}

fn dataset(x: &[f64], y: &[f64]) -> Result<Dataset<f64, f64, ndarray::Ix1>, ModelError> {
    if x.len() != y.len() {
        return Err(ModelError::DataFormat(format!(
            "{} abscissae do not match {} ordinates",
            x.len(),
            y.len(),
        )));
    }
    if x.is_empty() {
        return Err(ModelError::DataFormat("nothing to fit".to_string()));
    }
    if x.iter().chain(y).any(|value| !value.is_finite()) {
        return Err(ModelError::DataFormat("non-finite sample".to_string()));
    }
    let records = Array2::from_shape_vec((x.len(), 1), x.to_vec())
        .map_err(|error| ModelError::DataFormat(error.to_string()))?;
    Ok(Dataset::new(records, Array1::from_vec(y.to_vec())))
}

/// Fit `y = slope · x`.
pub fn fit_through_origin(x: &[f64], y: &[f64]) -> Result<f64, ModelError> {
    if x.iter().all(|x| *x == 0.0) {
        return Err(ModelError::DataFormat("all abscissae are zero".to_string()));
    }
    let regression = LinearRegression::new()
        .with_intercept(false)
        .fit(&dataset(x, y)?)
        .map_err(|error| ModelError::DataFormat(error.to_string()))?;
    Ok(regression.params()[0])
}

/// Ordinary least squares `y = slope · x + intercept`.
pub fn least_squares_line(x: &[f64], y: &[f64]) -> Result<Line, ModelError> {
    let n_distinct = x.iter().copied().map(OrderedFloat).unique().count();
    if n_distinct < 2 {
        return Err(ModelError::DataFormat(format!(
            "a line needs at least two distinct abscissae, got {n_distinct}"
        )));
    }
    let regression = LinearRegression::new()
        .fit(&dataset(x, y)?)
        .map_err(|error| ModelError::DataFormat(error.to_string()))?;
    Ok(Line { slope: regression.params()[0], intercept: regression.intercept() })
}

/// Capacity lost per unit of depth of discharge, fitted through the origin.
///
/// Each curve point contributes `capacity_loss / cycles`, the loss of a single cycle at that depth.
pub fn degradation_slope(
    curve: &[DegradationPoint],
    capacity_loss: f64,
) -> Result<f64, ModelError> {
    let (x, y): (Vec<f64>, Vec<f64>) =
        curve.iter().map(|point| (point.dod, capacity_loss / point.cycles)).unzip();
    fit_through_origin(&x, &y)
}

/// C-rate at which the implied DC current stays within the inverter ceiling.
pub fn effective_c_rate_limit(max_c_rate: f64, nominal_capacity: f64, max_dc_current: f64) -> f64 {
    if max_c_rate * nominal_capacity > max_dc_current {
        max_dc_current / nominal_capacity
    } else {
        max_c_rate
    }
}

/// Average repeated trials at the same C-rate, sorted by the C-rate.
pub fn average_duplicate_trials(samples: &[TestSample]) -> Vec<TestSample> {
    let mut groups: BTreeMap<OrderedFloat<f64>, Mean> = BTreeMap::new();
    for sample in samples {
        groups.entry(OrderedFloat(sample.c_rate)).or_default().add(sample.value);
    }
    groups
        .into_iter()
        .map(|(c_rate, mean)| TestSample { trial: None, c_rate: c_rate.0, value: mean.mean() })
        .collect_vec()
}

/// DC power ceiling in kW at the given C-rate, based on the measured average voltages.
///
/// Samples must have been averaged already. An exact tested C-rate, compared at two decimals,
/// takes the measured voltage. Otherwise, the voltage is extrapolated from a line fit against
/// the current.
pub fn power_rate_limit(
    nominal_capacity: f64,
    max_c_rate: f64,
    voltage_samples: &[TestSample],
    direction: Direction,
) -> Result<f64, ModelError> {
    let current = max_c_rate * nominal_capacity;
    let target = round_c_rate(max_c_rate);
    let matches = voltage_samples
        .iter()
        .filter(|sample| round_c_rate(sample.c_rate) == target)
        .collect_vec();
    let voltage = match matches.as_slice() {
        [sample] => sample.value,
        [] => {
            let (currents, voltages): (Vec<f64>, Vec<f64>) = voltage_samples
                .iter()
                .map(|sample| (sample.c_rate * nominal_capacity, sample.value))
                .unzip();
            least_squares_line(&currents, &voltages)?.at(current)
        }
        _ => {
            return Err(ModelError::DataConsistency(format!(
                "{} {direction} voltage samples match C-rate {max_c_rate:.2}",
                matches.len(),
            )));
        }
    };
    Ok(current * voltage)
}

fn round_c_rate(c_rate: f64) -> OrderedFloat<f64> {
    OrderedFloat((c_rate * 100.0).round() / 100.0)
}

/// Line through the measured points below the cut, in DC power per AC power.
///
/// When no tested power lies below the cut, the curve is flat at the constant factor.
pub fn efficiency_line(
    samples: &[EfficiencyPoint],
    cut_power: f64,
    constant_factor: f64,
) -> Result<Line, ModelError> {
    let min_power = samples
        .iter()
        .map(|point| OrderedFloat(point.power))
        .min()
        .ok_or_else(|| ModelError::DataFormat("no efficiency samples".to_string()))?;
    if min_power.0 >= cut_power {
        return Ok(Line::through_origin(constant_factor));
    }
    let (x, y): (Vec<f64>, Vec<f64>) = samples
        .iter()
        .filter(|point| point.power < cut_power)
        .map(|point| (point.power, point.factor * point.power))
        .unzip();
    if x.iter().copied().map(OrderedFloat).unique().count() >= 2 {
        least_squares_line(&x, &y)
    } else {
        fit_through_origin(&x, &y).map(Line::through_origin)
    }
}
