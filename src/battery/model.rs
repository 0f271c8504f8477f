use average::Mean;
use enumset::EnumSet;
use itertools::Itertools;

use crate::{
    battery::{
        AddOn,
        Direction,
        ModelError,
        config::{BatteryAssetConfig, EfficiencyApproximation, TestData, TestSample},
        linearize::{
            EfficiencyPoint,
            Line,
            average_duplicate_trials,
            degradation_slope,
            effective_c_rate_limit,
            efficiency_line,
            least_squares_line,
            power_rate_limit,
        },
    },
    prelude::*,
    quantity::{Quantity, energy::KilowattHours, power::Kilowatts},
};

/// Degraded energy per discharged DC energy when no cycle-life curve is known.
const DEFAULT_DEGRADATION_SLOPE: f64 = 4.5e-5;

/// Boundary between the low and high efficiency segments, share of the inverter nominal power.
const CUT_SHARE: f64 = 0.1;

/// Efficiency samples at or below this C-rate are left out of the constant efficiency.
const MIN_CONSTANT_EFFICIENCY_C_RATE: f64 = 0.1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Segment {
    pub min: Kilowatts,
    pub max: Kilowatts,
}

impl Segment {
    pub fn is_usable(&self) -> bool {
        self.min < self.max
    }
}

/// Linear parameters of one flow direction.
#[derive(Clone, Debug)]
pub struct FlowLimits {
    pub direction: Direction,

    /// C-rate after the inverter current clamp.
    pub c_rate: f64,

    pub ac_max: Kilowatts,
    pub dc_max: Kilowatts,

    /// Low and high efficiency segments in AC power.
    pub segments: [Segment; 2],

    /// Constant efficiency, `0..=1`.
    pub efficiency: f64,

    /// Low-segment DC power as a function of AC power, if fitted.
    pub efficiency_line: Option<Line>,

    /// Nominal voltage seen in this direction, V.
    pub nominal_voltage: f64,
}

impl FlowLimits {
    /// DC power per unit of AC power at the constant efficiency.
    ///
    /// Charging stores less than it takes, discharging draws more than it delivers.
    pub fn constant_factor(&self) -> f64 {
        match self.direction {
            Direction::Charge => self.efficiency,
            Direction::Discharge => self.efficiency.recip(),
        }
    }

    pub fn has_usable_segments(&self) -> bool {
        self.segments.iter().all(Segment::is_usable)
    }

    /// Move the cut to where the fitted line meets the constant line.
    fn align_cut(&mut self) {
        let Some(line) = self.efficiency_line else {
            return;
        };
        let denominator = self.constant_factor() - line.slope;
        if denominator.abs() < f64::EPSILON {
            return;
        }
        let cut = line.intercept / denominator;
        if cut.is_finite() && cut > 0.0 && cut < self.ac_max.0 {
            self.segments[0].max = Quantity(cut);
            self.segments[1].min = Quantity(cut);
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum EnergyBounds {
    Static { min: KilowattHours, max: KilowattHours },

    /// Energy-content limits shrinking with the DC current, in kWh against kA.
    Dynamic { charge: Line, discharge: Line },
}

/// Linear parameters of one battery asset for one day.
#[derive(Clone, Debug)]
pub struct BatteryModel {
    pub available_energy: KilowattHours,
    pub initial_energy: KilowattHours,
    pub charge: FlowLimits,
    pub discharge: FlowLimits,
    pub energy_bounds: EnergyBounds,

    /// Degraded energy per discharged DC energy.
    pub degradation_slope: f64,

    piecewise_efficiency: bool,
}

impl BatteryModel {
    #[instrument(skip_all, fields(initial_soc = initial_soc))]
    pub fn configure(
        config: &BatteryAssetConfig,
        initial_soc: f64,
        add_ons: EnumSet<AddOn>,
    ) -> Result<Self, ModelError> {
        config.validate()?;
        if !initial_soc.is_finite() || !(0.0..=100.0).contains(&initial_soc) {
            return Err(ModelError::Configuration(format!(
                "initial SoC must be within 0..=100%, got {initial_soc}"
            )));
        }

        let nominal_power = config.inverter.nominal_power;
        let inverter_current = nominal_power.0 / (3.0_f64.sqrt() * config.inverter.nominal_voltage);
        let capacity = config.nominal_capacity();
        let available_energy = config.available_energy();
        let cut = nominal_power * CUT_SHARE;
        debug!(inverter_current, capacity, ?cut, "configuring…");

        let flow_limits = |direction, max_c_rate: f64, min_power_percent: f64, efficiency: f64| {
            let c_rate =
                effective_c_rate_limit(max_c_rate, capacity, config.inverter.max_dc_current);
            FlowLimits {
                direction,
                c_rate,
                ac_max: nominal_power,
                dc_max: Quantity(c_rate * capacity * config.nominal_voltage),
                segments: [
                    Segment { min: nominal_power * (min_power_percent / 100.0), max: cut },
                    Segment { min: cut, max: nominal_power },
                ],
                efficiency: efficiency / 100.0,
                efficiency_line: None,
                nominal_voltage: config.nominal_voltage,
            }
        };
        let mut charge = flow_limits(
            Direction::Charge,
            config.max_charge_c_rate,
            config.min_charge_power,
            config.charge_efficiency,
        );
        let mut discharge = flow_limits(
            Direction::Discharge,
            config.max_discharge_c_rate,
            config.min_discharge_power,
            config.discharge_efficiency,
        );

        let mut energy_bounds = EnergyBounds::Static {
            min: available_energy * (config.min_soc.max(config.reserve_soc) / 100.0),
            max: available_energy * (config.max_soc / 100.0),
        };

        let degradation_slope = if config.degradation_curve.is_empty() {
            DEFAULT_DEGRADATION_SLOPE
        } else {
            degradation_slope(&config.degradation_curve, 100.0 - config.eol_criterion)?
        };

        if let Some(test_data) = &config.test_data {
            if add_ons.contains(AddOn::DynamicSoc) {
                energy_bounds = apply_voltage_tests(
                    test_data,
                    capacity,
                    available_energy,
                    &mut charge,
                    &mut discharge,
                )?;
            }
            apply_efficiency_tests(
                test_data,
                capacity,
                add_ons.contains(AddOn::PiecewiseEfficiency),
                &mut charge,
                &mut discharge,
            )?;
        }

        if add_ons.contains(AddOn::PiecewiseEfficiency) {
            // One-point linearization at 1C where the tests gave nothing:
            for limits in [&mut charge, &mut discharge] {
                if limits.efficiency_line.is_none() {
                    limits.efficiency_line = Some(Line::through_origin(limits.constant_factor()));
                }
            }
        }

        let piecewise_efficiency = add_ons.contains(AddOn::PiecewiseEfficiency)
            && charge.has_usable_segments()
            && discharge.has_usable_segments();
        if add_ons.contains(AddOn::PiecewiseEfficiency) && !piecewise_efficiency {
            warn!(
                charge = ?charge.segments,
                discharge = ?discharge.segments,
                "no usable efficiency segment, falling back to constant efficiency",
            );
        }

        let model = Self {
            available_energy,
            initial_energy: available_energy * (initial_soc / 100.0),
            charge,
            discharge,
            energy_bounds,
            degradation_slope,
            piecewise_efficiency,
        };
        debug!(
            charge_dc_max = ?model.charge.dc_max,
            discharge_dc_max = ?model.discharge.dc_max,
            model.degradation_slope,
            model.piecewise_efficiency,
            "configured",
        );
        Ok(model)
    }

    /// Whether the two-segment efficiency curve applies to both directions.
    pub const fn uses_piecewise_efficiency(&self) -> bool {
        self.piecewise_efficiency
    }
}

/// Refine the DC ceilings and derive the dynamic energy bounds from the voltage and limit tests.
fn apply_voltage_tests(
    test_data: &TestData,
    capacity: f64,
    available_energy: KilowattHours,
    charge: &mut FlowLimits,
    discharge: &mut FlowLimits,
) -> Result<EnergyBounds, ModelError> {
    let mut limit_lines = Vec::with_capacity(2);
    for (limits, voltages, energy_limits) in [
        (charge, &test_data.charge_voltage, &test_data.charge_limit),
        (discharge, &test_data.discharge_voltage, &test_data.discharge_limit),
    ] {
        let voltages = average_duplicate_trials(voltages);
        if voltages.is_empty() {
            return Err(ModelError::DataFormat(format!(
                "{} voltage tests are required for dynamic SoC",
                limits.direction,
            )));
        }
        let mean: Mean = voltages.iter().map(|sample| sample.value).collect();
        limits.nominal_voltage = mean.mean();
        limits.dc_max =
            Quantity(power_rate_limit(capacity, limits.c_rate, &voltages, limits.direction)?);

        let (currents, energies): (Vec<f64>, Vec<f64>) = average_duplicate_trials(energy_limits)
            .iter()
            .map(|sample| (sample.c_rate * capacity, sample.value * available_energy.0 / 100.0))
            .unzip();
        limit_lines.push(least_squares_line(&currents, &energies)?);
        debug!(
            direction = %limits.direction,
            nominal_voltage = limits.nominal_voltage,
            dc_max = ?limits.dc_max,
            "applied voltage tests",
        );
    }
    Ok(EnergyBounds::Dynamic { charge: limit_lines[0], discharge: limit_lines[1] })
}

fn apply_efficiency_tests(
    test_data: &TestData,
    capacity: f64,
    piecewise: bool,
    charge: &mut FlowLimits,
    discharge: &mut FlowLimits,
) -> Result<(), ModelError> {
    let (charge_samples, discharge_samples) = match test_data.efficiency_approximation {
        EfficiencyApproximation::Separate => (
            as_fractions(&test_data.charge_efficiency),
            as_fractions(&test_data.discharge_efficiency),
        ),
        EfficiencyApproximation::RoundTrip => {
            let one_way = average_duplicate_trials(&test_data.round_trip_efficiency)
                .into_iter()
                .map(|sample| TestSample { value: (sample.value / 100.0).sqrt(), ..sample })
                .collect_vec();
            (one_way.clone(), one_way)
        }
    };

    for (limits, samples) in [(charge, charge_samples), (discharge, discharge_samples)] {
        if samples.is_empty() {
            continue;
        }
        if samples.iter().any(|sample| !(sample.value > 0.0 && sample.value <= 1.0)) {
            return Err(ModelError::DataFormat(format!(
                "{} efficiency tests must be within 0..=100%",
                limits.direction,
            )));
        }
        limits.efficiency = constant_efficiency(&samples);

        if piecewise && limits.has_usable_segments() {
            let points = samples
                .iter()
                .map(|sample| {
                    let factor = match limits.direction {
                        Direction::Charge => sample.value,
                        Direction::Discharge => sample.value.recip(),
                    };
                    EfficiencyPoint {
                        power: sample.c_rate * capacity * limits.nominal_voltage,
                        factor,
                    }
                })
                .collect_vec();
            let line =
                efficiency_line(&points, limits.segments[0].max.0, limits.constant_factor())?;
            limits.efficiency_line = Some(line);
            limits.align_cut();
        }
        debug!(
            direction = %limits.direction,
            efficiency = limits.efficiency,
            line = ?limits.efficiency_line,
            segments = ?limits.segments,
            "applied efficiency tests",
        );
    }
    Ok(())
}

fn as_fractions(samples: &[TestSample]) -> Vec<TestSample> {
    average_duplicate_trials(samples)
        .into_iter()
        .map(|sample| TestSample { value: sample.value / 100.0, ..sample })
        .collect()
}

fn constant_efficiency(samples: &[TestSample]) -> f64 {
    let mean: Mean = samples
        .iter()
        .filter(|sample| sample.c_rate > MIN_CONSTANT_EFFICIENCY_C_RATE)
        .map(|sample| sample.value)
        .collect();
    if mean.is_empty() {
        samples.iter().map(|sample| sample.value).collect::<Mean>().mean()
    } else {
        mean.mean()
    }
}
