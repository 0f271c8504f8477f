use bon::Builder;
use serde::Deserialize;

use crate::{
    battery::ModelError,
    quantity::{energy::KilowattHours, power::Kilowatts},
};

/// Static battery asset descriptor as loaded from the scenario.
#[derive(Clone, Debug, Builder, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatteryAssetConfig {
    /// Energy content before degradation.
    pub nominal_energy: KilowattHours,

    /// Energy content net of degradation, defaults to [`BatteryAssetConfig::nominal_energy`].
    #[serde(default)]
    pub available_energy: Option<KilowattHours>,

    /// Battery nominal DC voltage, V.
    pub nominal_voltage: f64,

    pub inverter: InverterConfig,

    /// Minimum state of charge, %.
    #[serde(default)]
    #[builder(default)]
    pub min_soc: f64,

    /// Maximum state of charge, %.
    #[serde(default = "default_max_soc")]
    #[builder(default = default_max_soc())]
    pub max_soc: f64,

    /// Backup reserve, %.
    ///
    /// The effective floor is the larger of this and [`BatteryAssetConfig::min_soc`].
    #[serde(default)]
    #[builder(default)]
    pub reserve_soc: f64,

    /// Minimum charging power, % of the inverter nominal power.
    #[serde(default)]
    #[builder(default)]
    pub min_charge_power: f64,

    /// Minimum discharging power, % of the inverter nominal power.
    #[serde(default)]
    #[builder(default)]
    pub min_discharge_power: f64,

    pub max_charge_c_rate: f64,
    pub max_discharge_c_rate: f64,

    /// Constant charging efficiency, %.
    pub charge_efficiency: f64,

    /// Constant discharging efficiency, %.
    pub discharge_efficiency: f64,

    /// End-of-life criterion, % of the nominal capacity left.
    #[serde(default = "default_eol_criterion")]
    #[builder(default = default_eol_criterion())]
    pub eol_criterion: f64,

    #[serde(default)]
    #[builder(default)]
    pub degradation_curve: Vec<DegradationPoint>,

    #[serde(default)]
    pub test_data: Option<TestData>,
}

const fn default_max_soc() -> f64 {
    100.0
}

const fn default_eol_criterion() -> f64 {
    70.0
}

#[derive(Copy, Clone, Debug, Builder, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InverterConfig {
    /// Apparent power rating, kVA.
    pub nominal_power: Kilowatts,

    /// AC line voltage, V.
    #[serde(default = "default_inverter_voltage")]
    #[builder(default = default_inverter_voltage())]
    pub nominal_voltage: f64,

    /// DC current ceiling, kA.
    #[serde(default = "default_inverter_max_dc_current")]
    #[builder(default = default_inverter_max_dc_current())]
    pub max_dc_current: f64,
}

const fn default_inverter_voltage() -> f64 {
    400.0
}

const fn default_inverter_max_dc_current() -> f64 {
    1.0
}

/// Cycle life at a given depth of discharge.
#[derive(Copy, Clone, Debug, Deserialize)]
pub struct DegradationPoint {
    /// Depth of discharge, %.
    pub dod: f64,
    pub cycles: f64,
}

/// Laboratory test sets, each keyed by the tested C-rate.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestData {
    /// Average voltage while charging, V.
    #[serde(default)]
    pub charge_voltage: Vec<TestSample>,

    /// Average voltage while discharging, V.
    #[serde(default)]
    pub discharge_voltage: Vec<TestSample>,

    /// Energy remaining when the charge limit is hit, %.
    #[serde(default)]
    pub charge_limit: Vec<TestSample>,

    /// Energy remaining when the discharge limit is hit, %.
    #[serde(default)]
    pub discharge_limit: Vec<TestSample>,

    /// %.
    #[serde(default)]
    pub charge_efficiency: Vec<TestSample>,

    /// %.
    #[serde(default)]
    pub discharge_efficiency: Vec<TestSample>,

    /// %.
    #[serde(default)]
    pub round_trip_efficiency: Vec<TestSample>,

    #[serde(default)]
    pub efficiency_approximation: EfficiencyApproximation,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EfficiencyApproximation {
    /// Independent charge and discharge efficiency tests.
    #[default]
    Separate,

    /// Single round-trip test, split symmetrically.
    RoundTrip,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestSample {
    /// Trial number, absent once trials have been averaged.
    #[serde(default)]
    pub trial: Option<u32>,

    pub c_rate: f64,
    pub value: f64,
}

impl BatteryAssetConfig {
    pub fn available_energy(&self) -> KilowattHours {
        self.available_energy.unwrap_or(self.nominal_energy)
    }

    /// Nominal capacity in kAh.
    pub fn nominal_capacity(&self) -> f64 {
        self.available_energy().0 / self.nominal_voltage
    }

    /// Copy of the descriptor with the available energy reduced by the degraded energy.
    #[must_use]
    pub fn degraded_by(&self, degraded: KilowattHours) -> Self {
        Self { available_energy: Some(self.available_energy() - degraded), ..self.clone() }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let positive = [
            ("nominal energy", self.nominal_energy.0),
            ("available energy", self.available_energy().0),
            ("nominal voltage", self.nominal_voltage),
            ("inverter nominal power", self.inverter.nominal_power.0),
            ("inverter nominal voltage", self.inverter.nominal_voltage),
            ("inverter DC current", self.inverter.max_dc_current),
            ("charge C-rate", self.max_charge_c_rate),
            ("discharge C-rate", self.max_discharge_c_rate),
            ("charge efficiency", self.charge_efficiency),
            ("discharge efficiency", self.discharge_efficiency),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ModelError::Configuration(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let percentages = [
            ("minimum SoC", self.min_soc),
            ("maximum SoC", self.max_soc),
            ("reserve SoC", self.reserve_soc),
            ("minimum charge power", self.min_charge_power),
            ("minimum discharge power", self.min_discharge_power),
            ("charge efficiency", self.charge_efficiency),
            ("discharge efficiency", self.discharge_efficiency),
            ("end-of-life criterion", self.eol_criterion),
        ];
        for (name, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(ModelError::Configuration(format!(
                    "{name} must be within 0..=100%, got {value}"
                )));
            }
        }
        if self.min_soc.max(self.reserve_soc) > self.max_soc {
            return Err(ModelError::Configuration(format!(
                "SoC floor {}% exceeds the maximum {}%",
                self.min_soc.max(self.reserve_soc),
                self.max_soc,
            )));
        }

        for point in &self.degradation_curve {
            if !point.dod.is_finite() || !point.cycles.is_finite() || point.cycles <= 0.0 {
                return Err(ModelError::Configuration(format!(
                    "invalid degradation point: {point:?}"
                )));
            }
        }
        Ok(())
    }
}
