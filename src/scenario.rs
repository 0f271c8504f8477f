//! Typed scenario file.

use std::{fs, path::Path, time::Duration};

use chrono::TimeDelta;
use enumset::EnumSet;
use serde::Deserialize;
use serde_with::serde_as;

use crate::{
    battery::{AddOn, BatteryAssetConfig},
    dispatch::ObjectivePolicy,
    prelude::*,
    quantity::power::Kilowatts,
};

/// At most this many batteries share the connection point.
pub const MAX_ASSETS: usize = 2;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    pub system: SystemSettings,

    #[serde(default)]
    pub horizon: HorizonParams,

    #[serde(default)]
    pub run: RunParams,

    pub assets: Vec<AssetEntry>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemSettings {
    /// Grid connection limit in either direction.
    pub pcc_limit: Kilowatts,

    #[serde(default)]
    pub add_ons: EnumSet<AddOn>,

    /// Allow exporting to the grid at the feed-in tariff.
    #[serde(default)]
    pub grid_injection: bool,

    /// Generation forecast multiplier, kW per forecast unit.
    #[serde(default = "default_scale")]
    pub generation_scale: f64,

    /// Load forecast multiplier, kW per forecast unit.
    #[serde(default = "default_scale")]
    pub load_scale: f64,
}

const fn default_scale() -> f64 {
    1.0
}

#[serde_as]
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HorizonParams {
    /// Relative MIP gap at which the solver stops.
    #[serde(default = "default_mip_gap")]
    pub mip_gap: f64,

    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "timeout-secs", default = "default_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: u32,

    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,
}

const fn default_mip_gap() -> f64 {
    0.001
}

const fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

const fn default_horizon_hours() -> u32 {
    24
}

const fn default_step_minutes() -> u32 {
    60
}

impl Default for HorizonParams {
    fn default() -> Self {
        Self {
            mip_gap: default_mip_gap(),
            timeout: default_timeout(),
            horizon_hours: default_horizon_hours(),
            step_minutes: default_step_minutes(),
        }
    }
}

impl HorizonParams {
    pub fn step(&self) -> TimeDelta {
        TimeDelta::minutes(i64::from(self.step_minutes))
    }

    pub fn horizon(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.horizon_hours))
    }

    pub const fn n_steps(&self) -> usize {
        (self.horizon_hours * 60 / self.step_minutes) as usize
    }

    fn validate(&self) -> Result {
        ensure!(self.step_minutes > 0, "step must be positive");
        ensure!(self.horizon_hours > 0, "horizon must be positive");
        ensure!(
            (self.horizon_hours * 60) % self.step_minutes == 0,
            "{}-hour horizon is not a whole number of {}-minute steps",
            self.horizon_hours,
            self.step_minutes,
        );
        ensure!(
            self.mip_gap.is_finite() && self.mip_gap >= 0.0,
            "invalid MIP gap: {}",
            self.mip_gap,
        );
        Ok(())
    }
}

#[serde_as]
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunParams {
    /// Day offset from the forecast start.
    #[serde(default)]
    pub first_day: u32,

    #[serde(default = "default_n_days")]
    pub n_days: u32,

    #[serde_as(as = "serde_with::DisplayFromStr")]
    #[serde(default)]
    pub policy: ObjectivePolicy,
}

const fn default_n_days() -> u32 {
    1
}

impl Default for RunParams {
    fn default() -> Self {
        Self { first_day: 0, n_days: default_n_days(), policy: ObjectivePolicy::default() }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetEntry {
    /// State of charge at the start of the first day, %.
    #[serde(default)]
    pub initial_soc: f64,

    #[serde(flatten)]
    pub battery: BatteryAssetConfig,
}

impl Scenario {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read `{}`", path.display()))?;
        let scenario: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse `{}`", path.display()))?;
        scenario.validate().with_context(|| format!("invalid scenario `{}`", path.display()))?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result {
        ensure!(
            (1..=MAX_ASSETS).contains(&self.assets.len()),
            "expected 1 to {MAX_ASSETS} assets, got {}",
            self.assets.len(),
        );
        ensure!(
            self.system.pcc_limit.is_finite() && self.system.pcc_limit > Kilowatts::ZERO,
            "connection limit must be positive, got {}",
            self.system.pcc_limit,
        );
        ensure!(
            self.system.generation_scale.is_finite() && self.system.load_scale.is_finite(),
            "forecast scales must be finite",
        );
        ensure!(self.run.n_days > 0, "nothing to run");
        self.horizon.validate()?;
        for (index, asset) in self.assets.iter().enumerate() {
            asset.battery.validate().with_context(|| format!("invalid asset #{index}"))?;
        }
        Ok(())
    }

    pub fn initial_socs(&self) -> Vec<f64> {
        self.assets.iter().map(|asset| asset.initial_soc).collect()
    }
}
