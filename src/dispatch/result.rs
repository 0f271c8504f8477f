use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use good_lp::SolutionStatus;
use serde::Serialize;

use crate::{
    dispatch::variables::{Family, VariableKey},
    quantity::{cost::Cost, energy::KilowattHours, power::Kilowatts},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, derive_more::Display)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
}

impl SolveStatus {
    pub const fn is_optimal(self) -> bool {
        matches!(self, Self::Optimal)
    }
}

/// Reason the solver stopped, as written into the solution file header.
///
/// A solution stopped on the time limit or the gap is still usable,
/// so it counts as [`SolveStatus::Optimal`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, derive_more::Display)]
pub enum Termination {
    Optimal,

    #[display("Stopped on time")]
    TimeLimit,

    #[display("Stopped on gap")]
    GapLimit,

    Infeasible,
}

impl From<SolutionStatus> for Termination {
    fn from(status: SolutionStatus) -> Self {
        match status {
            SolutionStatus::Optimal => Self::Optimal,
            SolutionStatus::TimeLimit => Self::TimeLimit,
            SolutionStatus::GapLimit => Self::GapLimit,
        }
    }
}

/// Solver outcome with per-step values keyed by variable.
#[derive(Clone, Debug)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub termination: Termination,
    pub objective: Option<f64>,
    pub values: BTreeMap<VariableKey, Vec<f64>>,
}

impl SolveResult {
    pub const fn infeasible() -> Self {
        Self {
            status: SolveStatus::Infeasible,
            termination: Termination::Infeasible,
            objective: None,
            values: BTreeMap::new(),
        }
    }

    pub fn value(&self, key: VariableKey, step: usize) -> Option<f64> {
        self.values.get(&key).and_then(|values| values.get(step)).copied()
    }

    /// Sum over all segments of the family for the asset.
    pub fn asset_total(&self, family: Family, asset: usize, step: usize) -> f64 {
        self.values
            .iter()
            .filter(|(key, _)| key.family == family && key.asset == Some(asset))
            .filter_map(|(_, values)| values.get(step))
            .sum()
    }
}

#[derive(Copy, Clone, Debug, Serialize)]
pub struct AssetStep {
    pub charge: Kilowatts,
    pub discharge: Kilowatts,

    /// Energy content at the end of the step.
    pub energy: KilowattHours,

    pub degraded: KilowattHours,
}

#[derive(Clone, Debug, Serialize)]
pub struct DispatchStep {
    pub datetime: DateTime<Utc>,
    pub absorption: Kilowatts,
    pub injection: Kilowatts,
    pub assets: Vec<AssetStep>,

    /// Grid cost of the step, negative when the injection earns more.
    pub expected_revenue: Cost,

    pub weighted_degradation: Cost,
    pub total_cost: Cost,

    /// Net charging power of the first asset.
    pub net_battery_power: Kilowatts,
}

#[derive(Clone, Debug, Serialize)]
pub struct DispatchOutputs {
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub steps: Vec<DispatchStep>,
}

impl DispatchOutputs {
    /// Energy content of each asset at the end of the window.
    pub fn final_energies(&self) -> Option<Vec<KilowattHours>> {
        self.steps.last().map(|step| step.assets.iter().map(|asset| asset.energy).collect())
    }
}
