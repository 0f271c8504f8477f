use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    dispatch::{DispatchOutputs, DispatchStep},
    quantity::{cost::Cost, energy::KilowattHours},
    rolling::summary::DaySummary,
};

/// Accumulator owned by a single run.
#[derive(Clone, Debug)]
pub struct RollingState {
    /// Configured state of charge per asset at the start of the run, %.
    initial_socs: Vec<f64>,

    /// Energy content per asset at the end of the last feasible day.
    last_energies: Option<Vec<KilowattHours>>,

    /// Cumulative degraded energy per asset.
    pub degraded: Vec<KilowattHours>,

    pub expected_revenue: Cost,
    pub weighted_degradation: Cost,
    pub total_cost: Cost,
    pub elapsed: Duration,

    pub steps: Vec<DispatchStep>,
    pub summaries: Vec<DaySummary>,
}

impl RollingState {
    pub fn new(initial_socs: Vec<f64>) -> Self {
        Self {
            degraded: vec![KilowattHours::ZERO; initial_socs.len()],
            initial_socs,
            last_energies: None,
            expected_revenue: Cost::ZERO,
            weighted_degradation: Cost::ZERO,
            total_cost: Cost::ZERO,
            elapsed: Duration::ZERO,
            steps: Vec::new(),
            summaries: Vec::new(),
        }
    }

    /// Starting state of charge of each asset, given the energy available to it today.
    pub fn socs(&self, available_energies: &[KilowattHours]) -> Vec<f64> {
        match &self.last_energies {
            None => self.initial_socs.clone(),
            Some(energies) => energies
                .iter()
                .zip(available_energies)
                .map(|(energy, available)| soc(*energy, *available))
                .collect(),
        }
    }

    /// Fold the day into the state.
    ///
    /// Non-optimal days leave the battery state untouched and only append the summary.
    pub fn record(
        &mut self,
        day: u32,
        datetime: DateTime<Utc>,
        outputs: DispatchOutputs,
        available_energies: &[KilowattHours],
        status_real: String,
        elapsed: Duration,
    ) {
        self.elapsed += elapsed;
        let socs = if outputs.status.is_optimal()
            && let Some(energies) = outputs.final_energies()
        {
            for step in &outputs.steps {
                self.expected_revenue += step.expected_revenue;
                self.weighted_degradation += step.weighted_degradation;
                self.total_cost += step.total_cost;
                for (degraded, asset) in self.degraded.iter_mut().zip(&step.assets) {
                    *degraded += asset.degraded;
                }
            }
            let socs = energies
                .iter()
                .zip(available_energies)
                .map(|(energy, available)| soc(*energy, *available))
                .collect();
            self.last_energies = Some(energies);
            self.steps.extend(outputs.steps);
            socs
        } else {
            self.socs(available_energies)
        };
        self.summaries.push(DaySummary {
            day,
            datetime,
            status: outputs.status,
            status_real,
            expected_revenue: self.expected_revenue,
            degradation: self.degraded.clone(),
            weighted_degradation: self.weighted_degradation,
            total_cost: self.total_cost,
            socs,
            elapsed,
        });
    }
}

fn soc(energy: KilowattHours, available: KilowattHours) -> f64 {
    if available > KilowattHours::ZERO {
        (energy.0 / available.0 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
