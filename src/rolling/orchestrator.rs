use std::{path::Path, time::Instant};

use bon::Builder;
use chrono::{TimeDelta, Utc};
use itertools::Itertools;
use serde::Serialize;

use crate::{
    battery::{BatteryAssetConfig, BatteryModel},
    dispatch::{DispatchProblem, DispatchStep, SolverArtifacts},
    forecast::ForecastSeries,
    prelude::*,
    rolling::{state::RollingState, summary::DaySummary},
    scenario::Scenario,
};

#[derive(Clone, Debug, Serialize)]
pub struct RunOutputs {
    pub steps: Vec<DispatchStep>,
    pub summaries: Vec<DaySummary>,
}

#[derive(Builder)]
pub struct RollingHorizon<'a> {
    scenario: &'a Scenario,

    /// Raw forecast, prepared according to the scenario before slicing.
    forecast: &'a ForecastSeries,

    /// Directory for the transient solution files.
    artifacts_dir: &'a Path,

    /// Prefix of the solution file names, defaults to the start time and process ID.
    #[builder(into)]
    run_stem: Option<String>,
}

impl RollingHorizon<'_> {
    #[instrument(skip_all)]
    pub fn run(self) -> Result<RunOutputs> {
        let system = &self.scenario.system;
        let horizon = &self.scenario.horizon;
        let run = &self.scenario.run;

        let forecast = self
            .forecast
            .clone()
            .with_filled_prices()
            .scaled(system.generation_scale, system.load_scale)
            .resampled(horizon.step())?;
        let first_datetime = forecast.first_datetime().context("the forecast is empty")?;
        let run_stem = self.run_stem.unwrap_or_else(|| {
            format!("bess-{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), std::process::id())
        });
        info!(
            %first_datetime,
            run.first_day,
            run.n_days,
            %run.policy,
            %run_stem,
            "starting the run…",
        );

        let mut state = RollingState::new(self.scenario.initial_socs());
        for day in run.first_day..(run.first_day + run.n_days) {
            let datetime = first_datetime + TimeDelta::days(i64::from(day));
            let window = forecast
                .window(datetime, horizon.horizon())
                .with_context(|| format!("failed to slice the forecast for day #{day}"))?;

            let configs = self
                .scenario
                .assets
                .iter()
                .zip(&state.degraded)
                .map(|(asset, degraded)| asset.battery.degraded_by(*degraded))
                .collect_vec();
            let available_energies =
                configs.iter().map(BatteryAssetConfig::available_energy).collect_vec();
            let socs = state.socs(&available_energies);
            let models = configs
                .iter()
                .zip(socs)
                .enumerate()
                .map(|(index, (config, soc))| {
                    BatteryModel::configure(config, soc, system.add_ons).with_context(|| {
                        format!("failed to configure asset #{index} for day #{day}")
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let start_instant = Instant::now();
            let artifacts = SolverArtifacts::new(self.artifacts_dir, &run_stem, day);
            debug!(
                day,
                model = %artifacts.model_path().display(),
                solution = %artifacts.solution_path().display(),
                "solving…",
            );
            let mut problem = DispatchProblem::builder()
                .settings(system)
                .assets(&models)
                .horizon(horizon)
                .forecast(&window)
                .policy(run.policy)
                .build()?;
            let result = problem.solve(&artifacts)?;
            let outputs = problem.extract_outputs(&result);
            let elapsed = start_instant.elapsed();

            let status_real = artifacts.read_status().unwrap_or_else(|error| {
                warn!("{error:#}");
                String::from("Unknown")
            });
            artifacts.cleanup();
            info!(
                day,
                status = %outputs.status,
                %status_real,
                objective = ?outputs.objective,
                ?elapsed,
                "solved the day",
            );

            state.record(day, datetime, outputs, &available_energies, status_real, elapsed);
        }

        info!(
            expected_revenue = ?state.expected_revenue,
            weighted_degradation = ?state.weighted_degradation,
            total_cost = ?state.total_cost,
            elapsed = ?state.elapsed,
            "finished the run",
        );
        Ok(RunOutputs { steps: state.steps, summaries: state.summaries })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_abs_diff_eq;
    use enumset::EnumSet;

    use super::*;
    use crate::{
        battery::config::fixtures,
        dispatch::{ObjectivePolicy, SolveStatus},
        forecast::fixtures::hourly,
        quantity::Quantity,
        scenario::{AssetEntry, HorizonParams, RunParams, SystemSettings},
    };

    fn scenario(pcc_limit: f64, n_days: u32) -> Scenario {
        let mut battery = fixtures::battery();
        battery.min_soc = 0.0;
        Scenario {
            system: SystemSettings {
                pcc_limit: Quantity(pcc_limit),
                add_ons: EnumSet::empty(),
                grid_injection: false,
                generation_scale: 1.0,
                load_scale: 1.0,
            },
            horizon: HorizonParams { timeout: Duration::from_secs(60), ..HorizonParams::default() },
            run: RunParams { first_day: 0, n_days, policy: ObjectivePolicy::GridCost },
            assets: vec![AssetEntry { initial_soc: 0.0, battery }],
        }
    }

    fn run(scenario: &Scenario, forecast: &ForecastSeries, name: &str) -> RunOutputs {
        RollingHorizon::builder()
            .scenario(scenario)
            .forecast(forecast)
            .artifacts_dir(&std::env::temp_dir())
            .run_stem(format!("bess-rolling-{name}-{}", std::process::id()))
            .build()
            .run()
            .unwrap()
    }

    #[test]
    fn test_degradation_carries_over() {
        // Cheap nights and expensive evenings make the battery cycle every day:
        let prices = (0..48)
            .map(|hour| match hour % 24 {
                0..6 => 0.05,
                18.. => 0.5,
                _ => 0.2,
            })
            .collect_vec();
        let forecast = ForecastSeries::try_from_points(hourly(&[20.0; 48], &prices)).unwrap();
        let outputs = run(&scenario(100.0, 2), &forecast, "degradation");

        assert_eq!(outputs.steps.len(), 48);
        assert_eq!(outputs.summaries.len(), 2);
        let [first, second] = [&outputs.summaries[0], &outputs.summaries[1]];
        assert_eq!(first.status, SolveStatus::Optimal);
        assert!(matches!(first.status_real.as_str(), "Optimal" | "Stopped on gap"));
        assert!(first.degradation[0].0 > 0.0);
        assert!(second.degradation[0] > first.degradation[0]);

        let total_degraded: f64 = outputs.steps.iter().map(|step| step.assets[0].degraded.0).sum();
        assert_abs_diff_eq!(second.degradation[0].0, total_degraded, epsilon = 1e-9);
        let total_cost: f64 = outputs.steps.iter().map(|step| step.total_cost.0).sum();
        assert_abs_diff_eq!(second.total_cost.0, total_cost, epsilon = 1e-9);

        // The second day starts where the first one ended:
        let last_energy = outputs.steps[23].assets[0].energy.0;
        let first_charge = outputs.steps[24].assets[0];
        let expected =
            last_energy + first_charge.charge.0 * 0.95 - first_charge.discharge.0 / 0.95;
        assert_abs_diff_eq!(first_charge.energy.0, expected, epsilon = 1e-4);
    }

    #[test]
    fn test_continues_after_infeasible_day() {
        let loads = (0..48).map(|hour| if hour < 24 { 10.0 } else { 1.0 }).collect_vec();
        let forecast = ForecastSeries::try_from_points(hourly(&loads, &[0.2; 48])).unwrap();
        let outputs = run(&scenario(5.0, 2), &forecast, "infeasible");

        let [first, second] = [&outputs.summaries[0], &outputs.summaries[1]];
        assert_eq!(first.status, SolveStatus::Infeasible);
        assert_eq!(first.status_real, "Infeasible");
        assert_eq!(first.total_cost, Quantity(0.0));
        assert_abs_diff_eq!(first.socs[0], 0.0);

        assert_eq!(second.status, SolveStatus::Optimal);
        assert_eq!(outputs.steps.len(), 24);
        assert_abs_diff_eq!(second.expected_revenue.0, 24.0 * 0.2, epsilon = 1e-4);
    }

    #[test]
    fn test_artifacts_are_removed() {
        let forecast = ForecastSeries::try_from_points(hourly(&[10.0; 24], &[0.2; 24])).unwrap();
        let stem = format!("bess-rolling-cleanup-{}", std::process::id());
        let outputs = run(&scenario(100.0, 1), &forecast, "cleanup");
        assert_eq!(outputs.summaries[0].status, SolveStatus::Optimal);
        assert!(!std::env::temp_dir().join(format!("{stem}-day0.lp")).exists());
        assert!(!std::env::temp_dir().join(format!("{stem}-day0.sol")).exists());
    }

    #[test]
    fn test_incomplete_forecast() {
        let forecast = ForecastSeries::try_from_points(hourly(&[10.0; 30], &[0.2; 30])).unwrap();
        let result = RollingHorizon::builder()
            .scenario(&scenario(100.0, 2))
            .forecast(&forecast)
            .artifacts_dir(&std::env::temp_dir())
            .build()
            .run();
        assert!(result.is_err());
    }
}
