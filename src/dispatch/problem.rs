use std::{collections::BTreeMap, time::Instant};

use bon::bon;
use good_lp::{
    Constraint,
    Expression,
    ProblemVariables,
    Solution,
    SolverModel,
    Variable,
    constraint,
    solvers::highs::highs,
    variable,
};
use itertools::Itertools;

use crate::{
    battery::{BatteryModel, model::EnergyBounds},
    dispatch::{
        ObjectivePolicy,
        artifacts::SolverArtifacts,
        result::{AssetStep, DispatchOutputs, DispatchStep, SolveResult, SolveStatus, Termination},
        strategy::{self, AssetFlows, EfficiencyStrategy},
        variables::{Family, VariableKey, VariableTable},
    },
    forecast::ForecastWindow,
    prelude::*,
    quantity::{Quantity, cost::Cost, power::Kilowatts},
    scenario::{HorizonParams, MAX_ASSETS, SystemSettings},
};

struct AssetBlock {
    strategy: Box<dyn EfficiencyStrategy>,
}

/// Mixed-integer dispatch problem of a single window.
pub struct DispatchProblem {
    window: ForecastWindow,
    horizon: HorizonParams,
    weights: Vec<f64>,
    assets: Vec<AssetBlock>,

    /// Taken by the solve.
    variables: Option<ProblemVariables>,

    keys: BTreeMap<VariableKey, Vec<Variable>>,
    objective: Expression,
    constraints: Vec<Constraint>,
}

#[bon]
impl DispatchProblem {
    #[builder]
    pub fn new(
        settings: &SystemSettings,
        assets: &[BatteryModel],
        horizon: &HorizonParams,
        forecast: &ForecastWindow,
        policy: ObjectivePolicy,
    ) -> Result<Self> {
        ensure!(
            (1..=MAX_ASSETS).contains(&assets.len()),
            "expected 1 to {MAX_ASSETS} assets, got {}",
            assets.len(),
        );
        ensure!(!forecast.is_empty(), "the forecast window is empty");
        ensure!(
            forecast.len() == horizon.n_steps(),
            "forecast window has {} steps, the horizon needs {}",
            forecast.len(),
            horizon.n_steps(),
        );

        let n_steps = forecast.len();
        let step_hours = forecast.step_hours();
        let pcc_limit = settings.pcc_limit.0;
        let mut table = VariableTable::new(n_steps);
        let mut constraints = Vec::new();

        let absorption = table.add(VariableKey::grid(Family::Absorption), variable().min(0.0));
        let direction = table.add(VariableKey::grid(Family::GridDirection), variable().binary());
        let injection = settings
            .grid_injection
            .then(|| table.add(VariableKey::grid(Family::Injection), variable().min(0.0)));

        let weights = (0..assets.len()).map(|asset| policy.weight(asset)).collect_vec();
        let mut net_battery: Vec<Expression> = vec![Expression::from(0.0); n_steps];
        let mut weighted_degradation: Vec<Expression> = vec![Expression::from(0.0); n_steps];
        let mut blocks = Vec::with_capacity(assets.len());

        for (asset, model) in assets.iter().enumerate() {
            let strategy = strategy::select(model);
            debug!(asset, strategy = strategy.name(), "declaring…");
            let AssetFlows { ac_charge, ac_discharge, dc_charge, dc_discharge, constraints: flow } =
                strategy.declare(&mut table, asset, model);
            constraints.extend(flow);

            let energy = table.add(
                VariableKey::asset(Family::Energy, asset),
                variable().min(0.0).max(model.available_energy.0),
            );
            let degraded =
                table.add(VariableKey::asset(Family::Degraded, asset), variable().min(0.0));
            let min_energy = table.add(VariableKey::asset(Family::MinEnergy, asset), variable());
            let max_energy = table.add(VariableKey::asset(Family::MaxEnergy, asset), variable());

            for step in 0..n_steps {
                let dc_charge = &dc_charge[step];
                let dc_discharge = &dc_discharge[step];
                constraints.push(constraint!(dc_charge.clone() <= model.charge.dc_max.0));
                constraints.push(constraint!(dc_discharge.clone() <= model.discharge.dc_max.0));

                // Energy at the end of the step:
                let previous = if step == 0 {
                    Expression::from(model.initial_energy.0)
                } else {
                    Expression::from(energy[step - 1])
                };
                constraints.push(constraint!(
                    energy[step]
                        == previous + step_hours * dc_charge.clone()
                            - step_hours * dc_discharge.clone()
                ));

                match model.energy_bounds {
                    EnergyBounds::Static { min, max } => {
                        constraints.push(constraint!(min_energy[step] == min.0));
                        constraints.push(constraint!(max_energy[step] == max.0));
                    }
                    EnergyBounds::Dynamic { charge, discharge } => {
                        let charge_slope = charge.slope / model.charge.nominal_voltage;
                        let discharge_slope = discharge.slope / model.discharge.nominal_voltage;
                        constraints.push(constraint!(
                            max_energy[step]
                                == charge_slope * dc_charge.clone() + charge.intercept
                        ));
                        constraints.push(constraint!(
                            min_energy[step]
                                == discharge_slope * dc_discharge.clone() + discharge.intercept
                        ));
                    }
                }
                constraints.push(constraint!(energy[step] <= max_energy[step]));
                constraints.push(constraint!(energy[step] >= min_energy[step]));

                constraints.push(constraint!(
                    degraded[step]
                        == model.degradation_slope * step_hours * dc_discharge.clone()
                ));

                net_battery[step] += ac_charge[step].clone() - ac_discharge[step].clone();
                weighted_degradation[step] += weights[asset] * degraded[step];
            }
            blocks.push(AssetBlock { strategy });
        }

        let mut objective = Expression::from(0.0);
        for step in 0..n_steps {
            let residual = forecast.load[step].0 - forecast.generation[step].0;
            let price = forecast.market[step].0;
            match &injection {
                Some(injection) => {
                    constraints.push(constraint!(
                        absorption[step] - injection[step] == net_battery[step].clone() + residual
                    ));
                    constraints.push(constraint!(
                        injection[step] + pcc_limit * direction[step] <= pcc_limit
                    ));
                    objective -= step_hours * forecast.feed_in[step].0 * injection[step];
                }
                None => {
                    constraints.push(constraint!(
                        absorption[step] == net_battery[step].clone() + residual
                    ));
                }
            }
            constraints.push(constraint!(absorption[step] <= pcc_limit * direction[step]));
            objective += step_hours * price * absorption[step];
            objective += step_hours * weighted_degradation[step].clone();
        }

        let (variables, keys) = table.into_parts();
        info!(
            n_steps,
            n_assets = assets.len(),
            n_constraints = constraints.len(),
            %policy,
            "built the problem",
        );
        Ok(Self {
            window: forecast.clone(),
            horizon: *horizon,
            weights,
            assets: blocks,
            variables: Some(variables),
            keys,
            objective,
            constraints,
        })
    }
}

impl DispatchProblem {
    /// Run the solver and record the model and solution files.
    ///
    /// Solver failures are not errors: they come back as [`SolveStatus::Infeasible`].
    #[instrument(skip_all)]
    pub fn solve(&mut self, artifacts: &SolverArtifacts) -> Result<SolveResult> {
        let variables = self.variables.take().context("the problem has already been solved")?;
        if let Err(error) = artifacts.write_model(&variables, &self.objective, &self.constraints) {
            warn!("{error:#}");
        }
        let mut model = variables
            .minimise(self.objective.clone())
            .using(highs)
            .set_option("output_flag", false)
            .set_option("mip_rel_gap", self.horizon.mip_gap)
            .set_option("time_limit", self.horizon.timeout.as_secs_f64());
        for constraint in self.constraints.drain(..) {
            model.add_constraint(constraint);
        }

        let strategies = self.assets.iter().map(|asset| asset.strategy.name()).collect_vec();
        info!(?strategies, "solving…");
        let start_instant = Instant::now();
        let result = match model.solve() {
            Ok(solution) => SolveResult {
                status: SolveStatus::Optimal,
                termination: Termination::from(solution.status()),
                objective: Some(solution.eval(self.objective.clone())),
                values: self
                    .keys
                    .iter()
                    .map(|(key, variables)| {
                        (*key, variables.iter().map(|variable| solution.value(*variable)).collect())
                    })
                    .collect(),
            },
            Err(error) => {
                warn!(%error, "no solution");
                SolveResult::infeasible()
            }
        };
        info!(
            elapsed = ?start_instant.elapsed(),
            status = %result.status,
            termination = %result.termination,
            objective = ?result.objective,
            "solved",
        );

        if let Err(error) = artifacts.write_solution(&result) {
            warn!("{error:#}");
        }
        Ok(result)
    }

    pub fn extract_outputs(&self, result: &SolveResult) -> DispatchOutputs {
        if !result.status.is_optimal() {
            return DispatchOutputs { status: result.status, objective: None, steps: Vec::new() };
        }
        let step_hours = self.window.step_hours();
        let steps = (0..self.window.len())
            .map(|step| {
                let absorption = result
                    .value(VariableKey::grid(Family::Absorption), step)
                    .unwrap_or_default();
                let injection =
                    result.value(VariableKey::grid(Family::Injection), step).unwrap_or_default();
                let assets = (0..self.assets.len())
                    .map(|asset| AssetStep {
                        charge: Quantity(result.asset_total(Family::Charge, asset, step)),
                        discharge: Quantity(result.asset_total(Family::Discharge, asset, step)),
                        energy: Quantity(result.asset_total(Family::Energy, asset, step)),
                        degraded: Quantity(result.asset_total(Family::Degraded, asset, step)),
                    })
                    .collect_vec();
                let grid_energy = Kilowatts::from(absorption) * self.window.step;
                let injected_energy = Kilowatts::from(injection) * self.window.step;
                let expected_revenue = grid_energy * self.window.market[step]
                    - injected_energy * self.window.feed_in[step];
                let weighted_degradation: Cost = assets
                    .iter()
                    .zip(&self.weights)
                    .map(|(asset, weight)| Cost::from(asset.degraded.0 * weight * step_hours))
                    .sum();
                DispatchStep {
                    datetime: self.window.timestamp(step),
                    absorption: Quantity(absorption),
                    injection: Quantity(injection),
                    expected_revenue,
                    weighted_degradation,
                    total_cost: expected_revenue + weighted_degradation,
                    net_battery_power: assets
                        .first()
                        .map_or(Kilowatts::ZERO, |asset| asset.charge - asset.discharge),
                    assets,
                }
            })
            .collect_vec();
        DispatchOutputs { status: result.status, objective: result.objective, steps }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_abs_diff_eq;
    use enumset::EnumSet;

    use super::*;
    use crate::{
        battery::{
            AddOn,
            config::{TestData, TestSample, fixtures},
        },
        forecast::{
            ForecastSeries,
            fixtures::{hourly, start},
        },
        quantity::Quantity,
    };

    fn settings(pcc_limit: f64) -> SystemSettings {
        SystemSettings {
            pcc_limit: Quantity(pcc_limit),
            add_ons: EnumSet::empty(),
            grid_injection: false,
            generation_scale: 1.0,
            load_scale: 1.0,
        }
    }

    fn horizon() -> HorizonParams {
        HorizonParams { timeout: Duration::from_secs(60), ..HorizonParams::default() }
    }

    fn window(loads: &[f64], prices: &[f64]) -> ForecastWindow {
        ForecastSeries::try_from_points(hourly(loads, prices))
            .unwrap()
            .window(start(), chrono::TimeDelta::hours(24))
            .unwrap()
    }

    fn empty_battery(add_ons: EnumSet<AddOn>) -> BatteryModel {
        let mut config = fixtures::battery();
        config.min_soc = 0.0;
        BatteryModel::configure(&config, 0.0, add_ons).unwrap()
    }

    fn sample(c_rate: f64, value: f64) -> TestSample {
        TestSample { trial: None, c_rate, value }
    }

    /// Cheap first six hours, expensive afterwards.
    fn night_prices() -> Vec<f64> {
        (0..24).map(|hour| if hour < 6 { 0.05 } else { 0.5 }).collect()
    }

    fn solve(
        settings: &SystemSettings,
        assets: &[BatteryModel],
        window: &ForecastWindow,
        name: &str,
    ) -> (DispatchProblem, SolveResult) {
        let artifacts = SolverArtifacts::new(
            &std::env::temp_dir(),
            &format!("bess-problem-{name}-{}", std::process::id()),
            0,
        );
        let mut problem = DispatchProblem::builder()
            .settings(settings)
            .assets(assets)
            .horizon(&horizon())
            .forecast(window)
            .policy(ObjectivePolicy::GridCost)
            .build()
            .unwrap();
        let result = problem.solve(&artifacts).unwrap();
        (problem, result)
    }

    #[test]
    fn test_flat_load_does_not_cycle() {
        let window = window(&[10.0; 24], &[0.2; 24]);
        let (problem, result) =
            solve(&settings(100.0), &[empty_battery(EnumSet::empty())], &window, "flat");
        assert_eq!(result.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(result.objective.unwrap(), 48.0, epsilon = 1e-4);

        let outputs = problem.extract_outputs(&result);
        assert_eq!(outputs.steps.len(), 24);
        for step in &outputs.steps {
            assert_abs_diff_eq!(step.absorption.0, 10.0, epsilon = 1e-6);
            assert_abs_diff_eq!(step.assets[0].charge.0, 0.0, epsilon = 1e-6);
            assert_abs_diff_eq!(step.assets[0].discharge.0, 0.0, epsilon = 1e-6);
        }
        let total: f64 = outputs.steps.iter().map(|step| step.total_cost.0).sum();
        assert_abs_diff_eq!(total, 48.0, epsilon = 1e-4);
    }

    #[test]
    fn test_near_zero_second_asset() {
        let window = window(&[10.0; 24], &[0.2; 24]);
        let mut tiny = fixtures::battery();
        tiny.nominal_energy = Quantity(1e-9);
        tiny.min_soc = 0.0;
        let tiny = BatteryModel::configure(&tiny, 0.0, EnumSet::empty()).unwrap();
        let (problem, result) = solve(
            &settings(100.0),
            &[empty_battery(EnumSet::empty()), tiny],
            &window,
            "tiny",
        );
        assert_eq!(result.status, SolveStatus::Optimal);
        assert_abs_diff_eq!(result.objective.unwrap(), 48.0, epsilon = 1e-3);
        let outputs = problem.extract_outputs(&result);
        for step in &outputs.steps {
            assert!(step.assets[1].energy.0 < 1e-6);
        }
    }

    #[test]
    fn test_energy_recursion() {
        // Cheap night, expensive evening:
        let prices = (0..24)
            .map(|hour| match hour {
                0..6 => 0.05,
                18.. => 0.5,
                _ => 0.2,
            })
            .collect_vec();
        let window = window(&[20.0; 24], &prices);
        let model = empty_battery(EnumSet::empty());
        let (problem, result) = solve(&settings(100.0), &[model.clone()], &window, "recursion");
        assert_eq!(result.status, SolveStatus::Optimal);

        let outputs = problem.extract_outputs(&result);
        let mut previous = model.initial_energy.0;
        for step in &outputs.steps {
            let asset = step.assets[0];
            let delta = asset.charge.0 * model.charge.constant_factor()
                - asset.discharge.0 * model.discharge.constant_factor();
            assert_abs_diff_eq!(asset.energy.0 - previous, delta, epsilon = 1e-5);
            previous = asset.energy.0;
        }

        // The price spread pays for the losses:
        assert!(outputs.steps.iter().any(|step| step.assets[0].discharge.0 > 1.0));
        assert!(result.objective.unwrap() < 20.0 * (6.0 * 0.05 + 12.0 * 0.2 + 6.0 * 0.5));
    }

    #[test]
    fn test_piecewise_energy_recursion() {
        let window = window(&[20.0; 24], &night_prices());
        let model = empty_battery(AddOn::PiecewiseEfficiency.into());
        assert!(model.uses_piecewise_efficiency());
        let (problem, result) = solve(&settings(100.0), &[model.clone()], &window, "piecewise");
        assert_eq!(result.status, SolveStatus::Optimal);

        // One-point linearization: both segments convert at the constant factor.
        let outputs = problem.extract_outputs(&result);
        let mut previous = model.initial_energy.0;
        for step in &outputs.steps {
            let asset = step.assets[0];
            let delta = asset.charge.0 * model.charge.constant_factor()
                - asset.discharge.0 * model.discharge.constant_factor();
            assert_abs_diff_eq!(asset.energy.0 - previous, delta, epsilon = 1e-5);
            assert!(asset.charge.0 < 1e-6 || asset.discharge.0 < 1e-6);
            previous = asset.energy.0;
        }
    }

    #[test]
    fn test_fitted_piecewise_energy_recursion() {
        let mut config = fixtures::battery();
        config.min_soc = 0.0;
        config.test_data = Some(TestData {
            charge_efficiency: vec![
                sample(0.02, 70.0),
                sample(0.06, 90.0),
                sample(0.5, 96.0),
                sample(1.0, 94.0),
            ],
            ..TestData::default()
        });
        let model =
            BatteryModel::configure(&config, 0.0, AddOn::PiecewiseEfficiency.into()).unwrap();
        assert!(model.uses_piecewise_efficiency());
        let line = model.charge.efficiency_line.unwrap();
        assert!(line.intercept < 0.0);

        // The connection leaves 10 kW for charging, below the cut, so only the fitted line applies:
        let cut = model.charge.segments[0].max.0;
        assert!(cut > 10.0);
        let window = window(&[20.0; 24], &night_prices());
        let (_, result) = solve(&settings(30.0), &[model.clone()], &window, "fitted");
        assert_eq!(result.status, SolveStatus::Optimal);

        let value = |family, segment, step| {
            result.value(VariableKey::segment(family, 0, segment), step).unwrap()
        };
        let mut previous = model.initial_energy.0;
        let mut n_low_steps = 0;
        for step in 0..24 {
            let low = value(Family::Charge, 0, step);
            let high = value(Family::Charge, 1, step);
            let selected = value(Family::ChargeSelector, 0, step);
            assert_abs_diff_eq!(high, 0.0, epsilon = 1e-6);

            let dc_charge = line.slope * low
                + line.intercept * selected
                + model.charge.constant_factor() * high;
            let dc_discharge = result.asset_total(Family::Discharge, 0, step)
                * model.discharge.constant_factor();
            let energy = result.asset_total(Family::Energy, 0, step);
            assert_abs_diff_eq!(energy - previous, dc_charge - dc_discharge, epsilon = 1e-5);
            previous = energy;

            if low > 1e-3 {
                // The negative intercept costs energy compared to the constant efficiency:
                n_low_steps += 1;
                assert_abs_diff_eq!(selected, 1.0, epsilon = 1e-6);
                assert!(dc_charge < model.charge.constant_factor() * low - 1e-3);
            }
        }
        assert!(n_low_steps > 0);
    }

    #[test]
    fn test_dynamic_energy_bounds() {
        let mut config = fixtures::battery();
        config.min_soc = 0.0;
        config.test_data = Some(TestData {
            charge_voltage: vec![sample(0.5, 740.0), sample(1.0, 760.0)],
            discharge_voltage: vec![sample(0.5, 700.0), sample(1.0, 680.0)],
            charge_limit: vec![sample(0.5, 95.0), sample(1.0, 90.0)],
            discharge_limit: vec![sample(0.5, 5.0), sample(1.0, 10.0)],
            ..TestData::default()
        });
        let model = BatteryModel::configure(&config, 0.0, AddOn::DynamicSoc.into()).unwrap();
        let EnergyBounds::Dynamic { charge, discharge } = model.energy_bounds else {
            panic!("dynamic bounds expected");
        };
        let charge_slope = charge.slope / model.charge.nominal_voltage;
        let discharge_slope = discharge.slope / model.discharge.nominal_voltage;

        let window = window(&[20.0; 24], &night_prices());
        let (problem, result) = solve(&settings(100.0), &[model.clone()], &window, "dynamic");
        assert_eq!(result.status, SolveStatus::Optimal);

        let outputs = problem.extract_outputs(&result);
        let mut is_binding = false;
        for step in &outputs.steps {
            let asset = step.assets[0];
            let dc_charge = asset.charge.0 * model.charge.constant_factor();
            let dc_discharge = asset.discharge.0 * model.discharge.constant_factor();
            let max_energy = charge_slope * dc_charge + charge.intercept;
            let min_energy = discharge_slope * dc_discharge + discharge.intercept;
            assert!(asset.energy.0 <= max_energy + 1e-6);
            assert!(asset.energy.0 >= min_energy - 1e-6);

            // Charging lowers the ceiling below the available energy:
            if dc_charge > 1.0 && max_energy - asset.energy.0 < 1e-2 {
                assert!(max_energy < model.available_energy.0 - 1e-2);
                is_binding = true;
            }
        }
        assert!(is_binding);
    }

    #[test]
    fn test_infeasible_connection_limit() {
        let window = window(&[10.0; 24], &[0.2; 24]);
        let (problem, result) =
            solve(&settings(5.0), &[empty_battery(EnumSet::empty())], &window, "infeasible");
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert_eq!(result.termination, Termination::Infeasible);
        assert!(result.objective.is_none());
        let outputs = problem.extract_outputs(&result);
        assert!(outputs.steps.is_empty());
    }

    #[test]
    fn test_injection_earns_feed_in() {
        let mut points = hourly(&[0.0; 24], &[0.2; 24]);
        for point in &mut points {
            point.generation = Quantity(10.0);
        }
        let window = ForecastSeries::try_from_points(points)
            .unwrap()
            .window(start(), chrono::TimeDelta::hours(24))
            .unwrap();
        let mut settings = settings(100.0);
        settings.grid_injection = true;
        let (problem, result) =
            solve(&settings, &[empty_battery(EnumSet::empty())], &window, "injection");
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!(result.objective.unwrap() < 0.0);
        let outputs = problem.extract_outputs(&result);
        assert!(outputs.steps.iter().all(|step| step.absorption.0 < 1e-6));
        let injected: f64 = outputs.steps.iter().map(|step| step.injection.0).sum();
        assert!(injected > 100.0);
    }

    #[test]
    fn test_rejects_short_window() {
        let window = ForecastSeries::try_from_points(hourly(&[1.0; 12], &[0.2; 12]))
            .unwrap()
            .window(start(), chrono::TimeDelta::hours(12))
            .unwrap();
        let result = DispatchProblem::builder()
            .settings(&settings(100.0))
            .assets(&[empty_battery(EnumSet::empty())])
            .horizon(&horizon())
            .forecast(&window)
            .policy(ObjectivePolicy::GridCost)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_solves_once() {
        let window = window(&[10.0; 24], &[0.2; 24]);
        let (mut problem, _) =
            solve(&settings(100.0), &[empty_battery(EnumSet::empty())], &window, "once");
        let artifacts = SolverArtifacts::new(&std::env::temp_dir(), "bess-problem-once-again", 0);
        assert!(problem.solve(&artifacts).is_err());
    }
}
