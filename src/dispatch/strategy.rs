//! Charge/discharge flow formulations, one per efficiency model.

use good_lp::{Constraint, Expression, Variable, constraint, variable};

use crate::{
    battery::{BatteryModel, linearize::Line, model::FlowLimits},
    dispatch::variables::{Family, VariableKey, VariableTable},
};

/// Per-step AC and DC flows of one asset, plus the constraints tying them together.
pub struct AssetFlows {
    pub ac_charge: Vec<Expression>,
    pub ac_discharge: Vec<Expression>,
    pub dc_charge: Vec<Expression>,
    pub dc_discharge: Vec<Expression>,
    pub constraints: Vec<Constraint>,
}

pub trait EfficiencyStrategy {
    fn name(&self) -> &'static str;

    /// Declare the flow variables of the asset and constrain them.
    fn declare(&self, table: &mut VariableTable, asset: usize, model: &BatteryModel) -> AssetFlows;
}

/// Pick the formulation for the model once, at problem construction.
pub fn select(model: &BatteryModel) -> Box<dyn EfficiencyStrategy> {
    if model.uses_piecewise_efficiency() {
        Box::new(PiecewiseEfficiency)
    } else {
        Box::new(ConstantEfficiency)
    }
}

/// Single power pair with a non-simultaneity binary.
pub struct ConstantEfficiency;

impl EfficiencyStrategy for ConstantEfficiency {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn declare(&self, table: &mut VariableTable, asset: usize, model: &BatteryModel) -> AssetFlows {
        let charge = table.add(
            VariableKey::asset(Family::Charge, asset),
            variable().min(0.0).max(model.charge.ac_max.0),
        );
        let discharge = table.add(
            VariableKey::asset(Family::Discharge, asset),
            variable().min(0.0).max(model.discharge.ac_max.0),
        );
        let mode = table.add(VariableKey::asset(Family::ModeSelector, asset), variable().binary());

        let mut constraints = Vec::with_capacity(2 * table.n_steps());
        for ((charge, discharge), mode) in charge.iter().zip(&discharge).zip(&mode) {
            constraints.push(constraint!(*charge <= model.charge.ac_max.0 * *mode));
            constraints.push(constraint!(
                *discharge + model.discharge.ac_max.0 * *mode <= model.discharge.ac_max.0
            ));
        }

        let charge_factor = model.charge.constant_factor();
        let discharge_factor = model.discharge.constant_factor();
        AssetFlows {
            ac_charge: charge.iter().copied().map(Expression::from).collect(),
            ac_discharge: discharge.iter().copied().map(Expression::from).collect(),
            dc_charge: charge.iter().map(|charge| charge_factor * *charge).collect(),
            dc_discharge: discharge.iter().map(|discharge| discharge_factor * *discharge).collect(),
            constraints,
        }
    }
}

/// Two power segments per direction: a fitted line below the cut, the constant factor above.
pub struct PiecewiseEfficiency;

struct Segments {
    power: [Vec<Variable>; 2],
    selector: [Vec<Variable>; 2],
    low_dc: Vec<Variable>,
}

impl PiecewiseEfficiency {
    fn declare_direction(
        table: &mut VariableTable,
        asset: usize,
        limits: &FlowLimits,
        families: [Family; 3],
        constraints: &mut Vec<Constraint>,
    ) -> Segments {
        let [power_family, selector_family, low_dc_family] = families;
        let power = [0, 1].map(|segment| {
            table.add(
                VariableKey::segment(power_family, asset, segment),
                variable().min(0.0).max(limits.ac_max.0),
            )
        });
        let selector = [0, 1].map(|segment| {
            table.add(VariableKey::segment(selector_family, asset, segment), variable().binary())
        });
        let low_dc = table.add(VariableKey::asset(low_dc_family, asset), variable());

        for (segment, bounds) in limits.segments.iter().enumerate() {
            for (power, selector) in power[segment].iter().zip(&selector[segment]) {
                constraints.push(constraint!(bounds.min.0 * *selector <= *power));
                constraints.push(constraint!(*power <= bounds.max.0 * *selector));
            }
        }

        // Low-segment DC power follows the fitted line while the segment is selected:
        let line = limits
            .efficiency_line
            .unwrap_or_else(|| Line::through_origin(limits.constant_factor()));
        for ((low_dc, power), selector) in low_dc.iter().zip(&power[0]).zip(&selector[0]) {
            constraints.push(constraint!(
                *low_dc == line.slope * *power + line.intercept * *selector
            ));
        }

        Segments { power, selector, low_dc }
    }
}

impl EfficiencyStrategy for PiecewiseEfficiency {
    fn name(&self) -> &'static str {
        "piecewise"
    }

    fn declare(&self, table: &mut VariableTable, asset: usize, model: &BatteryModel) -> AssetFlows {
        let mut constraints = Vec::new();
        let charge = Self::declare_direction(
            table,
            asset,
            &model.charge,
            [Family::Charge, Family::ChargeSelector, Family::ChargeLowDc],
            &mut constraints,
        );
        let discharge = Self::declare_direction(
            table,
            asset,
            &model.discharge,
            [Family::Discharge, Family::DischargeSelector, Family::DischargeLowDc],
            &mut constraints,
        );

        // At most one segment of one direction at a time:
        for step in 0..table.n_steps() {
            let selected: Expression = charge
                .selector
                .iter()
                .chain(&discharge.selector)
                .map(|selector| Expression::from(selector[step]))
                .sum();
            constraints.push(constraint!(selected <= 1.0));
        }

        let charge_factor = model.charge.constant_factor();
        let discharge_factor = model.discharge.constant_factor();
        let ac = |segments: &Segments, step: usize| -> Expression {
            segments.power[0][step] + segments.power[1][step]
        };
        let n_steps = table.n_steps();
        AssetFlows {
            ac_charge: (0..n_steps).map(|step| ac(&charge, step)).collect(),
            ac_discharge: (0..n_steps).map(|step| ac(&discharge, step)).collect(),
            dc_charge: (0..n_steps)
                .map(|step| charge.low_dc[step] + charge_factor * charge.power[1][step])
                .collect(),
            dc_discharge: (0..n_steps)
                .map(|step| discharge.low_dc[step] + discharge_factor * discharge.power[1][step])
                .collect(),
            constraints,
        }
    }
}
