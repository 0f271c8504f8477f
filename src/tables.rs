use average::Mean;
use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};
use itertools::Itertools;

use crate::{
    battery::{
        BatteryModel,
        model::{EnergyBounds, FlowLimits},
    },
    dispatch::{DispatchStep, SolveStatus},
    quantity::{cost::Cost, power::Kilowatts},
    rolling::DaySummary,
};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .apply_modifier(modifiers::UTF8_ROUND_CORNERS)
        .enforce_styling();
    table
}

pub fn build_steps_table(steps: &[DispatchStep]) -> Table {
    let mean_cost: Cost = {
        let estimate: Mean = steps.iter().map(|step| step.total_cost.0).collect();
        if estimate.is_empty() { Cost::ZERO } else { estimate.mean().into() }
    };
    let n_assets = steps.first().map_or(0, |step| step.assets.len());

    let mut table = new_table();
    let mut header = vec![String::from("Date"), String::from("Start"), String::from("Grid")];
    for asset in 0..n_assets {
        header.extend([format!("Net #{asset}"), format!("Energy #{asset}")]);
    }
    header.extend([String::from("Revenue"), String::from("Degradation"), String::from("Total")]);
    table.set_header(header);

    for step in steps {
        let mut row = vec![
            Cell::new(step.datetime.format("%b %d")).add_attribute(Attribute::Dim),
            Cell::new(step.datetime.format("%H:%M")),
            Cell::new(step.absorption - step.injection).set_alignment(CellAlignment::Right).fg(
                if step.injection > Kilowatts::ZERO { Color::Green } else { Color::Reset },
            ),
        ];
        for asset in &step.assets {
            let net = asset.charge - asset.discharge;
            row.push(Cell::new(net).set_alignment(CellAlignment::Right).fg(
                if net > Kilowatts::ZERO {
                    Color::Green
                } else if net < Kilowatts::ZERO {
                    Color::Red
                } else {
                    Color::Reset
                },
            ));
            row.push(Cell::new(asset.energy).set_alignment(CellAlignment::Right));
        }
        row.extend([
            Cell::new(step.expected_revenue).set_alignment(CellAlignment::Right),
            Cell::new(step.weighted_degradation)
                .set_alignment(CellAlignment::Right)
                .add_attribute(Attribute::Dim),
            Cell::new(step.total_cost)
                .set_alignment(CellAlignment::Right)
                .fg(if step.total_cost > mean_cost { Color::Red } else { Color::Green }),
        ]);
        table.add_row(row);
    }
    table
}

pub fn build_summary_table(summaries: &[DaySummary]) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        "Day",
        "Date",
        "Status",
        "Solution file",
        "Revenue",
        "Degradation",
        "Weighted",
        "Total",
        "SoC",
        "Elapsed",
    ]);
    for summary in summaries {
        table.add_row(vec![
            Cell::new(summary.day).add_attribute(Attribute::Dim),
            Cell::new(summary.datetime.format("%Y-%m-%d")),
            Cell::new(summary.status).fg(match summary.status {
                SolveStatus::Optimal => Color::Green,
                SolveStatus::Infeasible => Color::Red,
            }),
            Cell::new(&summary.status_real).add_attribute(Attribute::Dim),
            Cell::new(summary.expected_revenue).set_alignment(CellAlignment::Right),
            Cell::new(summary.degradation.iter().join(" / ")).set_alignment(CellAlignment::Right),
            Cell::new(summary.weighted_degradation).set_alignment(CellAlignment::Right),
            Cell::new(summary.total_cost).set_alignment(CellAlignment::Right),
            Cell::new(summary.socs.iter().map(|soc| format!("{soc:.1}%")).join(" / "))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2?}", summary.elapsed)).add_attribute(Attribute::Dim),
        ]);
    }
    table
}

/// Derived linear parameters of one asset, one row per direction.
pub fn build_model_table(model: &BatteryModel) -> Table {
    let mut table = new_table();
    table.set_header(vec![
        "Direction",
        "C-rate",
        "AC max",
        "DC max",
        "Low segment",
        "High segment",
        "Efficiency",
        "Line",
        "Voltage",
    ]);
    for limits in [&model.charge, &model.discharge] {
        table.add_row(flow_row(limits, model.uses_piecewise_efficiency()));
    }
    let bounds = match model.energy_bounds {
        EnergyBounds::Static { min, max } => format!("{min} ..= {max}"),
        EnergyBounds::Dynamic { charge, discharge } => format!(
            "max {:.4}·I{:+.2}, min {:.4}·I{:+.2}",
            charge.slope, charge.intercept, discharge.slope, discharge.intercept,
        ),
    };
    table.add_row(vec![
        Cell::new("energy").add_attribute(Attribute::Bold),
        Cell::new(format!("available {}", model.available_energy)),
        Cell::new(format!("initial {}", model.initial_energy)),
        Cell::new(bounds),
        Cell::new(format!("degradation {:.3e}", model.degradation_slope)),
    ]);
    table
}

fn flow_row(limits: &FlowLimits, piecewise: bool) -> Vec<Cell> {
    let [low, high] = limits.segments;
    vec![
        Cell::new(limits.direction).add_attribute(Attribute::Bold),
        Cell::new(format!("{:.3}", limits.c_rate)).set_alignment(CellAlignment::Right),
        Cell::new(limits.ac_max).set_alignment(CellAlignment::Right),
        Cell::new(limits.dc_max).set_alignment(CellAlignment::Right),
        Cell::new(format!("{} ..= {}", low.min, low.max)).fg(if low.is_usable() {
            Color::Reset
        } else {
            Color::Red
        }),
        Cell::new(format!("{} ..= {}", high.min, high.max)).fg(if high.is_usable() {
            Color::Reset
        } else {
            Color::Red
        }),
        Cell::new(format!("{:.2}%", limits.efficiency * 100.0)).set_alignment(CellAlignment::Right),
        match limits.efficiency_line {
            Some(line) if piecewise => {
                Cell::new(format!("{:.4}·P{:+.3}", line.slope, line.intercept))
            }
            _ => Cell::new("constant").add_attribute(Attribute::Dim),
        },
        Cell::new(format!("{:.1} V", limits.nominal_voltage)).set_alignment(CellAlignment::Right),
    ]
}
