use crate::{battery::BatteryModel, cli::CharacterizeArgs, prelude::*, tables::build_model_table};

#[instrument(skip_all)]
pub fn characterize(args: &CharacterizeArgs) -> Result {
    let scenario = args.scenario.load()?;
    for (index, asset) in scenario.assets.iter().enumerate() {
        let model =
            BatteryModel::configure(&asset.battery, asset.initial_soc, scenario.system.add_ons)
                .with_context(|| format!("failed to configure asset #{index}"))?;
        info!(
            index,
            piecewise_efficiency = model.uses_piecewise_efficiency(),
            "configured",
        );
        println!("{}", build_model_table(&model));
    }
    Ok(())
}
