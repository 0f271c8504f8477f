use std::fs;

use crate::{
    cli::RunArgs,
    forecast::ForecastSeries,
    prelude::*,
    rolling::RollingHorizon,
    tables::{build_steps_table, build_summary_table},
};

#[instrument(skip_all)]
pub fn run(args: &RunArgs) -> Result {
    let mut scenario = args.scenario.load()?;
    if let Some(policy) = args.policy {
        scenario.run.policy = policy;
    }
    if let Some(first_day) = args.first_day {
        scenario.run.first_day = first_day;
    }
    if let Some(n_days) = args.n_days {
        scenario.run.n_days = n_days;
    }
    scenario.validate()?;

    let forecast = ForecastSeries::from_json_file(&args.forecasts)?;
    info!(step = %forecast.step(), "loaded the forecast");

    let artifacts_dir = args.artifacts_dir.clone().unwrap_or_else(std::env::temp_dir);
    let outputs = RollingHorizon::builder()
        .scenario(&scenario)
        .forecast(&forecast)
        .artifacts_dir(&artifacts_dir)
        .build()
        .run()?;

    if !args.quiet {
        println!("{}", build_steps_table(&outputs.steps));
    }
    println!("{}", build_summary_table(&outputs.summaries));

    if let Some(path) = &args.output {
        let contents = serde_json::to_string_pretty(&outputs)?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write `{}`", path.display()))?;
        info!(path = %path.display(), "saved the results");
    }
    Ok(())
}
