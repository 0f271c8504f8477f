mod characterize;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use enumset::EnumSet;

pub use self::{characterize::characterize, run::run};
use crate::{battery::AddOn, dispatch::ObjectivePolicy, prelude::*, scenario::Scenario};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: optimize the dispatch day by day and print the setpoints.
    #[clap(name = "run")]
    Run(Box<RunArgs>),

    /// Print the linear parameters derived for each asset, without solving anything.
    #[clap(name = "characterize")]
    Characterize(Box<CharacterizeArgs>),
}

#[derive(Parser)]
pub struct ScenarioArgs {
    /// Scenario TOML file.
    #[clap(long, env = "BESS_SCENARIO")]
    pub scenario: PathBuf,

    /// Replace the scenario add-ons.
    #[clap(long = "add-ons", env = "BESS_ADD_ONS", value_delimiter = ',')]
    pub add_ons: Option<Vec<AddOn>>,
}

impl ScenarioArgs {
    pub fn load(&self) -> Result<Scenario> {
        let mut scenario = Scenario::from_toml_file(&self.scenario)?;
        if let Some(add_ons) = &self.add_ons {
            scenario.system.add_ons = add_ons.iter().copied().collect::<EnumSet<_>>();
        }
        info!(
            path = %self.scenario.display(),
            n_assets = scenario.assets.len(),
            add_ons = ?scenario.system.add_ons,
            "loaded the scenario",
        );
        Ok(scenario)
    }
}

#[derive(Parser)]
pub struct RunArgs {
    #[clap(flatten)]
    pub scenario: ScenarioArgs,

    /// Forecast JSON file.
    #[clap(long, env = "BESS_FORECASTS")]
    pub forecasts: PathBuf,

    /// Write the setpoints and day summaries to this JSON file.
    #[clap(long, env = "BESS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Directory for the transient model and solution files, defaults to the temporary directory.
    #[clap(long, env = "BESS_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Objective policy: `A` for the plain grid cost or `B` to penalize degradation harder.
    #[clap(long, env = "BESS_POLICY")]
    pub policy: Option<ObjectivePolicy>,

    /// Day offset from the forecast start.
    #[clap(long, env = "BESS_FIRST_DAY")]
    pub first_day: Option<u32>,

    #[clap(long, env = "BESS_N_DAYS")]
    pub n_days: Option<u32>,

    /// Do not print the per-step table.
    #[clap(long)]
    pub quiet: bool,
}

#[derive(Parser)]
pub struct CharacterizeArgs {
    #[clap(flatten)]
    pub scenario: ScenarioArgs,
}
