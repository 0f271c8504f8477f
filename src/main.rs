#![allow(clippy::doc_markdown)]
#![doc = include_str!("../README.md")]

mod battery;
mod cli;
mod dispatch;
mod forecast;
mod prelude;
mod quantity;
mod rolling;
mod scenario;
mod tables;

use clap::{Parser, crate_version};

use crate::{
    cli::{Args, Command, characterize, run},
    prelude::*,
};

fn main() -> Result {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().without_time().compact().init();
    info!(version = crate_version!(), "starting…");

    match Args::parse().command {
        Command::Run(args) => run(&args)?,
        Command::Characterize(args) => characterize(&args)?,
    }

    info!("done!");
    Ok(())
}
