//! Battery characterization: static descriptors in, linear MILP parameters out.

pub mod config;
pub mod linearize;
pub mod model;

use enumset::EnumSetType;
use serde::{Deserialize, Serialize};

pub use self::{config::BatteryAssetConfig, model::BatteryModel};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Missing, non-finite, or out-of-range configuration value.
    #[error("invalid battery configuration: {0}")]
    Configuration(String),

    /// Test data that matches more than one way.
    #[error("inconsistent battery test data: {0}")]
    DataConsistency(String),

    /// Test data too short or malformed to fit.
    #[error("malformed battery test data: {0}")]
    DataFormat(String),
}

/// Optional modelling features, enabled per scenario.
#[derive(Debug, Deserialize, Serialize, clap::ValueEnum, EnumSetType)]
#[serde(rename_all = "kebab-case")]
#[enumset(serialize_repr = "list")]
pub enum AddOn {
    /// Energy-content bounds follow lines in the DC flow instead of static constants.
    DynamicSoc,

    /// Two-segment efficiency curve instead of a constant efficiency.
    PiecewiseEfficiency,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::Display)]
pub enum Direction {
    #[display("charge")]
    Charge,

    #[display("discharge")]
    Discharge,
}
