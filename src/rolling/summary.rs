use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::serde_as;

use crate::{
    dispatch::SolveStatus,
    quantity::{cost::Cost, energy::KilowattHours},
};

/// Cumulative figures after one day of the run.
#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct DaySummary {
    pub day: u32,
    pub datetime: DateTime<Utc>,
    pub status: SolveStatus,

    /// Status as read back from the solution file.
    pub status_real: String,

    pub expected_revenue: Cost,

    /// Per asset.
    pub degradation: Vec<KilowattHours>,

    pub weighted_degradation: Cost,
    pub total_cost: Cost,

    /// State of charge per asset at the end of the day, %.
    pub socs: Vec<f64>,

    #[serde_as(as = "serde_with::DurationSecondsWithFrac<f64>")]
    pub elapsed: Duration,
}
