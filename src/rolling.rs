//! Sequential day loop carrying the battery state from one day to the next.

mod orchestrator;
mod state;
mod summary;

pub use self::{orchestrator::RollingHorizon, summary::DaySummary};
