//! Single-window MILP: variables, constraints, objective, and the solve.

pub mod artifacts;
pub mod objective;
pub mod problem;
pub mod result;
pub mod strategy;
pub mod variables;

pub use self::{
    artifacts::SolverArtifacts,
    objective::ObjectivePolicy,
    problem::DispatchProblem,
    result::{DispatchOutputs, DispatchStep, SolveStatus},
};
