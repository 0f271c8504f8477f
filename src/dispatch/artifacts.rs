//! Per-day model and solution files written next to each solve and removed afterwards.

use std::{
    fmt::Write as _,
    fs,
    io,
    path::{Path, PathBuf},
};

use good_lp::{Constraint, Expression, ProblemVariables};

use crate::{dispatch::result::SolveResult, prelude::*};

/// Owns the model and solution files of a single day and removes them when dropped.
#[must_use]
pub struct SolverArtifacts {
    model_path: PathBuf,
    solution_path: PathBuf,
}

impl SolverArtifacts {
    pub fn new(directory: &Path, run_stem: &str, day: u32) -> Self {
        Self {
            model_path: directory.join(format!("{run_stem}-day{day}.lp")),
            solution_path: directory.join(format!("{run_stem}-day{day}.sol")),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn solution_path(&self) -> &Path {
        &self.solution_path
    }

    /// Write the objective and the constraints in terms of the named variables.
    pub fn write_model(
        &self,
        variables: &ProblemVariables,
        objective: &Expression,
        constraints: &[Constraint],
    ) -> Result {
        let mut contents =
            format!("minimize\n  obj: {}\nsubject to\n", variables.display(objective));
        for (index, constraint) in constraints.iter().enumerate() {
            writeln!(contents, "  c{index}: {}", variables.display(constraint))?;
        }
        contents.push_str("end\n");
        fs::write(&self.model_path, contents)
            .with_context(|| format!("failed to write `{}`", self.model_path.display()))
    }

    /// Write the status header followed by one line per variable and step.
    pub fn write_solution(&self, result: &SolveResult) -> Result {
        let mut contents = match result.objective {
            Some(objective) => format!("{} - objective value {objective}\n", result.termination),
            None => format!("{} - objective value n/a\n", result.termination),
        };
        for (key, values) in &result.values {
            for (step, value) in values.iter().enumerate() {
                writeln!(contents, "{key}[{step}] {value}")?;
            }
        }
        fs::write(&self.solution_path, contents)
            .with_context(|| format!("failed to write `{}`", self.solution_path.display()))
    }

    /// Status as reported in the solution file header.
    pub fn read_status(&self) -> Result<String> {
        let contents = fs::read_to_string(&self.solution_path)
            .with_context(|| format!("failed to read `{}`", self.solution_path.display()))?;
        let header = contents.lines().next().context("empty solution file")?;
        let (status, _) = header
            .split_once(" - ")
            .with_context(|| format!("unexpected solution header: `{header}`"))?;
        Ok(status.to_string())
    }

    /// Remove the files, logging rather than failing.
    pub fn cleanup(&self) {
        for path in [&self.model_path, &self.solution_path] {
            match fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed");
                }
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "failed to remove");
                }
            }
        }
    }
}

impl Drop for SolverArtifacts {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use good_lp::{constraint, variable};

    use super::*;
    use crate::dispatch::{
        result::{SolveStatus, Termination},
        variables::{Family, VariableKey},
    };

    fn artifacts(name: &str) -> SolverArtifacts {
        let run_stem = format!("bess-test-{name}-{}", std::process::id());
        SolverArtifacts::new(&std::env::temp_dir(), &run_stem, 3)
    }

    fn result(termination: Termination) -> SolveResult {
        SolveResult {
            status: SolveStatus::Optimal,
            termination,
            objective: Some(48.0),
            values: BTreeMap::from([(VariableKey::grid(Family::Absorption), vec![10.0, 10.0])]),
        }
    }

    #[test]
    fn test_status_header() -> Result {
        let artifacts = artifacts("header");
        artifacts.write_solution(&result(Termination::Optimal))?;
        assert_eq!(artifacts.read_status()?, "Optimal");
        let contents = fs::read_to_string(artifacts.solution_path())?;
        assert!(contents.starts_with("Optimal - objective value 48\n"));
        assert!(contents.contains("absorption[1] 10\n"));
        Ok(())
    }

    #[test]
    fn test_stopped_on_time_header() -> Result {
        let artifacts = artifacts("time-limit");
        let result = result(Termination::TimeLimit);
        artifacts.write_solution(&result)?;

        // The solution is usable, but the header tells how the solver stopped:
        assert!(result.status.is_optimal());
        assert_eq!(artifacts.read_status()?, "Stopped on time");
        Ok(())
    }

    #[test]
    fn test_stopped_on_gap_header() -> Result {
        let artifacts = artifacts("gap-limit");
        artifacts.write_solution(&result(Termination::GapLimit))?;
        assert_eq!(artifacts.read_status()?, "Stopped on gap");
        Ok(())
    }

    #[test]
    fn test_infeasible_header() -> Result {
        let artifacts = artifacts("infeasible");
        artifacts.write_solution(&SolveResult::infeasible())?;
        assert_eq!(artifacts.read_status()?, "Infeasible");
        Ok(())
    }

    #[test]
    fn test_model_file() -> Result {
        let artifacts = artifacts("model");
        let mut variables = ProblemVariables::new();
        let x = variables.add(variable().min(0.0).name("charge.0[0]"));
        let objective = 2.0 * x;
        artifacts.write_model(&variables, &objective, &[constraint!(x <= 5.0)])?;

        let contents = fs::read_to_string(artifacts.model_path())?;
        assert!(contents.starts_with("minimize\n  obj: 2 charge.0[0]\nsubject to\n"));
        assert!(contents.contains("  c0: charge.0[0] <= 5\n"));
        assert!(contents.ends_with("end\n"));
        Ok(())
    }

    #[test]
    fn test_removed_on_drop() -> Result {
        let (model_path, solution_path) = {
            let artifacts = artifacts("drop");
            artifacts.write_model(&ProblemVariables::new(), &Expression::from(0.0), &[])?;
            artifacts.write_solution(&SolveResult::infeasible())?;
            assert!(artifacts.model_path().exists());
            assert!(artifacts.solution_path().exists());
            (artifacts.model_path().to_path_buf(), artifacts.solution_path().to_path_buf())
        };
        assert!(!model_path.exists());
        assert!(!solution_path.exists());
        Ok(())
    }

    #[test]
    fn test_cleanup_twice() {
        let artifacts = artifacts("twice");
        artifacts.cleanup();
        artifacts.cleanup();
    }
}
