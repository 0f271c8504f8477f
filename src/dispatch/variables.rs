use std::collections::BTreeMap;

use good_lp::{ProblemVariables, Variable, VariableDefinition};

/// Variable family, one vector of per-step variables each.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::Display)]
pub enum Family {
    #[display("absorption")]
    Absorption,

    #[display("injection")]
    Injection,

    /// Set when the grid flows into the site.
    #[display("grid-direction")]
    GridDirection,

    #[display("charge")]
    Charge,

    #[display("discharge")]
    Discharge,

    /// Set when charging in the constant-efficiency mode.
    #[display("mode")]
    ModeSelector,

    #[display("charge-selector")]
    ChargeSelector,

    #[display("discharge-selector")]
    DischargeSelector,

    /// DC charging power in the low segment.
    #[display("charge-low-dc")]
    ChargeLowDc,

    /// DC discharging power in the low segment.
    #[display("discharge-low-dc")]
    DischargeLowDc,

    #[display("energy")]
    Energy,

    #[display("degraded")]
    Degraded,

    #[display("min-energy")]
    MinEnergy,

    #[display("max-energy")]
    MaxEnergy,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VariableKey {
    pub family: Family,
    pub asset: Option<usize>,
    pub segment: Option<usize>,
}

impl VariableKey {
    pub const fn grid(family: Family) -> Self {
        Self { family, asset: None, segment: None }
    }

    pub const fn asset(family: Family, asset: usize) -> Self {
        Self { family, asset: Some(asset), segment: None }
    }

    pub const fn segment(family: Family, asset: usize, segment: usize) -> Self {
        Self { family, asset: Some(asset), segment: Some(segment) }
    }
}

impl std::fmt::Display for VariableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.family)?;
        if let Some(asset) = self.asset {
            write!(f, ".{asset}")?;
        }
        if let Some(segment) = self.segment {
            write!(f, ".s{segment}")?;
        }
        Ok(())
    }
}

/// Problem variables indexed by typed keys instead of names.
pub struct VariableTable {
    n_steps: usize,
    variables: ProblemVariables,
    keys: BTreeMap<VariableKey, Vec<Variable>>,
}

impl VariableTable {
    pub fn new(n_steps: usize) -> Self {
        Self { n_steps, variables: ProblemVariables::new(), keys: BTreeMap::new() }
    }

    pub const fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Declare one variable per step under the key, named `key[step]`.
    pub fn add(&mut self, key: VariableKey, definition: VariableDefinition) -> Vec<Variable> {
        let variables = (0..self.n_steps)
            .map(|step| self.variables.add(definition.clone().name(format!("{key}[{step}]"))))
            .collect::<Vec<_>>();
        self.keys.insert(key, variables.clone());
        variables
    }

    pub fn into_parts(self) -> (ProblemVariables, BTreeMap<VariableKey, Vec<Variable>>) {
        (self.variables, self.keys)
    }
}
