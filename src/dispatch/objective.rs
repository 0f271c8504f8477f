use std::str::FromStr;

use crate::prelude::*;

/// Weighting of the degradation terms against the grid cost.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, derive_more::Display)]
pub enum ObjectivePolicy {
    /// Degradation counts the same as the grid cost.
    #[default]
    #[display("A")]
    GridCost,

    /// Degradation is ten times as expensive.
    #[display("B")]
    DegradationAverse,
}

impl ObjectivePolicy {
    /// Per-asset degradation weights.
    pub const fn weights(self) -> [f64; 2] {
        match self {
            Self::GridCost => [1.0, 1.0],
            Self::DegradationAverse => [10.0, 10.0],
        }
    }

    pub const fn weight(self, asset: usize) -> f64 {
        let weights = self.weights();
        if asset < weights.len() { weights[asset] } else { weights[weights.len() - 1] }
    }
}

impl FromStr for ObjectivePolicy {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self> {
        match token {
            "A" | "grid-cost" => Ok(Self::GridCost),
            "B" | "degradation-averse" => Ok(Self::DegradationAverse),
            _ => bail!("unknown objective policy `{token}`, expected `A` or `B`"),
        }
    }
}
