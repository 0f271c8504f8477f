pub mod cost;
pub mod energy;
pub mod power;
pub mod rate;

use std::{
    cmp::Ordering,
    ops::{Div, Mul},
};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Physical quantity tagged with its dimension exponents.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    derive_more::Add,
    derive_more::AddAssign,
    derive_more::From,
    derive_more::FromStr,
    derive_more::Neg,
    derive_more::Sub,
    derive_more::SubAssign,
    derive_more::Sum,
)]
#[serde(transparent)]
pub struct Quantity<const POWER: isize, const TIME: isize, const COST: isize>(pub f64);

impl<const POWER: isize, const TIME: isize, const COST: isize> Quantity<POWER, TIME, COST> {
    pub const ZERO: Self = Self(0.0);

    pub const fn is_finite(self) -> bool {
        self.0.is_finite()
    }
}

impl<const POWER: isize, const TIME: isize, const COST: isize> PartialEq
    for Quantity<POWER, TIME, COST>
{
    fn eq(&self, other: &Self) -> bool {
        OrderedFloat(self.0).eq(&OrderedFloat(other.0))
    }
}

impl<const POWER: isize, const TIME: isize, const COST: isize> Eq for Quantity<POWER, TIME, COST> {}

impl<const POWER: isize, const TIME: isize, const COST: isize> PartialOrd
    for Quantity<POWER, TIME, COST>
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const POWER: isize, const TIME: isize, const COST: isize> Ord for Quantity<POWER, TIME, COST> {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(self.0).cmp(&OrderedFloat(other.0))
    }
}

impl<const POWER: isize, const TIME: isize, const COST: isize> Mul<f64>
    for Quantity<POWER, TIME, COST>
{
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl<const POWER: isize, const TIME: isize, const COST: isize> Div<f64>
    for Quantity<POWER, TIME, COST>
{
    type Output = Self;

    fn div(self, rhs: f64) -> Self::Output {
        Self(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::{Debug, Formatter};

    use super::*;

    type Bare = Quantity<0, 0, 0>;

    impl Debug for Bare {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self.0)
        }
    }

    #[test]
    fn test_min() {
        assert_eq!(Bare::from(1.0).min(Bare::from(2.0)), Bare::from(1.0));
        assert_eq!(Bare::from(2.0).min(Bare::from(1.0)), Bare::from(1.0));
    }

    #[test]
    fn test_max() {
        assert_eq!(Bare::from(1.0).max(Bare::from(2.0)), Bare::from(2.0));
        assert_eq!(Bare::from(2.0).max(Bare::from(1.0)), Bare::from(2.0));
    }

    #[test]
    fn test_scale() {
        assert_eq!(Bare::from(3.0) * 2.0, Bare::from(6.0));
        assert_eq!(Bare::from(3.0) / 2.0, Bare::from(1.5));
    }
}
