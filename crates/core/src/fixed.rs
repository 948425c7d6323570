//! Fixed-point arithmetic
//!
//! Every price and quantity that crosses a venue boundary is carried as a
//! [`Fixed`], parsed straight from the venue's decimal string so nothing
//! round-trips through floating point.

use rust_decimal::{Decimal, prelude::*};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

/// Exact decimal value for prices and quantities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fixed {
    value: Decimal,
}

impl Fixed {
    pub const ZERO: Fixed = Fixed {
        value: Decimal::ZERO,
    };

    pub const ONE: Fixed = Fixed {
        value: Decimal::ONE,
    };

    pub fn from_i64(value: i64) -> Self {
        Fixed {
            value: Decimal::from(value),
        }
    }

    /// Parse a venue decimal string ("0.001", "-2", "1e-3")
    pub fn from_str_exact(s: &str) -> Result<Self, FixedError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(FixedError::Empty);
        }
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .map(|value| Fixed { value })
            .map_err(|_| FixedError::InvalidValue(trimmed.to_string()))
    }

    /// Like [`Fixed::from_str_exact`] but treats an empty field as zero.
    ///
    /// Venues send `""` for prices that do not apply (e.g. a market order's
    /// limit price).
    pub fn from_str_or_zero(s: &str) -> Result<Self, FixedError> {
        if s.trim().is_empty() {
            Ok(Self::ZERO)
        } else {
            Self::from_str_exact(s)
        }
    }

    pub fn to_decimal(&self) -> Decimal {
        self.value
    }

    /// Convert to f64 (may lose precision)
    pub fn to_f64(&self) -> f64 {
        self.value.to_f64().unwrap_or(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.value.is_sign_positive() && !self.value.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.value.is_sign_negative() && !self.value.is_zero()
    }

    pub fn abs(&self) -> Self {
        Fixed {
            value: self.value.abs(),
        }
    }

    /// Drop trailing zeros so "2.000" and "2" print identically
    pub fn normalize(&self) -> Self {
        Fixed {
            value: self.value.normalize(),
        }
    }
}

/// Decimal parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FixedError {
    #[error("Empty decimal field")]
    Empty,
    #[error("Invalid decimal value: {0}")]
    InvalidValue(String),
}

impl Add for Fixed {
    type Output = Fixed;

    fn add(self, rhs: Self) -> Self::Output {
        Fixed {
            value: self.value + rhs.value,
        }
    }
}

impl Sub for Fixed {
    type Output = Fixed;

    fn sub(self, rhs: Self) -> Self::Output {
        Fixed {
            value: self.value - rhs.value,
        }
    }
}

impl Neg for Fixed {
    type Output = Fixed;

    fn neg(self) -> Self::Output {
        Fixed { value: -self.value }
    }
}

impl Display for Fixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Fixed {
    type Err = FixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_exact(s)
    }
}

impl From<Decimal> for Fixed {
    fn from(value: Decimal) -> Self {
        Fixed { value }
    }
}

impl From<Fixed> for Decimal {
    fn from(fixed: Fixed) -> Self {
        fixed.value
    }
}

/// Convenience macro for Fixed literals in tests and constants
#[macro_export]
macro_rules! fixed {
    ($value:expr) => {
        $crate::fixed::Fixed::from_str_exact(stringify!($value)).unwrap()
    };
}
