//! Amount type
//!
//! Domain primitive for monetary amounts in integer minor units.
//! Amounts are validated at construction time, so a non-positive value
//! can never reach command handling.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DomainError;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
///
/// # Example
/// ```
/// use streamledger::domain::Amount;
///
/// let amount = Amount::new(100).unwrap();
/// assert_eq!(amount.value(), 100);
/// assert!(Amount::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// Create a new Amount.
    ///
    /// # Errors
    /// - `DomainError::InvalidAmount` if `value <= 0`
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::InvalidAmount(value));
        }
        Ok(Self(value))
    }

    /// Get the underlying value in minor units.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(100);
        assert!(amount.is_ok());
        assert_eq!(amount.unwrap().value(), 100);
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(0);
        assert!(matches!(amount, Err(DomainError::InvalidAmount(0))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let amount = Amount::new(-100);
        assert!(matches!(amount, Err(DomainError::InvalidAmount(-100))));
    }

    #[test]
    fn test_amount_try_from() {
        let amount: Result<Amount, _> = 25.try_into();
        assert_eq!(amount.unwrap().value(), 25);
    }
}
