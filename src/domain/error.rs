//! Domain errors
//!
//! Failures of command validation against the aggregate's invariants.

/// Errors raised when a command violates a domain rule
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Amount must be strictly positive
    #[error("amount must be positive (got {0})")]
    InvalidAmount(i64),

    /// Withdrawal would take the balance below zero
    #[error("insufficient funds: balance {funds}, requested {requested}")]
    InsufficientFunds { funds: i64, requested: i64 },
}
