//! Aggregate module
//!
//! The account aggregate: pure state plus invariant-preserving commands.

pub mod account;

pub use account::{Account, AccountSnapshot};
