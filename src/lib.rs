//! streamledger
//!
//! Event-sourced account ledger as a small CQRS pipeline: commands are
//! validated by a write-side aggregate, persisted as immutable events
//! on an ordered Redis stream under optimistic concurrency, and
//! asynchronously projected into a queryable Postgres view.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_log;
pub mod projection;
pub mod service;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use service::AccountService;
