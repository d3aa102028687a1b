//! API module
//!
//! HTTP endpoints over the account service and the view store.

pub mod routes;

pub use routes::{create_router, AppState};
