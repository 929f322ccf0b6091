//! Database module.
//!
//! SQLite storage for endpoints, check history and settings, with
//! embedded migrations.

mod models;
mod stats;
mod store;

pub use models::*;
pub use stats::*;
pub use store::*;
