//! Database module: location store and canonical message cache over SQLite.
//!
//! - `model`: row views with bookkeeping columns.
//! - `repo`: SQL-only functions that map rows into domain types.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::StoredLocation;
