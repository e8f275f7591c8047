pub mod commands;
pub mod config;
pub mod db;
pub mod directory;
pub mod discord;
pub mod engine;
pub mod error;
pub mod model;
pub mod push;

pub use engine::{Engine, EngineSettings, Gate, SyncOutcome, SyncStatus};
pub use error::AutosyncError;
