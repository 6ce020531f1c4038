//! Shelfie library crate
//!
//! Re-exports core modules for integration tests and external use.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod library;
pub mod queue;
pub mod sources;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use error::{Error, Result};
pub use library::{InMemoryLibrary, SqliteLibrary};
pub use queue::{QueueEngine, QueueEvent, QueueStatus};
