//! Persistence layer modules.

pub mod app_repo;
pub mod db;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
