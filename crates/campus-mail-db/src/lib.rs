//! Storage layer for Campus Mail
//!
//! This crate provides:
//! - `SQLite` operations via `sqlmodel` on frankensqlite
//! - Connection pooling with schema initialization
//! - The message tree (nested-set intervals), per-recipient delivery
//!   records, target-audit rows, and the membership directory tables
//!
//! # Timestamp Convention
//!
//! All timestamps are stored as `i64` (microseconds since Unix epoch).
//! Helpers in [`timestamps`] convert to/from `chrono::NaiveDateTime`.

#![forbid(unsafe_code)]

pub mod directory;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod timestamps;

pub use error::{DbError, DbResult};
pub use models::*;
pub use pool::{DbPool, DbPoolConfig, create_pool};
pub use timestamps::{micros_to_naive, naive_to_micros, now_micros};

pub use sqlmodel;
pub use sqlmodel_core;
pub use sqlmodel_frankensqlite;
pub use sqlmodel_sqlite;

/// The connection type used by this crate's pool and queries.
///
/// Runtime DB traffic uses `FrankenConnection` (pure-Rust `SQLite`);
/// schema initialization goes through the C-backed `SqliteConnection`
/// before any `FrankenConnection` opens the file.
pub type DbConn = sqlmodel_frankensqlite::FrankenConnection;
