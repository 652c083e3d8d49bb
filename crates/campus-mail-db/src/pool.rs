//! Connection pooling with schema initialization

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use asupersync::{Cx, Outcome};
use sqlmodel_core::Error as SqlError;
use sqlmodel_pool::{Pool, PoolConfig, PooledConnection};

use crate::error::{DbError, DbResult};
use crate::schema;
use crate::DbConn;

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_OVERFLOW: usize = 10;
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_POOL_RECYCLE_MS: u64 = 30 * 60 * 1000; // 30 minutes

/// Pool configuration
#[derive(Debug, Clone)]
pub struct DbPoolConfig {
    /// Database URL (`sqlite:///path/to/db.sqlite3`)
    pub database_url: String,
    /// Minimum connections to keep open
    pub min_connections: usize,
    /// Maximum connections
    pub max_connections: usize,
    /// Timeout for acquiring a connection (ms)
    pub acquire_timeout_ms: u64,
    /// Max connection lifetime (ms)
    pub max_lifetime_ms: u64,
    /// Create tables on first connection per database file
    pub run_migrations: bool,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./campus_mail.sqlite3".to_string(),
            min_connections: DEFAULT_POOL_SIZE,
            max_connections: DEFAULT_POOL_SIZE + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            max_lifetime_ms: DEFAULT_POOL_RECYCLE_MS,
            run_migrations: true,
        }
    }
}

impl DbPoolConfig {
    /// Create config from the environment (`DATABASE_URL`,
    /// `DATABASE_POOL_SIZE`, `DATABASE_POOL_TIMEOUT`).
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let database_url = campus_mail_core::config::env_value("DATABASE_URL")
            .unwrap_or_else(|| defaults.database_url.clone());
        let pool_size = campus_mail_core::config::env_value("DATABASE_POOL_SIZE")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);
        let pool_timeout = campus_mail_core::config::env_value("DATABASE_POOL_TIMEOUT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_POOL_TIMEOUT_MS);

        Self {
            database_url,
            min_connections: pool_size,
            max_connections: pool_size + DEFAULT_MAX_OVERFLOW,
            acquire_timeout_ms: pool_timeout,
            ..defaults
        }
    }

    /// Parse the `SQLite` path from the database URL.
    pub fn sqlite_path(&self) -> DbResult<String> {
        let url = self.database_url.trim();
        if url == "sqlite://:memory:" || url == "sqlite:///:memory:" || url == ":memory:" {
            return Ok(":memory:".to_string());
        }
        if let Some(path) = url.strip_prefix("sqlite:///") {
            if !path.is_empty() {
                return Ok(path.to_string());
            }
        }
        Err(DbError::InvalidArgument {
            field: "database_url",
            message: format!(
                "Invalid SQLite database URL: {} (expected sqlite:///path/to/db.sqlite3)",
                self.database_url
            ),
        })
    }
}

/// Database files whose schema has already been initialized this process.
static INITIALIZED_PATHS: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Run DB-wide init (PRAGMAs + tables) with the C-backed `SqliteConnection`
/// BEFORE any `FrankenConnection` opens the file. The two drivers must never
/// have the same file open simultaneously during schema writes.
fn ensure_schema_initialized(sqlite_path: &str, create_tables: bool) -> Result<(), SqlError> {
    let mut done = INITIALIZED_PATHS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if done.contains(sqlite_path) {
        return Ok(());
    }

    let init_conn = sqlmodel_sqlite::SqliteConnection::open_file(sqlite_path.to_string())?;
    init_conn.execute_raw(schema::PRAGMA_SETTINGS_SQL)?;
    if create_tables {
        init_conn.execute_raw(schema::CREATE_TABLES_SQL)?;
    }
    drop(init_conn);

    tracing::debug!("initialized schema for {sqlite_path}");
    done.insert(sqlite_path.to_string());
    Ok(())
}

/// A configured `SQLite` connection pool with schema initialization.
///
/// Wraps `sqlmodel_pool::Pool<DbConn>` and encapsulates URL parsing and the
/// one-time per-file schema init gate.
#[derive(Clone)]
pub struct DbPool {
    pool: Arc<Pool<DbConn>>,
    sqlite_path: String,
    run_migrations: bool,
}

impl DbPool {
    /// Create a new pool (does not open connections until first acquire).
    pub fn new(config: &DbPoolConfig) -> DbResult<Self> {
        let sqlite_path = config.sqlite_path()?;

        let pool_config = PoolConfig::new(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout_ms)
            .max_lifetime(config.max_lifetime_ms)
            .test_on_checkout(true)
            .test_on_return(false);

        Ok(Self {
            pool: Arc::new(Pool::new(pool_config)),
            sqlite_path,
            run_migrations: config.run_migrations,
        })
    }

    #[must_use]
    pub fn sqlite_path(&self) -> &str {
        &self.sqlite_path
    }

    /// Acquire a pooled connection, creating and initializing one if needed.
    pub async fn acquire(&self, cx: &Cx) -> Outcome<PooledConnection<DbConn>, SqlError> {
        let sqlite_path = self.sqlite_path.clone();
        let run_migrations = self.run_migrations;

        self.pool
            .acquire(cx, || {
                let sqlite_path = sqlite_path.clone();
                async move {
                    if sqlite_path == ":memory:" {
                        // Every in-memory connection is its own database, so
                        // schema init happens on the runtime connection.
                        let conn = match DbConn::open_memory() {
                            Ok(c) => c,
                            Err(e) => return Outcome::Err(e),
                        };
                        if let Err(e) = conn.execute_raw(&schema::init_schema_sql()) {
                            return Outcome::Err(e);
                        }
                        return Outcome::Ok(conn);
                    }

                    if let Some(parent) = Path::new(&sqlite_path).parent() {
                        if !parent.as_os_str().is_empty() {
                            if let Err(e) = std::fs::create_dir_all(parent) {
                                return Outcome::Err(SqlError::Custom(format!(
                                    "failed to create db dir {}: {e}",
                                    parent.display()
                                )));
                            }
                        }
                    }

                    if let Err(e) = ensure_schema_initialized(&sqlite_path, run_migrations) {
                        return Outcome::Err(e);
                    }

                    let conn = match DbConn::open_file(&sqlite_path) {
                        Ok(c) => c,
                        Err(e) => return Outcome::Err(e),
                    };

                    // Per-connection PRAGMAs.
                    if let Err(e) = conn.execute_raw(schema::PRAGMA_SETTINGS_SQL) {
                        return Outcome::Err(e);
                    }

                    Outcome::Ok(conn)
                }
            })
            .await
    }
}

/// Create a pool from configuration.
pub fn create_pool(config: &DbPoolConfig) -> DbResult<DbPool> {
    DbPool::new(config)
}
