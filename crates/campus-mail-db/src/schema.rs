//! Database schema creation and migrations

use asupersync::{Cx, Outcome};
use sqlmodel_core::{Connection, Error as SqlError};
use sqlmodel_schema::{Migration, MigrationRunner, MigrationStatus};

/// SQL statements for creating the database schema
pub const CREATE_TABLES_SQL: &str = r"
-- Users (the platform user directory)
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

-- Courses
CREATE TABLE IF NOT EXISTS courses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL DEFAULT '',
    created_ts INTEGER NOT NULL
);

-- Groups within courses
CREATE TABLE IF NOT EXISTS course_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    name TEXT NOT NULL DEFAULT '',
    created_ts INTEGER NOT NULL,
    UNIQUE(course_id, group_id)
);

-- Course membership (tutor flag drives cross-course tutor visibility)
CREATE TABLE IF NOT EXISTS course_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    is_tutor INTEGER NOT NULL DEFAULT 0,
    UNIQUE(course_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_course_members_user ON course_members(user_id);
CREATE INDEX IF NOT EXISTS idx_course_members_course ON course_members(course_id);

-- Group membership
CREATE TABLE IF NOT EXISTS group_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    UNIQUE(course_id, group_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);
CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members(course_id, group_id);

-- Messages (reply tree as tree_id + parent_id + level + nested-set interval)
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER REFERENCES users(id),
    is_notification INTEGER NOT NULL DEFAULT 0,
    url TEXT NOT NULL DEFAULT '',
    subject TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL DEFAULT '',
    sent_ts INTEGER NOT NULL,
    target_all INTEGER NOT NULL DEFAULT 0,
    parent_id INTEGER REFERENCES messages(id),
    tree_id INTEGER NOT NULL,
    level INTEGER NOT NULL DEFAULT 0,
    lft INTEGER NOT NULL,
    rght INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_sent_ts ON messages(sent_ts);
CREATE INDEX IF NOT EXISTS idx_messages_target_all ON messages(target_all);
CREATE INDEX IF NOT EXISTS idx_messages_tree ON messages(tree_id, lft);
CREATE INDEX IF NOT EXISTS idx_messages_notification_tree ON messages(is_notification, tree_id);

-- Delivery records: one per (message, recipient), the only mutable per-user state
CREATE TABLE IF NOT EXISTS message_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    source INTEGER NOT NULL DEFAULT 0,
    read_ts INTEGER,
    deleted_ts INTEGER,
    UNIQUE(message_id, user_id)
);
CREATE INDEX IF NOT EXISTS idx_message_items_user ON message_items(user_id);
CREATE INDEX IF NOT EXISTS idx_message_items_read ON message_items(read_ts);
CREATE INDEX IF NOT EXISTS idx_message_items_deleted ON message_items(deleted_ts);

-- Target-audit rows: the original recipient specification at send time
CREATE TABLE IF NOT EXISTS message_target_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    user_id INTEGER NOT NULL REFERENCES users(id),
    UNIQUE(message_id, user_id)
);
CREATE TABLE IF NOT EXISTS message_target_courses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    course_id TEXT NOT NULL,
    UNIQUE(message_id, course_id)
);
CREATE TABLE IF NOT EXISTS message_target_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    course_id TEXT NOT NULL,
    group_id TEXT NOT NULL,
    UNIQUE(message_id, course_id, group_id)
);

-- Attachments: opaque blob references only
CREATE TABLE IF NOT EXISTS message_attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL REFERENCES messages(id),
    file_path TEXT NOT NULL
);
";

/// Per-connection PRAGMAs.
///
/// - WAL keeps readers unblocked during fan-out transactions
/// - `busy_timeout=60s` waits for locks instead of failing fast
pub const PRAGMA_SETTINGS_SQL: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 60000;
PRAGMA temp_store = MEMORY;
";

/// Initialize the database schema
#[must_use]
pub fn init_schema_sql() -> String {
    format!("{PRAGMA_SETTINGS_SQL}\n{CREATE_TABLES_SQL}")
}

/// Schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Name of the schema migration tracking table.
pub const MIGRATIONS_TABLE_NAME: &str = "campus_mail_migrations";

fn extract_ident_after_keyword(stmt: &str, keyword_lc: &str) -> Option<String> {
    let lower = stmt.to_ascii_lowercase();
    let idx = lower.find(keyword_lc)?;
    let after = stmt[idx + keyword_lc.len()..].trim_start();
    let end = after
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after.len());
    let ident = after[..end].trim();
    if ident.is_empty() {
        None
    } else {
        Some(ident.to_string())
    }
}

fn derive_migration_id_and_description(stmt: &str) -> Option<(String, String)> {
    const CREATE_TABLE: &str = "create table if not exists ";
    const CREATE_INDEX: &str = "create index if not exists ";

    if let Some(name) = extract_ident_after_keyword(stmt, CREATE_TABLE) {
        return Some((
            format!("v1_create_table_{name}"),
            format!("create table {name}"),
        ));
    }
    if let Some(name) = extract_ident_after_keyword(stmt, CREATE_INDEX) {
        return Some((
            format!("v1_create_index_{name}"),
            format!("create index {name}"),
        ));
    }

    None
}

/// Return the complete list of schema migrations.
///
/// Each `up` is a single `SQLite` statement so the runner can apply them
/// through connections that only execute one prepared statement at a time.
#[must_use]
pub fn schema_migrations() -> Vec<Migration> {
    let mut migrations: Vec<Migration> = Vec::new();

    for chunk in CREATE_TABLES_SQL.split(';') {
        let stmt = chunk.trim();
        if stmt.is_empty() {
            continue;
        }

        let Some((id, desc)) = derive_migration_id_and_description(stmt) else {
            continue;
        };

        migrations.push(Migration::new(id, desc, stmt.to_string(), String::new()));
    }

    migrations
}

#[must_use]
pub fn migration_runner() -> MigrationRunner {
    MigrationRunner::new(schema_migrations()).table_name(MIGRATIONS_TABLE_NAME)
}

pub async fn init_migrations_table<C: Connection>(cx: &Cx, conn: &C) -> Outcome<(), SqlError> {
    // Under concurrency multiple connections may record the same migration
    // id; `ON CONFLICT IGNORE` keeps that from failing startup.
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE_NAME} (
            id TEXT PRIMARY KEY ON CONFLICT IGNORE,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )"
    );
    conn.execute(cx, &sql, &[]).await.map(|_| ())
}

pub async fn migration_status<C: Connection>(
    cx: &Cx,
    conn: &C,
) -> Outcome<Vec<(String, MigrationStatus)>, SqlError> {
    match init_migrations_table(cx, conn).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    migration_runner().status(cx, conn).await
}

pub async fn migrate_to_latest<C: Connection>(cx: &Cx, conn: &C) -> Outcome<Vec<String>, SqlError> {
    match init_migrations_table(cx, conn).await {
        Outcome::Ok(()) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    migration_runner().migrate(cx, conn).await
}
