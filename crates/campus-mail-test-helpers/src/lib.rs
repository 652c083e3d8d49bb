//! Shared test helpers for the Campus Mail workspace
//!
//! Every integration test needs the same scaffolding: a file-backed
//! temporary `SQLite` database, a single-connection pool, a test `Cx`, and
//! a current-thread runtime to drive the async query layer. Seeding helpers
//! cover the directory fixtures (users, courses, groups) that messaging
//! scenarios are built on.

#![forbid(unsafe_code)]

use asupersync::Cx;
use asupersync::runtime::RuntimeBuilder;
use campus_mail_db::directory;
use campus_mail_db::{DbPool, DbPoolConfig, UserRow, create_pool};
use tempfile::TempDir;

/// Create a file-backed test pool. The `TempDir` must outlive the pool.
///
/// The pool is sized to a single connection so tests exercise the same
/// serialized-writer path production relies on.
#[must_use]
pub fn test_pool(name: &str) -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join(format!("{name}.db"));
    let config = DbPoolConfig {
        database_url: format!("sqlite:///{}", db_path.display()),
        min_connections: 1,
        max_connections: 1,
        run_migrations: true,
        ..Default::default()
    };
    let pool = create_pool(&config).expect("create pool");
    (dir, pool)
}

/// Drive an async test body on a current-thread runtime with a test `Cx`.
pub fn block_on<F, Fut, T>(f: F) -> T
where
    F: FnOnce(Cx) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let cx = Cx::for_testing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("build runtime");
    rt.block_on(f(cx))
}

/// Seed a user with a username/email derived from the first name.
pub async fn seed_user(cx: &Cx, pool: &DbPool, first_name: &str, last_name: &str) -> UserRow {
    let username = format!(
        "{}.{}",
        first_name.to_lowercase(),
        last_name.to_lowercase()
    );
    let email = format!("{username}@example.ac.uk");
    directory::create_user(cx, pool, &username, first_name, last_name, &email, false)
        .await
        .into_result()
        .expect("create user")
}

/// Seed an admin (privileged) user.
pub async fn seed_admin(cx: &Cx, pool: &DbPool, first_name: &str, last_name: &str) -> UserRow {
    let username = format!(
        "{}.{}.admin",
        first_name.to_lowercase(),
        last_name.to_lowercase()
    );
    let email = format!("{username}@example.ac.uk");
    directory::create_user(cx, pool, &username, first_name, last_name, &email, true)
        .await
        .into_result()
        .expect("create admin user")
}

/// Seed a course with members; tutor ids must be a subset of `member_ids`.
pub async fn seed_course(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    name: &str,
    member_ids: &[i64],
    tutor_ids: &[i64],
) {
    directory::ensure_course(cx, pool, course_id, name)
        .await
        .into_result()
        .expect("ensure course");
    for user_id in member_ids {
        directory::add_course_member(cx, pool, course_id, *user_id, tutor_ids.contains(user_id))
            .await
            .into_result()
            .expect("add course member");
    }
}

/// Seed a group within a course with members.
pub async fn seed_group(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
    name: &str,
    member_ids: &[i64],
) {
    directory::ensure_group(cx, pool, course_id, group_id, name)
        .await
        .into_result()
        .expect("ensure group");
    for user_id in member_ids {
        directory::add_group_member(cx, pool, course_id, group_id, *user_id)
            .await
            .into_result()
            .expect("add group member");
    }
}

/// Unwrap a `UserRow` id (seeded rows always have one).
#[must_use]
pub fn user_id(user: &UserRow) -> i64 {
    user.id.expect("seeded user id")
}
