//! Membership and user directory
//!
//! The course/group membership data and the user directory live in the same
//! relational store as the messages (inbox sorting joins users by sender).
//! This module is the query surface the resolvers and recipient search are
//! built on: course membership, tutor flags, group rosters, and
//! case-insensitive substring search over users/groups/courses.

use asupersync::Outcome;
use sqlmodel::prelude::*;
use sqlmodel_core::{Connection, Row as SqlRow, Value};
use sqlmodel_query::{raw_execute, raw_query};
use std::collections::HashMap;

use crate::error::DbError;
use crate::models::{CourseGroupRow, CourseMemberRow, CourseRow, GroupMemberRow, UserRow};
use crate::pool::DbPool;
use crate::queries::{
    MAX_IN_CLAUSE_ITEMS, acquire_conn, map_sql_error, map_sql_outcome, placeholders, row_first_i64,
};
use crate::timestamps::now_micros;

// =============================================================================
// Users
// =============================================================================

/// Create a user. Usernames are unique; a duplicate insert surfaces as a
/// `Sqlite` constraint error.
pub async fn create_user(
    cx: &Cx,
    pool: &DbPool,
    username: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
    is_admin: bool,
) -> Outcome<UserRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let created_ts = now_micros();
    let sql = "INSERT INTO users (username, first_name, last_name, email, is_admin, created_ts) \
               VALUES (?, ?, ?, ?, ?, ?)";
    let params = [
        Value::Text(username.to_string()),
        Value::Text(first_name.to_string()),
        Value::Text(last_name.to_string()),
        Value::Text(email.to_string()),
        Value::BigInt(i64::from(is_admin)),
        Value::BigInt(created_ts),
    ];

    match map_sql_outcome(conn.insert(cx, sql, &params).await) {
        Outcome::Ok(id) => Outcome::Ok(UserRow {
            id: Some(id),
            username: username.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_string(),
            is_admin: i64::from(is_admin),
            created_ts,
        }),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Get a user by id.
pub async fn get_user(cx: &Cx, pool: &DbPool, user_id: i64) -> Outcome<UserRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    match map_sql_outcome(
        select!(UserRow)
            .filter(Expr::col("id").eq(user_id))
            .first(cx, &*conn)
            .await,
    ) {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("User", user_id.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Get a user by username.
pub async fn get_user_by_username(
    cx: &Cx,
    pool: &DbPool,
    username: &str,
) -> Outcome<UserRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    match map_sql_outcome(
        select!(UserRow)
            .filter(Expr::col("username").eq(username))
            .first(cx, &*conn)
            .await,
    ) {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("User", username.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

fn decode_user_rows(rows: &[SqlRow]) -> Result<Vec<UserRow>, DbError> {
    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(UserRow::from_row(row).map_err(|e| map_sql_error(&e))?);
    }
    Ok(users)
}

const USER_SELECT_COLUMNS_SQL: &str =
    "SELECT id, username, first_name, last_name, email, is_admin, created_ts FROM users";

/// Fetch users by id, ascending. Unknown ids are simply absent from the
/// result; callers treat that as "dropped".
pub async fn users_by_ids(
    cx: &Cx,
    pool: &DbPool,
    user_ids: &[i64],
) -> Outcome<Vec<UserRow>, DbError> {
    if user_ids.is_empty() {
        return Outcome::Ok(vec![]);
    }

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let capped = &user_ids[..user_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
    let sql = format!(
        "{USER_SELECT_COLUMNS_SQL} WHERE id IN ({}) ORDER BY id",
        placeholders(capped.len())
    );
    let params: Vec<Value> = capped.iter().map(|id| Value::BigInt(*id)).collect();

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => match decode_user_rows(&rows) {
            Ok(users) => Outcome::Ok(users),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Email addresses for the given users (used by the thread mailer).
pub async fn user_emails(
    cx: &Cx,
    pool: &DbPool,
    user_ids: &[i64],
) -> Outcome<Vec<String>, DbError> {
    let users = match users_by_ids(cx, pool, user_ids).await {
        Outcome::Ok(users) => users,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };
    Outcome::Ok(
        users
            .into_iter()
            .map(|u| u.email)
            .filter(|e| !e.is_empty())
            .collect(),
    )
}

// =============================================================================
// Courses and groups
// =============================================================================

/// Create a course if absent; returns the stored row either way.
pub async fn ensure_course(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    name: &str,
) -> Outcome<CourseRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let insert = map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "INSERT OR IGNORE INTO courses (course_id, name, created_ts) VALUES (?, ?, ?)",
            &[
                Value::Text(course_id.to_string()),
                Value::Text(name.to_string()),
                Value::BigInt(now_micros()),
            ],
        )
        .await,
    );
    match insert {
        Outcome::Ok(_) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    drop(conn);

    match get_course(cx, pool, course_id).await {
        Outcome::Ok(Some(course)) => Outcome::Ok(course),
        Outcome::Ok(None) => Outcome::Err(DbError::Internal(format!(
            "course {course_id} missing after ensure"
        ))),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Create a group within a course if absent.
pub async fn ensure_group(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
    name: &str,
) -> Outcome<CourseGroupRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let insert = map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "INSERT OR IGNORE INTO course_groups (course_id, group_id, name, created_ts) \
             VALUES (?, ?, ?, ?)",
            &[
                Value::Text(course_id.to_string()),
                Value::Text(group_id.to_string()),
                Value::Text(name.to_string()),
                Value::BigInt(now_micros()),
            ],
        )
        .await,
    );
    match insert {
        Outcome::Ok(_) => {}
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }
    drop(conn);

    match get_group(cx, pool, course_id, group_id).await {
        Outcome::Ok(Some(group)) => Outcome::Ok(group),
        Outcome::Ok(None) => Outcome::Err(DbError::Internal(format!(
            "group {course_id}/{group_id} missing after ensure"
        ))),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Get a course by external id; `None` when it no longer exists.
pub async fn get_course(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
) -> Outcome<Option<CourseRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    map_sql_outcome(
        select!(CourseRow)
            .filter(Expr::col("course_id").eq(course_id))
            .first(cx, &*conn)
            .await,
    )
}

/// Get a group by `(course_id, group_id)`; `None` when it no longer exists.
pub async fn get_group(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
) -> Outcome<Option<CourseGroupRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    map_sql_outcome(
        select!(CourseGroupRow)
            .filter(Expr::col("course_id").eq(course_id))
            .filter(Expr::col("group_id").eq(group_id))
            .first(cx, &*conn)
            .await,
    )
}

/// Remove a course from the directory. Messages targeted at it keep their
/// audit rows; reply-info simply omits entries that no longer resolve.
pub async fn remove_course(cx: &Cx, pool: &DbPool, course_id: &str) -> Outcome<u64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "DELETE FROM courses WHERE course_id = ?",
            &[Value::Text(course_id.to_string())],
        )
        .await,
    )
}

/// Remove a group from the directory (the group analogue of
/// [`remove_course`]).
pub async fn remove_group(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
) -> Outcome<u64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "DELETE FROM course_groups WHERE course_id = ? AND group_id = ?",
            &[
                Value::Text(course_id.to_string()),
                Value::Text(group_id.to_string()),
            ],
        )
        .await,
    )
}

/// Map course ids to course names (for group display names in search).
pub async fn course_names(
    cx: &Cx,
    pool: &DbPool,
    course_ids: &[String],
) -> Outcome<HashMap<String, String>, DbError> {
    if course_ids.is_empty() {
        return Outcome::Ok(HashMap::new());
    }

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let capped = &course_ids[..course_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
    let sql = format!(
        "SELECT course_id, name FROM courses WHERE course_id IN ({})",
        placeholders(capped.len())
    );
    let params: Vec<Value> = capped.iter().map(|c| Value::Text(c.clone())).collect();

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut names = HashMap::with_capacity(rows.len());
            for row in &rows {
                let course_id: String = match row.get_named("course_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                let name: String = match row.get_named("name") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                names.insert(course_id, name);
            }
            Outcome::Ok(names)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Membership
// =============================================================================

/// Enrol a user in a course.
pub async fn add_course_member(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    user_id: i64,
    is_tutor: bool,
) -> Outcome<CourseMemberRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = "INSERT INTO course_members (course_id, user_id, is_tutor) VALUES (?, ?, ?)";
    let params = [
        Value::Text(course_id.to_string()),
        Value::BigInt(user_id),
        Value::BigInt(i64::from(is_tutor)),
    ];
    match map_sql_outcome(conn.insert(cx, sql, &params).await) {
        Outcome::Ok(id) => Outcome::Ok(CourseMemberRow {
            id: Some(id),
            course_id: course_id.to_string(),
            user_id,
            is_tutor: i64::from(is_tutor),
        }),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Enrol a user in a group within a course.
pub async fn add_group_member(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
    user_id: i64,
) -> Outcome<GroupMemberRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = "INSERT INTO group_members (course_id, group_id, user_id) VALUES (?, ?, ?)";
    let params = [
        Value::Text(course_id.to_string()),
        Value::Text(group_id.to_string()),
        Value::BigInt(user_id),
    ];
    match map_sql_outcome(conn.insert(cx, sql, &params).await) {
        Outcome::Ok(id) => Outcome::Ok(GroupMemberRow {
            id: Some(id),
            course_id: course_id.to_string(),
            group_id: group_id.to_string(),
            user_id,
        }),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

async fn query_i64_column(
    cx: &Cx,
    pool: &DbPool,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<i64>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let out = map_sql_outcome(raw_query(cx, &*conn, sql, params).await);
    match out {
        Outcome::Ok(rows) => Outcome::Ok(rows.iter().filter_map(row_first_i64).collect()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

async fn query_text_column(
    cx: &Cx,
    pool: &DbPool,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<String>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let out = map_sql_outcome(raw_query(cx, &*conn, sql, params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut values = Vec::with_capacity(rows.len());
            for row in &rows {
                if let Some(Value::Text(s)) = row.get(0) {
                    values.push(s.clone());
                }
            }
            Outcome::Ok(values)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Course ids the user is a member of.
pub async fn courses_of(cx: &Cx, pool: &DbPool, user_id: i64) -> Outcome<Vec<String>, DbError> {
    query_text_column(
        cx,
        pool,
        "SELECT course_id FROM course_members WHERE user_id = ? ORDER BY course_id",
        &[Value::BigInt(user_id)],
    )
    .await
}

/// `(course_id, group_id)` pairs the user is a member of.
pub async fn group_memberships_of(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
) -> Outcome<Vec<(String, String)>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let out = map_sql_outcome(
        raw_query(
            cx,
            &*conn,
            "SELECT course_id, group_id FROM group_members \
             WHERE user_id = ? ORDER BY course_id, group_id",
            &[Value::BigInt(user_id)],
        )
        .await,
    );
    match out {
        Outcome::Ok(rows) => {
            let mut pairs = Vec::with_capacity(rows.len());
            for row in &rows {
                let course: String = match row.get_named("course_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                let group: String = match row.get_named("group_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                pairs.push((course, group));
            }
            Outcome::Ok(pairs)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Members of one course.
pub async fn members_of_course(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
) -> Outcome<Vec<i64>, DbError> {
    query_i64_column(
        cx,
        pool,
        "SELECT user_id FROM course_members WHERE course_id = ? ORDER BY user_id",
        &[Value::Text(course_id.to_string())],
    )
    .await
}

/// Members of one group within one course.
pub async fn members_of_group(
    cx: &Cx,
    pool: &DbPool,
    course_id: &str,
    group_id: &str,
) -> Outcome<Vec<i64>, DbError> {
    query_i64_column(
        cx,
        pool,
        "SELECT user_id FROM group_members \
         WHERE course_id = ? AND group_id = ? ORDER BY user_id",
        &[
            Value::Text(course_id.to_string()),
            Value::Text(group_id.to_string()),
        ],
    )
    .await
}

/// Whether the user tutors at least one course.
pub async fn is_tutor_in_any_course(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
) -> Outcome<bool, DbError> {
    let ids = query_i64_column(
        cx,
        pool,
        "SELECT 1 FROM course_members WHERE user_id = ? AND is_tutor = 1 LIMIT 1",
        &[Value::BigInt(user_id)],
    )
    .await;
    match ids {
        Outcome::Ok(rows) => Outcome::Ok(!rows.is_empty()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// All users who tutor at least one course, excluding the given user.
pub async fn tutor_user_ids(
    cx: &Cx,
    pool: &DbPool,
    exclude_user_id: i64,
) -> Outcome<Vec<i64>, DbError> {
    query_i64_column(
        cx,
        pool,
        "SELECT DISTINCT cm.user_id FROM course_members cm \
         WHERE cm.user_id != ? AND cm.is_tutor = 1 ORDER BY 1",
        &[Value::BigInt(exclude_user_id)],
    )
    .await
}

/// Users sharing at least one course with the given user, excluding the
/// user themselves. The user's groups do not matter.
pub async fn course_co_member_ids(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
) -> Outcome<Vec<i64>, DbError> {
    query_i64_column(
        cx,
        pool,
        "SELECT DISTINCT cm1.user_id \
         FROM course_members cm1 \
         JOIN course_members cm2 \
           ON cm2.course_id = cm1.course_id AND cm2.user_id = ? \
         WHERE cm1.user_id != ? \
         ORDER BY 1",
        &[Value::BigInt(user_id), Value::BigInt(user_id)],
    )
    .await
}

// =============================================================================
// Text search
// =============================================================================

/// Escape `%`, `_` and the escape character itself, then wrap in wildcards.
/// `SQLite` `LIKE` is ASCII case-insensitive by default, matching the
/// original's `icontains` behavior for the directory's data.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("%{escaped}%")
}

/// Substring search over users by first name, last name, username and email.
///
/// `visible`: `None` bypasses visibility (admin); `Some(ids)` restricts to
/// those ids (callers short-circuit on an empty visible set). `exclude` is
/// always applied.
pub async fn search_users(
    cx: &Cx,
    pool: &DbPool,
    query: &str,
    visible: Option<&[i64]>,
    exclude: &[i64],
) -> Outcome<Vec<UserRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let pattern = like_pattern(query);
    let mut sql = format!(
        "{USER_SELECT_COLUMNS_SQL} \
         WHERE (first_name LIKE ? ESCAPE '\\' OR last_name LIKE ? ESCAPE '\\' \
                OR username LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\')"
    );
    let mut params: Vec<Value> = vec![
        Value::Text(pattern.clone()),
        Value::Text(pattern.clone()),
        Value::Text(pattern.clone()),
        Value::Text(pattern),
    ];

    if let Some(visible_ids) = visible {
        let capped = &visible_ids[..visible_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
        sql.push_str(&format!(" AND id IN ({})", placeholders(capped.len())));
        for id in capped {
            params.push(Value::BigInt(*id));
        }
    }
    if !exclude.is_empty() {
        let capped = &exclude[..exclude.len().min(MAX_IN_CLAUSE_ITEMS)];
        sql.push_str(&format!(" AND id NOT IN ({})", placeholders(capped.len())));
        for id in capped {
            params.push(Value::BigInt(*id));
        }
    }
    sql.push_str(" ORDER BY id");

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => match decode_user_rows(&rows) {
            Ok(users) => Outcome::Ok(users),
            Err(e) => Outcome::Err(e),
        },
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Append a `(course_id, group_id) IN (...)`-style pair condition.
fn push_pair_condition(
    sql: &mut String,
    params: &mut Vec<Value>,
    pairs: &[(String, String)],
    negate: bool,
) {
    let capped = &pairs[..pairs.len().min(MAX_IN_CLAUSE_ITEMS)];
    let condition = capped
        .iter()
        .map(|_| "(course_id = ? AND group_id = ?)")
        .collect::<Vec<_>>()
        .join(" OR ");
    if negate {
        sql.push_str(&format!(" AND NOT ({condition})"));
    } else {
        sql.push_str(&format!(" AND ({condition})"));
    }
    for (course, group) in capped {
        params.push(Value::Text(course.clone()));
        params.push(Value::Text(group.clone()));
    }
}

/// Substring search over groups by course id, group id and name.
pub async fn search_groups(
    cx: &Cx,
    pool: &DbPool,
    query: &str,
    visible: Option<&[(String, String)]>,
    exclude: &[(String, String)],
) -> Outcome<Vec<CourseGroupRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let pattern = like_pattern(query);
    let mut sql = String::from(
        "SELECT id, course_id, group_id, name, created_ts FROM course_groups \
         WHERE (course_id LIKE ? ESCAPE '\\' OR group_id LIKE ? ESCAPE '\\' \
                OR name LIKE ? ESCAPE '\\')",
    );
    let mut params: Vec<Value> = vec![
        Value::Text(pattern.clone()),
        Value::Text(pattern.clone()),
        Value::Text(pattern),
    ];

    if let Some(visible_pairs) = visible {
        push_pair_condition(&mut sql, &mut params, visible_pairs, false);
    }
    if !exclude.is_empty() {
        push_pair_condition(&mut sql, &mut params, exclude, true);
    }
    sql.push_str(" ORDER BY course_id, group_id");

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut groups = Vec::with_capacity(rows.len());
            for row in &rows {
                match CourseGroupRow::from_row(row) {
                    Ok(g) => groups.push(g),
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                }
            }
            Outcome::Ok(groups)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Substring search over courses by course id and name.
pub async fn search_courses(
    cx: &Cx,
    pool: &DbPool,
    query: &str,
    visible: Option<&[String]>,
    exclude: &[String],
) -> Outcome<Vec<CourseRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let pattern = like_pattern(query);
    let mut sql = String::from(
        "SELECT id, course_id, name, created_ts FROM courses \
         WHERE (course_id LIKE ? ESCAPE '\\' OR name LIKE ? ESCAPE '\\')",
    );
    let mut params: Vec<Value> = vec![Value::Text(pattern.clone()), Value::Text(pattern)];

    if let Some(visible_ids) = visible {
        let capped = &visible_ids[..visible_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
        sql.push_str(&format!(
            " AND course_id IN ({})",
            placeholders(capped.len())
        ));
        for id in capped {
            params.push(Value::Text(id.clone()));
        }
    }
    if !exclude.is_empty() {
        let capped = &exclude[..exclude.len().min(MAX_IN_CLAUSE_ITEMS)];
        sql.push_str(&format!(
            " AND course_id NOT IN ({})",
            placeholders(capped.len())
        ));
        for id in capped {
            params.push(Value::Text(id.clone()));
        }
    }
    sql.push_str(" ORDER BY course_id");

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut courses = Vec::with_capacity(rows.len());
            for row in &rows {
                match CourseRow::from_row(row) {
                    Ok(c) => courses.push(c),
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                }
            }
            Outcome::Ok(courses)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("a%b"), "%a\\%b%");
        assert_eq!(like_pattern("a_b"), "%a\\_b%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
        assert_eq!(like_pattern(""), "%%");
    }

    #[test]
    fn pair_condition_builds_or_chain() {
        let mut sql = String::new();
        let mut params = Vec::new();
        let pairs = vec![
            ("c1".to_string(), "g1".to_string()),
            ("c2".to_string(), "g2".to_string()),
        ];
        push_pair_condition(&mut sql, &mut params, &pairs, false);
        assert_eq!(
            sql,
            " AND ((course_id = ? AND group_id = ?) OR (course_id = ? AND group_id = ?))"
        );
        assert_eq!(params.len(), 4);

        let mut negated = String::new();
        let mut negated_params = Vec::new();
        push_pair_condition(&mut negated, &mut negated_params, &pairs[..1], true);
        assert_eq!(negated, " AND NOT ((course_id = ? AND group_id = ?))");
    }
}
