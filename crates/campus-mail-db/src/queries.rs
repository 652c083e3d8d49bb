//! Messaging query operations
//!
//! CRUD and aggregation for messages, delivery items, and target-audit rows.
//! These functions are the "DB truth" for the rest of the application:
//! service operations rely on these helpers rather than embedding raw SQL.
//!
//! Tree invariants (`tree_id`/`level`/`lft`/`rght`) are maintained here and
//! only here: a parentless insert opens a fresh tree, a reply is spliced in
//! as its parent's last child with the standard nested-set interval shift.

#![allow(clippy::missing_const_for_fn)]

use std::collections::HashMap;

use asupersync::Outcome;
use sqlmodel::prelude::*;
use sqlmodel_core::{Connection, Error as SqlError, Row as SqlRow, Value};
use sqlmodel_query::{raw_execute, raw_query};

use crate::error::DbError;
use crate::models::{MessageItemRow, MessageRow};
use crate::pool::DbPool;
use crate::timestamps::now_micros;

// =============================================================================
// Shared helpers
// =============================================================================

pub(crate) fn map_sql_error(e: &SqlError) -> DbError {
    DbError::Sqlite(e.to_string())
}

pub(crate) fn map_sql_outcome<T>(out: Outcome<T, SqlError>) -> Outcome<T, DbError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(map_sql_error(&e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::BigInt(n) => Some(*n),
        Value::Int(n) => Some(i64::from(*n)),
        Value::SmallInt(n) => Some(i64::from(*n)),
        Value::TinyInt(n) => Some(i64::from(*n)),
        _ => None,
    }
}

pub(crate) fn row_first_i64(row: &SqlRow) -> Option<i64> {
    row.get(0).and_then(value_as_i64)
}

/// `SQLite` caps bound variables (999 by default); IN-clause item counts are
/// capped well below that so untrusted input cannot blow up SQL strings.
pub(crate) const MAX_IN_CLAUSE_ITEMS: usize = 500;

pub(crate) fn placeholders(count: usize) -> String {
    let capped = count.min(MAX_IN_CLAUSE_ITEMS);
    std::iter::repeat_n("?", capped)
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) async fn acquire_conn(
    cx: &Cx,
    pool: &DbPool,
) -> Outcome<sqlmodel_pool::PooledConnection<crate::DbConn>, DbError> {
    map_sql_outcome(pool.acquire(cx).await)
}

// =============================================================================
// Transaction helpers
// =============================================================================

async fn begin_immediate_tx(cx: &Cx, conn: &crate::DbConn) -> Outcome<(), DbError> {
    map_sql_outcome(conn.execute(cx, "BEGIN IMMEDIATE", &[]).await).map(|_| ())
}

async fn commit_tx(cx: &Cx, conn: &crate::DbConn) -> Outcome<(), DbError> {
    map_sql_outcome(conn.execute(cx, "COMMIT", &[]).await).map(|_| ())
}

/// Rollback the current transaction (best-effort, errors ignored).
async fn rollback_tx(cx: &Cx, conn: &crate::DbConn) {
    let _ = conn.execute(cx, "ROLLBACK", &[]).await;
}

/// Unwrap an `Outcome` inside a transaction: on non-`Ok`, rollback and
/// return early.
macro_rules! try_in_tx {
    ($cx:expr, $conn:expr, $out:expr) => {
        match $out {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Err(e);
            }
            Outcome::Cancelled(r) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Cancelled(r);
            }
            Outcome::Panicked(p) => {
                rollback_tx($cx, $conn).await;
                return Outcome::Panicked(p);
            }
        }
    };
}

// =============================================================================
// Sort parameters
// =============================================================================

/// Inbox sort field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InboxSortField {
    #[default]
    Date,
    Sender,
}

impl InboxSortField {
    /// Parse the boundary string form; unknown values fall back to date.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "sender" => Self::Sender,
            _ => Self::Date,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "asc" => Self::Asc,
            _ => Self::Desc,
        }
    }
}

/// ORDER BY clause for an inbox listing. Sender ordering is by first then
/// last name, the platform's display-name collation.
fn inbox_order_by(field: InboxSortField, dir: SortDirection) -> &'static str {
    match (field, dir) {
        (InboxSortField::Date, SortDirection::Asc) => "m.sent_ts",
        (InboxSortField::Date, SortDirection::Desc) => "m.sent_ts DESC",
        (InboxSortField::Sender, SortDirection::Asc) => "u.first_name, u.last_name",
        (InboxSortField::Sender, SortDirection::Desc) => "u.first_name DESC, u.last_name DESC",
    }
}

// =============================================================================
// Message creation
// =============================================================================

/// Parameters for a message insert.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub sender_id: Option<i64>,
    pub is_notification: bool,
    pub url: String,
    pub subject: String,
    pub body: String,
    pub target_all: bool,
    pub parent_id: Option<i64>,
}

/// The original recipient specification, recorded one row per specifier.
#[derive(Debug, Clone, Default)]
pub struct TargetAudit {
    pub users: Vec<i64>,
    /// `(course_id, group_id)` pairs.
    pub groups: Vec<(String, String)>,
    pub courses: Vec<String>,
}

impl TargetAudit {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            users: Vec::new(),
            groups: Vec::new(),
            courses: Vec::new(),
        }
    }
}

/// Insert the message row inside an open transaction, computing the tree
/// fields. Returns the fully populated row.
async fn insert_message_in_tx(
    cx: &Cx,
    conn: &crate::DbConn,
    new: &NewMessage,
) -> Outcome<MessageRow, DbError> {
    let sent_ts = now_micros();

    let (tree_id, level, lft, rght) = if let Some(parent_id) = new.parent_id {
        // Reply: same tree as the parent, one level down, spliced in as the
        // parent's last child.
        let parent_out = map_sql_outcome(
            raw_query(
                cx,
                conn,
                "SELECT tree_id, level, rght FROM messages WHERE id = ?",
                &[Value::BigInt(parent_id)],
            )
            .await,
        );
        let parent_rows = match parent_out {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let Some(parent) = parent_rows.first() else {
            return Outcome::Err(DbError::not_found("Message", parent_id.to_string()));
        };
        let parent_tree: i64 = match parent.get_named("tree_id") {
            Ok(v) => v,
            Err(e) => return Outcome::Err(map_sql_error(&e)),
        };
        let parent_level: i64 = match parent.get_named("level") {
            Ok(v) => v,
            Err(e) => return Outcome::Err(map_sql_error(&e)),
        };
        let parent_rght: i64 = match parent.get_named("rght") {
            Ok(v) => v,
            Err(e) => return Outcome::Err(map_sql_error(&e)),
        };

        // Standard nested-set insertion: open a two-wide gap at the
        // parent's right edge.
        let shift = map_sql_outcome(
            raw_execute(
                cx,
                conn,
                "UPDATE messages SET rght = rght + 2 WHERE tree_id = ? AND rght >= ?",
                &[Value::BigInt(parent_tree), Value::BigInt(parent_rght)],
            )
            .await,
        );
        match shift {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
        let shift = map_sql_outcome(
            raw_execute(
                cx,
                conn,
                "UPDATE messages SET lft = lft + 2 WHERE tree_id = ? AND lft >= ?",
                &[Value::BigInt(parent_tree), Value::BigInt(parent_rght)],
            )
            .await,
        );
        match shift {
            Outcome::Ok(_) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        (parent_tree, parent_level + 1, parent_rght, parent_rght + 1)
    } else {
        // Fresh tree. `BEGIN IMMEDIATE` serializes writers, so the
        // read-increment cannot race.
        let next_out = map_sql_outcome(
            raw_query(
                cx,
                conn,
                "SELECT COALESCE(MAX(tree_id), 0) + 1 FROM messages",
                &[],
            )
            .await,
        );
        let next_tree = match next_out {
            Outcome::Ok(rows) => rows.first().and_then(row_first_i64).unwrap_or(1),
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        (next_tree, 0, 1, 2)
    };

    let sql = "INSERT INTO messages \
               (sender_id, is_notification, url, subject, body, sent_ts, target_all, \
                parent_id, tree_id, level, lft, rght) \
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";
    let params = [
        new.sender_id.map_or(Value::Null, Value::BigInt),
        Value::BigInt(i64::from(new.is_notification)),
        Value::Text(new.url.clone()),
        Value::Text(new.subject.clone()),
        Value::Text(new.body.clone()),
        Value::BigInt(sent_ts),
        Value::BigInt(i64::from(new.target_all)),
        new.parent_id.map_or(Value::Null, Value::BigInt),
        Value::BigInt(tree_id),
        Value::BigInt(level),
        Value::BigInt(lft),
        Value::BigInt(rght),
    ];

    let id = match map_sql_outcome(conn.insert(cx, sql, &params).await) {
        Outcome::Ok(id) => id,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    Outcome::Ok(MessageRow {
        id: Some(id),
        sender_id: new.sender_id,
        is_notification: i64::from(new.is_notification),
        url: new.url.clone(),
        subject: new.subject.clone(),
        body: new.body.clone(),
        sent_ts,
        target_all: i64::from(new.target_all),
        parent_id: new.parent_id,
        tree_id,
        level,
        lft,
        rght,
    })
}

async fn insert_item_in_tx(
    cx: &Cx,
    conn: &crate::DbConn,
    message_id: i64,
    user_id: i64,
    source: bool,
    read_ts: Option<i64>,
) -> Outcome<(), DbError> {
    let sql = "INSERT INTO message_items (message_id, user_id, source, read_ts, deleted_ts) \
               VALUES (?, ?, ?, ?, NULL)";
    let params = [
        Value::BigInt(message_id),
        Value::BigInt(user_id),
        Value::BigInt(i64::from(source)),
        read_ts.map_or(Value::Null, Value::BigInt),
    ];
    map_sql_outcome(raw_execute(cx, conn, sql, &params).await).map(|_| ())
}

/// Create a message AND its delivery items AND its target-audit rows in a
/// single transaction: readers never observe a partially fanned-out send.
///
/// `recipient_ids` must already be resolved and deduplicated (membership
/// expansion happens in the service layer). A `source` item pre-marked read
/// is added for the sender when the sender is not among the recipients.
pub async fn create_message(
    cx: &Cx,
    pool: &DbPool,
    new: &NewMessage,
    recipient_ids: &[i64],
    targets: &TargetAudit,
) -> Outcome<MessageRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    try_in_tx!(cx, &conn, begin_immediate_tx(cx, &conn).await);

    let message = try_in_tx!(cx, &conn, insert_message_in_tx(cx, &conn, new).await);
    let message_id = message.id.unwrap_or_default();

    // TODO insert one message_attachments row per uploaded file once the
    // upload path passes references through the send request.

    for user_id in recipient_ids {
        try_in_tx!(
            cx,
            &conn,
            insert_item_in_tx(cx, &conn, message_id, *user_id, false, None).await
        );
    }

    // The sender's own copy, auto-read, unless the sender was targeted.
    if let Some(sender_id) = new.sender_id {
        if !recipient_ids.contains(&sender_id) {
            try_in_tx!(
                cx,
                &conn,
                insert_item_in_tx(cx, &conn, message_id, sender_id, true, Some(now_micros())).await
            );
        }
    }

    for user_id in &targets.users {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(
                raw_execute(
                    cx,
                    &*conn,
                    "INSERT INTO message_target_users (message_id, user_id) VALUES (?, ?)",
                    &[Value::BigInt(message_id), Value::BigInt(*user_id)],
                )
                .await
            )
        );
    }
    for course_id in &targets.courses {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(
                raw_execute(
                    cx,
                    &*conn,
                    "INSERT INTO message_target_courses (message_id, course_id) VALUES (?, ?)",
                    &[Value::BigInt(message_id), Value::Text(course_id.clone())],
                )
                .await
            )
        );
    }
    for (course_id, group_id) in &targets.groups {
        try_in_tx!(
            cx,
            &conn,
            map_sql_outcome(
                raw_execute(
                    cx,
                    &*conn,
                    "INSERT INTO message_target_groups (message_id, course_id, group_id) \
                     VALUES (?, ?, ?)",
                    &[
                        Value::BigInt(message_id),
                        Value::Text(course_id.clone()),
                        Value::Text(group_id.clone()),
                    ],
                )
                .await
            )
        );
    }

    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);

    Outcome::Ok(message)
}

/// Create a broadcast message: one delivery item per non-admin user, no
/// target-audit rows. Privilege checking is the caller's responsibility.
pub async fn create_broadcast(
    cx: &Cx,
    pool: &DbPool,
    sender_id: i64,
    subject: &str,
    body: &str,
    parent_id: Option<i64>,
) -> Outcome<MessageRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let new = NewMessage {
        sender_id: Some(sender_id),
        subject: subject.to_string(),
        body: body.to_string(),
        target_all: true,
        parent_id,
        ..Default::default()
    };

    try_in_tx!(cx, &conn, begin_immediate_tx(cx, &conn).await);

    let message = try_in_tx!(cx, &conn, insert_message_in_tx(cx, &conn, &new).await);
    let message_id = message.id.unwrap_or_default();

    try_in_tx!(
        cx,
        &conn,
        map_sql_outcome(
            raw_execute(
                cx,
                &*conn,
                "INSERT INTO message_items (message_id, user_id, source, read_ts, deleted_ts) \
                 SELECT ?, id, 0, NULL, NULL FROM users WHERE is_admin = 0",
                &[Value::BigInt(message_id)],
            )
            .await
        )
    );

    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);

    Outcome::Ok(message)
}

/// Create a notification: no sender, one delivery item per given user id.
/// `user_ids` must already be deduplicated; unknown usernames are resolved
/// (and skipped) upstream.
pub async fn create_notification(
    cx: &Cx,
    pool: &DbPool,
    user_ids: &[i64],
    url: &str,
    subject: &str,
    body: &str,
) -> Outcome<MessageRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let new = NewMessage {
        sender_id: None,
        is_notification: true,
        url: url.to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        ..Default::default()
    };

    try_in_tx!(cx, &conn, begin_immediate_tx(cx, &conn).await);

    let message = try_in_tx!(cx, &conn, insert_message_in_tx(cx, &conn, &new).await);
    let message_id = message.id.unwrap_or_default();

    for user_id in user_ids {
        try_in_tx!(
            cx,
            &conn,
            insert_item_in_tx(cx, &conn, message_id, *user_id, false, None).await
        );
    }

    try_in_tx!(cx, &conn, commit_tx(cx, &conn).await);

    Outcome::Ok(message)
}

/// Backdate (or forward-date) a message's sent timestamp.
///
/// Preserved quirk: display order follows `sent_ts`, so this reorders inbox
/// and thread listings without touching the tree structure.
pub async fn update_message_sent(
    cx: &Cx,
    pool: &DbPool,
    message_id: i64,
    sent_ts: i64,
) -> Outcome<(), DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let out = map_sql_outcome(
        raw_execute(
            cx,
            &*conn,
            "UPDATE messages SET sent_ts = ? WHERE id = ?",
            &[Value::BigInt(sent_ts), Value::BigInt(message_id)],
        )
        .await,
    );
    match out {
        Outcome::Ok(0) => Outcome::Err(DbError::not_found("Message", message_id.to_string())),
        Outcome::Ok(_) => Outcome::Ok(()),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Get a message by id.
pub async fn get_message(cx: &Cx, pool: &DbPool, message_id: i64) -> Outcome<MessageRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    match map_sql_outcome(
        select!(MessageRow)
            .filter(Expr::col("id").eq(message_id))
            .first(cx, &*conn)
            .await,
    ) {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("Message", message_id.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Get a delivery item by id.
pub async fn get_item(cx: &Cx, pool: &DbPool, item_id: i64) -> Outcome<MessageItemRow, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    match map_sql_outcome(
        select!(MessageItemRow)
            .filter(Expr::col("id").eq(item_id))
            .first(cx, &*conn)
            .await,
    ) {
        Outcome::Ok(Some(row)) => Outcome::Ok(row),
        Outcome::Ok(None) => Outcome::Err(DbError::not_found("MessageItem", item_id.to_string())),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// All delivery items for one message (test and audit surface).
pub async fn items_for_message(
    cx: &Cx,
    pool: &DbPool,
    message_id: i64,
) -> Outcome<Vec<MessageItemRow>, DbError> {
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
            "SELECT id, message_id, user_id, source, read_ts, deleted_ts \
             FROM message_items WHERE message_id = ? ORDER BY user_id",
            &[Value::BigInt(message_id)],
        )
        .await,
    );
    match out {
        Outcome::Ok(rows) => {
            let mut items = Vec::with_capacity(rows.len());
            for row in &rows {
                match MessageItemRow::from_row(row) {
                    Ok(item) => items.push(item),
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                }
            }
            Outcome::Ok(items)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Thread reconstruction
// =============================================================================

/// One row of a reconstructed thread: the owning user's delivery item plus
/// the message content and sender names.
#[derive(Debug, Clone)]
pub struct ThreadItemRow {
    pub item_id: i64,
    pub message_id: i64,
    pub tree_id: i64,
    pub subject: String,
    pub body: String,
    pub sent_ts: i64,
    pub source: i64,
    pub read_ts: Option<i64>,
    pub sender_id: i64,
    pub sender_first_name: String,
    pub sender_last_name: String,
}

fn decode_thread_item(row: &SqlRow) -> Result<ThreadItemRow, DbError> {
    Ok(ThreadItemRow {
        item_id: row.get_named("item_id").map_err(|e| map_sql_error(&e))?,
        message_id: row.get_named("message_id").map_err(|e| map_sql_error(&e))?,
        tree_id: row.get_named("tree_id").map_err(|e| map_sql_error(&e))?,
        subject: row.get_named("subject").map_err(|e| map_sql_error(&e))?,
        body: row.get_named("body").map_err(|e| map_sql_error(&e))?,
        sent_ts: row.get_named("sent_ts").map_err(|e| map_sql_error(&e))?,
        source: row.get_named("source").map_err(|e| map_sql_error(&e))?,
        read_ts: row.get_named("read_ts").map_err(|e| map_sql_error(&e))?,
        sender_id: row.get_named("sender_id").map_err(|e| map_sql_error(&e))?,
        sender_first_name: row
            .get_named("sender_first_name")
            .map_err(|e| map_sql_error(&e))?,
        sender_last_name: row
            .get_named("sender_last_name")
            .map_err(|e| map_sql_error(&e))?,
    })
}

/// Reconstruct the thread containing `item_id` from its owner's perspective:
/// every undeleted item of the same user across the item's message tree,
/// newest-first. Soft-deleted items vanish from the result and the count;
/// other users' views are unaffected.
pub async fn thread_items(
    cx: &Cx,
    pool: &DbPool,
    item_id: i64,
) -> Outcome<Vec<ThreadItemRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    // mi1 anchors the requested item; mi2 walks the same user's items
    // across every message of the same tree.
    let sql = "SELECT mi2.id AS item_id, mi2.message_id AS message_id, m2.tree_id AS tree_id, \
                      m2.subject AS subject, m2.body AS body, m2.sent_ts AS sent_ts, \
                      mi2.source AS source, mi2.read_ts AS read_ts, \
                      m2.sender_id AS sender_id, \
                      u.first_name AS sender_first_name, u.last_name AS sender_last_name \
               FROM message_items mi1 \
               JOIN messages m1 ON m1.id = mi1.message_id AND m1.is_notification = 0 \
               JOIN messages m2 ON m2.tree_id = m1.tree_id AND m2.is_notification = 0 \
               JOIN message_items mi2 ON mi2.message_id = m2.id \
                    AND mi2.user_id = mi1.user_id \
                    AND mi2.deleted_ts IS NULL \
               JOIN users u ON u.id = m2.sender_id \
               WHERE mi1.id = ? \
               ORDER BY m2.sent_ts DESC";

    let out = map_sql_outcome(raw_query(cx, &*conn, sql, &[Value::BigInt(item_id)]).await);
    match out {
        Outcome::Ok(rows) => {
            let mut items = Vec::with_capacity(rows.len());
            for row in &rows {
                match decode_thread_item(row) {
                    Ok(item) => items.push(item),
                    Err(e) => return Outcome::Err(e),
                }
            }
            Outcome::Ok(items)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Ancestors of a message (nearest-first, including the message itself),
/// resolved through the nested-set intervals, so no recursion at read time.
pub async fn thread_ancestors(
    cx: &Cx,
    pool: &DbPool,
    message_id: i64,
) -> Outcome<Vec<MessageRow>, DbError> {
    let message = match get_message(cx, pool, message_id).await {
        Outcome::Ok(m) => m,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = "SELECT id, sender_id, is_notification, url, subject, body, sent_ts, \
                      target_all, parent_id, tree_id, level, lft, rght \
               FROM messages \
               WHERE tree_id = ? AND lft <= ? AND rght >= ? \
               ORDER BY level DESC";
    let params = [
        Value::BigInt(message.tree_id),
        Value::BigInt(message.lft),
        Value::BigInt(message.rght),
    ];

    let out = map_sql_outcome(raw_query(cx, &*conn, sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut messages = Vec::with_capacity(rows.len());
            for row in &rows {
                match MessageRow::from_row(row) {
                    Ok(m) => messages.push(m),
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                }
            }
            Outcome::Ok(messages)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Read / soft-delete marking
// =============================================================================

/// Mark the given items read. Idempotent and order-independent: `COALESCE`
/// keeps already-set timestamps untouched.
pub async fn mark_items_read(cx: &Cx, pool: &DbPool, item_ids: &[i64]) -> Outcome<u64, DbError> {
    mark_items_column(cx, pool, item_ids, "read_ts").await
}

/// Mark the given items soft-deleted (the deleted analogue of
/// [`mark_items_read`]). Rows are never hard-deleted.
pub async fn mark_items_deleted(cx: &Cx, pool: &DbPool, item_ids: &[i64]) -> Outcome<u64, DbError> {
    mark_items_column(cx, pool, item_ids, "deleted_ts").await
}

async fn mark_items_column(
    cx: &Cx,
    pool: &DbPool,
    item_ids: &[i64],
    column: &str,
) -> Outcome<u64, DbError> {
    if item_ids.is_empty() {
        return Outcome::Ok(0);
    }

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let now = now_micros();
    let capped = &item_ids[..item_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
    let sql = format!(
        "UPDATE message_items SET {column} = COALESCE({column}, ?) WHERE id IN ({})",
        placeholders(capped.len())
    );
    let mut params: Vec<Value> = Vec::with_capacity(capped.len() + 1);
    params.push(Value::BigInt(now));
    for id in capped {
        params.push(Value::BigInt(*id));
    }

    map_sql_outcome(raw_execute(cx, &*conn, &sql, &params).await)
}

/// Soft-delete all of one user's undeleted items across a message tree.
pub async fn mark_thread_deleted(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    tree_id: i64,
) -> Outcome<u64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = "UPDATE message_items SET deleted_ts = COALESCE(deleted_ts, ?) \
               WHERE user_id = ? AND message_id IN \
                     (SELECT id FROM messages WHERE tree_id = ? AND is_notification = 0)";
    let params = [
        Value::BigInt(now_micros()),
        Value::BigInt(user_id),
        Value::BigInt(tree_id),
    ];

    map_sql_outcome(raw_execute(cx, &*conn, sql, &params).await)
}

// =============================================================================
// Inbox aggregation
// =============================================================================

/// One inbox row: the user's delivery item on a tree's representative
/// message, plus the sender's name for display and sorting.
#[derive(Debug, Clone)]
pub struct InboxRow {
    pub item_id: i64,
    pub message_id: i64,
    pub tree_id: i64,
    pub subject: String,
    pub sent_ts: i64,
    pub source: i64,
    pub read_ts: Option<i64>,
    pub sender_id: i64,
    pub sender_first_name: String,
    pub sender_last_name: String,
}

fn decode_inbox_row(row: &SqlRow) -> Result<InboxRow, DbError> {
    Ok(InboxRow {
        item_id: row.get_named("item_id").map_err(|e| map_sql_error(&e))?,
        message_id: row.get_named("message_id").map_err(|e| map_sql_error(&e))?,
        tree_id: row.get_named("tree_id").map_err(|e| map_sql_error(&e))?,
        subject: row.get_named("subject").map_err(|e| map_sql_error(&e))?,
        sent_ts: row.get_named("sent_ts").map_err(|e| map_sql_error(&e))?,
        source: row.get_named("source").map_err(|e| map_sql_error(&e))?,
        read_ts: row.get_named("read_ts").map_err(|e| map_sql_error(&e))?,
        sender_id: row.get_named("sender_id").map_err(|e| map_sql_error(&e))?,
        sender_first_name: row
            .get_named("sender_first_name")
            .map_err(|e| map_sql_error(&e))?,
        sender_last_name: row
            .get_named("sender_last_name")
            .map_err(|e| map_sql_error(&e))?,
    })
}

/// Main query: one row per conversation tree.
/// Sub query: the most recently sent message in the tree for which this
/// user still holds an undeleted item. The `source` flag plays no part in
/// the selection, so a freshly sent thread appears in the sender's inbox.
const INBOX_FROM_WHERE_SQL: &str = "FROM message_items mi \
     JOIN messages m ON mi.message_id = m.id \
     JOIN users u ON u.id = m.sender_id \
     WHERE mi.user_id = ? \
       AND m.is_notification = 0 \
       AND m.id = ( \
           SELECT m1.id \
           FROM messages m1 \
           JOIN message_items mi1 ON mi1.message_id = m1.id \
           WHERE mi1.user_id = mi.user_id \
             AND m1.is_notification = 0 \
             AND m1.tree_id = m.tree_id \
             AND mi1.deleted_ts IS NULL \
           ORDER BY m1.sent_ts DESC \
           LIMIT 1 \
       )";

/// Fetch one page of a user's inbox: one row per tree, ordered by sent time
/// or sender display name.
pub async fn fetch_inbox(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    sort_field: InboxSortField,
    sort_dir: SortDirection,
    limit: usize,
    offset: usize,
) -> Outcome<Vec<InboxRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let Ok(limit_i64) = i64::try_from(limit) else {
        return Outcome::Err(DbError::invalid("limit", "limit exceeds i64::MAX"));
    };
    let Ok(offset_i64) = i64::try_from(offset) else {
        return Outcome::Err(DbError::invalid("offset", "offset exceeds i64::MAX"));
    };

    let sql = format!(
        "SELECT mi.id AS item_id, mi.message_id AS message_id, m.tree_id AS tree_id, \
                m.subject AS subject, m.sent_ts AS sent_ts, mi.source AS source, \
                mi.read_ts AS read_ts, m.sender_id AS sender_id, \
                u.first_name AS sender_first_name, u.last_name AS sender_last_name \
         {INBOX_FROM_WHERE_SQL} \
         ORDER BY {} LIMIT ? OFFSET ?",
        inbox_order_by(sort_field, sort_dir)
    );
    let params = [
        Value::BigInt(user_id),
        Value::BigInt(limit_i64),
        Value::BigInt(offset_i64),
    ];

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut inbox = Vec::with_capacity(rows.len());
            for row in &rows {
                match decode_inbox_row(row) {
                    Ok(r) => inbox.push(r),
                    Err(e) => return Outcome::Err(e),
                }
            }
            Outcome::Ok(inbox)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Total number of distinct trees in the user's inbox (one row each).
pub async fn count_inbox(cx: &Cx, pool: &DbPool, user_id: i64) -> Outcome<i64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = format!("SELECT COUNT(mi.id) {INBOX_FROM_WHERE_SQL}");
    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &[Value::BigInt(user_id)]).await);
    match out {
        Outcome::Ok(rows) => Outcome::Ok(rows.first().and_then(row_first_i64).unwrap_or(0)),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// One notification feed row.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub item_id: i64,
    pub message_id: i64,
    pub subject: String,
    pub body: String,
    pub url: String,
    pub sent_ts: i64,
    pub read_ts: Option<i64>,
}

fn decode_notification_row(row: &SqlRow) -> Result<NotificationRow, DbError> {
    Ok(NotificationRow {
        item_id: row.get_named("item_id").map_err(|e| map_sql_error(&e))?,
        message_id: row.get_named("message_id").map_err(|e| map_sql_error(&e))?,
        subject: row.get_named("subject").map_err(|e| map_sql_error(&e))?,
        body: row.get_named("body").map_err(|e| map_sql_error(&e))?,
        url: row.get_named("url").map_err(|e| map_sql_error(&e))?,
        sent_ts: row.get_named("sent_ts").map_err(|e| map_sql_error(&e))?,
        read_ts: row.get_named("read_ts").map_err(|e| map_sql_error(&e))?,
    })
}

const NOTIFICATIONS_FROM_WHERE_SQL: &str = "FROM message_items mi \
     JOIN messages m ON mi.message_id = m.id \
     WHERE mi.user_id = ? AND m.is_notification = 1 AND mi.deleted_ts IS NULL";

/// Fetch one page of a user's notifications, newest-first.
pub async fn fetch_notifications(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    limit: usize,
    offset: usize,
) -> Outcome<Vec<NotificationRow>, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let Ok(limit_i64) = i64::try_from(limit) else {
        return Outcome::Err(DbError::invalid("limit", "limit exceeds i64::MAX"));
    };
    let Ok(offset_i64) = i64::try_from(offset) else {
        return Outcome::Err(DbError::invalid("offset", "offset exceeds i64::MAX"));
    };

    let sql = format!(
        "SELECT mi.id AS item_id, mi.message_id AS message_id, m.subject AS subject, \
                m.body AS body, m.url AS url, m.sent_ts AS sent_ts, mi.read_ts AS read_ts \
         {NOTIFICATIONS_FROM_WHERE_SQL} \
         ORDER BY m.sent_ts DESC LIMIT ? OFFSET ?"
    );
    let params = [
        Value::BigInt(user_id),
        Value::BigInt(limit_i64),
        Value::BigInt(offset_i64),
    ];

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut notifications = Vec::with_capacity(rows.len());
            for row in &rows {
                match decode_notification_row(row) {
                    Ok(r) => notifications.push(r),
                    Err(e) => return Outcome::Err(e),
                }
            }
            Outcome::Ok(notifications)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Total undeleted notifications for the user.
pub async fn count_notifications(cx: &Cx, pool: &DbPool, user_id: i64) -> Outcome<i64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = format!("SELECT COUNT(mi.id) {NOTIFICATIONS_FROM_WHERE_SQL}");
    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &[Value::BigInt(user_id)]).await);
    match out {
        Outcome::Ok(rows) => Outcome::Ok(rows.first().and_then(row_first_i64).unwrap_or(0)),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Count aggregates
// =============================================================================

/// Undeleted item count per message tree for one user (non-notification).
/// Empty input yields an empty map without querying.
pub async fn undeleted_count_per_tree(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    tree_ids: &[i64],
) -> Outcome<HashMap<i64, i64>, DbError> {
    item_count_per_tree(cx, pool, user_id, tree_ids, false).await
}

/// Unread (and undeleted) item count per message tree for one user.
pub async fn unread_count_per_tree(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    tree_ids: &[i64],
) -> Outcome<HashMap<i64, i64>, DbError> {
    item_count_per_tree(cx, pool, user_id, tree_ids, true).await
}

async fn item_count_per_tree(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    tree_ids: &[i64],
    exclude_read: bool,
) -> Outcome<HashMap<i64, i64>, DbError> {
    if tree_ids.is_empty() {
        return Outcome::Ok(HashMap::new());
    }

    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let capped = &tree_ids[..tree_ids.len().min(MAX_IN_CLAUSE_ITEMS)];
    let unread_clause = if exclude_read {
        "AND mi.read_ts IS NULL "
    } else {
        ""
    };
    let sql = format!(
        "SELECT m.tree_id, COUNT(mi.id) \
         FROM message_items mi \
         JOIN messages m ON mi.message_id = m.id \
         WHERE mi.user_id = ? \
           AND m.is_notification = 0 \
           AND m.tree_id IN ({}) \
           AND mi.deleted_ts IS NULL \
           {unread_clause}\
         GROUP BY m.tree_id",
        placeholders(capped.len())
    );
    let mut params: Vec<Value> = Vec::with_capacity(capped.len() + 1);
    params.push(Value::BigInt(user_id));
    for id in capped {
        params.push(Value::BigInt(*id));
    }

    let out = map_sql_outcome(raw_query(cx, &*conn, &sql, &params).await);
    match out {
        Outcome::Ok(rows) => {
            let mut counts = HashMap::with_capacity(rows.len());
            for row in &rows {
                let tree_id = row.get(0).and_then(value_as_i64);
                let count = row.get(1).and_then(value_as_i64);
                if let (Some(tree_id), Some(count)) = (tree_id, count) {
                    counts.insert(tree_id, count);
                }
            }
            Outcome::Ok(counts)
        }
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Overall unread badge count: unread, undeleted items on messages of the
/// given kind (notifications or ordinary messages).
pub async fn unread_count(
    cx: &Cx,
    pool: &DbPool,
    user_id: i64,
    notifications: bool,
) -> Outcome<i64, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let sql = "SELECT COUNT(mi.id) \
               FROM message_items mi \
               JOIN messages m ON mi.message_id = m.id \
               WHERE mi.user_id = ? AND m.is_notification = ? \
                 AND mi.read_ts IS NULL AND mi.deleted_ts IS NULL";
    let params = [
        Value::BigInt(user_id),
        Value::BigInt(i64::from(notifications)),
    ];

    let out = map_sql_outcome(raw_query(cx, &*conn, sql, &params).await);
    match out {
        Outcome::Ok(rows) => Outcome::Ok(rows.first().and_then(row_first_i64).unwrap_or(0)),
        Outcome::Err(e) => Outcome::Err(e),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

// =============================================================================
// Target-audit rows
// =============================================================================

/// The original recipient specification of one message, resolved for
/// reply-prefill.
#[derive(Debug, Clone, Default)]
pub struct MessageTargets {
    /// `(user_id, first_name, last_name)`, ascending by user id.
    pub users: Vec<(i64, String, String)>,
    /// `(course_id, group_id)` in insertion order.
    pub groups: Vec<(String, String)>,
    /// Course ids in insertion order.
    pub courses: Vec<String>,
}

/// Load the target-audit rows for a message, with user names joined.
pub async fn targets_for_message(
    cx: &Cx,
    pool: &DbPool,
    message_id: i64,
) -> Outcome<MessageTargets, DbError> {
    let conn = match acquire_conn(cx, pool).await {
        Outcome::Ok(c) => c,
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    let mut targets = MessageTargets::default();

    let users_out = map_sql_outcome(
        raw_query(
            cx,
            &*conn,
            "SELECT tu.user_id, u.first_name, u.last_name \
             FROM message_target_users tu \
             JOIN users u ON u.id = tu.user_id \
             WHERE tu.message_id = ? \
             ORDER BY tu.user_id",
            &[Value::BigInt(message_id)],
        )
        .await,
    );
    match users_out {
        Outcome::Ok(rows) => {
            for row in &rows {
                let user_id = row.get(0).and_then(value_as_i64).unwrap_or(0);
                let first = match row.get_named::<String>("first_name") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                let last = match row.get_named::<String>("last_name") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                targets.users.push((user_id, first, last));
            }
        }
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }

    let groups_out = map_sql_outcome(
        raw_query(
            cx,
            &*conn,
            "SELECT course_id, group_id FROM message_target_groups \
             WHERE message_id = ? ORDER BY id",
            &[Value::BigInt(message_id)],
        )
        .await,
    );
    match groups_out {
        Outcome::Ok(rows) => {
            for row in &rows {
                let course: String = match row.get_named("course_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                let group: String = match row.get_named("group_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                targets.groups.push((course, group));
            }
        }
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }

    let courses_out = map_sql_outcome(
        raw_query(
            cx,
            &*conn,
            "SELECT course_id FROM message_target_courses \
             WHERE message_id = ? ORDER BY id",
            &[Value::BigInt(message_id)],
        )
        .await,
    );
    match courses_out {
        Outcome::Ok(rows) => {
            for row in &rows {
                let course: String = match row.get_named("course_id") {
                    Ok(v) => v,
                    Err(e) => return Outcome::Err(map_sql_error(&e)),
                };
                targets.courses.push(course);
            }
        }
        Outcome::Err(e) => return Outcome::Err(e),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    }

    Outcome::Ok(targets)
}
