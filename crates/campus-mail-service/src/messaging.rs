//! Messaging operations
//!
//! The exposed operation surface: send (direct, broadcast, notification),
//! inbox and notification pages, thread fetch with its mark-read side
//! effect, reply-info reconstruction, soft deletion, and unread badge
//! counts. Every by-item-id operation authorizes ownership first: a missing
//! item is NotFound, someone else's item is Forbidden.

use std::collections::BTreeSet;

use asupersync::{Cx, Outcome};
use campus_mail_core::{BulkMail, RecipientRef, display_name};
use campus_mail_db::queries::{self, InboxSortField, NewMessage, SortDirection};
use campus_mail_db::{DbError, DbPool, MessageItemRow, MessageRow, UserRow, directory};
use serde::Serialize;

use crate::error::ServiceError;
use crate::mailer::Mailer;
use crate::recipients;

// =============================================================================
// Authorization
// =============================================================================

/// Resolve an item id for the calling user.
///
/// A nonexistent id is NotFound; an existing item owned by another user is
/// Forbidden. The two must stay distinguishable at the outer boundary.
pub async fn authorize_item(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    item_id: i64,
) -> Outcome<MessageItemRow, ServiceError> {
    let item = match queries::get_item(cx, pool, item_id).await {
        Outcome::Ok(item) => item,
        Outcome::Err(DbError::NotFound { .. }) => {
            return Outcome::Err(ServiceError::not_found("MessageItem", item_id.to_string()));
        }
        Outcome::Err(e) => return Outcome::Err(ServiceError::from(e)),
        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
        Outcome::Panicked(p) => return Outcome::Panicked(p),
    };

    if item.user_id != user.id.unwrap_or_default() {
        return Outcome::Err(ServiceError::forbidden("Access denied"));
    }

    Outcome::Ok(item)
}

// =============================================================================
// Sending
// =============================================================================

/// A send request as it arrives from the boundary.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub recipients: Vec<RecipientRef>,
    pub target_all: bool,
    pub subject: String,
    pub body: String,
    /// Item id of the message being replied to, owned by the sender.
    pub reply_to_item: Option<i64>,
}

/// Send a message.
///
/// Broadcast (`target_all`) requires privilege and fans out to every
/// non-admin user with no target-audit rows. An ordinary send expands the
/// recipient specifiers, fans out one delivery item per resolved user,
/// records the audit rows, and enqueues a best-effort thread email.
pub async fn send_message(
    cx: &Cx,
    pool: &DbPool,
    mailer: &Mailer,
    sender: &UserRow,
    request: &SendRequest,
) -> Outcome<MessageRow, ServiceError> {
    if request.target_all && !sender.is_admin_bool() {
        return Outcome::Err(ServiceError::forbidden(
            "Only administrators can send messages to everyone",
        ));
    }

    // A reply must anchor to an item the sender owns.
    let parent_id = if let Some(item_id) = request.reply_to_item {
        let item = try_svc!(authorize_item(cx, pool, sender, item_id).await);
        Some(item.message_id)
    } else {
        None
    };

    let sender_id = sender.id.unwrap_or_default();

    if request.target_all {
        return map_db(
            queries::create_broadcast(
                cx,
                pool,
                sender_id,
                &request.subject,
                &request.body,
                parent_id,
            )
            .await,
        );
    }

    let recipient_ids = try_svc!(recipients::expand_recipients(cx, pool, &request.recipients).await);
    let audit = try_svc!(recipients::audit_from_refs(cx, pool, &request.recipients).await);

    let new = NewMessage {
        sender_id: Some(sender_id),
        subject: request.subject.clone(),
        body: request.body.clone(),
        parent_id,
        ..Default::default()
    };
    let message = try_db!(queries::create_message(cx, pool, &new, &recipient_ids, &audit).await);

    try_svc!(email_thread(cx, pool, mailer, &message, &recipient_ids).await);

    Outcome::Ok(message)
}

/// Send a notification to the given usernames. No sender identity exists at
/// this layer (the trusted-service credential is checked at the boundary).
/// Duplicate usernames collapse; unknown usernames are skipped.
pub async fn send_notification(
    cx: &Cx,
    pool: &DbPool,
    usernames: &[String],
    url: &str,
    subject: &str,
    body: &str,
) -> Outcome<MessageRow, ServiceError> {
    let mut user_ids: BTreeSet<i64> = BTreeSet::new();
    for username in usernames {
        match directory::get_user_by_username(cx, pool, username).await {
            Outcome::Ok(user) => {
                if let Some(id) = user.id {
                    user_ids.insert(id);
                }
            }
            Outcome::Err(DbError::NotFound { .. }) => {
                tracing::debug!("skipping unknown notification recipient {username}");
            }
            Outcome::Err(e) => return Outcome::Err(ServiceError::from(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    let ids: Vec<i64> = user_ids.into_iter().collect();
    map_db(queries::create_notification(cx, pool, &ids, url, subject, body).await)
}

/// Render the message's ancestor chain into one email per resolved
/// recipient and hand the batch to the mailer. Best effort throughout.
async fn email_thread(
    cx: &Cx,
    pool: &DbPool,
    mailer: &Mailer,
    message: &MessageRow,
    recipient_ids: &[i64],
) -> Outcome<(), ServiceError> {
    if recipient_ids.is_empty() {
        return Outcome::Ok(());
    }

    let ancestors = try_db!(queries::thread_ancestors(cx, pool, message.id.unwrap_or_default()).await);

    // Sender display names for the rendered chain.
    let sender_ids: Vec<i64> = ancestors.iter().filter_map(|m| m.sender_id).collect();
    let senders = try_db!(directory::users_by_ids(cx, pool, &sender_ids).await);
    let sender_name = |id: Option<i64>| -> String {
        id.and_then(|id| senders.iter().find(|u| u.id == Some(id)))
            .map(UserRow::display_name)
            .unwrap_or_default()
    };

    let subject = format!("New message: {}", message.subject);
    let mut body = String::new();
    for m in &ancestors {
        body.push_str(&format!(
            "From: {}\nSubject: {}\n\n{}\n\n---\n\n",
            sender_name(m.sender_id),
            m.subject,
            m.body
        ));
    }

    let emails = try_db!(directory::user_emails(cx, pool, recipient_ids).await);
    let batch: Vec<BulkMail> = emails
        .into_iter()
        .map(|recipient_email| BulkMail {
            subject: subject.clone(),
            body: body.clone(),
            recipient_email,
        })
        .collect();

    mailer.enqueue(batch);
    Outcome::Ok(())
}

// =============================================================================
// Thread fetch
// =============================================================================

/// One rendered message within a thread view.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadMessageView {
    pub item_id: i64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub sent_ts: i64,
    pub read: bool,
}

/// A reconstructed thread from one user's perspective.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    /// Subject of the item the thread was opened from.
    pub subject: String,
    /// Undeleted messages, newest-first.
    pub messages: Vec<ThreadMessageView>,
    pub total: usize,
}

/// Fetch the thread containing `item_id` for the calling user and mark the
/// whole returned thread read. Read flags in the result reflect the state
/// *before* marking.
pub async fn get_thread(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    item_id: i64,
) -> Outcome<ThreadView, ServiceError> {
    let item = try_svc!(authorize_item(cx, pool, user, item_id).await);
    let opened_message = try_db!(queries::get_message(cx, pool, item.message_id).await);

    let rows = try_db!(queries::thread_items(cx, pool, item_id).await);

    let messages: Vec<ThreadMessageView> = rows
        .iter()
        .map(|r| ThreadMessageView {
            item_id: r.item_id,
            sender: display_name(&r.sender_first_name, &r.sender_last_name),
            subject: r.subject.clone(),
            body: r.body.clone(),
            sent_ts: r.sent_ts,
            read: r.read_ts.is_some(),
        })
        .collect();
    let total = rows.len();

    // Viewing a thread reads it.
    let ids: Vec<i64> = rows.iter().map(|r| r.item_id).collect();
    try_db!(queries::mark_items_read(cx, pool, &ids).await);

    Outcome::Ok(ThreadView {
        subject: opened_message.subject,
        messages,
        total,
    })
}

// =============================================================================
// Inbox and notifications
// =============================================================================

/// One inbox row: a tree's representative message plus per-tree counts.
#[derive(Debug, Clone, Serialize)]
pub struct InboxEntry {
    pub item_id: i64,
    pub sender: String,
    pub subject: String,
    pub sent_ts: i64,
    pub tree_id: i64,
    /// Undeleted messages in the tree for this user.
    pub count: i64,
    /// Unread (and undeleted) messages in the tree for this user.
    pub unread: i64,
}

/// One page of a user's inbox.
#[derive(Debug, Clone, Serialize)]
pub struct InboxPage {
    pub entries: Vec<InboxEntry>,
    /// Total distinct trees, not messages.
    pub total: i64,
}

/// Fetch one inbox page: one row per conversation tree, with undeleted and
/// unread counts per tree. The two counts are independently-fetched
/// aggregates, not a transactional pair.
pub async fn get_inbox(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    sort_field: InboxSortField,
    sort_dir: SortDirection,
    page: usize,
    per_page: usize,
) -> Outcome<InboxPage, ServiceError> {
    let user_id = user.id.unwrap_or_default();
    let offset = page.saturating_mul(per_page);

    let rows = try_db!(
        queries::fetch_inbox(cx, pool, user_id, sort_field, sort_dir, per_page, offset).await
    );
    let total = try_db!(queries::count_inbox(cx, pool, user_id).await);

    let tree_ids: Vec<i64> = rows.iter().map(|r| r.tree_id).collect();
    let undeleted = try_db!(queries::undeleted_count_per_tree(cx, pool, user_id, &tree_ids).await);
    let unread = try_db!(queries::unread_count_per_tree(cx, pool, user_id, &tree_ids).await);

    let entries = rows
        .iter()
        .map(|r| InboxEntry {
            item_id: r.item_id,
            sender: display_name(&r.sender_first_name, &r.sender_last_name),
            subject: r.subject.clone(),
            sent_ts: r.sent_ts,
            tree_id: r.tree_id,
            count: undeleted.get(&r.tree_id).copied().unwrap_or(0),
            unread: unread.get(&r.tree_id).copied().unwrap_or(0),
        })
        .collect();

    Outcome::Ok(InboxPage { entries, total })
}

/// One notification feed row.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEntry {
    pub item_id: i64,
    pub subject: String,
    pub body: String,
    pub url: String,
    pub sent_ts: i64,
    pub read: bool,
}

/// One page of a user's notification feed.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPage {
    pub entries: Vec<NotificationEntry>,
    pub total: i64,
}

/// Fetch one page of undeleted notifications, newest-first.
pub async fn get_notifications(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    page: usize,
    per_page: usize,
) -> Outcome<NotificationPage, ServiceError> {
    let user_id = user.id.unwrap_or_default();
    let offset = page.saturating_mul(per_page);

    let rows = try_db!(queries::fetch_notifications(cx, pool, user_id, per_page, offset).await);
    let total = try_db!(queries::count_notifications(cx, pool, user_id).await);

    let entries = rows
        .iter()
        .map(|r| NotificationEntry {
            item_id: r.item_id,
            subject: r.subject.clone(),
            body: r.body.clone(),
            url: r.url.clone(),
            sent_ts: r.sent_ts,
            read: r.read_ts.is_some(),
        })
        .collect();

    Outcome::Ok(NotificationPage { entries, total })
}

/// Mark one notification (or message) item read.
pub async fn mark_item_read(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    item_id: i64,
) -> Outcome<(), ServiceError> {
    let item = try_svc!(authorize_item(cx, pool, user, item_id).await);
    try_db!(queries::mark_items_read(cx, pool, &[item.id.unwrap_or_default()]).await);
    Outcome::Ok(())
}

/// Unread badge count for messages or notifications.
pub async fn unread_count(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    notifications: bool,
) -> Outcome<i64, ServiceError> {
    map_db(queries::unread_count(cx, pool, user.id.unwrap_or_default(), notifications).await)
}

// =============================================================================
// Deletion
// =============================================================================

/// Soft-delete one item, or the caller's entire thread when `whole_thread`.
/// Other users' views of the same tree are untouched.
pub async fn delete_item(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    item_id: i64,
    whole_thread: bool,
) -> Outcome<(), ServiceError> {
    let item = try_svc!(authorize_item(cx, pool, user, item_id).await);

    if whole_thread {
        let message = try_db!(queries::get_message(cx, pool, item.message_id).await);
        try_db!(
            queries::mark_thread_deleted(
                cx,
                pool,
                user.id.unwrap_or_default(),
                message.tree_id
            )
            .await
        );
    } else {
        try_db!(queries::mark_items_deleted(cx, pool, &[item.id.unwrap_or_default()]).await);
    }

    Outcome::Ok(())
}

// =============================================================================
// Reply info
// =============================================================================

/// One prefilled reply recipient.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyRecipient {
    pub target: RecipientRef,
    pub name: String,
}

/// Everything needed to compose a reply to a message.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyInfo {
    pub sender: String,
    /// Original sender first, then target users ascending by id (excluding
    /// sender and caller), then target groups, then target courses, each
    /// filtered to entries the directory can still resolve.
    pub recipients: Vec<ReplyRecipient>,
    pub subject: String,
    pub body: String,
}

/// Reconstruct the original recipient list of a message for reply-prefill.
/// Directory entries that have since vanished are omitted, never errors.
pub async fn get_reply_info(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    item_id: i64,
) -> Outcome<ReplyInfo, ServiceError> {
    let item = try_svc!(authorize_item(cx, pool, user, item_id).await);
    let message = try_db!(queries::get_message(cx, pool, item.message_id).await);

    let caller_id = user.id.unwrap_or_default();
    let mut reply_recipients: Vec<ReplyRecipient> = Vec::new();

    // Original sender, always first. Notifications carry no sender; the
    // whole entry degrades by omission.
    let mut sender_name = String::new();
    if let Some(sender_id) = message.sender_id {
        match directory::get_user(cx, pool, sender_id).await {
            Outcome::Ok(sender) => {
                sender_name = sender.display_name();
                reply_recipients.push(ReplyRecipient {
                    target: RecipientRef::User(sender_id),
                    name: sender_name.clone(),
                });
            }
            Outcome::Err(DbError::NotFound { .. }) => {}
            Outcome::Err(e) => return Outcome::Err(ServiceError::from(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    let targets = try_db!(queries::targets_for_message(cx, pool, item.message_id).await);

    for (user_id, first, last) in &targets.users {
        if Some(*user_id) == message.sender_id || *user_id == caller_id {
            continue;
        }
        reply_recipients.push(ReplyRecipient {
            target: RecipientRef::User(*user_id),
            name: display_name(first, last),
        });
    }

    for (course_id, group_id) in &targets.groups {
        match directory::get_group(cx, pool, course_id, group_id).await {
            Outcome::Ok(Some(group)) => reply_recipients.push(ReplyRecipient {
                target: RecipientRef::Group {
                    course_id: course_id.clone(),
                    group_id: group_id.clone(),
                },
                name: group.name,
            }),
            Outcome::Ok(None) => {}
            Outcome::Err(e) => return Outcome::Err(ServiceError::from(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    for course_id in &targets.courses {
        match directory::get_course(cx, pool, course_id).await {
            Outcome::Ok(Some(course)) => reply_recipients.push(ReplyRecipient {
                target: RecipientRef::Course(course_id.clone()),
                name: course.name,
            }),
            Outcome::Ok(None) => {}
            Outcome::Err(e) => return Outcome::Err(ServiceError::from(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    }

    Outcome::Ok(ReplyInfo {
        sender: sender_name,
        recipients: reply_recipients,
        subject: message.subject,
        body: message.body,
    })
}

// =============================================================================
// Shared plumbing
// =============================================================================

fn map_db<T>(out: Outcome<T, DbError>) -> Outcome<T, ServiceError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(ServiceError::from(e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}
