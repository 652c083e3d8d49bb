//! Database models using sqlmodel derive macros
//!
//! These models map directly to `SQLite` tables. All datetime fields use
//! `i64` (microseconds since Unix epoch) for sqlmodel compatibility.
//! Booleans are stored as 0/1 integers.

use serde::{Deserialize, Serialize};
use sqlmodel::Model;

use crate::timestamps::{micros_to_naive, now_micros};

// =============================================================================
// User
// =============================================================================

/// A platform user. The user directory lives in the same relational store
/// as the messages because inbox sorting joins it by sender.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "users")]
pub struct UserRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    #[sqlmodel(unique)]
    pub username: String,

    pub first_name: String,
    pub last_name: String,
    pub email: String,

    /// Admin (privileged) flag: exempt from visibility filtering, allowed
    /// to broadcast, never auto-subscribed to broadcasts.
    #[sqlmodel(default = "0")]
    pub is_admin: i64,

    pub created_ts: i64,
}

impl Default for UserRow {
    fn default() -> Self {
        Self {
            id: None,
            username: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            is_admin: 0,
            created_ts: now_micros(),
        }
    }
}

impl UserRow {
    #[must_use]
    pub const fn is_admin_bool(&self) -> bool {
        self.is_admin != 0
    }

    /// "First Last", the display form used by every surface.
    #[must_use]
    pub fn display_name(&self) -> String {
        campus_mail_core::display_name(&self.first_name, &self.last_name)
    }
}

// =============================================================================
// Course / CourseGroup
// =============================================================================

/// One course known to the membership directory.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "courses")]
pub struct CourseRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    /// Opaque external course identifier (e.g. "c001").
    #[sqlmodel(unique)]
    pub course_id: String,

    pub name: String,
    pub created_ts: i64,
}

impl Default for CourseRow {
    fn default() -> Self {
        Self {
            id: None,
            course_id: String::new(),
            name: String::new(),
            created_ts: now_micros(),
        }
    }
}

/// One group within a course.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "course_groups")]
pub struct CourseGroupRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub course_id: String,
    pub group_id: String,
    pub name: String,
    pub created_ts: i64,
}

impl Default for CourseGroupRow {
    fn default() -> Self {
        Self {
            id: None,
            course_id: String::new(),
            group_id: String::new(),
            name: String::new(),
            created_ts: now_micros(),
        }
    }
}

// =============================================================================
// Membership
// =============================================================================

/// Course membership, with the tutor flag that drives cross-course
/// tutor visibility.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "course_members")]
pub struct CourseMemberRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub course_id: String,
    pub user_id: i64,

    #[sqlmodel(default = "0")]
    pub is_tutor: i64,
}

impl Default for CourseMemberRow {
    fn default() -> Self {
        Self {
            id: None,
            course_id: String::new(),
            user_id: 0,
            is_tutor: 0,
        }
    }
}

/// Group membership within a course.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "group_members")]
pub struct GroupMemberRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub course_id: String,
    pub group_id: String,
    pub user_id: i64,
}

impl Default for GroupMemberRow {
    fn default() -> Self {
        Self {
            id: None,
            course_id: String::new(),
            group_id: String::new(),
            user_id: 0,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// One authored message or one system notification.
///
/// # Tree fields
/// `tree_id`, `level`, `lft`, `rght` form a nested-set encoding of the reply
/// tree, maintained exclusively by the insert path in [`crate::queries`].
/// A parentless message opens a fresh tree (level 0, interval `[1, 2]`); a
/// reply inherits the parent's tree and sits at `level = parent.level + 1`.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "messages")]
pub struct MessageRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    /// Absent exactly for notifications.
    #[sqlmodel(nullable)]
    pub sender_id: Option<i64>,

    #[sqlmodel(default = "0")]
    pub is_notification: i64,

    /// Notification deep link; empty for ordinary messages.
    #[sqlmodel(default = "''")]
    pub url: String,

    pub subject: String,
    pub body: String,

    /// Set at creation. Backdating via `queries::update_message_sent` is a
    /// preserved quirk: it reorders display without touching the tree.
    pub sent_ts: i64,

    /// Broadcast marker (one delivery record per non-admin user).
    #[sqlmodel(default = "0")]
    pub target_all: i64,

    #[sqlmodel(nullable)]
    pub parent_id: Option<i64>,

    pub tree_id: i64,
    pub level: i64,
    pub lft: i64,
    pub rght: i64,
}

impl Default for MessageRow {
    fn default() -> Self {
        Self {
            id: None,
            sender_id: None,
            is_notification: 0,
            url: String::new(),
            subject: String::new(),
            body: String::new(),
            sent_ts: now_micros(),
            target_all: 0,
            parent_id: None,
            tree_id: 0,
            level: 0,
            lft: 1,
            rght: 2,
        }
    }
}

impl MessageRow {
    #[must_use]
    pub const fn is_notification_bool(&self) -> bool {
        self.is_notification != 0
    }

    #[must_use]
    pub const fn target_all_bool(&self) -> bool {
        self.target_all != 0
    }

    /// Whether this message starts its own tree.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// `sent_ts` as `NaiveDateTime`.
    #[must_use]
    pub fn sent_naive(&self) -> chrono::NaiveDateTime {
        micros_to_naive(self.sent_ts)
    }
}

// =============================================================================
// MessageItem
// =============================================================================

/// One delivery record per (message, recipient) pair: the only mutable
/// per-user state. Read and soft-delete timestamps move one way and are
/// never cleared; rows are never hard-deleted.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "message_items")]
pub struct MessageItemRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub message_id: i64,
    pub user_id: i64,

    /// True exactly when this is the sender's own auto-created copy.
    #[sqlmodel(default = "0")]
    pub source: i64,

    #[sqlmodel(nullable)]
    pub read_ts: Option<i64>,

    #[sqlmodel(nullable)]
    pub deleted_ts: Option<i64>,
}

impl Default for MessageItemRow {
    fn default() -> Self {
        Self {
            id: None,
            message_id: 0,
            user_id: 0,
            source: 0,
            read_ts: None,
            deleted_ts: None,
        }
    }
}

impl MessageItemRow {
    #[must_use]
    pub const fn is_source(&self) -> bool {
        self.source != 0
    }

    #[must_use]
    pub const fn is_read(&self) -> bool {
        self.read_ts.is_some()
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_ts.is_some()
    }
}

// =============================================================================
// Target-audit rows
// =============================================================================

/// Immutable record of a user targeted directly at send time.
/// Reconstructs "who did I send this to" for reply-prefill only.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "message_target_users")]
pub struct MessageTargetUserRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub message_id: i64,
    pub user_id: i64,
}

impl Default for MessageTargetUserRow {
    fn default() -> Self {
        Self {
            id: None,
            message_id: 0,
            user_id: 0,
        }
    }
}

/// Immutable record of a course targeted at send time.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "message_target_courses")]
pub struct MessageTargetCourseRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub message_id: i64,
    pub course_id: String,
}

impl Default for MessageTargetCourseRow {
    fn default() -> Self {
        Self {
            id: None,
            message_id: 0,
            course_id: String::new(),
        }
    }
}

/// Immutable record of a course group targeted at send time.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "message_target_groups")]
pub struct MessageTargetGroupRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub message_id: i64,
    pub course_id: String,
    pub group_id: String,
}

impl Default for MessageTargetGroupRow {
    fn default() -> Self {
        Self {
            id: None,
            message_id: 0,
            course_id: String::new(),
            group_id: String::new(),
        }
    }
}

// =============================================================================
// MessageAttachment
// =============================================================================

/// Opaque reference to an attachment blob owned by a message. Resolution
/// of the blob itself is an external concern.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "message_attachments")]
pub struct MessageAttachmentRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub message_id: i64,
    pub file_path: String,
}

impl Default for MessageAttachmentRow {
    fn default() -> Self {
        Self {
            id: None,
            message_id: 0,
            file_path: String::new(),
        }
    }
}
