//! Operation layer for Campus Mail
//!
//! Every exposed operation of the messaging core lives here: sending (with
//! membership expansion and the fire-and-forget thread mailer), thread
//! reconstruction with its mark-read side effect, the inbox and notification
//! aggregations, reply-info reconstruction, soft deletion, and recipient
//! search. The authenticated user identity is an explicit parameter on every
//! operation; by-item-id operations authorize ownership and fail with
//! distinct NotFound / Forbidden signals.

#![forbid(unsafe_code)]

pub mod error;
#[macro_use]
mod macros;
pub mod mailer;
pub mod messaging;
pub mod recipients;
pub mod search;
pub mod visibility;

pub use error::{ServiceError, ServiceResult};
pub use mailer::Mailer;
pub use messaging::{
    InboxEntry, InboxPage, NotificationEntry, NotificationPage, ReplyInfo, ReplyRecipient,
    SendRequest, ThreadMessageView, ThreadView,
};
pub use search::{SearchHit, SearchPage};
