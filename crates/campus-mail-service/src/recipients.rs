//! Membership resolver
//!
//! Expands a mixed list of user/group/course recipient specifiers into a
//! deduplicated set of concrete user ids. A user reachable via a direct id,
//! a group, and a course membership appears exactly once. Unknown ids of
//! any kind are silently dropped; the send proceeds with whatever
//! resolves.

use std::collections::BTreeSet;

use asupersync::{Cx, Outcome};
use campus_mail_core::RecipientRef;
use campus_mail_db::queries::TargetAudit;
use campus_mail_db::{DbPool, directory};

use crate::error::ServiceError;

/// Expand recipient specifiers into a deduplicated, ascending user-id list.
pub async fn expand_recipients(
    cx: &Cx,
    pool: &DbPool,
    refs: &[RecipientRef],
) -> Outcome<Vec<i64>, ServiceError> {
    let mut expanded: BTreeSet<i64> = BTreeSet::new();

    // Direct user ids: validated against the directory so unknown ids drop
    // out instead of failing the send.
    let direct: Vec<i64> = refs
        .iter()
        .filter_map(|r| match r {
            RecipientRef::User(id) => Some(*id),
            _ => None,
        })
        .collect();
    for user in try_db!(directory::users_by_ids(cx, pool, &direct).await) {
        if let Some(id) = user.id {
            expanded.insert(id);
        }
    }

    for recipient in refs {
        match recipient {
            RecipientRef::User(_) => {}
            RecipientRef::Group {
                course_id,
                group_id,
            } => {
                // An unknown group simply has no members.
                expanded.extend(
                    try_db!(directory::members_of_group(cx, pool, course_id, group_id).await),
                );
            }
            RecipientRef::Course(course_id) => {
                expanded.extend(try_db!(directory::members_of_course(cx, pool, course_id).await));
            }
        }
    }

    Outcome::Ok(expanded.into_iter().collect())
}

/// Split the original specifiers into target-audit rows: one row per
/// distinct specifier, independent of the fan-out. Direct user targets are
/// restricted to ids that actually resolve; group/course targets are
/// recorded as specified (reply-info omits ones that have since vanished).
pub async fn audit_from_refs(
    cx: &Cx,
    pool: &DbPool,
    refs: &[RecipientRef],
) -> Outcome<TargetAudit, ServiceError> {
    let mut audit = TargetAudit::none();
    let mut seen_users: BTreeSet<i64> = BTreeSet::new();
    let mut seen_groups: BTreeSet<(String, String)> = BTreeSet::new();
    let mut seen_courses: BTreeSet<String> = BTreeSet::new();

    let direct: Vec<i64> = refs
        .iter()
        .filter_map(|r| match r {
            RecipientRef::User(id) => Some(*id),
            _ => None,
        })
        .collect();
    let known: BTreeSet<i64> = try_db!(directory::users_by_ids(cx, pool, &direct).await)
        .into_iter()
        .filter_map(|u| u.id)
        .collect();

    for recipient in refs {
        match recipient {
            RecipientRef::User(id) => {
                if known.contains(id) && seen_users.insert(*id) {
                    audit.users.push(*id);
                }
            }
            RecipientRef::Group {
                course_id,
                group_id,
            } => {
                let key = (course_id.clone(), group_id.clone());
                if seen_groups.insert(key.clone()) {
                    audit.groups.push(key);
                }
            }
            RecipientRef::Course(course_id) => {
                if seen_courses.insert(course_id.clone()) {
                    audit.courses.push(course_id.clone());
                }
            }
        }
    }

    Outcome::Ok(audit)
}
