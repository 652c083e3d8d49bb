//! Visibility resolver
//!
//! Who may a user target? A non-privileged user sees every other user
//! sharing at least one course with them, plus (if they tutor at least one
//! course) every other tutor of any course, shared or not. Admins bypass
//! the filter entirely wherever it is consulted. The caller's own id is
//! never part of the result.

use std::collections::BTreeSet;

use asupersync::{Cx, Outcome};
use campus_mail_db::{DbPool, UserRow, directory};

use crate::error::ServiceError;

/// Resolve the set of user ids visible to `user`.
///
/// `None` means "no filtering" (privileged caller); `Some(set)` is the
/// exact set of targetable user ids, possibly empty.
pub async fn visible_user_ids(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
) -> Outcome<Option<BTreeSet<i64>>, ServiceError> {
    if user.is_admin_bool() {
        return Outcome::Ok(None);
    }

    let user_id = user.id.unwrap_or_default();

    let mut visible: BTreeSet<i64> =
        try_db!(directory::course_co_member_ids(cx, pool, user_id).await)
            .into_iter()
            .collect();

    if try_db!(directory::is_tutor_in_any_course(cx, pool, user_id).await) {
        visible.extend(try_db!(directory::tutor_user_ids(cx, pool, user_id).await));
    }

    visible.remove(&user_id);
    Outcome::Ok(Some(visible))
}
