//! Recipient search
//!
//! Users, groups, and courses are searched independently, each
//! visibility-filtered and exclusion-filtered, then merged into one list
//! sorted by display name. `total` is the sum of the three un-truncated
//! counts, so it may exceed the rows returned on a page.

use asupersync::{Cx, Outcome};
use campus_mail_core::RecipientRef;
use campus_mail_db::{DbPool, UserRow, directory};
use serde::Serialize;

use crate::error::ServiceError;
use crate::visibility;

/// One search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub target: RecipientRef,
    pub name: String,
}

/// One page of merged search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Sum of the per-kind counts before truncation.
    pub total: usize,
    pub per_page: usize,
}

fn exclude_user_ids(exclude: &[RecipientRef], caller_id: i64) -> Vec<i64> {
    let mut ids: Vec<i64> = exclude
        .iter()
        .filter_map(|r| match r {
            RecipientRef::User(id) => Some(*id),
            _ => None,
        })
        .collect();
    // The caller never appears in their own recipient picker.
    ids.push(caller_id);
    ids
}

fn exclude_group_pairs(exclude: &[RecipientRef]) -> Vec<(String, String)> {
    exclude
        .iter()
        .filter_map(|r| match r {
            RecipientRef::Group {
                course_id,
                group_id,
            } => Some((course_id.clone(), group_id.clone())),
            _ => None,
        })
        .collect()
}

fn exclude_course_ids(exclude: &[RecipientRef]) -> Vec<String> {
    exclude
        .iter()
        .filter_map(|r| match r {
            RecipientRef::Course(course_id) => Some(course_id.clone()),
            _ => None,
        })
        .collect()
}

async fn search_users(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    query: &str,
    exclude: &[RecipientRef],
) -> Outcome<Vec<SearchHit>, ServiceError> {
    let visible = try_svc!(visibility::visible_user_ids(cx, pool, user).await);
    let visible_ids: Option<Vec<i64>> = visible.map(|set| set.into_iter().collect());
    if let Some(ids) = &visible_ids {
        if ids.is_empty() {
            return Outcome::Ok(vec![]);
        }
    }

    let exclude_ids = exclude_user_ids(exclude, user.id.unwrap_or_default());
    let users = try_db!(
        directory::search_users(cx, pool, query, visible_ids.as_deref(), &exclude_ids).await
    );

    Outcome::Ok(
        users
            .into_iter()
            .map(|u| SearchHit {
                name: u.display_name(),
                target: RecipientRef::User(u.id.unwrap_or_default()),
            })
            .collect(),
    )
}

async fn search_groups(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    query: &str,
    exclude: &[RecipientRef],
) -> Outcome<Vec<SearchHit>, ServiceError> {
    // Group visibility is membership, not the user-visibility rule: a user
    // can target exactly the groups they belong to.
    let visible_pairs: Option<Vec<(String, String)>> = if user.is_admin_bool() {
        None
    } else {
        let pairs = try_db!(
            directory::group_memberships_of(cx, pool, user.id.unwrap_or_default()).await
        );
        if pairs.is_empty() {
            return Outcome::Ok(vec![]);
        }
        Some(pairs)
    };

    let exclude_pairs = exclude_group_pairs(exclude);
    let groups = try_db!(
        directory::search_groups(cx, pool, query, visible_pairs.as_deref(), &exclude_pairs).await
    );

    // Group display names are prefixed by their course's name.
    let course_ids: Vec<String> = groups.iter().map(|g| g.course_id.clone()).collect();
    let course_names = try_db!(directory::course_names(cx, pool, &course_ids).await);

    Outcome::Ok(
        groups
            .into_iter()
            .map(|g| SearchHit {
                name: format!(
                    "{} - {} (Group)",
                    course_names.get(&g.course_id).cloned().unwrap_or_default(),
                    g.name
                ),
                target: RecipientRef::Group {
                    course_id: g.course_id,
                    group_id: g.group_id,
                },
            })
            .collect(),
    )
}

async fn search_courses(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    query: &str,
    exclude: &[RecipientRef],
) -> Outcome<Vec<SearchHit>, ServiceError> {
    let visible_courses: Option<Vec<String>> = if user.is_admin_bool() {
        None
    } else {
        let courses = try_db!(directory::courses_of(cx, pool, user.id.unwrap_or_default()).await);
        if courses.is_empty() {
            return Outcome::Ok(vec![]);
        }
        Some(courses)
    };

    let exclude_ids = exclude_course_ids(exclude);
    let courses = try_db!(
        directory::search_courses(cx, pool, query, visible_courses.as_deref(), &exclude_ids).await
    );

    Outcome::Ok(
        courses
            .into_iter()
            .map(|c| SearchHit {
                name: format!("{} (Module)", c.name),
                target: RecipientRef::Course(c.course_id),
            })
            .collect(),
    )
}

/// Search users, groups and courses for the recipient picker.
///
/// Each kind is independently visibility- and exclusion-filtered; the
/// merged list is sorted by display name ascending and paginated.
pub async fn search_recipients(
    cx: &Cx,
    pool: &DbPool,
    user: &UserRow,
    query: &str,
    exclude: &[RecipientRef],
    page: usize,
    per_page: usize,
) -> Outcome<SearchPage, ServiceError> {
    let users = try_svc!(search_users(cx, pool, user, query, exclude).await);
    let groups = try_svc!(search_groups(cx, pool, user, query, exclude).await);
    let courses = try_svc!(search_courses(cx, pool, user, query, exclude).await);

    let total = users.len() + groups.len() + courses.len();

    let mut merged: Vec<SearchHit> = users;
    merged.extend(groups);
    merged.extend(courses);
    merged.sort_by(|a, b| a.name.cmp(&b.name));

    let start = page.saturating_mul(per_page).min(merged.len());
    let end = start.saturating_add(per_page).min(merged.len());
    let hits = merged[start..end].to_vec();

    Outcome::Ok(SearchPage {
        hits,
        total,
        per_page,
    })
}
