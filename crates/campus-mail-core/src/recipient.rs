//! Recipient specifiers
//!
//! A send request targets a mix of users, course groups, and whole courses.
//! The wire shape is a tagged `{id, type}` pair where `type` is one of
//! `"u"`, `"g"`, `"c"` and a group id is a composite `course::group` string;
//! internally that becomes an explicit enum so resolution and search match
//! exhaustively instead of dispatching on strings.

use serde::{Deserialize, Serialize};

/// Delimiter joining a course id and a group id into one composite group id.
pub const GROUP_ID_DELIMITER: &str = "::";

/// One recipient specifier from a send request or an exclusion list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecipientRef {
    /// A single user, by user id.
    User(i64),
    /// Every member of one group within one course.
    Group { course_id: String, group_id: String },
    /// Every member of one course.
    Course(String),
}

impl RecipientRef {
    /// Build a group reference from a composite `course::group` id.
    ///
    /// Returns `None` when the delimiter is missing or either side is empty;
    /// malformed specifiers are dropped by callers, never errors.
    #[must_use]
    pub fn parse_group(composite: &str) -> Option<Self> {
        let (course_id, group_id) = composite.split_once(GROUP_ID_DELIMITER)?;
        if course_id.is_empty() || group_id.is_empty() {
            return None;
        }
        Some(Self::Group {
            course_id: course_id.to_string(),
            group_id: group_id.to_string(),
        })
    }

    /// The composite id string used at the boundary ("7" / "c1::g1" / "c1").
    #[must_use]
    pub fn boundary_id(&self) -> String {
        match self {
            Self::User(id) => id.to_string(),
            Self::Group {
                course_id,
                group_id,
            } => format!("{course_id}{GROUP_ID_DELIMITER}{group_id}"),
            Self::Course(course_id) => course_id.clone(),
        }
    }

    /// The one-letter type tag used at the boundary.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            Self::User(_) => "u",
            Self::Group { .. } => "g",
            Self::Course(_) => "c",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_group_splits_on_delimiter() {
        let parsed = RecipientRef::parse_group("c002::g001").expect("valid composite id");
        assert_eq!(
            parsed,
            RecipientRef::Group {
                course_id: "c002".to_string(),
                group_id: "g001".to_string(),
            }
        );
    }

    #[test]
    fn parse_group_rejects_malformed_ids() {
        assert!(RecipientRef::parse_group("no-delimiter").is_none());
        assert!(RecipientRef::parse_group("::g001").is_none());
        assert!(RecipientRef::parse_group("c002::").is_none());
    }

    #[test]
    fn boundary_id_round_trips_group_encoding() {
        let group = RecipientRef::parse_group("c002::g001").expect("valid composite id");
        assert_eq!(group.boundary_id(), "c002::g001");
        assert_eq!(group.type_tag(), "g");
        assert_eq!(RecipientRef::User(42).boundary_id(), "42");
        assert_eq!(RecipientRef::Course("c001".to_string()).type_tag(), "c");
    }

    proptest::proptest! {
        #[test]
        fn group_encoding_round_trips(
            course in "[a-z0-9]{1,12}",
            group in "[a-z0-9]{1,12}",
        ) {
            let composite = format!("{course}::{group}");
            let parsed = RecipientRef::parse_group(&composite).expect("parseable");
            proptest::prop_assert_eq!(parsed.boundary_id(), composite);
        }
    }
}
