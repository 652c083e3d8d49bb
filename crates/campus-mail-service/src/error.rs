//! Error taxonomy for the operation layer
//!
//! The external boundary must be able to map these to distinct responses:
//! a missing item id is NotFound, an item owned by someone else (or a
//! privileged operation attempted without privilege) is Forbidden. Unknown
//! recipient specifiers are not errors at all (sends proceed with whatever
//! resolves) and mail transport failures never surface here.

use campus_mail_db::DbError;
use thiserror::Error;

/// Operation-layer error types
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The referenced record does not exist at all.
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// The record exists but does not belong to the caller, or the caller
    /// lacks the privilege the operation requires.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Storage failure.
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Result type alias for operation-layer functions
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_and_forbidden_are_distinct() {
        let not_found = ServiceError::not_found("MessageItem", "9");
        let forbidden = ServiceError::forbidden("Access denied");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_forbidden());
        assert!(forbidden.is_forbidden());
        assert!(!forbidden.is_not_found());
    }

    #[test]
    fn db_errors_wrap_transparently() {
        let e = ServiceError::from(DbError::Sqlite("disk I/O error".to_string()));
        assert_eq!(e.to_string(), "SQLite error: disk I/O error");
        assert!(!e.is_not_found());
    }
}
