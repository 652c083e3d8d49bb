//! Outcome plumbing macros
//!
//! Storage calls return `Outcome<T, DbError>`; operations return
//! `Outcome<T, ServiceError>`. These macros unwrap the `Ok` arm and
//! propagate everything else, converting the error type where needed.

/// Unwrap an `Outcome<T, DbError>` inside a function returning
/// `Outcome<_, ServiceError>`.
macro_rules! try_db {
    ($out:expr) => {
        match $out {
            asupersync::Outcome::Ok(v) => v,
            asupersync::Outcome::Err(e) => {
                return asupersync::Outcome::Err($crate::error::ServiceError::from(e));
            }
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}

/// Unwrap an `Outcome<T, ServiceError>` without conversion.
macro_rules! try_svc {
    ($out:expr) => {
        match $out {
            asupersync::Outcome::Ok(v) => v,
            asupersync::Outcome::Err(e) => return asupersync::Outcome::Err(e),
            asupersync::Outcome::Cancelled(r) => return asupersync::Outcome::Cancelled(r),
            asupersync::Outcome::Panicked(p) => return asupersync::Outcome::Panicked(p),
        }
    };
}
