//! Core types and configuration for Campus Mail
//!
//! This crate holds what every other layer needs but the storage layer must
//! not own: environment-driven configuration, the recipient-specifier type
//! used at the service boundary, and the outbound bulk-mail transport trait.

#![forbid(unsafe_code)]

pub mod config;
pub mod mail;
pub mod recipient;

pub use config::Config;
pub use mail::{BulkMail, MailTransport, MailTransportError, NullTransport};
pub use recipient::{GROUP_ID_DELIMITER, RecipientRef};

/// Render a user's display name the way every surface of the platform does:
/// first name, a space, last name.
#[must_use]
pub fn display_name(first_name: &str, last_name: &str) -> String {
    format!("{first_name} {last_name}")
}

#[cfg(test)]
mod tests {
    use super::display_name;

    #[test]
    fn display_name_joins_with_single_space() {
        assert_eq!(display_name("Cersei", "Lannister"), "Cersei Lannister");
    }

    #[test]
    fn display_name_keeps_empty_parts() {
        // Directory data can be sparse; the join stays stable either way.
        assert_eq!(display_name("", "Lannister"), " Lannister");
    }
}
