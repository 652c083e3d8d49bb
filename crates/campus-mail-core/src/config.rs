//! Configuration management for Campus Mail
//!
//! Configuration is loaded from environment variables. Every knob has a
//! default that works for local development against a file-backed SQLite
//! store, so `Config::from_env()` never fails.

use std::env;

/// Main configuration struct for Campus Mail.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (`sqlite:///path/to/db.sqlite3`).
    pub database_url: String,
    /// Rows per page for recipient search results.
    pub search_results_per_page: usize,
    /// Default rows per page for inbox and notification listings.
    pub page_size: usize,
    /// Whether sends enqueue a thread email to the resolved recipients.
    pub bulk_mail_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./campus_mail.sqlite3".to_string(),
            search_results_per_page: 10,
            page_size: 10,
            bulk_mail_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_value("DATABASE_URL").unwrap_or(defaults.database_url),
            search_results_per_page: env_usize(
                "MESSAGING_SEARCH_RESULTS_PER_PAGE",
                defaults.search_results_per_page,
            ),
            page_size: env_usize("MESSAGING_PAGE_SIZE", defaults.page_size),
            bulk_mail_enabled: env_bool("MESSAGING_BULK_MAIL_ENABLED", defaults.bulk_mail_enabled),
        }
    }
}

/// Read a raw environment value, treating an empty string as unset.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.database_url.starts_with("sqlite:///"));
        assert_eq!(config.search_results_per_page, 10);
        assert_eq!(config.page_size, 10);
        assert!(config.bulk_mail_enabled);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("1", false));
        assert!(parse_bool("YES", false));
        assert!(parse_bool(" on ", false));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        // Unrecognized input keeps the default.
        assert!(parse_bool("maybe", true));
        assert!(!parse_bool("maybe", false));
    }

    #[test]
    fn env_value_treats_blank_as_unset() {
        assert_eq!(env_value("CAMPUS_MAIL_TEST_UNSET_KEY"), None);
    }
}
