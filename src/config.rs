//! Store configuration.

use std::time::Duration;

/// Default maximum title length, in characters.
pub const DEFAULT_MAX_TITLE_LEN: usize = 500;

/// Default SQLite busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Longest accepted graph or node title, in characters.
    pub max_title_len: usize,

    /// How long a SQLite connection waits on a locked database file.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_title_len: DEFAULT_MAX_TITLE_LEN,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl StoreConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum title length.
    pub fn max_title_len(mut self, len: usize) -> Self {
        self.max_title_len = len;
        self
    }

    /// Set the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_title_len, 500);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new()
            .max_title_len(32)
            .busy_timeout(Duration::from_millis(250));

        assert_eq!(config.max_title_len, 32);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }
}
