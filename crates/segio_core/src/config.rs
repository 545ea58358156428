//! Io configuration.

use std::time::Duration;

/// Format version written into newly created io files.
pub const DEFAULT_FORMAT_VERSION: u32 = 1;

/// Configuration shared by every io object of an [`IoContext`](crate::IoContext).
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Format version for new files (0 = legacy 128 MiB shards, 1 = 1 GiB shards).
    pub format_version: u32,

    /// Sleep between two attempts to take the header lock.
    pub lock_wait: Duration,

    /// Lock collisions within one call before a notice is logged.
    pub lock_log_border: u32,

    /// Attempts before a contended segment reference reports a deadlock.
    pub max_retry: u32,

    /// Sleep between segment reference attempts once spinning stops helping.
    pub retry_wait: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            format_version: DEFAULT_FORMAT_VERSION,
            lock_wait: Duration::from_millis(1),
            lock_log_border: 1000,
            max_retry: 0x10000,
            retry_wait: Duration::from_micros(1),
        }
    }
}

impl IoConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the format version used for new files.
    #[must_use]
    pub const fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    /// Sets the lock retry sleep.
    #[must_use]
    pub const fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the number of lock collisions before a notice is logged.
    #[must_use]
    pub const fn lock_log_border(mut self, border: u32) -> Self {
        self.lock_log_border = border;
        self
    }

    /// Sets the segment reference retry budget.
    #[must_use]
    pub const fn max_retry(mut self, retries: u32) -> Self {
        self.max_retry = retries;
        self
    }

    /// Sets the segment reference retry sleep.
    #[must_use]
    pub const fn retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = IoConfig::default();
        assert_eq!(config.format_version, 1);
        assert_eq!(config.lock_wait, Duration::from_millis(1));
        assert_eq!(config.max_retry, 0x10000);
    }

    #[test]
    fn builder_pattern() {
        let config = IoConfig::new()
            .format_version(0)
            .lock_wait(Duration::from_micros(50))
            .max_retry(16);

        assert_eq!(config.format_version, 0);
        assert_eq!(config.lock_wait, Duration::from_micros(50));
        assert_eq!(config.max_retry, 16);
    }
}
