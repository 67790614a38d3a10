//! Runtime configuration (C9): every tunable named in sec6, collected into
//! one typed value constructed once per `Runtime` and threaded through the
//! components that need it. No component reads global/static config.

use std::time::Duration;

/// Defaults match sec6 exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub rpc_timeout: Duration,
    pub connection_timeout: Duration,
    pub discovery_timeout: Duration,
    pub reassembly_timeout: Duration,
    pub cleanup_interval: Duration,
    pub default_write_length: usize,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub scan_timeout: Duration,
    pub allow_duplicates_in_scan: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            rpc_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(5),
            reassembly_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
            default_write_length: 512,
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            scan_timeout: Duration::from_secs(10),
            allow_duplicates_in_scan: false,
        }
    }
}

impl RuntimeConfig {
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_allow_duplicates_in_scan(mut self, allow: bool) -> Self {
        self.allow_duplicates_in_scan = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
        assert_eq!(config.discovery_timeout, Duration::from_secs(5));
        assert_eq!(config.reassembly_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval, Duration::from_secs(10));
        assert_eq!(config.default_write_length, 512);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
        assert_eq!(config.scan_timeout, Duration::from_secs(10));
        assert!(!config.allow_duplicates_in_scan);
    }

    #[test]
    fn builder_methods_override_individual_fields() {
        let config = RuntimeConfig::default().with_rpc_timeout(Duration::from_secs(2)).with_max_retry_attempts(5);
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }
}
