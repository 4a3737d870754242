//! Executor configuration.

use std::time::Duration;

use ormsql_core::ReplicationMode;

/// Default lifetime of a cached result.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_millis(1000);

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Lifetime of cached results when the query sets none.
    pub default_cache_duration: Duration,

    /// Cache every query unless it opts out with `cache(false)`.
    pub always_cache: bool,

    /// Propagate result cache failures instead of logging them.
    pub strict_cache_errors: bool,

    /// Run queries in an owned transaction unless the query says otherwise.
    pub transactional: bool,

    /// Runner checkout mode when the query sets none.
    pub replication: ReplicationMode,
}

impl ExecutorConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            default_cache_duration: DEFAULT_CACHE_DURATION,
            always_cache: false,
            strict_cache_errors: false,
            transactional: false,
            replication: ReplicationMode::Master,
        }
    }

    /// Set the default cache lifetime.
    pub fn with_default_cache_duration(mut self, duration: Duration) -> Self {
        self.default_cache_duration = duration;
        self
    }

    /// Cache every query by default.
    pub fn with_always_cache(mut self, enabled: bool) -> Self {
        self.always_cache = enabled;
        self
    }

    /// Propagate cache failures.
    pub fn with_strict_cache_errors(mut self, strict: bool) -> Self {
        self.strict_cache_errors = strict;
        self
    }

    /// Run queries transactionally by default.
    pub fn with_transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Set the default replication mode.
    pub fn with_replication(mut self, mode: ReplicationMode) -> Self {
        self.replication = mode;
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.default_cache_duration, DEFAULT_CACHE_DURATION);
        assert!(!config.always_cache);
        assert!(!config.strict_cache_errors);
        assert!(!config.transactional);
        assert_eq!(config.replication, ReplicationMode::Master);
    }

    #[test]
    fn test_config_builder() {
        let config = ExecutorConfig::new()
            .with_default_cache_duration(Duration::from_secs(30))
            .with_always_cache(true)
            .with_strict_cache_errors(true)
            .with_transactional(true)
            .with_replication(ReplicationMode::Slave);

        assert_eq!(config.default_cache_duration, Duration::from_secs(30));
        assert!(config.always_cache);
        assert!(config.strict_cache_errors);
        assert!(config.transactional);
        assert_eq!(config.replication, ReplicationMode::Slave);
    }
}
