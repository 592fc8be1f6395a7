//! System configuration with sensible defaults.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};

// Layer 3: Internal module imports
// (none)

/// Default scheduler time slice per subsystem.
pub const DEFAULT_TIME_SLICE: Duration = Duration::from_millis(10);

/// Default delay between scheduler ticks; never tighter than 1ms.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Default mailbox capacity for registered subsystems.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default bounded error store capacity.
pub const DEFAULT_ERROR_STORE_CAPACITY: usize = 1000;

/// Default dead-letter queue capacity.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// Default reply deadline for `response_required` sends.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one [`crate::system::MessageSystem`].
///
/// # Examples
///
/// ```rust
/// use plexus_rt::system::KernelConfig;
/// use std::time::Duration;
///
/// let config = KernelConfig::builder()
///     .with_time_slice(Duration::from_millis(5))
///     .with_strategy("fair-share")
///     .build()
///     .unwrap();
/// assert_eq!(config.scheduler_strategy, "fair-share");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Wall-clock budget each selected subsystem gets per tick.
    pub scheduler_time_slice: Duration,

    /// Delay between scheduler ticks (floor: 1ms).
    pub scheduler_tick_interval: Duration,

    /// Selection strategy name resolved at bootstrap.
    pub scheduler_strategy: String,

    /// Mailbox capacity for subsystems that do not override it.
    pub default_queue_capacity: usize,

    /// Bounded error store capacity.
    pub error_store_capacity: usize,

    /// Dead-letter queue capacity.
    pub dead_letter_capacity: usize,

    /// Reply deadline for `response_required` sends without an explicit
    /// timeout.
    pub default_response_timeout: Duration,

    /// Start the global scheduler during `bootstrap()`.
    pub auto_start: bool,

    /// Verbose diagnostics.
    pub debug: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            scheduler_time_slice: DEFAULT_TIME_SLICE,
            scheduler_tick_interval: DEFAULT_TICK_INTERVAL,
            scheduler_strategy: "round-robin".to_string(),
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            error_store_capacity: DEFAULT_ERROR_STORE_CAPACITY,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            default_response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            auto_start: true,
            debug: false,
        }
    }
}

impl KernelConfig {
    /// Create a configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.scheduler_time_slice.is_zero() {
            return Err("scheduler_time_slice must be > 0".to_string());
        }
        if self.scheduler_tick_interval < Duration::from_millis(1) {
            return Err("scheduler_tick_interval must be >= 1ms".to_string());
        }
        if self.scheduler_strategy.is_empty() {
            return Err("scheduler_strategy must not be empty".to_string());
        }
        if self.default_queue_capacity == 0 {
            return Err("default_queue_capacity must be > 0".to_string());
        }
        if self.error_store_capacity == 0 {
            return Err("error_store_capacity must be > 0".to_string());
        }
        if self.dead_letter_capacity == 0 {
            return Err("dead_letter_capacity must be > 0".to_string());
        }
        if self.default_response_timeout.is_zero() {
            return Err("default_response_timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for [`KernelConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Set the per-subsystem time slice.
    pub fn with_time_slice(mut self, slice: Duration) -> Self {
        self.config.scheduler_time_slice = slice;
        self
    }

    /// Set the delay between scheduler ticks.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.config.scheduler_tick_interval = interval;
        self
    }

    /// Set the selection strategy by name.
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.config.scheduler_strategy = strategy.into();
        self
    }

    /// Set the default mailbox capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.default_queue_capacity = capacity;
        self
    }

    /// Set the error store capacity.
    pub fn with_error_store_capacity(mut self, capacity: usize) -> Self {
        self.config.error_store_capacity = capacity;
        self
    }

    /// Set the dead-letter queue capacity.
    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.config.dead_letter_capacity = capacity;
        self
    }

    /// Set the default response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_response_timeout = timeout;
        self
    }

    /// Start the scheduler at bootstrap (default) or leave it stopped.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.config.auto_start = auto_start;
        self
    }

    /// Enable verbose diagnostics.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build(self) -> Result<KernelConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Tests are allowed to use unwrap for simplicity
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.scheduler_time_slice, Duration::from_millis(10));
        assert_eq!(config.scheduler_strategy, "round-robin");
        assert_eq!(config.default_queue_capacity, 1024);
        assert_eq!(config.error_store_capacity, 1000);
        assert_eq!(config.dead_letter_capacity, 1000);
        assert!(config.auto_start);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = KernelConfig::builder()
            .with_time_slice(Duration::from_millis(2))
            .with_strategy("queue-depth")
            .with_queue_capacity(16)
            .with_auto_start(false)
            .build()
            .unwrap();

        assert_eq!(config.scheduler_time_slice, Duration::from_millis(2));
        assert_eq!(config.scheduler_strategy, "queue-depth");
        assert_eq!(config.default_queue_capacity, 16);
        assert!(!config.auto_start);
    }

    #[test]
    fn test_validation_failures() {
        assert!(KernelConfig::builder()
            .with_time_slice(Duration::ZERO)
            .build()
            .is_err());
        assert!(KernelConfig::builder()
            .with_tick_interval(Duration::from_micros(100))
            .build()
            .is_err());
        assert!(KernelConfig::builder().with_strategy("").build().is_err());
        assert!(KernelConfig::builder()
            .with_queue_capacity(0)
            .build()
            .is_err());
        assert!(KernelConfig::builder()
            .with_dead_letter_capacity(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = KernelConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: KernelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.scheduler_strategy, back.scheduler_strategy);
        assert_eq!(config.default_queue_capacity, back.default_queue_capacity);
    }
}
