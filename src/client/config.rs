//! Client configuration and builder.

use std::time::Duration;

use crate::command::BatchLimits;
use crate::executor::DEFAULT_TIMEOUT;
use crate::transport::ServiceConnection;

use super::ComposerClient;

/// Settings applied to every batch a client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Bounds on one batch.
    pub limits: BatchLimits,
    /// How long `execute()` waits for a reply.
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            limits: BatchLimits::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Builder for [`ComposerClient`].
///
/// ```ignore
/// let client = ComposerClient::builder()
///     .max_operations(64)
///     .timeout(Duration::from_millis(250))
///     .build(connection);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum operations per batch.
    ///
    /// Default: 256
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.config.limits.max_operations = limit;
        self
    }

    /// Set the maximum encoded bytes per batch.
    ///
    /// Default: 64KB
    pub fn max_batch_bytes(mut self, limit: usize) -> Self {
        self.config.limits.max_bytes = limit;
        self
    }

    /// Set the round-trip timeout.
    ///
    /// Default: 1 second
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// The configuration built so far.
    pub fn config(&self) -> ClientConfig {
        self.config
    }

    /// Build a client over an established connection.
    pub fn build<C: ServiceConnection>(self, connection: C) -> ComposerClient<C> {
        ComposerClient::with_config(connection, self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_OPERATIONS};

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.limits.max_operations, DEFAULT_MAX_OPERATIONS);
        assert_eq!(config.limits.max_bytes, DEFAULT_MAX_BATCH_BYTES);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientBuilder::new()
            .max_operations(8)
            .max_batch_bytes(512)
            .timeout(Duration::from_millis(50))
            .config();
        assert_eq!(config.limits.max_operations, 8);
        assert_eq!(config.limits.max_bytes, 512);
        assert_eq!(config.timeout, Duration::from_millis(50));
    }
}
