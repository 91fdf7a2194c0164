//! PROXY Protocol Configuration
//!
//! Buffer pool sizing and header deadline for PROXY-aware listeners.

use serde::Deserialize;
use std::time::Duration;

use crate::net::{DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY};

/// PROXY protocol configuration for a listener
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProxyProtocolConfig {
    /// Idle read buffers kept for reuse across connections.
    /// Default: 16
    pub pool_capacity: usize,

    /// Read-ahead size of each buffer in bytes (at least 256).
    /// Default: 4096
    pub buffer_size: usize,

    /// Timeout for reading the PROXY header in seconds, 0 to wait for as
    /// long as the connection stays open.
    /// Default: 0
    pub header_timeout: u64,
}

impl Default for ProxyProtocolConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            header_timeout: 0,
        }
    }
}

impl ProxyProtocolConfig {
    /// Get timeout as Duration, `None` when disabled
    pub fn header_timeout_duration(&self) -> Option<Duration> {
        (self.header_timeout > 0).then(|| Duration::from_secs(self.header_timeout))
    }
}
