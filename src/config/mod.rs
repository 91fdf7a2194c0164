//! Configuration
//!
//! Loaded from a TOML file, then overlaid with environment variables
//! prefixed `PROXYPROTO__` (e.g. `PROXYPROTO__SERVER__BIND`).

mod proxy;

use std::path::Path;

use ::config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub use proxy::ProxyProtocolConfig;

/// Default listen address for the echo server
pub const DEFAULT_BIND: &str = "127.0.0.1:7791";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy_protocol: ProxyProtocolConfig,
}

impl Config {
    /// Load from a TOML file with environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        ::config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(Environment::with_prefix("PROXYPROTO").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Parse TOML text without consulting the environment
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        ::config::Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.bind, DEFAULT_BIND);
        assert_eq!(config.proxy_protocol.pool_capacity, 16);
        assert_eq!(config.proxy_protocol.buffer_size, 4096);
        assert_eq!(config.proxy_protocol.header_timeout_duration(), None);
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [proxy_protocol]
            pool_capacity = 64
            header_timeout = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.proxy_protocol.pool_capacity, 64);
        assert_eq!(config.proxy_protocol.buffer_size, 4096);
        assert_eq!(
            config.proxy_protocol.header_timeout_duration(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(Config::from_toml_str("[proxy_protocol]\npool_capacity = \"many\"").is_err());
    }
}
