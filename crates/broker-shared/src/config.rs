//! Layered configuration loading via the `config` crate: compiled-in
//! defaults, overridden by an optional `broker.toml`, overridden by
//! environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BrokerError, BrokerResult};

/// Runtime configuration for the broker engine and its HTTP adapter.
///
/// Recognized environment variables: `MAX_QUEUE_SIZE`, `PROCESSING_TIMEOUT`,
/// `KEEPALIVE_INTERVAL`, `SUBSCRIBER_CHANNEL_CAPACITY`, `HOST`, `PORT`,
/// `LOG_LEVEL`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub max_queue_size: usize,
    pub processing_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    pub subscriber_channel_capacity: usize,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            max_queue_size: 1000,
            processing_timeout_secs: 60,
            keepalive_interval_secs: 30,
            subscriber_channel_capacity: 256,
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    /// Load configuration from (in increasing precedence): compiled-in
    /// defaults, an optional `broker.toml` in the working directory, and
    /// environment variables matching either the unprefixed names deployers
    /// commonly set (`MAX_QUEUE_SIZE`, ...) or `BROKER_`-prefixed variants.
    pub fn load() -> BrokerResult<Self> {
        let defaults = BrokerConfig::default();
        let mut builder = config::Config::builder()
            .set_default("max_queue_size", defaults.max_queue_size as i64)
            .and_then(|b| {
                b.set_default(
                    "processing_timeout_secs",
                    defaults.processing_timeout_secs as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "keepalive_interval_secs",
                    defaults.keepalive_interval_secs as i64,
                )
            })
            .and_then(|b| {
                b.set_default(
                    "subscriber_channel_capacity",
                    defaults.subscriber_channel_capacity as i64,
                )
            })
            .and_then(|b| b.set_default("host", defaults.host.clone()))
            .and_then(|b| b.set_default("port", defaults.port as i64))
            .and_then(|b| b.set_default("log_level", defaults.log_level.clone()))
            .map_err(|e| BrokerError::InvalidInput(format!("bad config default: {e}")))?
            .add_source(config::File::with_name("broker").required(false))
            .add_source(
                config::Environment::with_prefix("BROKER")
                    .try_parsing(true)
                    .separator("_"),
            );

        // Layer in the distilled spec's literal, unprefixed env var names so
        // deployments that set `MAX_QUEUE_SIZE` (no `BROKER_` prefix) keep
        // working; these take precedence over everything set above.
        for (env_key, field) in [
            ("MAX_QUEUE_SIZE", "max_queue_size"),
            ("PROCESSING_TIMEOUT", "processing_timeout_secs"),
            ("KEEPALIVE_INTERVAL", "keepalive_interval_secs"),
            (
                "SUBSCRIBER_CHANNEL_CAPACITY",
                "subscriber_channel_capacity",
            ),
            ("HOST", "host"),
            ("PORT", "port"),
            ("LOG_LEVEL", "log_level"),
        ] {
            if let Ok(value) = std::env::var(env_key) {
                builder = builder
                    .set_override(field, value)
                    .map_err(|e| BrokerError::InvalidInput(format!("bad env override: {e}")))?;
            }
        }

        let built = builder
            .build()
            .map_err(|e| BrokerError::InvalidInput(format!("failed to build config: {e}")))?;

        built
            .try_deserialize()
            .map_err(|e| BrokerError::InvalidInput(format!("failed to parse config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_match_spec() {
        for key in [
            "MAX_QUEUE_SIZE",
            "PROCESSING_TIMEOUT",
            "KEEPALIVE_INTERVAL",
            "SUBSCRIBER_CHANNEL_CAPACITY",
            "HOST",
            "PORT",
            "LOG_LEVEL",
            "BROKER_MAX_QUEUE_SIZE",
        ] {
            std::env::remove_var(key);
        }
        let cfg = BrokerConfig::load().expect("defaults should always load");
        assert_eq!(cfg.max_queue_size, 1000);
        assert_eq!(cfg.processing_timeout_secs, 60);
        assert_eq!(cfg.keepalive_interval_secs, 30);
        assert_eq!(cfg.port, 8080);
    }

    #[test]
    #[serial]
    fn unprefixed_env_var_overrides_default() {
        std::env::set_var("MAX_QUEUE_SIZE", "42");
        let cfg = BrokerConfig::load().expect("config should load");
        assert_eq!(cfg.max_queue_size, 42);
        std::env::remove_var("MAX_QUEUE_SIZE");
    }
}
