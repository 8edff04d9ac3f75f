//! Configuration management.

use std::time::Duration;

use serde::Deserialize;

use crate::telemetry::LoggingConfig;
use crate::workspace::{DeliveryMode, MissingTimestampPolicy};

/// Prefix of environment variables overriding the configuration.
pub const ENV_PREFIX: &str = "DATASPACE";

/// Client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Defaults for workspaces created by the client
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Where to connect; `None` lets the transport pick
    pub locator: Option<String>,

    pub user: Option<String>,

    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Where listeners and evals run
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Deadline for a get; `None` waits for the final reply
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Option<Duration>,

    /// Handling of query replies without a timestamp
    #[serde(default)]
    pub missing_timestamp: MissingTimestampPolicy,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            delivery: DeliveryMode::default(),
            query_timeout: default_query_timeout(),
            missing_timestamp: MissingTimestampPolicy::default(),
        }
    }
}

// Default value functions
fn default_query_timeout() -> Option<Duration> {
    None
}

impl ClientConfig {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: ClientConfig = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: ClientConfig = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.workspace.delivery, DeliveryMode::Inline);
        assert_eq!(config.workspace.query_timeout, None);
        assert_eq!(config.workspace.missing_timestamp, MissingTimestampPolicy::Synthesize);
        assert!(config.session.locator.is_none());
    }

    #[test]
    fn test_workspace_section_from_json() {
        let ws: WorkspaceConfig = serde_json::from_str(
            r#"{"delivery": "detached", "query_timeout": "1s 500ms", "missing_timestamp": "reject"}"#,
        )
        .unwrap();
        assert_eq!(ws.delivery, DeliveryMode::Detached);
        assert_eq!(ws.query_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(ws.missing_timestamp, MissingTimestampPolicy::Reject);
    }
}
