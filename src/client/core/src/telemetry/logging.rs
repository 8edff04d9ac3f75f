//! Structured logging with JSON/pretty/compact formats and redaction of
//! credentials.
//!
//! - Per-module log levels on top of a global `EnvFilter` level
//! - Redaction of login secrets before they reach a log line

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::addressing::Properties;

/// Global redactor instance.
static REDACTOR: OnceLock<SensitiveFieldRedactor> = OnceLock::new();

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels, e.g. `dataspace_core::net = "trace"`
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default)]
    pub include_location: bool,

    /// Whether to include thread names; useful to tell delivery threads apart
    #[serde(default = "default_include_thread")]
    pub include_thread: bool,

    /// Redaction configuration
    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: false,
            include_thread: default_include_thread(),
            redaction: RedactionConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

/// Configuration for sensitive data redaction.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_enabled")]
    pub enabled: bool,

    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,

    #[serde(default = "default_redaction_replacement")]
    pub replacement: String,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_redaction_enabled(),
            patterns: default_redaction_patterns(),
            replacement: default_redaction_replacement(),
        }
    }
}

/// A pattern for identifying sensitive data.
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,

    /// Field names to match (case-insensitive, substring)
    #[serde(default)]
    pub field_names: Vec<String>,

    /// Regex matched against values
    #[serde(default)]
    pub value_pattern: Option<String>,
}

/// Masks sensitive fields before they are logged.
#[derive(Debug, Clone)]
pub struct SensitiveFieldRedactor {
    field_names: Vec<String>,
    value_patterns: Vec<regex::Regex>,
    replacement: String,
    enabled: bool,
}

impl SensitiveFieldRedactor {
    pub fn new(config: &RedactionConfig) -> Self {
        let field_names = config
            .patterns
            .iter()
            .flat_map(|p| p.field_names.iter().map(|s| s.to_lowercase()))
            .collect();
        let value_patterns = config
            .patterns
            .iter()
            .filter_map(|p| p.value_pattern.as_ref())
            .filter_map(|pat| regex::Regex::new(pat).ok())
            .collect();

        Self {
            field_names,
            value_patterns,
            replacement: config.replacement.clone(),
            enabled: config.enabled,
        }
    }

    pub fn should_redact_field(&self, field_name: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let lower = field_name.to_lowercase();
        self.field_names.iter().any(|f| lower.contains(f.as_str()))
    }

    pub fn redact_value(&self, value: &str) -> String {
        if !self.enabled {
            return value.to_string();
        }
        self.value_patterns
            .iter()
            .fold(value.to_string(), |acc, re| {
                re.replace_all(&acc, self.replacement.as_str()).into_owned()
            })
    }

    /// Redact a field value, checking both field name and value patterns.
    pub fn redact(&self, field_name: &str, value: &str) -> String {
        if self.should_redact_field(field_name) {
            return self.replacement.clone();
        }
        self.redact_value(value)
    }

    /// Text form of `properties` with sensitive entries masked.
    pub fn redact_properties(&self, properties: &Properties) -> String {
        properties
            .iter()
            .map(|(k, v)| (k, self.redact(k, v)))
            .collect::<Properties>()
            .to_string()
    }

    /// The redactor installed by [`init_logging`], or a default one.
    pub fn global() -> &'static SensitiveFieldRedactor {
        REDACTOR.get_or_init(|| SensitiveFieldRedactor::new(&RedactionConfig::default()))
    }
}

fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_thread() -> bool {
    true
}

fn default_redaction_enabled() -> bool {
    true
}

fn default_redaction_replacement() -> String {
    "[REDACTED]".to_string()
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern {
            name: "passwords".to_string(),
            field_names: vec![
                "password".to_string(),
                "passwd".to_string(),
                "secret".to_string(),
            ],
            value_pattern: None,
        },
        RedactionPattern {
            name: "tokens".to_string(),
            field_names: vec!["token".to_string(), "authorization".to_string()],
            value_pattern: Some(r"eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+".to_string()),
        },
        RedactionPattern {
            name: "locator_credentials".to_string(),
            field_names: Vec::new(),
            // user:password@ in a locator
            value_pattern: Some(r"[^/@:\s]+:[^/@\s]+@".to_string()),
        },
    ]
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a level directive is invalid or a subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let _ = REDACTOR.set(SensitiveFieldRedactor::new(&config.redaction));

    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_names(config.include_thread),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_names(config.include_thread),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .with_thread_names(config.include_thread),
            )
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_redaction() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        assert!(redactor.should_redact_field("password"));
        assert!(redactor.should_redact_field("DB_PASSWORD"));
        assert!(redactor.should_redact_field("access_token"));
        assert!(!redactor.should_redact_field("user"));
    }

    #[test]
    fn test_locator_credentials_masked() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        assert_eq!(
            redactor.redact_value("tcp/alice:hunter2@10.0.0.1:7447"),
            "tcp/[REDACTED]10.0.0.1:7447"
        );
        assert_eq!(redactor.redact_value("tcp/10.0.0.1:7447"), "tcp/10.0.0.1:7447");
    }

    #[test]
    fn test_redact_properties() {
        let redactor = SensitiveFieldRedactor::new(&RedactionConfig::default());
        let props = Properties::new().with("user", "alice").with("password", "hunter2");
        assert_eq!(redactor.redact_properties(&props), "password=[REDACTED];user=alice");
    }

    #[test]
    fn test_disabled_redaction() {
        let config = RedactionConfig {
            enabled: false,
            ..Default::default()
        };
        let redactor = SensitiveFieldRedactor::new(&config);
        assert_eq!(redactor.redact("password", "hunter2"), "hunter2");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Compact);
        assert!(config.include_thread);
        assert!(config.redaction.enabled);
    }
}
