//! Error handling for the data space client.
//!
//! This module provides:
//! - A single crate error type with machine-readable codes and context
//! - Severity-driven logging through `tracing`
//! - Error counters through the `metrics` facade
//! - An extension trait for attaching context to foreign errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use dataspace_core::error::{DataspaceError, Result, ErrorContext};
//!
//! fn load() -> Result<Vec<u8>> {
//!     std::fs::read("values.bin").context("Failed to read values")
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for data space operations.
pub type Result<T> = std::result::Result<T, DataspaceError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by callers for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation Errors (1000-1099)
    InvalidPath,
    InvalidSelector,
    InvalidProperties,

    // Transport Errors (2000-2099)
    TransportFailed,
    SessionClosed,
    QueryTimeout,
    QueryCancelled,

    // Decode Errors (3000-3099)
    DecodeFailed,
    UnknownEncoding,
    MissingTimestamp,

    // Registration Errors (4000-4099)
    RegistrationConflict,
    NotRegistered,

    // Listener Errors (5000-5099)
    ListenerFault,

    // Configuration Errors (6000-6099)
    ConfigurationError,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidPath => 1000,
            Self::InvalidSelector => 1001,
            Self::InvalidProperties => 1002,

            Self::TransportFailed => 2000,
            Self::SessionClosed => 2001,
            Self::QueryTimeout => 2002,
            Self::QueryCancelled => 2003,

            Self::DecodeFailed => 3000,
            Self::UnknownEncoding => 3001,
            Self::MissingTimestamp => 3002,

            Self::RegistrationConflict => 4000,
            Self::NotRegistered => 4001,

            Self::ListenerFault => 5000,

            Self::ConfigurationError => 6000,

            Self::InternalError => 9000,
        }
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "validation",
            2000..=2099 => "transport",
            3000..=3099 => "decode",
            4000..=4099 => "registration",
            5000..=5099 => "listener",
            6000..=6099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad path, bad selector)
    Low,
    /// Data-level issues scoped to one datum
    Medium,
    /// Transport and listener failures
    High,
    /// Broken internal invariants
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidPath
            | ErrorCode::InvalidSelector
            | ErrorCode::InvalidProperties
            | ErrorCode::RegistrationConflict
            | ErrorCode::NotRegistered
            | ErrorCode::QueryCancelled => Self::Low,

            ErrorCode::DecodeFailed
            | ErrorCode::UnknownEncoding
            | ErrorCode::MissingTimestamp
            | ErrorCode::QueryTimeout => Self::Medium,

            ErrorCode::TransportFailed
            | ErrorCode::SessionClosed
            | ErrorCode::ListenerFault
            | ErrorCode::ConfigurationError => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Path or selector the error relates to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Failure code reported by the transport collaborator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_code: Option<i32>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_transport_code(mut self, code: i32) -> Self {
        self.transport_code = Some(code);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the data space client.
///
/// This error type supports:
/// - Structured error codes
/// - Error chaining with context
/// - User-facing vs internal messages
/// - Metrics integration
#[derive(Error, Debug)]
pub struct DataspaceError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Message safe to show to callers
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for DataspaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl DataspaceError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Whether this error was produced by the transport collaborator.
    pub fn is_transport(&self) -> bool {
        self.code.category() == "transport"
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "dataspace_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| DataspaceError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| DataspaceError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| DataspaceError::new(ErrorCode::NotRegistered, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| DataspaceError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<serde_json::Error> for DataspaceError {
    fn from(error: serde_json::Error) -> Self {
        Self::with_internal(ErrorCode::DecodeFailed, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for DataspaceError {
    fn from(error: config::ConfigError) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Failed to load configuration",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for DataspaceError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::new(ErrorCode::QueryTimeout, "Query did not complete before its deadline")
            .with_source(error)
    }
}

impl From<crate::net::TransportError> for DataspaceError {
    fn from(error: crate::net::TransportError) -> Self {
        let code = match &error {
            crate::net::TransportError::Closed => ErrorCode::SessionClosed,
            _ => ErrorCode::TransportFailed,
        };
        let details = match error.code() {
            Some(c) => ErrorDetails::new().with_transport_code(c),
            None => ErrorDetails::new(),
        };
        Self::with_internal(code, "Transport operation failed", error.to_string())
            .with_details(details)
            .with_source(error)
    }
}

impl From<crate::value::DecodeError> for DataspaceError {
    fn from(error: crate::value::DecodeError) -> Self {
        let code = match &error {
            crate::value::DecodeError::UnknownEncoding(_) => ErrorCode::UnknownEncoding,
            _ => ErrorCode::DecodeFailed,
        };
        Self::with_internal(code, "Failed to decode value", error.to_string()).with_source(error)
    }
}

impl From<crate::net::HandleError> for DataspaceError {
    fn from(error: crate::net::HandleError) -> Self {
        let code = match &error {
            crate::net::HandleError::Unknown { .. } => ErrorCode::NotRegistered,
            crate::net::HandleError::Exhausted { .. } => ErrorCode::InternalError,
        };
        Self::with_internal(code, "Listener handle unavailable", error.to_string()).with_source(error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors
// ═══════════════════════════════════════════════════════════════════════════════

impl DataspaceError {
    // ─────────────────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an invalid path error, reporting the offending byte index if any.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>, index: Option<usize>) -> Self {
        let path = path.into();
        let error = Self::new(
            ErrorCode::InvalidPath,
            format!("Invalid path: {} ({})", path, reason.into()),
        )
        .with_details(ErrorDetails::new().with_resource(&path));
        match index {
            Some(i) => error.with_context("index", i),
            None => error,
        }
    }

    /// Create an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        let selector = selector.into();
        Self::new(
            ErrorCode::InvalidSelector,
            format!("Invalid selector: {} ({})", selector, reason.into()),
        )
        .with_details(ErrorDetails::new().with_resource(&selector))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Wrap a transport failure for an operation on a resource.
    pub fn transport(
        operation: &'static str,
        resource: impl Into<String>,
        cause: crate::net::TransportError,
    ) -> Self {
        let resource = resource.into();
        let message = format!("{} on {} failed", operation, resource);
        let mut error = Self::from(cause);
        error.user_message = Cow::Owned(message);
        error.details.resource = Some(resource);
        error
    }

    /// Create an error for an operation on a closed session.
    pub fn session_closed(operation: &'static str) -> Self {
        Self::new(ErrorCode::SessionClosed, format!("{} on a closed session", operation))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a registration conflict error for an encoding id.
    pub fn registration_conflict(encoding: u8) -> Self {
        Self::new(
            ErrorCode::RegistrationConflict,
            format!("Already registered ValueDecoder for Encoding {}", encoding),
        )
        .with_context("encoding", encoding)
    }

    /// Create an error for a resource that has no registration.
    pub fn not_registered(what: &'static str, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorCode::NotRegistered, format!("No {} registered for {}", what, resource))
            .with_details(ErrorDetails::new().with_resource(&resource))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TransportError;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::InvalidPath.category(), "validation");
        assert_eq!(ErrorCode::TransportFailed.category(), "transport");
        assert_eq!(ErrorCode::UnknownEncoding.category(), "decode");
        assert_eq!(ErrorCode::RegistrationConflict.category(), "registration");
        assert_eq!(ErrorCode::ListenerFault.category(), "listener");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_invalid_path_reports_index() {
        let error = DataspaceError::invalid_path("/a/b*", "forbidden character at index 4", Some(4));
        assert_eq!(error.code(), ErrorCode::InvalidPath);
        assert_eq!(error.details().context.get("index"), Some(&serde_json::json!(4)));
        assert_eq!(error.details().resource.as_deref(), Some("/a/b*"));
    }

    #[test]
    fn test_transport_error_keeps_code() {
        let error = DataspaceError::transport("Put", "/demo/a", TransportError::Failed { code: 7, name: "IO".into() });
        assert_eq!(error.code(), ErrorCode::TransportFailed);
        assert_eq!(error.details().transport_code, Some(7));
        assert!(error.user_message().contains("Put on /demo/a failed"));
        assert!(error.is_transport());
    }

    #[test]
    fn test_closed_transport_maps_to_session_closed() {
        let error = DataspaceError::from(TransportError::Closed);
        assert_eq!(error.code(), ErrorCode::SessionClosed);
    }

    #[test]
    fn test_error_context() {
        let error = DataspaceError::new(ErrorCode::DecodeFailed, "bad payload")
            .with_context("encoding", 6)
            .with_context("path", "/a");

        assert!(error.details().context.contains_key("encoding"));
        assert!(error.details().context.contains_key("path"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::InvalidSelector), ErrorSeverity::Low);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::DecodeFailed), ErrorSeverity::Medium);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::TransportFailed), ErrorSeverity::High);
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::InternalError), ErrorSeverity::Critical);
    }

    #[test]
    fn test_option_context() {
        let missing: Option<u8> = None;
        let error = missing.context("no eval registered").unwrap_err();
        assert_eq!(error.code(), ErrorCode::NotRegistered);
    }

    #[test]
    fn test_error_display() {
        let error = DataspaceError::with_internal(
            ErrorCode::TransportFailed,
            "Query on /demo/** failed",
            "connection reset",
        );

        let display = format!("{}", error);
        assert!(display.contains("TransportFailed"));
        assert!(display.contains("Query on /demo/** failed"));
        assert!(display.contains("connection reset"));
    }
}
