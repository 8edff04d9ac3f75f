//! Telemetry: structured logging and redaction.
//!
//! Counters are emitted through the `metrics` facade at the call sites
//! (`dataspace_errors_total`, `dataspace_dropped_replies_total`,
//! `dataspace_listener_faults_total`); installing an exporter is left to
//! the application.
//!
//! # Example
//!
//! ```rust,no_run
//! use dataspace_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{
    init_logging, LogFormat, LoggingConfig, RedactionConfig, RedactionPattern,
    SensitiveFieldRedactor,
};
