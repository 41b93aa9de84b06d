//! Error types for the customer feature store.
//!
//! Every error carries:
//! - A stable numeric code for scripts
//! - A category for grouping
//! - A recoverability hint
//! - A remediation line for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Data Key Not Configured
//!   Reason: no data path configured for key: test_task_data
//!   Fix: Add the key under the `data:` section of config.yaml.
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for feature store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration document errors.
    Config,
    /// Missing files, keys, or registered objects.
    NotFound,
    /// Input data does not match the declared schema.
    Schema,
    /// Online store could not be reached.
    Storage,
    /// Reading or writing data failed.
    DataAccess,
    /// Metadata catalog errors.
    Registry,
    /// Invalid caller input.
    Usage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Schema => write!(f, "schema"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::DataAccess => write!(f, "data_access"),
            ErrorCategory::Registry => write!(f, "registry"),
            ErrorCategory::Usage => write!(f, "usage"),
        }
    }
}

/// Unified error type for the feature store.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no data path configured for key: {key}")]
    DataKeyNotFound { key: String },

    // Lookup errors (20-29)
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    // Schema errors (30-39)
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    // Storage errors (40-49)
    #[error("online store unavailable: {0}")]
    StorageUnavailable(String),

    // Data access errors (50-59)
    #[error("data access error: {0}")]
    DataAccess(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // Registry errors (60-69)
    #[error("registry error: {0}")]
    Registry(String),

    // Usage errors (70-79)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Shorthand for a missing registered object.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// - 10-19: Configuration
    /// - 20-29: Not found
    /// - 30-39: Schema
    /// - 40-49: Storage availability
    /// - 50-59: Data access and serialization
    /// - 60-69: Registry
    /// - 70-79: Usage
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::DataKeyNotFound { .. } => 11,
            Error::FileNotFound { .. } => 20,
            Error::NotFound { .. } => 21,
            Error::SchemaMismatch(_) => 30,
            Error::StorageUnavailable(_) => 40,
            Error::DataAccess(_) => 50,
            Error::Io(_) => 51,
            Error::Json(_) => 52,
            Error::Yaml(_) => 53,
            Error::Registry(_) => 60,
            Error::InvalidArgument(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::DataKeyNotFound { .. } | Error::Yaml(_) => {
                ErrorCategory::Config
            }
            Error::FileNotFound { .. } | Error::NotFound { .. } => ErrorCategory::NotFound,
            Error::SchemaMismatch(_) => ErrorCategory::Schema,
            Error::StorageUnavailable(_) => ErrorCategory::Storage,
            Error::DataAccess(_) | Error::Io(_) | Error::Json(_) => ErrorCategory::DataAccess,
            Error::Registry(_) => ErrorCategory::Registry,
            Error::InvalidArgument(_) => ErrorCategory::Usage,
        }
    }

    /// Returns whether retrying (possibly after fixing the environment) can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::StorageUnavailable(_) => true,
            Error::Io(_) => true,
            Error::FileNotFound { .. } => true,
            Error::NotFound { .. } => true,
            Error::Config(_) | Error::DataKeyNotFound { .. } | Error::Yaml(_) => true,
            Error::SchemaMismatch(_) => false,
            Error::DataAccess(_) => false,
            Error::Json(_) => false,
            Error::Registry(_) => false,
            Error::InvalidArgument(_) => true,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Check config.yaml syntax, or point --config / CFS_CONFIG at a valid file."
            }
            Error::DataKeyNotFound { .. } => {
                "Add the key under the `data:` section of config.yaml."
            }
            Error::Yaml(_) => "Fix the YAML syntax in the configuration file.",
            Error::FileNotFound { .. } => {
                "Check the configured data path. Run 'cfs convert' to produce the Parquet source."
            }
            Error::NotFound { .. } => {
                "Run 'cfs apply' to register the feature definitions, then retry."
            }
            Error::SchemaMismatch(_) => {
                "Make sure the input has purchase_timestamp, customer_id, purchase_value and loyalty_score columns with parseable values."
            }
            Error::StorageUnavailable(_) => {
                "Start the online store (e.g. redis-server) or switch feature_store.online_store to sqlite."
            }
            Error::DataAccess(_) => {
                "The offline source could not be read. Re-run 'cfs convert' to rebuild it."
            }
            Error::Io(_) => "Check disk space and permissions on the feature repository.",
            Error::Json(_) => "The registry file is corrupted. Delete it and run 'cfs apply'.",
            Error::Registry(_) => "Fix the feature definitions and run 'cfs apply' again.",
            Error::InvalidArgument(_) => "Check the command arguments with --help.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::DataKeyNotFound { .. } => "Data Key Not Configured",
            Error::Yaml(_) => "YAML Parse Error",
            Error::FileNotFound { .. } => "File Not Found",
            Error::NotFound { .. } => "Not Registered",
            Error::SchemaMismatch(_) => "Schema Mismatch",
            Error::StorageUnavailable(_) => "Online Store Unavailable",
            Error::DataAccess(_) => "Data Access Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::Registry(_) => "Registry Error",
            Error::InvalidArgument(_) => "Invalid Argument",
        }
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        red = red,
        cyan = cyan,
        reset = reset,
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Config("test".into()).code(), 10);
        assert_eq!(Error::not_found("feature view", "x").code(), 21);
        assert_eq!(Error::StorageUnavailable("down".into()).code(), 40);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::DataKeyNotFound { key: "k".into() }.category(),
            ErrorCategory::Config
        );
        assert_eq!(
            Error::SchemaMismatch("bad".into()).category(),
            ErrorCategory::Schema
        );
        assert_eq!(
            Error::FileNotFound {
                path: PathBuf::from("/nope")
            }
            .category(),
            ErrorCategory::NotFound
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("feature view", "customer_features");
        assert_eq!(err.to_string(), "feature view not found: customer_features");
    }

    #[test]
    fn test_format_error_human_plain() {
        let err = Error::DataKeyNotFound {
            key: "test_task_data".into(),
        };
        let out = format_error_human(&err, false);
        assert!(out.starts_with("✗ Data Key Not Configured"));
        assert!(out.contains("Reason: no data path configured for key: test_task_data"));
        assert!(out.contains("Fix:"));
        assert!(!out.contains("\x1b["));
    }

    #[test]
    fn test_storage_unavailable_is_recoverable() {
        assert!(Error::StorageUnavailable("refused".into()).is_recoverable());
        assert!(!Error::SchemaMismatch("x".into()).is_recoverable());
    }
}
