//! Exit codes for the `cfs` CLI.
//!
//! Ranges:
//! - 0: success
//! - 10-19: user or environment errors (fixable by the caller)
//! - 20-29: internal and data errors

use cfs_common::Error;

/// Stable process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Invalid arguments or malformed input values
    ArgsError = 10,
    /// Configuration file missing, unparsable, or incomplete
    ConfigError = 11,
    /// Referenced file, feature view, entity, or feature does not exist
    NotFound = 12,
    /// Data does not match the declared schema
    SchemaError = 13,
    /// Online store cannot be reached
    StorageUnavailable = 14,

    /// Registry corruption or internal error
    InternalError = 20,
    /// I/O, serialization, or data access failure
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }

    /// Fixable by the caller (codes 10-19).
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&self.as_i32())
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Success => "OK",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::SchemaError => "ERR_SCHEMA",
            ExitCode::StorageUnavailable => "ERR_STORAGE_UNAVAILABLE",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::InvalidArgument(_) => ExitCode::ArgsError,
            Error::Config(_) | Error::DataKeyNotFound { .. } | Error::Yaml(_) => {
                ExitCode::ConfigError
            }
            Error::FileNotFound { .. } | Error::NotFound { .. } => ExitCode::NotFound,
            Error::SchemaMismatch(_) => ExitCode::SchemaError,
            Error::StorageUnavailable(_) => ExitCode::StorageUnavailable,
            Error::Registry(_) => ExitCode::InternalError,
            Error::DataAccess(_) | Error::Io(_) | Error::Json(_) => ExitCode::IoError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            ExitCode::from(&Error::InvalidArgument("x".into())),
            ExitCode::ArgsError
        );
        assert_eq!(
            ExitCode::from(&Error::DataKeyNotFound { key: "k".into() }),
            ExitCode::ConfigError
        );
        assert_eq!(
            ExitCode::from(&Error::not_found("feature view", "v")),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from(&Error::StorageUnavailable("down".into())),
            ExitCode::StorageUnavailable
        );
        assert_eq!(
            ExitCode::from(&Error::Io(std::io::Error::other("disk"))),
            ExitCode::IoError
        );
    }

    #[test]
    fn test_ranges_and_display() {
        assert!(ExitCode::Success.is_success());
        assert!(ExitCode::SchemaError.is_user_error());
        assert!(!ExitCode::InternalError.is_user_error());
        assert_eq!(ExitCode::NotFound.to_string(), "ERR_NOT_FOUND (12)");
        assert_eq!(i32::from(ExitCode::IoError), 21);
    }
}
