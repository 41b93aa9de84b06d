//! Customer feature store common types, configuration, and errors.
//!
//! This crate provides the pieces shared by the offline and core crates:
//! - Typed settings loaded once per process
//! - The unified error type with stable codes
//! - Entity keys, feature dtypes, values, and references
//! - Timestamp parsing with a configurable source timezone

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::{
    ConfigResolution, ConfigResolver, ConfigSource, OnlineStoreSettings, RedisSettings, Settings,
    FEATURE_REPO_KEY, SOURCE_DATA_KEY,
};
pub use error::{format_error_human, Error, ErrorCategory, Result};
pub use types::{EntityKey, FeatureDtype, FeatureRef, FeatureValue, ValueType};
