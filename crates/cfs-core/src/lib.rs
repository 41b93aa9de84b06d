//! Customer Feature Store Core Library
//!
//! This library provides the feature store itself:
//! - Exit codes for CLI operations
//! - Structured logging setup
//! - Entity, source, and feature view definitions plus the JSON registry
//! - SQLite and Redis online stores
//! - The engine: materialization and point-in-time retrieval
//! - The Redis maintenance side channel
//! - `FeatureService`, the operations behind each CLI command
//!
//! The binary entry point is in `main.rs`.

pub mod engine;
pub mod exit_codes;
pub mod logging;
pub mod online;
pub mod registry;
pub mod service;
pub mod side_channel;

pub use engine::{
    EntityFrame, EntityRow, FeatureStoreEngine, LocalFeatureStore, MaterializationReport,
};
pub use exit_codes::ExitCode;
pub use online::{OnlineRow, OnlineStore, RedisOnlineStore, SqliteOnlineStore};
pub use registry::{ApplyReport, Registry, RepoObjects};
pub use service::FeatureService;
pub use side_channel::{ConnectionState, KeyValueAdmin, RedisSideChannel, SideChannelOutcome};
