//! Customer feature store offline storage.
//!
//! This crate provides:
//! - Arrow schema definitions for the purchase dataset
//! - CSV to Parquet conversion with enforced column types
//! - A typed reader over the Parquet offline source
//! - Arrow table builders for retrieval results

pub mod converter;
pub mod error;
pub mod schema;
pub mod source;
pub mod table;

pub use converter::{
    convert_csv_to_parquet, default_parquet_path, inspect_parquet, ConversionReport,
    ConvertOptions,
};
pub use error::OfflineError;
pub use schema::{CUSTOMER_ID, LOYALTY_SCORE, PURCHASE_TIMESTAMP, PURCHASE_VALUE};
pub use source::{filter_range, OfflineSource, SourceRecord, SourceSpec};
pub use table::{feature_column, key_column, render, FeatureTableBuilder};

/// Default rows per CSV read batch.
pub const DEFAULT_BATCH_SIZE: usize = 8192;
