//! Feature store engine: registry, materialization, and retrieval.
//!
//! `FeatureStoreEngine` is the seam the service layer talks to.
//! `LocalFeatureStore` implements it over a JSON registry file, the Parquet
//! offline source, and an `OnlineStore` backend.

pub mod local;
pub mod retrieval;

use std::fmt;

use arrow::array::RecordBatch;
use cfs_common::{EntityKey, FeatureRef, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registry::{ApplyReport, RegisteredFeatureView, RepoObjects};

pub use local::LocalFeatureStore;
pub use retrieval::{earliest_per_entity, latest_per_entity, PointInTimeIndex};

/// Column name of the entity timestamp in historical results.
pub const EVENT_TIMESTAMP: &str = "event_timestamp";

/// One entity at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub entity_key: EntityKey,
    pub event_timestamp: DateTime<Utc>,
}

/// The left side of a point-in-time join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFrame {
    pub join_key: String,
    pub rows: Vec<EntityRow>,
}

impl EntityFrame {
    pub fn new(join_key: impl Into<String>, rows: Vec<EntityRow>) -> Self {
        EntityFrame {
            join_key: join_key.into(),
            rows,
        }
    }

    pub fn from_pairs(
        join_key: impl Into<String>,
        pairs: impl IntoIterator<Item = (EntityKey, DateTime<Utc>)>,
    ) -> Self {
        let rows = pairs
            .into_iter()
            .map(|(entity_key, event_timestamp)| EntityRow {
                entity_key,
                event_timestamp,
            })
            .collect();
        EntityFrame::new(join_key, rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of materializing one feature view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializationReport {
    pub feature_view: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rows_scanned: usize,
    pub entities: usize,
    pub rows_written: usize,
    /// Nothing to do: the watermark is already at or past `end`.
    pub up_to_date: bool,
}

impl fmt::Display for MaterializationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.up_to_date {
            return write!(f, "{}: up to date (end {})", self.feature_view, self.end);
        }
        write!(
            f,
            "{}: {} to {}, {} rows scanned, {} entities, {} written",
            self.feature_view,
            self.start,
            self.end,
            self.rows_scanned,
            self.entities,
            self.rows_written
        )
    }
}

/// Operations a feature store engine provides.
pub trait FeatureStoreEngine {
    /// Register entities, sources, and feature views. Idempotent.
    fn apply(&mut self, objects: &RepoObjects) -> Result<ApplyReport>;

    /// Load `[start, end]` into the online store. Empty `feature_views`
    /// means every online view.
    fn materialize(
        &mut self,
        feature_views: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MaterializationReport>>;

    /// Load everything since each view's watermark up to `end`.
    fn materialize_incremental(&mut self, end: DateTime<Utc>)
        -> Result<Vec<MaterializationReport>>;

    /// Point-in-time join of `entity_frame` against the offline source.
    fn get_historical_features(
        &self,
        entity_frame: &EntityFrame,
        features: &[FeatureRef],
    ) -> Result<RecordBatch>;

    /// Latest materialized values, one row per key in request order.
    fn get_online_features(
        &self,
        entity_keys: &[EntityKey],
        features: &[FeatureRef],
    ) -> Result<RecordBatch>;

    fn list_feature_views(&self) -> Result<Vec<RegisteredFeatureView>>;

    /// Forget every recorded materialization interval. Used after the
    /// online data was wiped outside the engine. Returns the views reset.
    fn forget_materializations(&mut self) -> Result<Vec<String>>;
}
