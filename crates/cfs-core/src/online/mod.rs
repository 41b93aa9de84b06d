//! Online stores: latest feature values per entity, keyed for fast lookup.
//!
//! Writes never replace a stored row with an older one, so re-running a
//! materialization over the same window leaves the store unchanged.

pub mod redis;
pub mod sqlite;

use std::collections::BTreeMap;

use cfs_common::{EntityKey, FeatureValue, OnlineStoreSettings, Result, Settings};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::redis::RedisOnlineStore;
pub use self::sqlite::SqliteOnlineStore;

/// Latest known values for one entity in one feature view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineRow {
    pub entity_key: EntityKey,
    pub event_timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, FeatureValue>,
}

impl OnlineRow {
    /// Value of `feature`, null when absent.
    pub fn value(&self, feature: &str) -> FeatureValue {
        self.values.get(feature).cloned().unwrap_or_default()
    }

    /// Keep only the named features.
    pub fn project(mut self, features: &[String]) -> Self {
        self.values.retain(|name, _| features.iter().any(|f| f == name));
        self
    }
}

/// Key-value backend for materialized features.
pub trait OnlineStore: Send {
    fn name(&self) -> &'static str;

    /// Upsert rows for a view. Returns how many rows were actually stored;
    /// rows older than what is already stored are skipped.
    fn write_batch(&mut self, feature_view: &str, rows: &[OnlineRow]) -> Result<usize>;

    /// One slot per requested key, in request order.
    fn read(
        &self,
        feature_view: &str,
        keys: &[EntityKey],
        features: &[String],
    ) -> Result<Vec<Option<OnlineRow>>>;

    /// Drop every row of a view.
    fn clear(&mut self, feature_view: &str) -> Result<()>;
}

/// Open the online store selected in settings.
pub fn open_online_store(settings: &Settings) -> Result<Box<dyn OnlineStore>> {
    let project = settings.feature_store.project.clone();
    match &settings.feature_store.online_store {
        OnlineStoreSettings::Sqlite { .. } => {
            let path = settings.sqlite_online_store_path()?.ok_or_else(|| {
                cfs_common::Error::Config("sqlite online store has no path".to_string())
            })?;
            Ok(Box::new(SqliteOnlineStore::open(&path, project)?))
        }
        OnlineStoreSettings::Redis => Ok(Box::new(RedisOnlineStore::new(
            &settings.redis,
            project,
        )?)),
    }
}
