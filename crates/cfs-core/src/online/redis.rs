//! Redis online store.
//!
//! Each entity row is one hash at `<project>:<view>:<entity>`, holding one
//! JSON-encoded field per feature plus `_ts` (event micros) and `_key`.
//! Connections are opened per call so a Redis outage surfaces as
//! `StorageUnavailable` on the operation that needed it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use cfs_common::{EntityKey, Error, FeatureValue, RedisSettings, Result};
use redis::{Client, Commands, Connection, RedisError};
use tracing::{debug, warn};

use super::{OnlineRow, OnlineStore};

const TS_FIELD: &str = "_ts";
const KEY_FIELD: &str = "_key";

pub struct RedisOnlineStore {
    client: Client,
    project: String,
    timeout: Duration,
}

impl RedisOnlineStore {
    /// Builds the client only; nothing is contacted until the first call.
    pub fn new(settings: &RedisSettings, project: impl Into<String>) -> Result<Self> {
        let client = Client::open(settings.url())
            .map_err(|e| Error::Config(format!("invalid redis url {}: {}", settings.url(), e)))?;
        Ok(RedisOnlineStore {
            client,
            project: project.into(),
            timeout: Duration::from_millis(settings.connect_timeout_ms),
        })
    }

    fn connection(&self) -> Result<Connection> {
        self.client
            .get_connection_with_timeout(self.timeout)
            .map_err(redis_err)
    }

    fn hash_key(&self, feature_view: &str, key: &EntityKey) -> String {
        format!("{}:{}:{}", self.project, feature_view, key.storage_key())
    }
}

impl OnlineStore for RedisOnlineStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn write_batch(&mut self, feature_view: &str, rows: &[OnlineRow]) -> Result<usize> {
        let mut con = self.connection()?;
        let mut written = 0;
        for row in rows {
            let key = self.hash_key(feature_view, &row.entity_key);
            let ts = row.event_timestamp.timestamp_micros();
            let stored: Option<i64> = con.hget(&key, TS_FIELD).map_err(redis_err)?;
            if stored.is_some_and(|s| s >= ts) {
                continue;
            }

            let mut fields: Vec<(String, String)> = Vec::with_capacity(row.values.len() + 2);
            fields.push((TS_FIELD.to_string(), ts.to_string()));
            fields.push((KEY_FIELD.to_string(), serde_json::to_string(&row.entity_key)?));
            for (name, value) in &row.values {
                fields.push((name.clone(), serde_json::to_string(value)?));
            }
            let _: () = redis::cmd("HSET")
                .arg(&key)
                .arg(&fields)
                .query(&mut con)
                .map_err(redis_err)?;
            written += 1;
        }
        debug!(feature_view, rows = rows.len(), written, "redis write_batch");
        Ok(written)
    }

    fn read(
        &self,
        feature_view: &str,
        keys: &[EntityKey],
        features: &[String],
    ) -> Result<Vec<Option<OnlineRow>>> {
        let mut con = self.connection()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let hash: HashMap<String, String> = con
                .hgetall(self.hash_key(feature_view, key))
                .map_err(redis_err)?;
            out.push(decode_hash(key, hash, features)?);
        }
        Ok(out)
    }

    fn clear(&mut self, feature_view: &str) -> Result<()> {
        let mut con = self.connection()?;
        let pattern = format!("{}:{}:*", self.project, feature_view);
        let keys: Vec<String> = con
            .scan_match::<_, String>(&pattern)
            .map_err(redis_err)?
            .collect();
        if !keys.is_empty() {
            let _: () = con.del(&keys).map_err(redis_err)?;
        }
        debug!(feature_view, removed = keys.len(), "redis clear");
        Ok(())
    }
}

fn decode_hash(
    key: &EntityKey,
    mut hash: HashMap<String, String>,
    features: &[String],
) -> Result<Option<OnlineRow>> {
    let Some(raw_ts) = hash.remove(TS_FIELD) else {
        return Ok(None);
    };
    hash.remove(KEY_FIELD);
    let ts: i64 = raw_ts.parse().map_err(|_| {
        Error::DataAccess(format!("bad {} field {:?} for {}", TS_FIELD, raw_ts, key))
    })?;
    let event_timestamp = cfs_common::time::from_micros(ts)
        .ok_or_else(|| Error::DataAccess(format!("stored timestamp {} out of range", ts)))?;

    let mut values = BTreeMap::new();
    for name in features {
        if let Some(raw) = hash.get(name) {
            match serde_json::from_str::<FeatureValue>(raw) {
                Ok(value) => {
                    values.insert(name.clone(), value);
                }
                Err(e) => {
                    warn!(feature = %name, entity = %key, error = %e, "undecodable online value")
                }
            }
        }
    }
    Ok(Some(OnlineRow {
        entity_key: key.clone(),
        event_timestamp,
        values,
    }))
}

/// Connection-level failures mean the store is down; anything else is a data error.
pub(crate) fn redis_err(e: RedisError) -> Error {
    if e.is_connection_refusal() || e.is_io_error() || e.is_timeout() || e.is_connection_dropped()
    {
        Error::StorageUnavailable(format!("redis: {}", e))
    } else {
        Error::DataAccess(format!("redis: {}", e))
    }
}
