//! SQLite online store.
//!
//! One table holds every view. Values are stored as a JSON document so the
//! schema does not change when a feature view does.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cfs_common::{EntityKey, Error, FeatureValue, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OnlineRow, OnlineStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS online_features (
    project      TEXT    NOT NULL,
    feature_view TEXT    NOT NULL,
    entity_key   TEXT    NOT NULL,
    event_ts     INTEGER NOT NULL,
    payload      TEXT    NOT NULL,
    PRIMARY KEY (project, feature_view, entity_key)
);
";

const UPSERT: &str = "
INSERT INTO online_features (project, feature_view, entity_key, event_ts, payload)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT (project, feature_view, entity_key) DO UPDATE
SET event_ts = excluded.event_ts, payload = excluded.payload
WHERE excluded.event_ts > online_features.event_ts
";

#[derive(Serialize, Deserialize)]
struct Payload {
    entity_key: EntityKey,
    values: BTreeMap<String, FeatureValue>,
}

pub struct SqliteOnlineStore {
    conn: Connection,
    path: PathBuf,
    project: String,
}

impl SqliteOnlineStore {
    /// Open (or create) the database file.
    pub fn open(path: &Path, project: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            Error::StorageUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::init(conn, path.to_path_buf(), project.into())
    }

    /// Throwaway in-memory store.
    pub fn in_memory(project: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::init(conn, PathBuf::from(":memory:"), project.into())
    }

    fn init(conn: Connection, path: PathBuf, project: String) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(sql_err)?;
        debug!(path = %path.display(), "sqlite online store ready");
        Ok(SqliteOnlineStore {
            conn,
            path,
            project,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored rows for a view.
    pub fn count(&self, feature_view: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM online_features WHERE project = ?1 AND feature_view = ?2",
                params![self.project, feature_view],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

impl OnlineStore for SqliteOnlineStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn write_batch(&mut self, feature_view: &str, rows: &[OnlineRow]) -> Result<usize> {
        let tx = self.conn.transaction().map_err(sql_err)?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare_cached(UPSERT).map_err(sql_err)?;
            for row in rows {
                let payload = serde_json::to_string(&Payload {
                    entity_key: row.entity_key.clone(),
                    values: row.values.clone(),
                })?;
                written += stmt
                    .execute(params![
                        self.project,
                        feature_view,
                        row.entity_key.storage_key(),
                        row.event_timestamp.timestamp_micros(),
                        payload
                    ])
                    .map_err(sql_err)?;
            }
        }
        tx.commit().map_err(sql_err)?;
        debug!(feature_view, rows = rows.len(), written, "sqlite write_batch");
        Ok(written)
    }

    fn read(
        &self,
        feature_view: &str,
        keys: &[EntityKey],
        features: &[String],
    ) -> Result<Vec<Option<OnlineRow>>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT event_ts, payload FROM online_features \
                 WHERE project = ?1 AND feature_view = ?2 AND entity_key = ?3",
            )
            .map_err(sql_err)?;

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let found: Option<(i64, String)> = stmt
                .query_row(params![self.project, feature_view, key.storage_key()], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()
                .map_err(sql_err)?;
            let row = match found {
                Some((ts, payload)) => {
                    let payload: Payload = serde_json::from_str(&payload)?;
                    let event_timestamp = cfs_common::time::from_micros(ts).ok_or_else(|| {
                        Error::DataAccess(format!("stored timestamp {} out of range", ts))
                    })?;
                    Some(
                        OnlineRow {
                            entity_key: payload.entity_key,
                            event_timestamp,
                            values: payload.values,
                        }
                        .project(features),
                    )
                }
                None => None,
            };
            out.push(row);
        }
        Ok(out)
    }

    fn clear(&mut self, feature_view: &str) -> Result<()> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM online_features WHERE project = ?1 AND feature_view = ?2",
                params![self.project, feature_view],
            )
            .map_err(sql_err)?;
        debug!(feature_view, removed, "sqlite clear");
        Ok(())
    }
}

fn sql_err(e: rusqlite::Error) -> Error {
    Error::DataAccess(format!("sqlite: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn row(key: i64, hour: u32, value: f64) -> OnlineRow {
        OnlineRow {
            entity_key: EntityKey::Int64(key),
            event_timestamp: ts(hour),
            values: BTreeMap::from([
                ("purchase_value".to_string(), FeatureValue::Float64(value)),
                ("loyalty_score".to_string(), FeatureValue::Null),
            ]),
        }
    }

    fn names() -> Vec<String> {
        vec!["purchase_value".to_string(), "loyalty_score".to_string()]
    }

    #[test]
    fn test_write_then_read_in_request_order() {
        let mut store = SqliteOnlineStore::in_memory("p").unwrap();
        assert_eq!(store.write_batch("v", &[row(1, 1, 10.0), row(2, 2, 20.0)]).unwrap(), 2);

        let keys = [EntityKey::Int64(2), EntityKey::Int64(3), EntityKey::Int64(1)];
        let rows = store.read("v", &keys, &names()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].as_ref().unwrap().value("purchase_value"), FeatureValue::Float64(20.0));
        assert!(rows[1].is_none());
        assert_eq!(rows[2].as_ref().unwrap().event_timestamp, ts(1));
        assert_eq!(rows[2].as_ref().unwrap().value("loyalty_score"), FeatureValue::Null);
    }

    #[test]
    fn test_older_rows_do_not_overwrite() {
        let mut store = SqliteOnlineStore::in_memory("p").unwrap();
        store.write_batch("v", &[row(1, 5, 50.0)]).unwrap();
        assert_eq!(store.write_batch("v", &[row(1, 3, 30.0)]).unwrap(), 0);
        assert_eq!(store.write_batch("v", &[row(1, 5, 50.0)]).unwrap(), 0);
        assert_eq!(store.write_batch("v", &[row(1, 7, 70.0)]).unwrap(), 1);

        let rows = store.read("v", &[EntityKey::Int64(1)], &names()).unwrap();
        assert_eq!(rows[0].as_ref().unwrap().value("purchase_value"), FeatureValue::Float64(70.0));
    }

    #[test]
    fn test_read_projects_features() {
        let mut store = SqliteOnlineStore::in_memory("p").unwrap();
        store.write_batch("v", &[row(1, 1, 10.0)]).unwrap();
        let rows = store
            .read("v", &[EntityKey::Int64(1)], &["purchase_value".to_string()])
            .unwrap();
        assert_eq!(rows[0].as_ref().unwrap().values.len(), 1);
    }

    #[test]
    fn test_views_and_projects_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("online.db");
        let mut a = SqliteOnlineStore::open(&path, "a").unwrap();
        a.write_batch("v", &[row(1, 1, 10.0)]).unwrap();
        a.write_batch("w", &[row(1, 1, 11.0)]).unwrap();

        let b = SqliteOnlineStore::open(&path, "b").unwrap();
        assert!(b.read("v", &[EntityKey::Int64(1)], &names()).unwrap()[0].is_none());

        a.clear("v").unwrap();
        assert_eq!(a.count("v").unwrap(), 0);
        assert_eq!(a.count("w").unwrap(), 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("online.db");
        {
            let mut store = SqliteOnlineStore::open(&path, "p").unwrap();
            store.write_batch("v", &[row(9, 1, 1.5)]).unwrap();
        }
        let store = SqliteOnlineStore::open(&path, "p").unwrap();
        assert_eq!(store.count("v").unwrap(), 1);
        assert_eq!(store.path(), path.as_path());
    }
}
