//! Persisted registry of applied objects and materialization history.
//!
//! The registry is a single JSON document. Re-applying identical objects is
//! a no-op; changed definitions replace the stored ones while keeping the
//! materialization intervals already recorded for a view.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use cfs_common::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::definitions::{Entity, FeatureView, FileSource, RepoObjects, ResolvedView};

/// Current registry document version.
pub const REGISTRY_VERSION: u32 = 1;

/// A `[start, end]` window that was written to the online store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A feature view as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredFeatureView {
    pub spec: FeatureView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub materialization_intervals: Vec<MaterializationInterval>,
}

impl RegisteredFeatureView {
    /// Latest materialized end, if the view was ever materialized.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.materialization_intervals.iter().map(|i| i.end).max()
    }
}

/// What `apply` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ApplyReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    pub project: String,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub data_sources: BTreeMap<String, FileSource>,
    #[serde(default)]
    pub feature_views: BTreeMap<String, RegisteredFeatureView>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Registry {
    pub fn new(project: impl Into<String>) -> Self {
        Registry {
            version: REGISTRY_VERSION,
            project: project.into(),
            entities: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            feature_views: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Load the registry at `path`, or an empty one if the file does not exist.
    pub fn load_or_default(path: &Path, project: &str) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no registry file, starting empty");
            return Ok(Registry::new(project));
        }
        let content = fs::read_to_string(path)?;
        let registry: Registry = serde_json::from_str(&content).map_err(|e| {
            Error::Registry(format!("cannot parse {}: {}", path.display(), e))
        })?;
        if registry.version > REGISTRY_VERSION {
            return Err(Error::Registry(format!(
                "{} has version {}, newer than supported {}",
                path.display(),
                registry.version,
                REGISTRY_VERSION
            )));
        }
        if registry.project != project {
            return Err(Error::Registry(format!(
                "{} belongs to project '{}', not '{}'",
                path.display(),
                registry.project,
                project
            )));
        }
        Ok(registry)
    }

    /// Write atomically via a temp file in the same directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp_path, path)?;
        debug!(path = %path.display(), "registry saved");
        Ok(())
    }

    /// Register or update objects. References are checked before anything changes.
    pub fn apply(&mut self, objects: &RepoObjects, now: DateTime<Utc>) -> Result<ApplyReport> {
        self.validate(objects)?;

        let mut report = ApplyReport::default();
        for entity in &objects.entities {
            let change = upsert(&mut self.entities, &entity.name, entity.clone());
            record(&mut report, change, format!("entity {}", entity.name));
        }
        for source in &objects.sources {
            let change = upsert(&mut self.data_sources, &source.name, source.clone());
            record(&mut report, change, format!("data source {}", source.name));
        }
        for view in &objects.feature_views {
            let label = format!("feature view {}", view.name);
            let change = match self.feature_views.get_mut(&view.name) {
                Some(existing) if existing.spec == *view => Change::Unchanged,
                Some(existing) => {
                    existing.spec = view.clone();
                    existing.updated_at = now;
                    Change::Updated
                }
                None => {
                    self.feature_views.insert(
                        view.name.clone(),
                        RegisteredFeatureView {
                            spec: view.clone(),
                            created_at: now,
                            updated_at: now,
                            materialization_intervals: Vec::new(),
                        },
                    );
                    Change::Created
                }
            };
            record(&mut report, change, label);
        }

        if !report.is_noop() {
            self.last_updated = Some(now);
        }
        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            unchanged = report.unchanged.len(),
            "registry apply"
        );
        Ok(report)
    }

    fn validate(&self, objects: &RepoObjects) -> Result<()> {
        for view in &objects.feature_views {
            if view.entities.len() != 1 {
                return Err(Error::Registry(format!(
                    "feature view '{}' must reference exactly one entity, found {}",
                    view.name,
                    view.entities.len()
                )));
            }
            for entity in &view.entities {
                if objects.entity(entity).is_none() && !self.entities.contains_key(entity) {
                    return Err(Error::Registry(format!(
                        "feature view '{}' references unknown entity '{}'",
                        view.name, entity
                    )));
                }
            }
            if objects.source(&view.source).is_none()
                && !self.data_sources.contains_key(&view.source)
            {
                return Err(Error::Registry(format!(
                    "feature view '{}' references unknown data source '{}'",
                    view.name, view.source
                )));
            }
            if view.schema.is_empty() {
                return Err(Error::Registry(format!(
                    "feature view '{}' has no features",
                    view.name
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for field in &view.schema {
                if !seen.insert(field.name.as_str()) {
                    return Err(Error::Registry(format!(
                        "feature view '{}' declares '{}' twice",
                        view.name, field.name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Result<&Entity> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::not_found("entity", name))
    }

    pub fn data_source(&self, name: &str) -> Result<&FileSource> {
        self.data_sources
            .get(name)
            .ok_or_else(|| Error::not_found("data source", name))
    }

    pub fn feature_view(&self, name: &str) -> Result<&RegisteredFeatureView> {
        self.feature_views
            .get(name)
            .ok_or_else(|| Error::not_found("feature view", name))
    }

    /// A view plus its entity and source.
    pub fn resolve(&self, view_name: &str) -> Result<ResolvedView> {
        let view = &self.feature_view(view_name)?.spec;
        let entity_name = view.entities.first().ok_or_else(|| {
            Error::Registry(format!("feature view '{}' has no entity", view_name))
        })?;
        Ok(ResolvedView {
            view: view.clone(),
            entity: self.entity(entity_name)?.clone(),
            source: self.data_source(&view.source)?.clone(),
        })
    }

    /// Append a materialized window to a view's history.
    pub fn record_materialization(
        &mut self,
        view_name: &str,
        interval: MaterializationInterval,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let view = self
            .feature_views
            .get_mut(view_name)
            .ok_or_else(|| Error::not_found("feature view", view_name))?;
        view.materialization_intervals.push(interval);
        self.last_updated = Some(now);
        Ok(())
    }
}

fn upsert<T: PartialEq>(map: &mut BTreeMap<String, T>, name: &str, value: T) -> Change {
    match map.get(name) {
        Some(existing) if *existing == value => Change::Unchanged,
        Some(_) => {
            map.insert(name.to_string(), value);
            Change::Updated
        }
        None => {
            map.insert(name.to_string(), value);
            Change::Created
        }
    }
}

fn record(report: &mut ApplyReport, change: Change, label: String) {
    match change {
        Change::Created => report.created.push(label),
        Change::Updated => report.updated.push(label),
        Change::Unchanged => report.unchanged.push(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::customer::{customer_entity, customer_feature_view};
    use crate::registry::definitions::Field;
    use cfs_common::FeatureDtype;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn objects() -> RepoObjects {
        RepoObjects {
            entities: vec![customer_entity()],
            sources: vec![FileSource {
                name: "customer_data_source".into(),
                path: "/data/purchases.parquet".into(),
                timestamp_field: "purchase_timestamp".into(),
            }],
            feature_views: vec![customer_feature_view()],
        }
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_apply_creates_then_is_idempotent() {
        let mut registry = Registry::new("p");
        let first = registry.apply(&objects(), t(1)).unwrap();
        assert_eq!(first.created.len(), 3);
        assert!(!first.is_noop());

        let snapshot = registry.clone();
        let second = registry.apply(&objects(), t(2)).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged.len(), 3);
        assert_eq!(registry, snapshot);
    }

    #[test]
    fn test_apply_update_keeps_intervals() {
        let mut registry = Registry::new("p");
        registry.apply(&objects(), t(1)).unwrap();
        registry
            .record_materialization(
                "customer_features",
                MaterializationInterval {
                    start: t(1),
                    end: t(5),
                },
                t(5),
            )
            .unwrap();

        let mut changed = objects();
        changed.feature_views[0].ttl_seconds = 3600;
        let report = registry.apply(&changed, t(6)).unwrap();
        assert_eq!(report.updated, vec!["feature view customer_features"]);

        let view = registry.feature_view("customer_features").unwrap();
        assert_eq!(view.spec.ttl_seconds, 3600);
        assert_eq!(view.created_at, t(1));
        assert_eq!(view.updated_at, t(6));
        assert_eq!(view.watermark(), Some(t(5)));
    }

    #[test]
    fn test_apply_rejects_unknown_references() {
        let mut registry = Registry::new("p");
        let mut bad = objects();
        bad.entities.clear();
        let err = registry.apply(&bad, t(1)).unwrap_err();
        assert!(matches!(err, Error::Registry(ref m) if m.contains("unknown entity")));
        assert!(registry.entities.is_empty());

        let mut bad = objects();
        bad.feature_views[0].source = "nope".into();
        assert!(registry.apply(&bad, t(1)).is_err());
    }

    #[test]
    fn test_apply_rejects_duplicate_fields() {
        let mut registry = Registry::new("p");
        let mut bad = objects();
        bad.feature_views[0]
            .schema
            .push(Field::new("purchase_value", FeatureDtype::Float64));
        assert!(registry.apply(&bad, t(1)).is_err());
    }

    #[test]
    fn test_lookup_misses_are_not_found() {
        let registry = Registry::new("p");
        let err = registry.feature_view("missing").unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "feature view", .. }));
        assert!(registry.resolve("missing").is_err());
    }

    #[test]
    fn test_resolve_joins_entity_and_source() {
        let mut registry = Registry::new("p");
        registry.apply(&objects(), t(1)).unwrap();
        let resolved = registry.resolve("customer_features").unwrap();
        assert_eq!(resolved.entity.join_key, "customer_id");
        assert_eq!(resolved.source.timestamp_field, "purchase_timestamp");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("registry.json");
        let mut registry = Registry::new("p");
        registry.apply(&objects(), t(1)).unwrap();
        registry.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = Registry::load_or_default(&path, "p").unwrap();
        assert_eq!(loaded, registry);
    }

    #[test]
    fn test_failed_save_keeps_previous_registry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let mut registry = Registry::new("p");
        registry.apply(&objects(), t(1)).unwrap();
        registry.save(&path).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // the temp file cannot be created over a directory
        fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let mut changed = registry.clone();
        changed.project = "other".to_string();
        assert!(changed.save(&path).is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::load_or_default(&dir.path().join("r.json"), "p").unwrap();
        assert!(registry.feature_views.is_empty());
        assert_eq!(registry.project, "p");
    }

    #[test]
    fn test_load_rejects_other_project_and_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.json");
        Registry::new("a").save(&path).unwrap();
        assert!(Registry::load_or_default(&path, "b").is_err());

        fs::write(&path, "{not json").unwrap();
        let err = Registry::load_or_default(&path, "a").unwrap_err();
        assert!(matches!(err, Error::Registry(_)));
    }
}
