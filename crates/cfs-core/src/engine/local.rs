//! Engine backed by a local registry file and a pluggable online store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use cfs_common::{EntityKey, Error, FeatureRef, FeatureValue, Result, Settings};
use cfs_offline::{FeatureTableBuilder, OfflineSource};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::retrieval::{latest_per_entity, PointInTimeIndex};
use super::{EntityFrame, FeatureStoreEngine, MaterializationReport, EVENT_TIMESTAMP};
use crate::online::{open_online_store, OnlineStore};
use crate::registry::{
    ApplyReport, Field, MaterializationInterval, RegisteredFeatureView, Registry, RepoObjects,
    ResolvedView,
};

/// Requested features of one view, in request order.
struct ViewRequest {
    resolved: ResolvedView,
    fields: Vec<Field>,
}

/// Resolved feature references plus the output column order.
struct RetrievalPlan {
    views: Vec<ViewRequest>,
    /// `(view index, field index)` per output column.
    columns: Vec<(usize, usize)>,
}

impl RetrievalPlan {
    fn join_key(&self) -> Result<(&str, cfs_common::ValueType)> {
        let first = &self.views[0].resolved.entity;
        for view in &self.views[1..] {
            if view.resolved.entity.join_key != first.join_key {
                return Err(Error::InvalidArgument(format!(
                    "features span entities '{}' and '{}'",
                    first.join_key, view.resolved.entity.join_key
                )));
            }
        }
        Ok((&first.join_key, first.value_type))
    }

    fn output_fields(&self) -> Vec<(String, cfs_common::FeatureDtype)> {
        self.columns
            .iter()
            .map(|&(v, f)| {
                let field = &self.views[v].fields[f];
                (field.name.clone(), field.dtype)
            })
            .collect()
    }
}

pub struct LocalFeatureStore {
    registry_path: PathBuf,
    registry: Registry,
    online: Box<dyn OnlineStore>,
}

impl LocalFeatureStore {
    /// Open the registry and online store named in settings.
    pub fn open(settings: &Settings) -> Result<Self> {
        let registry_path = settings.registry_path()?;
        let online = open_online_store(settings)?;
        Self::with_online_store(registry_path, &settings.feature_store.project, online)
    }

    pub fn with_online_store(
        registry_path: impl Into<PathBuf>,
        project: &str,
        online: Box<dyn OnlineStore>,
    ) -> Result<Self> {
        let registry_path = registry_path.into();
        let registry = Registry::load_or_default(&registry_path, project)?;
        info!(
            registry = %registry_path.display(),
            online_store = online.name(),
            feature_views = registry.feature_views.len(),
            "feature store opened"
        );
        Ok(LocalFeatureStore {
            registry_path,
            registry,
            online,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    pub fn online_store(&self) -> &dyn OnlineStore {
        self.online.as_ref()
    }

    /// Remove every materialized row of a view and forget its intervals.
    pub fn teardown_online(&mut self, feature_view: &str) -> Result<()> {
        self.online.clear(feature_view)?;
        if let Some(view) = self.registry.feature_views.get_mut(feature_view) {
            view.materialization_intervals.clear();
        }
        self.registry.save(&self.registry_path)
    }

    fn online_view_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .registry
            .feature_views
            .values()
            .filter(|v| v.spec.online)
            .map(|v| v.spec.name.clone())
            .collect();
        if names.is_empty() {
            return Err(Error::Registry(
                "no online feature views registered; run apply first".to_string(),
            ));
        }
        Ok(names)
    }

    fn materialize_view(
        &mut self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MaterializationReport> {
        let resolved = self.registry.resolve(name)?;
        if !resolved.view.online {
            return Err(Error::InvalidArgument(format!(
                "feature view '{}' is not online",
                name
            )));
        }

        let source = OfflineSource::new(resolved.source_spec(&resolved.view.schema));
        let records = source.read_range(Some(start), Some(end))?;
        let rows_scanned = records.len();
        let rows = latest_per_entity(records, &resolved.view.feature_names());
        let rows_written = self.online.write_batch(name, &rows)?;

        self.registry
            .record_materialization(name, MaterializationInterval { start, end }, Utc::now())?;
        info!(
            feature_view = name,
            %start,
            %end,
            rows_scanned,
            entities = rows.len(),
            rows_written,
            "materialized"
        );
        Ok(MaterializationReport {
            feature_view: name.to_string(),
            start,
            end,
            rows_scanned,
            entities: rows.len(),
            rows_written,
            up_to_date: false,
        })
    }

    fn plan(&self, features: &[FeatureRef]) -> Result<RetrievalPlan> {
        if features.is_empty() {
            return Err(Error::InvalidArgument("no features requested".to_string()));
        }
        let mut views: Vec<ViewRequest> = Vec::new();
        let mut columns = Vec::with_capacity(features.len());
        let mut seen = HashSet::new();
        for feature in features {
            if !seen.insert(feature.name.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "feature name '{}' requested twice",
                    feature.name
                )));
            }
            let view_idx = match views
                .iter()
                .position(|v| v.resolved.view.name == feature.feature_view)
            {
                Some(idx) => idx,
                None => {
                    views.push(ViewRequest {
                        resolved: self.registry.resolve(&feature.feature_view)?,
                        fields: Vec::new(),
                    });
                    views.len() - 1
                }
            };
            let request = &mut views[view_idx];
            let field = request
                .resolved
                .view
                .field(&feature.name)
                .cloned()
                .ok_or_else(|| Error::not_found("feature", feature.to_string()))?;
            request.fields.push(field);
            columns.push((view_idx, request.fields.len() - 1));
        }
        Ok(RetrievalPlan { views, columns })
    }
}

fn check_key_types(
    keys: impl Iterator<Item = EntityKey>,
    expected: cfs_common::ValueType,
) -> Result<()> {
    for key in keys {
        if key.value_type() != expected {
            return Err(Error::SchemaMismatch(format!(
                "entity key {} is {}, expected {}",
                key,
                key.value_type(),
                expected
            )));
        }
    }
    Ok(())
}

impl FeatureStoreEngine for LocalFeatureStore {
    fn apply(&mut self, objects: &RepoObjects) -> Result<ApplyReport> {
        let report = self.registry.apply(objects, Utc::now())?;
        if !report.is_noop() || !self.registry_path.exists() {
            self.registry.save(&self.registry_path)?;
        }
        Ok(report)
    }

    fn materialize(
        &mut self,
        feature_views: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MaterializationReport>> {
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        let names = if feature_views.is_empty() {
            self.online_view_names()?
        } else {
            feature_views.to_vec()
        };

        let mut reports = Vec::with_capacity(names.len());
        for name in &names {
            reports.push(self.materialize_view(name, start, end)?);
        }
        self.registry.save(&self.registry_path)?;
        Ok(reports)
    }

    fn materialize_incremental(
        &mut self,
        end: DateTime<Utc>,
    ) -> Result<Vec<MaterializationReport>> {
        let mut reports = Vec::new();
        let mut changed = false;
        for name in self.online_view_names()? {
            let view = self.registry.feature_view(&name)?;
            let start = match view.watermark() {
                Some(watermark) => watermark + Duration::microseconds(1),
                None => end - view.spec.ttl(),
            };
            if start > end {
                debug!(feature_view = %name, %start, %end, "already materialized");
                reports.push(MaterializationReport {
                    feature_view: name,
                    start,
                    end,
                    rows_scanned: 0,
                    entities: 0,
                    rows_written: 0,
                    up_to_date: true,
                });
                continue;
            }
            reports.push(self.materialize_view(&name, start, end)?);
            changed = true;
        }
        if changed {
            self.registry.save(&self.registry_path)?;
        }
        Ok(reports)
    }

    fn get_historical_features(
        &self,
        entity_frame: &EntityFrame,
        features: &[FeatureRef],
    ) -> Result<RecordBatch> {
        let plan = self.plan(features)?;
        let (join_key, key_type) = plan.join_key()?;
        if entity_frame.join_key != join_key {
            return Err(Error::SchemaMismatch(format!(
                "entity frame is keyed by '{}', features by '{}'",
                entity_frame.join_key, join_key
            )));
        }
        check_key_types(entity_frame.rows.iter().map(|r| r.entity_key.clone()), key_type)?;

        let indexes = plan
            .views
            .iter()
            .map(|request| -> Result<PointInTimeIndex> {
                let source = OfflineSource::new(request.resolved.source_spec(&request.fields));
                Ok(PointInTimeIndex::build(source.read_all()?))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut builder = FeatureTableBuilder::new(
            join_key,
            key_type,
            Some(EVENT_TIMESTAMP),
            plan.output_fields(),
        );
        for row in &entity_frame.rows {
            let matches: Vec<Option<&[FeatureValue]>> = plan
                .views
                .iter()
                .zip(&indexes)
                .map(|(request, index)| {
                    index.lookup(
                        &row.entity_key,
                        row.event_timestamp,
                        Some(request.resolved.view.ttl()),
                    )
                })
                .collect();
            let values = plan
                .columns
                .iter()
                .map(|&(v, f)| {
                    matches[v]
                        .and_then(|values| values.get(f).cloned())
                        .unwrap_or_default()
                })
                .collect();
            builder.push_row(row.entity_key.clone(), Some(row.event_timestamp), values)?;
        }
        debug!(rows = entity_frame.len(), columns = features.len(), "historical join");
        Ok(builder.finish()?)
    }

    fn get_online_features(
        &self,
        entity_keys: &[EntityKey],
        features: &[FeatureRef],
    ) -> Result<RecordBatch> {
        let plan = self.plan(features)?;
        let (join_key, key_type) = plan.join_key()?;
        check_key_types(entity_keys.iter().cloned(), key_type)?;

        let mut fetched = Vec::with_capacity(plan.views.len());
        for request in &plan.views {
            if !request.resolved.view.online {
                return Err(Error::InvalidArgument(format!(
                    "feature view '{}' is not online",
                    request.resolved.view.name
                )));
            }
            let names: Vec<String> = request.fields.iter().map(|f| f.name.clone()).collect();
            fetched.push(self.online.read(&request.resolved.view.name, entity_keys, &names)?);
        }

        let mut builder = FeatureTableBuilder::new(join_key, key_type, None, plan.output_fields());
        for (i, key) in entity_keys.iter().enumerate() {
            let values = plan
                .columns
                .iter()
                .map(|&(v, f)| match &fetched[v][i] {
                    Some(row) => row.value(&plan.views[v].fields[f].name),
                    None => FeatureValue::Null,
                })
                .collect();
            builder.push_row(key.clone(), None, values)?;
        }
        debug!(keys = entity_keys.len(), columns = features.len(), "online lookup");
        Ok(builder.finish()?)
    }

    fn list_feature_views(&self) -> Result<Vec<RegisteredFeatureView>> {
        Ok(self.registry.feature_views.values().cloned().collect())
    }

    fn forget_materializations(&mut self) -> Result<Vec<String>> {
        let mut reset = Vec::new();
        for (name, view) in self.registry.feature_views.iter_mut() {
            if !view.materialization_intervals.is_empty() {
                view.materialization_intervals.clear();
                reset.push(name.clone());
            }
        }
        if !reset.is_empty() {
            self.registry.save(&self.registry_path)?;
            info!(feature_views = ?reset, "materialization watermarks reset");
        }
        Ok(reset)
    }
}
