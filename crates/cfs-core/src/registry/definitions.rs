//! Declarative feature store objects: entities, file sources, feature views.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cfs_common::{FeatureDtype, ValueType};
use cfs_offline::SourceSpec;
use serde::{Deserialize, Serialize};

/// A named join key identifying the subject of features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub join_key: String,
    pub value_type: ValueType,
    #[serde(default)]
    pub description: String,
}

/// A Parquet file plus the column that orders its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSource {
    pub name: String,
    pub path: PathBuf,
    pub timestamp_field: String,
}

/// A typed feature column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: FeatureDtype,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: FeatureDtype) -> Self {
        Field {
            name: name.into(),
            dtype,
        }
    }
}

/// A named group of features for one entity, read from one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureView {
    pub name: String,
    pub entities: Vec<String>,
    /// Staleness window for point-in-time joins and the first incremental run.
    pub ttl_seconds: u64,
    pub schema: Vec<Field>,
    pub online: bool,
    pub source: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl FeatureView {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX / 1000))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.schema.iter().find(|f| f.name == name)
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.schema.iter().map(|f| f.name.clone()).collect()
    }
}

/// Everything `apply` registers in one call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepoObjects {
    pub entities: Vec<Entity>,
    pub sources: Vec<FileSource>,
    pub feature_views: Vec<FeatureView>,
}

impl RepoObjects {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn source(&self, name: &str) -> Option<&FileSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn feature_view(&self, name: &str) -> Option<&FeatureView> {
        self.feature_views.iter().find(|v| v.name == name)
    }
}

/// A feature view together with the entity and source it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedView {
    pub view: FeatureView,
    pub entity: Entity,
    pub source: FileSource,
}

impl ResolvedView {
    /// Offline read projection for the given features of this view.
    pub fn source_spec(&self, features: &[Field]) -> SourceSpec {
        SourceSpec {
            path: self.source.path.clone(),
            timestamp_field: self.source.timestamp_field.clone(),
            join_key: self.entity.join_key.clone(),
            join_key_type: self.entity.value_type,
            features: features
                .iter()
                .map(|f| (f.name.clone(), f.dtype))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_conversion() {
        let view = FeatureView {
            name: "v".into(),
            entities: vec!["e".into()],
            ttl_seconds: 86_400,
            schema: vec![Field::new("x", FeatureDtype::Float64)],
            online: true,
            source: "s".into(),
            tags: BTreeMap::new(),
        };
        assert_eq!(view.ttl(), chrono::Duration::days(1));
        assert!(view.field("x").is_some());
        assert!(view.field("y").is_none());
    }
}
