//! Customer entity, purchase source, and the `customer_features` view.

use std::collections::BTreeMap;

use cfs_common::{FeatureDtype, Result, Settings, ValueType, SOURCE_DATA_KEY};
use cfs_offline::{
    default_parquet_path, CUSTOMER_ID, LOYALTY_SCORE, PURCHASE_TIMESTAMP, PURCHASE_VALUE,
};

use super::definitions::{Entity, FeatureView, Field, FileSource, RepoObjects};

pub const CUSTOMER_ENTITY: &str = "customer";
pub const CUSTOMER_SOURCE: &str = "customer_data_source";
pub const CUSTOMER_FEATURE_VIEW: &str = "customer_features";

/// Cache features for 30 days.
pub const CUSTOMER_FEATURES_TTL_SECS: u64 = 30 * 24 * 60 * 60;

pub fn customer_entity() -> Entity {
    Entity {
        name: CUSTOMER_ENTITY.to_string(),
        join_key: CUSTOMER_ID.to_string(),
        value_type: ValueType::Int64,
        description: "Customer identifier".to_string(),
    }
}

/// Parquet file derived from the configured CSV dataset path.
pub fn customer_source(settings: &Settings) -> Result<FileSource> {
    let csv = settings.data_path(SOURCE_DATA_KEY)?;
    Ok(FileSource {
        name: CUSTOMER_SOURCE.to_string(),
        path: default_parquet_path(&csv),
        timestamp_field: PURCHASE_TIMESTAMP.to_string(),
    })
}

pub fn customer_feature_view() -> FeatureView {
    let tags = BTreeMap::from([
        ("team".to_string(), "customer_analytics".to_string()),
        ("data_type".to_string(), "transactional".to_string()),
    ]);
    FeatureView {
        name: CUSTOMER_FEATURE_VIEW.to_string(),
        entities: vec![CUSTOMER_ENTITY.to_string()],
        ttl_seconds: CUSTOMER_FEATURES_TTL_SECS,
        schema: vec![
            Field::new(PURCHASE_VALUE, FeatureDtype::Float64),
            Field::new(LOYALTY_SCORE, FeatureDtype::Float32),
        ],
        online: true,
        source: CUSTOMER_SOURCE.to_string(),
        tags,
    }
}

/// Everything the repository registers on `apply`.
pub fn repo_objects(settings: &Settings) -> Result<RepoObjects> {
    Ok(RepoObjects {
        entities: vec![customer_entity()],
        sources: vec![customer_source(settings)?],
        feature_views: vec![customer_feature_view()],
    })
}

/// Feature references returned when the caller does not pick any.
pub fn default_feature_refs() -> Vec<String> {
    vec![
        format!("{}:{}", CUSTOMER_FEATURE_VIEW, PURCHASE_VALUE),
        format!("{}:{}", CUSTOMER_FEATURE_VIEW, LOYALTY_SCORE),
    ]
}
