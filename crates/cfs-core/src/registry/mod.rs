//! Feature definitions and the persisted registry.

pub mod catalog;
pub mod customer;
pub mod definitions;

pub use catalog::{ApplyReport, MaterializationInterval, RegisteredFeatureView, Registry};
pub use customer::{
    customer_entity, customer_feature_view, customer_source, default_feature_refs, repo_objects,
    CUSTOMER_ENTITY, CUSTOMER_FEATURE_VIEW, CUSTOMER_SOURCE,
};
pub use definitions::{Entity, FeatureView, Field, FileSource, RepoObjects, ResolvedView};
