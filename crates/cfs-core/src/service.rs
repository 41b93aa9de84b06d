//! Customer feature service: the operations behind the CLI.
//!
//! Owns the repository objects, an engine, and the Redis side channel.
//! Raw user input (timestamps, customer ids, feature names) is parsed here
//! against the configured timezone and the customer entity's key type.

use arrow::array::RecordBatch;
use cfs_common::{EntityKey, Error, FeatureRef, OnlineStoreSettings, Result, Settings};
use cfs_offline::{filter_range, OfflineSource, SourceSpec};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::engine::{
    earliest_per_entity, EntityFrame, FeatureStoreEngine, LocalFeatureStore,
    MaterializationReport,
};
use crate::registry::{
    default_feature_refs, repo_objects, ApplyReport, RegisteredFeatureView, RepoObjects,
    ResolvedView, CUSTOMER_FEATURE_VIEW,
};
use crate::side_channel::{ConnectionState, RedisSideChannel, SideChannelOutcome};

pub struct FeatureService<E: FeatureStoreEngine = LocalFeatureStore> {
    objects: RepoObjects,
    timezone: Tz,
    engine: E,
    side_channel: RedisSideChannel,
    /// The side channel talks to the server holding the online rows.
    online_in_redis: bool,
}

impl FeatureService<LocalFeatureStore> {
    /// Open the local engine and attempt the Redis handshake once.
    pub fn new(settings: &Settings) -> Result<Self> {
        let engine = LocalFeatureStore::open(settings)?;
        let side_channel = RedisSideChannel::connect(&settings.redis);
        Self::with_parts(settings, engine, side_channel)
    }
}

impl<E: FeatureStoreEngine> FeatureService<E> {
    pub fn with_parts(
        settings: &Settings,
        engine: E,
        side_channel: RedisSideChannel,
    ) -> Result<Self> {
        Ok(FeatureService {
            objects: repo_objects(settings)?,
            timezone: settings.timezone(),
            engine,
            side_channel,
            online_in_redis: matches!(
                settings.feature_store.online_store,
                OnlineStoreSettings::Redis
            ),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn side_channel_state(&self) -> &ConnectionState {
        self.side_channel.state()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Parse a CLI timestamp; naive values are in the configured timezone.
    pub fn parse_timestamp(&self, raw: &str) -> Result<DateTime<Utc>> {
        cfs_common::time::parse_timestamp(raw, self.timezone)
    }

    pub fn apply_feature_store(&mut self) -> Result<ApplyReport> {
        let report = self.engine.apply(&self.objects)?;
        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            "feature store applied"
        );
        Ok(report)
    }

    /// Materialize every online view. Missing bounds default to the
    /// earliest and latest event in the offline source.
    pub fn materialize_features(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<MaterializationReport>> {
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            (start, end) => {
                let (min, max) = self
                    .customer_source(&[])?
                    .timestamp_bounds()?
                    .ok_or_else(|| {
                        Error::DataAccess("offline source has no rows to materialize".to_string())
                    })?;
                (start.unwrap_or(min), end.unwrap_or(max))
            }
        };
        info!(
            start = %start.with_timezone(&self.timezone),
            end = %end.with_timezone(&self.timezone),
            "materializing"
        );
        self.engine.materialize(&[], start, end)
    }

    /// Materialize everything new since the last run, up to `end` (default now).
    pub fn materialize_incremental(
        &mut self,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<MaterializationReport>> {
        let end = end.unwrap_or_else(Utc::now);
        info!(end = %end.with_timezone(&self.timezone), "materializing incrementally");
        self.engine.materialize_incremental(end)
    }

    /// Point-in-time features for every customer seen in `[start, end]`,
    /// each at its earliest event in that window.
    pub fn get_historical_features(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        features: Option<&[String]>,
    ) -> Result<RecordBatch> {
        let features = self.feature_refs(features)?;
        let source = self.customer_source(&[])?;
        let records = filter_range(source.read_all()?, start, end);
        let frame = EntityFrame::from_pairs(
            source.spec().join_key.clone(),
            earliest_per_entity(&records),
        );
        info!(entities = frame.len(), features = features.len(), "historical retrieval");
        self.engine.get_historical_features(&frame, &features)
    }

    /// Latest materialized features for the given customers, in request
    /// order. Defaults to every customer in the offline source.
    pub fn get_online_features(
        &self,
        customer_ids: Option<&[String]>,
        features: Option<&[String]>,
    ) -> Result<RecordBatch> {
        let features = self.feature_refs(features)?;
        let keys = match customer_ids {
            Some(ids) if !ids.is_empty() => {
                let key_type = self.customer_view()?.entity.value_type;
                ids.iter()
                    .map(|raw| EntityKey::parse(raw, key_type))
                    .collect::<Result<Vec<_>>>()?
            }
            _ => self.customer_source(&[])?.distinct_entity_keys()?,
        };
        info!(entities = keys.len(), features = features.len(), "online retrieval");
        self.engine.get_online_features(&keys, &features)
    }

    pub fn list_feature_views(&self) -> Result<Vec<RegisteredFeatureView>> {
        self.engine.list_feature_views()
    }

    pub fn backup_online_store(&mut self) -> SideChannelOutcome {
        let outcome = self.side_channel.backup();
        if let SideChannelOutcome::Unavailable(reason) = &outcome {
            warn!(%reason, "online store backup skipped");
        }
        outcome
    }

    /// `FLUSHDB` on Redis. When Redis is also the online store the
    /// watermarks are reset so the next incremental run reloads from scratch.
    pub fn clear_online_store(&mut self) -> SideChannelOutcome {
        let outcome = self.side_channel.clear();
        match &outcome {
            SideChannelOutcome::Unavailable(reason) => {
                warn!(%reason, "online store clear skipped");
            }
            SideChannelOutcome::Completed if self.online_in_redis => {
                if let Err(e) = self.engine.forget_materializations() {
                    warn!(error = %e, "online store cleared but watermarks were not reset");
                }
            }
            SideChannelOutcome::Completed => {}
        }
        outcome
    }

    fn feature_refs(&self, raw: Option<&[String]>) -> Result<Vec<FeatureRef>> {
        let raw = match raw {
            Some(list) if !list.is_empty() => list.to_vec(),
            _ => default_feature_refs(),
        };
        raw.iter()
            .map(|r| FeatureRef::parse(r, CUSTOMER_FEATURE_VIEW))
            .collect()
    }

    fn customer_view(&self) -> Result<ResolvedView> {
        let view = self
            .objects
            .feature_view(CUSTOMER_FEATURE_VIEW)
            .ok_or_else(|| Error::not_found("feature view", CUSTOMER_FEATURE_VIEW))?;
        let entity = view
            .entities
            .first()
            .and_then(|name| self.objects.entity(name))
            .ok_or_else(|| Error::not_found("entity", view.entities.join(",")))?;
        let source = self
            .objects
            .source(&view.source)
            .ok_or_else(|| Error::not_found("data source", view.source.clone()))?;
        Ok(ResolvedView {
            view: view.clone(),
            entity: entity.clone(),
            source: source.clone(),
        })
    }

    fn customer_source(&self, features: &[crate::registry::Field]) -> Result<OfflineSource> {
        let spec: SourceSpec = self.customer_view()?.source_spec(features);
        Ok(OfflineSource::new(spec))
    }
}
