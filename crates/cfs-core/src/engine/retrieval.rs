//! Point-in-time lookups over offline source records.

use std::collections::{BTreeMap, HashMap};

use cfs_common::{EntityKey, FeatureValue};
use cfs_offline::SourceRecord;
use chrono::{DateTime, Duration, Utc};

use crate::online::OnlineRow;

/// Source rows grouped by entity and sorted by event time.
#[derive(Debug, Default)]
pub struct PointInTimeIndex {
    by_key: HashMap<EntityKey, Vec<(DateTime<Utc>, Vec<FeatureValue>)>>,
}

impl PointInTimeIndex {
    /// Equal timestamps keep file order, so the later row wins on lookup.
    pub fn build(records: Vec<SourceRecord>) -> Self {
        let mut by_key: HashMap<EntityKey, Vec<(DateTime<Utc>, Vec<FeatureValue>)>> =
            HashMap::new();
        for record in records {
            by_key
                .entry(record.entity_key)
                .or_default()
                .push((record.event_timestamp, record.values));
        }
        for rows in by_key.values_mut() {
            rows.sort_by_key(|(ts, _)| *ts);
        }
        PointInTimeIndex { by_key }
    }

    /// Latest row for `key` with `as_of - ttl <= ts <= as_of`.
    pub fn lookup(
        &self,
        key: &EntityKey,
        as_of: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Option<&[FeatureValue]> {
        let rows = self.by_key.get(key)?;
        let idx = rows.partition_point(|(ts, _)| *ts <= as_of);
        let (ts, values) = rows.get(idx.checked_sub(1)?)?;
        if let Some(ttl) = ttl {
            if *ts < as_of - ttl {
                return None;
            }
        }
        Some(values)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Each entity's earliest event, sorted by key.
pub fn earliest_per_entity(records: &[SourceRecord]) -> Vec<(EntityKey, DateTime<Utc>)> {
    let mut earliest: BTreeMap<&EntityKey, DateTime<Utc>> = BTreeMap::new();
    for record in records {
        earliest
            .entry(&record.entity_key)
            .and_modify(|ts| *ts = (*ts).min(record.event_timestamp))
            .or_insert(record.event_timestamp);
    }
    earliest
        .into_iter()
        .map(|(key, ts)| (key.clone(), ts))
        .collect()
}

/// Collapse records to the newest row per entity, sorted by key.
///
/// `names` labels `SourceRecord::values` positionally.
pub fn latest_per_entity(records: Vec<SourceRecord>, names: &[String]) -> Vec<OnlineRow> {
    let mut latest: BTreeMap<EntityKey, SourceRecord> = BTreeMap::new();
    for record in records {
        match latest.get(&record.entity_key) {
            Some(existing) if existing.event_timestamp > record.event_timestamp => {}
            _ => {
                latest.insert(record.entity_key.clone(), record);
            }
        }
    }
    latest
        .into_values()
        .map(|record| OnlineRow {
            entity_key: record.entity_key,
            event_timestamp: record.event_timestamp,
            values: names.iter().cloned().zip(record.values).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    fn rec(key: i64, day: u32, value: f64) -> SourceRecord {
        SourceRecord {
            entity_key: EntityKey::Int64(key),
            event_timestamp: at(day),
            values: vec![FeatureValue::Float64(value)],
        }
    }

    #[test]
    fn test_lookup_picks_latest_at_or_before() {
        let index = PointInTimeIndex::build(vec![rec(1, 10, 3.0), rec(1, 2, 1.0), rec(1, 5, 2.0)]);
        let key = EntityKey::Int64(1);
        assert_eq!(index.lookup(&key, at(1), None), None);
        assert_eq!(index.lookup(&key, at(2), None).unwrap()[0], FeatureValue::Float64(1.0));
        assert_eq!(index.lookup(&key, at(7), None).unwrap()[0], FeatureValue::Float64(2.0));
        assert_eq!(index.lookup(&key, at(20), None).unwrap()[0], FeatureValue::Float64(3.0));
        assert_eq!(index.lookup(&EntityKey::Int64(2), at(20), None), None);
    }

    #[test]
    fn test_lookup_respects_ttl() {
        let index = PointInTimeIndex::build(vec![rec(1, 2, 1.0)]);
        let key = EntityKey::Int64(1);
        assert!(index.lookup(&key, at(4), Some(Duration::days(2))).is_some());
        assert!(index.lookup(&key, at(5), Some(Duration::days(2))).is_none());
    }

    #[test]
    fn test_ties_resolve_to_later_row() {
        let index = PointInTimeIndex::build(vec![rec(1, 2, 1.0), rec(1, 2, 9.0)]);
        assert_eq!(
            index.lookup(&EntityKey::Int64(1), at(2), None).unwrap()[0],
            FeatureValue::Float64(9.0)
        );

        let rows = latest_per_entity(vec![rec(1, 2, 1.0), rec(1, 2, 9.0)], &["v".to_string()]);
        assert_eq!(rows[0].value("v"), FeatureValue::Float64(9.0));
    }

    #[test]
    fn test_earliest_per_entity_sorted_by_key() {
        let records = vec![rec(3, 5, 0.0), rec(1, 9, 0.0), rec(3, 2, 0.0), rec(1, 4, 0.0)];
        assert_eq!(
            earliest_per_entity(&records),
            vec![(EntityKey::Int64(1), at(4)), (EntityKey::Int64(3), at(2))]
        );
    }

    #[test]
    fn test_latest_per_entity() {
        let names = vec!["v".to_string()];
        let records = vec![rec(2, 1, 1.0), rec(1, 3, 3.0), rec(2, 8, 8.0), rec(2, 4, 4.0)];
        let rows = latest_per_entity(records, &names);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].entity_key, EntityKey::Int64(1));
        assert_eq!(rows[1].event_timestamp, at(8));
        assert_eq!(rows[1].value("v"), FeatureValue::Float64(8.0));
    }
}
