//! Offline source reader.
//!
//! Loads a Parquet file into typed records: one entity key, one event
//! timestamp, and the requested feature values per row. Columns are cast to
//! the declared types, so sources written by other tools (nanosecond
//! timestamps, int32 ids, ...) are accepted as long as the cast is lossless
//! enough for arrow.

use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;

use arrow::array::{Array, ArrayRef, RecordBatch, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use cfs_common::{EntityKey, FeatureDtype, FeatureValue, ValueType};
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::debug;

use crate::error::OfflineError;
use crate::schema::{feature_data_type, key_at, key_data_type, utc_timestamp_type, value_at};

/// What to read from an offline source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub timestamp_field: String,
    pub join_key: String,
    pub join_key_type: ValueType,
    /// Feature columns to load, in output order.
    pub features: Vec<(String, FeatureDtype)>,
}

/// One row of the offline source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub entity_key: EntityKey,
    pub event_timestamp: DateTime<Utc>,
    /// Values aligned with `SourceSpec::features`.
    pub values: Vec<FeatureValue>,
}

/// Reader over a Parquet offline source.
#[derive(Debug, Clone)]
pub struct OfflineSource {
    spec: SourceSpec,
}

impl OfflineSource {
    pub fn new(spec: SourceSpec) -> Self {
        OfflineSource { spec }
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    /// Load every row in file order.
    pub fn read_all(&self) -> Result<Vec<SourceRecord>, OfflineError> {
        if !self.spec.path.is_file() {
            return Err(OfflineError::NotFound(self.spec.path.clone()));
        }
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.spec.path)?)?;
        let reader = builder.build()?;

        let mut records = Vec::new();
        let mut row_offset = 0usize;
        for batch in reader {
            let batch = batch?;
            self.decode_batch(&batch, row_offset, &mut records)?;
            row_offset += batch.num_rows();
        }
        debug!(
            path = %self.spec.path.display(),
            rows = records.len(),
            "offline source loaded"
        );
        Ok(records)
    }

    /// Rows with `start <= event_timestamp <= end`; either bound may be open.
    pub fn read_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<SourceRecord>, OfflineError> {
        Ok(filter_range(self.read_all()?, start, end))
    }

    /// Earliest and latest event timestamps, or None for an empty source.
    pub fn timestamp_bounds(
        &self,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, OfflineError> {
        let records = self.read_all()?;
        let min = records.iter().map(|r| r.event_timestamp).min();
        let max = records.iter().map(|r| r.event_timestamp).max();
        Ok(min.zip(max))
    }

    /// Distinct entity keys in first-seen order.
    pub fn distinct_entity_keys(&self) -> Result<Vec<EntityKey>, OfflineError> {
        let mut seen = HashSet::new();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| seen.insert(r.entity_key.clone()))
            .map(|r| r.entity_key)
            .collect())
    }

    fn column(
        &self,
        batch: &RecordBatch,
        name: &str,
        target: &DataType,
    ) -> Result<ArrayRef, OfflineError> {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| OfflineError::MissingColumn {
                column: name.to_string(),
                path: self.spec.path.clone(),
            })?;
        if array.data_type() == target {
            return Ok(array.clone());
        }
        cast(array, target).map_err(|e| OfflineError::ColumnType {
            column: name.to_string(),
            expected: target.to_string(),
            message: e.to_string(),
        })
    }

    fn decode_batch(
        &self,
        batch: &RecordBatch,
        row_offset: usize,
        out: &mut Vec<SourceRecord>,
    ) -> Result<(), OfflineError> {
        let spec = &self.spec;
        let keys = self.column(batch, &spec.join_key, &key_data_type(spec.join_key_type))?;
        let timestamps = self.column(batch, &spec.timestamp_field, &utc_timestamp_type())?;
        let timestamps = timestamps
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .ok_or_else(|| OfflineError::ColumnType {
                column: spec.timestamp_field.clone(),
                expected: "timestamp".to_string(),
                message: format!("found {}", timestamps.data_type()),
            })?;
        let features = spec
            .features
            .iter()
            .map(|(name, dtype)| self.column(batch, name, &feature_data_type(*dtype)))
            .collect::<Result<Vec<_>, _>>()?;

        for row in 0..batch.num_rows() {
            let entity_key = key_at(&keys, row, spec.join_key_type, &spec.join_key).map_err(
                |e| match e {
                    OfflineError::NullValue { column, row } => OfflineError::NullValue {
                        column,
                        row: row + row_offset,
                    },
                    other => other,
                },
            )?;
            if timestamps.is_null(row) {
                return Err(OfflineError::NullValue {
                    column: spec.timestamp_field.clone(),
                    row: row_offset + row + 1,
                });
            }
            let event_timestamp = cfs_common::time::from_micros(timestamps.value(row))
                .ok_or_else(|| OfflineError::InvalidValue {
                    column: spec.timestamp_field.clone(),
                    row: row_offset + row + 1,
                    message: "timestamp out of range".to_string(),
                })?;
            let values = spec
                .features
                .iter()
                .zip(&features)
                .map(|((name, dtype), array)| value_at(array, row, *dtype, name))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(SourceRecord {
                entity_key,
                event_timestamp,
                values,
            });
        }
        Ok(())
    }
}

/// Keep records with `start <= event_timestamp <= end`.
pub fn filter_range(
    records: Vec<SourceRecord>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<SourceRecord> {
    records
        .into_iter()
        .filter(|r| start.map_or(true, |s| r.event_timestamp >= s))
        .filter(|r| end.map_or(true, |e| r.event_timestamp <= e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key: i64, hour: u32) -> SourceRecord {
        SourceRecord {
            entity_key: EntityKey::Int64(key),
            event_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            values: vec![],
        }
    }

    #[test]
    fn test_filter_range_inclusive_bounds() {
        let records = vec![record(1, 1), record(2, 2), record(3, 3)];
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let kept = filter_range(records.clone(), Some(start), Some(start));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].entity_key, EntityKey::Int64(2));

        assert_eq!(filter_range(records.clone(), None, None).len(), 3);
        assert_eq!(filter_range(records, Some(start), None).len(), 2);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let source = OfflineSource::new(SourceSpec {
            path: PathBuf::from("/no/such/file.parquet"),
            timestamp_field: "purchase_timestamp".into(),
            join_key: "customer_id".into(),
            join_key_type: ValueType::Int64,
            features: vec![],
        });
        assert!(matches!(source.read_all(), Err(OfflineError::NotFound(_))));
    }
}
