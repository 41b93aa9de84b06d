//! Arrow tables for retrieval results.
//!
//! Historical and online retrieval both return a `RecordBatch` with the
//! entity key first, an optional event timestamp, then one nullable column
//! per requested feature.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float32Builder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::SchemaRef;
use cfs_common::{EntityKey, FeatureDtype, FeatureValue, ValueType};
use chrono::{DateTime, Utc};

use crate::error::OfflineError;
use crate::schema::{feature_table_schema, key_at, value_at};

/// Row-wise builder for a feature table.
#[derive(Debug)]
pub struct FeatureTableBuilder {
    schema: SchemaRef,
    key_type: ValueType,
    with_timestamp: bool,
    features: Vec<(String, FeatureDtype)>,
    keys: Vec<EntityKey>,
    timestamps: Vec<i64>,
    columns: Vec<Vec<FeatureValue>>,
}

impl FeatureTableBuilder {
    /// Builder for `key, [timestamp], features...`.
    pub fn new(
        key_name: &str,
        key_type: ValueType,
        timestamp_name: Option<&str>,
        features: Vec<(String, FeatureDtype)>,
    ) -> Self {
        let schema = feature_table_schema((key_name, key_type), timestamp_name, &features);
        let columns = vec![Vec::new(); features.len()];
        FeatureTableBuilder {
            schema,
            key_type,
            with_timestamp: timestamp_name.is_some(),
            features,
            keys: Vec::new(),
            timestamps: Vec::new(),
            columns,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Append one row. `timestamp` is ignored when the table has no timestamp column.
    pub fn push_row(
        &mut self,
        key: EntityKey,
        timestamp: Option<DateTime<Utc>>,
        values: Vec<FeatureValue>,
    ) -> Result<(), OfflineError> {
        let row = self.keys.len() + 1;
        if key.value_type() != self.key_type {
            return Err(OfflineError::InvalidValue {
                column: self.schema.field(0).name().clone(),
                row,
                message: format!("key {} is not {}", key, self.key_type),
            });
        }
        if values.len() != self.features.len() {
            return Err(OfflineError::InvalidValue {
                column: "*".to_string(),
                row,
                message: format!(
                    "expected {} feature values, got {}",
                    self.features.len(),
                    values.len()
                ),
            });
        }
        for ((name, dtype), value) in self.features.iter().zip(&values) {
            if !value.matches(*dtype) {
                return Err(OfflineError::InvalidValue {
                    column: name.clone(),
                    row,
                    message: format!("{:?} is not {}", value, dtype),
                });
            }
        }
        if self.with_timestamp {
            let ts = timestamp.ok_or_else(|| OfflineError::NullValue {
                column: self.schema.field(1).name().clone(),
                row,
            })?;
            self.timestamps.push(ts.timestamp_micros());
        }
        self.keys.push(key);
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(value);
        }
        Ok(())
    }

    pub fn finish(self) -> Result<RecordBatch, OfflineError> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.fields().len());
        arrays.push(build_keys(&self.keys, self.key_type));
        if self.with_timestamp {
            let mut builder = TimestampMicrosecondBuilder::with_capacity(self.timestamps.len());
            builder.append_slice(&self.timestamps);
            arrays.push(Arc::new(builder.finish().with_timezone("UTC")));
        }
        for ((_, dtype), values) in self.features.iter().zip(&self.columns) {
            arrays.push(build_values(values, *dtype));
        }
        Ok(RecordBatch::try_new(self.schema, arrays)?)
    }
}

fn build_keys(keys: &[EntityKey], key_type: ValueType) -> ArrayRef {
    match key_type {
        ValueType::Int64 => {
            let mut builder = Int64Builder::with_capacity(keys.len());
            for key in keys {
                if let EntityKey::Int64(v) = key {
                    builder.append_value(*v);
                }
            }
            Arc::new(builder.finish())
        }
        ValueType::String => {
            let mut builder = StringBuilder::new();
            for key in keys {
                if let EntityKey::String(v) = key {
                    builder.append_value(v);
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn build_values(values: &[FeatureValue], dtype: FeatureDtype) -> ArrayRef {
    match dtype {
        FeatureDtype::Int64 => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    FeatureValue::Int64(x) => builder.append_value(*x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        FeatureDtype::Float32 => {
            let mut builder = Float32Builder::with_capacity(values.len());
            for v in values {
                match v {
                    FeatureValue::Float32(x) => builder.append_value(*x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        FeatureDtype::Float64 => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for v in values {
                match v {
                    FeatureValue::Float64(x) => builder.append_value(*x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        FeatureDtype::String => {
            let mut builder = StringBuilder::new();
            for v in values {
                match v {
                    FeatureValue::String(x) => builder.append_value(x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

/// Read a feature column back out of a table.
pub fn feature_column(
    batch: &RecordBatch,
    name: &str,
    dtype: FeatureDtype,
) -> Result<Vec<FeatureValue>, OfflineError> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| OfflineError::MissingColumn {
            column: name.to_string(),
            path: Default::default(),
        })?;
    (0..batch.num_rows())
        .map(|row| value_at(array, row, dtype, name))
        .collect()
}

/// Read the entity key column back out of a table.
pub fn key_column(
    batch: &RecordBatch,
    name: &str,
    key_type: ValueType,
) -> Result<Vec<EntityKey>, OfflineError> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| OfflineError::MissingColumn {
            column: name.to_string(),
            path: Default::default(),
        })?;
    (0..batch.num_rows())
        .map(|row| key_at(array, row, key_type, name))
        .collect()
}

/// Render a table for terminal output.
pub fn render(batch: &RecordBatch) -> Result<String, OfflineError> {
    Ok(arrow::util::pretty::pretty_format_batches(std::slice::from_ref(batch))?.to_string())
}
