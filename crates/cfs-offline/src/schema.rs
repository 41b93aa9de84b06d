//! Arrow schema definitions for the purchase dataset and feature tables.
//!
//! Columns of the converted source:
//! - `purchase_timestamp`: event time, microseconds UTC
//! - `customer_id`: entity join key, int64
//! - `purchase_value`: float64 feature
//! - `loyalty_score`: float32 feature
//!
//! Any other input column is carried through as nullable Utf8.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use cfs_common::{EntityKey, FeatureDtype, FeatureValue, ValueType};

use crate::error::OfflineError;

/// Event time column of the purchase dataset.
pub const PURCHASE_TIMESTAMP: &str = "purchase_timestamp";
/// Entity join key column.
pub const CUSTOMER_ID: &str = "customer_id";
/// Purchase amount feature.
pub const PURCHASE_VALUE: &str = "purchase_value";
/// Loyalty score feature.
pub const LOYALTY_SCORE: &str = "loyalty_score";

/// Enforced type of a column in the converted source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Timestamp,
    Int64,
    Float64,
    Float32,
}

impl ColumnKind {
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnKind::Timestamp => utc_timestamp_type(),
            ColumnKind::Int64 => DataType::Int64,
            ColumnKind::Float64 => DataType::Float64,
            ColumnKind::Float32 => DataType::Float32,
        }
    }

    /// Whether a null cell is acceptable for this kind.
    pub fn nullable(&self) -> bool {
        matches!(self, ColumnKind::Float64 | ColumnKind::Float32)
    }
}

/// Required columns of the purchase dataset, in canonical order.
pub fn purchase_columns() -> [(&'static str, ColumnKind); 4] {
    [
        (PURCHASE_TIMESTAMP, ColumnKind::Timestamp),
        (CUSTOMER_ID, ColumnKind::Int64),
        (PURCHASE_VALUE, ColumnKind::Float64),
        (LOYALTY_SCORE, ColumnKind::Float32),
    ]
}

/// Look up the enforced kind of a column, if it is one of the required ones.
pub fn column_kind(name: &str) -> Option<ColumnKind> {
    purchase_columns()
        .into_iter()
        .find(|(col, _)| *col == name)
        .map(|(_, kind)| kind)
}

/// Microsecond timestamps pinned to UTC.
pub fn utc_timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

/// Helper to create a timestamp field (microseconds UTC).
pub fn timestamp_field(name: &str, nullable: bool) -> Field {
    Field::new(name, utc_timestamp_type(), nullable)
}

/// Arrow type of a feature dtype.
pub fn feature_data_type(dtype: FeatureDtype) -> DataType {
    match dtype {
        FeatureDtype::Int64 => DataType::Int64,
        FeatureDtype::Float32 => DataType::Float32,
        FeatureDtype::Float64 => DataType::Float64,
        FeatureDtype::String => DataType::Utf8,
    }
}

/// Arrow type of an entity key value type.
pub fn key_data_type(value_type: ValueType) -> DataType {
    match value_type {
        ValueType::Int64 => DataType::Int64,
        ValueType::String => DataType::Utf8,
    }
}

/// Schema of a feature table: key, optional event timestamp, features.
pub fn feature_table_schema(
    key: (&str, ValueType),
    timestamp: Option<&str>,
    features: &[(String, FeatureDtype)],
) -> Arc<Schema> {
    let mut fields = vec![Field::new(key.0, key_data_type(key.1), false)];
    if let Some(ts) = timestamp {
        fields.push(timestamp_field(ts, false));
    }
    for (name, dtype) in features {
        fields.push(Field::new(name, feature_data_type(*dtype), true));
    }
    Arc::new(Schema::new(fields))
}

fn downcast<'a, T: 'static>(
    array: &'a ArrayRef,
    column: &str,
    expected: &str,
) -> Result<&'a T, OfflineError> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| OfflineError::ColumnType {
            column: column.to_string(),
            expected: expected.to_string(),
            message: format!("found {}", array.data_type()),
        })
}

/// Read one feature value from an array already cast to `dtype`.
pub fn value_at(
    array: &ArrayRef,
    row: usize,
    dtype: FeatureDtype,
    column: &str,
) -> Result<FeatureValue, OfflineError> {
    if array.is_null(row) {
        return Ok(FeatureValue::Null);
    }
    let value = match dtype {
        FeatureDtype::Int64 => {
            FeatureValue::Int64(downcast::<Int64Array>(array, column, "int64")?.value(row))
        }
        FeatureDtype::Float32 => {
            let v = downcast::<Float32Array>(array, column, "float32")?.value(row);
            if !v.is_finite() {
                return Ok(FeatureValue::Null);
            }
            FeatureValue::Float32(v)
        }
        FeatureDtype::Float64 => {
            let v = downcast::<Float64Array>(array, column, "float64")?.value(row);
            if !v.is_finite() {
                return Ok(FeatureValue::Null);
            }
            FeatureValue::Float64(v)
        }
        FeatureDtype::String => FeatureValue::String(
            downcast::<StringArray>(array, column, "string")?
                .value(row)
                .to_string(),
        ),
    };
    Ok(value)
}

/// Read one entity key from an array already cast to the key's arrow type.
pub fn key_at(
    array: &ArrayRef,
    row: usize,
    value_type: ValueType,
    column: &str,
) -> Result<EntityKey, OfflineError> {
    if array.is_null(row) {
        return Err(OfflineError::NullValue {
            column: column.to_string(),
            row: row + 1,
        });
    }
    match value_type {
        ValueType::Int64 => Ok(EntityKey::Int64(
            downcast::<Int64Array>(array, column, "int64")?.value(row),
        )),
        ValueType::String => Ok(EntityKey::String(
            downcast::<StringArray>(array, column, "string")?
                .value(row)
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purchase_column_types() {
        let ts = column_kind(PURCHASE_TIMESTAMP).unwrap();
        assert_eq!(ts.data_type(), utc_timestamp_type());
        assert!(!ts.nullable());
        assert_eq!(column_kind(CUSTOMER_ID).unwrap().data_type(), DataType::Int64);
        assert_eq!(
            column_kind(LOYALTY_SCORE).unwrap().data_type(),
            DataType::Float32
        );
        assert!(column_kind(PURCHASE_VALUE).unwrap().nullable());
    }

    #[test]
    fn test_column_kind_lookup() {
        assert_eq!(column_kind("customer_id"), Some(ColumnKind::Int64));
        assert_eq!(column_kind("store_name"), None);
    }

    #[test]
    fn test_feature_table_schema_layout() {
        let schema = feature_table_schema(
            ("customer_id", ValueType::Int64),
            Some("event_timestamp"),
            &[("purchase_value".to_string(), FeatureDtype::Float64)],
        );
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["customer_id", "event_timestamp", "purchase_value"]);
    }

    #[test]
    fn test_value_at_null_and_typed() {
        let arr: ArrayRef = Arc::new(Float32Array::from(vec![Some(0.5f32), None]));
        assert_eq!(
            value_at(&arr, 0, FeatureDtype::Float32, "x").unwrap(),
            FeatureValue::Float32(0.5)
        );
        assert_eq!(
            value_at(&arr, 1, FeatureDtype::Float32, "x").unwrap(),
            FeatureValue::Null
        );
        assert!(value_at(&arr, 0, FeatureDtype::Float64, "x").is_err());
    }

    #[test]
    fn test_value_at_non_finite_is_null() {
        let arr: ArrayRef = Arc::new(Float64Array::from(vec![f64::NAN, f64::INFINITY, 1.5]));
        assert_eq!(
            value_at(&arr, 0, FeatureDtype::Float64, "x").unwrap(),
            FeatureValue::Null
        );
        assert_eq!(
            value_at(&arr, 1, FeatureDtype::Float64, "x").unwrap(),
            FeatureValue::Null
        );
        assert_eq!(
            value_at(&arr, 2, FeatureDtype::Float64, "x").unwrap(),
            FeatureValue::Float64(1.5)
        );
    }

    #[test]
    fn test_key_at_rejects_null() {
        let arr: ArrayRef = Arc::new(Int64Array::from(vec![None::<i64>]));
        let err = key_at(&arr, 0, ValueType::Int64, "customer_id").unwrap_err();
        assert!(matches!(err, OfflineError::NullValue { row: 1, .. }));
    }
}
