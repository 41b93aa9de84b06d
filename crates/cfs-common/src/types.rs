//! Shared value types: entity keys, feature dtypes, feature values, and feature references.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Value type of an entity join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int64,
    String,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Int64 => write!(f, "int64"),
            ValueType::String => write!(f, "string"),
        }
    }
}

/// Declared type of a feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDtype {
    Int64,
    Float32,
    Float64,
    String,
}

impl std::fmt::Display for FeatureDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureDtype::Int64 => write!(f, "int64"),
            FeatureDtype::Float32 => write!(f, "float32"),
            FeatureDtype::Float64 => write!(f, "float64"),
            FeatureDtype::String => write!(f, "string"),
        }
    }
}

/// A single feature value. `Null` stands for "no value known".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureValue {
    #[default]
    Null,
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
}

impl FeatureValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FeatureValue::Null)
    }

    /// Whether this value can be stored in a column of `dtype`.
    pub fn matches(&self, dtype: FeatureDtype) -> bool {
        matches!(
            (self, dtype),
            (FeatureValue::Null, _)
                | (FeatureValue::Int64(_), FeatureDtype::Int64)
                | (FeatureValue::Float32(_), FeatureDtype::Float32)
                | (FeatureValue::Float64(_), FeatureDtype::Float64)
                | (FeatureValue::String(_), FeatureDtype::String)
        )
    }
}

/// Typed value of an entity join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int64(i64),
    String(String),
}

impl EntityKey {
    /// Parse a raw identifier according to the entity's declared value type.
    ///
    /// Integral floats (`"42.0"`) are accepted for `Int64` keys since that is
    /// how spreadsheet exports commonly render integer ids.
    pub fn parse(raw: &str, value_type: ValueType) -> Result<Self> {
        let raw = raw.trim();
        match value_type {
            ValueType::String => Ok(EntityKey::String(raw.to_string())),
            ValueType::Int64 => parse_integral(raw).map(EntityKey::Int64).ok_or_else(|| {
                Error::SchemaMismatch(format!("entity key {:?} is not a valid int64", raw))
            }),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            EntityKey::Int64(_) => ValueType::Int64,
            EntityKey::String(_) => ValueType::String,
        }
    }

    /// Stable key used by online stores. Type-prefixed so `1` and `"1"` never collide.
    pub fn storage_key(&self) -> String {
        match self {
            EntityKey::Int64(v) => format!("i:{}", v),
            EntityKey::String(v) => format!("s:{}", v),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Int64(v) => write!(f, "{}", v),
            EntityKey::String(v) => write!(f, "{}", v),
        }
    }
}

/// Parse `"42"` or `"42.0"` into an i64.
pub fn parse_integral(raw: &str) -> Option<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        Some(f as i64)
    } else {
        None
    }
}

/// Reference to a feature inside a feature view: `view:feature`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRef {
    pub feature_view: String,
    pub name: String,
}

impl FeatureRef {
    pub fn new(feature_view: impl Into<String>, name: impl Into<String>) -> Self {
        FeatureRef {
            feature_view: feature_view.into(),
            name: name.into(),
        }
    }

    /// Parse `view:feature`; a bare `feature` is resolved against `default_view`.
    pub fn parse(raw: &str, default_view: &str) -> Result<Self> {
        let raw = raw.trim();
        let (view, name) = match raw.split_once(':') {
            Some((view, name)) => (view.trim(), name.trim()),
            None => (default_view, raw),
        };
        if view.is_empty() || name.is_empty() || name.contains(':') {
            return Err(Error::InvalidArgument(format!(
                "malformed feature reference {:?}, expected <view>:<feature>",
                raw
            )));
        }
        Ok(FeatureRef::new(view, name))
    }
}

impl std::fmt::Display for FeatureRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.feature_view, self.name)
    }
}
