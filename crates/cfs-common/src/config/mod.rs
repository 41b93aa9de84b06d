//! Configuration for the customer feature store.
//!
//! This module provides:
//! - Typed settings parsed from a YAML document
//! - `{project_root}` templating of every string value
//! - Logical data keys resolved to absolute paths
//! - Deterministic config file resolution (CLI > env > cwd > XDG > defaults)
//!
//! `Settings` is built once at process start and passed by reference to
//! every component that needs it.

pub mod resolve;

pub use resolve::{ConfigResolution, ConfigResolver, ConfigSource};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Placeholder substituted with the project root in every string value.
pub const PROJECT_ROOT_PLACEHOLDER: &str = "{project_root}";

/// Data key of the raw CSV dataset.
pub const SOURCE_DATA_KEY: &str = "test_task_data";

/// Data key of the feature repository directory.
pub const FEATURE_REPO_KEY: &str = "feature_repo_path";

/// Built-in configuration used when no config file is found.
pub const DEFAULT_CONFIG_YAML: &str = r#"
data:
  test_task_data: "{project_root}/feature_repo/data/test_task_data.csv"
  feature_repo_path: "{project_root}/feature_repo"
redis:
  host: localhost
  port: 6379
feature_store:
  project: customer_feature_store
  timezone: Europe/Athens
  online_store:
    type: sqlite
"#;

/// Redis connection settings for the online store and its side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port", deserialize_with = "deserialize_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl RedisSettings {
    /// Connection URL understood by the redis client.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

/// Ports show up both as numbers and as quoted strings in hand-written YAML.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(p) => Ok(p),
        Port::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", s))),
    }
}

/// Which backend holds materialized feature values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnlineStoreSettings {
    /// Local SQLite file. Defaults to `<feature_repo>/data/online_store.db`.
    Sqlite {
        #[serde(default)]
        path: Option<String>,
    },
    /// Redis, using the top-level `redis` connection settings.
    Redis,
}

impl Default for OnlineStoreSettings {
    fn default() -> Self {
        OnlineStoreSettings::Sqlite { path: None }
    }
}

/// Feature store engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStoreSettings {
    #[serde(default = "default_project")]
    pub project: String,
    /// Registry file. Defaults to `<feature_repo>/data/registry.json`.
    #[serde(default)]
    pub registry_path: Option<String>,
    #[serde(default)]
    pub online_store: OnlineStoreSettings,
    /// Timezone of naive timestamps in the source data and CLI arguments.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for FeatureStoreSettings {
    fn default() -> Self {
        FeatureStoreSettings {
            project: default_project(),
            registry_path: None,
            online_store: OnlineStoreSettings::default(),
            timezone: default_timezone(),
        }
    }
}

fn default_project() -> String {
    "customer_feature_store".to_string()
}

fn default_timezone() -> String {
    "Europe/Athens".to_string()
}

#[derive(Debug, Deserialize)]
struct SettingsDoc {
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    redis: RedisSettings,
    #[serde(default)]
    feature_store: FeatureStoreSettings,
}

/// Loaded, templated, validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    raw: serde_yaml::Value,
    project_root: PathBuf,
    data: BTreeMap<String, String>,
    timezone: Tz,
    pub redis: RedisSettings,
    pub feature_store: FeatureStoreSettings,
    pub source: ConfigSource,
}

impl Settings {
    /// Parse a YAML document, substituting `{project_root}` everywhere.
    pub fn from_yaml_str(text: &str, project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let mut raw: serde_yaml::Value = serde_yaml::from_str(text)?;
        if raw.is_null() {
            raw = serde_yaml::Value::Mapping(Default::default());
        }
        substitute_project_root(&mut raw, &project_root.to_string_lossy());

        let doc: SettingsDoc = serde_yaml::from_value(raw.clone())
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;

        let timezone: Tz = doc.feature_store.timezone.parse().map_err(|_| {
            Error::Config(format!(
                "unknown timezone: {:?}",
                doc.feature_store.timezone
            ))
        })?;

        Ok(Settings {
            raw,
            project_root,
            data: doc.data,
            timezone,
            redis: doc.redis,
            feature_store: doc.feature_store,
            source: ConfigSource::default(),
        })
    }

    /// Read and parse a YAML file.
    pub fn load(path: &Path, project_root: impl Into<PathBuf>) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text, project_root)
    }

    /// Built-in defaults rooted at `project_root`.
    pub fn defaults(project_root: impl Into<PathBuf>) -> Result<Self> {
        Self::from_yaml_str(DEFAULT_CONFIG_YAML, project_root)
    }

    /// Attach provenance information.
    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.source = source;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Timezone for naive timestamps.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Resolve a logical data key to an absolute path.
    pub fn data_path(&self, key: &str) -> Result<PathBuf> {
        let value = self.data.get(key).ok_or_else(|| Error::DataKeyNotFound {
            key: key.to_string(),
        })?;
        Ok(self.resolve_path(value))
    }

    /// Directory holding the registry and the local online store.
    pub fn feature_repo_path(&self) -> Result<PathBuf> {
        self.data_path(FEATURE_REPO_KEY)
    }

    /// Registry file location.
    pub fn registry_path(&self) -> Result<PathBuf> {
        match &self.feature_store.registry_path {
            Some(p) => Ok(self.resolve_path(p)),
            None => Ok(self.feature_repo_path()?.join("data").join("registry.json")),
        }
    }

    /// SQLite online store location, if the sqlite backend is configured.
    pub fn sqlite_online_store_path(&self) -> Result<Option<PathBuf>> {
        match &self.feature_store.online_store {
            OnlineStoreSettings::Sqlite { path: Some(p) } => Ok(Some(self.resolve_path(p))),
            OnlineStoreSettings::Sqlite { path: None } => Ok(Some(
                self.feature_repo_path()?.join("data").join("online_store.db"),
            )),
            OnlineStoreSettings::Redis => Ok(None),
        }
    }

    /// Nested raw lookup, e.g. `get(&["redis", "host"])`.
    pub fn get(&self, keys: &[&str]) -> Option<&serde_yaml::Value> {
        let mut node = &self.raw;
        for key in keys {
            node = node.get(*key)?;
        }
        Some(node)
    }

    /// Nested lookup of a string value.
    pub fn get_str(&self, keys: &[&str]) -> Option<&str> {
        self.get(keys).and_then(|v| v.as_str())
    }

    fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        };
        normalize(&joined)
    }
}

/// Lexically normalize `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn substitute_project_root(value: &mut serde_yaml::Value, root: &str) {
    match value {
        serde_yaml::Value::String(s) if s.contains(PROJECT_ROOT_PLACEHOLDER) => {
            *s = s.replace(PROJECT_ROOT_PLACEHOLDER, root);
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_project_root(v, root);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                substitute_project_root(v, root);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_paths() {
        let settings = Settings::defaults("/srv/app").unwrap();
        assert_eq!(
            settings.data_path(SOURCE_DATA_KEY).unwrap(),
            PathBuf::from("/srv/app/feature_repo/data/test_task_data.csv")
        );
        assert_eq!(
            settings.registry_path().unwrap(),
            PathBuf::from("/srv/app/feature_repo/data/registry.json")
        );
        assert_eq!(
            settings.sqlite_online_store_path().unwrap(),
            Some(PathBuf::from("/srv/app/feature_repo/data/online_store.db"))
        );
        assert_eq!(settings.timezone(), chrono_tz::Europe::Athens);
    }

    #[test]
    fn test_unknown_data_key() {
        let settings = Settings::defaults("/srv/app").unwrap();
        let err = settings.data_path("nope").unwrap_err();
        assert!(matches!(err, Error::DataKeyNotFound { ref key } if key == "nope"));
    }

    #[test]
    fn test_relative_paths_join_project_root() {
        let yaml = "data:\n  raw: ./data/../data/raw.csv\n";
        let settings = Settings::from_yaml_str(yaml, "/proj").unwrap();
        assert_eq!(
            settings.data_path("raw").unwrap(),
            PathBuf::from("/proj/data/raw.csv")
        );
    }

    #[test]
    fn test_nested_get_and_string_port() {
        let yaml = "redis:\n  host: cache.internal\n  port: \"6380\"\n";
        let settings = Settings::from_yaml_str(yaml, "/p").unwrap();
        assert_eq!(settings.get_str(&["redis", "host"]), Some("cache.internal"));
        assert_eq!(settings.redis.port, 6380);
        assert_eq!(settings.redis.url(), "redis://cache.internal:6380/0");
        assert!(settings.get(&["redis", "missing"]).is_none());
    }

    #[test]
    fn test_placeholder_substituted_in_nested_values() {
        let yaml = "feature_store:\n  registry_path: \"{project_root}/meta/reg.json\"\n";
        let settings = Settings::from_yaml_str(yaml, "/root/x").unwrap();
        assert_eq!(
            settings.get_str(&["feature_store", "registry_path"]),
            Some("/root/x/meta/reg.json")
        );
        assert_eq!(
            settings.registry_path().unwrap(),
            PathBuf::from("/root/x/meta/reg.json")
        );
    }

    #[test]
    fn test_redis_online_store_has_no_sqlite_path() {
        let yaml = "feature_store:\n  online_store:\n    type: redis\n";
        let settings = Settings::from_yaml_str(yaml, "/p").unwrap();
        assert_eq!(settings.feature_store.online_store, OnlineStoreSettings::Redis);
        assert_eq!(settings.sqlite_online_store_path().unwrap(), None);
    }

    #[test]
    fn test_invalid_timezone_is_config_error() {
        let yaml = "feature_store:\n  timezone: Mars/Olympus\n";
        let err = Settings::from_yaml_str(yaml, "/p").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = Settings::from_yaml_str("", "/p").unwrap();
        assert_eq!(settings.feature_store.project, "customer_feature_store");
        assert_eq!(settings.redis, RedisSettings::default());
    }
}
