//! Configuration resolution.
//!
//! Resolution order for the config file:
//! 1. Explicit CLI flag (`--config`)
//! 2. `CFS_CONFIG` environment variable
//! 3. `./config.yaml` in the working directory
//! 4. `$XDG_CONFIG_HOME/customer_feature_store/config.yaml`
//! 5. Built-in defaults
//!
//! The project root substituted for `{project_root}` is `CFS_PROJECT_ROOT`
//! when set, otherwise the directory holding the config file, otherwise the
//! working directory.

use std::env;
use std::path::{Path, PathBuf};

use super::Settings;
use crate::error::Result;

/// How the config file was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigResolution {
    /// From explicit CLI flag
    CliFlag,
    /// From environment variable
    EnvVar,
    /// From the working directory
    WorkingDir,
    /// From XDG config directory
    XdgConfig,
    /// Using built-in defaults
    #[default]
    Default,
}

impl std::fmt::Display for ConfigResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigResolution::CliFlag => write!(f, "cli"),
            ConfigResolution::EnvVar => write!(f, "env"),
            ConfigResolution::WorkingDir => write!(f, "cwd"),
            ConfigResolution::XdgConfig => write!(f, "xdg"),
            ConfigResolution::Default => write!(f, "default"),
        }
    }
}

/// Where the loaded settings came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    /// Path to the config file, or None if using defaults
    pub path: Option<PathBuf>,
    /// How this source was resolved
    pub resolution: ConfigResolution,
}

/// Configuration resolver with deterministic resolution order.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver with an optional CLI override.
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        ConfigResolver { cli_path }
    }

    /// Resolve the config file path from the process environment.
    pub fn resolve_config_path(&self) -> (Option<PathBuf>, ConfigResolution) {
        self.resolve_config_path_with(|k| env::var(k).ok(), env::current_dir().ok())
    }

    /// Resolve with an injected environment lookup and working directory.
    pub fn resolve_config_path_with<F>(
        &self,
        lookup: F,
        cwd: Option<PathBuf>,
    ) -> (Option<PathBuf>, ConfigResolution)
    where
        F: Fn(&str) -> Option<String>,
    {
        // 1. CLI flag
        if let Some(ref path) = self.cli_path {
            return (Some(path.clone()), ConfigResolution::CliFlag);
        }

        // 2. CFS_CONFIG env var
        if let Some(path) = lookup("CFS_CONFIG") {
            return (Some(PathBuf::from(path)), ConfigResolution::EnvVar);
        }

        // 3. Working directory
        if let Some(cwd) = cwd {
            let path = cwd.join("config.yaml");
            if path.is_file() {
                return (Some(path), ConfigResolution::WorkingDir);
            }
        }

        // 4. XDG config dir
        let xdg = lookup("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir);
        if let Some(dir) = xdg {
            let path = dir.join("customer_feature_store").join("config.yaml");
            if path.is_file() {
                return (Some(path), ConfigResolution::XdgConfig);
            }
        }

        // 5. Defaults
        (None, ConfigResolution::Default)
    }

    /// Load settings using the process environment.
    pub fn load(&self) -> Result<Settings> {
        self.load_with(|k| env::var(k).ok(), env::current_dir().ok())
    }

    /// Load settings with an injected environment lookup and working directory.
    pub fn load_with<F>(&self, lookup: F, cwd: Option<PathBuf>) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (path, resolution) = self.resolve_config_path_with(&lookup, cwd.clone());
        let root = project_root(
            lookup("CFS_PROJECT_ROOT").map(PathBuf::from),
            path.as_deref(),
            cwd,
        );

        let settings = match &path {
            Some(p) => Settings::load(p, root)?,
            None => Settings::defaults(root)?,
        };
        Ok(settings.with_source(ConfigSource { path, resolution }))
    }
}

fn project_root(
    explicit: Option<PathBuf>,
    config_path: Option<&Path>,
    cwd: Option<PathBuf>,
) -> PathBuf {
    if let Some(root) = explicit {
        return root;
    }
    let cwd = cwd.unwrap_or_else(|| PathBuf::from("."));
    match config_path.and_then(Path::parent) {
        Some(parent) if parent.is_absolute() => parent.to_path_buf(),
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_cli_flag_wins() {
        let resolver = ConfigResolver::new(Some(PathBuf::from("/etc/cfs.yaml")));
        let (path, res) =
            resolver.resolve_config_path_with(env_of(&[("CFS_CONFIG", "/other.yaml")]), None);
        assert_eq!(path, Some(PathBuf::from("/etc/cfs.yaml")));
        assert_eq!(res, ConfigResolution::CliFlag);
    }

    #[test]
    fn test_env_before_cwd() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.yaml"), "data: {}\n").unwrap();
        let resolver = ConfigResolver::default();
        let (path, res) = resolver.resolve_config_path_with(
            env_of(&[("CFS_CONFIG", "/env.yaml")]),
            Some(dir.path().to_path_buf()),
        );
        assert_eq!(path, Some(PathBuf::from("/env.yaml")));
        assert_eq!(res, ConfigResolution::EnvVar);
    }

    #[test]
    fn test_cwd_config_sets_project_root() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "data:\n  test_task_data: \"{project_root}/raw.csv\"\n",
        )
        .unwrap();
        let empty_xdg = TempDir::new().unwrap();
        let resolver = ConfigResolver::default();
        let settings = resolver
            .load_with(
                env_of(&[("XDG_CONFIG_HOME", empty_xdg.path().to_str().unwrap())]),
                Some(dir.path().to_path_buf()),
            )
            .unwrap();
        assert_eq!(settings.source.resolution, ConfigResolution::WorkingDir);
        assert_eq!(
            settings.data_path("test_task_data").unwrap(),
            dir.path().join("raw.csv")
        );
    }

    #[test]
    fn test_falls_back_to_defaults() {
        let cwd = TempDir::new().unwrap();
        let xdg = TempDir::new().unwrap();
        let resolver = ConfigResolver::default();
        let settings = resolver
            .load_with(
                env_of(&[("XDG_CONFIG_HOME", xdg.path().to_str().unwrap())]),
                Some(cwd.path().to_path_buf()),
            )
            .unwrap();
        assert_eq!(settings.source.resolution, ConfigResolution::Default);
        assert!(settings.source.path.is_none());
        assert_eq!(settings.project_root(), cwd.path());
    }

    #[test]
    fn test_explicit_project_root_env() {
        let cwd = TempDir::new().unwrap();
        let xdg = TempDir::new().unwrap();
        let settings = ConfigResolver::default()
            .load_with(
                env_of(&[
                    ("XDG_CONFIG_HOME", xdg.path().to_str().unwrap()),
                    ("CFS_PROJECT_ROOT", "/opt/features"),
                ]),
                Some(cwd.path().to_path_buf()),
            )
            .unwrap();
        assert_eq!(settings.project_root(), Path::new("/opt/features"));
    }

    #[test]
    fn test_missing_cli_file_is_config_error() {
        let resolver = ConfigResolver::new(Some(PathBuf::from("/definitely/not/here.yaml")));
        let err = resolver.load_with(env_of(&[]), None).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
