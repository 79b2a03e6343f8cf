// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storage_sys::{DEFAULT_MAX_UNMAP_ATTEMPTS, RbdSettings};

use crate::error::{GcError, Result};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "STORAGE_GC_CONFIG";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Daily-rolling log files are written here when set
    pub directory: Option<PathBuf>,
    pub keep_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            directory: None,
            keep_days: 7,
        }
    }
}

/// Collector configuration, read from TOML
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    pub cluster: String,
    pub user: String,
    pub rbd_binary: String,
    pub lock_dir: PathBuf,
    pub max_unmap_attempts: u32,
    pub logging: LoggingConfig,
}

impl Default for GcConfig {
    fn default() -> Self {
        let rbd = RbdSettings::default();
        Self {
            cluster: rbd.cluster,
            user: rbd.user,
            rbd_binary: rbd.binary,
            lock_dir: PathBuf::from("/run/storage-gc"),
            max_unmap_attempts: DEFAULT_MAX_UNMAP_ATTEMPTS,
            logging: LoggingConfig::default(),
        }
    }
}

impl GcConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let invalid = |reason: String| GcError::Config {
            path: path.to_path_buf(),
            reason,
        };

        let raw = fs::read_to_string(path).map_err(|error| invalid(error.to_string()))?;
        let config: Self = toml::from_str(&raw).map_err(|error| invalid(error.to_string()))?;

        if config.max_unmap_attempts == 0 {
            return Err(invalid("max_unmap_attempts must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Load from an explicit path, then `$STORAGE_GC_CONFIG`, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn rbd_settings(&self) -> RbdSettings {
        RbdSettings {
            binary: self.rbd_binary.clone(),
            cluster: self.cluster.clone(),
            user: self.user.clone(),
            max_unmap_attempts: self.max_unmap_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> std::result::Result<GcConfig, toml::de::Error> {
        toml::from_str(raw)
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config, GcConfig::default());
        assert_eq!(config.cluster, "ceph");
        assert_eq!(config.user, "admin");
        assert_eq!(config.logging.keep_days, 7);
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let config = parse(
            r#"
            user = "lxd"
            max_unmap_attempts = 8

            [logging]
            level = "debug"
            directory = "/var/log/storage-gc"
            "#,
        )
        .unwrap();

        assert_eq!(config.cluster, "ceph");
        assert_eq!(config.user, "lxd");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.keep_days, 7);

        let settings = config.rbd_settings();
        assert_eq!(settings.user, "lxd");
        assert_eq!(settings.max_unmap_attempts, 8);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse("clusterr = \"ceph\"").is_err());
        assert!(parse("[logging]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn load_reports_the_path() {
        let path = std::env::temp_dir().join(format!("storage-gc-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "max_unmap_attempts = 0\n").unwrap();

        let err = GcConfig::load(&path).unwrap_err();
        assert!(matches!(err, GcError::Config { .. }));
        assert!(err.to_string().contains("max_unmap_attempts"));
        let _ = fs::remove_file(&path);
    }
}
