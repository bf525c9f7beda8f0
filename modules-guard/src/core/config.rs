/*!
Configuration management for the guard
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, StartupError};

/// Payload written back whenever the target file disappears.
pub const DEFAULT_MODULES_CONTENT: &str = "<?php
return [
  'Advanced' => ['order' => 15],
  'ChatPlugin' => [],
  'Crm' => ['order' => 10],
  'Erp' => [],
  'Google' => ['order' => 21],
  'PM' => [],
  'PushNotifications' => [],
  'Sales' => []
];
";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directory monitoring settings
    pub watch: WatchConfig,
    /// Restoration behavior settings
    pub restore: RestoreConfig,
    /// Log sink settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory to watch, non-recursively
    pub directory: PathBuf,
    /// Filename suffix whose deletion triggers a restore
    pub target_file: String,
    /// Notification backend
    pub backend: MonitorBackend,
    /// Scan interval for the polling backend in milliseconds
    pub poll_interval_ms: u64,
    /// Number of events buffered between the monitor and the worker
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorBackend {
    /// inotify / FSEvents / ReadDirectoryChangesW
    Native,
    /// Periodic directory scans
    Poll,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// How often to check for the parent directory, in milliseconds
    pub poll_interval_ms: u64,
    /// How long to wait for the parent directory, in milliseconds
    pub timeout_ms: u64,
    /// Optional file whose bytes replace the built-in payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_name: String,
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/home/admin/web/alis-is.com/public_html/data/cache/application"),
            target_file: "modules.php".to_string(),
            backend: MonitorBackend::Native,
            poll_interval_ms: 500,
            channel_capacity: 64,
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            timeout_ms: 10_000,
            content_path: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/home/admin/web/pythonScripts/observer"),
            file_name: "observer.log".to_string(),
            level: "info".to_string(),
        }
    }
}

impl GuardConfig {
    /// Load a config file. Missing sections fall back to defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let target = &self.watch.target_file;
        if target.is_empty() {
            return Err(ConfigError::Invalid("watch.target_file must not be empty".into()));
        }
        if target.contains(std::path::MAIN_SEPARATOR) || target.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "watch.target_file must be a file name, got {target:?}"
            )));
        }
        if self.watch.channel_capacity == 0 {
            return Err(ConfigError::Invalid("watch.channel_capacity must be positive".into()));
        }
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("watch.poll_interval_ms must be positive".into()));
        }
        if self.restore.poll_interval_ms == 0 || self.restore.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "restore.poll_interval_ms and restore.timeout_ms must be positive".into(),
            ));
        }
        if self.logging.file_name.is_empty() {
            return Err(ConfigError::Invalid("logging.file_name must not be empty".into()));
        }
        Ok(())
    }
}

impl RestoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The single, immutable thing this process protects.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub directory: PathBuf,
    pub target_file: String,
    pub content: Arc<[u8]>,
}

impl WatchTarget {
    /// Resolve the payload once; it is replayed verbatim on every restore.
    pub fn from_config(config: &GuardConfig) -> Result<Self, StartupError> {
        let content: Arc<[u8]> = match &config.restore.content_path {
            Some(path) => std::fs::read(path)
                .map_err(|source| StartupError::Content {
                    path: path.clone(),
                    source,
                })?
                .into(),
            None => DEFAULT_MODULES_CONTENT.as_bytes().into(),
        };

        Ok(Self {
            directory: config.watch.directory.clone(),
            target_file: config.watch.target_file.clone(),
            content,
        })
    }

    /// Hex blake3 digest of the payload, logged so operators can tell payloads apart.
    pub fn content_digest(&self) -> String {
        blake3::hash(&self.content).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let config = GuardConfig::default();
        assert_eq!(config.watch.target_file, "modules.php");
        assert_eq!(config.watch.backend, MonitorBackend::Native);
        assert_eq!(config.restore.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.restore.timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(
            &path,
            "[watch]\ndirectory = \"/srv/cache\"\nbackend = \"poll\"\n\n[restore]\ntimeout_ms = 2500\n",
        )
        .unwrap();

        let config = GuardConfig::from_file(&path).unwrap();
        assert_eq!(config.watch.directory, PathBuf::from("/srv/cache"));
        assert_eq!(config.watch.backend, MonitorBackend::Poll);
        assert_eq!(config.watch.target_file, "modules.php");
        assert_eq!(config.restore.timeout_ms, 2500);
        assert_eq!(config.restore.poll_interval_ms, 100);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[watch\n").unwrap();

        assert!(matches!(GuardConfig::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = GuardConfig::from_file("/nonexistent/modules-guard.toml");
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn rejects_target_with_separator() {
        let mut config = GuardConfig::default();
        config.watch.target_file = "nested/modules.php".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_timeout_and_capacity() {
        let mut config = GuardConfig::default();
        config.restore.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GuardConfig::default();
        config.watch.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rendered_config_parses_back() {
        let mut config = GuardConfig::default();
        config.restore.content_path = Some(PathBuf::from("/etc/modules-guard/modules.php"));
        let rendered = config.to_toml().unwrap();
        let parsed: GuardConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn target_uses_builtin_payload_by_default() {
        let target = WatchTarget::from_config(&GuardConfig::default()).unwrap();
        assert_eq!(&*target.content, DEFAULT_MODULES_CONTENT.as_bytes());
        assert_eq!(target.content_digest().len(), 64);
    }

    #[test]
    fn target_reads_payload_file() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("payload.php");
        std::fs::write(&payload, "<?php return [];\n").unwrap();

        let mut config = GuardConfig::default();
        config.restore.content_path = Some(payload);
        let target = WatchTarget::from_config(&config).unwrap();
        assert_eq!(&*target.content, b"<?php return [];\n");
    }

    #[test]
    fn unreadable_payload_fails_startup() {
        let mut config = GuardConfig::default();
        config.restore.content_path = Some(PathBuf::from("/nonexistent/payload.php"));
        assert!(matches!(
            WatchTarget::from_config(&config),
            Err(StartupError::Content { .. })
        ));
    }
}
