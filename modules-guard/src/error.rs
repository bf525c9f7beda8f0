/*!
Error taxonomy for the guard
*/

use std::path::PathBuf;
use std::time::Duration;

/// Failures that prevent the watcher from ever becoming live.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("watched directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("watched path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to subscribe to {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("failed to read replacement content from {path}: {source}")]
    Content {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare log directory {path}: {source}")]
    LogDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open log file: {0}")]
    LogFile(String),

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),
}

/// The OS-level subscription stopped delivering events after startup.
#[derive(Debug, thiserror::Error)]
pub enum WatchLossError {
    #[error("watched directory {0} was removed")]
    DirectoryRemoved(PathBuf),

    #[error("watched directory {0} was moved away")]
    DirectoryMoved(PathBuf),

    #[error("watch backend failed: {0}")]
    Backend(String),

    #[error("event channel closed unexpectedly")]
    ChannelClosed,
}

/// A single restoration attempt that could not complete. Always absorbed by the restorer.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("directory {} did not appear within {}ms", directory.display(), waited.as_millis())]
    DirectoryTimeout { directory: PathBuf, waited: Duration },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    WatchLost(#[from] WatchLossError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl GuardError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            GuardError::Config(_) => 2,
            GuardError::Startup(_) | GuardError::WatchLost(_) => 1,
        }
    }
}
