/*!
Console + file logging
*/

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::config::LoggingConfig;
use crate::error::StartupError;

/// Create the log directory if needed and return the full log file path.
pub fn prepare_log_dir(config: &LoggingConfig) -> Result<PathBuf, StartupError> {
    std::fs::create_dir_all(&config.directory).map_err(|source| StartupError::LogDirectory {
        path: config.directory.clone(),
        source,
    })?;
    Ok(config.directory.join(&config.file_name))
}

/// Install the global subscriber: one console layer and one plain-text file layer.
///
/// The returned guard flushes the file writer when dropped, so hold it until exit.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard, StartupError> {
    prepare_log_dir(config)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&config.file_name)
        .build(&config.directory)
        .map_err(|e| StartupError::LogFile(e.to_string()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false) // No ANSI colors in log files
                .with_writer(non_blocking),
        )
        .try_init()
        .map_err(|e| StartupError::Subscriber(e.to_string()))?;

    Ok(guard)
}
