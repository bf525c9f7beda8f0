/*!
Rewrites the target file after it has been deleted
*/

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::core::config::{RestoreConfig, WatchTarget};
use crate::core::journal::Journal;
use crate::error::RestoreError;

/// Terminal state of one restore attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// File rewritten after the parent directory was found.
    Restored { path: PathBuf, waited: Duration },
    /// Parent directory never appeared; nothing was written.
    TimedOut { directory: PathBuf, waited: Duration },
    /// Directory was there but the write itself failed.
    WriteFailed { path: PathBuf, reason: String },
}

/// Anything the dispatcher can hand a deleted target path to.
#[async_trait]
pub trait RestoreAction: Send + Sync {
    /// Never fails: every problem is reported through the outcome and the journal.
    async fn restore(&self, path: &Path) -> RestoreOutcome;
}

pub struct Restorer {
    content: Arc<[u8]>,
    poll_interval: Duration,
    timeout: Duration,
    journal: Arc<dyn Journal>,
}

impl Restorer {
    pub fn new(target: &WatchTarget, config: &RestoreConfig, journal: Arc<dyn Journal>) -> Self {
        Self {
            content: Arc::clone(&target.content),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            journal,
        }
    }

    /// Poll until `directory` exists. `Err` carries the time waited before giving up.
    async fn wait_for_directory(&self, directory: &Path) -> Result<Duration, Duration> {
        let started = Instant::now();
        loop {
            if is_directory(directory).await {
                return Ok(started.elapsed());
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                return Err(waited);
            }

            debug!("waiting for {} ({}ms so far)", directory.display(), waited.as_millis());
            sleep(self.poll_interval).await;
        }
    }

    /// Create or truncate `path` and write the whole payload.
    async fn write_content(&self, path: &Path) -> Result<(), RestoreError> {
        tokio::fs::write(path, &*self.content)
            .await
            .map_err(|source| RestoreError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl RestoreAction for Restorer {
    async fn restore(&self, path: &Path) -> RestoreOutcome {
        let directory = parent_directory(path);

        let waited = match self.wait_for_directory(&directory).await {
            Ok(waited) => waited,
            Err(waited) => {
                let e = RestoreError::DirectoryTimeout {
                    directory: directory.clone(),
                    waited,
                };
                self.journal.error(&e.to_string());
                return RestoreOutcome::TimedOut { directory, waited };
            }
        };

        if let Err(e) = self.write_content(path).await {
            self.journal.error(&e.to_string());
            return RestoreOutcome::WriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            };
        }

        self.journal.info(&format!(
            "restored {} ({} bytes)",
            path.display(),
            self.content.len()
        ));
        RestoreOutcome::Restored {
            path: path.to_path_buf(),
            waited,
        }
    }
}

fn parent_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
