/*!
Directory monitoring on top of `notify`

A monitor watches exactly one directory, non-recursively, and pushes every
deletion it sees into a bounded channel. Filtering happens downstream.
*/

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{StartupError, WatchLossError};

/// An entry was removed from the watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEvent {
    pub path: PathBuf,
}

/// What a monitor delivers to its consumer.
#[derive(Debug)]
pub enum MonitorEvent {
    Deleted(DeletionEvent),
    /// The subscription is gone; nothing else will arrive.
    Lost(WatchLossError),
}

/// Platform-independent capability the guard depends on.
pub trait DirectoryMonitor: Send {
    /// Subscribe to `directory` and forward events into `sink` until [`stop`](Self::stop).
    fn start(
        &mut self,
        directory: &Path,
        sink: mpsc::Sender<MonitorEvent>,
    ) -> Result<(), StartupError>;

    /// Unsubscribe and release the OS watch. Safe to call repeatedly.
    fn stop(&mut self);
}

/// inotify / FSEvents / ReadDirectoryChangesW, whichever the platform offers.
pub type NativeMonitor = NotifyMonitor<RecommendedWatcher>;

/// Periodic scans, for filesystems that do not emit notifications (NFS, some containers).
pub type PollMonitor = NotifyMonitor<PollWatcher>;

struct ActiveWatch<W> {
    watcher: W,
    directory: PathBuf,
}

/// [`DirectoryMonitor`] backed by any `notify` watcher.
pub struct NotifyMonitor<W: Watcher> {
    config: notify::Config,
    active: Option<ActiveWatch<W>>,
}

impl<W: Watcher> NotifyMonitor<W> {
    pub fn new() -> Self {
        Self::with_config(notify::Config::default())
    }

    pub fn with_config(config: notify::Config) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl<W: Watcher> Default for NotifyMonitor<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl PollMonitor {
    pub fn polling(interval: Duration) -> Self {
        Self::with_config(notify::Config::default().with_poll_interval(interval))
    }
}

impl<W: Watcher + Send> DirectoryMonitor for NotifyMonitor<W> {
    fn start(
        &mut self,
        directory: &Path,
        sink: mpsc::Sender<MonitorEvent>,
    ) -> Result<(), StartupError> {
        self.stop();

        let directory = resolve_directory(directory)?;
        let config = self.config;

        // Some backends (PollWatcher) scan and report synchronously inside `watch`.
        // Subscribing off the caller's thread keeps `blocking_send` out of any async runtime.
        let watcher = std::thread::scope(|scope| {
            scope
                .spawn(|| subscribe::<W>(&directory, sink, config))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })?;

        info!("watching {} (non-recursive)", directory.display());
        self.active = Some(ActiveWatch { watcher, directory });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut active) = self.active.take() {
            if let Err(e) = active.watcher.unwatch(&active.directory) {
                // Expected when the directory itself has already gone away.
                debug!("unwatch {} failed: {}", active.directory.display(), e);
            }
            info!("stopped watching {}", active.directory.display());
        }
    }
}

impl<W: Watcher> Drop for NotifyMonitor<W> {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            let _ = active.watcher.unwatch(&active.directory);
        }
    }
}

fn subscribe<W: Watcher>(
    directory: &Path,
    sink: mpsc::Sender<MonitorEvent>,
    config: notify::Config,
) -> Result<W, StartupError> {
    let watched = directory.to_path_buf();
    let mut watcher = W::new(
        move |result: notify::Result<Event>| {
            for event in translate(&watched, result) {
                // Blocks the notify thread while the worker is busy restoring.
                if sink.blocking_send(event).is_err() {
                    debug!("monitor receiver dropped, discarding event");
                    return;
                }
            }
        },
        config,
    )
    .map_err(|source| StartupError::Subscribe {
        path: directory.to_path_buf(),
        source,
    })?;

    watcher
        .watch(directory, RecursiveMode::NonRecursive)
        .map_err(|source| StartupError::Subscribe {
            path: directory.to_path_buf(),
            source,
        })?;

    Ok(watcher)
}

/// The directory must exist up front; a canonical path keeps event paths comparable.
fn resolve_directory(directory: &Path) -> Result<PathBuf, StartupError> {
    let metadata = std::fs::metadata(directory)
        .map_err(|_| StartupError::MissingDirectory(directory.to_path_buf()))?;
    if !metadata.is_dir() {
        return Err(StartupError::NotADirectory(directory.to_path_buf()));
    }
    std::fs::canonicalize(directory).map_err(|_| StartupError::MissingDirectory(directory.to_path_buf()))
}

/// Map one raw notification onto zero or more monitor events.
///
/// Moving an entry out of its name counts as deleting it. Errors about a single
/// entry (stat of a dangling link, a file gone between readdir and stat) are not
/// a lost subscription.
fn translate(watched: &Path, result: notify::Result<Event>) -> Vec<MonitorEvent> {
    let event = match result {
        Ok(event) => event,
        Err(e) if e.paths.iter().any(|path| path != watched) => {
            warn!("watch backend error, still watching: {}", e);
            return Vec::new();
        }
        Err(e) => {
            warn!("watch backend error: {}", e);
            return vec![MonitorEvent::Lost(WatchLossError::Backend(e.to_string()))];
        }
    };

    let moved_away = match event.kind {
        EventKind::Remove(_) => false,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => true,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .filter_map(|path| {
            if path == watched {
                Some(MonitorEvent::Lost(if moved_away {
                    WatchLossError::DirectoryMoved(path)
                } else {
                    WatchLossError::DirectoryRemoved(path)
                }))
            } else if path.parent() == Some(watched) {
                Some(MonitorEvent::Deleted(DeletionEvent { path }))
            } else {
                None
            }
        })
        .collect()
}
