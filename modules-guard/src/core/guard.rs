/*!
Coordinator that wires the monitor, filter and restorer into a single worker
*/

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{debug, info, warn};

use crate::core::{
    config::{GuardConfig, MonitorBackend, WatchTarget},
    filter::EventFilter,
    journal::Journal,
    monitor::{DirectoryMonitor, MonitorEvent, NativeMonitor, PollMonitor},
    restorer::{RestoreAction, RestoreOutcome, Restorer},
};
use crate::error::{StartupError, WatchLossError};

/// Counters for one run of the guard
#[derive(Debug, Clone)]
pub struct GuardStats {
    pub started_at: DateTime<Utc>,
    pub events_seen: u64,
    pub matched: u64,
    pub restored: u64,
    pub timed_out: u64,
    pub write_failures: u64,
    pub last_restore: Option<DateTime<Utc>>,
}

impl GuardStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            events_seen: 0,
            matched: 0,
            restored: 0,
            timed_out: 0,
            write_failures: 0,
            last_restore: None,
        }
    }

    fn record(&mut self, outcome: &RestoreOutcome) {
        match outcome {
            RestoreOutcome::Restored { .. } => {
                self.restored += 1;
                self.last_restore = Some(Utc::now());
            }
            RestoreOutcome::TimedOut { .. } => self.timed_out += 1,
            RestoreOutcome::WriteFailed { .. } => self.write_failures += 1,
        }
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

/// A guard that has been configured but is not yet subscribed.
pub struct Guard {
    target: Arc<WatchTarget>,
    filter: EventFilter,
    monitor: Box<dyn DirectoryMonitor>,
    restorer: Arc<dyn RestoreAction>,
    channel_capacity: usize,
}

impl Guard {
    pub fn new(
        target: WatchTarget,
        monitor: Box<dyn DirectoryMonitor>,
        restorer: Arc<dyn RestoreAction>,
        channel_capacity: usize,
    ) -> Self {
        Self {
            filter: EventFilter::new(target.target_file.clone()),
            target: Arc::new(target),
            monitor,
            restorer,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Build the production guard: notify backend from config, [`Restorer`] reporting to `journal`.
    pub fn from_config(config: &GuardConfig, journal: Arc<dyn Journal>) -> Result<Self, StartupError> {
        let target = WatchTarget::from_config(config)?;
        let monitor: Box<dyn DirectoryMonitor> = match config.watch.backend {
            MonitorBackend::Native => Box::new(NativeMonitor::new()),
            MonitorBackend::Poll => Box::new(PollMonitor::polling(std::time::Duration::from_millis(
                config.watch.poll_interval_ms,
            ))),
        };
        let restorer = Arc::new(Restorer::new(&target, &config.restore, journal));

        Ok(Self::new(target, monitor, restorer, config.watch.channel_capacity))
    }

    /// Subscribe to the watched directory. The watch is live once this returns.
    pub fn start(mut self) -> Result<ActiveGuard, StartupError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        self.monitor.start(&self.target.directory, tx)?;

        info!(
            "guarding {} in {} ({} bytes, blake3 {})",
            self.target.target_file,
            self.target.directory.display(),
            self.target.content.len(),
            self.target.content_digest()
        );

        Ok(ActiveGuard {
            events: ReceiverStream::new(rx),
            monitor: self.monitor,
            filter: self.filter,
            restorer: self.restorer,
            stats: GuardStats::new(),
        })
    }
}

/// A subscribed guard; [`run`](ActiveGuard::run) is its only consumer.
pub struct ActiveGuard {
    // Declared before `monitor`: the receiver must close before the watch is
    // released, or a notify thread blocked on a full channel stalls the unwatch.
    events: ReceiverStream<MonitorEvent>,
    monitor: Box<dyn DirectoryMonitor>,
    filter: EventFilter,
    restorer: Arc<dyn RestoreAction>,
    stats: GuardStats,
}

impl ActiveGuard {
    /// Handle events one at a time, in arrival order, until `shutdown` resolves or the watch is lost.
    ///
    /// While a restoration is in flight further events wait in the bounded channel.
    /// The monitor is stopped on every exit path.
    pub async fn run<F>(self, shutdown: F) -> Result<GuardStats, WatchLossError>
    where
        F: Future<Output = ()>,
    {
        let ActiveGuard {
            mut events,
            mut monitor,
            filter,
            restorer,
            mut stats,
        } = self;
        tokio::pin!(shutdown);

        let result = loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested");
                    break Ok(());
                }
                event = events.next() => event,
            };

            let deletion = match event {
                Some(MonitorEvent::Deleted(deletion)) => deletion,
                Some(MonitorEvent::Lost(e)) => break Err(e),
                None => break Err(WatchLossError::ChannelClosed),
            };
            stats.events_seen += 1;

            if !filter.matches(&deletion) {
                debug!("ignoring deletion of {}", deletion.path.display());
                continue;
            }
            stats.matched += 1;
            warn!("🚨 {} deleted, restoring", deletion.path.display());

            let restore = restorer.restore(&deletion.path);
            tokio::select! {
                _ = &mut shutdown => {
                    warn!("🛑 Shutdown requested, abandoning restoration of {}", deletion.path.display());
                    break Ok(());
                }
                outcome = restore => stats.record(&outcome),
            }
        };

        // Close the channel first so a notify thread blocked on send can exit.
        drop(events);
        monitor.stop();

        info!(
            "🏁 Guard stopped: {} events, {} matched, {} restored, {} timed out, {} write failures, up {}s",
            stats.events_seen,
            stats.matched,
            stats.restored,
            stats.timed_out,
            stats.write_failures,
            stats.uptime_seconds()
        );

        result.map(|()| stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{DEFAULT_MODULES_CONTENT, RestoreConfig};
    use crate::core::journal::MemoryJournal;
    use crate::core::monitor::DeletionEvent;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    type SharedSender = Arc<Mutex<Option<mpsc::Sender<MonitorEvent>>>>;

    /// Hands its sink back to the test instead of touching the filesystem.
    struct ScriptedMonitor {
        sink: SharedSender,
        stopped: Arc<AtomicBool>,
    }

    impl DirectoryMonitor for ScriptedMonitor {
        fn start(&mut self, _directory: &Path, sink: mpsc::Sender<MonitorEvent>) -> Result<(), StartupError> {
            *self.sink.lock().unwrap() = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.sink.lock().unwrap().take();
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingRestorer {
        calls: Mutex<Vec<PathBuf>>,
        delay: Duration,
    }

    #[async_trait]
    impl RestoreAction for RecordingRestorer {
        async fn restore(&self, path: &Path) -> RestoreOutcome {
            tokio::time::sleep(self.delay).await;
            self.calls.lock().unwrap().push(path.to_path_buf());
            RestoreOutcome::Restored {
                path: path.to_path_buf(),
                waited: Duration::ZERO,
            }
        }
    }

    fn target(directory: &Path) -> WatchTarget {
        WatchTarget {
            directory: directory.to_path_buf(),
            target_file: "modules.php".to_string(),
            content: DEFAULT_MODULES_CONTENT.as_bytes().into(),
        }
    }

    fn scripted(restorer: Arc<dyn RestoreAction>) -> (ActiveGuard, mpsc::Sender<MonitorEvent>, Arc<AtomicBool>) {
        let sink: SharedSender = Arc::default();
        let stopped = Arc::new(AtomicBool::new(false));
        let monitor = ScriptedMonitor {
            sink: Arc::clone(&sink),
            stopped: Arc::clone(&stopped),
        };
        let guard = Guard::new(target(Path::new("/watched")), Box::new(monitor), restorer, 8)
            .start()
            .unwrap();
        let sender = sink.lock().unwrap().clone().unwrap();
        (guard, sender, stopped)
    }

    fn deleted(path: &str) -> MonitorEvent {
        MonitorEvent::Deleted(DeletionEvent {
            path: PathBuf::from(path),
        })
    }

    #[tokio::test]
    async fn only_matching_deletions_are_restored_in_order() {
        let restorer = Arc::new(RecordingRestorer::default());
        let (guard, sender, stopped) = scripted(restorer.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(guard.run(async {
            let _ = stop_rx.await;
        }));

        sender.send(deleted("/watched/other.php")).await.unwrap();
        sender.send(deleted("/watched/modules.php")).await.unwrap();
        sender.send(deleted("/watched/cache.php")).await.unwrap();
        sender.send(deleted("/watched/modules.php")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.events_seen, 4);
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.restored, 2);
        assert_eq!(
            *restorer.calls.lock().unwrap(),
            vec![PathBuf::from("/watched/modules.php"), PathBuf::from("/watched/modules.php")]
        );
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn non_matching_deletions_never_reach_restorer() {
        let restorer = Arc::new(RecordingRestorer::default());
        let (guard, sender, _stopped) = scripted(restorer.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(guard.run(async {
            let _ = stop_rx.await;
        }));

        sender.send(deleted("/watched/other.php")).await.unwrap();
        sender.send(deleted("/watched/modules.php.bak")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.matched, 0);
        assert!(restorer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_loss_is_fatal_and_stops_monitor() {
        let restorer = Arc::new(RecordingRestorer::default());
        let (guard, sender, stopped) = scripted(restorer);

        sender
            .send(MonitorEvent::Lost(WatchLossError::DirectoryRemoved(PathBuf::from("/watched"))))
            .await
            .unwrap();
        let result = guard.run(std::future::pending()).await;

        assert!(matches!(result, Err(WatchLossError::DirectoryRemoved(_))));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closed_channel_is_a_watch_loss() {
        let restorer = Arc::new(RecordingRestorer::default());
        let sink: SharedSender = Arc::default();
        let monitor = ScriptedMonitor {
            sink: Arc::clone(&sink),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        let guard = Guard::new(target(Path::new("/watched")), Box::new(monitor), restorer, 8)
            .start()
            .unwrap();
        sink.lock().unwrap().take();

        let result = guard.run(std::future::pending()).await;
        assert!(matches!(result, Err(WatchLossError::ChannelClosed)));
    }

    #[tokio::test]
    async fn idle_shutdown_is_prompt() {
        let restorer = Arc::new(RecordingRestorer::default());
        let (guard, _sender, stopped) = scripted(restorer);

        let result = tokio::time::timeout(Duration::from_secs(1), guard.run(async {})).await;

        let stats = result.expect("shutdown took too long").unwrap();
        assert_eq!(stats.events_seen, 0);
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_abandons_in_flight_restoration() {
        let restorer = Arc::new(RecordingRestorer {
            calls: Mutex::default(),
            delay: Duration::from_secs(30),
        });
        let (guard, sender, stopped) = scripted(restorer.clone());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(guard.run(async {
            let _ = stop_rx.await;
        }));

        sender.send(deleted("/watched/modules.php")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("shutdown took too long")
            .unwrap()
            .unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.restored, 0);
        assert!(restorer.calls.lock().unwrap().is_empty());
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_is_logged_and_later_events_still_handled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = MemoryJournal::new();
        let restore = RestoreConfig {
            poll_interval_ms: 10,
            timeout_ms: 100,
            content_path: None,
        };
        let watch_target = target(dir.path());
        let restorer = Arc::new(Restorer::new(&watch_target, &restore, Arc::new(journal.clone())));
        let (guard, sender, _stopped) = scripted(restorer);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(guard.run(async {
            let _ = stop_rx.await;
        }));

        let gone = dir.path().join("gone").join("modules.php");
        let present = dir.path().join("modules.php");
        sender
            .send(MonitorEvent::Deleted(DeletionEvent { path: gone.clone() }))
            .await
            .unwrap();
        sender
            .send(MonitorEvent::Deleted(DeletionEvent { path: present.clone() }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        stop_tx.send(()).unwrap();

        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.restored, 1);
        assert!(!gone.exists());
        assert_eq!(std::fs::read_to_string(&present).unwrap(), DEFAULT_MODULES_CONTENT);
        assert_eq!(journal.errors().len(), 1);
    }
}
