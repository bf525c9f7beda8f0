/*!
Injected log sink for the restore path
*/

use std::sync::{Arc, Mutex};

use tracing::{error, info};

/// Where the restore path reports what it did.
pub trait Journal: Send + Sync {
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the process-wide `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingJournal;

impl Journal for TracingJournal {
    fn info(&self, message: &str) {
        info!(target: "modules_guard::restore", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "modules_guard::restore", "{message}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalLevel {
    Info,
    Error,
}

/// Keeps every line in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    lines: Arc<Mutex<Vec<(JournalLevel, String)>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(JournalLevel, String)> {
        self.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(level, _)| *level == JournalLevel::Error)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(JournalLevel, String)>> {
        // A poisoned journal still holds valid lines.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Journal for MemoryJournal {
    fn info(&self, message: &str) {
        self.lock().push((JournalLevel::Info, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.lock().push((JournalLevel::Error, message.to_string()));
    }
}
